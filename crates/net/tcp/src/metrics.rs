//! TCP Transport Metrics

use metrics::{Counter, Gauge};

/// TCP Transport Metrics
#[derive(Clone, Debug)]
pub(crate) struct TransportMetrics {
    /// Number of listeners that finished binding
    listeners_bound_total: Counter,
    /// Number of listeners currently accepting
    listeners_active: Gauge,
    /// Number of accepted inbound connections
    connections_accepted_total: Counter,
    /// Number of established outbound connections
    connections_dialed_total: Counter,
    /// Number of failed outbound connects
    dial_failures_total: Counter,
}

impl Default for TransportMetrics {
    fn default() -> Self {
        Self {
            listeners_bound_total: metrics::counter!("net.tcp.listeners_bound_total"),
            listeners_active: metrics::gauge!("net.tcp.listeners_active"),
            connections_accepted_total: metrics::counter!("net.tcp.connections_accepted_total"),
            connections_dialed_total: metrics::counter!("net.tcp.connections_dialed_total"),
            dial_failures_total: metrics::counter!("net.tcp.dial_failures_total"),
        }
    }
}

impl TransportMetrics {
    pub(crate) fn listener_bound(&self) {
        self.listeners_bound_total.increment(1);
        self.listeners_active.increment(1.0);
    }

    pub(crate) fn listener_closed(&self) {
        self.listeners_active.decrement(1.0);
    }

    pub(crate) fn connection_accepted(&self) {
        self.connections_accepted_total.increment(1);
    }

    pub(crate) fn connection_dialed(&self) {
        self.connections_dialed_total.increment(1);
    }

    pub(crate) fn dial_failed(&self) {
        self.dial_failures_total.increment(1);
    }
}
