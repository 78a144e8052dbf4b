//! Transport entry point tying configuration, listening and dialing together.

use std::{fmt, sync::Arc};

use libp2p::Multiaddr;

use crate::{
    config::TcpConfig,
    connection::TcpConnection,
    dialer,
    error::TcpError,
    filter,
    interfaces::{InterfaceSource, SystemInterfaces},
    listener::{ListenRequest, TcpListener},
    metrics::TransportMetrics,
};

/// TCP transport for multiaddrs.
///
/// Cheap to clone; clones share configuration and interface source.
///
/// ```no_run
/// # async fn run() -> Result<(), vertex_net_tcp::TcpError> {
/// use futures::StreamExt;
/// use vertex_net_tcp::{TcpConfig, TcpTransport};
///
/// let transport = TcpTransport::new(TcpConfig::default());
/// let addr: libp2p::Multiaddr = "/ip4/0.0.0.0/tcp/0".parse().unwrap();
/// let mut listener = transport.listen(addr)?;
/// for addr in listener.get_addrs().await? {
///     println!("listening on {addr}");
/// }
/// while let Some(conn) = listener.next().await {
///     let _conn = conn?;
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct TcpTransport {
    config: TcpConfig,
    interfaces: Arc<dyn InterfaceSource>,
    metrics: TransportMetrics,
}

impl TcpTransport {
    pub fn new(config: TcpConfig) -> Self {
        Self {
            config,
            interfaces: Arc::new(SystemInterfaces),
            metrics: TransportMetrics::default(),
        }
    }

    /// Replace the interface source used to expand wildcard listen addresses.
    pub fn with_interfaces(mut self, interfaces: impl InterfaceSource + 'static) -> Self {
        self.interfaces = Arc::new(interfaces);
        self
    }

    pub fn config(&self) -> &TcpConfig {
        &self.config
    }

    /// Start listening.
    ///
    /// Invalid addresses fail immediately. Binding happens in the background:
    /// a bind failure is delivered as the listener's first item, and address
    /// queries wait until binding finishes. Must be called within a tokio
    /// runtime.
    pub fn listen(&self, request: impl Into<ListenRequest>) -> Result<TcpListener, TcpError> {
        TcpListener::spawn(
            request.into(),
            &self.config,
            self.interfaces.clone(),
            self.metrics.clone(),
        )
    }

    /// Connect to `addr`.
    pub async fn dial(&self, addr: &Multiaddr) -> Result<TcpConnection, TcpError> {
        dialer::dial(addr, &self.config, &self.metrics).await
    }

    /// Keep the addresses this transport can handle, in order.
    pub fn filter<I>(&self, addrs: I) -> Vec<Multiaddr>
    where
        I: IntoIterator,
        I::Item: Into<Multiaddr>,
    {
        filter::filter(addrs)
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new(TcpConfig::default())
    }
}

impl fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpTransport")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
