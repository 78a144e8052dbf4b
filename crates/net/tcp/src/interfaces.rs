//! Expansion of wildcard listen addresses into per-interface multiaddrs.
//!
//! A listener bound to `0.0.0.0` accepts on every IPv4 interface, but
//! `0.0.0.0` is not something a remote peer can dial. The expander queries the
//! host's interfaces at call time and produces one concrete multiaddr per
//! IPv4 interface address.
//!
//! # Cross-Platform Support
//!
//! [`SystemInterfaces`] uses the `netdev` crate (Linux, macOS, Windows,
//! Android, iOS, BSDs). Nothing is cached: interfaces can come and go between
//! calls.

use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
};

use libp2p::{Multiaddr, multiaddr::Protocol};
use tracing::{debug, trace, warn};

use crate::codec::{self, IdentitySuffix};

/// One address assigned to a local network interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceRecord {
    /// Interface name as reported by the OS (e.g. `eth0`, `lo`).
    pub name: String,
    /// Assigned address. Its variant is the interface family.
    pub addr: IpAddr,
}

impl InterfaceRecord {
    pub fn new(name: impl Into<String>, addr: IpAddr) -> Self {
        Self {
            name: name.into(),
            addr,
        }
    }
}

/// Source of the host's interface addresses.
///
/// Implementations must answer synchronously and without blocking; the
/// expander calls this from async contexts.
pub trait InterfaceSource: Send + Sync {
    fn interfaces(&self) -> Vec<InterfaceRecord>;
}

impl<T: InterfaceSource + ?Sized> InterfaceSource for Arc<T> {
    fn interfaces(&self) -> Vec<InterfaceRecord> {
        (**self).interfaces()
    }
}

/// Interface enumeration backed by the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemInterfaces;

impl InterfaceSource for SystemInterfaces {
    fn interfaces(&self) -> Vec<InterfaceRecord> {
        let mut records = Vec::new();

        for iface in netdev::get_interfaces() {
            if !iface.is_up() {
                trace!(interface = %iface.name, "skipping down interface");
                continue;
            }

            for net in &iface.ipv4 {
                records.push(InterfaceRecord::new(iface.name.clone(), IpAddr::V4(net.addr())));
            }
            for net in &iface.ipv6 {
                records.push(InterfaceRecord::new(iface.name.clone(), IpAddr::V6(net.addr())));
            }
        }

        if records.is_empty() {
            warn!("no interface addresses discovered - interface query may have failed");
        }

        records
    }
}

/// Turns the endpoint a listener actually bound into dialable multiaddrs.
#[derive(Debug, Clone, Default)]
pub struct InterfaceExpander<S = SystemInterfaces> {
    source: S,
}

impl<S: InterfaceSource> InterfaceExpander<S> {
    pub fn new(source: S) -> Self {
        Self { source }
    }

    /// Produce the listen addresses for a listener bound at `bound` in answer
    /// to `request`.
    ///
    /// - IPv4 requests keep their host and take the bound port. An
    ///   unspecified host (`0.0.0.0`) yields one address per IPv4 interface.
    /// - IPv6 requests (including `::`) yield the bound endpoint alone; no
    ///   interface enumeration happens for them.
    ///
    /// The request's identity suffix, if any, is attached to every result.
    /// The order of expanded addresses follows the OS and is not stable.
    pub fn expand(&self, bound: SocketAddr, request: &Multiaddr) -> Vec<Multiaddr> {
        let (base, identity) = codec::split_identity(request);

        let requested_v4 = base.iter().find_map(|proto| match proto {
            Protocol::Ip4(ip) => Some(ip),
            _ => None,
        });

        let Some(requested_v4) = requested_v4 else {
            return vec![codec::from_socket_addr(bound, identity.as_ref())];
        };

        if !requested_v4.is_unspecified() {
            let addr = SocketAddr::new(IpAddr::V4(requested_v4), bound.port());
            return vec![codec::from_socket_addr(addr, identity.as_ref())];
        }

        let expanded = self.expand_wildcard(bound.port(), identity.as_ref());
        debug!(
            %request,
            port = bound.port(),
            count = expanded.len(),
            "expanded wildcard listen address"
        );
        expanded
    }

    fn expand_wildcard(&self, port: u16, identity: Option<&IdentitySuffix>) -> Vec<Multiaddr> {
        self.source
            .interfaces()
            .into_iter()
            .filter_map(|record| match record.addr {
                IpAddr::V4(v4) => {
                    trace!(interface = %record.name, addr = %v4, "wildcard candidate");
                    Some(codec::from_socket_addr(
                        SocketAddr::new(IpAddr::V4(v4), port),
                        identity,
                    ))
                }
                IpAddr::V6(_) => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    const PEER: &str = "Qmb6owHp6eaWArVbcJJbQSyifyJBttMMjYV76N2hMbf5Vw";

    struct FixedInterfaces(Vec<InterfaceRecord>);

    impl InterfaceSource for FixedInterfaces {
        fn interfaces(&self) -> Vec<InterfaceRecord> {
            self.0.clone()
        }
    }

    fn fixed() -> InterfaceExpander<FixedInterfaces> {
        InterfaceExpander::new(FixedInterfaces(vec![
            InterfaceRecord::new("lo", "127.0.0.1".parse().unwrap()),
            InterfaceRecord::new("lo", "::1".parse().unwrap()),
            InterfaceRecord::new("eth0", "192.168.1.20".parse().unwrap()),
            InterfaceRecord::new("eth0", "fe80::1".parse().unwrap()),
        ]))
    }

    fn ma(s: &str) -> Multiaddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_wildcard_expands_ipv4_interfaces() {
        let bound: SocketAddr = "0.0.0.0:9090".parse().unwrap();
        let addrs = fixed().expand(bound, &ma("/ip4/0.0.0.0/tcp/9090"));

        let set: HashSet<_> = addrs.iter().cloned().collect();
        assert_eq!(addrs.len(), 2);
        assert!(set.contains(&ma("/ip4/127.0.0.1/tcp/9090")));
        assert!(set.contains(&ma("/ip4/192.168.1.20/tcp/9090")));
        assert!(addrs.iter().all(|a| !a.to_string().contains("0.0.0.0")));
    }

    #[test]
    fn test_wildcard_uses_bound_port() {
        let bound: SocketAddr = "0.0.0.0:40123".parse().unwrap();
        let addrs = fixed().expand(bound, &ma("/ip4/0.0.0.0/tcp/0"));
        assert!(addrs.iter().all(|a| a.iter().any(|p| p == Protocol::Tcp(40123))));
    }

    #[test]
    fn test_wildcard_keeps_identity() {
        let bound: SocketAddr = "0.0.0.0:9090".parse().unwrap();
        let request = ma(&format!("/ip4/0.0.0.0/tcp/9090/ipfs/{PEER}"));
        let addrs = fixed().expand(bound, &request);

        assert_eq!(addrs.len(), 2);
        assert!(addrs.contains(&ma(&format!("/ip4/192.168.1.20/tcp/9090/p2p/{PEER}"))));
    }

    #[test]
    fn test_concrete_ip4_not_expanded() {
        let bound: SocketAddr = "127.0.0.1:51000".parse().unwrap();
        let addrs = fixed().expand(bound, &ma("/ip4/127.0.0.1/tcp/0"));
        assert_eq!(addrs, vec![ma("/ip4/127.0.0.1/tcp/51000")]);
    }

    #[test]
    fn test_ip6_wildcard_not_expanded() {
        let bound: SocketAddr = "[::]:9090".parse().unwrap();
        let addrs = fixed().expand(bound, &ma("/ip6/::/tcp/9090"));
        assert_eq!(addrs, vec![ma("/ip6/::/tcp/9090")]);
    }

    #[test]
    fn test_no_interfaces_yields_nothing() {
        let expander = InterfaceExpander::new(FixedInterfaces(Vec::new()));
        let bound: SocketAddr = "0.0.0.0:9090".parse().unwrap();
        assert!(expander.expand(bound, &ma("/ip4/0.0.0.0/tcp/9090")).is_empty());
    }

    #[test]
    fn test_system_wildcard_covers_ipv4_records() {
        let expected: HashSet<_> = SystemInterfaces
            .interfaces()
            .into_iter()
            .filter_map(|record| match record.addr {
                IpAddr::V4(v4) => Some(ma(&format!("/ip4/{v4}/tcp/9090"))),
                IpAddr::V6(_) => None,
            })
            .collect();

        let bound: SocketAddr = "0.0.0.0:9090".parse().unwrap();
        let expanded: HashSet<_> = InterfaceExpander::new(SystemInterfaces)
            .expand(bound, &ma("/ip4/0.0.0.0/tcp/9090"))
            .into_iter()
            .collect();

        assert_eq!(expanded, expected);
        assert!(expanded.iter().all(|a| !a.to_string().contains("0.0.0.0")));
    }
}
