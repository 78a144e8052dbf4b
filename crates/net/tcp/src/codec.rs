//! Conversion between TCP multiaddrs and socket addresses.
//!
//! A TCP multiaddr is one network-family tuple (`/ip4` or `/ip6`), one `/tcp`
//! tuple and optionally a trailing identity tuple (`/p2p/<id>`, also spelled
//! `/ipfs/<id>`). The identity is detached before anything touches a socket
//! and re-attached to every multiaddr derived from the socket afterwards.

use std::{
    fmt,
    net::{IpAddr, SocketAddr},
};

use libp2p::{Multiaddr, PeerId, multiaddr::Protocol};
use tracing::trace;

use crate::error::TcpError;

/// Identity tuple detached from a listen or dial request.
///
/// The transport never interprets it; it only carries it from the request to
/// the addresses derived from that request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IdentitySuffix(PeerId);

impl IdentitySuffix {
    pub fn new(peer_id: PeerId) -> Self {
        Self(peer_id)
    }

    pub fn peer_id(&self) -> &PeerId {
        &self.0
    }

    /// The tuple appended to derived multiaddrs.
    pub fn to_protocol(&self) -> Protocol<'static> {
        Protocol::P2p(self.0)
    }

    /// Append this suffix to `addr`.
    pub fn attach(&self, addr: Multiaddr) -> Multiaddr {
        addr.with(self.to_protocol())
    }
}

impl fmt::Display for IdentitySuffix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/p2p/{}", self.0)
    }
}

/// Split off a trailing identity tuple, if any.
///
/// Only the last tuple is considered; an identity tuple anywhere else stays
/// in the returned base address (and later fails validation).
pub fn split_identity(addr: &Multiaddr) -> (Multiaddr, Option<IdentitySuffix>) {
    match addr.iter().last() {
        Some(Protocol::P2p(peer_id)) => {
            let mut base = addr.clone();
            base.pop();
            (base, Some(IdentitySuffix(peer_id)))
        }
        _ => (addr.clone(), None),
    }
}

/// Convert a TCP multiaddr into the socket address to hand to the OS.
///
/// Returns the detached identity suffix alongside. Fails with
/// [`TcpError::InvalidAddress`] unless the remaining tuples are exactly one
/// `/ip4` or `/ip6` tuple and one `/tcp` tuple.
pub fn to_socket_addr(addr: &Multiaddr) -> Result<(SocketAddr, Option<IdentitySuffix>), TcpError> {
    let (base, identity) = split_identity(addr);

    let mut ip = None;
    let mut port = None;
    for proto in base.iter() {
        match proto {
            Protocol::Ip4(v4) if ip.is_none() => ip = Some(IpAddr::V4(v4)),
            Protocol::Ip6(v6) if ip.is_none() => ip = Some(IpAddr::V6(v6)),
            Protocol::Ip4(_) | Protocol::Ip6(_) => {
                return Err(TcpError::invalid(addr, "more than one network-family tuple"));
            }
            Protocol::Tcp(p) if port.is_none() => port = Some(p),
            Protocol::Tcp(_) => return Err(TcpError::invalid(addr, "more than one tcp tuple")),
            Protocol::P2p(_) => {
                return Err(TcpError::invalid(addr, "identity tuple must be the last tuple"));
            }
            _ => return Err(TcpError::invalid(addr, "unsupported protocol for tcp transport")),
        }
    }

    let ip = ip.ok_or_else(|| TcpError::invalid(addr, "missing ip4/ip6 tuple"))?;
    let port = port.ok_or_else(|| TcpError::invalid(addr, "missing tcp tuple"))?;

    let socket_addr = SocketAddr::new(ip, port);
    trace!(%addr, %socket_addr, has_identity = identity.is_some(), "decoded tcp multiaddr");
    Ok((socket_addr, identity))
}

/// Convert an OS-reported socket address back into a canonical multiaddr.
///
/// IPv4-mapped IPv6 addresses (`::ffff:a.b.c.d`) become `/ip4/a.b.c.d`: a
/// dual-stack socket reports IPv4 peers in that form. The deprecated
/// IPv4-compatible form (`::a.b.c.d`) keeps its family, otherwise `::1` would
/// come back as `0.0.0.1`. The port is taken as reported.
pub fn from_socket_addr(addr: SocketAddr, identity: Option<&IdentitySuffix>) -> Multiaddr {
    let base = Multiaddr::empty()
        .with(Protocol::from(addr.ip().to_canonical()))
        .with(Protocol::Tcp(addr.port()));

    match identity {
        Some(identity) => identity.attach(base),
        None => base,
    }
}
