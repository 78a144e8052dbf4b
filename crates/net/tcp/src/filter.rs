//! Selection of multiaddrs this transport can listen on or dial.

use libp2p::Multiaddr;

use crate::codec;

/// Whether `addr` is a TCP multiaddr, optionally ending in an identity tuple.
///
/// After dropping a trailing `/p2p` (or `/ipfs`) tuple the address must
/// consist of exactly one `/ip4` or `/ip6` tuple and one `/tcp` tuple.
pub fn accepts(addr: &Multiaddr) -> bool {
    codec::to_socket_addr(addr).is_ok()
}

/// Keep the addresses [`accepts`] allows, in their original order.
///
/// A single address is filtered by passing a one-element collection, e.g.
/// `filter([addr])`.
pub fn filter<I>(addrs: I) -> Vec<Multiaddr>
where
    I: IntoIterator,
    I::Item: Into<Multiaddr>,
{
    addrs
        .into_iter()
        .map(Into::into)
        .filter(accepts)
        .collect()
}
