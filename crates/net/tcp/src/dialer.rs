//! Outbound connections.

use std::io;

use libp2p::Multiaddr;
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::{
    codec,
    config::TcpConfig,
    connection::{ConnectionDirection, TcpConnection},
    error::TcpError,
    metrics::TransportMetrics,
};

/// Open a TCP connection to `addr`.
///
/// The identity tuple, if present, is not verified here; it is carried into
/// the connection's observed address for the layers above. A single connect
/// attempt is made, bounded by [`TcpConfig::connect_timeout`]. Dropping the
/// returned future abandons the attempt and releases the socket.
pub(crate) async fn dial(
    addr: &Multiaddr,
    config: &TcpConfig,
    metrics: &TransportMetrics,
) -> Result<TcpConnection, TcpError> {
    let (socket_addr, identity) = codec::to_socket_addr(addr)?;

    debug!(%addr, %socket_addr, "dialing");

    let connect = tokio::time::timeout(config.connect_timeout(), TcpStream::connect(socket_addr));
    let stream = match connect.await {
        Ok(Ok(stream)) => stream,
        Ok(Err(source)) => return Err(dial_failed(addr, source, metrics)),
        Err(_) => {
            let source = io::Error::new(
                io::ErrorKind::TimedOut,
                format!("connect timed out after {:?}", config.connect_timeout()),
            );
            return Err(dial_failed(addr, source, metrics));
        }
    };

    let local = stream
        .local_addr()
        .map_err(|source| dial_failed(addr, source, metrics))?;
    let remote = stream
        .peer_addr()
        .map_err(|source| dial_failed(addr, source, metrics))?;

    if let Err(err) = stream.set_nodelay(config.nodelay) {
        debug!(%addr, %err, "failed to set TCP_NODELAY");
    }

    let observed = codec::from_socket_addr(remote, identity.as_ref());
    metrics.connection_dialed();
    debug!(%observed, %local, "connection established");

    Ok(TcpConnection::new(
        stream,
        local,
        remote,
        observed,
        ConnectionDirection::Outbound,
        config.read_chunk_size,
    ))
}

fn dial_failed(addr: &Multiaddr, source: io::Error, metrics: &TransportMetrics) -> TcpError {
    warn!(%addr, %source, "dial failed");
    metrics.dial_failed();
    TcpError::Dial {
        addr: addr.clone(),
        source,
    }
}
