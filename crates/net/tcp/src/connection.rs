//! A single accepted or dialed TCP connection.
//!
//! [`TcpConnection`] owns its socket exclusively. Received data is exposed as
//! a [`Stream`] of byte chunks in arrival order; writes go through
//! [`TcpConnection::send`]. The stream ends exactly once: on remote EOF, after
//! an I/O error (yielded as the last item), or after a local
//! [`TcpConnection::close`].

use std::{
    any::Any,
    fmt, io,
    net::SocketAddr,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use bytes::Bytes;
use futures::Stream;
use libp2p::Multiaddr;
use parking_lot::Mutex;
use tokio::{
    io::{AsyncRead, AsyncWriteExt, ReadBuf},
    net::{
        TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
};
use tracing::{debug, trace};

use crate::error::TcpError;

/// Which side initiated the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionDirection {
    /// Accepted by a listener.
    Inbound,
    /// Opened by a dial.
    Outbound,
}

/// Opaque metadata a higher layer attaches to a connection (typically the
/// verified peer identity). The transport stores it and never looks inside.
#[derive(Clone)]
pub struct PeerInfo(Arc<dyn Any + Send + Sync>);

impl PeerInfo {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }
}

impl fmt::Debug for PeerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PeerInfo").finish_non_exhaustive()
    }
}

/// Connection metadata contract consumed by higher layers.
///
/// Wrappers around a connection implement this by delegating to the inner
/// connection, or by answering themselves.
pub trait ConnectionInfo {
    /// Addresses the remote end was observed at.
    fn observed_addrs(&self) -> Vec<Multiaddr>;

    /// Peer metadata previously stored with [`ConnectionInfo::set_peer_info`].
    ///
    /// Fails with [`TcpError::NotAvailable`] if nothing was stored.
    fn peer_info(&self) -> Result<PeerInfo, TcpError>;

    fn set_peer_info(&self, info: PeerInfo);
}

/// Byte stream over one TCP socket.
pub struct TcpConnection {
    reader: Option<OwnedReadHalf>,
    writer: Option<OwnedWriteHalf>,
    scratch: Box<[u8]>,
    local_addr: SocketAddr,
    remote_addr: SocketAddr,
    observed: Multiaddr,
    direction: ConnectionDirection,
    peer_info: Mutex<Option<PeerInfo>>,
}

impl TcpConnection {
    pub(crate) fn new(
        stream: TcpStream,
        local_addr: SocketAddr,
        remote_addr: SocketAddr,
        observed: Multiaddr,
        direction: ConnectionDirection,
        read_chunk_size: usize,
    ) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            reader: Some(reader),
            writer: Some(writer),
            scratch: vec![0; read_chunk_size.max(1)].into_boxed_slice(),
            local_addr,
            remote_addr,
            observed,
            direction,
            peer_info: Mutex::new(None),
        }
    }

    /// Local socket address as reported by the OS.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Remote socket address as reported by the OS.
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Canonical multiaddr of the remote end.
    pub fn remote_multiaddr(&self) -> &Multiaddr {
        &self.observed
    }

    pub fn direction(&self) -> ConnectionDirection {
        self.direction
    }

    /// Write all of `data` to the socket.
    ///
    /// Fails with [`TcpError::ConnectionClosed`] after [`close`](Self::close).
    /// A write error closes the connection.
    pub async fn send(&mut self, data: &[u8]) -> Result<(), TcpError> {
        let Some(writer) = self.writer.as_mut() else {
            return Err(TcpError::ConnectionClosed);
        };

        if let Err(err) = writer.write_all(data).await {
            debug!(remote = %self.observed, %err, "write failed, closing connection");
            self.release();
            return Err(TcpError::Stream(err));
        }

        trace!(remote = %self.observed, len = data.len(), "sent");
        Ok(())
    }

    /// Close the connection.
    ///
    /// Shuts down the write side so the remote sees EOF, then releases the
    /// socket. Calling this again is a no-op.
    pub async fn close(&mut self) {
        self.reader = None;
        let Some(mut writer) = self.writer.take() else {
            return;
        };

        match writer.shutdown().await {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotConnected => {}
            Err(err) => debug!(remote = %self.observed, %err, "shutdown failed"),
        }
        debug!(remote = %self.observed, direction = ?self.direction, "connection closed");
    }

    /// Whether both directions have been released.
    pub fn is_closed(&self) -> bool {
        self.reader.is_none() && self.writer.is_none()
    }

    fn release(&mut self) {
        self.reader = None;
        self.writer = None;
    }
}

impl ConnectionInfo for TcpConnection {
    fn observed_addrs(&self) -> Vec<Multiaddr> {
        vec![self.observed.clone()]
    }

    fn peer_info(&self) -> Result<PeerInfo, TcpError> {
        self.peer_info
            .lock()
            .clone()
            .ok_or(TcpError::NotAvailable("peer info"))
    }

    fn set_peer_info(&self, info: PeerInfo) {
        *self.peer_info.lock() = Some(info);
    }
}

impl Stream for TcpConnection {
    type Item = Result<Bytes, TcpError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        let Some(reader) = this.reader.as_mut() else {
            return Poll::Ready(None);
        };

        let mut buf = ReadBuf::new(&mut this.scratch);
        match Pin::new(reader).poll_read(cx, &mut buf) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(())) if buf.filled().is_empty() => {
                trace!(remote = %this.observed, "remote closed its write side");
                this.reader = None;
                Poll::Ready(None)
            }
            Poll::Ready(Ok(())) => {
                let chunk = Bytes::copy_from_slice(buf.filled());
                trace!(remote = %this.observed, len = chunk.len(), "received");
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Err(err)) => {
                debug!(remote = %this.observed, %err, "read failed, closing connection");
                this.release();
                Poll::Ready(Some(Err(TcpError::Stream(err))))
            }
        }
    }
}

impl fmt::Debug for TcpConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpConnection")
            .field("local_addr", &self.local_addr)
            .field("remote_addr", &self.remote_addr)
            .field("observed", &self.observed)
            .field("direction", &self.direction)
            .field("closed", &self.is_closed())
            .finish()
    }
}
