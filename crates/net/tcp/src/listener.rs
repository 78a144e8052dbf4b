//! Listening side of the transport.
//!
//! # Lifecycle
//!
//! ```text
//! Created ──> Binding ──> Listening ──> Closed
//!                │                        ▲
//!                └──── bind failure ──────┘
//! ```
//!
//! The request address is validated before anything is spawned, so an
//! invalid multiaddr fails synchronously. Binding and accepting run on a
//! background task; the bound endpoint is published once through a `watch`
//! channel and never changes afterwards. Address queries wait for that
//! publication instead of reporting the wildcard or port `0` from the request.

use std::{
    fmt, io,
    net::SocketAddr,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use futures::{Stream, future::poll_fn};
use libp2p::Multiaddr;
use parking_lot::Mutex;
use socket2::{Domain, Socket, Type};
use tokio::{
    net::{TcpListener as TokioTcpListener, TcpStream},
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{debug, trace, warn};

use crate::{
    codec::{self, IdentitySuffix},
    config::TcpConfig,
    connection::{ConnectionDirection, TcpConnection},
    error::TcpError,
    interfaces::{InterfaceExpander, InterfaceSource},
    metrics::TransportMetrics,
};

/// Callback fired with the bound endpoint, once, before it is published.
pub type BindObserver = Box<dyn FnOnce(SocketAddr) + Send + 'static>;

/// What to listen on.
pub enum ListenRequest {
    /// Listen on an address.
    Address(Multiaddr),
    /// Listen on an address and report the bound endpoint to `on_bound`.
    Observed {
        address: Multiaddr,
        on_bound: BindObserver,
    },
}

impl ListenRequest {
    pub fn with_observer<F>(address: Multiaddr, on_bound: F) -> Self
    where
        F: FnOnce(SocketAddr) + Send + 'static,
    {
        Self::Observed {
            address,
            on_bound: Box::new(on_bound),
        }
    }

    pub fn address(&self) -> &Multiaddr {
        match self {
            Self::Address(address) | Self::Observed { address, .. } => address,
        }
    }

    fn into_parts(self) -> (Multiaddr, Option<BindObserver>) {
        match self {
            Self::Address(address) => (address, None),
            Self::Observed { address, on_bound } => (address, Some(on_bound)),
        }
    }
}

impl From<Multiaddr> for ListenRequest {
    fn from(address: Multiaddr) -> Self {
        Self::Address(address)
    }
}

impl fmt::Debug for ListenRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenRequest")
            .field("address", self.address())
            .field("observed", &matches!(self, Self::Observed { .. }))
            .finish()
    }
}

/// Lifecycle state of a [`TcpListener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Created,
    Binding,
    Listening,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Published {
    Pending,
    Bound(SocketAddr),
    Unbound,
}

/// State shared between the listener handle and its accept task.
///
/// The listening socket lives here rather than in the task so that closing
/// the listener releases the port before `close` returns.
struct Shared {
    state: Mutex<ListenerState>,
    socket: Mutex<Option<TokioTcpListener>>,
    published: watch::Sender<Published>,
    metrics: TransportMetrics,
}

impl Shared {
    fn begin_binding(&self) -> bool {
        let mut state = self.state.lock();
        if *state != ListenerState::Created {
            return false;
        }
        *state = ListenerState::Binding;
        true
    }

    /// Hand over the bound socket and publish its endpoint. Returns `false`
    /// (dropping the socket) if the listener was closed in the meantime.
    fn publish(&self, listener: TokioTcpListener, local: SocketAddr) -> bool {
        let mut state = self.state.lock();
        if *state != ListenerState::Binding {
            return false;
        }
        *state = ListenerState::Listening;
        *self.socket.lock() = Some(listener);
        self.published.send_replace(Published::Bound(local));
        self.metrics.listener_bound();
        true
    }

    fn close(&self) {
        let mut state = self.state.lock();
        match *state {
            ListenerState::Closed => return,
            ListenerState::Listening => self.metrics.listener_closed(),
            ListenerState::Created | ListenerState::Binding => {
                self.published.send_replace(Published::Unbound);
            }
        }
        *state = ListenerState::Closed;
        drop(self.socket.lock().take());
    }

    /// Poll the listening socket; `None` once it has been released.
    fn poll_accept(
        &self,
        cx: &mut Context<'_>,
    ) -> Poll<Option<io::Result<(TcpStream, SocketAddr)>>> {
        match self.socket.lock().as_ref() {
            Some(listener) => listener.poll_accept(cx).map(Some),
            None => Poll::Ready(None),
        }
    }
}

/// A TCP listener addressed by multiaddr.
///
/// Accepted connections are read with [`accept`](Self::accept) or by polling
/// the listener as a [`Stream`]. A bind failure or fatal accept error is
/// delivered as the last item. Closing the listener does not touch
/// connections that were already accepted.
pub struct TcpListener {
    request: Multiaddr,
    identity: Option<IdentitySuffix>,
    shared: Arc<Shared>,
    published: watch::Receiver<Published>,
    incoming: mpsc::Receiver<Result<TcpConnection, TcpError>>,
    task: JoinHandle<()>,
    expander: InterfaceExpander<Arc<dyn InterfaceSource>>,
}

impl TcpListener {
    /// Validate `request` and start binding in the background.
    ///
    /// Must be called within a tokio runtime.
    pub(crate) fn spawn(
        request: ListenRequest,
        config: &TcpConfig,
        interfaces: Arc<dyn InterfaceSource>,
        metrics: TransportMetrics,
    ) -> Result<Self, TcpError> {
        let (address, on_bound) = request.into_parts();
        let (socket_addr, identity) = codec::to_socket_addr(&address)?;

        let (published_tx, published_rx) = watch::channel(Published::Pending);
        let (incoming_tx, incoming_rx) = mpsc::channel(config.accept_queue.max(1));
        let shared = Arc::new(Shared {
            state: Mutex::new(ListenerState::Created),
            socket: Mutex::new(None),
            published: published_tx,
            metrics,
        });

        let task = tokio::spawn(
            AcceptLoop {
                shared: shared.clone(),
                request: address.clone(),
                identity,
                backlog: config.listen_backlog,
                nodelay: config.nodelay,
                read_chunk_size: config.read_chunk_size,
                incoming: incoming_tx,
            }
            .run(socket_addr, on_bound),
        );

        debug!(request = %address, %socket_addr, "listener created");

        Ok(Self {
            request: address,
            identity,
            shared,
            published: published_rx,
            incoming: incoming_rx,
            task,
            expander: InterfaceExpander::new(interfaces),
        })
    }

    /// The multiaddr this listener was asked to listen on.
    pub fn request(&self) -> &Multiaddr {
        &self.request
    }

    pub fn state(&self) -> ListenerState {
        *self.shared.state.lock()
    }

    /// The bound endpoint, if binding already finished.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match *self.published.borrow() {
            Published::Bound(addr) => Some(addr),
            Published::Pending | Published::Unbound => None,
        }
    }

    /// Dialable addresses of this listener.
    ///
    /// Waits for binding to finish. The port is the one actually bound, a
    /// `0.0.0.0` host is expanded to one address per local IPv4 interface and
    /// the request's identity suffix is kept. Fails with
    /// [`TcpError::ListenerClosed`] if the listener never bound.
    pub async fn get_addrs(&self) -> Result<Vec<Multiaddr>, TcpError> {
        let bound = self.wait_bound().await?;
        Ok(self.expander.expand(bound, &self.request))
    }

    /// The bound endpoint as a multiaddr, without interface expansion.
    pub async fn get_observed_addrs(&self) -> Result<Vec<Multiaddr>, TcpError> {
        let bound = self.wait_bound().await?;
        Ok(vec![codec::from_socket_addr(bound, self.identity.as_ref())])
    }

    /// Next accepted connection.
    ///
    /// Fails with [`TcpError::ListenerClosed`] once the listener is closed and
    /// every buffered connection has been taken.
    pub async fn accept(&mut self) -> Result<TcpConnection, TcpError> {
        self.incoming.recv().await.unwrap_or(Err(TcpError::ListenerClosed))
    }

    /// Stop accepting and release the listening socket.
    ///
    /// The port is free again when this returns. Closing an already closed
    /// listener does nothing.
    pub fn close(&self) {
        if self.state() == ListenerState::Closed {
            return;
        }
        self.task.abort();
        self.shared.close();
        debug!(request = %self.request, "listener closed");
    }

    async fn wait_bound(&self) -> Result<SocketAddr, TcpError> {
        let mut published = self.published.clone();
        let outcome = *published
            .wait_for(|p| *p != Published::Pending)
            .await
            .map_err(|_| TcpError::ListenerClosed)?;

        match outcome {
            Published::Bound(addr) => Ok(addr),
            Published::Pending | Published::Unbound => Err(TcpError::ListenerClosed),
        }
    }
}

impl Stream for TcpListener {
    type Item = Result<TcpConnection, TcpError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.incoming.poll_recv(cx)
    }
}

impl Drop for TcpListener {
    fn drop(&mut self) {
        self.task.abort();
        self.shared.close();
    }
}

impl fmt::Debug for TcpListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TcpListener")
            .field("request", &self.request)
            .field("state", &self.state())
            .field("local_addr", &self.local_addr())
            .finish()
    }
}

/// Background task owning the OS listening socket.
struct AcceptLoop {
    shared: Arc<Shared>,
    request: Multiaddr,
    identity: Option<IdentitySuffix>,
    backlog: u32,
    nodelay: bool,
    read_chunk_size: usize,
    incoming: mpsc::Sender<Result<TcpConnection, TcpError>>,
}

impl AcceptLoop {
    async fn run(self, socket_addr: SocketAddr, on_bound: Option<BindObserver>) {
        if !self.shared.begin_binding() {
            return;
        }

        let bound = bind(socket_addr, self.backlog).and_then(|listener| {
            let local = listener.local_addr()?;
            Ok((listener, local))
        });
        let (listener, local) = match bound {
            Ok(bound) => bound,
            Err(source) => {
                warn!(request = %self.request, %socket_addr, %source, "bind failed");
                self.shared.close();
                let _ = self
                    .incoming
                    .send(Err(TcpError::Bind {
                        addr: socket_addr,
                        source,
                    }))
                    .await;
                return;
            }
        };

        if let Some(on_bound) = on_bound {
            on_bound(local);
        }
        if !self.shared.publish(listener, local) {
            return;
        }
        debug!(request = %self.request, %local, "listening");

        self.accept_loop().await;
        self.shared.close();
    }

    async fn accept_loop(&self) {
        loop {
            let accepted = tokio::select! {
                _ = self.incoming.closed() => {
                    trace!(request = %self.request, "listener handle dropped");
                    return;
                }
                accepted = poll_fn(|cx| self.shared.poll_accept(cx)) => accepted,
            };
            let Some(accepted) = accepted else {
                trace!(request = %self.request, "listening socket released");
                return;
            };

            match accepted {
                Ok((stream, remote)) => {
                    let Some(conn) = self.wrap(stream, remote) else {
                        continue;
                    };
                    self.shared.metrics.connection_accepted();
                    if self.incoming.send(Ok(conn)).await.is_err() {
                        return;
                    }
                }
                Err(err) if is_transient_accept_error(&err) => {
                    debug!(request = %self.request, %err, "transient accept error");
                }
                Err(err) => {
                    warn!(request = %self.request, %err, "accept failed, closing listener");
                    let _ = self.incoming.send(Err(TcpError::Stream(err))).await;
                    return;
                }
            }
        }
    }

    fn wrap(&self, stream: TcpStream, remote: SocketAddr) -> Option<TcpConnection> {
        let local = match stream.local_addr() {
            Ok(local) => local,
            Err(err) => {
                debug!(%remote, %err, "dropping accepted socket without local address");
                return None;
            }
        };
        if let Err(err) = stream.set_nodelay(self.nodelay) {
            debug!(%remote, %err, "failed to set TCP_NODELAY");
        }

        let observed = codec::from_socket_addr(remote, self.identity.as_ref());
        debug!(%observed, %local, "accepted connection");

        Some(TcpConnection::new(
            stream,
            local,
            remote,
            observed,
            ConnectionDirection::Inbound,
            self.read_chunk_size,
        ))
    }
}

/// Create, bind and listen on a non-blocking socket.
///
/// An IPv6 wildcard bind is dual-stack so IPv4 peers can reach it; any other
/// IPv6 bind is IPv6-only.
fn bind(addr: SocketAddr, backlog: u32) -> io::Result<TokioTcpListener> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };
    let socket = Socket::new(domain, Type::STREAM, Some(socket2::Protocol::TCP))?;
    if addr.is_ipv6() {
        socket.set_only_v6(!addr.ip().is_unspecified())?;
    }
    #[cfg(unix)]
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(i32::try_from(backlog).unwrap_or(i32::MAX))?;

    TokioTcpListener::from_std(socket.into())
}

fn is_transient_accept_error(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interfaces::SystemInterfaces;
    use assert_matches::assert_matches;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn spawn(request: impl Into<ListenRequest>) -> Result<TcpListener, TcpError> {
        TcpListener::spawn(
            request.into(),
            &TcpConfig::default(),
            Arc::new(SystemInterfaces),
            TransportMetrics::default(),
        )
    }

    fn ma(s: &str) -> Multiaddr {
        s.parse().unwrap()
    }

    #[tokio::test]
    async fn test_invalid_address_fails_synchronously() {
        assert_matches!(
            spawn(ma("/ip4/127.0.0.1/udp/9090")),
            Err(TcpError::InvalidAddress { .. })
        );
    }

    #[tokio::test]
    async fn test_state_reaches_listening() {
        let listener = spawn(ma("/ip4/127.0.0.1/tcp/0")).unwrap();
        listener.get_addrs().await.unwrap();
        assert_eq!(listener.state(), ListenerState::Listening);
        assert!(listener.local_addr().is_some());
    }

    #[tokio::test]
    async fn test_observer_fires_once_before_publication() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(None));

        let request = {
            let calls = calls.clone();
            let seen = seen.clone();
            ListenRequest::with_observer(ma("/ip4/127.0.0.1/tcp/0"), move |addr| {
                calls.fetch_add(1, Ordering::SeqCst);
                *seen.lock() = Some(addr);
            })
        };
        let listener = spawn(request).unwrap();
        let addrs = listener.get_observed_addrs().await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let bound = seen.lock().take().unwrap();
        assert_ne!(bound.port(), 0);
        assert_eq!(addrs, vec![codec::from_socket_addr(bound, None)]);
    }

    #[tokio::test]
    async fn test_bind_error_closes_listener() {
        let first = spawn(ma("/ip4/127.0.0.1/tcp/0")).unwrap();
        let taken = first.get_observed_addrs().await.unwrap().remove(0);

        let mut second = spawn(taken).unwrap();
        assert_matches!(second.accept().await, Err(TcpError::Bind { .. }));
        assert_eq!(second.state(), ListenerState::Closed);
        assert_matches!(second.get_addrs().await, Err(TcpError::ListenerClosed));
        assert_matches!(second.accept().await, Err(TcpError::ListenerClosed));
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_keeps_endpoint() {
        let mut listener = spawn(ma("/ip4/127.0.0.1/tcp/0")).unwrap();
        let addrs = listener.get_addrs().await.unwrap();

        listener.close();
        listener.close();

        assert_eq!(listener.state(), ListenerState::Closed);
        assert_eq!(listener.get_addrs().await.unwrap(), addrs);
        assert_matches!(listener.accept().await, Err(TcpError::ListenerClosed));
    }

    #[tokio::test]
    async fn test_close_before_bound_unblocks_queries() {
        let listener = spawn(ma("/ip4/127.0.0.1/tcp/0")).unwrap();
        listener.close();
        // Either the bind raced ahead of the close or the query fails; it never hangs.
        let _ = listener.get_addrs().await;
        assert_eq!(listener.state(), ListenerState::Closed);
    }

    #[test]
    fn test_transient_accept_errors() {
        assert!(is_transient_accept_error(&io::Error::from(
            io::ErrorKind::ConnectionAborted
        )));
        assert!(!is_transient_accept_error(&io::Error::other("emfile")));
    }
}
