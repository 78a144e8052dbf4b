//! TCP transport for multiaddr-addressed peers.
//!
//! This crate turns `/ip4|ip6/<host>/tcp/<port>[/p2p/<id>]` multiaddrs into
//! listening sockets and outbound connections:
//!
//! - **Filtering**: decide which multiaddrs this transport can handle
//! - **Codec**: convert between multiaddrs and socket addresses
//! - **Interfaces**: expand `0.0.0.0` into one dialable address per interface
//! - **Listening / Dialing**: asynchronous bind, accept and connect
//!
//! Security, multiplexing and peer verification belong to the layers above.
//! The identity tuple is carried through untouched so those layers can check it.
//!
//! # Listener Lifecycle
//!
//! ```text
//! listen(addr) ──> validate ──> bind (background) ──> accept loop
//!                     │               │                    │
//!                     ▼               ▼                    ▼
//!              InvalidAddress   Bind error item     TcpConnection items
//! ```

#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

pub mod codec;
mod config;
mod connection;
mod dialer;
mod error;
pub mod filter;
pub mod interfaces;
mod listener;
mod metrics;
mod transport;

pub use codec::IdentitySuffix;
pub use config::{
    ConfigError, DEFAULT_ACCEPT_QUEUE, DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_LISTEN_BACKLOG,
    DEFAULT_READ_CHUNK_SIZE, TcpConfig,
};
pub use connection::{ConnectionDirection, ConnectionInfo, PeerInfo, TcpConnection};
pub use error::TcpError;
pub use interfaces::{InterfaceExpander, InterfaceRecord, InterfaceSource, SystemInterfaces};
pub use listener::{BindObserver, ListenRequest, ListenerState, TcpListener};
pub use transport::TcpTransport;
