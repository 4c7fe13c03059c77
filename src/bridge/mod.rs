//! Remote execution bridge.
//!
//! When remote settings are configured, facade calls made outside a
//! transaction are shipped to a backend process instead of a local connection.
//! [`protocol`] defines the frames, [`transport`] moves them, [`client`] is what
//! the facade calls and [`server`] answers on the backend side.

pub mod client;
pub mod protocol;
pub mod server;
pub mod transport;

pub use client::RemoteExecutionBridge;
pub use protocol::{ProtocolError, RemoteResponse};
pub use server::BackendServer;
pub use transport::{BlockingTransport, TokioTransport, Transport, TransportError};
