//! Server connectivity for the Attractap terminal.
//!
//! # Components
//!
//! - [`Transport`]: frame channel the session talks through
//! - [`WsTransport`]: WebSocket, with TLS pinned to the selected trust anchor
//!   on secure endpoints
//! - [`TcpTransport`]: [`FrameCodec`](attractap_protocol::FrameCodec) over TCP,
//!   for a local development bridge
//! - [`CertificateSelector`]: adaptive trust anchor fallback with persisted
//!   memory, used for secure endpoints
//! - [`mock`]: in-memory transport with a scriptable server side
//!
//! # Example
//!
//! ```no_run
//! use attractap_core::ServerConfig;
//! use attractap_network::{Transport, TransportConfig, WsTransport, WsTransportConfig};
//!
//! # async fn example() -> attractap_network::Result<()> {
//! let mut transport = WsTransport::new(WsTransportConfig::default());
//! transport
//!     .connect(&TransportConfig::new(ServerConfig::new("127.0.0.1", 3000)))
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod certs;
pub mod error;
pub mod mock;
mod tcp;
pub mod transport;
mod ws;

pub use certs::{CertificateBundle, CertificateCandidate, CertificateSelector};
pub use error::{NetworkError, Result};
pub use tcp::{TcpTransport, TcpTransportConfig};
pub use transport::{Transport, TransportConfig};
pub use ws::{WsTransport, WsTransportConfig, client_config};
