//! OSC request/reply plumbing for QLab.
//!
//! QLab answers every workspace message on `/reply{address}` with a JSON
//! string argument. This crate wraps that convention:
//!
//! - [`message`]: OSC message model and wire encoding (via `rosc`)
//! - [`address`]: workspace-scoped address resolution
//! - [`reply`]: parsed replies and the structured error half of a request
//! - [`transport`]: UDP and in-memory transports
//! - [`client`]: reactor-backed client with timeouts, retries and health
//!
//! ```ignore
//! let transport = UdpTransport::bind("127.0.0.1", 53000, 10).await?;
//! let client = OscClient::new(ClientConfig::new("qlab"), Box::new(transport));
//! let reply = client.request("/version", vec![]).await?;
//! ```

pub mod address;
pub mod client;
pub mod message;
pub mod reply;
pub mod retry;
pub mod transport;

pub use address::{reply_address, AddressResolver};
pub use client::{ClientConfig, ConnectionState, HealthTracker, OscClient};
pub use message::{OscArg, OscMessage};
pub use reply::{Reply, ReplyError, ReplyResult};
pub use retry::RetryConfig;
pub use transport::{LoopbackTransport, Transport, UdpTransport};
