//! Concurrent messaging core for a Deribit JSON-RPC/WebSocket client.
//!
//! The crate wires a fixed set of OS threads - receiver, sender, dispatcher -
//! around lock-free-style queues and a rate-limited outbound path, and
//! exposes [`client::ClientFacade`] as the single entry point applications
//! drive. [`historical`] builds a paginated bulk-fetch protocol on top of the
//! facade's public RPC surface.

pub mod candle;
pub mod client;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod historical;
pub mod logging;
pub mod queue;
pub mod ratelimit;
pub mod receiver;
pub mod sender;
pub mod transport;

pub use candle::Candle;
pub use client::ClientFacade;
pub use config::Config;
pub use dispatcher::{Classification, ParsedMessage};
pub use error::{ConfigError, RpcError, TransportError};
pub use historical::fetch_n;
pub use transport::{Transport, WsTransport};
