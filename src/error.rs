//! Error taxonomy for the core messaging runtime.
//!
//! Mirrors the manual-enum-plus-`From`-impl style the rest of this crate's
//! ancestry uses for network errors: no derive-macro error crate, just plain
//! enums the caller can match on.

use std::error::Error;
use std::fmt;
use std::io;

/// Missing or malformed startup configuration. Fatal - the caller should not
/// attempt to connect.
#[derive(Debug)]
pub enum ConfigError {
    MissingCredential(&'static str),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingCredential(var) => {
                write!(f, "missing required environment variable: {}", var)
            }
        }
    }
}

impl Error for ConfigError {}

/// Raised by the transport adapter during connect/handshake or a fatal write.
#[derive(Debug)]
pub enum TransportError {
    Handshake(String),
    Io(io::ErrorKind),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Handshake(msg) => write!(f, "websocket handshake failed: {}", msg),
            TransportError::Io(kind) => write!(f, "transport io error: {:?}", kind),
        }
    }
}

impl Error for TransportError {}

impl From<io::Error> for TransportError {
    fn from(e: io::Error) -> Self {
        TransportError::Io(e.kind())
    }
}

/// Server-reported RPC error, delivered to the registered error continuation.
#[derive(Debug, Clone)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rpc error {}: {}", self.code, self.message)
    }
}

impl Error for RpcError {}
