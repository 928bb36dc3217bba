//! Startup configuration: credentials and endpoint selection.
//!
//! Credential loading from the environment is named an external collaborator
//! in the core's scope, but the contract - which variables, and that absence
//! is a fatal configuration error - is part of the core's surface.

use crate::error::ConfigError;
use std::env;

pub const PROD_HOST: &str = "www.deribit.com";
pub const TESTNET_HOST: &str = "test.deribit.com";
pub const WS_PATH: &str = "/ws/api/v2";

/// Startup configuration for the client facade.
#[derive(Debug, Clone)]
pub struct Config {
    pub client_id: String,
    pub client_secret: String,
    pub testnet: bool,
}

impl Config {
    /// Reads `DERIBIT_CLIENT_ID` and `DERIBIT_CLIENT_SECRET`, both required.
    /// `DERIBIT_TESTNET` is optional and defaults to `false`.
    pub fn from_env() -> Result<Config, ConfigError> {
        let client_id =
            env::var("DERIBIT_CLIENT_ID").map_err(|_| ConfigError::MissingCredential("DERIBIT_CLIENT_ID"))?;
        let client_secret = env::var("DERIBIT_CLIENT_SECRET")
            .map_err(|_| ConfigError::MissingCredential("DERIBIT_CLIENT_SECRET"))?;
        let testnet = env::var("DERIBIT_TESTNET")
            .map(|v| matches!(v.as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Ok(Config { client_id, client_secret, testnet })
    }

    /// The WebSocket host to dial for this configuration.
    pub fn host(&self) -> &'static str {
        if self.testnet {
            TESTNET_HOST
        } else {
            PROD_HOST
        }
    }

    /// Full `wss://` connection URL.
    pub fn ws_url(&self) -> String {
        format!("wss://{}{}", self.host(), WS_PATH)
    }
}
