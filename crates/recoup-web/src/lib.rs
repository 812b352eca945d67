//! HTTP interface for Recoup.
//!
//! Exposes each pipeline stage as a `POST` endpoint that runs the stage
//! (and, by default, the stages after it) and answers with the nested
//! outcome tree, plus read-only endpoints for health, run records and the
//! outreach error sink.

pub mod api;
pub mod server;
pub mod state;

pub use server::WebServer;
pub use state::AppState;

use serde::{Deserialize, Serialize};

/// Web server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    /// The address to bind the HTTP server to.
    pub bind_addr: String,
    /// The port to listen on.
    pub port: u16,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1".into(),
            port: 3000,
        }
    }
}
