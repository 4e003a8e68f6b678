//! Application state for the Actix-web server
//!
//! Wrapped in `web::Data` and shared by every handler. The pipeline is behind
//! an `Arc` so handlers can move it onto the blocking pool.

use std::sync::Arc;

/// Shared application state for Actix-web handlers
pub struct AppState {
    /// Extraction pipeline (profiles, browser launcher, stores)
    pub pipeline: Arc<crate::pipeline::Pipeline>,
    /// Application configuration
    pub config: crate::config::Config,
}
