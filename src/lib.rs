// Library interface for anime_embed_resolver
// The binary and the integration tests both drive the pipeline through here

pub mod app_state;
pub mod browser;
pub mod config;
pub mod db;
pub mod diagnostics;
pub mod embed;
pub mod episodes;
pub mod job;
pub mod metrics;
pub mod models;
pub mod pipeline;
pub mod retry;
pub mod site_registry;
pub mod snapshot;
pub mod store;
pub mod strategy;
