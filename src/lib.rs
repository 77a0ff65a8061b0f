// Core modules
pub mod api;
pub mod config;
pub mod execution;
pub mod indicators;
pub mod models;
pub mod persistence;
pub mod regime;
pub mod reporting;
pub mod server;
pub mod strategy;

// Re-export commonly used types
pub use api::{Exchange, ExchangeError};
pub use models::*;
pub use strategy::Strategy;

// Error handling
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
