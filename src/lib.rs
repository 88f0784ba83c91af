// Core modules
pub mod api;
pub mod commands;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod execution;
pub mod indicators;
pub mod models;
pub mod strategy;

// Re-export commonly used types
pub use engine::{EngineState, TradingEngine};
pub use models::*;
pub use strategy::Evaluator;

// Error handling
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
