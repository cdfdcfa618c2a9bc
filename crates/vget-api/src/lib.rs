//! HTTP surface for download job orchestration.
//!
//! Thin layer over `vget-jobs`: identity resolution, per-IP throttling of
//! the read endpoints, JSON error shaping and range-aware artifact
//! streaming. All domain decisions live in the orchestrator.

pub mod config;
pub mod delivery;
pub mod error;
pub mod handlers;
pub mod identity;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use identity::{AccountDirectory, Identity, StaticDirectory};
pub use routes::create_router;
pub use state::AppState;
