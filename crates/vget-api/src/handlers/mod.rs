//! Request handlers.

pub mod health;
pub mod jobs;
pub mod sites;
pub mod submit;

pub use health::{health, ready};
