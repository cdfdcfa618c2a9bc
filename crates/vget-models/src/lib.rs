//! Shared data models for the vget backend.
//!
//! This crate holds the types every other crate agrees on: entitlement
//! tiers and their policy table, resolution ranks and format metadata,
//! job records and views, and the stable error-kind vocabulary.

pub mod error;
pub mod format;
pub mod job;
pub mod tier;

pub use error::{ErrorKind, JobError};
pub use format::{FormatInfo, MediaInfo, ResolutionRank, SubtitleTrack};
pub use job::{Job, JobId, JobKind, JobOutput, JobState, JobView};
pub use tier::{Tier, TierLimits};
