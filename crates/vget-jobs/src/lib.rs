//! Job store and download orchestration.
//!
//! The orchestrator turns validated info/download/subtitle requests into
//! tracked asynchronous jobs: rate limit and tier gate first, cache lookup
//! next, then a `pending` record and a spawned extractor task. Callers poll
//! through [`Orchestrator::status`]; a watchdog force-fails stuck jobs.

pub mod history;
pub mod orchestrator;
pub mod store;
pub mod validate;
pub mod watchdog;

pub use history::{HistoryRecorder, LogHistory};
pub use orchestrator::{
    Caller, CancelError, DownloadRequest, Orchestrator, OrchestratorConfig, Submission,
    SubmitError,
};
pub use store::{JobStore, JobUpdate, StoreConfig, StoreError, StoreSweeper, UpdateOutcome};
pub use watchdog::Watchdog;
