//! Application state.

use std::sync::Arc;

use vget_extractor::{MediaExtractor, YtDlpExtractor};
use vget_jobs::store::StoreConfig;
use vget_jobs::{JobStore, LogHistory, Orchestrator, OrchestratorConfig};
use vget_limiter::RateLimiter;

use crate::config::ApiConfig;
use crate::identity::{AccountDirectory, StaticDirectory};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub orchestrator: Arc<Orchestrator>,
    pub limiter: Arc<RateLimiter>,
    pub accounts: Arc<dyn AccountDirectory>,
}

impl AppState {
    /// Create new application state with production wiring.
    pub async fn new(config: ApiConfig) -> anyhow::Result<Self> {
        let extractor = YtDlpExtractor::detect()?;
        Ok(Self::with_parts(
            config,
            Arc::new(extractor),
            Arc::new(StaticDirectory::from_env()),
        ))
    }

    /// Assemble state from explicit collaborators. Tests use this to inject
    /// a scripted extractor and a fixed account directory.
    pub fn with_parts(
        config: ApiConfig,
        extractor: Arc<dyn MediaExtractor>,
        accounts: Arc<dyn AccountDirectory>,
    ) -> Self {
        let store = Arc::new(JobStore::new(StoreConfig::default()));
        let limiter = Arc::new(RateLimiter::new());
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::clone(&store),
            Arc::clone(&limiter),
            extractor,
            Arc::new(LogHistory),
            OrchestratorConfig::from_env(),
        ));

        Self {
            config,
            orchestrator,
            limiter,
            accounts,
        }
    }
}
