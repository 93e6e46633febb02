use std::sync::Arc;

use crate::analysis::orchestrator::AnalysisDeps;
use crate::analysis::throttle::RequestThrottle;
use crate::config::Config;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    /// Per-user sliding-window limiter guarding the remote model service.
    pub throttle: Arc<RequestThrottle>,
    /// Injected collaborators of the analysis pipeline.
    pub analysis: AnalysisDeps,
}
