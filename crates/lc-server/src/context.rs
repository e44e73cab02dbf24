//! Application context.
//!
//! [`AppContext`] is the struct shared across all route handlers via Axum
//! state. Everything in it is immutable after startup except the admission
//! gate's semaphore.

use std::path::PathBuf;
use std::sync::Arc;

use lc_core::config::Config;
use lc_core::FormatRegistry;
use lc_engine::{ConversionWorker, EngineLocator};

use crate::admission::AdmissionGate;
use crate::middleware::auth::BearerAuth;

/// Application context shared by all request handlers (via Axum state).
///
/// This is cheaply cloneable because it only holds `Arc`s.
#[derive(Clone)]
pub struct AppContext {
    /// Immutable application configuration snapshot.
    pub config: Arc<Config>,
    pub formats: Arc<FormatRegistry>,
    pub gate: AdmissionGate,
    pub worker: Arc<ConversionWorker>,
    pub auth: Arc<BearerAuth>,
    /// Root under which per-job scratch directories are created.
    pub scratch_root: Arc<PathBuf>,
}

impl AppContext {
    /// Build the context from configuration and an already located engine.
    pub fn new(config: Config, engine: EngineLocator) -> Self {
        let gate = AdmissionGate::new(
            config.conversion.max_concurrent,
            config.conversion.retry_after_secs,
        );
        let worker = ConversionWorker::new(engine, config.conversion.timeout());
        let auth = BearerAuth::from_config(&config.auth);
        let scratch_root = config.conversion.scratch_root();

        Self {
            config: Arc::new(config),
            formats: Arc::new(FormatRegistry::new()),
            gate,
            worker: Arc::new(worker),
            auth: Arc::new(auth),
            scratch_root: Arc::new(scratch_root),
        }
    }
}
