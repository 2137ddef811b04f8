//! Bounded worker pool for async callers

use crate::{orchestrator, OpenMode, OpenRequest, OpenerConfig, Result, ZfileError};
use std::fs::File;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Runs opens on tokio's blocking pool, at most `workers` at a time.
///
/// Each open occupies one worker from fork through descriptor receipt; the
/// fork sequence itself is still serialized process-wide.
#[derive(Debug, Clone)]
pub struct ZoneOpener {
    config: Arc<OpenerConfig>,
    permits: Arc<Semaphore>,
}

impl ZoneOpener {
    #[must_use]
    pub fn new(config: OpenerConfig) -> Self {
        let workers = config.workers.max(1);
        Self {
            config: Arc::new(config),
            permits: Arc::new(Semaphore::new(workers)),
        }
    }

    #[must_use]
    pub fn config(&self) -> &OpenerConfig {
        &self.config
    }

    /// Open a validated request on a pool worker.
    pub async fn open(&self, request: OpenRequest) -> Result<File> {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|e| ZfileError::WorkerLost(e.to_string()))?;
        let config = Arc::clone(&self.config);

        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            orchestrator::open_with_config(&request, &config)
        })
        .await
        .map_err(|e| ZfileError::WorkerLost(e.to_string()))?
    }

    /// Validate and open in one step.
    pub async fn open_path(&self, namespace: &str, path: &str, mode: OpenMode) -> Result<File> {
        let request = OpenRequest::new(namespace, path, mode)?;
        self.open(request).await
    }

    /// Open on the calling thread, bypassing the pool.
    pub fn open_blocking(&self, request: &OpenRequest) -> Result<File> {
        orchestrator::open_with_config(request, &self.config)
    }

    /// Get pool status
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let total = self.config.workers.max(1);
        PoolStatus {
            total,
            busy: total.saturating_sub(self.permits.available_permits()),
        }
    }
}

/// Status of the worker pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    pub total: usize,
    pub busy: usize,
}
