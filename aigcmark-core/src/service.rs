//! Async facade over the blocking engine.
//!
//! Wavelet transforms over full-resolution channels are CPU-bound, so every
//! call runs on tokio's blocking pool and never stalls the async workers.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, warn};

use crate::engine::{EmbedOutcome, EmbedRequest, WatermarkEngine};
use crate::error::{Result, WatermarkError};
use crate::recovery::RecoveryResult;
use crate::redundancy::RedundancyWriter;

const RUNNING: u8 = 0;
const FINISHED: u8 = 1;
const ABANDONED: u8 = 2;

fn task_failed(err: JoinError) -> WatermarkError {
    WatermarkError::TaskFailed(err.to_string())
}

/// Cloneable handle running engine calls on the blocking pool.
#[derive(Clone)]
pub struct WatermarkService {
    engine: Arc<WatermarkEngine>,
    timeout: Option<Duration>,
}

impl WatermarkService {
    pub fn new(engine: WatermarkEngine) -> Self {
        Self::from_arc(Arc::new(engine))
    }

    pub fn from_arc(engine: Arc<WatermarkEngine>) -> Self {
        Self {
            engine,
            timeout: None,
        }
    }

    /// Bound every call by `limit`; an elapsed call fails with
    /// [`WatermarkError::Timeout`].
    pub fn with_timeout(mut self, limit: Duration) -> Self {
        self.timeout = Some(limit);
        self
    }

    pub fn engine(&self) -> &WatermarkEngine {
        &self.engine
    }

    /// Embed on the blocking pool.
    ///
    /// The output path is assigned up front. When the deadline elapses the
    /// worker keeps running, and once it finishes everything it wrote is
    /// removed: side-file, backup record, display copies and the output.
    pub async fn embed(&self, request: EmbedRequest) -> Result<EmbedOutcome> {
        let request = self.engine.plan_output(request);
        let state = Arc::new(AtomicU8::new(RUNNING));

        let engine = Arc::clone(&self.engine);
        let worker_state = Arc::clone(&state);
        let mut handle = tokio::task::spawn_blocking(move || {
            let outcome = engine.embed(&request);
            let abandoned = worker_state
                .compare_exchange(RUNNING, FINISHED, Ordering::SeqCst, Ordering::SeqCst)
                .is_err();
            if abandoned {
                if let Ok(outcome) = &outcome {
                    debug!(output = %outcome.output_path.display(), "Discarding late embed output");
                    RedundancyWriter::new(engine.config())
                        .discard(&outcome.metadata, &outcome.output_path);
                }
            }
            outcome
        });

        let Some(limit) = self.timeout else {
            return handle.await.map_err(task_failed)?;
        };

        match tokio::time::timeout(limit, &mut handle).await {
            Ok(joined) => joined.map_err(task_failed)?,
            Err(_) => {
                let abandoned = state
                    .compare_exchange(RUNNING, ABANDONED, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok();
                if abandoned {
                    warn!(secs = limit.as_secs(), "Embed timed out, output will be discarded");
                    return Err(WatermarkError::Timeout {
                        secs: limit.as_secs(),
                    });
                }
                // The worker finished right at the deadline.
                handle.await.map_err(task_failed)?
            }
        }
    }

    /// Recover on the blocking pool.
    pub async fn recover(&self, suspect: impl Into<PathBuf>) -> Result<RecoveryResult> {
        let suspect = suspect.into();
        let engine = Arc::clone(&self.engine);
        let handle = tokio::task::spawn_blocking(move || engine.recover(&suspect));
        self.bounded(handle).await
    }

    /// Recover several images concurrently. Results keep the input order.
    pub async fn recover_many(
        &self,
        suspects: Vec<PathBuf>,
    ) -> Vec<(PathBuf, Result<RecoveryResult>)> {
        let tasks: Vec<_> = suspects
            .into_iter()
            .map(|path| {
                let service = self.clone();
                let target = path.clone();
                (path, tokio::spawn(async move { service.recover(target).await }))
            })
            .collect();

        let mut results = Vec::with_capacity(tasks.len());
        for (path, task) in tasks {
            let result = match task.await {
                Ok(result) => result,
                Err(e) => Err(task_failed(e)),
            };
            debug!(path = %path.display(), ok = result.is_ok(), "Recovery task joined");
            results.push((path, result));
        }
        results
    }

    async fn bounded<T>(&self, handle: JoinHandle<T>) -> Result<T> {
        match self.timeout {
            None => handle.await.map_err(task_failed),
            Some(limit) => match tokio::time::timeout(limit, handle).await {
                Ok(joined) => joined.map_err(task_failed),
                Err(_) => {
                    warn!(secs = limit.as_secs(), "Recovery timed out");
                    Err(WatermarkError::Timeout {
                        secs: limit.as_secs(),
                    })
                }
            },
        }
    }
}
