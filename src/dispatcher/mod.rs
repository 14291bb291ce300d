//! Asynchronous job execution with request deduplication.
//!
//! Jobs are keyed by the fingerprint of their effective query text. While a
//! job for a fingerprint is queued or running, further requests for the same
//! fingerprint get that job back instead of a new one. Workers pull from one
//! bounded queue; finished jobs stay fetchable for `job_ttl_secs`.

mod job;
mod metrics;
mod worker;

pub use job::{Job, JobMetadata, JobRequest, JobStatus};
pub use metrics::MetricsSnapshot;

use crate::config::DispatcherConfig;
use crate::runners::RunnerPool;
use crate::store::{QueryCatalog, ResultStore};
use crate::{QuarryError, Result};
use async_channel::{bounded, Sender};
use dashmap::DashMap;
use metrics::DispatcherMetrics;
use moka::sync::Cache;
use quarry_core::{Fingerprint, JobId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use worker::Worker;

pub(crate) struct JobHandle {
    state: watch::Sender<Job>,
    cancel: CancellationToken,
    /// Held while a terminal transition is decided, so a result is never
    /// stored for a job that was cancelled.
    finish: Mutex<()>,
}

impl JobHandle {
    fn new(job: Job, cancel: CancellationToken) -> Self {
        let (state, _) = watch::channel(job);
        Self {
            state,
            cancel,
            finish: Mutex::new(()),
        }
    }

    pub(crate) fn snapshot(&self) -> Job {
        self.state.borrow().clone()
    }

    /// Applies `change` and notifies waiters if it reports a modification.
    pub(crate) fn update(&self, change: impl FnOnce(&mut Job) -> bool) -> bool {
        self.state.send_if_modified(change)
    }

    pub(crate) fn lock_finish(&self) -> MutexGuard<'_, ()> {
        self.finish.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub(crate) struct QueuedJob {
    pub(crate) id: JobId,
    pub(crate) request: JobRequest,
}

pub(crate) struct Shared {
    pub(crate) active: DashMap<JobId, Arc<JobHandle>>,
    pub(crate) finished: Cache<JobId, Job>,
    in_flight: Mutex<HashMap<Fingerprint, JobId>>,
    pub(crate) metrics: DispatcherMetrics,
    pub(crate) results: Arc<dyn ResultStore>,
    pub(crate) catalog: Arc<dyn QueryCatalog>,
    pub(crate) runners: Arc<RunnerPool>,
    pub(crate) shutdown: CancellationToken,
}

impl Shared {
    fn lock_in_flight(&self) -> MutexGuard<'_, HashMap<Fingerprint, JobId>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Moves a job to `cancelled` unless it already finished, and stops its
    /// runner. Returns whether the job changed.
    pub(crate) fn cancel_job(&self, handle: &JobHandle) -> bool {
        let _finish = handle.lock_finish();
        let changed = handle.update(|job| job.transition(JobStatus::Cancelled));
        handle.cancel.cancel();
        if changed {
            self.metrics.cancelled();
        }
        changed
    }

    /// Frees the fingerprint and retires a terminal job into the finished
    /// cache. Idempotent.
    pub(crate) fn release(&self, handle: &JobHandle) {
        let job = handle.snapshot();
        {
            let mut in_flight = self.lock_in_flight();
            if in_flight.get(&job.fingerprint) == Some(&job.id) {
                in_flight.remove(&job.fingerprint);
            }
        }
        if self.active.contains_key(&job.id) {
            let id = job.id;
            self.finished.insert(id, job);
            self.active.remove(&id);
        }
    }
}

/// Retires a registered job whose queue send never completed.
struct PendingSend<'a> {
    shared: &'a Shared,
    handle: &'a JobHandle,
    sent: bool,
}

impl Drop for PendingSend<'_> {
    fn drop(&mut self) {
        if self.sent {
            return;
        }
        if self.shared.cancel_job(self.handle) {
            debug!(job_id = %self.handle.snapshot().id, "enqueue abandoned");
        }
        self.shared.release(self.handle);
    }
}

pub struct Dispatcher {
    shared: Arc<Shared>,
    queue: Sender<QueuedJob>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Spawns the worker pool on the current tokio runtime.
    pub fn start(
        config: &DispatcherConfig,
        results: Arc<dyn ResultStore>,
        catalog: Arc<dyn QueryCatalog>,
        runners: Arc<RunnerPool>,
    ) -> Result<Self> {
        config.validate()?;
        let (queue, rx) = bounded(config.queue_size);
        let shared = Arc::new(Shared {
            active: DashMap::new(),
            finished: Cache::builder().time_to_live(config.job_ttl()).build(),
            in_flight: Mutex::new(HashMap::new()),
            metrics: DispatcherMetrics::default(),
            results,
            catalog,
            runners,
            shutdown: CancellationToken::new(),
        });

        let workers = (0..config.workers)
            .map(|id| tokio::spawn(Worker::new(id, rx.clone(), shared.clone()).run()))
            .collect();
        info!(workers = config.workers, queue_size = config.queue_size, "dispatcher started");

        Ok(Self {
            shared,
            queue,
            workers: Mutex::new(workers),
        })
    }

    /// Schedules `request`, or returns the queued or running job that
    /// already covers the same fingerprint.
    pub async fn enqueue(&self, request: JobRequest) -> Result<Job> {
        let fingerprint = request.fingerprint();
        let handle = {
            let mut in_flight = self.shared.lock_in_flight();
            let existing = in_flight
                .get(&fingerprint)
                .and_then(|id| self.shared.active.get(id))
                .map(|handle| handle.snapshot());
            if let Some(job) = existing.filter(|job| !job.status.is_terminal()) {
                self.shared.metrics.deduplicated();
                debug!(job_id = %job.id, %fingerprint, "joined in-flight job");
                return Ok(job);
            }

            let job = Job::new(
                request.data_source.id,
                request.query_text.clone(),
                request.metadata.clone(),
            );
            let id = job.id;
            let handle = Arc::new(JobHandle::new(job, self.shared.shutdown.child_token()));
            self.shared.active.insert(id, handle.clone());
            in_flight.insert(fingerprint, id);
            handle
        };

        let id = handle.snapshot().id;
        // the send can wait on a full queue; if this future is dropped there,
        // the guard retires the registered job
        let mut pending = PendingSend {
            shared: &self.shared,
            handle: &handle,
            sent: false,
        };
        if self.queue.send(QueuedJob { id, request }).await.is_err() {
            return Err(QuarryError::DispatcherClosed);
        }
        pending.sent = true;
        self.shared.metrics.enqueued();
        info!(job_id = %id, "job enqueued");
        Ok(handle.snapshot())
    }

    pub fn fetch(&self, id: JobId) -> Result<Job> {
        if let Some(handle) = self.shared.active.get(&id) {
            return Ok(handle.snapshot());
        }
        self.shared
            .finished
            .get(&id)
            .ok_or(QuarryError::JobNotFound(id))
    }

    /// Cancels a queued or running job. Cancelling a finished job changes
    /// nothing and returns it as is.
    pub fn cancel(&self, id: JobId) -> Result<Job> {
        let Some(handle) = self.shared.active.get(&id).map(|h| h.value().clone()) else {
            return self.fetch(id);
        };
        if self.shared.cancel_job(&handle) {
            info!(job_id = %id, "job cancelled");
        }
        self.shared.release(&handle);
        Ok(handle.snapshot())
    }

    /// Resolves once the job reaches a terminal state.
    pub async fn wait(&self, id: JobId) -> Result<Job> {
        let Some(mut rx) = self.shared.active.get(&id).map(|h| h.state.subscribe()) else {
            return self.fetch(id);
        };
        let terminal = rx
            .wait_for(|job| job.status.is_terminal())
            .await
            .map(|job| job.clone());
        match terminal {
            Ok(job) => Ok(job),
            // sender dropped: the job was retired in the meantime
            Err(_) => self.fetch(id),
        }
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    /// Number of queued or running jobs.
    pub fn active_jobs(&self) -> usize {
        self.shared.active.len()
    }

    /// Cancels outstanding jobs and stops the workers.
    pub async fn shutdown(&self) {
        let ids: Vec<JobId> = self.shared.active.iter().map(|e| *e.key()).collect();
        for id in ids {
            let _ = self.cancel(id);
        }
        self.shared.shutdown.cancel();
        self.queue.close();

        let workers = std::mem::take(&mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner));
        for worker in workers {
            if let Err(e) = worker.await {
                error!("Failed to join dispatcher worker: {}", e);
            }
        }
        info!("dispatcher stopped");
    }
}
