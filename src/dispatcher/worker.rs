use super::{JobHandle, JobRequest, JobStatus, QueuedJob, Shared};
use crate::Result;
use async_channel::Receiver;
use chrono::Utc;
use quarry_core::{QueryData, QueryResult};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinError;
use tracing::{debug, error, info, instrument, warn};

/// One task pulling jobs off the shared queue.
pub(crate) struct Worker {
    id: usize,
    rx: Receiver<QueuedJob>,
    shared: Arc<Shared>,
}

impl Worker {
    pub(crate) fn new(id: usize, rx: Receiver<QueuedJob>, shared: Arc<Shared>) -> Self {
        Self { id, rx, shared }
    }

    pub(crate) async fn run(self) {
        debug!(worker = self.id, "worker started");
        loop {
            tokio::select! {
                _ = self.shared.shutdown.cancelled() => {
                    break;
                }

                message = self.rx.recv() => match message {
                    Ok(queued) => self.process(queued).await,
                    // queue closed
                    Err(_) => break,
                }
            }
        }
        debug!(worker = self.id, "worker stopped");
    }

    #[instrument(skip_all, fields(worker = self.id, job_id = %queued.id))]
    async fn process(&self, queued: QueuedJob) {
        // gone if it was cancelled while queued
        let Some(handle) = self.shared.active.get(&queued.id).map(|h| h.value().clone()) else {
            return;
        };
        if !handle.update(|job| job.transition(JobStatus::Running)) {
            self.shared.release(&handle);
            return;
        }

        let started = Instant::now();
        let mut execution = tokio::spawn(execute(self.shared.clone(), queued.request.clone()));
        let outcome = tokio::select! {
            _ = handle.cancel.cancelled() => {
                execution.abort();
                None
            }
            joined = &mut execution => Some(joined),
        };
        let runtime = started.elapsed();

        match outcome {
            None => {
                // cancel() already finished the job unless this was a shutdown
                self.shared.cancel_job(&handle);
                info!("job cancelled while running");
            }
            Some(Ok(Ok(data))) => self.complete(&handle, &queued.request, data, runtime),
            Some(Ok(Err(e))) => {
                let message = e.to_string();
                warn!(error = %message, "job failed");
                self.fail(&handle, message, runtime);
            }
            Some(Err(e)) => {
                let message = panic_message(e);
                error!(error = %message, "query execution aborted");
                self.fail(&handle, message, runtime);
            }
        }
        self.shared.release(&handle);
    }

    fn fail(&self, handle: &JobHandle, message: String, runtime: Duration) {
        if handle.update(|job| job.fail(message)) {
            self.shared.metrics.failed(runtime);
        }
    }

    /// Stores the result, then publishes success. Nothing is stored if the
    /// job was cancelled after the runner returned.
    fn complete(&self, handle: &JobHandle, request: &JobRequest, data: QueryData, runtime: Duration) {
        let _finish = handle.lock_finish();
        if handle.snapshot().status != JobStatus::Running {
            return;
        }

        let result = QueryResult::new(
            request.data_source.id,
            request.query_text.clone(),
            data,
            Utc::now(),
            runtime.as_secs_f64(),
        );
        let result_id = match self.shared.results.insert(result) {
            Ok(id) => id,
            Err(e) => {
                error!(error = %e, "failed to store query result");
                self.fail(handle, format!("Failed to store result: {}", e), runtime);
                return;
            }
        };

        if let Some(query_id) = request.metadata.query_id {
            if let Err(e) = self.shared.catalog.update_latest_result(query_id, result_id) {
                warn!(%query_id, error = %e, "failed to update latest result");
            }
        }

        if handle.update(|job| job.succeed(result_id)) {
            self.shared.metrics.succeeded(runtime);
            info!(%result_id, runtime_secs = runtime.as_secs_f64(), "job succeeded");
        }
    }
}

/// Runs on its own task, so a panicking runner fails only its job.
async fn execute(shared: Arc<Shared>, request: JobRequest) -> Result<QueryData> {
    let runner = shared.runners.get(&request.data_source)?;
    let data = runner
        .run_query(&request.query_text, request.user.as_ref())
        .await?;
    Ok(data)
}

fn panic_message(e: JoinError) -> String {
    if !e.is_panic() {
        return e.to_string();
    }
    let payload = e.into_panic();
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown cause".to_string());
    format!("Query runner panicked: {}", detail)
}
