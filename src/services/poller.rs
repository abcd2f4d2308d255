//! Turns a backend job handle into a terminal result by repeated status checks.
//!
//! Two entry points share one loop:
//!
//! - [`JobPoller::wait`] awaits a single job to completion.
//! - [`JobWatcher`] tracks "the current job" for a long-lived caller. Setting a
//!   new job id or detaching cancels the previous loop, and every update is
//!   applied only if its generation is still current, so a late response for
//!   job A can never overwrite state after job B was requested.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::UsageError;
use crate::models::job::{
    JobId, JobOutcome, JobPollError, JobSnapshot, JobStatus, PollableJob,
};
use crate::models::session::SessionContext;
use crate::services::backend::JobStatusSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    interval: Duration,
    max_attempts: Option<u32>,
}

impl PollSettings {
    /// `max_attempts` of `None` polls until the job is terminal or cancelled.
    pub fn new(interval: Duration, max_attempts: Option<u32>) -> Result<Self, UsageError> {
        if interval.is_zero() {
            return Err(UsageError::InvalidPollSettings("interval must be positive"));
        }
        if max_attempts == Some(0) {
            return Err(UsageError::InvalidPollSettings("max_attempts must be at least 1"));
        }
        Ok(Self {
            interval,
            max_attempts,
        })
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }
}

/// Core loop. One check at a time: the next tick is only awaited after the
/// previous check resolved.
///
/// `observe` is called with every snapshot and returns false once the caller
/// no longer wants updates, which ends the loop without a further check.
async fn poll_job<S, F>(
    source: &S,
    session: &SessionContext,
    job_id: &JobId,
    settings: PollSettings,
    cancel: &CancellationToken,
    mut observe: F,
) -> JobOutcome
where
    S: JobStatusSource + ?Sized,
    F: FnMut(&JobSnapshot) -> bool,
{
    let mut ticker = tokio::time::interval(settings.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut attempts: u32 = 0;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return JobOutcome::Failed(JobPollError::Cancelled),
            _ = ticker.tick() => {}
        }

        attempts += 1;
        metrics::counter!("job_polls_total").increment(1);

        let checked = tokio::select! {
            biased;
            _ = cancel.cancelled() => return JobOutcome::Failed(JobPollError::Cancelled),
            checked = source.job_status(session, job_id) => checked,
        };

        let (snapshot, outcome) = match checked {
            Ok(snapshot) => match snapshot.status {
                JobStatus::Completed => {
                    let data = snapshot.data.clone().unwrap_or(serde_json::Value::Null);
                    (snapshot, Some(JobOutcome::Completed(data)))
                }
                JobStatus::Failed => {
                    let reason = snapshot
                        .error
                        .clone()
                        .unwrap_or_else(|| "job failed".to_string());
                    (snapshot, Some(JobOutcome::Failed(JobPollError::JobFailed(reason))))
                }
                JobStatus::Processing | JobStatus::Idle => {
                    match settings.max_attempts {
                        Some(max) if attempts >= max => {
                            let err = JobPollError::AttemptsExhausted(attempts);
                            (JobSnapshot::failed(err.to_string()), Some(JobOutcome::Failed(err)))
                        }
                        _ => (JobSnapshot::processing(), None),
                    }
                }
            },
            Err(e) => {
                warn!(job_id = %job_id, attempt = attempts, error = %e, "Job status check failed");
                let err = JobPollError::StatusCheck(e.to_string());
                (JobSnapshot::failed(err.to_string()), Some(JobOutcome::Failed(err)))
            }
        };

        // A response that lands after cancellation is dropped on the floor.
        if cancel.is_cancelled() || !observe(&snapshot) {
            return JobOutcome::Failed(JobPollError::Cancelled);
        }

        debug!(
            job_id = %job_id,
            attempt = attempts,
            status = %snapshot.status,
            "Job status checked"
        );

        if let Some(outcome) = outcome {
            return outcome;
        }
    }
}

/// Polls jobs against a status source with fixed settings.
pub struct JobPoller<S: ?Sized> {
    source: Arc<S>,
    settings: PollSettings,
}

impl<S: ?Sized> Clone for JobPoller<S> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            settings: self.settings,
        }
    }
}

impl<S> JobPoller<S>
where
    S: JobStatusSource + ?Sized + 'static,
{
    pub fn new(source: Arc<S>, settings: PollSettings) -> Self {
        Self { source, settings }
    }

    pub fn settings(&self) -> PollSettings {
        self.settings
    }

    /// Poll `job_id` until it is terminal, the attempt bound is hit, or
    /// `cancel` fires.
    pub async fn wait(
        &self,
        session: &SessionContext,
        job_id: &JobId,
        cancel: &CancellationToken,
    ) -> JobOutcome {
        info!(
            job_id = %job_id,
            interval_ms = self.settings.interval.as_millis() as u64,
            "Polling job"
        );
        poll_job(
            self.source.as_ref(),
            session,
            job_id,
            self.settings,
            cancel,
            |_| true,
        )
        .await
    }

    /// Create a watcher bound to `session`. Must be called inside a Tokio runtime.
    pub fn watch(&self, session: SessionContext) -> JobWatcher<S> {
        let (state, _) = watch::channel(JobView::default());
        JobWatcher {
            poller: self.clone(),
            session,
            state: Arc::new(state),
            active: None,
        }
    }
}

static IDLE: JobSnapshot = JobSnapshot {
    status: JobStatus::Idle,
    data: None,
    error: None,
};

/// What a [`JobWatcher`] publishes: the current job, if any, under the
/// generation that set it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobView {
    pub generation: u64,
    pub job: Option<PollableJob>,
}

impl JobView {
    pub fn job_id(&self) -> Option<&JobId> {
        self.job.as_ref().map(|job| &job.job_id)
    }

    /// Idle when no job is set.
    pub fn snapshot(&self) -> &JobSnapshot {
        self.job.as_ref().map_or(&IDLE, |job| &job.status)
    }
}

struct ActivePoll {
    job_id: JobId,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Tracks one "current" job for a caller and publishes its status.
pub struct JobWatcher<S: ?Sized> {
    poller: JobPoller<S>,
    session: SessionContext,
    state: Arc<watch::Sender<JobView>>,
    active: Option<ActivePoll>,
}

impl<S> JobWatcher<S>
where
    S: JobStatusSource + ?Sized + 'static,
{
    /// Switch to `job_id`, or to no job when `None`.
    ///
    /// A malformed id is rejected before anything changes. Setting the id
    /// that is already active is a no-op.
    pub fn set_job(&mut self, job_id: Option<&str>) -> Result<(), UsageError> {
        let job_id = job_id.map(JobId::parse).transpose()?;

        if let (Some(next), Some(active)) = (&job_id, &self.active) {
            if *next == active.job_id && !active.task.is_finished() {
                return Ok(());
            }
        }

        self.stop();

        let mut generation = 0;
        self.state.send_modify(|view| {
            view.generation += 1;
            generation = view.generation;
            view.job = job_id.clone().map(|job_id| PollableJob {
                job_id,
                status: JobSnapshot::processing(),
            });
        });

        let Some(job_id) = job_id else {
            return Ok(());
        };

        let cancel = CancellationToken::new();
        let task = tokio::spawn({
            let poller = self.poller.clone();
            let session = self.session.clone();
            let state = Arc::clone(&self.state);
            let cancel = cancel.clone();
            let job_id = job_id.clone();
            async move {
                let outcome = poll_job(
                    poller.source.as_ref(),
                    &session,
                    &job_id,
                    poller.settings,
                    &cancel,
                    |snapshot| apply_if_current(&state, generation, snapshot),
                )
                .await;
                debug!(job_id = %job_id, generation, outcome = ?outcome, "Job watcher finished");
            }
        });

        self.active = Some(ActivePoll {
            job_id,
            cancel,
            task,
        });
        Ok(())
    }

    /// Stop polling; the last published view stays readable.
    pub fn detach(&mut self) {
        self.stop();
        // Bump the generation so nothing already in flight can land.
        self.state.send_modify(|view| view.generation += 1);
    }

    pub fn view(&self) -> JobView {
        self.state.borrow().clone()
    }

    pub fn snapshot(&self) -> JobSnapshot {
        self.state.borrow().snapshot().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<JobView> {
        self.state.subscribe()
    }

    fn stop(&mut self) {
        if let Some(active) = self.active.take() {
            active.cancel.cancel();
            debug!(job_id = %active.job_id, "Stopped polling job");
        }
    }
}

impl<S: ?Sized> Drop for JobWatcher<S> {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            active.cancel.cancel();
        }
    }
}

fn apply_if_current(
    state: &watch::Sender<JobView>,
    generation: u64,
    snapshot: &JobSnapshot,
) -> bool {
    let mut current = true;
    state.send_if_modified(|view| {
        if view.generation != generation {
            current = false;
            return false;
        }
        let Some(job) = view.job.as_mut() else {
            current = false;
            return false;
        };
        if job.status == *snapshot {
            return false;
        }
        job.status = snapshot.clone();
        true
    });
    current
}
