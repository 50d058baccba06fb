use crate::error::DispatchError;
use crate::event::StatusEvent;
use futures::future::join_all;
use runner_core::{
    BackoffCounter, Command, DispatcherSettings, Job, JobId, JobStatus, Runner, RunnerError,
    RunnerHandle, RunnerKind, Submission,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::future::Future;
use std::io::ErrorKind;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

struct RunnerSlot {
    runner: Arc<dyn Runner>,
    limit: usize,
    submit_backoff: BackoffCounter,
    check_backoff: BackoffCounter,
}

/// Snapshot of a registered runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerInfo {
    pub name: String,
    pub kind: RunnerKind,
    pub limit: usize,
    pub active: usize,
}

/// Cloneable sender of cancellation requests, usable from other tasks.
#[derive(Clone)]
pub struct CancelHandle {
    tx: UnboundedSender<JobId>,
}

impl CancelHandle {
    /// Queue a cancellation for the next cycle. Returns false once the
    /// dispatcher has been dropped.
    pub fn request(&self, id: JobId) -> bool {
        self.tx.send(id).is_ok()
    }
}

/// Jobs bound for one runner in a single batch call. `ids[i]` owns `items[i]`.
struct Batch<T> {
    slot: usize,
    runner: Arc<dyn Runner>,
    ids: Vec<JobId>,
    items: Vec<T>,
}

/// Owns every job from submission to a terminal state.
///
/// All mutation happens through `&mut self`, from the task driving
/// [`Dispatcher::run`] or [`Dispatcher::run_cycle`]. Within a cycle each
/// runner receives at most one call per step and calls to distinct runners
/// run concurrently.
pub struct Dispatcher {
    settings: DispatcherSettings,
    jobs: HashMap<JobId, Job>,
    pending: VecDeque<JobId>,
    runners: Vec<RunnerSlot>,
    cancel_tx: UnboundedSender<JobId>,
    cancel_rx: UnboundedReceiver<JobId>,
    /// Cancellations waiting for an accepted job to reach the backend queue.
    deferred_cancels: Vec<JobId>,
    events: UnboundedSender<StatusEvent>,
}

impl Dispatcher {
    pub fn new(settings: DispatcherSettings) -> (Self, UnboundedReceiver<StatusEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (cancel_tx, cancel_rx) = mpsc::unbounded_channel();
        let dispatcher = Self {
            settings,
            jobs: HashMap::new(),
            pending: VecDeque::new(),
            runners: Vec::new(),
            cancel_tx,
            cancel_rx,
            deferred_cancels: Vec::new(),
            events,
        };
        (dispatcher, events_rx)
    }

    pub fn settings(&self) -> &DispatcherSettings {
        &self.settings
    }

    /// Register `runner` with a concurrency ceiling of `limit` unfinished jobs.
    /// A runner with the same name is replaced.
    pub fn add_runner(&mut self, runner: Arc<dyn Runner>, limit: usize) {
        let slot = RunnerSlot {
            runner,
            limit,
            submit_backoff: BackoffCounter::new(self.settings.max_submit_failures),
            check_backoff: BackoffCounter::new(self.settings.max_check_failures),
        };
        let name = slot.runner.name().to_string();
        match self.runners.iter_mut().find(|s| s.runner.name() == name) {
            Some(existing) => {
                warn!("Replacing runner {}", name);
                *existing = slot;
            }
            None => {
                info!("Registered {} runner {} (limit {})", slot.runner.kind(), name, limit);
                self.runners.push(slot);
            }
        }
    }

    pub fn runners(&self) -> Vec<RunnerInfo> {
        self.runners
            .iter()
            .map(|s| RunnerInfo {
                name: s.runner.name().to_string(),
                kind: s.runner.kind(),
                limit: s.limit,
                active: self.active_count(s.runner.name()),
            })
            .collect()
    }

    /// Record a new pending job for `runner`; it is submitted on a later cycle.
    pub fn submit(&mut self, command: Command, runner: &str) -> Result<JobId, DispatchError> {
        command.validate().map_err(DispatchError::InvalidCommand)?;
        if !self.runners.iter().any(|s| s.runner.name() == runner) {
            return Err(DispatchError::UnknownRunner(runner.to_string()));
        }

        let id = JobId::new();
        let work_dir = self.settings.jobs_dir.join(&id.0);
        std::fs::create_dir_all(&work_dir)?;

        let job = Job::new(id.clone(), work_dir, command, runner.to_string());
        info!("Job {} pending on {}: {}", id, runner, job.command);
        emit(&self.events, &job, None);
        self.jobs.insert(id.clone(), job);
        self.pending.push_back(id.clone());
        Ok(id)
    }

    /// Ask for `id` to be cancelled on the next cycle.
    pub fn request_cancel(&self, id: &JobId) -> Result<(), DispatchError> {
        if !self.jobs.contains_key(id) {
            return Err(DispatchError::JobNotFound(id.clone()));
        }
        // the receiver lives in self, so the send cannot fail
        self.cancel_tx.send(id.clone()).ok();
        Ok(())
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            tx: self.cancel_tx.clone(),
        }
    }

    pub fn job(&self, id: &JobId) -> Option<&Job> {
        self.jobs.get(id)
    }

    /// All tracked jobs, oldest first.
    pub fn jobs(&self) -> Vec<&Job> {
        let mut jobs: Vec<&Job> = self.jobs.values().collect();
        jobs.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));
        jobs
    }

    pub fn status(&self, id: &JobId) -> Option<JobStatus> {
        self.jobs.get(id).map(|j| j.status)
    }

    /// Jobs handed to `runner` that have not reached a terminal state.
    pub fn active_count(&self, runner: &str) -> usize {
        count_active(&self.jobs, runner)
    }

    /// Remove a finished job and its working directory.
    pub fn purge(&mut self, id: &JobId) -> Result<(), DispatchError> {
        let job = self
            .jobs
            .get(id)
            .ok_or_else(|| DispatchError::JobNotFound(id.clone()))?;
        if !job.is_terminal() {
            return Err(DispatchError::NotTerminal {
                id: id.clone(),
                status: job.status,
            });
        }

        match std::fs::remove_dir_all(&job.work_dir) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        info!("Purged job {}", id);
        self.transition(id, JobStatus::Deleted);
        self.jobs.remove(id);
        self.deferred_cancels.retain(|j| j != id);
        Ok(())
    }

    /// Run cycles every poll interval until `shutdown` resolves.
    pub async fn run<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut interval = tokio::time::interval(self.settings.poll_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Dispatcher shutting down with {} unfinished jobs", self.unfinished());
                    break;
                }
                _ = interval.tick() => self.run_cycle().await,
            }
        }
    }

    /// One pass: admit pending jobs, start accepted ones, refresh statuses,
    /// then act on cancellation requests.
    pub async fn run_cycle(&mut self) {
        let mut requests = Vec::new();
        while let Ok(id) = self.cancel_rx.try_recv() {
            requests.push(id);
        }
        let held: HashSet<JobId> = requests.iter().cloned().collect();

        self.admit_pending(&held).await;
        self.start_accepted().await;
        self.poll_statuses().await;
        self.process_cancellations(requests).await;
    }

    fn unfinished(&self) -> usize {
        self.jobs.values().filter(|j| !j.is_terminal()).count()
    }

    async fn admit_pending(&mut self, held: &HashSet<JobId>) {
        let mut batches: Vec<Batch<Submission>> = Vec::new();
        for (slot_idx, slot) in self.runners.iter_mut().enumerate() {
            let name = slot.runner.name().to_string();
            let capacity = slot.limit.saturating_sub(count_active(&self.jobs, &name));
            if capacity == 0 {
                continue;
            }

            let mut ids = Vec::new();
            let mut items = Vec::new();
            for id in &self.pending {
                if ids.len() == capacity {
                    break;
                }
                let Some(job) = self.jobs.get(id) else { continue };
                if job.runner == name && !held.contains(id) {
                    ids.push(id.clone());
                    items.push((job.command.clone(), job.work_dir.clone()));
                }
            }
            if ids.is_empty() {
                continue;
            }
            if !slot.submit_backoff.ready() {
                debug!("Runner {} backing off, {} jobs wait", name, ids.len());
                continue;
            }
            batches.push(Batch {
                slot: slot_idx,
                runner: slot.runner.clone(),
                ids,
                items,
            });
        }
        if batches.is_empty() {
            return;
        }

        let limit = self.settings.call_timeout();
        let calls = batches.iter().map(|b| async move {
            match tokio::time::timeout(limit, b.runner.batch_submit(&b.items)).await {
                Ok(results) if results.len() == b.items.len() => results,
                Ok(results) => {
                    warn!(
                        "Runner {} returned {} results for {} submissions",
                        b.runner.name(),
                        results.len(),
                        b.items.len()
                    );
                    b.items
                        .iter()
                        .map(|_| Err(RunnerError::Unavailable("incomplete batch result".into())))
                        .collect()
                }
                Err(_) => b.items.iter().map(|_| Err(RunnerError::Timeout(limit))).collect(),
            }
        });
        let outcomes = join_all(calls).await;

        for (batch, results) in batches.into_iter().zip(outcomes) {
            let name = batch.runner.name().to_string();
            let mut retry_later = Vec::new();
            for (id, result) in batch.ids.into_iter().zip(results) {
                match result {
                    Ok(handle) => self.accept(&id, handle),
                    Err(e) if e.is_transient() => {
                        debug!("Submission of job {} to {} failed: {}", id, name, e);
                        retry_later.push(id);
                    }
                    Err(e) => {
                        warn!("Job {} rejected by {}: {}", id, name, e);
                        self.transition(&id, JobStatus::Rejected);
                    }
                }
            }

            let backoff = &mut self.runners[batch.slot].submit_backoff;
            if retry_later.is_empty() {
                backoff.success();
                continue;
            }
            backoff.failure();
            warn!(
                "Runner {} could not take {} jobs ({} failed rounds)",
                name,
                retry_later.len(),
                backoff.failures()
            );
            if backoff.give_up() {
                backoff.success();
                for id in &retry_later {
                    warn!("Giving up on submitting job {} to {}", id, name);
                    self.transition(id, JobStatus::Error);
                }
            }
        }

        let jobs = &self.jobs;
        self.pending
            .retain(|id| jobs.get(id).is_some_and(|j| j.status == JobStatus::Pending));
    }

    async fn start_accepted(&mut self) {
        let batches = self.handle_batches(|job| job.status == JobStatus::Accepted && !job.started);
        if batches.is_empty() {
            return;
        }

        let limit = self.settings.call_timeout();
        let outcomes = join_all(
            batches
                .iter()
                .map(|b| bounded(limit, b.runner.batch_start(&b.items))),
        )
        .await;

        for (batch, outcome) in batches.into_iter().zip(outcomes) {
            match outcome {
                Ok(()) => {
                    for id in &batch.ids {
                        if let Some(job) = self.jobs.get_mut(id) {
                            job.started = true;
                        }
                    }
                }
                Err(e) => warn!("Runner {} failed to start {} jobs: {}", batch.runner.name(), batch.ids.len(), e),
            }
        }
    }

    async fn poll_statuses(&mut self) {
        let mut batches = self.handle_batches(|_| true);
        batches.retain(|b| {
            let ready = self.runners[b.slot].check_backoff.ready();
            if !ready {
                debug!("Skipping status check on {}", b.runner.name());
            }
            ready
        });
        if batches.is_empty() {
            return;
        }

        let limit = self.settings.call_timeout();
        let calls = batches.iter().map(|b| async move {
            let statuses = bounded(limit, b.runner.batch_check_status(&b.items)).await?;
            if statuses.len() != b.items.len() {
                return Err(RunnerError::Unavailable(format!(
                    "{} statuses for {} jobs",
                    statuses.len(),
                    b.items.len()
                )));
            }
            Ok::<_, RunnerError>(statuses)
        });
        let outcomes = join_all(calls).await;

        for (batch, outcome) in batches.into_iter().zip(outcomes) {
            let backoff = &mut self.runners[batch.slot].check_backoff;
            match outcome {
                Ok(statuses) => {
                    backoff.success();
                    for (id, status) in batch.ids.iter().zip(statuses) {
                        self.apply_reported(id, status);
                    }
                }
                Err(e) => {
                    backoff.failure();
                    warn!(
                        "Status check on {} failed ({} in a row): {}",
                        batch.runner.name(),
                        backoff.failures(),
                        e
                    );
                    if backoff.give_up() {
                        backoff.success();
                        for id in &batch.ids {
                            warn!("Lost track of job {} on {}", id, batch.runner.name());
                            self.transition(id, lost_status(self.status(id)));
                        }
                    }
                }
            }
        }
    }

    async fn process_cancellations(&mut self, requests: Vec<JobId>) {
        let mut queue = std::mem::take(&mut self.deferred_cancels);
        queue.extend(requests);
        if queue.is_empty() {
            return;
        }

        let mut seen = HashSet::new();
        let mut targets = HashSet::new();
        for id in queue {
            if !seen.insert(id.clone()) {
                continue;
            }
            let Some(status) = self.status(&id) else {
                debug!("Cancellation for unknown job {}", id);
                continue;
            };
            match status {
                JobStatus::Pending => {
                    info!("Job {} cancelled before submission", id);
                    self.transition(&id, JobStatus::Interrupted);
                }
                JobStatus::Accepted => self.deferred_cancels.push(id),
                JobStatus::Queued | JobStatus::Running => {
                    if self.transition(&id, JobStatus::Cancelling) {
                        targets.insert(id);
                    }
                }
                JobStatus::Cancelling => {
                    targets.insert(id);
                }
                other => debug!("Job {} already {}, nothing to cancel", id, other),
            }
        }

        let jobs = &self.jobs;
        self.pending
            .retain(|id| jobs.get(id).is_some_and(|j| j.status == JobStatus::Pending));
        if targets.is_empty() {
            return;
        }

        let batches = self.handle_batches(|job| targets.contains(&job.id));
        let limit = self.settings.call_timeout();
        let outcomes = join_all(
            batches
                .iter()
                .map(|b| bounded(limit, b.runner.batch_cancel(&b.items))),
        )
        .await;

        for (batch, outcome) in batches.into_iter().zip(outcomes) {
            match outcome {
                Ok(()) => info!("Runner {} cancelling {} jobs", batch.runner.name(), batch.ids.len()),
                Err(e) => {
                    warn!("Cancel on {} failed, retrying next cycle: {}", batch.runner.name(), e);
                    self.deferred_cancels.extend(batch.ids);
                }
            }
        }
    }

    /// Unfinished jobs with handles matching `wanted`, grouped by runner.
    fn handle_batches(&self, wanted: impl Fn(&Job) -> bool) -> Vec<Batch<RunnerHandle>> {
        let mut selected: Vec<&Job> = self
            .jobs
            .values()
            .filter(|j| j.handle.is_some() && !j.is_terminal() && wanted(*j))
            .collect();
        selected.sort_by(|a, b| (a.created_at, &a.id).cmp(&(b.created_at, &b.id)));

        self.runners
            .iter()
            .enumerate()
            .filter_map(|(slot, s)| {
                let (ids, items): (Vec<JobId>, Vec<RunnerHandle>) = selected
                    .iter()
                    .filter(|j| j.runner == s.runner.name())
                    .filter_map(|j| Some((j.id.clone(), j.handle.clone()?)))
                    .unzip();
                (!ids.is_empty()).then(|| Batch {
                    slot,
                    runner: s.runner.clone(),
                    ids,
                    items,
                })
            })
            .collect()
    }

    fn accept(&mut self, id: &JobId, handle: RunnerHandle) {
        let Some(job) = self.jobs.get_mut(id) else { return };
        info!("Job {} accepted by {} as {}", id, job.runner, handle);
        if let Some(prev) = job.mark_accepted(handle) {
            emit(&self.events, job, Some(prev));
        }
    }

    /// Apply a legal transition and emit it. Returns false if refused.
    fn transition(&mut self, id: &JobId, next: JobStatus) -> bool {
        let Some(job) = self.jobs.get_mut(id) else {
            return false;
        };
        match job.advance(next) {
            Some(prev) => {
                emit(&self.events, job, Some(prev));
                true
            }
            None => false,
        }
    }

    /// Fold a backend-reported status into the job.
    fn apply_reported(&mut self, id: &JobId, reported: JobStatus) {
        let Some(job) = self.jobs.get_mut(id) else { return };
        let current = job.status;
        if reported == current {
            return;
        }
        // the backend dropped a job we asked it to kill: the cancel landed
        let reported = if current == JobStatus::Cancelling && reported == JobStatus::Unknown {
            debug!("Job {} left {} while cancelling", id, job.runner);
            JobStatus::Interrupted
        } else {
            reported
        };
        if current == JobStatus::Cancelling && reported.is_active() {
            debug!("Job {} still {} while cancelling", id, reported);
            return;
        }
        match job.advance(reported) {
            Some(prev) => {
                if reported.is_terminal() {
                    info!("Job {} on {} finished: {}", id, job.runner, reported);
                } else {
                    debug!("Job {} on {}: {} -> {}", id, job.runner, prev, reported);
                }
                emit(&self.events, job, Some(prev));
            }
            None => warn!(
                "Ignoring {} -> {} reported by {} for job {}",
                current, reported, job.runner, id
            ),
        }
    }
}

/// Status for a job whose runner stopped answering. A job already being
/// cancelled counts as interrupted.
fn lost_status(current: Option<JobStatus>) -> JobStatus {
    match current {
        Some(JobStatus::Cancelling) => JobStatus::Interrupted,
        _ => JobStatus::Unknown,
    }
}

fn count_active(jobs: &HashMap<JobId, Job>, runner: &str) -> usize {
    jobs.values()
        .filter(|j| j.runner == runner && j.handle.is_some() && !j.is_terminal())
        .count()
}

fn emit(events: &UnboundedSender<StatusEvent>, job: &Job, from: Option<JobStatus>) {
    let event = StatusEvent {
        job_id: job.id.clone(),
        runner: job.runner.clone(),
        from,
        to: job.status,
        at: job.updated_at,
    };
    if events.send(event).is_err() {
        debug!("Status event receiver dropped");
    }
}

/// A runner call that takes longer than `limit` fails as a timeout.
async fn bounded<T>(
    limit: Duration,
    call: impl Future<Output = Result<T, RunnerError>>,
) -> Result<T, RunnerError> {
    tokio::time::timeout(limit, call)
        .await
        .unwrap_or(Err(RunnerError::Timeout(limit)))
}
