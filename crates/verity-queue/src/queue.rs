//! [`JobQueue`]: handler registry, dispatch, retry with backoff, heartbeats
//! and stall recovery over a [`JobStore`].

use std::{
  collections::{HashMap, hash_map::Entry},
  sync::Arc,
  time::Duration,
};

use chrono::{DateTime, Utc};
use tokio::{
  sync::{Notify, broadcast, watch},
  task::JoinHandle,
  time::{Instant, MissedTickBehavior},
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use verity_core::{
  job::{Job, JobError, JobEvent, JobKind, JobOptions, JobPayload, JobState},
  store::JobStore,
};

use crate::{Clock, Error, JobContext, JobHandler, Result};

/// Longest single delay added to a timestamp (backoff or lease).
const MAX_DELAY: Duration = Duration::from_secs(30 * 24 * 60 * 60);

// ─── Config ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct QueueConfig {
  /// How long an idle worker waits before polling the store again when it
  /// is not woken by an enqueue.
  pub poll_interval:     Duration,
  /// Lease length for active jobs and the stall reaper period. Running jobs
  /// renew their lease every half interval.
  pub stall_interval:    Duration,
  /// Stall recoveries allowed before a job is failed.
  pub max_stalled_count: u32,
  pub event_capacity:    usize,
}

impl Default for QueueConfig {
  fn default() -> Self {
    Self {
      poll_interval:     Duration::from_millis(500),
      stall_interval:    Duration::from_secs(30),
      max_stalled_count: 1,
      event_capacity:    256,
    }
  }
}

impl QueueConfig {
  fn validate(&self) -> Result<()> {
    if self.poll_interval.is_zero() {
      return Err(Error::Configuration("poll_interval must be non-zero".into()));
    }
    if self.stall_interval < Duration::from_millis(2) {
      return Err(Error::Configuration(
        "stall_interval must be at least 2ms".into(),
      ));
    }
    if self.event_capacity == 0 {
      return Err(Error::Configuration("event_capacity must be non-zero".into()));
    }
    Ok(())
  }

  fn heartbeat_period(&self) -> Duration { self.stall_interval / 2 }
}

// ─── Outcome ─────────────────────────────────────────────────────────────────

/// What happened to the job a single [`JobQueue::process_next`] call ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
  Completed {
    job_id: Uuid,
  },
  Retrying {
    job_id:   Uuid,
    attempts: u32,
    ready_at: DateTime<Utc>,
  },
  Failed {
    job_id:   Uuid,
    attempts: u32,
    error:    String,
  },
  /// The job lost its lease while running and was recovered by the stall
  /// reaper; this attempt's result was not recorded.
  Superseded {
    job_id: Uuid,
  },
}

// ─── Queue ───────────────────────────────────────────────────────────────────

pub struct JobQueue<S> {
  store:    Arc<S>,
  clock:    Arc<dyn Clock>,
  config:   QueueConfig,
  handlers: HashMap<JobKind, Arc<dyn JobHandler>>,
  events:   broadcast::Sender<JobEvent>,
  wake:     Notify,
}

impl<S: JobStore + 'static> JobQueue<S> {
  pub fn new(
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    config: QueueConfig,
  ) -> Result<Self> {
    config.validate()?;
    let (events, _) = broadcast::channel(config.event_capacity);
    Ok(Self {
      store,
      clock,
      config,
      handlers: HashMap::new(),
      events,
      wake: Notify::new(),
    })
  }

  /// Register the handler for `kind`. Each kind takes exactly one handler.
  pub fn register(&mut self, kind: JobKind, handler: impl JobHandler) -> Result<()> {
    match self.handlers.entry(kind) {
      Entry::Occupied(_) => Err(Error::Configuration(format!(
        "a handler is already registered for job kind {kind}"
      ))),
      Entry::Vacant(slot) => {
        slot.insert(Arc::new(handler));
        Ok(())
      }
    }
  }

  pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> { self.events.subscribe() }

  pub fn store(&self) -> &Arc<S> { &self.store }

  /// Persist a new waiting job and wake an idle worker. `None` options use
  /// the defaults for the payload's kind.
  pub async fn enqueue(
    &self,
    payload: JobPayload,
    options: Option<JobOptions>,
  ) -> Result<Uuid> {
    let kind = payload.kind();
    let options = options.unwrap_or_else(|| JobOptions::for_kind(kind));
    options.validate()?;

    let job = Job::new(payload, options, self.clock.now());
    let job_id = job.job_id;
    self.store.insert_job(job).await.map_err(Error::store)?;

    debug!(job_id = %job_id, kind = %kind, priority = options.priority, "job enqueued");
    self.wake.notify_one();
    Ok(job_id)
  }

  /// Claim and run a single ready job. Returns `None` when nothing is ready.
  pub async fn process_next(&self, worker_id: &str) -> Result<Option<JobOutcome>> {
    let now = self.clock.now();
    let lease = offset(now, self.config.stall_interval);
    let Some(job) = self
      .store
      .claim_next_job(&JobKind::ALL, now, lease)
      .await
      .map_err(Error::store)?
    else {
      return Ok(None);
    };

    let attempt = job.attempts + 1;
    debug!(
      worker = worker_id,
      job_id = %job.job_id,
      kind = %job.kind(),
      attempt,
      "job started"
    );

    let result = match self.handlers.get(&job.kind()) {
      Some(handler) => self.run_attempt(&job, handler.as_ref()).await,
      None => Err(JobError::Permanent(format!(
        "no handler registered for job kind {}",
        job.kind()
      ))),
    };

    self.settle(&job, attempt, result).await.map(Some)
  }

  /// Run the handler under the job's timeout, renewing the lease while it
  /// works. A timeout drops the handler future and counts as a retryable
  /// failure.
  async fn run_attempt(&self, job: &Job, handler: &dyn JobHandler) -> Result<(), JobError> {
    let ctx = JobContext {
      job_id:  job.job_id,
      attempt: job.attempts.saturating_add(1),
      timeout: job.timeout,
    };
    let run = tokio::time::timeout(job.timeout, handler.handle(job.payload.clone(), ctx));
    tokio::pin!(run);

    let period = self.config.heartbeat_period();
    let mut heartbeat = tokio::time::interval_at(Instant::now() + period, period);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
      tokio::select! {
        finished = &mut run => {
          return finished.unwrap_or_else(|_| {
            Err(JobError::Retryable(format!("job timed out after {:?}", job.timeout)))
          });
        }
        _ = heartbeat.tick() => self.renew_lease(job).await,
      }
    }
  }

  async fn renew_lease(&self, job: &Job) {
    let lease = offset(self.clock.now(), self.config.stall_interval);
    match self.store.extend_lease(job.job_id, lease).await {
      Ok(true) => {}
      Ok(false) => warn!(
        job_id = %job.job_id,
        "job is no longer active; its result will be discarded"
      ),
      Err(err) => warn!(job_id = %job.job_id, error = %err, "failed to renew job lease"),
    }
  }

  async fn settle(
    &self,
    job: &Job,
    attempts: u32,
    result: Result<(), JobError>,
  ) -> Result<JobOutcome> {
    let now = self.clock.now();
    let job_id = job.job_id;
    let kind = job.kind();

    match result {
      Ok(()) => {
        if !self.store.complete_job(job_id, attempts, now).await.map_err(Error::store)? {
          return Ok(self.superseded(job_id));
        }
        info!(job_id = %job_id, kind = %kind, attempt = attempts, "job completed");
        self.emit(JobEvent::Completed { job_id, kind });
        Ok(JobOutcome::Completed { job_id })
      }

      Err(JobError::Retryable(error)) if attempts < job.max_attempts => {
        let ready_at = offset(now, job.backoff.delay_for(attempts));
        if !self
          .store
          .retry_job(job_id, attempts, ready_at, error.clone())
          .await
          .map_err(Error::store)?
        {
          return Ok(self.superseded(job_id));
        }
        warn!(
          job_id = %job_id,
          kind = %kind,
          attempt = attempts,
          max_attempts = job.max_attempts,
          %ready_at,
          error = %error,
          "job attempt failed; retrying"
        );
        Ok(JobOutcome::Retrying { job_id, attempts, ready_at })
      }

      Err(err) => {
        let error = err.to_string();
        if !self
          .store
          .fail_job(job_id, attempts, error.clone(), now)
          .await
          .map_err(Error::store)?
        {
          return Ok(self.superseded(job_id));
        }
        error!(
          job_id = %job_id,
          kind = %kind,
          attempt = attempts,
          retryable = err.is_retryable(),
          error = %error,
          "job failed"
        );
        self.emit(JobEvent::Failed { job_id, kind, attempts, error: error.clone() });
        Ok(JobOutcome::Failed { job_id, attempts, error })
      }
    }
  }

  fn superseded(&self, job_id: Uuid) -> JobOutcome {
    warn!(job_id = %job_id, "job was recovered while running; outcome discarded");
    JobOutcome::Superseded { job_id }
  }

  fn emit(&self, event: JobEvent) {
    // Sending only fails when nobody is subscribed.
    let _ = self.events.send(event);
  }

  /// Recover jobs whose lease lapsed. Each is requeued with a `Stalled`
  /// event, or failed with a `Failed` event once it has stalled more than
  /// `max_stalled_count` times.
  pub async fn reap_stalled(&self) -> Result<Vec<Job>> {
    let recovered = self
      .store
      .requeue_stalled(self.clock.now(), self.config.max_stalled_count)
      .await
      .map_err(Error::store)?;

    for job in &recovered {
      let (job_id, kind) = (job.job_id, job.kind());
      if job.state == JobState::Failed {
        let error = job.last_error.clone().unwrap_or_default();
        error!(
          job_id = %job_id,
          kind = %kind,
          stalled_count = job.stalled_count,
          "stalled job failed"
        );
        self.emit(JobEvent::Failed { job_id, kind, attempts: job.attempts, error });
      } else {
        warn!(
          job_id = %job_id,
          kind = %kind,
          stalled_count = job.stalled_count,
          "stalled job returned to the queue"
        );
        self.emit(JobEvent::Stalled { job_id, kind });
      }
    }

    if recovered.iter().any(|job| job.state == JobState::Waiting) {
      self.wake.notify_waiters();
    }
    Ok(recovered)
  }

  /// Spawn `concurrency` workers and the stall reaper.
  pub fn start(self: &Arc<Self>, concurrency: usize) -> QueueHandle {
    let (stop, stop_rx) = watch::channel(false);
    let concurrency = concurrency.max(1);

    let mut tasks = Vec::with_capacity(concurrency + 1);
    for n in 0..concurrency {
      let queue = Arc::clone(self);
      let stop_rx = stop_rx.clone();
      tasks.push(tokio::spawn(async move {
        queue.worker_loop(format!("worker-{n}"), stop_rx).await;
      }));
    }
    let queue = Arc::clone(self);
    tasks.push(tokio::spawn(async move { queue.reaper_loop(stop_rx).await }));

    info!(concurrency, "job queue started");
    QueueHandle { stop, tasks }
  }

  async fn worker_loop(&self, worker_id: String, mut stop: watch::Receiver<bool>) {
    loop {
      if *stop.borrow() {
        break;
      }
      match self.process_next(&worker_id).await {
        Ok(Some(_)) => continue,
        Ok(None) => {}
        Err(err) => error!(worker = %worker_id, error = %err, "job dispatch failed"),
      }
      tokio::select! {
        _ = stop.changed() => break,
        () = self.wake.notified() => {}
        () = tokio::time::sleep(self.config.poll_interval) => {}
      }
    }
    debug!(worker = %worker_id, "worker stopped");
  }

  async fn reaper_loop(&self, mut stop: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(self.config.stall_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
      tokio::select! {
        _ = stop.changed() => break,
        _ = ticker.tick() => {
          if let Err(err) = self.reap_stalled().await {
            error!(error = %err, "stall reaper failed");
          }
        }
      }
    }
  }
}

/// `now + delay`, with the delay capped at [`MAX_DELAY`].
fn offset(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
  chrono::Duration::from_std(delay.min(MAX_DELAY))
    .ok()
    .and_then(|delay| now.checked_add_signed(delay))
    .unwrap_or(now)
}

// ─── Handle ──────────────────────────────────────────────────────────────────

/// Owns the tasks spawned by [`JobQueue::start`].
pub struct QueueHandle {
  stop:  watch::Sender<bool>,
  tasks: Vec<JoinHandle<()>>,
}

impl QueueHandle {
  /// Stop taking new jobs and wait for in-flight ones to settle.
  pub async fn shutdown(self) {
    self.stop.send_replace(true);
    for task in self.tasks {
      if let Err(err) = task.await {
        error!(error = %err, "queue task ended abnormally");
      }
    }
    info!("job queue stopped");
  }
}
