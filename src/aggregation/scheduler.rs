//! Debounced, serialized background updates of the aggregation table.
//!
//! All scheduling state lives in a single worker task that receives
//! commands over a channel. Inserts call [`UpdateScheduler::notify`]; the
//! first notification arms a timer and later ones inside the delay window
//! are absorbed, since a pass drains every pending key from storage rather
//! than only the ones known when it was scheduled. At most one timer and one
//! running pass exist at any time.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Sleep;
use tracing::{debug, error, info, warn};

use crate::aggregation::errors::AggregationError;
use crate::aggregation::{AggregationStore, InsertNotify};

pub const DEFAULT_DELAY: Duration = Duration::from_secs(20);
pub const DEFAULT_BUSY_DELAY: Duration = Duration::from_secs(300);
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Delay between the first notification and the update pass.
    pub delay: Duration,
    /// Delay used when the timer fires while a pass is still running.
    pub busy_delay: Duration,
    /// Upper bound on waiting for a running pass at shutdown; `None` waits
    /// for as long as it takes.
    pub shutdown_timeout: Option<Duration>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            delay: DEFAULT_DELAY,
            busy_delay: DEFAULT_BUSY_DELAY,
            shutdown_timeout: Some(DEFAULT_SHUTDOWN_TIMEOUT),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerPhase {
    Idle,
    ScheduledDelayed,
    Updating,
    UpdatingWithPendingRerun,
    Stopping,
    Stopped,
}

/// Number of keys processed by a pass.
pub type PassResult = Result<usize, AggregationError>;

enum Command {
    Notify,
    RunNow(oneshot::Sender<PassResult>),
    Stop(oneshot::Sender<Result<(), AggregationError>>),
}

enum Event {
    Command(Option<Command>),
    PassFinished(Result<PassResult, JoinError>),
    TimerFired,
}

/// Handle to the update worker. Cheap to clone; every clone talks to the
/// same worker.
#[derive(Debug, Clone)]
pub struct UpdateScheduler {
    commands: mpsc::UnboundedSender<Command>,
    phase: watch::Receiver<SchedulerPhase>,
}

impl UpdateScheduler {
    /// Spawn the worker on the current tokio runtime. An initial update is
    /// always scheduled: records may have been inserted while the process
    /// was down or by another writer, and the pending table in storage, not
    /// in-memory state, is authoritative.
    pub fn start(store: Arc<dyn AggregationStore>, config: SchedulerConfig) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (phase_tx, phase_rx) = watch::channel(SchedulerPhase::Idle);
        let (stop_tx, _) = watch::channel(false);

        let worker = Worker {
            store,
            config,
            commands: commands_rx,
            phase: phase_tx,
            stop_signal: stop_tx,
            need_update: false,
            stopping: false,
            pending_timer: None,
            in_flight: None,
            waiters: Vec::new(),
        };
        tokio::spawn(worker.run());

        Self {
            commands: commands_tx,
            phase: phase_rx,
        }
    }

    /// Record that new rows were inserted. Notifications arriving before
    /// the scheduled pass starts collapse into that pass.
    pub fn notify(&self) {
        if self.commands.send(Command::Notify).is_err() {
            debug!("Aggregation update notification after scheduler shutdown ignored");
        }
    }

    /// Start a pass immediately, or join the one already running, and wait
    /// for its result.
    pub async fn run_now(&self) -> PassResult {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::RunNow(tx))
            .map_err(|_| AggregationError::SchedulerStopped)?;
        rx.await.unwrap_or(Err(AggregationError::SchedulerStopped))
    }

    /// Stop scheduling, cancel an armed timer and wait for a running pass to
    /// reach its next stopping point. Stopping twice is a no-op.
    pub async fn stop(&self) -> Result<(), AggregationError> {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Stop(tx)).is_err() {
            return Ok(());
        }
        rx.await.unwrap_or(Ok(()))
    }

    pub fn phase(&self) -> SchedulerPhase {
        *self.phase.borrow()
    }

    /// Wait until the worker reports `phase`. Returns `false` if the worker
    /// exited first.
    pub async fn wait_for_phase(&self, phase: SchedulerPhase) -> bool {
        let mut rx = self.phase.clone();
        let reached = rx.wait_for(|p| *p == phase).await.is_ok();
        reached
    }
}

impl InsertNotify for UpdateScheduler {
    fn notify_insert(&self) {
        self.notify();
    }
}

struct Worker {
    store: Arc<dyn AggregationStore>,
    config: SchedulerConfig,
    commands: mpsc::UnboundedReceiver<Command>,
    phase: watch::Sender<SchedulerPhase>,
    stop_signal: watch::Sender<bool>,
    need_update: bool,
    stopping: bool,
    pending_timer: Option<Pin<Box<Sleep>>>,
    in_flight: Option<JoinHandle<PassResult>>,
    waiters: Vec<oneshot::Sender<PassResult>>,
}

impl Worker {
    async fn run(mut self) {
        self.schedule_update(self.config.delay);
        self.publish_phase();

        loop {
            let event = tokio::select! {
                biased;
                joined = wait_pass(&mut self.in_flight) => Event::PassFinished(joined),
                () = wait_timer(&mut self.pending_timer) => Event::TimerFired,
                cmd = self.commands.recv() => Event::Command(cmd),
            };

            match event {
                Event::Command(Some(Command::Notify)) => self.notify(),
                Event::Command(Some(Command::RunNow(waiter))) => self.run_now(waiter),
                Event::Command(Some(Command::Stop(reply))) => {
                    let result = self.shutdown().await;
                    self.phase.send_replace(SchedulerPhase::Stopped);
                    let _ = reply.send(result);
                    return;
                }
                Event::Command(None) => {
                    // every handle is gone
                    let _ = self.shutdown().await;
                    break;
                }
                Event::PassFinished(joined) => {
                    self.in_flight = None;
                    let _ = self.finish_pass(joined);
                }
                Event::TimerFired => {
                    self.pending_timer = None;
                    self.attempt_update();
                }
            }
            self.publish_phase();
        }

        self.phase.send_replace(SchedulerPhase::Stopped);
    }

    fn notify(&mut self) {
        if self.stopping {
            return;
        }
        self.need_update = true;
        self.schedule_update(self.config.delay);
    }

    /// Arm the timer unless one is already armed.
    fn schedule_update(&mut self, delay: Duration) {
        if self.stopping || self.pending_timer.is_some() {
            return;
        }
        info!(delay_secs = delay.as_secs(), "Scheduling aggregation update");
        self.pending_timer = Some(Box::pin(tokio::time::sleep(delay)));
    }

    fn attempt_update(&mut self) {
        if self.stopping {
            return;
        }
        if self.in_flight.is_some() {
            warn!(
                busy_delay_secs = self.config.busy_delay.as_secs(),
                "Aggregation update still running, deferring next pass"
            );
            self.schedule_update(self.config.busy_delay);
            return;
        }
        self.start_pass();
    }

    fn run_now(&mut self, waiter: oneshot::Sender<PassResult>) {
        if self.stopping {
            let _ = waiter.send(Err(AggregationError::SchedulerStopped));
            return;
        }
        if self.in_flight.is_none() {
            info!("Aggregation update triggered manually");
            self.start_pass();
        }
        self.waiters.push(waiter);
    }

    fn start_pass(&mut self) {
        debug!(need_update = self.need_update, "Starting aggregation update pass");
        self.need_update = false;
        let store = Arc::clone(&self.store);
        let stop = self.stop_signal.subscribe();
        self.in_flight = Some(tokio::spawn(drain_pending(store, stop)));
    }

    /// Log the outcome, publish the phase and answer `run_now` waiters.
    fn finish_pass(&mut self, joined: Result<PassResult, JoinError>) -> PassResult {
        let result = joined.unwrap_or_else(|e| Err(AggregationError::TaskFailed(e.to_string())));
        match &result {
            Ok(processed) => info!(processed, "Aggregation update pass finished"),
            Err(e) => error!(error = %e, "Aggregation update pass failed"),
        }
        self.publish_phase();
        for waiter in self.waiters.drain(..) {
            let reply = match &result {
                Ok(processed) => Ok(*processed),
                Err(e) => Err(AggregationError::PassFailed(e.to_string())),
            };
            let _ = waiter.send(reply);
        }
        result
    }

    async fn shutdown(&mut self) -> Result<(), AggregationError> {
        self.stopping = true;
        self.phase.send_replace(SchedulerPhase::Stopping);
        self.stop_signal.send_replace(true);

        if self.pending_timer.take().is_some() {
            debug!("Cancelled scheduled aggregation update");
        }

        let Some(handle) = self.in_flight.take() else {
            return Ok(());
        };

        info!("Waiting for running aggregation update to finish");
        let joined = match self.config.shutdown_timeout {
            Some(limit) => match tokio::time::timeout(limit, handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    // the pass is left running; it is never cut off mid-transaction
                    warn!(
                        timeout_secs = limit.as_secs(),
                        "Aggregation update did not finish before shutdown timeout"
                    );
                    self.waiters.clear();
                    return Err(AggregationError::ShutdownTimeout(limit));
                }
            },
            None => handle.await,
        };
        match self.finish_pass(joined) {
            Ok(_) => Ok(()),
            Err(e @ AggregationError::TaskFailed(_)) => Err(e),
            Err(e) => Err(AggregationError::PassFailed(e.to_string())),
        }
    }

    fn publish_phase(&self) {
        let phase = match (
            self.stopping,
            self.in_flight.is_some(),
            self.pending_timer.is_some(),
        ) {
            (true, _, _) => SchedulerPhase::Stopping,
            (false, true, true) => SchedulerPhase::UpdatingWithPendingRerun,
            (false, true, false) => SchedulerPhase::Updating,
            (false, false, true) => SchedulerPhase::ScheduledDelayed,
            (false, false, false) => SchedulerPhase::Idle,
        };
        self.phase.send_replace(phase);
    }
}

/// Process pending keys one at a time until storage reports none left.
/// Stops early, leaving the rest pending, once shutdown is signalled.
async fn drain_pending(
    store: Arc<dyn AggregationStore>,
    stop: watch::Receiver<bool>,
) -> PassResult {
    let mut processed = 0;
    while let Some(key) = store.update_next().await? {
        processed += 1;
        info!(
            insert_date = %key.insert_date,
            machine_name = %key.machine_name,
            "Aggregation update"
        );
        if *stop.borrow() {
            info!(processed, "Stopping aggregation update, remaining work left pending");
            break;
        }
    }
    Ok(processed)
}

async fn wait_timer(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}

async fn wait_pass(pass: &mut Option<JoinHandle<PassResult>>) -> Result<PassResult, JoinError> {
    match pass {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}
