//! Phase-aware stall watchdog with a rolling restart budget.
//!
//! The orchestrator loop reports turn lifecycle and event activity through a
//! [`StallMonitorHandle`]; a background task polls on a fixed interval and
//! compares time-since-last-event against the timeout for the current
//! [`Phase`]. When exceeded it emits [`StallEvent::RestartRequested`] (or
//! [`StallEvent::RestartSuppressed`] once the budget is spent) and leaves the
//! teardown to the loop, which is the only place the agent is touched.
//!
//! All watchdog state lives in [`StallPolicy`], owned by the task and fed
//! exclusively through the activity channel. Verdicts carry the generation
//! of the turn they were computed for; a verdict still queued when its turn
//! has ended must not be applied to the next one.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info_span, warn, Instrument};

use crate::config::StallConfig;
use crate::models::phase::Phase;

/// Watchdog verdicts delivered to the orchestrator loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StallEvent {
    /// No event for longer than the phase timeout; tear the turn down.
    RestartRequested {
        /// Generation of the stalled turn.
        turn: u64,
        /// Phase the agent was stuck in.
        phase: Phase,
        /// Time since the last event.
        idle: Duration,
        /// Restarts in the current window, including this one.
        restart_count: u32,
    },
    /// A stall was detected but the restart budget is exhausted.
    RestartSuppressed {
        /// Generation of the stalled turn.
        turn: u64,
        /// Phase the agent was stuck in.
        phase: Phase,
        /// Time since the last event.
        idle: Duration,
        /// Restarts already spent in the current window.
        restart_count: u32,
    },
}

impl StallEvent {
    /// Generation of the turn this verdict is about.
    #[must_use]
    pub fn turn(&self) -> u64 {
        match self {
            Self::RestartRequested { turn, .. } | Self::RestartSuppressed { turn, .. } => *turn,
        }
    }
}

/// Lifecycle and liveness signals from the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    /// A turn was issued.
    TurnStarted {
        /// Loop-assigned generation, increasing per turn.
        turn: u64,
    },
    /// The loop's phase tracking moved.
    PhaseChanged {
        /// New phase.
        phase: Phase,
        /// Outstanding tool calls or patch applies.
        active_operations: u32,
    },
    /// A protocol event was accepted for the in-flight turn.
    EventSeen,
    /// The turn call returned.
    TurnEnded,
    /// Approvals are pending; waiting on a human is not a stall.
    Paused,
    /// No approvals pending any more.
    Resumed,
}

/// Counter of automatic restarts within a rolling window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RestartBudget {
    count: u32,
    last_restart: Option<Instant>,
}

impl RestartBudget {
    /// Restarts counted in the current window.
    #[must_use]
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Zero the counter once `cooldown` has passed since the last restart.
    pub fn refresh(&mut self, now: Instant, cooldown: Duration) {
        if let Some(last) = self.last_restart {
            if now.saturating_duration_since(last) > cooldown {
                self.count = 0;
                self.last_restart = None;
            }
        }
    }

    /// Whether another restart is allowed under `limit`.
    #[must_use]
    pub fn allows(&self, limit: u32) -> bool {
        self.count < limit
    }

    /// Spend one restart.
    pub fn record(&mut self, now: Instant) {
        self.count += 1;
        self.last_restart = Some(now);
    }
}

/// Watchdog state machine, driven with explicit timestamps.
#[derive(Debug, Clone)]
#[allow(clippy::struct_excessive_bools)]
pub struct StallPolicy {
    config: StallConfig,
    turn_in_flight: bool,
    turn: u64,
    phase: Phase,
    active_operations: u32,
    last_event: Instant,
    paused: bool,
    restart_in_progress: bool,
    suppression_reported: bool,
    budget: RestartBudget,
}

impl StallPolicy {
    /// Create an idle policy.
    #[must_use]
    pub fn new(config: StallConfig, now: Instant) -> Self {
        Self {
            config,
            turn_in_flight: false,
            turn: 0,
            phase: Phase::Idle,
            active_operations: 0,
            last_event: now,
            paused: false,
            restart_in_progress: false,
            suppression_reported: false,
            budget: RestartBudget::default(),
        }
    }

    /// Current phase as last reported.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Whether a requested restart has not yet been followed by activity.
    #[must_use]
    pub fn restart_in_progress(&self) -> bool {
        self.restart_in_progress
    }

    /// Restart budget.
    #[must_use]
    pub fn budget(&self) -> &RestartBudget {
        &self.budget
    }

    /// Fold one activity signal into the state.
    pub fn apply(&mut self, activity: Activity, now: Instant) {
        match activity {
            Activity::TurnStarted { turn } => {
                self.turn_in_flight = true;
                self.turn = turn;
                self.phase = Phase::Request;
                self.active_operations = 0;
                self.restart_in_progress = false;
                self.suppression_reported = false;
                self.last_event = now;
            }
            Activity::PhaseChanged {
                phase,
                active_operations,
            } => {
                self.phase = phase;
                self.active_operations = active_operations;
                self.mark_alive(now);
            }
            Activity::EventSeen => self.mark_alive(now),
            Activity::TurnEnded => {
                self.turn_in_flight = false;
                self.phase = Phase::Idle;
                self.active_operations = 0;
                self.paused = false;
                self.restart_in_progress = false;
            }
            Activity::Paused => self.paused = true,
            Activity::Resumed => {
                self.paused = false;
                self.last_event = now;
            }
        }
    }

    fn mark_alive(&mut self, now: Instant) {
        self.last_event = now;
        self.restart_in_progress = false;
        self.suppression_reported = false;
    }

    /// Evaluate one poll tick.
    pub fn tick(&mut self, now: Instant) -> Option<StallEvent> {
        if !self.turn_in_flight || self.restart_in_progress || self.paused {
            return None;
        }

        let idle = now.saturating_duration_since(self.last_event);
        if idle <= self.config.timeout_for(self.phase, self.active_operations) {
            return None;
        }

        self.budget.refresh(now, self.config.restart_cooldown());
        if !self.budget.allows(self.config.restart_limit) {
            if self.suppression_reported {
                return None;
            }
            self.suppression_reported = true;
            return Some(StallEvent::RestartSuppressed {
                turn: self.turn,
                phase: self.phase,
                idle,
                restart_count: self.budget.count(),
            });
        }

        self.budget.record(now);
        self.restart_in_progress = true;
        Some(StallEvent::RestartRequested {
            turn: self.turn,
            phase: self.phase,
            idle,
            restart_count: self.budget.count(),
        })
    }
}

/// Builder for the watchdog task.
pub struct StallMonitor {
    config: StallConfig,
    event_tx: mpsc::Sender<StallEvent>,
    cancel: CancellationToken,
}

impl StallMonitor {
    /// Construct a monitor (does not start the task yet).
    #[must_use]
    pub fn new(
        config: StallConfig,
        event_tx: mpsc::Sender<StallEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            event_tx,
            cancel,
        }
    }

    /// Spawn the polling task and return a handle for feeding it.
    #[must_use]
    pub fn spawn(self) -> StallMonitorHandle {
        let (activity_tx, activity_rx) = mpsc::unbounded_channel();
        let cancel = self.cancel.clone();
        let join_handle = tokio::spawn(
            Self::run(self.config, activity_rx, self.event_tx, self.cancel)
                .instrument(info_span!("stall_monitor")),
        );
        StallMonitorHandle {
            activity_tx,
            join_handle: Some(join_handle),
            cancel,
        }
    }

    async fn run(
        config: StallConfig,
        mut activity_rx: mpsc::UnboundedReceiver<(Activity, Instant)>,
        event_tx: mpsc::Sender<StallEvent>,
        cancel: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut policy = StallPolicy::new(config, Instant::now());

        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    debug!("stall monitor cancelled");
                    return;
                }

                msg = activity_rx.recv() => {
                    let Some((activity, at)) = msg else {
                        debug!("stall monitor: activity channel closed");
                        return;
                    };
                    policy.apply(activity, at);
                }

                _ = ticker.tick() => {
                    let Some(event) = policy.tick(Instant::now()) else {
                        continue;
                    };
                    match event {
                        StallEvent::RestartRequested { turn, phase, idle, restart_count } => warn!(
                            turn,
                            %phase,
                            idle_ms = u64::try_from(idle.as_millis()).unwrap_or(u64::MAX),
                            restart_count,
                            "agent stalled; requesting restart"
                        ),
                        StallEvent::RestartSuppressed { turn, phase, idle, restart_count } => warn!(
                            turn,
                            %phase,
                            idle_ms = u64::try_from(idle.as_millis()).unwrap_or(u64::MAX),
                            restart_count,
                            "agent stalled but restart budget is exhausted; waiting"
                        ),
                    }
                    if event_tx.send(event).await.is_err() {
                        debug!("stall monitor: event receiver dropped");
                        return;
                    }
                }
            }
        }
    }
}

/// Handle for reporting activity to the watchdog task.
///
/// Dropping the handle stops the task.
pub struct StallMonitorHandle {
    activity_tx: mpsc::UnboundedSender<(Activity, Instant)>,
    join_handle: Option<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl Drop for StallMonitorHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl StallMonitorHandle {
    /// Report one activity, stamped now.
    pub fn report(&self, activity: Activity) {
        if self.activity_tx.send((activity, Instant::now())).is_err() {
            debug!(?activity, "stall monitor stopped; activity dropped");
        }
    }

    /// Stop the task and wait for it to exit.
    pub async fn await_completion(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.join_handle.take() {
            let _ = handle.await;
        }
    }
}
