//! Reconciliation engine: decides when a detected power-state change becomes
//! a committed threshold mode.
//!
//! The engine is a single task multiplexing presence-change notifications,
//! one debounce timer, a periodic resync tick, the event-source error
//! channel, and a shutdown signal. One event is handled per iteration and
//! every decision is persisted before the handler returns, so the on-disk
//! record always matches the last decision taken. All I/O errors are fatal:
//! the loop stops and the supervisor owns restart, which is safe because
//! startup recovery reconstructs a consistent state from the record plus a
//! fresh presence read.

use crate::config::ModeProfile;
use crate::error::{EngineError, PowerError};
use crate::mode::Mode;
use crate::power::{PresenceProbe, Subscription};
use crate::schedule::PersistentSchedule;
use crate::threshold::ApplyThresholds;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Timing knobs for the run loop.
#[derive(Debug, Clone, Copy)]
pub struct EngineTiming {
    pub resync_interval: Duration,
    pub drift_threshold: Duration,
}

/// What a handler wants done with the single debounce timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerAction {
    Keep,
    Disarm,
    Arm(Duration),
}

pub struct Engine<P, A> {
    schedule: PersistentSchedule,
    docked: ModeProfile,
    mobile: ModeProfile,
    timing: EngineTiming,
    probe: P,
    applier: A,
}

impl<P: PresenceProbe, A: ApplyThresholds> Engine<P, A> {
    pub fn new(
        schedule: PersistentSchedule,
        docked: ModeProfile,
        mobile: ModeProfile,
        timing: EngineTiming,
        probe: P,
        applier: A,
    ) -> Self {
        Self {
            schedule,
            docked,
            mobile,
            timing,
            probe,
            applier,
        }
    }

    fn profile(&self, mode: Mode) -> &ModeProfile {
        match mode {
            Mode::Docked => &self.docked,
            Mode::Mobile => &self.mobile,
        }
    }

    /// Fresh presence read plus the mode and debounce delay it implies.
    /// Presence is never cached across decisions.
    fn desired(&self) -> Result<(Mode, Duration), EngineError> {
        let online = self.probe.ac_online()?;
        let mode = Mode::for_presence(online);
        Ok((mode, self.profile(mode).delay))
    }

    /// Startup recovery, run once before the loop.
    ///
    /// A zero-delay schedule is used both for a never-initialized record and
    /// for an untracked transition that happened while the daemon was down:
    /// the debounce window exists to filter transient toggles observed live,
    /// which does not apply to unknown downtime.
    fn recover(&mut self) -> Result<TimerAction, EngineError> {
        let (desired, _) = self.desired()?;
        let current = self.schedule.mode();
        let scheduled = self.schedule.scheduled_mode();

        if current.is_none() {
            self.schedule.set_scheduled_mode(desired, Duration::ZERO)?;
            info!(mode = %desired, "recovery: no prior state, initializing");
            return Ok(TimerAction::Arm(Duration::ZERO));
        }

        if Some(desired) != current && Some(desired) != scheduled {
            self.schedule.set_scheduled_mode(desired, Duration::ZERO)?;
            info!(mode = %desired, "recovery: untracked transition, catching up");
            return Ok(TimerAction::Arm(Duration::ZERO));
        }

        if let Some(target) = self.schedule.scheduled_mode() {
            let remaining = self.schedule.remaining_for(target);
            info!(target = %target, remaining = ?remaining, "recovery: resuming pending schedule");
            return Ok(TimerAction::Arm(remaining));
        }

        debug!(mode = ?current, "recovery: state consistent, nothing pending");
        Ok(TimerAction::Keep)
    }

    /// A presence-change notification arrived.
    fn handle_presence_change(&mut self) -> Result<TimerAction, EngineError> {
        let (desired, delay) = self.desired()?;

        if Some(desired) == self.schedule.mode() {
            // Already in the desired mode: drop any pending transition and
            // re-affirm the record idempotently.
            self.schedule.set_mode(desired)?;
            debug!(mode = %desired, "presence change matches committed mode");
            return Ok(TimerAction::Disarm);
        }

        self.refresh_schedule(desired, delay).map(TimerAction::Arm)
    }

    /// Persist a schedule for `target`. A transition already in flight keeps
    /// its remaining time instead of restarting the full delay, so repeated
    /// events never double-penalize it.
    fn refresh_schedule(&mut self, target: Mode, delay: Duration) -> Result<Duration, EngineError> {
        let remaining = self.schedule.remaining_for(target);
        let delay = if remaining > Duration::ZERO {
            remaining
        } else {
            delay
        };

        self.schedule.set_scheduled_mode(target, delay)?;
        info!(target = %target, delay = ?delay, "scheduled mode change");
        Ok(delay)
    }

    /// The debounce timer fired: commit the persisted target, if any.
    ///
    /// The target is re-read from the record rather than cached so a fire
    /// that races a drift recomputation commits whatever was last persisted,
    /// and a spurious fire after commit is a no-op.
    fn handle_timer_fire(&mut self) -> Result<(), EngineError> {
        let Some(target) = self.schedule.scheduled_mode() else {
            debug!("timer fired with no pending schedule, ignoring");
            return Ok(());
        };

        let threshold = self.profile(target).threshold();
        self.schedule.set_mode(target)?;
        self.applier.apply(threshold)?;
        info!(mode = %target, %threshold, "mode committed");
        Ok(())
    }

    /// Periodic resync: when the wall clock jumped (suspend/resume) while a
    /// schedule is pending, re-arm from the persisted absolute deadline.
    fn handle_resync_tick(&mut self, drift: Duration) -> Result<TimerAction, EngineError> {
        if drift <= self.timing.drift_threshold {
            return Ok(TimerAction::Keep);
        }

        let Some(target) = self.schedule.scheduled_mode() else {
            return Ok(TimerAction::Keep);
        };

        let remaining = self.schedule.remaining_for(target);
        warn!(
            drift = ?drift,
            target = %target,
            remaining = ?remaining,
            "clock drift with pending schedule, re-arming timer"
        );
        self.schedule.set_scheduled_mode(target, remaining)?;
        Ok(TimerAction::Arm(remaining))
    }

    /// Run until a fatal error or shutdown. The subscription is released on
    /// every exit path.
    pub async fn run(
        mut self,
        mut subscription: Subscription,
        shutdown: watch::Receiver<bool>,
    ) -> Result<(), EngineError> {
        let result = self.run_loop(&mut subscription, shutdown).await;
        subscription.cancel.cancel();
        result
    }

    async fn run_loop(
        &mut self,
        subscription: &mut Subscription,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<(), EngineError> {
        let timer = tokio::time::sleep(Duration::ZERO);
        tokio::pin!(timer);
        let mut timer_armed = false;

        match self.recover()? {
            TimerAction::Keep => {}
            TimerAction::Disarm => {}
            TimerAction::Arm(delay) => {
                timer.as_mut().reset(Instant::now() + delay);
                timer_armed = true;
            }
        }

        let mut ticker = tokio::time::interval(self.timing.resync_interval);
        // After a suspend, exactly one late tick should carry the drift.
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately; consume it so drift
        // measurement starts from a real interval.
        let mut last_tick = ticker.tick().await;

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    // A dropped sender counts as a shutdown request.
                    if changed.is_err() || *shutdown.borrow() {
                        info!("shutdown signal received, stopping engine");
                        return Ok(());
                    }
                }

                event = subscription.events.recv() => {
                    if event.is_none() {
                        return Err(PowerError::SubscriptionClosed.into());
                    }
                    // The notification payload is advisory; the decision
                    // always uses a fresh presence read.
                    match self.handle_presence_change()? {
                        TimerAction::Keep => {}
                        TimerAction::Disarm => timer_armed = false,
                        TimerAction::Arm(delay) => {
                            timer.as_mut().reset(Instant::now() + delay);
                            timer_armed = true;
                        }
                    }
                }

                _ = &mut timer, if timer_armed => {
                    timer_armed = false;
                    self.handle_timer_fire()?;
                }

                now = ticker.tick() => {
                    let actual = now - last_tick;
                    last_tick = now;
                    let expected = self.timing.resync_interval;
                    let drift = if actual >= expected {
                        actual - expected
                    } else {
                        expected - actual
                    };

                    match self.handle_resync_tick(drift)? {
                        TimerAction::Keep => {}
                        TimerAction::Disarm => timer_armed = false,
                        TimerAction::Arm(delay) => {
                            timer.as_mut().reset(Instant::now() + delay);
                            timer_armed = true;
                        }
                    }
                }

                err = subscription.errors.recv() => {
                    return Err(err.unwrap_or(PowerError::SubscriptionClosed).into());
                }
            }
        }
    }
}
