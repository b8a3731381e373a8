use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::clamp_polling_interval;
use crate::coordinator::CoordinatorHandle;
use crate::{log_debug, log_info, log_warn};

/// Period of the base clock the throttle is sampled on.
pub const BASE_CLOCK_PERIOD: Duration = Duration::from_millis(50);

// --- Public types ---

/// Result of a scheduler run, returned to the caller for summary display.
#[derive(Debug, PartialEq)]
pub struct RunSummary {
    pub ticks: u64,
    /// Sessions that went idle on their own during one of our ticks.
    pub sessions_finished: u32,
    pub halt_reason: HaltReason,
}

#[derive(Debug, PartialEq)]
pub enum HaltReason {
    ShutdownRequested,
    CoordinatorClosed,
}

/// Lets a tick through only once `interval` has passed since the last one.
#[derive(Debug, Clone)]
pub struct TickThrottle {
    interval: Duration,
    last_tick: Option<Instant>,
}

impl TickThrottle {
    /// The interval is clamped to the configured polling bounds.
    pub fn new(interval: Duration) -> Self {
        let ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        Self {
            interval: clamp_polling_interval(ms),
            last_tick: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Whether a tick is due at `now`. Records `now` when it is.
    pub fn should_tick(&mut self, now: Instant) -> bool {
        let due = match self.last_tick {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        };
        if due {
            self.last_tick = Some(now);
        }
        due
    }
}

// --- Main loop ---

/// Drive the coordinator with throttled ticks until cancelled.
///
/// Ticks are awaited one at a time, so a slow poll delays the next tick
/// instead of overlapping it.
pub async fn run_scheduler(
    coordinator: CoordinatorHandle,
    polling_interval: Duration,
    cancel: CancellationToken,
) -> RunSummary {
    let mut throttle = TickThrottle::new(polling_interval);
    let mut clock = tokio::time::interval(BASE_CLOCK_PERIOD.min(throttle.interval()));
    clock.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut ticks = 0u64;
    let mut sessions_finished = 0u32;

    log_debug!(
        "[scheduler] Polling every {} ms",
        throttle.interval().as_millis()
    );

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                log_info!("[scheduler] Shutdown requested after {} ticks", ticks);
                return RunSummary {
                    ticks,
                    sessions_finished,
                    halt_reason: HaltReason::ShutdownRequested,
                };
            }
            now = clock.tick() => {
                if !throttle.should_tick(now) {
                    continue;
                }
                match coordinator.tick().await {
                    Ok(outcome) => {
                        ticks += 1;
                        if outcome.finished {
                            sessions_finished += 1;
                        }
                    }
                    Err(e) => {
                        log_warn!("[scheduler] Stopping: {}", e);
                        return RunSummary {
                            ticks,
                            sessions_finished,
                            halt_reason: HaltReason::CoordinatorClosed,
                        };
                    }
                }
            }
        }
    }
}
