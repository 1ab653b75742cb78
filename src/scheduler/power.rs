use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use tokio::sync::watch;

use crate::config::PowerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PowerState {
    Active,
    Idle,
    Sleep,
    DeepSleep,
}

impl PowerState {
    /// Background pipeline tick interval at this power state, as a
    /// multiplier over the configured base interval.
    pub fn tick_multiplier(&self) -> u32 {
        match self {
            PowerState::Active => 1,
            PowerState::Idle => 3,
            PowerState::Sleep => 10,
            PowerState::DeepSleep => 30,
        }
    }
}

/// Tracks the last-activity timestamp and derives the current power state
/// from it. Cheap to call from the HTTP hook handlers on every request;
/// the background pipeline watches the derived state via a `watch`
/// channel instead of polling the clock itself.
pub struct PowerController {
    last_activity_unix: AtomicI64,
    config: PowerConfig,
    state_tx: watch::Sender<PowerState>,
}

impl PowerController {
    pub fn new(config: PowerConfig) -> (std::sync::Arc<Self>, watch::Receiver<PowerState>) {
        let (state_tx, state_rx) = watch::channel(PowerState::Active);
        let controller = std::sync::Arc::new(Self {
            last_activity_unix: AtomicI64::new(now_unix()),
            config,
            state_tx,
        });
        (controller, state_rx)
    }

    pub fn record_activity(&self) {
        self.last_activity_unix.store(now_unix(), Ordering::Relaxed);
        let _ = self.state_tx.send_if_modified(|current| {
            if *current != PowerState::Active {
                *current = PowerState::Active;
                true
            } else {
                false
            }
        });
    }

    /// Recomputes the power state from elapsed idle time and publishes it
    /// if it changed. Called periodically by the scheduler's own tick.
    pub fn refresh(&self) -> PowerState {
        let idle_secs = now_unix().saturating_sub(self.last_activity_unix.load(Ordering::Relaxed));
        let state = if idle_secs >= self.config.deep_sleep_after_secs as i64 {
            PowerState::DeepSleep
        } else if idle_secs >= self.config.sleep_after_secs as i64 {
            PowerState::Sleep
        } else if idle_secs >= self.config.idle_after_secs as i64 {
            PowerState::Idle
        } else {
            PowerState::Active
        };
        let _ = self.state_tx.send_if_modified(|current| {
            if *current != state {
                *current = state;
                true
            } else {
                false
            }
        });
        state
    }

    pub fn current(&self) -> PowerState {
        *self.state_tx.borrow()
    }
}

fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

pub fn tick_interval(base: Duration, state: PowerState) -> Duration {
    base.saturating_mul(state.tick_multiplier())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> PowerConfig {
        PowerConfig {
            idle_after_secs: 0,
            sleep_after_secs: 0,
            deep_sleep_after_secs: 0,
        }
    }

    #[test]
    fn record_activity_resets_to_active() {
        let (controller, _rx) = PowerController::new(config());
        controller.refresh();
        controller.record_activity();
        assert_eq!(controller.current(), PowerState::Active);
    }

    #[test]
    fn tick_interval_scales_with_state() {
        let base = Duration::from_secs(60);
        assert_eq!(tick_interval(base, PowerState::Active), Duration::from_secs(60));
        assert_eq!(tick_interval(base, PowerState::DeepSleep), Duration::from_secs(1800));
    }
}
