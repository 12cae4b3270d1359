//! Timer box: stays locked for a chosen duration, then opens.

use super::proxies::ProxySet;
use super::{ModuleContext, TickInput};
use crate::config::MetaBoxConfig;
use crate::sensor::{AnchorId, SensorSnapshot, TrackedObjectAnchor};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::info;

const ONE_SECOND: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TimerState {
    Configuring,
    Locked { remaining_secs: u32 },
    Unlockable,
}

impl fmt::Display for TimerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuring => f.write_str("configuring"),
            Self::Locked { remaining_secs } => write!(f, "locked({}s)", remaining_secs),
            Self::Unlockable => f.write_str("unlockable"),
        }
    }
}

/// Rejected timer input
#[derive(Debug, Clone, PartialEq)]
pub enum TimerError {
    ZeroDuration,
    MinutesOutOfRange(u32),
    SecondsOutOfRange(u32),
    AlreadyRunning { remaining_secs: u32 },
    StillLocked { remaining_secs: u32 },
}

impl fmt::Display for TimerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimerError::ZeroDuration => write!(f, "choose a lock time longer than zero"),
            TimerError::MinutesOutOfRange(m) => write!(f, "minutes out of range: {}", m),
            TimerError::SecondsOutOfRange(s) => write!(f, "seconds out of range: {}", s),
            TimerError::AlreadyRunning { remaining_secs } => {
                write!(f, "timer already running, {} s left", remaining_secs)
            }
            TimerError::StillLocked { remaining_secs } => {
                write!(f, "box is time-locked for another {} s", remaining_secs)
            }
        }
    }
}

impl std::error::Error for TimerError {}

pub struct TimerLock {
    max_minutes: u32,
    max_seconds: u32,
    skin_scale: f32,

    state: TimerState,
    /// Time accumulated toward the next whole-second decrement
    carry: Duration,
    proxies: ProxySet,
}

impl TimerLock {
    pub fn new(config: &MetaBoxConfig) -> Self {
        Self {
            max_minutes: config.timer.max_minutes,
            max_seconds: config.timer.max_seconds,
            skin_scale: config.skin.scale,
            state: TimerState::Configuring,
            carry: Duration::ZERO,
            proxies: ProxySet::default(),
        }
    }

    pub fn state(&self) -> TimerState {
        self.state
    }

    /// Remaining lock time as `MM:SS`.
    pub fn remaining_display(&self) -> String {
        let secs = match self.state {
            TimerState::Locked { remaining_secs } => remaining_secs,
            _ => 0,
        };
        format!("{:02}:{:02}", secs / 60, secs % 60)
    }

    pub async fn on_enter(&mut self, ctx: &ModuleContext<'_>, sensors: &SensorSnapshot) {
        for anchor in sensors.tracked_anchors() {
            self.proxies.spawn_skin(ctx.scene, anchor.id, self.skin_scale).await;
        }
    }

    /// Tear down. A running countdown is abandoned; the box can still be
    /// opened with a manual unlock afterwards.
    pub async fn on_exit(&mut self, ctx: &ModuleContext<'_>) {
        self.proxies.release_all(ctx.scene).await;
        if let TimerState::Locked { remaining_secs } = self.state {
            info!(remaining_secs, "Countdown abandoned on exit");
        }
        self.set_state(TimerState::Configuring);
        self.carry = Duration::ZERO;
    }

    pub async fn on_anchor_added(&mut self, ctx: &ModuleContext<'_>, anchor: &TrackedObjectAnchor) {
        self.proxies.spawn_skin(ctx.scene, anchor.id, self.skin_scale).await;
    }

    pub async fn on_anchor_removed(&mut self, ctx: &ModuleContext<'_>, anchor: AnchorId) {
        self.proxies.release_anchor(ctx.scene, anchor).await;
    }

    /// Lock the box for `minutes:seconds`.
    pub fn start(&mut self, minutes: u32, seconds: u32) -> Result<(), TimerError> {
        if let TimerState::Locked { remaining_secs } = self.state {
            return Err(TimerError::AlreadyRunning { remaining_secs });
        }
        if minutes > self.max_minutes {
            return Err(TimerError::MinutesOutOfRange(minutes));
        }
        if seconds > self.max_seconds {
            return Err(TimerError::SecondsOutOfRange(seconds));
        }

        // max_minutes comes from config and may be large enough to overflow
        let total = minutes
            .checked_mul(60)
            .and_then(|secs| secs.checked_add(seconds))
            .ok_or(TimerError::MinutesOutOfRange(minutes))?;
        if total == 0 {
            return Err(TimerError::ZeroDuration);
        }

        self.carry = Duration::ZERO;
        self.set_state(TimerState::Locked {
            remaining_secs: total,
        });
        Ok(())
    }

    /// Advance the countdown by the tick's elapsed time.
    pub fn on_tick(&mut self, ctx: &ModuleContext<'_>, input: &TickInput<'_>) {
        let TimerState::Locked { mut remaining_secs } = self.state else {
            return;
        };

        self.carry += input.dt;
        while self.carry >= ONE_SECOND && remaining_secs > 0 {
            self.carry -= ONE_SECOND;
            remaining_secs -= 1;
        }

        if remaining_secs == 0 {
            self.carry = Duration::ZERO;
            self.set_state(TimerState::Unlockable);
            ctx.unlocker.request_unlock("timer");
        } else {
            self.state = TimerState::Locked { remaining_secs };
        }
    }

    /// Operator presses unlock. Fires every time it is allowed.
    pub fn operator_unlock(&mut self, ctx: &ModuleContext<'_>) -> Result<(), TimerError> {
        if let TimerState::Locked { remaining_secs } = self.state {
            return Err(TimerError::StillLocked { remaining_secs });
        }
        ctx.unlocker.request_unlock("timer");
        self.set_state(TimerState::Configuring);
        Ok(())
    }

    fn set_state(&mut self, next: TimerState) {
        if self.state != next {
            info!(from = %self.state, to = %next, "Timer state changed");
            self.state = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::InMemoryScene;
    use crate::unlock::RecordingUnlocker;

    fn tick(lock: &mut TimerLock, ctx: &ModuleContext<'_>, dt: Duration) {
        let sensors = SensorSnapshot::default();
        lock.on_tick(
            ctx,
            &TickInput {
                sensors: &sensors,
                dt,
            },
        );
    }

    #[test]
    fn test_zero_duration_never_starts() {
        let scene = InMemoryScene::new();
        let unlocker = RecordingUnlocker::new();
        let ctx = ModuleContext {
            scene: &scene,
            unlocker: &unlocker,
        };
        let mut lock = TimerLock::new(&MetaBoxConfig::default());

        assert_eq!(lock.start(0, 0), Err(TimerError::ZeroDuration));
        assert_eq!(lock.state(), TimerState::Configuring);

        for _ in 0..5 {
            tick(&mut lock, &ctx, ONE_SECOND);
        }
        assert_eq!(lock.state(), TimerState::Configuring);
        assert_eq!(unlocker.count(), 0);
    }

    #[test]
    fn test_out_of_range_fields_rejected() {
        let mut lock = TimerLock::new(&MetaBoxConfig::default());
        assert_eq!(lock.start(60, 0), Err(TimerError::MinutesOutOfRange(60)));
        assert_eq!(lock.start(0, 60), Err(TimerError::SecondsOutOfRange(60)));
        assert_eq!(lock.state(), TimerState::Configuring);
    }

    #[test]
    fn test_huge_configured_limit_does_not_overflow() {
        let mut config = MetaBoxConfig::default();
        config.timer.max_minutes = u32::MAX;
        let mut lock = TimerLock::new(&config);

        assert_eq!(
            lock.start(u32::MAX, 59),
            Err(TimerError::MinutesOutOfRange(u32::MAX))
        );
        assert_eq!(lock.state(), TimerState::Configuring);

        lock.start(1_000, 0).unwrap();
        assert_eq!(
            lock.state(),
            TimerState::Locked {
                remaining_secs: 60_000
            }
        );
    }

    #[test]
    fn test_countdown_fires_exactly_once_after_n_ticks() {
        let scene = InMemoryScene::new();
        let unlocker = RecordingUnlocker::new();
        let ctx = ModuleContext {
            scene: &scene,
            unlocker: &unlocker,
        };
        let mut lock = TimerLock::new(&MetaBoxConfig::default());
        lock.start(0, 3).unwrap();

        tick(&mut lock, &ctx, ONE_SECOND);
        assert_eq!(lock.state(), TimerState::Locked { remaining_secs: 2 });
        tick(&mut lock, &ctx, ONE_SECOND);
        assert_eq!(unlocker.count(), 0);
        tick(&mut lock, &ctx, ONE_SECOND);

        assert_eq!(lock.state(), TimerState::Unlockable);
        assert_eq!(unlocker.count(), 1);

        for _ in 0..10 {
            tick(&mut lock, &ctx, ONE_SECOND);
        }
        assert_eq!(unlocker.count(), 1);
    }

    #[test]
    fn test_fast_ticks_accumulate_to_seconds() {
        let scene = InMemoryScene::new();
        let unlocker = RecordingUnlocker::new();
        let ctx = ModuleContext {
            scene: &scene,
            unlocker: &unlocker,
        };
        let mut lock = TimerLock::new(&MetaBoxConfig::default());
        lock.start(0, 1).unwrap();

        // 199 ticks of 5 ms: just short of a second
        for _ in 0..199 {
            tick(&mut lock, &ctx, Duration::from_millis(5));
        }
        assert_eq!(lock.state(), TimerState::Locked { remaining_secs: 1 });

        tick(&mut lock, &ctx, Duration::from_millis(5));
        assert_eq!(lock.state(), TimerState::Unlockable);
        assert_eq!(unlocker.count(), 1);
    }

    #[test]
    fn test_late_tick_consumes_several_seconds() {
        let scene = InMemoryScene::new();
        let unlocker = RecordingUnlocker::new();
        let ctx = ModuleContext {
            scene: &scene,
            unlocker: &unlocker,
        };
        let mut lock = TimerLock::new(&MetaBoxConfig::default());
        lock.start(1, 0).unwrap();

        tick(&mut lock, &ctx, Duration::from_millis(2500));
        assert_eq!(lock.state(), TimerState::Locked { remaining_secs: 58 });
        assert_eq!(lock.remaining_display(), "00:58");
    }

    #[test]
    fn test_start_while_locked_rejected() {
        let mut lock = TimerLock::new(&MetaBoxConfig::default());
        lock.start(1, 30).unwrap();
        assert_eq!(lock.remaining_display(), "01:30");
        assert_eq!(
            lock.start(0, 5),
            Err(TimerError::AlreadyRunning { remaining_secs: 90 })
        );
    }

    #[test]
    fn test_operator_unlock_policy() {
        let scene = InMemoryScene::new();
        let unlocker = RecordingUnlocker::new();
        let ctx = ModuleContext {
            scene: &scene,
            unlocker: &unlocker,
        };
        let mut lock = TimerLock::new(&MetaBoxConfig::default());
        lock.start(0, 1).unwrap();

        assert_eq!(
            lock.operator_unlock(&ctx),
            Err(TimerError::StillLocked { remaining_secs: 1 })
        );

        tick(&mut lock, &ctx, ONE_SECOND);
        assert_eq!(unlocker.count(), 1);

        lock.operator_unlock(&ctx).unwrap();
        assert_eq!(lock.state(), TimerState::Configuring);
        assert_eq!(unlocker.count(), 2);

        // No repeat guard: every manual press goes out
        lock.operator_unlock(&ctx).unwrap();
        assert_eq!(unlocker.count(), 3);
    }

    #[tokio::test]
    async fn test_exit_abandons_countdown() {
        let scene = InMemoryScene::new();
        let unlocker = RecordingUnlocker::new();
        let ctx = ModuleContext {
            scene: &scene,
            unlocker: &unlocker,
        };
        let mut lock = TimerLock::new(&MetaBoxConfig::default());
        lock.on_enter(&ctx, &SensorSnapshot::default()).await;
        lock.start(0, 10).unwrap();

        lock.on_exit(&ctx).await;
        assert_eq!(lock.state(), TimerState::Configuring);

        tick(&mut lock, &ctx, Duration::from_secs(20));
        assert_eq!(unlocker.count(), 0);
    }
}
