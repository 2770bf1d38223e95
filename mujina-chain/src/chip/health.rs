//! Per-chip health: Active, Cooldown, Disabled.
//!
//! ```text
//!            probe fails                 recheck succeeds
//!  Active ───────────────► Cooldown ─────────────────────► Active
//!                            │  ▲
//!          recheck fails     │  │ (restart cooldown)
//!                            └──┘
//!                            │
//!                            │ failures reach threshold
//!                            ▼
//!                         Disabled (terminal)
//! ```
//!
//! The chain drives every transition; nothing here runs on a timer.

use serde::Serialize;
use std::time::{Duration, Instant};
use strum::Display;

pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(30);

/// Consecutive failed probes, counting the one that started the first
/// cooldown, after which a chip is given up on.
pub const DEFAULT_DISABLE_THRESHOLD: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthPolicy {
    pub cooldown: Duration,
    pub disable_threshold: u32,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            cooldown: DEFAULT_COOLDOWN,
            disable_threshold: DEFAULT_DISABLE_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, Serialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Active,
    Cooldown,
    Disabled,
}

/// What a recorded outcome did to the chip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Unchanged,
    EnteredCooldown,
    CooldownRestarted,
    Recovered,
    /// Returned once, on the failure that crossed the threshold.
    Disabled,
}

#[derive(Debug, Clone, Default)]
pub struct ChipHealth {
    disabled: bool,
    cooldown_begin: Option<Instant>,
    fail_count: u32,
}

impl ChipHealth {
    pub fn state(&self) -> HealthState {
        if self.disabled {
            HealthState::Disabled
        } else if self.cooldown_begin.is_some() {
            HealthState::Cooldown
        } else {
            HealthState::Active
        }
    }

    pub fn is_active(&self) -> bool {
        self.state() == HealthState::Active
    }

    pub fn fail_count(&self) -> u32 {
        self.fail_count
    }

    /// Whether a cooling chip is due for a recovery probe at `now`.
    pub fn recheck_due(&self, now: Instant, policy: &HealthPolicy) -> bool {
        match (self.disabled, self.cooldown_begin) {
            (false, Some(begin)) => now.saturating_duration_since(begin) >= policy.cooldown,
            _ => false,
        }
    }

    /// Record a failed register read or job write.
    pub fn record_failure(&mut self, now: Instant, policy: &HealthPolicy) -> Transition {
        if self.disabled {
            return Transition::Unchanged;
        }

        self.fail_count += 1;
        if self.fail_count >= policy.disable_threshold {
            self.disabled = true;
            self.cooldown_begin = None;
            return Transition::Disabled;
        }

        let restarted = self.cooldown_begin.replace(now).is_some();
        if restarted {
            Transition::CooldownRestarted
        } else {
            Transition::EnteredCooldown
        }
    }

    /// Record a successful register read.
    pub fn record_success(&mut self) -> Transition {
        if self.disabled {
            return Transition::Unchanged;
        }
        self.fail_count = 0;
        if self.cooldown_begin.take().is_some() {
            Transition::Recovered
        } else {
            Transition::Unchanged
        }
    }

    /// Disable without a failure history, e.g. too few working cores.
    /// Returns whether the chip was not already disabled.
    pub fn disable(&mut self) -> bool {
        let changed = !self.disabled;
        self.disabled = true;
        self.cooldown_begin = None;
        changed
    }
}
