//! Over-temperature interlock.

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub struct EmergencyEvent {
    /// Chain that tripped, or `None` when raised from the cross-chain view.
    pub chain: Option<u8>,
    pub max_c: f32,
    pub reason: &'static str,
}

impl fmt::Display for EmergencyEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.chain {
            Some(chain) => write!(f, "chain {chain}: {} ({:.1}°C)", self.reason, self.max_c),
            None => write!(f, "{} ({:.1}°C)", self.reason, self.max_c),
        }
    }
}

/// Reacts to a dangerous temperature. The daemon's handler powers every
/// chain off and terminates the process.
pub trait EmergencyHandler: Send + Sync {
    fn trip(&self, event: &EmergencyEvent);
}
