use super::config::HysteresisConfig;

/// Two-level fan drive with a dead band between the thresholds.
#[derive(Debug, PartialEq, Clone, Copy)]
pub enum HysteresisState {
    Low,
    High,
}

impl HysteresisState {
    pub fn from_temperature(temp: f32, previous: HysteresisState, config: &HysteresisConfig) -> Self {
        if temp > config.high_c {
            HysteresisState::High
        } else if temp < config.low_c {
            HysteresisState::Low
        } else {
            previous
        }
    }

    pub fn duty(self, config: &HysteresisConfig) -> u8 {
        match self {
            HysteresisState::Low => config.low_duty,
            HysteresisState::High => config.high_duty,
        }
    }
}
