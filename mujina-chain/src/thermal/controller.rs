use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Instant;

use super::aggregate::{AggregateTemp, ThermalAggregate};
use super::config::{FanMode, ThermalConfig};
use super::emergency::{EmergencyEvent, EmergencyHandler};
use super::fan_pid::FanPIDController;
use super::hysteresis::HysteresisState;
use crate::hw_trait::{FanPwm, Result};
use crate::tracing::prelude::*;

pub const FULL_SPEED: u8 = 100;

/// Output of the decision process
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ControlDecision {
    /// Fail state: power the chains off
    Shutdown(&'static str),
    /// Pass these parameters to PID and let it calculate fan speed
    UsePid { target_c: f32, input_c: f32 },
    UseFixedSpeed(u8),
    /// Feed the temperature through the two-level hysteresis drive
    UseHysteresis(f32),
    /// No fans configured
    Nothing,
}

impl ControlDecision {
    pub fn decide(config: &ThermalConfig, temp: AggregateTemp) -> Self {
        if let AggregateTemp::Known { max_c, .. } = temp {
            if config.is_danger(max_c) {
                return Self::Shutdown("temperature dangerous");
            }
        }
        if config.pwm_chips.is_empty() {
            return Self::Nothing;
        }
        match config.fan_mode {
            FanMode::Emergency => return Self::UseFixedSpeed(FULL_SPEED),
            FanMode::Manual => return Self::UseFixedSpeed(config.manual_speed),
            FanMode::Auto | FanMode::Hysteresis => {}
        }
        let AggregateTemp::Known { control_c, .. } = temp else {
            return Self::UseFixedSpeed(FULL_SPEED);
        };
        if control_c >= config.hot_temperature_c {
            return Self::UseFixedSpeed(FULL_SPEED);
        }
        match config.fan_mode {
            FanMode::Hysteresis => Self::UseHysteresis(control_c),
            _ => Self::UsePid {
                target_c: config.target_temperature_c,
                input_c: control_c,
            },
        }
    }
}

/// Drives the fans from the cross-chain temperature view.
pub struct FanController<F: FanPwm> {
    config: ThermalConfig,
    aggregate: Arc<ThermalAggregate>,
    fan: F,
    emergency: Arc<dyn EmergencyHandler>,
    pid: FanPIDController,
    hysteresis: HysteresisState,
    temp: AggregateTemp,
    started: Instant,
    last_tick: Option<Instant>,
    duty: Option<u8>,
    tripped: bool,
}

impl<F: FanPwm> FanController<F> {
    pub fn new(
        config: ThermalConfig,
        aggregate: Arc<ThermalAggregate>,
        fan: F,
        emergency: Arc<dyn EmergencyHandler>,
    ) -> Self {
        let gains = config.pid;
        Self {
            config,
            aggregate,
            fan,
            emergency,
            pid: FanPIDController::new(
                gains.kp,
                gains.ki,
                gains.kd,
                gains.offset,
                gains.integral_limit,
            ),
            hysteresis: HysteresisState::High,
            temp: AggregateTemp::Unknown,
            started: Instant::now(),
            last_tick: None,
            duty: None,
            tripped: false,
        }
    }

    pub fn duty(&self) -> Option<u8> {
        self.duty
    }

    #[cfg(test)]
    fn set_started(&mut self, started: Instant) {
        self.started = started;
    }

    pub fn run(mut self, stop: &AtomicBool) {
        let tick = self.config.fan_tick();
        info!(mode = %self.config.fan_mode, "Fan control started");
        while !stop.load(Ordering::Relaxed) {
            if let Err(e) = self.tick(Instant::now()) {
                warn!(error = %e, "Fan update failed");
            }
            thread::sleep(tick);
        }
        debug!("Fan control stopped");
    }

    /// One control step. Returns the decision taken, if new data or the
    /// first tick made one necessary.
    pub fn tick(&mut self, now: Instant) -> Result<Option<ControlDecision>> {
        match self.aggregate.take_update() {
            Some(temp) => self.temp = temp,
            None if self.duty.is_some() => return Ok(None),
            None => {}
        }

        let dt = self
            .last_tick
            .map(|last| now.saturating_duration_since(last))
            .unwrap_or(self.config.fan_tick());
        self.last_tick = Some(now);

        let decision = ControlDecision::decide(&self.config, self.temp);
        let duty = match decision {
            ControlDecision::Shutdown(reason) => {
                self.apply(FULL_SPEED)?;
                if !self.tripped {
                    self.tripped = true;
                    let max_c = match self.temp {
                        AggregateTemp::Known { max_c, .. } => max_c,
                        AggregateTemp::Unknown => f32::NAN,
                    };
                    let chain = match self.temp {
                        AggregateTemp::Known { hottest_chain, .. } => Some(hottest_chain),
                        AggregateTemp::Unknown => None,
                    };
                    error!(max_c = %max_c, reason, "Thermal emergency");
                    self.emergency.trip(&EmergencyEvent {
                        chain,
                        max_c,
                        reason,
                    });
                }
                return Ok(Some(decision));
            }
            ControlDecision::UseFixedSpeed(duty) => duty,
            ControlDecision::UsePid { target_c, input_c } => {
                let min = if now.saturating_duration_since(self.started) < self.config.warm_up() {
                    self.config.warm_up_min_duty
                } else {
                    self.config.min_duty
                };
                self.pid.set_limits(f32::from(min), f32::from(FULL_SPEED));
                let duty = self.pid.duty(input_c, target_c, dt);
                debug!(
                    input_c = %input_c,
                    target_c = %target_c,
                    integral_sum = %self.pid.integral_sum,
                    duty,
                    "Fan PID step"
                );
                duty
            }
            ControlDecision::UseHysteresis(temp) => {
                self.hysteresis =
                    HysteresisState::from_temperature(temp, self.hysteresis, &self.config.hysteresis);
                self.hysteresis.duty(&self.config.hysteresis)
            }
            ControlDecision::Nothing => return Ok(Some(decision)),
        };
        self.apply(duty)?;
        Ok(Some(decision))
    }

    fn apply(&mut self, duty: u8) -> Result<()> {
        if self.duty == Some(duty) {
            return Ok(());
        }
        info!(previous = ?self.duty, duty, "Fan speed changed");
        self.fan.set_duty(duty)?;
        self.duty = Some(duty);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::emergency::testing::RecordingHandler;
    use super::super::stats::TempStats;
    use super::*;
    use crate::hw_trait::pwm::fake::FakeFan;
    use std::time::Duration;

    macro_rules! assert_variant {
        ($value:expr, $pattern:pat) => {{
            let value = &$value;
            if let $pattern = value {
            } else {
                panic!(
                    r#"assertion failed (value doesn't match pattern):
                        value: `{:?}`,
                        pattern: `{}`"#,
                    value,
                    stringify!($pattern)
                )
            }
        }};
    }

    fn known(control_c: f32, max_c: f32) -> AggregateTemp {
        AggregateTemp::Known {
            control_c,
            max_c,
            hottest_chain: 0,
        }
    }

    fn stats(mean: f32, max: f32) -> TempStats {
        TempStats {
            min: mean,
            max,
            median: mean,
            mean,
            samples: 1,
        }
    }

    #[test]
    fn should_decide_by_mode_and_temperature() {
        let mut config = ThermalConfig::default();

        assert_variant!(
            ControlDecision::decide(&config, known(70.0, 110.0)),
            ControlDecision::Shutdown(_)
        );
        assert_variant!(
            ControlDecision::decide(&config, known(70.0, 109.9)),
            ControlDecision::UsePid { .. }
        );
        assert_eq!(
            ControlDecision::decide(&config, AggregateTemp::Unknown),
            ControlDecision::UseFixedSpeed(100)
        );
        assert_eq!(
            ControlDecision::decide(&config, known(95.0, 96.0)),
            ControlDecision::UseFixedSpeed(100)
        );

        config.fan_mode = FanMode::Manual;
        config.manual_speed = 40;
        assert_eq!(
            ControlDecision::decide(&config, AggregateTemp::Unknown),
            ControlDecision::UseFixedSpeed(40)
        );

        config.fan_mode = FanMode::Emergency;
        assert_eq!(
            ControlDecision::decide(&config, known(30.0, 30.0)),
            ControlDecision::UseFixedSpeed(100)
        );

        config.fan_mode = FanMode::Hysteresis;
        assert_eq!(
            ControlDecision::decide(&config, known(50.0, 55.0)),
            ControlDecision::UseHysteresis(50.0)
        );

        config.pwm_chips.clear();
        assert_eq!(
            ControlDecision::decide(&config, known(50.0, 55.0)),
            ControlDecision::Nothing
        );
        assert_variant!(
            ControlDecision::decide(&config, known(50.0, 120.0)),
            ControlDecision::Shutdown(_)
        );
    }

    fn controller(
        config: ThermalConfig,
    ) -> (
        FanController<FakeFan>,
        Arc<ThermalAggregate>,
        FakeFan,
        Arc<RecordingHandler>,
    ) {
        let aggregate = Arc::new(ThermalAggregate::new());
        let fan = FakeFan::default();
        let handler = Arc::new(RecordingHandler::default());
        let controller =
            FanController::new(config, aggregate.clone(), fan.clone(), handler.clone());
        (controller, aggregate, fan, handler)
    }

    #[test]
    fn should_run_full_speed_until_temperature_is_known() {
        let (mut controller, aggregate, fan, _) = controller(ThermalConfig::default());
        aggregate.register_chain(0);

        controller.tick(Instant::now()).unwrap();
        assert_eq!(fan.last(), Some(100));
    }

    #[test]
    fn should_write_pwm_only_on_change() {
        let config = ThermalConfig {
            fan_mode: FanMode::Manual,
            manual_speed: 50,
            ..Default::default()
        };
        let (mut controller, aggregate, fan, _) = controller(config);
        let now = Instant::now();

        controller.tick(now).unwrap();
        assert_eq!(controller.tick(now).unwrap(), None);
        aggregate.publish(0, stats(60.0, 62.0));
        controller.tick(now).unwrap();

        assert_eq!(fan.writes(), 1);
        assert_eq!(fan.last(), Some(50));
    }

    #[test]
    fn should_hold_warm_up_floor_then_release_it() {
        let (mut controller, aggregate, fan, _) = controller(ThermalConfig::default());
        let start = Instant::now();
        controller.set_started(start);

        aggregate.publish(0, stats(20.0, 22.0));
        controller.tick(start).unwrap();
        assert_eq!(fan.last(), Some(60));

        aggregate.publish(0, stats(20.0, 22.0));
        controller.tick(start + Duration::from_secs(301)).unwrap();
        assert_eq!(fan.last(), Some(1));
    }

    #[test]
    fn should_trip_emergency_once_and_run_fans_flat_out() {
        let config = ThermalConfig {
            fan_mode: FanMode::Manual,
            manual_speed: 30,
            ..Default::default()
        };
        let (mut controller, aggregate, fan, handler) = controller(config);
        let now = Instant::now();

        aggregate.publish(3, stats(90.0, 112.0));
        assert_variant!(controller.tick(now).unwrap(), Some(ControlDecision::Shutdown(_)));
        aggregate.publish(3, stats(90.0, 113.0));
        controller.tick(now).unwrap();

        assert_eq!(fan.last(), Some(100));
        assert_eq!(handler.count(), 1);
        assert_eq!(handler.events.lock()[0].chain, Some(3));
    }

    #[test]
    fn should_follow_hysteresis_band() {
        let config = ThermalConfig {
            fan_mode: FanMode::Hysteresis,
            ..Default::default()
        };
        let (mut controller, aggregate, fan, _) = controller(config);
        let now = Instant::now();

        for (temp, expected) in [(30.0, 60), (50.0, 60), (66.0, 100), (50.0, 100)] {
            aggregate.publish(0, stats(temp, temp));
            controller.tick(now).unwrap();
            assert_eq!(fan.last(), Some(expected), "at {temp}°C");
        }
    }
}
