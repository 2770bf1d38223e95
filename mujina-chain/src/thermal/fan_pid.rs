use std::time::Duration;

/// Fan duty PID. The error is `input - target`, so a chain running hot
/// pushes the duty up from `offset`.
#[derive(Debug, Clone)]
pub struct FanPIDController {
    pub proportional_gain: f32,
    pub integral_sum: f32,
    pub integral_gain: f32,
    pub integral_min: f32,
    pub integral_max: f32,
    pub derivative_gain: f32,
    pub offset: f32,
    output_min: f32,
    output_max: f32,
    last_error: Option<f32>,
}

impl FanPIDController {
    pub fn new(
        proportional_gain: f32,
        integral_gain: f32,
        derivative_gain: f32,
        offset: f32,
        integral_limit: f32,
    ) -> Self {
        Self {
            proportional_gain,
            integral_sum: 0.0,
            integral_gain,
            integral_min: -integral_limit.abs(),
            integral_max: integral_limit.abs(),
            derivative_gain,
            offset,
            output_min: 0.0,
            output_max: 100.0,
            last_error: None,
        }
    }

    pub fn set_limits(&mut self, min: f32, max: f32) {
        self.output_min = min;
        self.output_max = max;
    }

    /// Raw controller output, unclamped.
    pub fn update(
        &mut self,
        error: f32,
        time_since_last_update: Duration,
        freeze_integral: bool,
    ) -> f32 {
        let dt_s = time_since_last_update.as_secs_f32();

        if !freeze_integral {
            self.integral_sum += error * dt_s;
            self.integral_sum = self
                .integral_sum
                .clamp(self.integral_min, self.integral_max);
        }

        let derivative = match self.last_error {
            Some(last) if dt_s > 0.0 => (error - last) / dt_s,
            _ => 0.0,
        };
        self.last_error = Some(error);

        self.offset
            + self.proportional_gain * error
            + self.integral_gain * self.integral_sum
            + self.derivative_gain * derivative
    }

    /// Step the controller and return a duty percentage inside the limits.
    /// The integral stops winding while the output is saturated.
    pub fn duty(&mut self, input: f32, target: f32, dt: Duration) -> u8 {
        let error = input - target;
        let saturated = {
            let probe = self.offset
                + self.proportional_gain * error
                + self.integral_gain * self.integral_sum;
            (probe >= self.output_max && error > 0.0) || (probe <= self.output_min && error < 0.0)
        };
        let output = self.update(error, dt, saturated);
        // The ceiling wins if the limits cross.
        output.max(self.output_min).min(self.output_max).round() as u8
    }

    pub fn reset(&mut self) {
        self.integral_sum = 0.0;
        self.last_error = None;
    }
}
