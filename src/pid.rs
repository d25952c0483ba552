use core::time::Duration;

use serde::{Deserialize, Serialize};

/// Hard ceiling on any controller output, matching the drive's absolute
/// command range. Per-motion ceilings are enforced later by the output stage.
pub const OUTPUT_LIMIT: f64 = 100.0;

/// Elapsed times below this are treated as a scheduling hiccup: the
/// controller state is left untouched and the previous output is reused.
const MIN_DT: f64 = 1e-6;

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PidGains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    #[serde(default)]
    pub kf: f64,
}

impl PidGains {
    pub const fn new(kp: f64, ki: f64, kd: f64, kf: f64) -> Self {
        Self { kp, ki, kd, kf }
    }
}

/// Bounded PID controller with a feedforward term.
///
/// The integral and derivative terms scale by the wall-clock time between
/// calls, not by a fixed constant, so scheduling jitter feeds straight into
/// both. That sensitivity is an accepted property of this controller; pacing
/// lives in the motion loop, not here.
#[derive(Copy, Clone, Debug)]
pub struct Pid {
    pub gains: PidGains,
    integral: f64,
    prev_error: Option<f64>,
    last_time: Option<Duration>,
    last_output: f64,
}

impl Pid {
    pub fn new(gains: PidGains) -> Self {
        Self {
            gains,
            integral: 0.0,
            prev_error: None,
            last_time: None,
            last_output: 0.0,
        }
    }

    /// Computes the next control output for a target/measurement pair.
    ///
    /// Must be preceded by [`reset`](Self::reset) when the controller is
    /// reused for a new target; stale accumulated error corrupts the first
    /// cycles of the next motion.
    pub fn update(&mut self, target: f64, measurement: f64, now: Duration) -> f64 {
        let dt = self.last_time.map(|last| now.saturating_sub(last).as_secs_f64());
        if let Some(dt) = dt
            && dt < MIN_DT
        {
            return self.last_output;
        }

        let error = target - measurement;
        let derivative = match (self.prev_error, dt) {
            (Some(prev), Some(dt)) => (error - prev) / dt,
            _ => 0.0,
        };
        if let Some(dt) = dt {
            self.integral += error * dt;
        }
        self.prev_error = Some(error);
        self.last_time = Some(now);

        let output = self.gains.kp * error
            + self.gains.ki * self.integral
            + self.gains.kd * derivative
            + self.gains.kf * target;
        self.last_output = output.clamp(-OUTPUT_LIMIT, OUTPUT_LIMIT);
        self.last_output
    }

    /// Clears accumulated state and re-arms the timestamp at `now`.
    pub fn reset(&mut self, now: Duration) {
        self.integral = 0.0;
        self.prev_error = None;
        self.last_time = Some(now);
        self.last_output = 0.0;
    }
}
