//! Output stage between the controllers and the drive channels: per-cycle
//! slew limiting, minimum-effective-output snapping, saturation, and the
//! fixed per-primitive wheel sign mappings.

use serde::{Deserialize, Serialize};

/// Output shaping bounds for one primitive class.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OutputLimits {
    /// Smallest magnitude that reliably moves the drivetrain. Nonzero
    /// commands below it stall the motors, so they get snapped up to it.
    pub floor: f64,
    /// Largest magnitude this primitive class may command.
    pub ceiling: f64,
    /// Largest allowed change in commanded output per control cycle. Bounds
    /// acceleration, not speed.
    pub slew_step: f64,
}

/// Fixed sign pair mapping shaped outputs onto the mirror-mounted drive
/// channels. Each primitive flips a different combination; `0.0` parks that
/// wheel (sweep turns).
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct WheelMapping {
    pub left: f64,
    pub right: f64,
}

impl WheelMapping {
    pub const FORWARD: Self = Self { left: -1.0, right: 1.0 };
    pub const BACKWARD: Self = Self { left: 1.0, right: -1.0 };
    pub const TURN_LEFT: Self = Self { left: 1.0, right: 1.0 };
    pub const TURN_RIGHT: Self = Self { left: -1.0, right: -1.0 };
    pub const SWEEP_RIGHT: Self = Self { left: 0.0, right: 1.0 };
    pub const SWEEP_RIGHT_BACK: Self = Self { left: 0.0, right: -1.0 };
    pub const SWEEP_LEFT: Self = Self { left: -1.0, right: 0.0 };
    pub const SWEEP_LEFT_BACK: Self = Self { left: 1.0, right: 0.0 };
}

/// Converts raw control outputs into actuator-safe wheel commands.
///
/// Holds the previous cycle's shaped pair as the slew reference; one stage
/// lives for exactly one primitive invocation.
pub struct OutputStage {
    limits: OutputLimits,
    last_left: f64,
    last_right: f64,
}

impl OutputStage {
    pub fn new(limits: OutputLimits) -> Self {
        Self {
            limits,
            last_left: 0.0,
            last_right: 0.0,
        }
    }

    /// Shapes a raw command pair: slew limit against the previous cycle,
    /// snap nonzero magnitudes up to the floor, clamp to the ceiling.
    pub fn apply(&mut self, raw_left: f64, raw_right: f64) -> (f64, f64) {
        let left = Self::shape(raw_left, self.last_left, &self.limits);
        let right = Self::shape(raw_right, self.last_right, &self.limits);
        self.last_left = left;
        self.last_right = right;
        (left, right)
    }

    fn shape(raw: f64, last: f64, limits: &OutputLimits) -> f64 {
        let mut out = raw;
        if out - last > limits.slew_step {
            out = last + limits.slew_step;
        } else if out - last < -limits.slew_step {
            out = last - limits.slew_step;
        }
        // Exact zero means "no output"; picking a sign for the floor snap
        // would divide by zero.
        if out != 0.0 {
            if out.abs() < limits.floor {
                out = limits.floor * out.signum();
            } else if out.abs() > limits.ceiling {
                out = limits.ceiling * out.signum();
            }
        }
        out
    }

    pub fn last(&self) -> (f64, f64) {
        (self.last_left, self.last_right)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIMITS: OutputLimits = OutputLimits {
        floor: 8.0,
        ceiling: 60.0,
        slew_step: 7.0,
    };

    #[test]
    fn slew_limits_the_delta_not_the_value() {
        let mut stage = OutputStage::new(LIMITS);
        // Ramp to a settled 20: floor snap, then two slew-limited steps.
        assert_eq!(stage.apply(20.0, 20.0), (8.0, 8.0));
        assert_eq!(stage.apply(20.0, 20.0), (15.0, 15.0));
        assert_eq!(stage.apply(20.0, 20.0), (20.0, 20.0));
        // 20 -> 50 requested, only +7 allowed.
        assert_eq!(stage.apply(50.0, 50.0), (27.0, 27.0));
        // Downward deltas clamp symmetrically.
        assert_eq!(stage.apply(0.0, 0.0), (20.0, 20.0));
    }

    #[test]
    fn floor_snap_preserves_sign() {
        let mut stage = OutputStage::new(LIMITS);
        let (l, r) = stage.apply(3.0, -3.0);
        assert_eq!(l, 8.0);
        assert_eq!(r, -8.0);
    }

    #[test]
    fn exact_zero_skips_the_floor_snap() {
        let mut stage = OutputStage::new(LIMITS);
        assert_eq!(stage.apply(0.0, 0.0), (0.0, 0.0));
    }

    #[test]
    fn ceiling_clamps_magnitude() {
        let mut stage = OutputStage::new(OutputLimits {
            slew_step: 1000.0,
            ..LIMITS
        });
        assert_eq!(stage.apply(95.0, -95.0), (60.0, -60.0));
    }

    #[test]
    fn ramp_from_rest_obeys_slew_once_past_the_floor() {
        let mut stage = OutputStage::new(LIMITS);
        let mut outputs = Vec::new();
        for _ in 0..12 {
            let (l, _) = stage.apply(100.0, 100.0);
            outputs.push(l);
        }
        // First cycle snaps from rest onto the floor; every later delta
        // stays within the slew step until the ceiling holds it flat.
        assert_eq!(outputs[0], 8.0);
        let mut prev = outputs[0];
        for &out in &outputs[1..] {
            assert!((out - prev).abs() <= LIMITS.slew_step + 1e-9);
            prev = out;
        }
        assert_eq!(*outputs.last().unwrap(), 60.0);
    }
}
