//! Closed-loop displacement primitives.
//!
//! Every primitive is one invocation of the same fixed-period loop: read
//! the profile's position signal, run the base PID toward the tick target,
//! blend in the drift correction, shape the pair through the output stage,
//! write it through the primitive's wheel sign mapping, sleep the remainder
//! of the period, and stop once the position crosses the target. The
//! primitives differ only in their [`MotionProfile`] and sign mapping; that
//! configuration space is the whole of the per-primitive variation.
//!
//! Primitives block until the crossing rule fires or the profile's timeout
//! expires. There is no cancellation path; the drivetrain value is borrowed
//! mutably for the duration, so nothing else can command the wheels.

use core::time::Duration;

use log::{debug, warn};
use snafu::Snafu;

use crate::config::{DriveConfig, MotionProfile, PositionSource};
use crate::hardware::{Clock, DriveMotors, EncoderPair};
use crate::output::{OutputStage, WheelMapping};
use crate::pid::Pid;

#[derive(Debug, Snafu)]
pub enum MotionError {
    /// The termination predicate never fired within the profile's timeout.
    #[snafu(display(
        "motion did not converge: {progress:.0}/{target:.0} ticks after {timeout:?}"
    ))]
    DidNotConverge {
        timeout: Duration,
        target: f64,
        progress: f64,
    },
    /// The absolute position reference kept reporting invalid fixes.
    #[snafu(display("no valid pose fix after {attempts} consecutive samples"))]
    NoValidFix { attempts: u32 },
    /// Heading alignment exhausted its pulse budget.
    #[snafu(display("heading alignment still {error:.1} deg off after {pulses} pulses"))]
    AlignmentStalled { pulses: u32, error: f64 },
    /// Boundary seeking exhausted its nudge budget.
    #[snafu(display("boundary seek stopped at {position:.1} after {nudges} nudges"))]
    BoundaryNotReached { nudges: u32, position: f64 },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SpeedProfile {
    Normal,
    Slow,
    Fast,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TurnDirection {
    Left,
    Right,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SweepSide {
    Left,
    Right,
}

/// The drivetrain: exclusive owner of the encoder pair, the two drive
/// channels, and the clock, plus the tuning for every primitive class.
///
/// Constructed once at program start and threaded through explicitly;
/// primitives take `&mut self`, so sequential, non-reentrant invocation is
/// enforced by the borrow checker rather than by convention.
pub struct Drivetrain<E, M, C> {
    pub(crate) encoders: E,
    pub(crate) motors: M,
    pub(crate) clock: C,
    pub config: DriveConfig,
}

impl<E: EncoderPair, M: DriveMotors, C: Clock> Drivetrain<E, M, C> {
    pub fn new(encoders: E, motors: M, clock: C, config: DriveConfig) -> Self {
        Self {
            encoders,
            motors,
            clock,
            config,
        }
    }

    /// Drives a straight line of `distance` units, negative for backward.
    /// Blocks until the measured position crosses the target.
    pub fn drive_straight(
        &mut self,
        distance: f64,
        speed: SpeedProfile,
    ) -> Result<(), MotionError> {
        let profile = match speed {
            SpeedProfile::Normal => self.config.drive,
            SpeedProfile::Slow => self.config.drive_slow,
            SpeedProfile::Fast => self.config.drive_fast,
        };
        let mapping = if distance >= 0.0 {
            WheelMapping::FORWARD
        } else {
            WheelMapping::BACKWARD
        };
        self.run("drive_straight", distance.abs(), &profile, mapping)
    }

    /// Turns in place through `arc_length` units of wheel travel.
    pub fn turn_in_place(
        &mut self,
        arc_length: f64,
        direction: TurnDirection,
    ) -> Result<(), MotionError> {
        let profile = self.config.turn;
        let mapping = match direction {
            TurnDirection::Left => WheelMapping::TURN_LEFT,
            TurnDirection::Right => WheelMapping::TURN_RIGHT,
        };
        self.run("turn_in_place", arc_length.abs(), &profile, mapping)
    }

    /// Pivots around one stationary wheel through `arc_length` units of
    /// travel on the driven wheel. Negative arc length pivots backward.
    pub fn sweep_turn(&mut self, arc_length: f64, side: SweepSide) -> Result<(), MotionError> {
        let mut profile = self.config.sweep;
        let backward = arc_length < 0.0;
        let mapping = match (side, backward) {
            (SweepSide::Right, false) => WheelMapping::SWEEP_RIGHT,
            (SweepSide::Right, true) => WheelMapping::SWEEP_RIGHT_BACK,
            (SweepSide::Left, false) => WheelMapping::SWEEP_LEFT,
            (SweepSide::Left, true) => WheelMapping::SWEEP_LEFT_BACK,
        };
        // Sweeping pivots around the stationary wheel; only the driven
        // wheel's encoder carries a signal.
        profile.position = match side {
            SweepSide::Left => PositionSource::LeftWheel,
            SweepSide::Right => PositionSource::RightWheel,
        };
        self.run("sweep_turn", arc_length.abs(), &profile, mapping)
    }

    /// Open-loop straight drive at `power` percent for a fixed duration,
    /// negative for backward. Used for approach and settle impulses where
    /// closed-loop control has nothing to measure.
    pub fn drive_timed(&mut self, power: f64, duration: Duration) {
        self.motors.set_left_percent(-power);
        self.motors.set_right_percent(power);
        self.clock.sleep(duration);
        self.stop();
    }

    /// Open-loop in-place rotation at `power` percent for a fixed duration.
    /// Positive power pivots to the right.
    pub fn rotate_timed(&mut self, power: f64, duration: Duration) {
        self.motors.set_left_percent(-power);
        self.motors.set_right_percent(-power);
        self.clock.sleep(duration);
        self.stop();
    }

    /// Zeroes both drive channels.
    pub fn stop(&mut self) {
        self.motors.set_left_percent(0.0);
        self.motors.set_right_percent(0.0);
    }

    fn position(&self, source: PositionSource) -> f64 {
        match source {
            PositionSource::LeftWheel => f64::from(self.encoders.left_counts()),
            PositionSource::RightWheel => f64::from(self.encoders.right_counts()),
            PositionSource::Average => {
                f64::from(self.encoders.left_counts() + self.encoders.right_counts()) / 2.0
            }
        }
    }

    /// The shared primitive loop. `distance` is unsigned; direction lives
    /// entirely in `mapping`.
    fn run(
        &mut self,
        label: &str,
        distance: f64,
        profile: &MotionProfile,
        mapping: WheelMapping,
    ) -> Result<(), MotionError> {
        let target = distance * self.config.ticks_per_unit;
        if target <= 0.0 {
            debug!("{label}: nothing to do");
            return Ok(());
        }

        self.encoders.reset_counts();
        let started = self.clock.now();
        let mut base_pid = Pid::new(profile.gains);
        base_pid.reset(started);
        let mut drift_pid = profile.drift_gains.map(|gains| {
            let mut pid = Pid::new(gains);
            pid.reset(started);
            pid
        });
        let mut stage = OutputStage::new(profile.limits);

        loop {
            let position = self.position(profile.position);
            let now = self.clock.now();
            let base = base_pid.update(target, position, now);
            let drift = match drift_pid.as_mut() {
                Some(pid) => {
                    let skew = self.encoders.left_counts() - self.encoders.right_counts();
                    pid.update(0.0, f64::from(skew), now)
                }
                None => 0.0,
            };

            let (out_left, out_right) = stage.apply(base + drift, base - drift);
            self.motors.set_left_percent(mapping.left * out_left);
            self.motors.set_right_percent(mapping.right * out_right);

            self.clock.sleep(self.config.period);

            // Crossing rule: stop once the position read at the top of this
            // cycle has passed the target. A slight overshoot is the
            // designed stopping behavior; there is no dead zone.
            if target - position < 0.0 {
                debug!("{label}: done ({position:.0}/{target:.0} ticks)");
                break;
            }
            if let Some(timeout) = profile.timeout
                && self.clock.now().saturating_sub(started) >= timeout
            {
                self.stop();
                warn!("{label}: did not converge ({position:.0}/{target:.0} ticks)");
                return Err(MotionError::DidNotConverge {
                    timeout,
                    target,
                    progress: position,
                });
            }
        }

        if let Some(settle) = profile.settle {
            self.motors.set_left_percent(mapping.left * settle.power);
            self.motors.set_right_percent(mapping.right * settle.power);
            self.clock.sleep(settle.duration);
        }
        self.stop();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SettleImpulse;
    use crate::sim::{SimParams, SimRobot};

    fn drivetrain(
        sim: &SimRobot,
        config: DriveConfig,
    ) -> Drivetrain<crate::sim::SimEncoders, crate::sim::SimMotors, crate::sim::SimClock> {
        Drivetrain::new(sim.encoders(), sim.motors(), sim.clock(), config)
    }

    #[test]
    fn drive_straight_crosses_target_with_bounded_overshoot() {
        let sim = SimRobot::new(SimParams::default());
        let config = DriveConfig::default();
        let period = config.period.as_secs_f64();
        let ceiling = config.drive.limits.ceiling;
        let mut drive = drivetrain(&sim, config);

        drive.drive_straight(10.0, SpeedProfile::Normal).expect("converges");

        let target = 10.0 * 28.0;
        let (_, right) = sim.ticks();
        assert!(right >= target, "terminates at or past the target");
        // Bound: the last measurement crossed by at most one period of full
        // travel, and the final pacing sleep adds at most one more.
        let max_travel_per_period = ceiling / 100.0 * SimParams::default().full_speed
            * SimParams::default().ticks_per_unit
            * period;
        assert!(
            right - target <= 2.0 * max_travel_per_period,
            "overshoot {:.1} exceeds bound {:.1}",
            right - target,
            2.0 * max_travel_per_period
        );
        assert_eq!(sim.outputs(), (0.0, 0.0), "ends in a full stop");
    }

    #[test]
    fn shaped_outputs_respect_floor_ceiling_and_slew() {
        let sim = SimRobot::new(SimParams::default());
        let config = DriveConfig::default();
        let limits = config.drive.limits;
        let mut drive = drivetrain(&sim, config);

        drive.drive_straight(10.0, SpeedProfile::Normal).expect("converges");

        let trace = sim.trace();
        assert!(trace.len() > 5);
        let mut prev = (0.0f64, 0.0f64);
        for &(left, right) in &trace {
            for (cmd, last) in [(left, prev.0), (right, prev.1)] {
                if cmd != 0.0 {
                    assert!(cmd.abs() >= limits.floor - 1e-9, "floor violated: {cmd}");
                    assert!(cmd.abs() <= limits.ceiling + 1e-9, "ceiling violated: {cmd}");
                }
                // Slew invariant, modulo the documented snap from rest onto
                // the floor.
                let delta = (cmd - last).abs();
                assert!(
                    delta <= limits.slew_step + 1e-9 || (last == 0.0 && delta <= limits.floor + 1e-9),
                    "slew violated: {last} -> {cmd}"
                );
            }
            prev = (left, right);
        }
    }

    #[test]
    fn drift_correction_reduces_encoder_imbalance() {
        let skewed = SimParams {
            left_efficiency: 0.9,
            ..SimParams::default()
        };

        let sim = SimRobot::new(skewed.clone());
        let mut drive = drivetrain(&sim, DriveConfig::default());
        drive.drive_straight(10.0, SpeedProfile::Normal).expect("converges");
        let (left, right) = sim.ticks();
        let imbalance_corrected = (left - right).abs();

        let sim = SimRobot::new(skewed);
        let mut config = DriveConfig::default();
        config.drive.drift_gains = None;
        let mut drive = drivetrain(&sim, config);
        drive.drive_straight(10.0, SpeedProfile::Normal).expect("converges");
        let (left, right) = sim.ticks();
        let imbalance_raw = (left - right).abs();

        assert!(
            imbalance_corrected < imbalance_raw,
            "correction {imbalance_corrected:.1} should beat raw {imbalance_raw:.1}"
        );
    }

    #[test]
    fn stalled_drive_reports_did_not_converge() {
        // Zero efficiency: the wheels never move, the crossing rule never
        // fires, and the slow profile's timeout aborts the primitive.
        let sim = SimRobot::new(SimParams {
            left_efficiency: 0.0,
            right_efficiency: 0.0,
            ..SimParams::default()
        });
        let mut drive = drivetrain(&sim, DriveConfig::default());

        let err = drive.drive_straight(10.0, SpeedProfile::Slow).unwrap_err();
        match err {
            MotionError::DidNotConverge { progress, .. } => assert_eq!(progress, 0.0),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(sim.outputs(), (0.0, 0.0), "abort stops the motors");
    }

    #[test]
    fn zero_distance_is_a_clean_no_op() {
        let sim = SimRobot::new(SimParams::default());
        let mut drive = drivetrain(&sim, DriveConfig::default());
        drive.drive_straight(0.0, SpeedProfile::Normal).expect("no-op");
        assert_eq!(sim.outputs(), (0.0, 0.0));
        assert_eq!(sim.ticks(), (0.0, 0.0));
        assert!(sim.trace().is_empty(), "no cycle ran");
    }

    #[test]
    fn backward_drive_flips_the_sign_mapping() {
        let sim = SimRobot::new(SimParams::default());
        let mut drive = drivetrain(&sim, DriveConfig::default());
        drive.drive_straight(-6.0, SpeedProfile::Normal).expect("converges");

        assert!(sim.pose().x < 0.0, "heading 0 drives backward along -x");
        let (_, right) = sim.ticks();
        assert!(right >= 6.0 * 28.0);
        assert_eq!(sim.outputs(), (0.0, 0.0));
    }

    #[test]
    fn turn_in_place_drives_wheels_in_matching_channel_signs() {
        let sim = SimRobot::new(SimParams::default());
        let mut drive = drivetrain(&sim, DriveConfig::default());
        drive.turn_in_place(5.0, TurnDirection::Left).expect("converges");

        // Left turn writes the same sign to both mirror-mounted channels.
        let trace = sim.trace();
        let moving: Vec<_> = trace.iter().filter(|(l, r)| *l != 0.0 && *r != 0.0).collect();
        assert!(!moving.is_empty());
        for (left, right) in moving {
            assert!(*left > 0.0 && *right > 0.0);
        }
        assert!(sim.pose().heading > 0.0, "left turn raises the heading");
    }

    #[test]
    fn sweep_turn_parks_the_inner_wheel() {
        let sim = SimRobot::new(SimParams::default());
        let mut drive = drivetrain(&sim, DriveConfig::default());
        drive.sweep_turn(5.0, SweepSide::Right).expect("converges");

        for (left, _) in sim.trace() {
            assert_eq!(left, 0.0, "left wheel stays parked in a right sweep");
        }
        let (left, right) = sim.ticks();
        assert_eq!(left, 0.0);
        assert!(right >= 5.0 * 28.0);
    }

    #[test]
    fn backward_sweep_flips_the_driven_wheel() {
        let sim = SimRobot::new(SimParams::default());
        let mut drive = drivetrain(&sim, DriveConfig::default());
        drive.sweep_turn(-3.0, SweepSide::Left).expect("converges");

        let moving: Vec<_> = sim.trace().into_iter().filter(|(l, _)| *l != 0.0).collect();
        assert!(!moving.is_empty());
        for (left, right) in moving {
            assert!(left > 0.0, "backward left sweep drives the left channel positive");
            assert_eq!(right, 0.0);
        }
    }

    #[test]
    fn settle_impulse_fires_after_crossing() {
        let sim = SimRobot::new(SimParams::default());
        let mut config = DriveConfig::default();
        config.drive.settle = Some(SettleImpulse {
            power: -20.0,
            duration: Duration::from_millis(100),
        });
        let mut drive = drivetrain(&sim, config);
        drive.drive_straight(5.0, SpeedProfile::Normal).expect("converges");

        let trace = sim.trace();
        // Forward mapping puts -power on the left channel; the settle
        // impulse shows up as the final recorded command, then a full stop.
        let (left, right) = *trace.last().unwrap();
        assert_eq!((left, right), (20.0, -20.0));
        assert_eq!(sim.outputs(), (0.0, 0.0));
    }

    #[test]
    fn end_to_end_scenario_matches_tuned_constants() {
        // target 10 units, kp 0.4 / ki 0.01, floor 8, ceiling 60, slew 7,
        // 20 ms period, starting at rest.
        let sim = SimRobot::new(SimParams::default());
        let config = DriveConfig::default();
        assert_eq!(config.drive.gains.kp, 0.4);
        assert_eq!(config.drive.gains.ki, 0.01);
        let mut drive = drivetrain(&sim, config);

        drive.drive_straight(10.0, SpeedProfile::Normal).expect("converges");

        let positions = sim.position_log();
        assert!(
            positions.windows(2).all(|w| w[1] >= w[0]),
            "position is monotonically non-decreasing"
        );
        let (_, right) = sim.ticks();
        assert!(right >= 10.0 * 28.0);
        assert_eq!(sim.outputs(), (0.0, 0.0));
    }
}
