//! Deterministic simulated robot for the test suite.
//!
//! A first-order differential-drive plant behind shared handles that
//! implement the [`hardware`](crate::hardware) traits. The fake clock's
//! `sleep` is what advances the plant, so a control loop paced by it steps
//! the simulation exactly once per cycle and every run is reproducible.
//! Unequal wheel efficiencies inject the drivetrain skew the drift
//! controller exists to fight.

use core::time::Duration;
use std::cell::RefCell;
use std::rc::Rc;

use crate::hardware::{Clock, DriveMotors, EncoderPair, PoseReference, PoseSample};
use crate::utils::wrap_heading;

/// Plant parameters.
#[derive(Clone, Debug)]
pub struct SimParams {
    /// Encoder ticks per distance unit, matching the drive configuration.
    pub ticks_per_unit: f64,
    /// Wheel speed in units per second at 100% command.
    pub full_speed: f64,
    /// Distance between the two wheels, in units.
    pub track_width: f64,
    /// Per-wheel efficiency factors; unequal values model mechanical skew.
    pub left_efficiency: f64,
    pub right_efficiency: f64,
}

impl Default for SimParams {
    fn default() -> Self {
        Self {
            ticks_per_unit: 28.0,
            full_speed: 50.0,
            track_width: 8.0,
            left_efficiency: 1.0,
            right_efficiency: 1.0,
        }
    }
}

struct SimState {
    params: SimParams,
    now: Duration,
    left_cmd: f64,
    right_cmd: f64,
    left_ticks: f64,
    right_ticks: f64,
    x: f64,
    y: f64,
    /// Heading in degrees, counterclockwise positive, unwrapped.
    heading: f64,
    total_rotation: f64,
    /// Command pair active during each clock sleep.
    trace: Vec<(f64, f64)>,
    /// Right-wheel tick count after each clock sleep.
    position_log: Vec<f64>,
}

impl SimState {
    fn step(&mut self, dt: Duration) {
        let dt_s = dt.as_secs_f64();
        let p = &self.params;
        // The drives are mirror-mounted: the left channel is inverted on
        // the way to the wheel, exactly as on the robot.
        let vl = -self.left_cmd / 100.0 * p.full_speed * p.left_efficiency;
        let vr = self.right_cmd / 100.0 * p.full_speed * p.right_efficiency;

        self.left_ticks += vl.abs() * p.ticks_per_unit * dt_s;
        self.right_ticks += vr.abs() * p.ticks_per_unit * dt_s;

        let v = 0.5 * (vl + vr);
        let w = ((vr - vl) / p.track_width).to_degrees();
        let heading_rad = self.heading.to_radians();
        self.x += v * heading_rad.cos() * dt_s;
        self.y += v * heading_rad.sin() * dt_s;
        self.heading += w * dt_s;
        self.total_rotation += (w * dt_s).abs();
        self.now += dt;
    }
}

/// Handle to one simulated robot. Clones of the hardware handles all share
/// the same plant state.
pub struct SimRobot {
    state: Rc<RefCell<SimState>>,
}

impl SimRobot {
    pub fn new(params: SimParams) -> Self {
        Self {
            state: Rc::new(RefCell::new(SimState {
                params,
                now: Duration::ZERO,
                left_cmd: 0.0,
                right_cmd: 0.0,
                left_ticks: 0.0,
                right_ticks: 0.0,
                x: 0.0,
                y: 0.0,
                heading: 0.0,
                total_rotation: 0.0,
                trace: Vec::new(),
                position_log: Vec::new(),
            })),
        }
    }

    pub fn encoders(&self) -> SimEncoders {
        SimEncoders {
            state: Rc::clone(&self.state),
        }
    }

    pub fn motors(&self) -> SimMotors {
        SimMotors {
            state: Rc::clone(&self.state),
        }
    }

    pub fn clock(&self) -> SimClock {
        SimClock {
            state: Rc::clone(&self.state),
        }
    }

    /// An always-valid pose reference.
    pub fn pose_reference(&self) -> SimPoseReference {
        self.pose_reference_with_dropout(0)
    }

    /// A pose reference whose first `dropout` samples report no fix.
    pub fn pose_reference_with_dropout(&self, dropout: u32) -> SimPoseReference {
        SimPoseReference {
            state: Rc::clone(&self.state),
            dropout,
        }
    }

    pub fn set_pose(&self, x: f64, y: f64, heading: f64) {
        let mut state = self.state.borrow_mut();
        state.x = x;
        state.y = y;
        state.heading = heading;
    }

    pub fn pose(&self) -> PoseSample {
        let state = self.state.borrow();
        PoseSample {
            x: state.x,
            y: state.y,
            heading: wrap_heading(state.heading),
        }
    }

    /// Encoder accumulators since the last reset, in fractional ticks.
    pub fn ticks(&self) -> (f64, f64) {
        let state = self.state.borrow();
        (state.left_ticks, state.right_ticks)
    }

    /// Commands currently applied to the two channels.
    pub fn outputs(&self) -> (f64, f64) {
        let state = self.state.borrow();
        (state.left_cmd, state.right_cmd)
    }

    /// Command pair that was active during each clock sleep.
    pub fn trace(&self) -> Vec<(f64, f64)> {
        self.state.borrow().trace.clone()
    }

    /// Right-wheel tick count after each clock sleep.
    pub fn position_log(&self) -> Vec<f64> {
        self.state.borrow().position_log.clone()
    }

    /// Total rotation magnitude since construction, degrees.
    pub fn total_rotation(&self) -> f64 {
        self.state.borrow().total_rotation
    }
}

pub struct SimEncoders {
    state: Rc<RefCell<SimState>>,
}

impl EncoderPair for SimEncoders {
    fn reset_counts(&mut self) {
        let mut state = self.state.borrow_mut();
        state.left_ticks = 0.0;
        state.right_ticks = 0.0;
    }

    fn left_counts(&self) -> i32 {
        self.state.borrow().left_ticks as i32
    }

    fn right_counts(&self) -> i32 {
        self.state.borrow().right_ticks as i32
    }
}

pub struct SimMotors {
    state: Rc<RefCell<SimState>>,
}

impl DriveMotors for SimMotors {
    fn set_left_percent(&mut self, percent: f64) {
        self.state.borrow_mut().left_cmd = percent;
    }

    fn set_right_percent(&mut self, percent: f64) {
        self.state.borrow_mut().right_cmd = percent;
    }
}

pub struct SimClock {
    state: Rc<RefCell<SimState>>,
}

impl Clock for SimClock {
    fn now(&self) -> Duration {
        self.state.borrow().now
    }

    fn sleep(&mut self, duration: Duration) {
        let mut state = self.state.borrow_mut();
        let active = (state.left_cmd, state.right_cmd);
        state.trace.push(active);
        state.step(duration);
        let position = state.right_ticks;
        state.position_log.push(position);
    }
}

pub struct SimPoseReference {
    state: Rc<RefCell<SimState>>,
    dropout: u32,
}

impl PoseReference for SimPoseReference {
    fn sample(&mut self) -> Option<PoseSample> {
        if self.dropout > 0 {
            self.dropout -= 1;
            return None;
        }
        let state = self.state.borrow();
        Some(PoseSample {
            x: state.x,
            y: state.y,
            heading: wrap_heading(state.heading),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_command_advances_both_wheels_equally() {
        let sim = SimRobot::new(SimParams::default());
        let mut motors = sim.motors();
        let mut clock = sim.clock();
        // Forward convention: left channel inverted.
        motors.set_left_percent(-50.0);
        motors.set_right_percent(50.0);
        clock.sleep(Duration::from_secs(1));

        let (left, right) = sim.ticks();
        assert_eq!(left, right);
        // 50% of 50 units/s for 1 s, at 28 ticks per unit.
        assert_eq!(right, 0.5 * 50.0 * 28.0);
        assert!(sim.pose().x > 0.0, "heading 0 drives along +x");
    }

    #[test]
    fn opposed_commands_rotate_in_place() {
        let sim = SimRobot::new(SimParams::default());
        let mut motors = sim.motors();
        let mut clock = sim.clock();
        // Left-turn convention: both channels positive.
        motors.set_left_percent(30.0);
        motors.set_right_percent(30.0);
        clock.sleep(Duration::from_millis(100));

        let pose = sim.pose();
        assert!(pose.heading > 0.0, "left turn raises the heading");
        assert!(pose.x.abs() < 1e-9 && pose.y.abs() < 1e-9, "no translation");
    }

    #[test]
    fn dropout_reference_recovers_after_n_samples() {
        let sim = SimRobot::new(SimParams::default());
        let mut rps = sim.pose_reference_with_dropout(2);
        assert!(rps.sample().is_none());
        assert!(rps.sample().is_none());
        assert!(rps.sample().is_some());
    }
}
