//! Absolute-position correction layer.
//!
//! These operations close their loops against the external pose reference
//! instead of the encoders, for the places dead reckoning cannot reach:
//! realigning heading after accumulated drift, and recovering position
//! after an unobservable transition such as a ramp climb, where wheel slip
//! invalidates the encoder counts.
//!
//! The reference updates far slower than the 20 ms control period, so every
//! motion here is a fixed-power burst followed by a stop and a fresh
//! sample — never continuous closed-loop drive. Closing the loop at encoder
//! rate against a slow reference would oscillate.

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::config::RampClimb;
use crate::hardware::{Clock, DriveMotors, EncoderPair, PoseReference, PoseSample};
use crate::motion::{Drivetrain, MotionError};
use crate::utils::heading_error;

/// Field axis of a pose coordinate.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Axis {
    X,
    Y,
}

impl<E: EncoderPair, M: DriveMotors, C: Clock> Drivetrain<E, M, C> {
    /// Polls the reference, tolerating a bounded run of invalid fixes.
    /// The drivetrain is already stopped between bursts, so waiting out a
    /// dropout holds position instead of acting on garbage.
    fn sample_pose<P: PoseReference>(&mut self, rps: &mut P) -> Result<PoseSample, MotionError> {
        let cfg = self.config.rps;
        let mut attempts = 0;
        loop {
            if let Some(sample) = rps.sample() {
                return Ok(sample);
            }
            attempts += 1;
            if attempts >= cfg.max_invalid_samples {
                self.stop();
                return Err(MotionError::NoValidFix { attempts });
            }
            self.clock.sleep(cfg.pulse_pause);
        }
    }

    /// Rotates to `target` degrees (0-360 convention) in fixed-power
    /// pulses, re-sampling the reference between pulses. The error always
    /// resolves across the 0/360 discontinuity the short way.
    pub fn align_to_heading<P: PoseReference>(
        &mut self,
        rps: &mut P,
        target: f64,
    ) -> Result<(), MotionError> {
        let cfg = self.config.rps;
        let mut pulses = 0;
        loop {
            let pose = self.sample_pose(rps)?;
            let error = heading_error(target, pose.heading);
            if error.abs() < cfg.heading_tolerance {
                debug!("align_to_heading: done ({error:.2} deg)");
                return Ok(());
            }
            if pulses >= cfg.max_pulses {
                warn!("align_to_heading: gave up at {error:.1} deg");
                return Err(MotionError::AlignmentStalled { pulses, error });
            }
            // Positive error: target is counterclockwise, pulse left.
            let power = if error > 0.0 {
                -cfg.pulse_power
            } else {
                cfg.pulse_power
            };
            self.rotate_timed(power, cfg.pulse_duration);
            pulses += 1;
            self.clock.sleep(cfg.pulse_pause);
        }
    }

    /// Nudges straight ahead (or back, for negative `power`) until the
    /// sampled coordinate on `axis` crosses `threshold` in the direction of
    /// travel. Assumes the drivetrain is oriented so that positive power
    /// advances the coordinate.
    pub fn nudge_to_boundary<P: PoseReference>(
        &mut self,
        rps: &mut P,
        axis: Axis,
        threshold: f64,
        power: f64,
    ) -> Result<(), MotionError> {
        let cfg = self.config.rps;
        let mut nudges = 0;
        loop {
            let pose = self.sample_pose(rps)?;
            let position = match axis {
                Axis::X => pose.x,
                Axis::Y => pose.y,
            };
            let crossed = if power >= 0.0 {
                position >= threshold
            } else {
                position <= threshold
            };
            if crossed {
                debug!("nudge_to_boundary: done ({position:.1})");
                return Ok(());
            }
            if nudges >= cfg.max_nudges {
                warn!("nudge_to_boundary: gave up at {position:.1}");
                return Err(MotionError::BoundaryNotReached { nudges, position });
            }
            self.drive_timed(power, cfg.nudge_duration);
            nudges += 1;
            self.clock.sleep(cfg.nudge_pause);
        }
    }

    /// Climbs an incline: open-loop burst up, realign heading, approach
    /// impulses, seek the boundary coordinate, cancel leftover momentum,
    /// settle on the final heading.
    pub fn climb_ramp<P: PoseReference>(
        &mut self,
        rps: &mut P,
        climb: &RampClimb,
    ) -> Result<(), MotionError> {
        debug!("climb_ramp: burst at {}%", climb.burst_power);
        self.drive_timed(climb.burst_power, climb.burst_duration);
        self.align_to_heading(rps, climb.climb_heading)?;
        for impulse in &climb.approach_impulses {
            self.drive_timed(impulse.power, impulse.duration);
        }
        self.clock.sleep(climb.settle_pause);
        self.nudge_to_boundary(rps, climb.boundary_axis, climb.boundary, climb.approach_power)?;
        self.clock.sleep(climb.settle_pause);
        if let Some(backoff) = climb.backoff {
            self.drive_timed(backoff.power, backoff.duration);
        }
        self.align_to_heading(rps, climb.final_heading)
    }
}
