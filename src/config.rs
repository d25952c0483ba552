//! Tunable constants for every control layer, as plain serde-derived
//! structs. Defaults carry the values the robot is tuned with; a deployment
//! can override any of them from a TOML table.

use core::time::Duration;

use serde::{Deserialize, Serialize};

use crate::output::OutputLimits;
use crate::pid::PidGains;
use crate::rps::Axis;

/// Which encoder signal a primitive treats as its position measurement.
///
/// This varies per primitive on purpose: straight drives and in-place turns
/// follow the right wheel alone so the drift blend cannot feed back into the
/// position term, and sweeps follow the driven wheel. Unifying these would
/// change convergence behavior the tuning relies on.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PositionSource {
    LeftWheel,
    RightWheel,
    Average,
}

/// Brief fixed command applied after a motion to kill residual momentum.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SettleImpulse {
    pub power: f64,
    pub duration: Duration,
}

/// Closed-loop tuning for one primitive class.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MotionProfile {
    pub position: PositionSource,
    pub gains: PidGains,
    /// Drift-correction gains; `None` for single-wheel primitives.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub drift_gains: Option<PidGains>,
    pub limits: OutputLimits,
    /// Abort bound: a primitive that has not crossed its target when this
    /// expires stops the motors and reports
    /// [`DidNotConverge`](crate::motion::MotionError::DidNotConverge).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settle: Option<SettleImpulse>,
}

/// Full drivetrain configuration: conversion factor, loop period, and one
/// [`MotionProfile`] per primitive class.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveConfig {
    /// Encoder ticks per distance unit of commanded displacement.
    pub ticks_per_unit: f64,
    /// Control loop period.
    pub period: Duration,
    pub drive: MotionProfile,
    pub drive_slow: MotionProfile,
    pub drive_fast: MotionProfile,
    pub turn: MotionProfile,
    pub sweep: MotionProfile,
    pub rps: RpsConfig,
}

impl Default for DriveConfig {
    fn default() -> Self {
        let drift = Some(PidGains::new(1.0, 0.0, 0.0, 0.0));
        Self {
            ticks_per_unit: 28.0,
            period: Duration::from_millis(20),
            drive: MotionProfile {
                position: PositionSource::RightWheel,
                gains: PidGains::new(0.4, 0.01, 0.0, 0.0),
                drift_gains: drift,
                limits: OutputLimits {
                    floor: 8.0,
                    ceiling: 60.0,
                    slew_step: 7.0,
                },
                timeout: Some(Duration::from_secs(10)),
                settle: None,
            },
            drive_slow: MotionProfile {
                position: PositionSource::RightWheel,
                gains: PidGains::new(0.5, 0.01, 0.0, 0.0),
                drift_gains: drift,
                limits: OutputLimits {
                    floor: 20.0,
                    ceiling: 30.0,
                    slew_step: 7.0,
                },
                timeout: Some(Duration::from_millis(1500)),
                settle: None,
            },
            drive_fast: MotionProfile {
                position: PositionSource::RightWheel,
                gains: PidGains::new(0.4, 0.01, 0.0, 0.0),
                drift_gains: drift,
                limits: OutputLimits {
                    floor: 8.0,
                    ceiling: 80.0,
                    slew_step: 7.0,
                },
                timeout: Some(Duration::from_secs(10)),
                settle: None,
            },
            turn: MotionProfile {
                position: PositionSource::RightWheel,
                gains: PidGains::new(0.4, 0.01, 0.0, 0.0),
                drift_gains: drift,
                // Turning fights static friction asymmetry, so it needs a
                // higher floor than straight driving.
                limits: OutputLimits {
                    floor: 13.0,
                    ceiling: 60.0,
                    slew_step: 7.0,
                },
                timeout: Some(Duration::from_secs(10)),
                settle: None,
            },
            sweep: MotionProfile {
                position: PositionSource::RightWheel,
                gains: PidGains::new(0.6, 0.01, 0.0, 0.0),
                drift_gains: None,
                limits: OutputLimits {
                    floor: 15.0,
                    ceiling: 60.0,
                    slew_step: 7.0,
                },
                timeout: Some(Duration::from_secs(10)),
                settle: None,
            },
            rps: RpsConfig::default(),
        }
    }
}

/// Pulse, nudge, and retry parameters for the absolute-position correction
/// layer. The pulse cadence is deliberately much slower than the control
/// period; the external reference cannot keep up with a 20 ms loop.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RpsConfig {
    /// Acceptable heading error, degrees.
    pub heading_tolerance: f64,
    /// Power of one rotation burst.
    pub pulse_power: f64,
    /// Alignment pulses before giving up.
    pub max_pulses: u32,
    /// Boundary-seek nudges before giving up.
    pub max_nudges: u32,
    /// Consecutive invalid pose samples tolerated before giving up.
    pub max_invalid_samples: u32,
    pub pulse_duration: Duration,
    /// Pause after each pulse for the reference to catch up.
    pub pulse_pause: Duration,
    pub nudge_duration: Duration,
    pub nudge_pause: Duration,
}

impl Default for RpsConfig {
    fn default() -> Self {
        Self {
            heading_tolerance: 0.5,
            pulse_power: 15.0,
            max_pulses: 240,
            max_nudges: 120,
            max_invalid_samples: 40,
            pulse_duration: Duration::from_millis(25),
            pulse_pause: Duration::from_millis(100),
            nudge_duration: Duration::from_millis(75),
            nudge_pause: Duration::from_millis(75),
        }
    }
}

/// Parameters for the composed ramp-climb routine: open-loop burst up the
/// incline (wheel slip makes the encoders useless there), then realign and
/// seek the boundary coordinate from the absolute reference.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RampClimb {
    pub burst_power: f64,
    /// Heading to hold while climbing.
    pub climb_heading: f64,
    pub boundary_axis: Axis,
    /// Coordinate the robot must cross to count as up.
    pub boundary: f64,
    pub approach_power: f64,
    /// Heading to settle on once over the boundary.
    pub final_heading: f64,
    pub burst_duration: Duration,
    pub settle_pause: Duration,
    /// Open-loop impulses between the burst and the boundary seek.
    #[serde(default)]
    pub approach_impulses: Vec<SettleImpulse>,
    /// Reverse impulse after crossing, cancelling leftover momentum.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff: Option<SettleImpulse>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_carry_tuned_constants() {
        let config = DriveConfig::default();
        assert_eq!(config.ticks_per_unit, 28.0);
        assert_eq!(config.period, Duration::from_millis(20));
        assert_eq!(config.drive.gains.kp, 0.4);
        assert_eq!(config.drive.limits.floor, 8.0);
        assert_eq!(config.turn.limits.floor, 13.0);
        assert_eq!(config.sweep.limits.floor, 15.0);
        assert_eq!(config.sweep.gains.kp, 0.6);
        assert!(config.sweep.drift_gains.is_none());
        assert_eq!(config.drive_fast.limits.ceiling, 80.0);
        assert_eq!(config.drive_slow.timeout, Some(Duration::from_millis(1500)));
    }

    #[test]
    fn toml_round_trip() {
        let config = DriveConfig::default();
        let text = toml::to_string(&config).expect("serialize config");
        let parsed: DriveConfig = toml::from_str(&text).expect("parse config");
        assert_eq!(parsed, config);
    }

    #[test]
    fn partial_table_fills_from_defaults() {
        let parsed: DriveConfig = toml::from_str("ticks_per_unit = 32.0\n").expect("parse");
        assert_eq!(parsed.ticks_per_unit, 32.0);
        assert_eq!(parsed.drive, DriveConfig::default().drive);
    }
}
