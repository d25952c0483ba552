//! Dead-reckoning drive control for a two-wheel differential competition
//! robot.
//!
//! The crate owns the closed-loop motion layer between a mission sequence
//! and the hardware: displacement primitives paced at a fixed period,
//! built on a bounded PID controller, a slew-limited output stage, and a
//! drift controller that keeps the two mirror-mounted drivetrains tracking
//! each other. Robots with an external absolute position reference get a
//! pulse-based correction layer on top for heading realignment and
//! boundary seeking.
//!
//! Hardware stays outside: the [`Drivetrain`] is generic over the encoder
//! pair, the drive channels, and the clock (see [`hardware`]), so the same
//! control loops run on the robot and against the [`sim`] plant in tests.
//!
//! ```
//! use squall::{DriveConfig, Drivetrain, SpeedProfile, TurnDirection};
//! use squall::sim::{SimParams, SimRobot};
//!
//! let sim = SimRobot::new(SimParams::default());
//! let mut drive = Drivetrain::new(
//!     sim.encoders(),
//!     sim.motors(),
//!     sim.clock(),
//!     DriveConfig::default(),
//! );
//! drive.drive_straight(11.5, SpeedProfile::Normal)?;
//! drive.turn_in_place(5.2, TurnDirection::Left)?;
//! # Ok::<(), squall::MotionError>(())
//! ```

pub mod config;
pub mod hardware;
pub mod motion;
pub mod output;
pub mod pid;
pub mod rps;
pub mod sim;
pub mod utils;

pub use config::{DriveConfig, MotionProfile, PositionSource, RampClimb, RpsConfig, SettleImpulse};
pub use hardware::{Clock, DriveMotors, EncoderPair, PoseReference, PoseSample, SystemClock};
pub use motion::{Drivetrain, MotionError, SpeedProfile, SweepSide, TurnDirection};
pub use output::{OutputLimits, WheelMapping};
pub use pid::{Pid, PidGains};
pub use rps::Axis;
