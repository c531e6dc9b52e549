//! Common re-exports for convenience.
//!
//! ```rust
//! use cnc_common::prelude::*;
//! ```

pub use crate::axis::{Axis, AxisFlags, axis_vector_length};
pub use crate::config::{
    AxisConfig, ConfigError, ConfigLoader, LogLevel, MotionConfig, MotorConfig, PlannerConfig,
    ProbeConfig, SharedConfig, SpindleConfig,
};
pub use crate::consts::*;
pub use crate::gcode::{CoordSystem, DistanceMode, GcodeState, MotionMode, PathControl};
