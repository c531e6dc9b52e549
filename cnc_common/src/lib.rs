//! CNC Common Library
//!
//! Shared constants, axis and G-code model types, and configuration loading
//! for the CNC motion workspace.
//!
//! # Module Structure
//!
//! - [`consts`] - Fixed axis/motor counts, pool size and planner tuning defaults
//! - [`axis`] - Axis enumeration and participation bitflags
//! - [`gcode`] - G-code model snapshot carried by every planned move
//! - [`config`] - Configuration loading traits and machine configuration types
//! - [`prelude`] - Common re-exports for convenience
//!
//! # Usage
//!
//! ```rust
//! use cnc_common::prelude::*;
//!
//! let flags = AxisFlags::X | AxisFlags::Z;
//! assert!(flags.contains_axis(Axis::Z));
//! ```

pub mod axis;
pub mod config;
pub mod consts;
pub mod gcode;
pub mod prelude;
