//! Job file: the sequence of steps the simulation driver feeds to the
//! machine.
//!
//! # TOML Example
//!
//! ```toml
//! [[steps]]
//! type = "traverse"
//! x = 10.0
//! y = 10.0
//!
//! [[steps]]
//! type = "feed"
//! x = 50.0
//! feed_rate = 1200.0
//!
//! [[steps]]
//! type = "probe"
//! z = -5.0
//! feed_rate = 100.0
//!
//! [[steps]]
//! type = "end"
//! ```

use cnc_common::axis::{Axis, AxisFlags};
use cnc_common::config::ConfigError;
use cnc_common::consts::AXES;
use cnc_common::gcode::{CoordSystem, DistanceMode};
use serde::{Deserialize, Serialize};

/// Axis words of a move; absent words leave the axis where it is.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MoveWords {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
    pub a: Option<f64>,
    pub b: Option<f64>,
    pub c: Option<f64>,
    /// New modal feed rate [mm/min].
    pub feed_rate: Option<f64>,
}

impl MoveWords {
    /// Axis values and the flags of the words present.
    pub fn values(&self) -> ([f64; AXES], AxisFlags) {
        let words = [self.x, self.y, self.z, self.a, self.b, self.c];
        let mut values = [0.0; AXES];
        let mut flags = AxisFlags::empty();
        for axis in Axis::ALL {
            if let Some(v) = words[axis.index()] {
                values[axis.index()] = v;
                flags.set_axis(axis, true);
            }
        }
        (values, flags)
    }
}

/// One job step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobStep {
    /// G0
    Traverse(MoveWords),
    /// G1
    Feed(MoveWords),
    /// G38.2, target in machine coordinates.
    Probe(MoveWords),
    /// G4
    Dwell { seconds: f64 },
    /// G54..G59 / G53
    CoordSystem { coord_system: CoordSystem },
    /// G90 / G91
    DistanceMode { distance_mode: DistanceMode },
    /// G10 L2 style offset of one coordinate system.
    Offset {
        coord_system: CoordSystem,
        axis: Axis,
        offset: f64,
    },
    /// M6
    Tool { tool: u8 },
    /// S word, synchronized with motion.
    SpindleSpeed { rpm: f64 },
    /// M3 / M4 / M5
    Spindle { mode: SpindleWord, rpm: f64 },
    /// M0
    Stop,
    /// M2
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpindleWord {
    Off,
    Cw,
    Ccw,
}

impl JobStep {
    /// Whether the step waits for a probe cycle to complete.
    #[inline]
    pub fn is_probe(&self) -> bool {
        matches!(self, Self::Probe(_))
    }
}

/// Ordered list of steps.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Job {
    #[serde(default)]
    pub steps: Vec<JobStep>,
}

impl Job {
    /// Reject steps that can never execute.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (i, step) in self.steps.iter().enumerate() {
            match step {
                JobStep::Traverse(words) | JobStep::Feed(words) | JobStep::Probe(words) => {
                    if words.values().1.is_empty() {
                        return Err(ConfigError::ValidationError(format!(
                            "job step {i}: move without axis words"
                        )));
                    }
                    if words.feed_rate.is_some_and(|f| !(f > 0.0)) {
                        return Err(ConfigError::ValidationError(format!(
                            "job step {i}: feed_rate must be positive"
                        )));
                    }
                }
                JobStep::Dwell { seconds } if !(*seconds >= 0.0) => {
                    return Err(ConfigError::ValidationError(format!(
                        "job step {i}: dwell seconds must not be negative"
                    )));
                }
                JobStep::SpindleSpeed { rpm } | JobStep::Spindle { rpm, .. }
                    if !(*rpm >= 0.0) =>
                {
                    return Err(ConfigError::ValidationError(format!(
                        "job step {i}: spindle rpm must not be negative"
                    )));
                }
                _ => {}
            }
        }
        Ok(())
    }
}
