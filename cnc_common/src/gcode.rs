//! G-code model state carried with every planned move.
//!
//! The canonical machine owns one active `GcodeState`; the planner copies it
//! into each buffer at enqueue time and the runtime copies it again when the
//! buffer starts executing, so state queries always reflect the move that is
//! physically running.

use serde::{Deserialize, Serialize};

use crate::consts::AXES;

/// Coordinate system selection (G53, G54–G59).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum CoordSystem {
    /// Machine coordinates (G53).
    Absolute = 0,
    #[default]
    G54 = 1,
    G55 = 2,
    G56 = 3,
    G57 = 4,
    G58 = 5,
    G59 = 6,
}

impl CoordSystem {
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// Distance mode (G90/G91).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum DistanceMode {
    #[default]
    Absolute,
    Incremental,
}

/// Modal motion mode (group 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum MotionMode {
    /// G0.
    StraightTraverse,
    /// G1.
    StraightFeed,
    /// G38.2.
    StraightProbe,
    /// G80.
    #[default]
    CancelMotionMode,
}

/// Path control mode (G61, G61.1, G64).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PathControl {
    ExactPath,
    /// Every junction is planned to a full stop.
    ExactStop,
    #[default]
    Continuous,
}

/// Snapshot of the G-code model relevant to planning and execution.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GcodeState {
    /// Source line number (0 when unknown).
    pub linenum: u32,
    pub motion_mode: MotionMode,
    /// Absolute machine target of the move [mm].
    pub target: [f64; AXES],
    /// Work offset in effect for this move [mm].
    pub work_offset: [f64; AXES],
    /// Feed rate [mm/min].
    pub feed_rate: f64,
    /// Optimal (unconstrained) move time [min], computed by the planner.
    pub move_time: f64,
    /// Dwell duration [s] for dwell moves.
    pub dwell_seconds: f64,
    pub coord_system: CoordSystem,
    pub distance_mode: DistanceMode,
    pub path_control: PathControl,
}

impl Default for GcodeState {
    fn default() -> Self {
        Self {
            linenum: 0,
            motion_mode: MotionMode::default(),
            target: [0.0; AXES],
            work_offset: [0.0; AXES],
            feed_rate: 0.0,
            move_time: 0.0,
            dwell_seconds: 0.0,
            coord_system: CoordSystem::default(),
            distance_mode: DistanceMode::default(),
            path_control: PathControl::default(),
        }
    }
}

impl GcodeState {
    /// Whether this move is a rapid (traverse) move.
    #[inline]
    pub fn is_traverse(&self) -> bool {
        self.motion_mode == MotionMode::StraightTraverse
    }
}
