//! Move buffer: one planned move in the planner ring.
//!
//! ## Lifecycle
//!
//! ```text
//! Empty ──get_write_buffer──▶ Planning ──commit──▶ Queued ──get_run_buffer──▶ Running
//!   ▲                                                                            │
//!   └──────────────────────────────── free_run_buffer ───────────────────────────┘
//! ```
//!
//! A `Queued` buffer is still rewritten by the planner on every replan.
//! Once `Running` it is locked and owned by the runtime until freed.

use cnc_common::axis::{Axis, AxisFlags};
use cnc_common::consts::{AXES, EPSILON};
use cnc_common::gcode::GcodeState;

// ─── Enumerations ───────────────────────────────────────────────────

/// Buffer lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BufferState {
    /// Available for a producer.
    #[default]
    Empty,
    /// Claimed by a producer, not yet committed.
    Planning,
    /// Committed; contents still replanned.
    Queued,
    /// Executing in the runtime.
    Running,
}

/// What the runtime does when the buffer is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MoveKind {
    /// No-op, freed on promotion.
    #[default]
    Null,
    /// Acceleration-planned straight line.
    Aline,
    Dwell,
    /// Generic synchronous command.
    Command,
    Tool,
    SpindleSpeed,
    Stop,
    End,
}

impl MoveKind {
    /// Non-line buffers force motion to stop at them.
    #[inline]
    pub const fn is_motion(self) -> bool {
        matches!(self, Self::Aline)
    }
}

/// Runtime progress of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MoveState {
    #[default]
    Off,
    /// Committed, not yet started.
    New,
    /// Started by the runtime.
    Run,
}

/// Synchronous command carried by a non-motion buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MoveCommand {
    /// Application-defined command code.
    Custom(u32),
    ToolChange(u8),
    /// Spindle speed [rpm].
    SpindleSpeed(f64),
    ProgramStop,
    ProgramEnd,
}

impl MoveCommand {
    /// Buffer kind used to queue this command.
    pub const fn kind(&self) -> MoveKind {
        match self {
            Self::Custom(_) => MoveKind::Command,
            Self::ToolChange(_) => MoveKind::Tool,
            Self::SpindleSpeed(_) => MoveKind::SpindleSpeed,
            Self::ProgramStop => MoveKind::Stop,
            Self::ProgramEnd => MoveKind::End,
        }
    }
}

// ─── Buffer ─────────────────────────────────────────────────────────

/// One slot of the planner ring.
///
/// Velocities are in mm/min, lengths in mm, times in minutes. Jerk is in
/// mm/min³ (already multiplied out of the configured millions).
#[derive(Debug, Clone)]
pub struct Buffer {
    pub(crate) prev: usize,
    pub(crate) next: usize,

    pub buffer_state: BufferState,
    pub move_kind: MoveKind,
    pub move_state: MoveState,
    /// Included in the next replanning pass.
    pub replannable: bool,
    /// Owned by the runtime; never touched by the planner.
    pub locked: bool,
    /// Has been through at least one forward pass.
    pub planned: bool,

    pub unit: [f64; AXES],
    pub axis_flags: AxisFlags,

    pub length: f64,
    pub head_length: f64,
    pub body_length: f64,
    pub tail_length: f64,

    pub entry_velocity: f64,
    pub cruise_velocity: f64,
    pub exit_velocity: f64,

    pub entry_vmax: f64,
    pub cruise_vmax: f64,
    pub exit_vmax: f64,
    /// Velocity gained over the full length from rest.
    pub delta_vmax: f64,
    /// Highest entry velocity from which this move and its successors can still stop.
    pub braking_velocity: f64,

    pub jerk_axis: Axis,
    pub jerk: f64,
    pub recip_jerk: f64,
    pub cbrt_jerk: f64,

    /// Time of the planned trapezoid [min].
    pub real_move_time: f64,

    pub gm: GcodeState,
    pub command: Option<MoveCommand>,
}

impl Buffer {
    /// Unlinked empty buffer. The pool sets the links.
    pub(crate) fn new() -> Self {
        Self {
            prev: 0,
            next: 0,
            buffer_state: BufferState::Empty,
            move_kind: MoveKind::Null,
            move_state: MoveState::Off,
            replannable: false,
            locked: false,
            planned: false,
            unit: [0.0; AXES],
            axis_flags: AxisFlags::empty(),
            length: 0.0,
            head_length: 0.0,
            body_length: 0.0,
            tail_length: 0.0,
            entry_velocity: 0.0,
            cruise_velocity: 0.0,
            exit_velocity: 0.0,
            entry_vmax: 0.0,
            cruise_vmax: 0.0,
            exit_vmax: 0.0,
            delta_vmax: 0.0,
            braking_velocity: 0.0,
            jerk_axis: Axis::X,
            jerk: 0.0,
            recip_jerk: 0.0,
            cbrt_jerk: 0.0,
            real_move_time: 0.0,
            gm: GcodeState::default(),
            command: None,
        }
    }

    /// Reset contents, preserving ring links.
    pub(crate) fn clear(&mut self) {
        let (prev, next) = (self.prev, self.next);
        *self = Self::new();
        self.prev = prev;
        self.next = next;
    }

    /// Previous buffer index in the ring.
    #[inline]
    pub fn prev(&self) -> usize {
        self.prev
    }

    /// Next buffer index in the ring.
    #[inline]
    pub fn next(&self) -> usize {
        self.next
    }

    #[inline]
    pub fn is_aline(&self) -> bool {
        self.move_kind == MoveKind::Aline
    }

    /// Queued or running line; the only buffers that carry velocity across a junction.
    #[inline]
    pub fn is_live_aline(&self) -> bool {
        self.is_aline()
            && matches!(
                self.buffer_state,
                BufferState::Queued | BufferState::Running
            )
    }

    /// Largest velocity this buffer allows at its entry, as seen by its predecessor.
    #[inline]
    pub fn entry_bound(&self) -> f64 {
        if self.is_aline() {
            self.entry_vmax.min(self.braking_velocity)
        } else {
            0.0
        }
    }

    /// Duration of the planned head/body/tail profile [min].
    ///
    /// Each jerk-limited ramp averages the two end velocities.
    pub fn trapezoid_time(&self) -> f64 {
        let ramp = |len: f64, v0: f64, v1: f64| {
            if len <= 0.0 {
                0.0
            } else {
                2.0 * len / (v0 + v1).max(EPSILON)
            }
        };
        let body = if self.body_length <= 0.0 {
            0.0
        } else {
            self.body_length / self.cruise_velocity.max(EPSILON)
        };
        ramp(self.head_length, self.entry_velocity, self.cruise_velocity)
            + body
            + ramp(self.tail_length, self.cruise_velocity, self.exit_velocity)
    }
}
