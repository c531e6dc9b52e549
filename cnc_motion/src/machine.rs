//! Canonical machine: the G-code model on top of the motion core.
//!
//! Holds the modal state (feed rate, coordinate system, distance mode,
//! motion mode), the coordinate offsets, spindle bookkeeping and the cycle
//! and probe state. Moves are resolved to absolute machine targets here and
//! handed to the planner.
//!
//! - [`probing`]: G38.2 straight probe cycle
//! - [`report`]: fixed-capacity probe report and diagnostics

pub mod probing;
pub mod report;

pub use self::probing::{ProbeCallback, ProbeStep};

use cnc_common::axis::{Axis, AxisFlags};
use cnc_common::config::{MotionConfig, ProbeConfig};
use cnc_common::consts::{AXES, COORDS};
use cnc_common::gcode::{CoordSystem, DistanceMode, GcodeState, MotionMode, PathControl};
use tracing::debug;

use self::probing::ProbingContext;
use self::report::ProbeReport;
use crate::error::PlannerError;
use crate::kinematics::Kinematics;
use crate::motion::MotionCore;
use crate::planner::buffer::MoveCommand;

// ─── Machine State ──────────────────────────────────────────────────

/// Active machine cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CycleState {
    #[default]
    Off,
    Machining,
    Probe,
}

/// Outcome of the last probe, or a probe waiting to start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProbeState {
    #[default]
    Failed,
    Succeeded,
    Waiting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpindleMode {
    #[default]
    Off,
    Cw,
    Ccw,
}

/// Spindle bookkeeping. No output is driven from here.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Spindle {
    pub mode: SpindleMode,
    /// [rpm]
    pub speed: f64,
    /// Paused by a cycle; resumed on cycle exit.
    pub paused: bool,
}

// ─── Machine ────────────────────────────────────────────────────────

/// G-code model, motion core and I/O under one owner.
#[derive(Debug)]
pub struct Machine<K, I> {
    core: MotionCore<K>,
    io: I,
    gm: GcodeState,
    /// Offsets per coordinate system, indexed by `CoordSystem::index()`.
    offsets: [[f64; AXES]; COORDS],
    spindle: Spindle,
    spindle_dwell_seconds: f64,
    probe_config: ProbeConfig,
    cycle_state: CycleState,
    probe_state: ProbeState,
    probe_results: [f64; AXES],
    probe: ProbingContext,
    last_report: Option<ProbeReport>,
}

impl<K: Kinematics, I> Machine<K, I> {
    pub fn new(config: &MotionConfig, kinematics: K, io: I) -> Self {
        Self {
            core: MotionCore::new(config, kinematics),
            io,
            gm: GcodeState::default(),
            offsets: [[0.0; AXES]; COORDS],
            spindle: Spindle::default(),
            spindle_dwell_seconds: config.spindle.dwell_seconds,
            probe_config: config.probe.clone(),
            cycle_state: CycleState::Off,
            probe_state: ProbeState::Failed,
            probe_results: [0.0; AXES],
            probe: ProbingContext::default(),
            last_report: None,
        }
    }

    #[inline]
    pub fn core(&self) -> &MotionCore<K> {
        &self.core
    }

    #[inline]
    pub fn core_mut(&mut self) -> &mut MotionCore<K> {
        &mut self.core
    }

    #[inline]
    pub fn io(&self) -> &I {
        &self.io
    }

    #[inline]
    pub fn io_mut(&mut self) -> &mut I {
        &mut self.io
    }

    /// Current G-code model.
    #[inline]
    pub fn gcode_state(&self) -> &GcodeState {
        &self.gm
    }

    // ── Modal state ──

    pub fn set_feed_rate(&mut self, feed_rate: f64) {
        self.gm.feed_rate = feed_rate;
    }

    pub fn set_coord_system(&mut self, coord_system: CoordSystem) {
        self.gm.coord_system = coord_system;
    }

    pub fn set_distance_mode(&mut self, distance_mode: DistanceMode) {
        self.gm.distance_mode = distance_mode;
    }

    pub fn set_motion_mode(&mut self, motion_mode: MotionMode) {
        self.gm.motion_mode = motion_mode;
    }

    pub fn set_path_control(&mut self, path_control: PathControl) {
        self.gm.path_control = path_control;
    }

    /// Set the offset of `axis` in `coord_system`. The machine system
    /// (`Absolute`) has no offsets.
    pub fn set_coord_offset(&mut self, coord_system: CoordSystem, axis: Axis, offset: f64) {
        if coord_system != CoordSystem::Absolute {
            self.offsets[coord_system.index()][axis.index()] = offset;
        }
    }

    /// Offsets in effect for the active coordinate system.
    pub fn work_offset(&self) -> [f64; AXES] {
        self.offsets[self.gm.coord_system.index()]
    }

    /// Absolute machine target for `values`, honoring distance mode and
    /// work offsets. Axes not in `flags` keep the current model target.
    pub fn resolve_target(&self, values: &[f64; AXES], flags: AxisFlags) -> [f64; AXES] {
        let offset = self.work_offset();
        let mut target = self.gm.target;
        for axis in flags.axes() {
            let i = axis.index();
            target[i] = match self.gm.distance_mode {
                DistanceMode::Absolute => values[i] + offset[i],
                DistanceMode::Incremental => self.gm.target[i] + values[i],
            };
        }
        target
    }

    // ── Motion ──

    /// G0 to `values`.
    pub fn straight_traverse(
        &mut self,
        values: &[f64; AXES],
        flags: AxisFlags,
    ) -> Result<(), PlannerError> {
        self.queue_line(values, flags, MotionMode::StraightTraverse)
    }

    /// G1 to `values` at the modal feed rate.
    pub fn straight_feed(
        &mut self,
        values: &[f64; AXES],
        flags: AxisFlags,
    ) -> Result<(), PlannerError> {
        self.queue_line(values, flags, MotionMode::StraightFeed)
    }

    /// Queue a line. Moves too small to execute are dropped silently and
    /// leave the model target unchanged.
    fn queue_line(
        &mut self,
        values: &[f64; AXES],
        flags: AxisFlags,
        motion_mode: MotionMode,
    ) -> Result<(), PlannerError> {
        let mut gm = self.gm;
        gm.motion_mode = motion_mode;
        gm.target = self.resolve_target(values, flags);
        gm.work_offset = self.work_offset();
        match self.core.aline(&gm) {
            Ok(()) => {
                self.gm = gm;
                self.cycle_start();
                Ok(())
            }
            Err(e) if e.is_minimum_move() => {
                self.gm.motion_mode = motion_mode;
                debug!(error = %e, "move dropped");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// G4 dwell.
    pub fn dwell(&mut self, seconds: f64) -> Result<(), PlannerError> {
        self.core.dwell(seconds)
    }

    /// Queue a command synchronized with motion.
    pub fn queue_command(&mut self, command: MoveCommand) -> Result<(), PlannerError> {
        self.core.queue_command(command)
    }

    /// Discard queued moves and resynchronize the model to the planner.
    pub fn flush_planner(&mut self) {
        self.core.flush_planner();
        self.gm.target = *self.core.planner_position();
    }

    /// Define the current position of `axis` (G28.3): model, planner and
    /// runtime all move to `position` without motion.
    pub fn set_position(&mut self, axis: Axis, position: f64) {
        self.gm.target[axis.index()] = position;
        self.core.set_planner_position(axis, position);
        self.core.set_runtime_position(axis, position);
        self.core.set_steps_to_runtime_position();
    }

    /// Runtime machine position of `axis`.
    #[inline]
    pub fn absolute_position(&self, axis: Axis) -> f64 {
        self.core.runtime_absolute_position(axis)
    }

    /// Runtime position of `axis` in the running move's work coordinates.
    #[inline]
    pub fn work_position(&self, axis: Axis) -> f64 {
        self.core.runtime_work_position(axis)
    }

    #[inline]
    pub fn axis_jerk(&self, axis: Axis) -> f64 {
        self.core.axis_jerk(axis)
    }

    pub fn set_axis_jerk(&mut self, axis: Axis, jerk: f64) {
        self.core.set_axis_jerk(axis, jerk);
    }

    // ── Cycle ──

    #[inline]
    pub fn cycle_state(&self) -> CycleState {
        self.cycle_state
    }

    fn cycle_start(&mut self) {
        if self.cycle_state == CycleState::Off {
            self.cycle_state = CycleState::Machining;
        }
    }

    /// End a machining cycle once the runtime has drained.
    pub fn cycle_end(&mut self) {
        if self.cycle_state == CycleState::Machining && !self.core.runtime_busy() {
            self.cycle_state = CycleState::Off;
        }
    }

    // ── Spindle ──

    #[inline]
    pub fn spindle(&self) -> &Spindle {
        &self.spindle
    }

    pub fn spindle_control(&mut self, mode: SpindleMode, speed: f64) {
        self.spindle = Spindle {
            mode,
            speed,
            paused: false,
        };
    }

    /// Pause the spindle if it is on.
    pub fn spindle_optional_pause(&mut self) {
        if self.spindle.mode != SpindleMode::Off && !self.spindle.paused {
            self.spindle.paused = true;
            debug!("spindle paused");
        }
    }

    /// Resume a paused spindle, waiting `dwell_seconds` before motion
    /// continues.
    pub fn spindle_resume(&mut self, dwell_seconds: f64) {
        if self.spindle.paused {
            self.spindle.paused = false;
            self.core.request_out_of_band_dwell(dwell_seconds);
            debug!(dwell_seconds, "spindle resumed");
        }
    }

    // ── Probe results ──

    #[inline]
    pub fn probe_state(&self) -> ProbeState {
        self.probe_state
    }

    /// Absolute position of every axis at the end of the last probe.
    #[inline]
    pub fn probe_results(&self) -> &[f64; AXES] {
        &self.probe_results
    }

    /// Report emitted by the last completed probe.
    #[inline]
    pub fn last_probe_report(&self) -> Option<&str> {
        self.last_report.as_deref()
    }
}
