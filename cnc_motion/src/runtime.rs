//! Segment runtime.
//!
//! Executes the running planner buffer one fixed-time segment per
//! [`MotionCore::tick`]. Each line is run as up to three sections (head,
//! body, tail); the head and tail follow a quintic velocity curve whose
//! first and second derivatives are zero at both ends, so acceleration and
//! jerk are continuous across section and move boundaries.
//!
//! ## Section state machine
//!
//! | State        | Tick action                                            |
//! |--------------|--------------------------------------------------------|
//! | `New`        | size the section, seed the forward differences         |
//! | `FirstHalf`  | emit the first segment                                 |
//! | `SecondHalf` | advance the velocity by forward differences, emit      |
//!
//! Zero-length sections are skipped within the same tick. The last segment
//! of every section lands exactly on the section's waypoint, and the last
//! segment of a move lands exactly on the move target.
//!
//! ## Forward differences
//!
//! Segment velocities are `V(t) = Vi + (Vt − Vi)·(10t³ − 15t⁴ + 6t⁵)` sampled
//! at segment midpoints `t = (k + ½)/n`. A quintic has constant fifth
//! difference, so after seeding five differences from the first six samples
//! every further velocity costs five additions.

use cnc_common::axis::Axis;
use cnc_common::consts::{AXES, EPSILON, EPSILON_LENGTH, MOTORS, minutes_to_usec, usec_to_minutes};
use cnc_common::gcode::GcodeState;
use tracing::{debug, trace};

use crate::kinematics::Kinematics;
use crate::motion::MotionCore;
use crate::planner::buffer::{MoveCommand, MoveKind, MoveState};

// ─── Tick Output ────────────────────────────────────────────────────

/// One segment handed to the step generator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SegmentCommand {
    /// Steps to travel per motor during this segment.
    pub travel_steps: [f64; MOTORS],
    /// Encoder minus commanded position per motor [steps].
    pub following_error: [f64; MOTORS],
    /// Duration [µs].
    pub segment_time_us: f64,
    /// Path velocity at the segment midpoint [mm/min].
    pub velocity: f64,
}

/// Result of one runtime tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Tick {
    /// Nothing to execute.
    Idle,
    /// Motion segment.
    Segment(SegmentCommand),
    /// Timed pause with no motion [µs].
    Dwell { time_us: f64 },
    /// Synchronous command reached in queue order.
    Command(MoveCommand),
}

// ─── Move Runtime ───────────────────────────────────────────────────

/// Upper bound on the segments of one section.
const MAX_SECTION_SEGMENTS: f64 = u32::MAX as f64;

/// Section of a line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Section {
    #[default]
    Head = 0,
    Body = 1,
    Tail = 2,
}

impl Section {
    const fn next(self) -> Option<Self> {
        match self {
            Self::Head => Some(Self::Body),
            Self::Body => Some(Self::Tail),
            Self::Tail => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SectionState {
    #[default]
    Off,
    New,
    FirstHalf,
    SecondHalf,
}

/// Runtime context: the move being executed and the machine position.
#[derive(Debug, Clone)]
pub struct MoveRuntime {
    pub(crate) move_state: MoveState,
    pub(crate) section: Section,
    pub(crate) section_state: SectionState,

    pub(crate) unit: [f64; AXES],
    /// Final position of the running move [mm].
    pub(crate) target: [f64; AXES],
    /// Current position [mm].
    pub(crate) position: [f64; AXES],
    /// End of each section [mm].
    pub(crate) waypoint: [[f64; AXES]; 3],

    pub(crate) position_steps: [f64; MOTORS],
    pub(crate) commanded_steps: [f64; MOTORS],
    pub(crate) encoder_steps: [f64; MOTORS],
    pub(crate) following_error: [f64; MOTORS],

    pub(crate) head_length: f64,
    pub(crate) body_length: f64,
    pub(crate) tail_length: f64,
    pub(crate) entry_velocity: f64,
    pub(crate) cruise_velocity: f64,
    pub(crate) exit_velocity: f64,
    /// Exit velocity of the last finished move if it was a line, else 0.
    /// The next queued line starts from it.
    pub(crate) handoff_velocity: f64,

    /// Segments left in the current section.
    pub(crate) segment_count: u32,
    /// Duration of each segment of the current section [min].
    pub(crate) segment_time: f64,
    pub(crate) segment_velocity: f64,
    forward_diff: [f64; 5],

    /// Remaining queued dwell [µs].
    pub(crate) dwell_usec: f64,
    /// Pending out-of-band dwell [µs].
    pub(crate) oob_dwell_usec: f64,

    pub(crate) gm: GcodeState,
}

impl Default for MoveRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl MoveRuntime {
    pub fn new() -> Self {
        Self {
            move_state: MoveState::Off,
            section: Section::Head,
            section_state: SectionState::Off,
            unit: [0.0; AXES],
            target: [0.0; AXES],
            position: [0.0; AXES],
            waypoint: [[0.0; AXES]; 3],
            position_steps: [0.0; MOTORS],
            commanded_steps: [0.0; MOTORS],
            encoder_steps: [0.0; MOTORS],
            following_error: [0.0; MOTORS],
            head_length: 0.0,
            body_length: 0.0,
            tail_length: 0.0,
            entry_velocity: 0.0,
            cruise_velocity: 0.0,
            exit_velocity: 0.0,
            handoff_velocity: 0.0,
            segment_count: 0,
            segment_time: 0.0,
            segment_velocity: 0.0,
            forward_diff: [0.0; 5],
            dwell_usec: 0.0,
            oob_dwell_usec: 0.0,
            gm: GcodeState::default(),
        }
    }

    /// Stop executing; position and step counters are kept.
    pub(crate) fn halt(&mut self) {
        self.move_state = MoveState::Off;
        self.section_state = SectionState::Off;
        self.segment_velocity = 0.0;
        self.segment_count = 0;
        self.handoff_velocity = 0.0;
        self.dwell_usec = 0.0;
        self.oob_dwell_usec = 0.0;
        self.target = self.position;
    }

    fn section_length(&self, section: Section) -> f64 {
        match section {
            Section::Head => self.head_length,
            Section::Body => self.body_length,
            Section::Tail => self.tail_length,
        }
    }

    /// Start and end velocity of `section`.
    fn section_velocities(&self, section: Section) -> (f64, f64) {
        match section {
            Section::Head => (self.entry_velocity, self.cruise_velocity),
            Section::Body => (self.cruise_velocity, self.cruise_velocity),
            Section::Tail => (self.cruise_velocity, self.exit_velocity),
        }
    }

    /// Section waypoints from the current position; the last non-empty
    /// section ends exactly on the target.
    fn compute_waypoints(&mut self) {
        let mut cursor = self.position;
        let mut last = None;
        for section in [Section::Head, Section::Body, Section::Tail] {
            let length = self.section_length(section);
            for (c, u) in cursor.iter_mut().zip(self.unit.iter()) {
                *c += u * length;
            }
            self.waypoint[section as usize] = cursor;
            if length >= EPSILON_LENGTH {
                last = Some(section);
            }
        }
        if let Some(section) = last {
            self.waypoint[section as usize] = self.target;
        }
    }

    /// First non-empty section at or after `from`.
    fn first_section_from(&self, from: Section) -> Option<Section> {
        let mut section = Some(from);
        while let Some(s) = section {
            if self.section_length(s) >= EPSILON_LENGTH {
                return Some(s);
            }
            section = s.next();
        }
        None
    }

    /// Size the current section into segments and seed the velocity curve.
    fn init_section(&mut self, nom_segment_usec: f64) {
        let length = self.section_length(self.section);
        let (v0, v1) = self.section_velocities(self.section);
        let time = if self.section == Section::Body {
            length / v0.max(EPSILON)
        } else {
            2.0 * length / (v0 + v1).max(EPSILON)
        };
        let mut segments = (time / usec_to_minutes(nom_segment_usec)).ceil().max(1.0);
        if segments > MAX_SECTION_SEGMENTS {
            trace!(section = ?self.section, segments, "segment count clamped");
            segments = MAX_SECTION_SEGMENTS;
        }
        self.segment_count = segments as u32;
        self.segment_time = time / segments;
        self.init_forward_diffs(v0, v1, segments);
        self.section_state = SectionState::FirstHalf;
        trace!(
            section = ?self.section,
            length,
            segments = self.segment_count,
            "section started"
        );
    }

    fn init_forward_diffs(&mut self, v0: f64, v1: f64, segments: f64) {
        let h = 1.0 / segments;
        let curve = |k: f64| {
            let t = (k + 0.5) * h;
            v0 + (v1 - v0) * t * t * t * (10.0 - 15.0 * t + 6.0 * t * t)
        };
        let mut table: [f64; 6] = std::array::from_fn(|k| curve(k as f64));
        self.segment_velocity = table[0];
        for level in 0..5 {
            for i in 0..(5 - level) {
                table[i] = table[i + 1] - table[i];
            }
            self.forward_diff[level] = table[0];
        }
    }

    fn advance_velocity(&mut self) {
        let d = &mut self.forward_diff;
        self.segment_velocity += d[0];
        d[0] += d[1];
        d[1] += d[2];
        d[2] += d[3];
        d[3] += d[4];
    }
}

// ─── Runtime Operations ─────────────────────────────────────────────

impl<K: Kinematics> MotionCore<K> {
    /// Execute one runtime step.
    ///
    /// Runs a pending out-of-band dwell first, then the running buffer
    /// (promoting the next planned one if nothing runs).
    pub fn tick(&mut self) -> Tick {
        if let Some(tick) = self.exec_out_of_band_dwell() {
            return tick;
        }
        let Some(index) = self.pool.get_run_buffer() else {
            return Tick::Idle;
        };
        match self.pool.get(index).move_kind {
            MoveKind::Aline => self.exec_aline(index),
            MoveKind::Dwell => self.exec_dwell(index),
            MoveKind::Null => {
                self.finish_move();
                Tick::Idle
            }
            MoveKind::Command
            | MoveKind::Tool
            | MoveKind::SpindleSpeed
            | MoveKind::Stop
            | MoveKind::End => {
                let command = self.pool.get(index).command;
                self.finish_move();
                command.map_or(Tick::Idle, Tick::Command)
            }
        }
    }

    /// Request a dwell outside the queue, run before the next buffer starts.
    pub fn request_out_of_band_dwell(&mut self, seconds: f64) {
        if seconds > 0.0 {
            self.mr.oob_dwell_usec += seconds * 1_000_000.0;
            debug!(seconds, "out-of-band dwell requested");
        }
    }

    fn exec_out_of_band_dwell(&mut self) -> Option<Tick> {
        if self.mr.move_state != MoveState::Off || self.mr.oob_dwell_usec <= 0.0 {
            return None;
        }
        let time_us = self.mr.oob_dwell_usec.min(self.config.nom_segment_usec);
        self.mr.oob_dwell_usec -= time_us;
        Some(Tick::Dwell { time_us })
    }

    fn exec_dwell(&mut self, index: usize) -> Tick {
        if self.mr.move_state == MoveState::Off {
            let bf = self.pool.get_mut(index);
            bf.move_state = MoveState::Run;
            self.mr.gm = bf.gm;
            self.mr.dwell_usec = bf.gm.dwell_seconds * 1_000_000.0;
            self.mr.move_state = MoveState::Run;
            self.mr.segment_velocity = 0.0;
        }
        if self.mr.dwell_usec <= 0.0 {
            self.finish_move();
            return Tick::Idle;
        }
        let time_us = self.mr.dwell_usec.min(self.config.nom_segment_usec);
        self.mr.dwell_usec -= time_us;
        self.pool
            .time_in_run
            .store(usec_to_minutes(self.mr.dwell_usec));
        if self.mr.dwell_usec <= 0.0 {
            self.finish_move();
        }
        Tick::Dwell { time_us }
    }

    fn exec_aline(&mut self, index: usize) -> Tick {
        if self.mr.move_state == MoveState::Off {
            self.load_move(index);
            match self.mr.first_section_from(Section::Head) {
                Some(section) => self.mr.section = section,
                None => {
                    self.mr.position = self.mr.target;
                    self.finish_move();
                    self.mr.handoff_velocity = self.mr.exit_velocity;
                    return Tick::Idle;
                }
            }
        }

        if self.mr.section_state == SectionState::New {
            self.mr.init_section(self.config.nom_segment_usec);
        }
        match self.mr.section_state {
            SectionState::FirstHalf => self.mr.section_state = SectionState::SecondHalf,
            _ => self.mr.advance_velocity(),
        }
        let segment = self.exec_segment();

        if self.mr.segment_count == 0 {
            match self.mr.section.next().and_then(|s| self.mr.first_section_from(s)) {
                Some(section) => {
                    self.mr.section = section;
                    self.mr.section_state = SectionState::New;
                }
                None => {
                    trace!(index, "move finished");
                    self.finish_move();
                    self.mr.handoff_velocity = self.mr.exit_velocity;
                }
            }
        }
        Tick::Segment(segment)
    }

    /// Copy the running buffer into the runtime context.
    fn load_move(&mut self, index: usize) {
        let bf = self.pool.get_mut(index);
        bf.move_state = MoveState::Run;
        let mr = &mut self.mr;
        mr.move_state = MoveState::Run;
        mr.unit = bf.unit;
        mr.target = bf.gm.target;
        mr.gm = bf.gm;
        mr.head_length = bf.head_length;
        mr.body_length = bf.body_length;
        mr.tail_length = bf.tail_length;
        mr.entry_velocity = bf.entry_velocity;
        mr.cruise_velocity = bf.cruise_velocity;
        mr.exit_velocity = bf.exit_velocity;
        mr.section = Section::Head;
        mr.section_state = SectionState::New;
        mr.compute_waypoints();
        let real_move_time = bf.real_move_time;
        self.pool.time_in_run.store(real_move_time);
        trace!(
            index,
            entry = mr.entry_velocity,
            cruise = mr.cruise_velocity,
            exit = mr.exit_velocity,
            "move loaded"
        );
    }

    /// Advance the position by one segment and convert it to motor steps.
    fn exec_segment(&mut self) -> SegmentCommand {
        let mr = &mut self.mr;
        mr.segment_count = mr.segment_count.saturating_sub(1);
        if mr.segment_count == 0 {
            mr.position = mr.waypoint[mr.section as usize];
        } else {
            let distance = mr.segment_velocity * mr.segment_time;
            for (p, u) in mr.position.iter_mut().zip(mr.unit.iter()) {
                *p += u * distance;
            }
        }

        let target_steps = self.kinematics.inverse(&mr.position);
        let mut travel_steps = [0.0; MOTORS];
        for m in 0..MOTORS {
            mr.commanded_steps[m] = mr.position_steps[m];
            travel_steps[m] = target_steps[m] - mr.position_steps[m];
            mr.following_error[m] = mr.encoder_steps[m] - mr.commanded_steps[m];
        }
        mr.position_steps = target_steps;

        let remaining = (self.pool.time_in_run.load() - mr.segment_time).max(0.0);
        self.pool.time_in_run.store(remaining);

        SegmentCommand {
            travel_steps,
            following_error: mr.following_error,
            segment_time_us: minutes_to_usec(mr.segment_time),
            velocity: mr.segment_velocity,
        }
    }

    /// Free the running buffer and return the runtime to idle.
    fn finish_move(&mut self) {
        self.mr.move_state = MoveState::Off;
        self.mr.handoff_velocity = 0.0;
        self.mr.section_state = SectionState::Off;
        self.mr.segment_velocity = 0.0;
        self.pool.free_run_buffer();
    }

    // ── Runtime state ──

    /// Whether anything is executing or waiting to execute.
    pub fn runtime_busy(&self) -> bool {
        self.mr.move_state != MoveState::Off
            || self.pool.has_runnable_buffer()
            || self.mr.oob_dwell_usec > 0.0
    }

    /// Velocity of the segment being executed [mm/min].
    #[inline]
    pub fn runtime_velocity(&self) -> f64 {
        self.mr.segment_velocity
    }

    /// Machine position of `axis` [mm].
    #[inline]
    pub fn runtime_absolute_position(&self, axis: Axis) -> f64 {
        self.mr.position[axis.index()]
    }

    /// Machine position of every axis [mm].
    #[inline]
    pub fn runtime_position(&self) -> &[f64; AXES] {
        &self.mr.position
    }

    /// Position of `axis` in the work coordinates of the running move [mm].
    #[inline]
    pub fn runtime_work_position(&self, axis: Axis) -> f64 {
        self.mr.position[axis.index()] - self.mr.gm.work_offset[axis.index()]
    }

    /// G-code state of the running (or last run) move.
    #[inline]
    pub fn runtime_gcode_state(&self) -> &GcodeState {
        &self.mr.gm
    }

    pub fn zero_segment_velocity(&mut self) {
        self.mr.segment_velocity = 0.0;
    }

    /// Override the runtime position of one axis.
    ///
    /// Call [`Self::set_steps_to_runtime_position`] afterwards to keep the
    /// step counters consistent.
    pub fn set_runtime_position(&mut self, axis: Axis, position: f64) {
        self.mr.position[axis.index()] = position;
        if self.mr.move_state == MoveState::Off {
            self.mr.target[axis.index()] = position;
        }
    }

    /// Set every step counter to the steps of the runtime position.
    pub fn set_steps_to_runtime_position(&mut self) {
        let steps = self.kinematics.inverse(&self.mr.position);
        self.mr.position_steps = steps;
        self.mr.commanded_steps = steps;
        self.mr.encoder_steps = steps;
        self.mr.following_error = [0.0; MOTORS];
    }

    /// Latest encoder readings [steps].
    pub fn sample_encoders(&mut self, steps: &[f64; MOTORS]) {
        self.mr.encoder_steps = *steps;
    }

    /// Encoder minus commanded position of the last segment [steps].
    #[inline]
    pub fn following_error(&self) -> &[f64; MOTORS] {
        &self.mr.following_error
    }

    /// Motor position after the last emitted segment [steps].
    #[inline]
    pub fn position_steps(&self) -> &[f64; MOTORS] {
        &self.mr.position_steps
    }
}
