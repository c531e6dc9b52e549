//! G38.2 straight probe cycle.
//!
//! The cycle runs as a chain of steps, one per callback, each entered only
//! when the runtime is idle so every step sees the result of the previous
//! move.
//!
//! ## Steps
//!
//! | Step           | Action                                                   | Next          |
//! |----------------|----------------------------------------------------------|---------------|
//! | `Init`         | save modes, G53 + absolute + high jerk, validate, arm    | `Start`       |
//! | `Start`        | already in contact → success; else queue probe move      | `Backoff`/`Finish` |
//! | `Backoff`      | contact → move back to the latched contact position      | `Finish`      |
//! | `Finish`       | record results, emit report                              | `FinalizeExit`|
//! | `FinalizeExit` | restore modes, disarm, resume spindle, end cycle         | done          |
//!
//! Validation failures in `Init` take the error exit: full restoration, a
//! diagnostic, and [`ProbeCallback::Failed`]. A probe that never touches
//! anything is not an error; the cycle completes with `ProbeState::Failed`.

use cnc_common::axis::{Axis, AxisFlags, axis_vector_length};
use cnc_common::consts::AXES;
use cnc_common::gcode::{CoordSystem, DistanceMode, MotionMode};
use tracing::{debug, error, info, warn};

use super::report::{probe_diagnostic, probe_report};
use super::{CycleState, Machine, ProbeState};
use crate::error::{PlannerError, ProbeError};
use crate::hal::{Encoders, InputState, SwitchInputs};
use crate::kinematics::Kinematics;

// ─── Probe Steps ────────────────────────────────────────────────────

/// Next step of the probing cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProbeStep {
    #[default]
    Init,
    Start,
    Backoff,
    Finish,
    FinalizeExit,
}

/// Result of one probing callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeCallback {
    /// No probe cycle active or pending.
    Noop,
    /// Cycle running; call again.
    InProgress,
    /// Cycle completed. Check `probe_state()` for contact.
    Ok,
    /// Cycle aborted by a configuration error; settings restored.
    Failed(ProbeError),
}

/// State saved across the probing cycle.
#[derive(Debug, Clone, Default)]
pub(crate) struct ProbingContext {
    step: ProbeStep,
    /// Probe endpoint in machine coordinates.
    target: [f64; AXES],
    flags: AxisFlags,
    input: u8,
    saved_coord_system: CoordSystem,
    saved_distance_mode: DistanceMode,
    saved_jerk: [f64; AXES],
}

// ─── Probing Cycle ──────────────────────────────────────────────────

impl<K: Kinematics, I: SwitchInputs + Encoders> Machine<K, I> {
    /// Request a probe toward `target` (machine coordinates) on the axes in
    /// `flags`. The cycle starts on the next callback with an idle runtime.
    ///
    /// # Errors
    ///
    /// - `FeedRateNotSpecified`: modal feed rate is zero
    /// - `AxisMissing`: none of X, Y, Z flagged
    /// - `CycleActive`: a probing cycle is already running
    ///
    /// Nothing is changed when an error is returned.
    pub fn straight_probe(
        &mut self,
        target: &[f64; AXES],
        flags: AxisFlags,
    ) -> Result<(), ProbeError> {
        if self.cycle_state == CycleState::Probe {
            return Err(ProbeError::CycleActive);
        }
        if self.gm.feed_rate == 0.0 {
            return Err(ProbeError::FeedRateNotSpecified);
        }
        if !flags.intersects(AxisFlags::LINEAR) {
            return Err(ProbeError::AxisMissing);
        }

        self.probe.target = *target;
        self.probe.flags = flags;
        self.probe.step = ProbeStep::Init;
        self.probe_results = [0.0; AXES];
        self.probe_state = ProbeState::Waiting;
        self.gm.motion_mode = MotionMode::StraightProbe;
        debug!(?target, ?flags, "probe requested");
        Ok(())
    }

    /// Advance the probing cycle by one step.
    ///
    /// Returns `Noop` when no probe is active or pending and `InProgress`
    /// while the runtime is still executing the previous step's move.
    pub fn probing_callback(&mut self) -> ProbeCallback {
        if self.cycle_state != CycleState::Probe && self.probe_state != ProbeState::Waiting {
            return ProbeCallback::Noop;
        }
        if self.core.runtime_busy() {
            return ProbeCallback::InProgress;
        }
        match self.probe.step {
            ProbeStep::Init => self.probing_init(),
            ProbeStep::Start => self.probing_start(),
            ProbeStep::Backoff => self.probing_backoff(),
            ProbeStep::Finish => self.probing_finish(),
            ProbeStep::FinalizeExit => self.probing_finalize_exit(),
        }
    }

    #[inline]
    pub fn probe_step(&self) -> ProbeStep {
        self.probe.step
    }

    fn probing_init(&mut self) -> ProbeCallback {
        self.probe_state = ProbeState::Failed;
        self.cycle_state = CycleState::Probe;
        self.probe.input = self.probe_config.input;

        self.probe.saved_coord_system = self.gm.coord_system;
        self.probe.saved_distance_mode = self.gm.distance_mode;
        self.gm.distance_mode = DistanceMode::Absolute;
        self.gm.coord_system = CoordSystem::Absolute;

        let mut start = [0.0; AXES];
        for axis in Axis::ALL {
            let i = axis.index();
            self.probe.saved_jerk[i] = self.core.axis_jerk(axis);
            let jerk_high = self.core.axis_config(axis).jerk_high;
            self.core.set_axis_jerk(axis, jerk_high);
            start[i] = self.core.runtime_absolute_position(axis);
            if !self.probe.flags.contains_axis(axis) {
                self.probe.target[i] = start[i];
            }
        }

        if axis_vector_length(&start, &self.probe.target) < self.probe_config.minimum_travel {
            return self.probing_error_exit(ProbeError::InvalidDestination);
        }
        if let Some(axis) = (self.probe.flags & AxisFlags::ROTARY).axes().next() {
            return self.probing_error_exit(ProbeError::AxisCannotMove(axis));
        }

        self.io.set_probing_mode(self.probe.input, true);
        self.spindle_optional_pause();
        info!(target = ?self.probe.target, input = self.probe.input, "probe cycle started");
        self.set_probe_step(ProbeStep::Start)
    }

    fn probing_start(&mut self) -> ProbeCallback {
        if self.io.read_input(self.probe.input) == InputState::Active {
            self.probe_state = ProbeState::Succeeded;
            debug!("probe already in contact");
            return self.set_probe_step(ProbeStep::Finish);
        }
        let target = self.probe.target;
        match self.straight_feed(&target, self.probe.flags) {
            Ok(()) => self.set_probe_step(ProbeStep::Backoff),
            Err(PlannerError::BufferUnavailable) => ProbeCallback::InProgress,
            Err(e) => self.probing_error_exit(e.into()),
        }
    }

    fn probing_backoff(&mut self) -> ProbeCallback {
        if self.io.read_input(self.probe.input) != InputState::Active {
            self.probe_state = ProbeState::Failed;
            return self.set_probe_step(ProbeStep::Finish);
        }

        self.probe_state = ProbeState::Succeeded;
        let contact = self.core.kinematics().forward(&self.io.encoder_snapshot());
        debug!(?contact, "probe contact");
        self.flush_planner();
        match self.straight_feed(&contact, self.probe.flags) {
            Ok(()) => self.set_probe_step(ProbeStep::Finish),
            Err(e) => self.probing_error_exit(e.into()),
        }
    }

    fn probing_finish(&mut self) -> ProbeCallback {
        self.probe_state = if self.io.read_input(self.probe.input) == InputState::Active {
            ProbeState::Succeeded
        } else {
            ProbeState::Failed
        };
        for axis in Axis::ALL {
            self.probe_results[axis.index()] = self.core.runtime_absolute_position(axis);
        }

        match probe_report(
            self.probe_state == ProbeState::Succeeded,
            &self.probe_results,
            self.probe.flags,
        ) {
            Ok(report) => {
                info!(report = report.as_str(), "probe report");
                self.last_report = Some(report);
            }
            Err(_) => {
                warn!("probe report does not fit the report buffer");
                self.last_report = None;
            }
        }
        self.set_probe_step(ProbeStep::FinalizeExit)
    }

    fn probing_finalize_exit(&mut self) -> ProbeCallback {
        self.restore_probe_settings();
        ProbeCallback::Ok
    }

    fn probing_error_exit(&mut self, e: ProbeError) -> ProbeCallback {
        match probe_diagnostic(&e) {
            Ok(diagnostic) => error!(diagnostic = diagnostic.as_str(), "probe cycle failed"),
            Err(_) => error!(error = %e, "probe cycle failed"),
        }
        self.restore_probe_settings();
        ProbeCallback::Failed(e)
    }

    /// Undo everything `probing_init` changed. Safe to call more than once.
    fn restore_probe_settings(&mut self) {
        self.flush_planner();
        self.io.set_probing_mode(self.probe.input, false);
        for axis in Axis::ALL {
            self.core
                .set_axis_jerk(axis, self.probe.saved_jerk[axis.index()]);
        }
        self.gm.coord_system = self.probe.saved_coord_system;
        self.gm.distance_mode = self.probe.saved_distance_mode;
        self.spindle_resume(self.spindle_dwell_seconds);
        self.gm.motion_mode = MotionMode::CancelMotionMode;
        self.cycle_state = CycleState::Off;
        self.probe.step = ProbeStep::Init;
        debug!(state = ?self.probe_state, "probe cycle ended");
    }

    fn set_probe_step(&mut self, step: ProbeStep) -> ProbeCallback {
        self.probe.step = step;
        ProbeCallback::InProgress
    }
}
