//! Scheduler cycle: feed job → plan → tick → I/O → probe callback.
//!
//! ## RT Setup Sequence
//! 1. `mlockall(MCL_CURRENT | MCL_FUTURE)`: lock all pages.
//! 2. Prefault stack pages.
//! 3. `sched_setaffinity`: pin to an isolated CPU core.
//! 4. `sched_setscheduler(SCHED_FIFO, prio)`: RT priority.
//!
//! All RT calls are no-ops without the `rt` feature.
//!
//! ## Cycle Body
//! One [`CycleRunner::step`] runs the planning context (job feed and
//! `plan_buffer`), one runtime tick, the simulated I/O update and the probing
//! callback. Time is simulated: each cycle advances the clock by the duration
//! of what the tick produced, or by one nominal segment when idle.
//!
//! ## Pacing
//! [`CycleRunner::run`] paces cycles at the simulated durations with
//! `clock_nanosleep(TIMER_ABSTIME)` (`rt` feature) or `thread::sleep`.
//! [`CycleRunner::run_to_completion`] runs unpaced.

use std::sync::atomic::{AtomicBool, Ordering};

use cnc_common::consts::AXES;
use tracing::{debug, info};

use crate::error::{CycleError, PlannerError, ProbeError};
use crate::hal::{Encoders, SimIo};
use crate::job::{Job, JobStep, SpindleWord};
use crate::kinematics::Kinematics;
use crate::machine::{Machine, ProbeCallback, SpindleMode};
use crate::planner::buffer::MoveCommand;
use crate::runtime::Tick;

// ─── Cycle Statistics ───────────────────────────────────────────────

/// O(1) per-cycle timing statistics.
#[derive(Debug, Clone)]
pub struct CycleStats {
    /// Total cycles executed.
    pub cycle_count: u64,
    /// Last cycle duration [ns].
    pub last_cycle_ns: i64,
    /// Minimum cycle duration [ns].
    pub min_cycle_ns: i64,
    /// Maximum cycle duration [ns].
    pub max_cycle_ns: i64,
    /// Running sum for average computation.
    pub sum_cycle_ns: i64,
    /// Cycles whose body took longer than the period.
    pub overruns: u64,
    /// Maximum wake-up latency [ns].
    pub max_latency_ns: i64,
}

impl Default for CycleStats {
    fn default() -> Self {
        Self::new()
    }
}

impl CycleStats {
    pub const fn new() -> Self {
        Self {
            cycle_count: 0,
            last_cycle_ns: 0,
            min_cycle_ns: i64::MAX,
            max_cycle_ns: 0,
            sum_cycle_ns: 0,
            overruns: 0,
            max_latency_ns: 0,
        }
    }

    /// Record a cycle duration. O(1), no allocation.
    #[inline]
    pub fn record(&mut self, duration_ns: i64, latency_ns: i64) {
        self.cycle_count += 1;
        self.last_cycle_ns = duration_ns;
        self.min_cycle_ns = self.min_cycle_ns.min(duration_ns);
        self.max_cycle_ns = self.max_cycle_ns.max(duration_ns);
        self.sum_cycle_ns += duration_ns;
        self.max_latency_ns = self.max_latency_ns.max(latency_ns);
    }

    /// Average cycle time [ns] (0 if no cycles).
    #[inline]
    pub fn avg_cycle_ns(&self) -> i64 {
        if self.cycle_count == 0 {
            0
        } else {
            self.sum_cycle_ns / self.cycle_count as i64
        }
    }
}

// ─── RT Setup ───────────────────────────────────────────────────────

#[cfg(feature = "rt")]
fn rt_mlockall() -> Result<(), CycleError> {
    use nix::sys::mman::{MlockallFlags, mlockall};
    mlockall(MlockallFlags::MCL_CURRENT | MlockallFlags::MCL_FUTURE)
        .map_err(|e| CycleError::RtSetup(format!("mlockall failed: {e}")))
}

#[cfg(not(feature = "rt"))]
fn rt_mlockall() -> Result<(), CycleError> {
    Ok(())
}

/// Touch 512 KiB of stack so the cycle never page-faults on it.
fn prefault_stack() {
    let mut buf = [0u8; 512 * 1024];
    for byte in buf.iter_mut() {
        // SAFETY: `byte` is a valid, aligned, exclusive reference.
        unsafe { core::ptr::write_volatile(byte, 0xFF) };
    }
    core::hint::black_box(&buf);
}

#[cfg(feature = "rt")]
fn rt_set_affinity(cpu: usize) -> Result<(), CycleError> {
    use nix::sched::{CpuSet, sched_setaffinity};
    use nix::unistd::Pid;

    let mut cpuset = CpuSet::new();
    cpuset
        .set(cpu)
        .map_err(|e| CycleError::RtSetup(format!("CpuSet::set({cpu}) failed: {e}")))?;
    sched_setaffinity(Pid::from_raw(0), &cpuset)
        .map_err(|e| CycleError::RtSetup(format!("sched_setaffinity failed: {e}")))
}

#[cfg(not(feature = "rt"))]
fn rt_set_affinity(_cpu: usize) -> Result<(), CycleError> {
    Ok(())
}

#[cfg(feature = "rt")]
fn rt_set_scheduler(priority: i32) -> Result<(), CycleError> {
    let param = libc::sched_param {
        sched_priority: priority,
    };
    // SAFETY: `param` outlives the call; pid 0 is the calling thread.
    let ret = unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) };
    if ret != 0 {
        let err = std::io::Error::last_os_error();
        return Err(CycleError::RtSetup(format!(
            "sched_setscheduler(SCHED_FIFO, {priority}) failed: {err}"
        )));
    }
    Ok(())
}

#[cfg(not(feature = "rt"))]
fn rt_set_scheduler(_priority: i32) -> Result<(), CycleError> {
    Ok(())
}

/// Full RT setup sequence. Call once before [`CycleRunner::run`].
pub fn rt_setup(cpu_core: usize, rt_priority: i32) -> Result<(), CycleError> {
    rt_mlockall()?;
    prefault_stack();
    rt_set_affinity(cpu_core)?;
    rt_set_scheduler(rt_priority)?;
    Ok(())
}

// ─── Cycle Runner ───────────────────────────────────────────────────

/// Whether the job has finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Running,
    Done,
}

/// Totals of a completed run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub cycles: u64,
    pub segments: u64,
    pub commands: u64,
    pub probes: u64,
    /// Simulated machine time [µs].
    pub machine_time_us: f64,
    pub final_position: [f64; AXES],
}

/// Drives a [`Machine`] with simulated I/O through a [`Job`].
pub struct CycleRunner<K> {
    machine: Machine<K, SimIo>,
    job: Job,
    next_step: usize,
    /// A probe was requested and has not completed.
    probing: bool,
    /// Simulated time [µs].
    clock_us: f64,
    /// Duration of the last cycle's output [µs].
    last_tick_us: f64,
    segments: u64,
    commands: u64,
    probes: u64,
    pub stats: CycleStats,
}

impl<K: Kinematics> CycleRunner<K> {
    pub fn new(machine: Machine<K, SimIo>, job: Job) -> Self {
        Self {
            machine,
            job,
            next_step: 0,
            probing: false,
            clock_us: 0.0,
            last_tick_us: 0.0,
            segments: 0,
            commands: 0,
            probes: 0,
            stats: CycleStats::new(),
        }
    }

    #[inline]
    pub fn machine(&self) -> &Machine<K, SimIo> {
        &self.machine
    }

    #[inline]
    pub fn machine_mut(&mut self) -> &mut Machine<K, SimIo> {
        &mut self.machine
    }

    /// Simulated time [µs].
    #[inline]
    pub fn clock_us(&self) -> f64 {
        self.clock_us
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            cycles: self.stats.cycle_count,
            segments: self.segments,
            commands: self.commands,
            probes: self.probes,
            machine_time_us: self.clock_us,
            final_position: *self.machine.core().runtime_position(),
        }
    }

    fn is_done(&self) -> bool {
        self.next_step >= self.job.steps.len()
            && !self.probing
            && !self.machine.core().runtime_busy()
    }

    /// Run one scheduler cycle.
    pub fn step(&mut self) -> Result<StepOutcome, CycleError> {
        self.feed_job()?;

        let now_ms = (self.clock_us / 1000.0) as u64;
        self.machine.core_mut().set_time_ms(now_ms);
        self.machine.core_mut().plan_buffer();

        let tick = self.machine.core_mut().tick();
        self.last_tick_us = match tick {
            Tick::Segment(segment) => {
                self.segments += 1;
                segment.segment_time_us
            }
            Tick::Dwell { time_us } => time_us,
            Tick::Command(command) => {
                self.commands += 1;
                self.exec_command(command);
                0.0
            }
            Tick::Idle => self.machine.core().planner_config().nom_segment_usec,
        };
        self.clock_us += self.last_tick_us;

        let position = *self.machine.core().runtime_position();
        let steps = *self.machine.core().position_steps();
        self.machine.io_mut().observe(&position, &steps);
        let encoders = self.machine.io().read_encoders();
        self.machine.core_mut().sample_encoders(&encoders);

        match self.machine.probing_callback() {
            ProbeCallback::Noop | ProbeCallback::InProgress => {}
            ProbeCallback::Ok => {
                self.probing = false;
                self.probes += 1;
            }
            ProbeCallback::Failed(e) => {
                return Err(CycleError::Job {
                    step: self.next_step.saturating_sub(1),
                    reason: e.to_string(),
                });
            }
        }

        self.machine.core().test_assertions()?;
        self.machine.cycle_end();

        Ok(if self.is_done() {
            StepOutcome::Done
        } else {
            StepOutcome::Running
        })
    }

    /// Queue job steps while the planner has headroom. Stops at a probe
    /// until its cycle completes.
    fn feed_job(&mut self) -> Result<(), CycleError> {
        while !self.probing && self.machine.core().has_headroom() {
            let Some(step) = self.job.steps.get(self.next_step).cloned() else {
                return Ok(());
            };
            match self.exec_step(&step) {
                Ok(()) => self.next_step += 1,
                Err(ProbeError::Planner(PlannerError::BufferUnavailable)) => return Ok(()),
                Err(e) => {
                    return Err(CycleError::Job {
                        step: self.next_step,
                        reason: e.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    fn exec_step(&mut self, step: &JobStep) -> Result<(), ProbeError> {
        let m = &mut self.machine;
        match step {
            JobStep::Traverse(words) => {
                let (values, flags) = words.values();
                Ok(m.straight_traverse(&values, flags)?)
            }
            JobStep::Feed(words) => {
                if let Some(feed_rate) = words.feed_rate {
                    m.set_feed_rate(feed_rate);
                }
                let (values, flags) = words.values();
                Ok(m.straight_feed(&values, flags)?)
            }
            JobStep::Probe(words) => {
                if let Some(feed_rate) = words.feed_rate {
                    m.set_feed_rate(feed_rate);
                }
                let (values, flags) = words.values();
                m.straight_probe(&values, flags)?;
                self.probing = true;
                Ok(())
            }
            JobStep::Dwell { seconds } => Ok(m.dwell(*seconds)?),
            JobStep::CoordSystem { coord_system } => {
                m.set_coord_system(*coord_system);
                Ok(())
            }
            JobStep::DistanceMode { distance_mode } => {
                m.set_distance_mode(*distance_mode);
                Ok(())
            }
            JobStep::Offset {
                coord_system,
                axis,
                offset,
            } => {
                m.set_coord_offset(*coord_system, *axis, *offset);
                Ok(())
            }
            JobStep::Tool { tool } => Ok(m.queue_command(MoveCommand::ToolChange(*tool))?),
            JobStep::SpindleSpeed { rpm } => {
                Ok(m.queue_command(MoveCommand::SpindleSpeed(*rpm))?)
            }
            JobStep::Spindle { mode, rpm } => {
                let mode = match mode {
                    SpindleWord::Off => SpindleMode::Off,
                    SpindleWord::Cw => SpindleMode::Cw,
                    SpindleWord::Ccw => SpindleMode::Ccw,
                };
                m.spindle_control(mode, *rpm);
                Ok(())
            }
            JobStep::Stop => Ok(m.queue_command(MoveCommand::ProgramStop)?),
            JobStep::End => Ok(m.queue_command(MoveCommand::ProgramEnd)?),
        }
    }

    fn exec_command(&mut self, command: MoveCommand) {
        match command {
            MoveCommand::ToolChange(tool) => info!(tool, "tool change"),
            MoveCommand::SpindleSpeed(rpm) => {
                let mode = self.machine.spindle().mode;
                self.machine.spindle_control(mode, rpm);
                debug!(rpm, "spindle speed");
            }
            MoveCommand::ProgramStop => info!("program stop"),
            MoveCommand::ProgramEnd => info!("program end"),
            MoveCommand::Custom(id) => debug!(id, "custom command"),
        }
    }

    /// Run without pacing until the job completes or `max_cycles` elapse.
    pub fn run_to_completion(&mut self, max_cycles: u64) -> Result<RunSummary, CycleError> {
        for _ in 0..max_cycles {
            self.stats.record(0, 0);
            if self.step()? == StepOutcome::Done {
                return Ok(self.summary());
            }
        }
        Err(CycleError::Job {
            step: self.next_step,
            reason: format!("job did not complete within {max_cycles} cycles"),
        })
    }

    /// Run paced at the simulated segment times until the job completes or
    /// `running` is cleared.
    pub fn run(&mut self, running: &AtomicBool) -> Result<RunSummary, CycleError> {
        #[cfg(feature = "rt")]
        {
            self.run_rt_loop(running)
        }

        #[cfg(not(feature = "rt"))]
        {
            self.run_sim_loop(running)
        }
    }

    /// Cycle loop using `clock_nanosleep(TIMER_ABSTIME)`.
    #[cfg(feature = "rt")]
    fn run_rt_loop(&mut self, running: &AtomicBool) -> Result<RunSummary, CycleError> {
        use nix::time::{ClockId, ClockNanosleepFlags, clock_gettime, clock_nanosleep};

        let clock = ClockId::CLOCK_MONOTONIC;
        let mut next_wake =
            clock_gettime(clock).map_err(|e| CycleError::RtSetup(format!("clock_gettime: {e}")))?;

        while running.load(Ordering::Relaxed) {
            let cycle_start = clock_gettime(clock)
                .map_err(|e| CycleError::RtSetup(format!("clock_gettime: {e}")))?;
            let wake_latency_ns = timespec_diff_ns(&cycle_start, &next_wake).abs();

            let outcome = self.step()?;

            let cycle_end = clock_gettime(clock)
                .map_err(|e| CycleError::RtSetup(format!("clock_gettime: {e}")))?;
            let duration_ns = timespec_diff_ns(&cycle_end, &cycle_start);
            self.stats.record(duration_ns, wake_latency_ns);

            let period_ns = (self.last_tick_us * 1000.0) as i64;
            if duration_ns > period_ns && period_ns > 0 {
                self.stats.overruns += 1;
            }
            if outcome == StepOutcome::Done {
                return Ok(self.summary());
            }

            next_wake = timespec_add_ns(next_wake, period_ns);
            let _ = clock_nanosleep(clock, ClockNanosleepFlags::TIMER_ABSTIME, &next_wake);
        }
        info!("run interrupted");
        Ok(self.summary())
    }

    /// Cycle loop using `std::thread::sleep`.
    #[cfg(not(feature = "rt"))]
    fn run_sim_loop(&mut self, running: &AtomicBool) -> Result<RunSummary, CycleError> {
        use std::time::{Duration, Instant};

        while running.load(Ordering::Relaxed) {
            let cycle_start = Instant::now();

            let outcome = self.step()?;

            let elapsed = cycle_start.elapsed();
            let duration_ns = elapsed.as_nanos() as i64;
            self.stats.record(duration_ns, 0);

            let period = Duration::from_nanos((self.last_tick_us * 1000.0) as u64);
            if elapsed > period && !period.is_zero() {
                self.stats.overruns += 1;
            }
            if outcome == StepOutcome::Done {
                return Ok(self.summary());
            }
            if let Some(remaining) = period.checked_sub(elapsed) {
                std::thread::sleep(remaining);
            }
        }
        info!("run interrupted");
        Ok(self.summary())
    }
}

// ─── Time Helpers ───────────────────────────────────────────────────

#[cfg(feature = "rt")]
fn timespec_add_ns(ts: nix::sys::time::TimeSpec, ns: i64) -> nix::sys::time::TimeSpec {
    use nix::sys::time::TimeSpec;
    let mut secs = ts.tv_sec();
    let mut nanos = ts.tv_nsec() + ns;
    while nanos >= 1_000_000_000 {
        secs += 1;
        nanos -= 1_000_000_000;
    }
    while nanos < 0 {
        secs -= 1;
        nanos += 1_000_000_000;
    }
    TimeSpec::new(secs, nanos)
}

#[cfg(feature = "rt")]
fn timespec_diff_ns(a: &nix::sys::time::TimeSpec, b: &nix::sys::time::TimeSpec) -> i64 {
    (a.tv_sec() - b.tv_sec()) * 1_000_000_000 + (a.tv_nsec() - b.tv_nsec())
}

// ─── Tests ──────────────────────────────────────────────────────────
