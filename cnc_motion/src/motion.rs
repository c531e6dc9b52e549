//! Motion core: single owner of the planner ring, the planning and runtime
//! contexts, the axis limits and the kinematics collaborator.
//!
//! The operations are split by execution context:
//!
//! - [`crate::planner`]: `aline`, `dwell`, `queue_command`, `plan_buffer`
//!   (planning context, low priority)
//! - [`crate::runtime`]: `tick` and runtime state accessors (runtime
//!   context, once per segment)
//! - this module: construction, configuration access, flush/halt and
//!   integrity checks
//!
//! Buffers in `Empty`/`Planning`/`Queued` belong to the planning side; the
//! `Running` buffer belongs to the runtime until it is freed.

use cnc_common::axis::Axis;
use cnc_common::config::{AxisConfig, MotionConfig, PlannerConfig};
use cnc_common::consts::AXES;
use tracing::{debug, info};

use crate::error::PoolIntegrityError;
use crate::kinematics::Kinematics;
use crate::planner::MoveMaster;
use crate::planner::pool::BufferPool;
use crate::runtime::MoveRuntime;

/// Planner + runtime with all their state.
#[derive(Debug)]
pub struct MotionCore<K> {
    pub(crate) pool: BufferPool,
    pub(crate) mm: MoveMaster,
    pub(crate) mr: MoveRuntime,
    pub(crate) axes: [AxisConfig; AXES],
    pub(crate) config: PlannerConfig,
    pub(crate) kinematics: K,
    /// Scheduler time, used for the forced replan deadline.
    pub(crate) now_ms: u64,
}

impl<K: Kinematics> MotionCore<K> {
    pub fn new(config: &MotionConfig, kinematics: K) -> Self {
        Self {
            pool: BufferPool::new(config.planner.planner_timeout_ms),
            mm: MoveMaster::default(),
            mr: MoveRuntime::new(),
            axes: config.axis_table(),
            config: config.planner.clone(),
            kinematics,
            now_ms: 0,
        }
    }

    /// Advance the scheduler clock.
    #[inline]
    pub fn set_time_ms(&mut self, now_ms: u64) {
        self.now_ms = now_ms;
    }

    #[inline]
    pub fn now_ms(&self) -> u64 {
        self.now_ms
    }

    #[inline]
    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    #[inline]
    pub fn kinematics(&self) -> &K {
        &self.kinematics
    }

    #[inline]
    pub fn planner_config(&self) -> &PlannerConfig {
        &self.config
    }

    #[inline]
    pub fn axis_config(&self, axis: Axis) -> &AxisConfig {
        &self.axes[axis.index()]
    }

    /// Active jerk limit of `axis` [mm/min³ / 1e6].
    #[inline]
    pub fn axis_jerk(&self, axis: Axis) -> f64 {
        self.axes[axis.index()].jerk_max
    }

    /// Change the jerk limit used for moves queued from now on.
    pub fn set_axis_jerk(&mut self, axis: Axis, jerk: f64) {
        self.axes[axis.index()].jerk_max = jerk;
    }

    /// Discard every queued move and resynchronize the planner position.
    ///
    /// Only safe while the runtime is idle or its current move may finish;
    /// the running buffer is kept. Returns the number of discarded buffers.
    pub fn flush_planner(&mut self) -> usize {
        let flushed = self.pool.flush_queued();
        self.mm.position = if self.pool.running().is_some() {
            self.mr.target
        } else {
            self.mr.handoff_velocity = 0.0;
            self.mr.position
        };
        debug!(flushed, "planner flushed");
        flushed
    }

    /// Abort all motion immediately: runtime stopped, every buffer freed,
    /// planner position set to where the runtime stopped.
    pub fn halt_runtime(&mut self) {
        self.mr.halt();
        self.pool.reset();
        self.mm.position = self.mr.position;
        info!("runtime halted");
    }

    /// Buffer ring consistency check.
    pub fn test_assertions(&self) -> Result<(), PoolIntegrityError> {
        self.pool.test_assertions()
    }
}
