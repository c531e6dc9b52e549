//! Lookahead planner.
//!
//! Producers hand straight lines, dwells and synchronous commands to the
//! planner, which claims a buffer from the ring, fills in the geometry and
//! kinematic limits of the move and commits it. Replanning then walks the
//! unlocked tail of the queue and assigns entry, cruise and exit velocities
//! so that every move can still come to a stop before the end of the queue.
//!
//! ## Replanning
//!
//! 1. **Backward pass** (newest → oldest): braking velocity of each line, the
//!    highest entry velocity from which it and all its successors can stop.
//! 2. **Forward pass** (oldest → newest): entry from the predecessor's exit,
//!    exit capped by the successor's entry bound, trapezoid per buffer.
//!
//! Lines whose exit hit a hard limit are marked non-replannable and bound
//! the next backward pass.
//!
//! ## Triggers (`plan_buffer`)
//!
//! | Trigger           | Condition                                               |
//! |-------------------|---------------------------------------------------------|
//! | Forced            | runtime found an unplanned buffer, or reset requested   |
//! | Starving          | queued time < `min_planned_usec`                        |
//! | New move          | committed and not in phat city                          |
//! | Deadline          | `planner_timeout_ms` elapsed since the first commit     |
//! | Crowded           | free buffers ≤ headroom                                 |

pub mod buffer;
pub mod pool;
pub mod zoid;

use cnc_common::axis::{Axis, AxisFlags};
use cnc_common::config::AxisConfig;
use cnc_common::consts::{
    AXES, EPSILON, EPSILON_LENGTH, JERK_MATCH_TOLERANCE, JERK_MULTIPLIER,
    PLANNER_BUFFER_HEADROOM, usec_to_minutes,
};
use cnc_common::gcode::{GcodeState, PathControl};
use tracing::{debug, trace};

use self::buffer::{BufferState, MoveCommand, MoveKind};
use self::zoid::{calculate_trapezoid, target_velocity};
use crate::error::PlannerError;
use crate::kinematics::Kinematics;
use crate::motion::MotionCore;

/// Junction velocity used for a straight-through junction [mm/min].
const JUNCTION_VELOCITY_UNLIMITED: f64 = 10_000_000.0;

// ─── Move Master ────────────────────────────────────────────────────

/// Planning context: end position of the last queued move and the jerk
/// terms cached from it.
#[derive(Debug, Clone)]
pub struct MoveMaster {
    /// Final position of the most recently planned move [mm].
    pub position: [f64; AXES],
    pub jerk: f64,
    pub recip_jerk: f64,
    pub cbrt_jerk: f64,
}

impl Default for MoveMaster {
    fn default() -> Self {
        Self {
            position: [0.0; AXES],
            jerk: 0.0,
            recip_jerk: 0.0,
            cbrt_jerk: 0.0,
        }
    }
}

impl MoveMaster {
    /// Refresh the cached jerk terms unless `jerk` matches within tolerance.
    fn update_jerk(&mut self, jerk: f64) {
        if (jerk - self.jerk).abs() > JERK_MATCH_TOLERANCE {
            self.jerk = jerk;
            self.recip_jerk = 1.0 / jerk;
            self.cbrt_jerk = jerk.cbrt();
        }
    }
}

// ─── Junction Velocity ──────────────────────────────────────────────

/// Maximum velocity through the junction between two unit vectors.
///
/// The corner is treated as a circular arc whose radius is set by the
/// per-axis junction deviation; the velocity is the one that keeps the
/// centripetal acceleration at `junction_acceleration`.
pub fn junction_velocity(
    a_unit: &[f64; AXES],
    b_unit: &[f64; AXES],
    axes: &[AxisConfig; AXES],
    junction_acceleration: f64,
) -> f64 {
    let costheta = -a_unit
        .iter()
        .zip(b_unit.iter())
        .map(|(a, b)| a * b)
        .sum::<f64>();

    if costheta < -0.99 {
        return JUNCTION_VELOCITY_UNLIMITED;
    }
    if costheta > 0.99 {
        return 0.0;
    }

    let deviation = |unit: &[f64; AXES]| {
        unit.iter()
            .zip(axes.iter())
            .map(|(u, ax)| (u * ax.junction_deviation).powi(2))
            .sum::<f64>()
            .sqrt()
    };
    let delta = (deviation(a_unit) + deviation(b_unit)) / 2.0;
    let sintheta_over2 = ((1.0 - costheta) / 2.0).sqrt();
    let radius = delta * sintheta_over2 / (1.0 - sintheta_over2);
    (radius * junction_acceleration).sqrt()
}

#[inline]
fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() < EPSILON.max(b.abs() * EPSILON)
}

// ─── Planner Operations ─────────────────────────────────────────────

impl<K: Kinematics> MotionCore<K> {
    /// Queue a jerk-limited straight line to `gm.target`.
    ///
    /// # Errors
    ///
    /// - `MinimumLengthMove` / `MinimumTimeMove`: move dropped, position unchanged
    /// - `ZeroFeedRate`: feed move with no feed rate
    /// - `BufferUnavailable`: ring full, retry later
    pub fn aline(&mut self, gm: &GcodeState) -> Result<(), PlannerError> {
        let mut gm = *gm;
        let mut delta = [0.0; AXES];
        for (i, d) in delta.iter_mut().enumerate() {
            *d = gm.target[i] - self.mm.position[i];
        }
        let length = delta.iter().map(|d| d * d).sum::<f64>().sqrt();
        if length < EPSILON_LENGTH {
            return Err(PlannerError::MinimumLengthMove);
        }

        let move_time = self.move_time(&gm, &delta, length)?;
        if move_time < usec_to_minutes(self.config.min_segment_usec) {
            trace!(length, move_time, "minimum time move dropped");
            return Err(PlannerError::MinimumTimeMove);
        }

        let unit = delta.map(|d| d / length);
        let (jerk_axis, jerk) = self.dominant_jerk(&unit);
        self.mm.update_jerk(jerk);

        let index = self
            .pool
            .get_write_buffer()
            .ok_or(PlannerError::BufferUnavailable)?;

        let prev = self.pool.get(self.pool.get(index).prev());
        let junction = if prev.is_live_aline() {
            junction_velocity(
                &prev.unit,
                &unit,
                &self.axes,
                self.config.junction_acceleration,
            )
        } else {
            0.0
        };

        let cruise_vmax = length / move_time;
        let mut entry_vmax = cruise_vmax.min(junction);
        if gm.path_control == PathControl::ExactStop {
            entry_vmax = 0.0;
        }
        gm.move_time = move_time;

        let bf = self.pool.get_mut(index);
        bf.unit = unit;
        bf.axis_flags = AxisFlags::from_bools(&unit.map(|u| u != 0.0));
        bf.length = length;
        bf.jerk_axis = jerk_axis;
        bf.jerk = self.mm.jerk;
        bf.recip_jerk = self.mm.recip_jerk;
        bf.cbrt_jerk = self.mm.cbrt_jerk;
        bf.cruise_vmax = cruise_vmax;
        bf.entry_vmax = entry_vmax;
        bf.delta_vmax = target_velocity(0.0, length, bf);
        bf.exit_vmax = cruise_vmax.min(entry_vmax + bf.delta_vmax);
        bf.braking_velocity = bf.delta_vmax;
        bf.cruise_velocity = cruise_vmax;
        bf.real_move_time = move_time;
        bf.replannable = true;
        bf.gm = gm;

        self.pool.commit_write_buffer(MoveKind::Aline, self.now_ms);
        self.mm.position = gm.target;
        trace!(index, length, cruise_vmax, entry_vmax, "aline queued");
        Ok(())
    }

    /// Queue a dwell of `seconds`. Motion stops at the dwell.
    pub fn dwell(&mut self, seconds: f64) -> Result<(), PlannerError> {
        let index = self
            .pool
            .get_write_buffer()
            .ok_or(PlannerError::BufferUnavailable)?;
        let bf = self.pool.get_mut(index);
        bf.gm.dwell_seconds = seconds.max(0.0);
        bf.real_move_time = bf.gm.dwell_seconds / 60.0;
        self.pool.commit_write_buffer(MoveKind::Dwell, self.now_ms);
        Ok(())
    }

    /// Queue a command to be returned by the runtime when it is reached.
    pub fn queue_command(&mut self, command: MoveCommand) -> Result<(), PlannerError> {
        let index = self
            .pool
            .get_write_buffer()
            .ok_or(PlannerError::BufferUnavailable)?;
        self.pool.get_mut(index).command = Some(command);
        self.pool.commit_write_buffer(command.kind(), self.now_ms);
        Ok(())
    }

    /// Optimal move time [min] from feed rate and per-axis velocity limits.
    fn move_time(
        &self,
        gm: &GcodeState,
        delta: &[f64; AXES],
        length: f64,
    ) -> Result<f64, PlannerError> {
        let traverse = gm.is_traverse();
        let mut time = if traverse {
            0.0
        } else if gm.feed_rate > 0.0 {
            length / gm.feed_rate
        } else {
            return Err(PlannerError::ZeroFeedRate);
        };
        for (d, ax) in delta.iter().zip(self.axes.iter()) {
            if *d == 0.0 {
                continue;
            }
            let limit = if traverse {
                ax.velocity_max
            } else {
                ax.feedrate_max
            };
            time = time.max(d.abs() / limit);
        }
        Ok(time)
    }

    /// Axis that limits the jerk of the combined move, and the resulting jerk.
    fn dominant_jerk(&self, unit: &[f64; AXES]) -> (Axis, f64) {
        let mut jerk_axis = Axis::X;
        let mut best = -1.0;
        for axis in Axis::ALL {
            let u = unit[axis.index()];
            if u == 0.0 {
                continue;
            }
            let c = u * u / self.axes[axis.index()].jerk_max;
            if c > best {
                best = c;
                jerk_axis = axis;
            }
        }
        let u = unit[jerk_axis.index()].abs().max(EPSILON);
        let jerk = self.axes[jerk_axis.index()].jerk_max * JERK_MULTIPLIER / u;
        (jerk_axis, jerk)
    }

    // ── Replanning ──

    /// Replan the queue if any trigger fires at the current time.
    ///
    /// Returns whether a replan ran.
    pub fn plan_buffer(&mut self) -> bool {
        let planner_time = self.update_planner_time();
        if self.pool.queued_count() == 0 {
            return false;
        }
        let total = planner_time + self.pool.time_in_run.load();
        let starving = total < usec_to_minutes(self.config.min_planned_usec);
        let phat_city = total >= usec_to_minutes(self.config.phat_city_usec);
        let deadline = self.pool.deadline_expired(self.now_ms);
        let crowded = self.pool.buffers_available() <= PLANNER_BUFFER_HEADROOM;

        let plan_now = self.pool.force_replan()
            || (self.pool.needs_replanned() && (starving || !phat_city || deadline || crowded));
        if !plan_now {
            return false;
        }

        debug!(
            forced = self.pool.force_replan(),
            starving, deadline, crowded, "replanning"
        );
        self.plan_block_list();
        self.pool.planning_done();
        self.update_planner_time();
        true
    }

    /// Recompute velocities of every replannable queued buffer.
    ///
    /// Runs up to `replan_passes` backward/forward pass pairs, stopping early
    /// once a pass changes nothing.
    pub fn plan_block_list(&mut self) {
        let Some(newest) = self.pool.newest_queued() else {
            return;
        };
        for _ in 0..self.config.replan_passes {
            if !self.plan_pass(newest) {
                break;
            }
        }
    }

    /// One backward + forward pass. Returns whether any velocity changed.
    fn plan_pass(&mut self, newest: usize) -> bool {
        // Backward: braking velocities, newest to oldest replannable.
        let mut index = newest;
        let mut first = newest;
        let mut bound = 0.0;
        for _ in 0..self.pool.capacity() {
            let bf = self.pool.get_mut(index);
            if bf.buffer_state != BufferState::Queued {
                break;
            }
            if bf.is_aline() {
                if !bf.replannable {
                    break;
                }
                bf.braking_velocity = target_velocity(bound, bf.length, bf);
                bound = bf.entry_bound();
            } else {
                bound = 0.0;
            }
            first = index;
            index = bf.prev();
        }
        if !self.pool.get(first).replannable && self.pool.get(first).is_aline() {
            return false;
        }

        // Forward: trapezoids, oldest to newest. An already planned oldest
        // line continues from the runtime's last exit once its predecessor
        // has been freed.
        let handoff = if self.pool.running().is_none() {
            self.mr.handoff_velocity
        } else {
            0.0
        };
        let mut changed = false;
        let mut index = first;
        for _ in 0..self.pool.capacity() {
            let (prev_index, next_index) = {
                let bf = self.pool.get(index);
                (bf.prev(), bf.next())
            };
            let prev = self.pool.get(prev_index);
            let (prev_exit, prev_live, prev_frozen) =
                (prev.exit_velocity, prev.is_live_aline(), !prev.replannable);
            let prev_freed = prev.buffer_state == BufferState::Empty;
            let (next_bound, next_entry_vmax) = if index == newest {
                (0.0, 0.0)
            } else {
                let next = self.pool.get(next_index);
                let entry_vmax = if next.is_aline() { next.entry_vmax } else { 0.0 };
                (next.entry_bound(), entry_vmax)
            };

            let bf = self.pool.get_mut(index);
            if bf.is_aline() {
                let (old_entry, old_exit, old_cruise) =
                    (bf.entry_velocity, bf.exit_velocity, bf.cruise_velocity);
                let entry = if prev_live {
                    prev_exit
                } else if prev_freed && bf.planned {
                    handoff
                } else {
                    0.0
                };
                let reach = target_velocity(entry, bf.length, bf);

                bf.entry_velocity = entry;
                bf.cruise_velocity = bf.cruise_vmax;
                bf.exit_velocity = bf.exit_vmax.min(next_bound).min(reach);
                calculate_trapezoid(bf);
                bf.real_move_time = bf.trapezoid_time();

                changed |= !bf.planned
                    || !approx_eq(bf.entry_velocity, old_entry)
                    || !approx_eq(bf.exit_velocity, old_exit)
                    || !approx_eq(bf.cruise_velocity, old_cruise);
                bf.planned = true;

                if index != newest
                    && (approx_eq(bf.exit_velocity, bf.exit_vmax)
                        || approx_eq(bf.exit_velocity, next_entry_vmax)
                        || (prev_frozen && approx_eq(bf.exit_velocity, reach)))
                {
                    bf.replannable = false;
                }
            }

            if index == newest {
                break;
            }
            index = next_index;
        }
        changed
    }

    /// Mark every queued line replannable again and request a replan.
    pub fn reset_replannable_list(&mut self) {
        for index in 0..self.pool.capacity() {
            let bf = self.pool.get_mut(index);
            if bf.buffer_state == BufferState::Queued && bf.is_aline() {
                bf.replannable = true;
            }
        }
        self.pool.request_replan();
    }

    /// Sum the planned time of queued buffers and publish it.
    fn update_planner_time(&mut self) -> f64 {
        let total: f64 = self
            .pool
            .queued()
            .map(|i| self.pool.get(i).real_move_time)
            .sum();
        self.pool.time_in_planner.store(total);
        total
    }

    /// Queued plus running time [min], as last published.
    pub fn planned_time(&self) -> f64 {
        self.pool.time_in_planner.load() + self.pool.time_in_run.load()
    }

    /// Whether enough time is queued for replanning to be deferred.
    pub fn is_phat_city_time(&self) -> bool {
        self.planned_time() >= usec_to_minutes(self.config.phat_city_usec)
    }

    /// Whether a producer may queue another input line.
    #[inline]
    pub fn has_headroom(&self) -> bool {
        self.pool.buffers_available() > PLANNER_BUFFER_HEADROOM
    }

    #[inline]
    pub fn buffers_available(&self) -> usize {
        self.pool.buffers_available()
    }

    /// End position of the most recently queued move.
    #[inline]
    pub fn planner_position(&self) -> &[f64; AXES] {
        &self.mm.position
    }

    /// Override the planner's notion of position on one axis.
    pub fn set_planner_position(&mut self, axis: Axis, position: f64) {
        self.mm.position[axis.index()] = position;
    }
}
