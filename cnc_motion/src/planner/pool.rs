//! Fixed-capacity ring of move buffers.
//!
//! The ring is an arena of `PLANNER_BUFFER_POOL_SIZE` buffers with
//! prev/next indices fixed at construction. Three cursors walk it:
//!
//! | Cursor  | Points at                                  | Advanced by            |
//! |---------|--------------------------------------------|------------------------|
//! | `write` | next buffer handed to a producer           | `get_write_buffer`     |
//! | `queue` | next buffer to be committed                | `commit_write_buffer`  |
//! | `run`   | oldest live buffer (running or next to run)| `free_run_buffer`      |
//!
//! Buffers between `run` and `queue` are queued (or one running at `run`),
//! so queue order is ring order and no relinking is ever needed.
//!
//! ## Single writer timing
//!
//! `time_in_run` is written only by the runtime and `time_in_planner` only by
//! the planner. Both are plain relaxed atomics; readers accept stale values.

use std::sync::atomic::{AtomicU64, Ordering};

use cnc_common::consts::PLANNER_BUFFER_POOL_SIZE;
use static_assertions::const_assert;
use tracing::trace;

use super::buffer::{Buffer, BufferState, MoveKind, MoveState};
use crate::error::PoolIntegrityError;

const_assert!(PLANNER_BUFFER_POOL_SIZE >= 2);

// ─── AtomicF64 ──────────────────────────────────────────────────────

/// `f64` stored as raw bits in an `AtomicU64`.
#[derive(Debug, Default)]
pub struct AtomicF64(AtomicU64);

impl AtomicF64 {
    /// Zero-initialized (0u64 is the bit pattern of 0.0).
    pub const fn zero() -> Self {
        Self(AtomicU64::new(0))
    }

    #[inline]
    pub fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn store(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

// ─── Buffer Pool ────────────────────────────────────────────────────

/// Planner buffer ring with write/queue/run cursors.
#[derive(Debug)]
pub struct BufferPool {
    buffers: [Buffer; PLANNER_BUFFER_POOL_SIZE],
    write: usize,
    queue: usize,
    run: usize,
    available: usize,
    needs_replanned: bool,
    force_replan: bool,
    /// Forced replan deadline, armed by the first commit after a replan.
    planner_deadline_ms: Option<u64>,
    planner_timeout_ms: u64,
    /// Remaining time of the running move [min]. Runtime writes.
    pub(crate) time_in_run: AtomicF64,
    /// Planned time of all queued moves [min]. Planner writes.
    pub(crate) time_in_planner: AtomicF64,
}

impl BufferPool {
    /// Create an empty ring.
    pub fn new(planner_timeout_ms: u64) -> Self {
        let mut buffers: [Buffer; PLANNER_BUFFER_POOL_SIZE] = std::array::from_fn(|_| Buffer::new());
        for (i, bf) in buffers.iter_mut().enumerate() {
            bf.prev = (i + PLANNER_BUFFER_POOL_SIZE - 1) % PLANNER_BUFFER_POOL_SIZE;
            bf.next = (i + 1) % PLANNER_BUFFER_POOL_SIZE;
        }
        Self {
            buffers,
            write: 0,
            queue: 0,
            run: 0,
            available: PLANNER_BUFFER_POOL_SIZE,
            needs_replanned: false,
            force_replan: false,
            planner_deadline_ms: None,
            planner_timeout_ms,
            time_in_run: AtomicF64::zero(),
            time_in_planner: AtomicF64::zero(),
        }
    }

    /// Return every buffer to `Empty` and rewind the cursors.
    pub fn reset(&mut self) {
        for bf in self.buffers.iter_mut() {
            bf.clear();
        }
        self.write = 0;
        self.queue = 0;
        self.run = 0;
        self.available = PLANNER_BUFFER_POOL_SIZE;
        self.needs_replanned = false;
        self.force_replan = false;
        self.planner_deadline_ms = None;
        self.time_in_run.store(0.0);
        self.time_in_planner.store(0.0);
    }

    #[inline]
    pub const fn capacity(&self) -> usize {
        PLANNER_BUFFER_POOL_SIZE
    }

    #[inline]
    pub fn buffers_available(&self) -> usize {
        self.available
    }

    #[inline]
    pub fn get(&self, index: usize) -> &Buffer {
        &self.buffers[index]
    }

    #[inline]
    pub fn get_mut(&mut self, index: usize) -> &mut Buffer {
        &mut self.buffers[index]
    }

    // ── Producer side ──

    /// Claim the next empty buffer for planning.
    ///
    /// Returns `None` when the ring is full; the caller retries later.
    pub fn get_write_buffer(&mut self) -> Option<usize> {
        let index = self.write;
        let bf = &mut self.buffers[index];
        if bf.buffer_state != BufferState::Empty {
            return None;
        }
        bf.clear();
        bf.buffer_state = BufferState::Planning;
        self.write = bf.next;
        self.available -= 1;
        Some(index)
    }

    /// Give back the most recently claimed, uncommitted buffer.
    pub fn unget_write_buffer(&mut self) {
        let index = self.buffers[self.write].prev;
        if self.buffers[index].buffer_state == BufferState::Planning {
            self.buffers[index].clear();
            self.write = index;
            self.available += 1;
        }
    }

    /// Commit the oldest planning buffer as `kind` and mark the ring for replanning.
    ///
    /// Arms the forced replan deadline at `now_ms + planner_timeout_ms` unless
    /// it is already armed.
    pub fn commit_write_buffer(&mut self, kind: MoveKind, now_ms: u64) {
        let index = self.queue;
        let bf = &mut self.buffers[index];
        bf.move_kind = kind;
        bf.move_state = MoveState::New;
        bf.buffer_state = BufferState::Queued;
        // Barriers have nothing to plan.
        bf.planned = !kind.is_motion();
        self.queue = bf.next;
        self.needs_replanned = true;
        if self.planner_deadline_ms.is_none() {
            self.planner_deadline_ms = Some(now_ms.saturating_add(self.planner_timeout_ms));
        }
        trace!(index, ?kind, "buffer committed");
    }

    // ── Runtime side ──

    /// Buffer to execute, promoting the oldest queued buffer if nothing runs.
    ///
    /// An unplanned line is not promoted; a replan is forced instead.
    pub fn get_run_buffer(&mut self) -> Option<usize> {
        let index = self.run;
        let bf = &mut self.buffers[index];
        match bf.buffer_state {
            BufferState::Running => Some(index),
            BufferState::Queued if bf.planned => {
                bf.buffer_state = BufferState::Running;
                bf.locked = true;
                bf.replannable = false;
                trace!(index, kind = ?bf.move_kind, "buffer promoted");
                Some(index)
            }
            BufferState::Queued => {
                self.force_replan = true;
                None
            }
            BufferState::Empty | BufferState::Planning => None,
        }
    }

    /// Release the running buffer and advance the run cursor.
    ///
    /// Returns whether another buffer is waiting to run.
    pub fn free_run_buffer(&mut self) -> bool {
        let index = self.run;
        if self.buffers[index].buffer_state != BufferState::Running {
            return self.has_runnable_buffer();
        }
        self.buffers[index].clear();
        self.run = self.buffers[index].next;
        self.available += 1;
        if self.buffers[self.run].buffer_state != BufferState::Queued {
            self.time_in_run.store(0.0);
        }
        self.has_runnable_buffer()
    }

    /// Whether a buffer is running or queued to run. Non-mutating.
    #[inline]
    pub fn has_runnable_buffer(&self) -> bool {
        matches!(
            self.buffers[self.run].buffer_state,
            BufferState::Queued | BufferState::Running
        )
    }

    /// Oldest live buffer (running, or next to run).
    pub fn get_first_buffer(&self) -> Option<usize> {
        self.has_runnable_buffer().then_some(self.run)
    }

    /// Most recently committed buffer, if it is still queued.
    pub fn newest_queued(&self) -> Option<usize> {
        let index = self.buffers[self.queue].prev;
        (self.buffers[index].buffer_state == BufferState::Queued).then_some(index)
    }

    /// Index of the running buffer, if any.
    pub fn running(&self) -> Option<usize> {
        (self.buffers[self.run].buffer_state == BufferState::Running).then_some(self.run)
    }

    /// Number of buffers in `state`.
    pub fn count(&self, state: BufferState) -> usize {
        self.buffers
            .iter()
            .filter(|bf| bf.buffer_state == state)
            .count()
    }

    #[inline]
    pub fn queued_count(&self) -> usize {
        self.count(BufferState::Queued)
    }

    /// Queued buffers from oldest to newest.
    pub fn queued(&self) -> impl Iterator<Item = usize> + '_ {
        let start = match self.running() {
            Some(r) => self.buffers[r].next,
            None => self.run,
        };
        let mut index = start;
        let mut remaining = PLANNER_BUFFER_POOL_SIZE;
        std::iter::from_fn(move || {
            if remaining == 0 || self.buffers[index].buffer_state != BufferState::Queued {
                return None;
            }
            remaining -= 1;
            let current = index;
            index = self.buffers[index].next;
            Some(current)
        })
    }

    /// Discard every queued buffer. The running buffer, if any, is kept.
    ///
    /// Must not be called while a producer holds a planning buffer.
    /// Returns the number of discarded buffers.
    pub fn flush_queued(&mut self) -> usize {
        let start = match self.running() {
            Some(r) => self.buffers[r].next,
            None => self.run,
        };
        let mut index = start;
        let mut flushed = 0;
        while flushed < PLANNER_BUFFER_POOL_SIZE
            && self.buffers[index].buffer_state == BufferState::Queued
        {
            self.buffers[index].clear();
            self.available += 1;
            flushed += 1;
            index = self.buffers[index].next;
        }
        self.write = start;
        self.queue = start;
        if self.running().is_none() {
            self.run = start;
        }
        self.needs_replanned = false;
        self.force_replan = false;
        self.planner_deadline_ms = None;
        self.time_in_planner.store(0.0);
        flushed
    }

    // ── Replanning flags ──

    #[inline]
    pub fn needs_replanned(&self) -> bool {
        self.needs_replanned
    }

    #[inline]
    pub fn force_replan(&self) -> bool {
        self.force_replan
    }

    /// Request a replan on the next planner call.
    pub fn request_replan(&mut self) {
        self.force_replan = true;
    }

    /// Whether the forced replan deadline has passed at `now_ms`.
    pub fn deadline_expired(&self, now_ms: u64) -> bool {
        self.planner_deadline_ms.is_some_and(|d| now_ms >= d)
    }

    /// Clear the replanning triggers after a completed replan.
    pub(crate) fn planning_done(&mut self) {
        self.needs_replanned = false;
        self.force_replan = false;
        self.planner_deadline_ms = None;
    }

    // ── Integrity ──

    /// Check buffer accounting, the single-runner rule and ring links.
    pub fn test_assertions(&self) -> Result<(), PoolIntegrityError> {
        for (i, bf) in self.buffers.iter().enumerate() {
            if self.buffers[bf.next].prev != i || self.buffers[bf.prev].next != i {
                return Err(PoolIntegrityError::BrokenLink(i));
            }
        }

        let planning = self.count(BufferState::Planning);
        let queued = self.count(BufferState::Queued);
        let running = self.count(BufferState::Running);
        if running > 1 {
            return Err(PoolIntegrityError::MultipleRunning(running));
        }
        if let Some((i, _)) = self
            .buffers
            .iter()
            .enumerate()
            .find(|(_, bf)| bf.buffer_state == BufferState::Running)
        {
            if i != self.run {
                return Err(PoolIntegrityError::RunCursor(i));
            }
        }
        if self.available + planning + queued + running != PLANNER_BUFFER_POOL_SIZE
            || self.available != self.count(BufferState::Empty)
        {
            return Err(PoolIntegrityError::Conservation {
                available: self.available,
                planning,
                queued,
                running,
            });
        }
        Ok(())
    }
}
