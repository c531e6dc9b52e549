//! Error types for the motion core.
//!
//! - [`PlannerError`]: rejected or deferred moves (producer side)
//! - [`ProbeError`]: probing preconditions and configuration violations
//! - [`PoolIntegrityError`]: buffer ring consistency checks
//! - [`CycleError`]: RT setup and cycle runner failures

use cnc_common::axis::Axis;
use cnc_common::config::ConfigError;
use thiserror::Error;

/// Reasons the planner did not queue a move.
///
/// `BufferUnavailable` is backpressure: the caller retries on a later
/// iteration. The two minimum-move variants are dropped moves, not faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PlannerError {
    #[error("no planner buffer available")]
    BufferUnavailable,
    #[error("move is shorter than the minimum length")]
    MinimumLengthMove,
    #[error("move is shorter than the minimum segment time")]
    MinimumTimeMove,
    #[error("feed rate is zero")]
    ZeroFeedRate,
}

impl PlannerError {
    /// Whether the move was dropped as too small to execute.
    #[inline]
    pub const fn is_minimum_move(&self) -> bool {
        matches!(self, Self::MinimumLengthMove | Self::MinimumTimeMove)
    }
}

/// Probing cycle errors.
///
/// The first three are rejected synchronously by `straight_probe`; the rest
/// are detected during cycle initialization and reported by the error exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ProbeError {
    #[error("feed rate not specified")]
    FeedRateNotSpecified,
    #[error("axis is missing")]
    AxisMissing,
    #[error("probing cycle already active")]
    CycleActive,
    #[error("Probing error - invalid probe destination")]
    InvalidDestination,
    #[error("Probing error - {0} axis cannot move during probing")]
    AxisCannotMove(Axis),
    #[error("probe move rejected: {0}")]
    Planner(#[from] PlannerError),
}

/// Buffer ring consistency violations found by `test_assertions`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PoolIntegrityError {
    #[error(
        "buffer accounting mismatch: available={available} planning={planning} queued={queued} running={running}"
    )]
    Conservation {
        available: usize,
        planning: usize,
        queued: usize,
        running: usize,
    },
    #[error("{0} buffers are running")]
    MultipleRunning(usize),
    #[error("running buffer {0} is not at the run cursor")]
    RunCursor(usize),
    #[error("ring link broken at buffer {0}")]
    BrokenLink(usize),
}

/// Errors during RT setup or cycle execution.
#[derive(Debug, Error)]
pub enum CycleError {
    /// RT system call failed.
    #[error("RT setup error: {0}")]
    RtSetup(String),
    /// Configuration could not be loaded or validated.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// A job step could not be executed.
    #[error("job step {step}: {reason}")]
    Job { step: usize, reason: String },
    /// Buffer ring integrity check failed.
    #[error(transparent)]
    Integrity(#[from] PoolIntegrityError),
}
