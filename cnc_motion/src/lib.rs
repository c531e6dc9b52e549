//! # CNC Motion Library
//!
//! Look-ahead motion planner and segment runtime for a multi-axis CNC
//! controller, with the straight-probe (G38.2) cycle built on top.
//!
//! ## Layers
//!
//! 1. **Planner** (`planner`): fixed ring of move buffers, jerk-limited
//!    trapezoids (`zoid`), junction velocities and backward/forward replanning
//! 2. **Runtime** (`runtime`): splits the running buffer into head/body/tail
//!    sections and fixed-time segments along a quintic velocity curve
//! 3. **Machine** (`machine`): canonical-machine model state, coordinate
//!    offsets, spindle bookkeeping and the probing cycle
//! 4. **Cycle** (`cycle`): scheduler loop tying planning, runtime ticks,
//!    simulated I/O and the probing callback together
//!
//! ## Execution Contexts
//!
//! The planner runs in the low-priority planning context, `tick` in the
//! runtime context. [`motion::MotionCore`] owns both; the buffer state
//! machine is the only handoff between them.
//!
//! ## Zero-Allocation Cycle
//!
//! Buffers, sections and reports are fixed-size. Nothing on the tick path
//! allocates.

pub mod config;
pub mod cycle;
pub mod error;
pub mod hal;
pub mod job;
pub mod kinematics;
pub mod machine;
pub mod motion;
pub mod planner;
pub mod runtime;
