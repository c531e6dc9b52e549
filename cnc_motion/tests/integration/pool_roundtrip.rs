//! Buffer pool accounting through fill, drain and backpressure.

use cnc_common::config::MotionConfig;
use cnc_common::consts::{AXES, PLANNER_BUFFER_POOL_SIZE};
use cnc_common::gcode::{GcodeState, MotionMode};
use cnc_motion::error::PlannerError;
use cnc_motion::kinematics::CartesianKinematics;
use cnc_motion::motion::MotionCore;
use cnc_motion::planner::buffer::{BufferState, MoveCommand};
use cnc_motion::runtime::Tick;

type Core = MotionCore<CartesianKinematics>;

fn core() -> Core {
    let config = MotionConfig::default();
    MotionCore::new(&config, CartesianKinematics::from_config(&config))
}

fn feed_x(x: f64) -> GcodeState {
    let mut target = [0.0; AXES];
    target[0] = x;
    GcodeState {
        motion_mode: MotionMode::StraightFeed,
        target,
        feed_rate: 3000.0,
        ..Default::default()
    }
}

/// Tick until idle, checking the pool after every step.
fn drain(core: &mut Core) -> Vec<Tick> {
    let mut ticks = Vec::new();
    let mut now_us = 0.0;
    for _ in 0..1_000_000 {
        core.set_time_ms((now_us / 1000.0) as u64);
        core.plan_buffer();
        let tick = core.tick();
        core.test_assertions().unwrap();
        assert!(core.pool().count(BufferState::Running) <= 1);
        match tick {
            Tick::Idle if !core.runtime_busy() => return ticks,
            Tick::Segment(s) => now_us += s.segment_time_us,
            Tick::Dwell { time_us } => now_us += time_us,
            _ => now_us += core.planner_config().nom_segment_usec,
        }
        if tick != Tick::Idle {
            ticks.push(tick);
        }
    }
    panic!("runtime did not drain");
}

#[test]
fn full_pool_drains_back_to_capacity() {
    let mut core = core();
    let before = core.buffers_available();
    assert_eq!(before, PLANNER_BUFFER_POOL_SIZE);

    for i in 1..=PLANNER_BUFFER_POOL_SIZE {
        core.aline(&feed_x(i as f64 * 2.0)).unwrap();
    }
    assert_eq!(core.buffers_available(), 0);
    assert!(!core.has_headroom());

    drain(&mut core);
    assert_eq!(core.buffers_available(), before);
    assert_eq!(core.runtime_position()[0], PLANNER_BUFFER_POOL_SIZE as f64 * 2.0);
}

#[test]
fn full_pool_signals_retry_without_side_effects() {
    let mut core = core();
    for i in 1..=PLANNER_BUFFER_POOL_SIZE {
        core.aline(&feed_x(i as f64)).unwrap();
    }
    let position = *core.planner_position();
    assert_eq!(core.aline(&feed_x(100.0)), Err(PlannerError::BufferUnavailable));
    assert_eq!(core.dwell(1.0), Err(PlannerError::BufferUnavailable));
    assert_eq!(*core.planner_position(), position);
    core.test_assertions().unwrap();

    // Retry succeeds once the runtime frees a buffer.
    let mut accepted = false;
    for _ in 0..100_000 {
        core.plan_buffer();
        core.tick();
        if core.aline(&feed_x(100.0)).is_ok() {
            accepted = true;
            break;
        }
    }
    assert!(accepted);
    drain(&mut core);
    assert_eq!(core.runtime_position()[0], 100.0);
}

#[test]
fn mixed_kinds_run_in_queue_order() {
    let mut core = core();
    core.aline(&feed_x(5.0)).unwrap();
    core.queue_command(MoveCommand::ToolChange(3)).unwrap();
    core.dwell(0.01).unwrap();
    core.aline(&feed_x(10.0)).unwrap();
    core.queue_command(MoveCommand::ProgramEnd).unwrap();
    assert_eq!(core.buffers_available(), PLANNER_BUFFER_POOL_SIZE - 5);

    let ticks = drain(&mut core);
    let kinds: Vec<&str> = ticks
        .iter()
        .map(|t| match t {
            Tick::Segment(_) => "segment",
            Tick::Dwell { .. } => "dwell",
            Tick::Command(_) => "command",
            Tick::Idle => "idle",
        })
        .collect();
    let tool = kinds.iter().position(|k| *k == "command").unwrap();
    let dwell = kinds.iter().position(|k| *k == "dwell").unwrap();
    assert!(kinds[..tool].iter().all(|k| *k == "segment"));
    assert!(dwell > tool);
    assert_eq!(ticks.last(), Some(&Tick::Command(MoveCommand::ProgramEnd)));

    let dwell_us: f64 = ticks
        .iter()
        .filter_map(|t| match t {
            Tick::Dwell { time_us } => Some(*time_us),
            _ => None,
        })
        .sum();
    assert!((dwell_us - 10_000.0).abs() < 1e-6, "dwell {dwell_us}");
    assert_eq!(core.buffers_available(), PLANNER_BUFFER_POOL_SIZE);
}

#[test]
fn idle_tick_has_no_side_effects() {
    let mut core = core();
    core.aline(&feed_x(1.0)).unwrap();
    drain(&mut core);

    let position = *core.runtime_position();
    let steps = *core.position_steps();
    for _ in 0..50 {
        assert_eq!(core.tick(), Tick::Idle);
    }
    assert_eq!(*core.runtime_position(), position);
    assert_eq!(*core.position_steps(), steps);
    assert_eq!(core.buffers_available(), PLANNER_BUFFER_POOL_SIZE);
}

#[test]
fn halt_returns_every_buffer() {
    let mut core = core();
    for i in 1..=10 {
        core.aline(&feed_x(i as f64 * 3.0)).unwrap();
    }
    core.plan_buffer();
    for _ in 0..20 {
        core.tick();
    }
    core.halt_runtime();
    assert_eq!(core.buffers_available(), PLANNER_BUFFER_POOL_SIZE);
    assert!(!core.runtime_busy());
    assert_eq!(core.planner_position()[0], core.runtime_position()[0]);
    core.test_assertions().unwrap();
}
