//! Look-ahead planning invariants over realistic move streams.
//!
//! Checks velocity continuity across junctions, section length
//! bookkeeping and velocity limits after every replanning pass, including
//! while the runtime is executing the head of the queue.

use cnc_common::config::MotionConfig;
use cnc_common::consts::AXES;
use cnc_common::gcode::{GcodeState, MotionMode};
use cnc_motion::kinematics::CartesianKinematics;
use cnc_motion::motion::MotionCore;
use cnc_motion::planner::buffer::Buffer;
use cnc_motion::runtime::Tick;

type Core = MotionCore<CartesianKinematics>;

fn core() -> Core {
    let config = MotionConfig::default();
    MotionCore::new(&config, CartesianKinematics::from_config(&config))
}

fn feed(x: f64, y: f64, feed_rate: f64) -> GcodeState {
    let mut target = [0.0; AXES];
    target[0] = x;
    target[1] = y;
    GcodeState {
        motion_mode: MotionMode::StraightFeed,
        target,
        feed_rate,
        ..Default::default()
    }
}

/// Zigzag along X with alternating Y: every junction is a corner.
fn zigzag(i: usize) -> GcodeState {
    let y = if i % 2 == 0 { 0.0 } else { 3.0 };
    feed(4.0 * (i + 1) as f64, y, 2400.0)
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-6 * a.abs().max(b.abs()).max(1.0)
}

fn queued(core: &Core) -> Vec<Buffer> {
    core.pool()
        .queued()
        .map(|i| core.pool().get(i).clone())
        .collect()
}

fn assert_plan_invariants(core: &Core) {
    let mut prev: Option<Buffer> = core.pool().running().map(|i| core.pool().get(i).clone());
    for bf in queued(core) {
        assert!(bf.is_aline());
        let sum = bf.head_length + bf.body_length + bf.tail_length;
        assert!(close(sum, bf.length), "sections {sum} != length {}", bf.length);
        assert!(bf.head_length >= 0.0 && bf.body_length >= 0.0 && bf.tail_length >= 0.0);
        assert!(bf.entry_velocity <= bf.entry_vmax + 1e-6);
        assert!(bf.cruise_velocity <= bf.cruise_vmax + 1e-6);
        assert!(bf.exit_velocity <= bf.exit_vmax + 1e-6);
        if let Some(p) = prev {
            assert!(
                close(p.exit_velocity, bf.entry_velocity),
                "junction mismatch: exit {} entry {}",
                p.exit_velocity,
                bf.entry_velocity
            );
        }
        prev = Some(bf);
    }
    if let Some(last) = prev {
        assert_eq!(last.exit_velocity, 0.0, "newest move must stop");
    }
}

#[test]
fn zigzag_queue_is_continuous() {
    let mut core = core();
    for i in 0..20 {
        core.aline(&zigzag(i)).unwrap();
    }
    core.plan_block_list();
    assert_plan_invariants(&core);

    let bufs = queued(&core);
    assert_eq!(bufs[0].entry_velocity, 0.0);
    // Corners slow the path but do not stop it.
    assert!(bufs[..19].iter().all(|b| b.exit_velocity > 0.0));
}

#[test]
fn replanning_while_running_keeps_continuity() {
    let mut core = core();
    for i in 0..8 {
        core.aline(&zigzag(i)).unwrap();
    }
    core.plan_block_list();

    // Run into the first move, then extend the queue behind it.
    for _ in 0..5 {
        assert!(matches!(core.tick(), Tick::Segment(_)));
    }
    let running = core.pool().running().unwrap();
    assert!(core.pool().get(running).locked);
    let exit_before = core.pool().get(running).exit_velocity;

    for i in 8..20 {
        core.aline(&zigzag(i)).unwrap();
        core.plan_block_list();
        assert_plan_invariants(&core);
    }
    assert_eq!(core.pool().get(running).exit_velocity, exit_before);
}

#[test]
fn collinear_moves_cruise_through_junctions() {
    let mut core = core();
    for i in 1..=6 {
        core.aline(&feed(20.0 * i as f64, 0.0, 1200.0)).unwrap();
    }
    core.plan_block_list();
    assert_plan_invariants(&core);
    let bufs = queued(&core);
    for bf in &bufs[1..5] {
        assert!(close(bf.entry_velocity, 1200.0), "entry {}", bf.entry_velocity);
        assert!(close(bf.exit_velocity, 1200.0), "exit {}", bf.exit_velocity);
    }
}

#[test]
fn executed_path_reaches_every_corner() {
    let mut core = core();
    let mut now_us = 0.0;
    let mut max_velocity: f64 = 0.0;
    let mut next = 0;
    for _ in 0..1_000_000 {
        while next < 20 && core.has_headroom() {
            core.aline(&zigzag(next)).unwrap();
            next += 1;
        }
        core.set_time_ms((now_us / 1000.0) as u64);
        core.plan_buffer();
        match core.tick() {
            Tick::Segment(s) => {
                now_us += s.segment_time_us;
                max_velocity = max_velocity.max(s.velocity);
            }
            Tick::Idle if next == 20 && !core.runtime_busy() => break,
            _ => now_us += core.planner_config().nom_segment_usec,
        }
        core.test_assertions().unwrap();
    }
    assert_eq!(next, 20);
    assert!(!core.runtime_busy());
    let end = zigzag(19).target;
    assert_eq!(core.runtime_position()[0], end[0]);
    assert_eq!(core.runtime_position()[1], end[1]);
    assert!(max_velocity <= 2400.0 * (1.0 + 1e-6), "max velocity {max_velocity}");
}

#[test]
fn streamed_short_moves_hand_off_without_velocity_steps() {
    let mut core = core();
    let moves = 40;
    let mut queued_moves = 0;
    let mut now_us = 0.0;
    let mut running = None;
    let mut last_exit: Option<f64> = None;
    let mut promotions = 0;
    let mut moving_handoffs = 0;

    for _ in 0..100_000 {
        // Keep the queue short so every free is followed by a new move
        // and a replan before the next promotion.
        if queued_moves < moves && core.pool().queued_count() < 3 {
            queued_moves += 1;
            core.aline(&feed(queued_moves as f64, 0.0, 6000.0)).unwrap();
        }
        core.set_time_ms((now_us / 1000.0) as u64);
        core.plan_buffer();
        let tick = core.tick();
        core.test_assertions().unwrap();

        let current = core.pool().running();
        if current != running {
            if let Some(index) = current {
                let entry = core.pool().get(index).entry_velocity;
                let exit = last_exit.unwrap_or(0.0);
                assert!(
                    close(entry, exit),
                    "promotion {promotions}: entry {entry} != previous exit {exit}"
                );
                if exit > 0.0 {
                    moving_handoffs += 1;
                }
                promotions += 1;
            }
            running = current;
        }
        if let Some(index) = current {
            last_exit = Some(core.pool().get(index).exit_velocity);
        }

        match tick {
            Tick::Segment(s) => now_us += s.segment_time_us,
            _ => now_us += core.planner_config().nom_segment_usec,
        }
        if queued_moves == moves && !core.runtime_busy() {
            break;
        }
    }

    assert_eq!(promotions, moves);
    assert!(moving_handoffs > moves / 2, "only {moving_handoffs} moving handoffs");
    assert_eq!(core.runtime_position()[0], moves as f64);
}
