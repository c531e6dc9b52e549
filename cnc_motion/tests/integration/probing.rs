//! G38.2 probing cycle driven the way the control loop drives it: plan,
//! tick, update I/O, poll the callback.

use cnc_common::axis::{Axis, AxisFlags};
use cnc_common::config::{ConfigLoader, MotionConfig};
use cnc_common::consts::AXES;
use cnc_common::gcode::{CoordSystem, DistanceMode, MotionMode};
use cnc_motion::error::ProbeError;
use cnc_motion::hal::{Encoders, SimIo};
use cnc_motion::kinematics::CartesianKinematics;
use cnc_motion::machine::{CycleState, Machine, ProbeCallback, ProbeState, SpindleMode};

type TestMachine = Machine<CartesianKinematics, SimIo>;

const MACHINE_TOML: &str = r#"
[spindle]
dwell_seconds = 0.5

[[axes]]
axis = "Z"
jerk_max = 50.0
jerk_high = 500.0
"#;

fn machine(io: SimIo) -> TestMachine {
    let config = MotionConfig::from_toml(MACHINE_TOML).unwrap();
    config.validate().unwrap();
    Machine::new(&config, CartesianKinematics::from_config(&config), io)
}

fn z(value: f64) -> [f64; AXES] {
    let mut target = [0.0; AXES];
    target[Axis::Z.index()] = value;
    target
}

/// Poll the cycle to completion, recording the largest number of buffers
/// in use at any time.
fn run(m: &mut TestMachine) -> (ProbeCallback, usize) {
    let capacity = m.core().pool().capacity();
    let mut max_used = 0;
    for _ in 0..500_000 {
        m.core_mut().plan_buffer();
        m.core_mut().tick();
        let position = *m.core().runtime_position();
        let steps = *m.core().position_steps();
        m.io_mut().observe(&position, &steps);
        let encoders = m.io().read_encoders();
        m.core_mut().sample_encoders(&encoders);
        max_used = max_used.max(capacity - m.core().buffers_available());
        match m.probing_callback() {
            ProbeCallback::InProgress => {}
            done => return (done, max_used),
        }
    }
    panic!("probe cycle did not finish");
}

fn report_json(m: &TestMachine) -> serde_json::Value {
    serde_json::from_str(m.last_probe_report().unwrap()).unwrap()
}

#[test]
fn zero_feed_rate_is_rejected_synchronously() {
    let mut m = machine(SimIo::new(5));
    m.set_coord_system(CoordSystem::G55);
    let jerk = m.axis_jerk(Axis::Z);

    assert_eq!(
        m.straight_probe(&z(-5.0), AxisFlags::Z),
        Err(ProbeError::FeedRateNotSpecified)
    );
    assert_eq!(m.cycle_state(), CycleState::Off);
    assert_eq!(m.gcode_state().coord_system, CoordSystem::G55);
    assert_eq!(m.gcode_state().motion_mode, MotionMode::default());
    assert_eq!(m.axis_jerk(Axis::Z), jerk);
    assert_eq!(m.probing_callback(), ProbeCallback::Noop);
}

#[test]
fn missing_axis_is_rejected_synchronously() {
    let mut m = machine(SimIo::new(5));
    m.set_feed_rate(100.0);
    assert_eq!(
        m.straight_probe(&z(-5.0), AxisFlags::empty()),
        Err(ProbeError::AxisMissing)
    );
    assert_eq!(m.probing_callback(), ProbeCallback::Noop);
}

#[test]
fn short_travel_takes_error_exit_and_restores() {
    let mut m = machine(SimIo::new(5));
    m.set_feed_rate(100.0);
    m.set_coord_system(CoordSystem::G56);
    m.set_distance_mode(DistanceMode::Incremental);
    m.spindle_control(SpindleMode::Cw, 12_000.0);

    m.straight_probe(&z(-0.1), AxisFlags::Z).unwrap();
    assert_eq!(
        m.probing_callback(),
        ProbeCallback::Failed(ProbeError::InvalidDestination)
    );

    assert_eq!(m.gcode_state().coord_system, CoordSystem::G56);
    assert_eq!(m.gcode_state().distance_mode, DistanceMode::Incremental);
    assert_eq!(m.gcode_state().motion_mode, MotionMode::CancelMotionMode);
    assert_eq!(m.axis_jerk(Axis::Z), 50.0);
    assert_eq!(m.spindle().mode, SpindleMode::Cw);
    assert!(!m.spindle().paused);
    assert!(!m.io().probing_mode());
    assert_eq!(m.cycle_state(), CycleState::Off);
    assert!(!m.core().runtime_busy());
}

#[test]
fn no_contact_completes_with_failed_result() {
    let mut m = machine(SimIo::new(5));
    m.set_feed_rate(600.0);
    m.set_coord_system(CoordSystem::G54);
    m.spindle_control(SpindleMode::Ccw, 6_000.0);

    m.straight_probe(&z(-4.0), AxisFlags::Z).unwrap();
    let (result, _) = run(&mut m);
    assert_eq!(result, ProbeCallback::Ok);
    assert_eq!(m.probe_state(), ProbeState::Failed);
    assert_eq!(m.probe_results()[Axis::Z.index()], -4.0);
    assert_eq!(m.absolute_position(Axis::Z), -4.0);

    let report = report_json(&m);
    assert_eq!(report["prb"]["e"], 0);
    assert_eq!(report["prb"]["z"].as_f64(), Some(-4.0));
    assert!(report["prb"].get("x").is_none());

    // Restored, and the spindle resumes with its dwell before further motion.
    assert_eq!(m.gcode_state().coord_system, CoordSystem::G54);
    assert_eq!(m.axis_jerk(Axis::Z), 50.0);
    assert!(!m.spindle().paused);
    assert!(m.core().runtime_busy());
}

#[test]
fn contact_before_start_skips_the_move() {
    // Probe already touching: the surface is above the start position.
    let mut m = machine(SimIo::with_contact(5, Axis::Z, 1.0));
    m.set_feed_rate(300.0);
    m.straight_probe(&z(-5.0), AxisFlags::Z).unwrap();

    let (result, max_used) = run(&mut m);
    assert_eq!(result, ProbeCallback::Ok);
    assert_eq!(max_used, 0, "no move may be queued");
    assert_eq!(m.probe_state(), ProbeState::Succeeded);
    assert_eq!(m.probe_results()[Axis::Z.index()], 0.0);
    assert_eq!(report_json(&m)["prb"]["e"], 1);
}

#[test]
fn contact_position_comes_from_encoder_snapshot() {
    let mut m = machine(SimIo::with_contact(5, Axis::Z, -1.5));
    m.set_feed_rate(120.0);
    m.straight_probe(&[2.0, 0.0, -6.0, 0.0, 0.0, 0.0], AxisFlags::Z)
        .unwrap();

    let (result, _) = run(&mut m);
    assert_eq!(result, ProbeCallback::Ok);
    assert_eq!(m.probe_state(), ProbeState::Succeeded);

    let contact = m.probe_results()[Axis::Z.index()];
    assert!(contact <= -1.5 && contact > -1.55, "contact {contact}");
    // Unflagged axes stayed where they were.
    assert_eq!(m.probe_results()[Axis::X.index()], 0.0);
    assert_eq!(m.absolute_position(Axis::Z), contact);

    let report = report_json(&m);
    assert_eq!(report["prb"]["e"], 1);
    let reported = report["prb"]["z"].as_f64().unwrap();
    assert!((reported - contact).abs() < 0.0005);
}

#[test]
fn probe_runs_in_machine_coordinates() {
    let mut m = machine(SimIo::new(5));
    m.set_coord_offset(CoordSystem::G54, Axis::Z, 10.0);
    m.set_coord_system(CoordSystem::G54);
    m.set_feed_rate(600.0);

    m.straight_probe(&z(-2.0), AxisFlags::Z).unwrap();
    let (result, _) = run(&mut m);
    assert_eq!(result, ProbeCallback::Ok);
    assert_eq!(m.absolute_position(Axis::Z), -2.0);
    assert_eq!(m.gcode_state().coord_system, CoordSystem::G54);
    assert_eq!(m.work_offset()[Axis::Z.index()], 10.0);
}

#[test]
fn repeated_cycles_are_independent() {
    let mut m = machine(SimIo::with_contact(5, Axis::Z, -1.0));
    m.set_feed_rate(300.0);

    m.straight_probe(&z(-3.0), AxisFlags::Z).unwrap();
    assert_eq!(run(&mut m).0, ProbeCallback::Ok);
    assert_eq!(m.probe_state(), ProbeState::Succeeded);

    m.io_mut().set_contact(None);
    m.straight_probe(&z(-3.0), AxisFlags::Z).unwrap();
    assert_eq!(run(&mut m).0, ProbeCallback::Ok);
    assert_eq!(m.probe_state(), ProbeState::Failed);
    assert_eq!(m.absolute_position(Axis::Z), -3.0);
}
