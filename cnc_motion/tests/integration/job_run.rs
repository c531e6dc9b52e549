//! Whole jobs through the scheduler cycle: config load, job feed,
//! planning, runtime, probing and reports.

use std::io::Write;

use cnc_common::axis::Axis;
use cnc_motion::config::{load_config, load_config_from_strings};
use cnc_motion::cycle::{CycleRunner, StepOutcome};
use cnc_motion::error::CycleError;
use cnc_motion::hal::SimIo;
use cnc_motion::kinematics::CartesianKinematics;
use cnc_motion::machine::{CycleState, Machine, ProbeState};

const MACHINE_TOML: &str = r#"
[shared]
service_name = "cnc-job-test"

[planner]
nom_segment_usec = 1000.0
min_segment_usec = 500.0

[spindle]
dwell_seconds = 0.25

[[axes]]
axis = "Z"
velocity_max = 1500.0
feedrate_max = 1000.0
jerk_max = 100.0
jerk_high = 400.0
"#;

fn runner(job_toml: &str, io: SimIo) -> CycleRunner<CartesianKinematics> {
    let loaded = load_config_from_strings(MACHINE_TOML, job_toml).unwrap();
    let kinematics = CartesianKinematics::from_config(&loaded.motion);
    CycleRunner::new(Machine::new(&loaded.motion, kinematics, io), loaded.job)
}

const SURFACE_JOB: &str = r#"
[[steps]]
type = "offset"
coord_system = "G55"
axis = "X"
offset = 100.0

[[steps]]
type = "coord_system"
coord_system = "G55"

[[steps]]
type = "spindle"
mode = "cw"
rpm = 10000.0

[[steps]]
type = "traverse"
x = 0.0
y = 20.0
z = 5.0

[[steps]]
type = "probe"
z = -10.0
feed_rate = 200.0

[[steps]]
type = "traverse"
z = 5.0

[[steps]]
type = "feed"
x = 10.0
feed_rate = 1500.0

[[steps]]
type = "dwell"
seconds = 0.1

[[steps]]
type = "end"
"#;

#[test]
fn surface_job_runs_to_completion() {
    let mut r = runner(SURFACE_JOB, SimIo::with_contact(5, Axis::Z, -2.0));
    let summary = r.run_to_completion(5_000_000).unwrap();

    assert_eq!(summary.probes, 1);
    assert_eq!(summary.commands, 1);
    // G55 X offset applies to the work moves, not to the probe.
    assert_eq!(summary.final_position, [110.0, 20.0, 5.0, 0.0, 0.0, 0.0]);

    let m = r.machine();
    assert_eq!(m.probe_state(), ProbeState::Succeeded);
    let contact = m.probe_results()[Axis::Z.index()];
    assert!(contact <= -2.0 && contact > -2.05, "contact {contact}");
    assert_eq!(m.cycle_state(), CycleState::Off);
    assert!(!m.spindle().paused);

    let report: serde_json::Value = serde_json::from_str(m.last_probe_report().unwrap()).unwrap();
    assert_eq!(report["prb"]["e"], 1);
    assert!(report["prb"]["z"].as_f64().unwrap() <= -2.0);

    // 15 mm probe move and 8 mm back-off at 200 mm/min, then both dwells.
    assert!(summary.machine_time_us > 6_900_000.0 + 350_000.0);
}

#[test]
fn steps_wait_for_the_probe() {
    let mut r = runner(SURFACE_JOB, SimIo::with_contact(5, Axis::Z, -2.0));
    let mut saw_probe = false;
    for _ in 0..5_000_000 {
        let outcome = r.step().unwrap();
        let m = r.machine();
        if m.cycle_state() == CycleState::Probe {
            saw_probe = true;
            // Nothing behind the probe may be queued while it runs.
            assert_eq!(m.core().planner_position()[Axis::X.index()], 100.0);
        }
        if outcome == StepOutcome::Done {
            break;
        }
    }
    assert!(saw_probe);
}

#[test]
fn probe_configuration_error_fails_the_job() {
    let job = r#"
[[steps]]
type = "probe"
z = 0.1
feed_rate = 100.0

[[steps]]
type = "feed"
x = 10.0
"#;
    let mut r = runner(job, SimIo::new(5));
    let err = r.run_to_completion(1_000).unwrap_err();
    let msg = err.to_string();
    assert!(matches!(err, CycleError::Job { step: 0, .. }), "got: {msg}");
    assert!(msg.contains("invalid probe destination"), "got: {msg}");
    assert_eq!(r.machine().cycle_state(), CycleState::Off);
}

#[test]
fn missed_probe_is_not_an_error() {
    let job = r#"
[[steps]]
type = "probe"
z = -3.0
feed_rate = 300.0

[[steps]]
type = "traverse"
z = 0.0
"#;
    let mut r = runner(job, SimIo::new(5));
    let summary = r.run_to_completion(1_000_000).unwrap();
    assert_eq!(summary.probes, 1);
    assert_eq!(r.machine().probe_state(), ProbeState::Failed);
    assert_eq!(r.machine().probe_results()[Axis::Z.index()], -3.0);
    assert_eq!(summary.final_position[Axis::Z.index()], 0.0);
}

#[test]
fn long_job_uses_backpressure() {
    let mut job = String::new();
    for i in 0..200 {
        let y = if i % 2 == 0 { 0.0 } else { 2.0 };
        job.push_str(&format!(
            "[[steps]]\ntype = \"feed\"\nx = {:.1}\ny = {y:.1}\nfeed_rate = 2000.0\n\n",
            (i + 1) as f64 * 0.5
        ));
    }
    let mut r = runner(&job, SimIo::new(5));
    let summary = r.run_to_completion(10_000_000).unwrap();
    assert_eq!(summary.final_position[0], 100.0);
    assert_eq!(summary.final_position[1], 2.0);
    assert_eq!(
        r.machine().core().buffers_available(),
        r.machine().core().pool().capacity()
    );
}

#[test]
fn loads_job_from_files() {
    let mut machine = tempfile::NamedTempFile::new().unwrap();
    machine.write_all(MACHINE_TOML.as_bytes()).unwrap();
    let mut job = tempfile::NamedTempFile::new().unwrap();
    job.write_all(SURFACE_JOB.as_bytes()).unwrap();

    let loaded = load_config(machine.path(), Some(job.path())).unwrap();
    assert_eq!(loaded.motion.shared.service_name, "cnc-job-test");
    assert_eq!(loaded.job.steps.len(), 9);
    assert!(loaded.job.steps.iter().any(|s| s.is_probe()));
}
