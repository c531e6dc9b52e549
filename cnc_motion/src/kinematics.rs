//! Kinematics collaborator: axis space ↔ motor step space.
//!
//! The runtime converts every segment endpoint with [`Kinematics::inverse`];
//! the probing cycle converts the latched encoder snapshot back with
//! [`Kinematics::forward`].

use cnc_common::axis::Axis;
use cnc_common::config::MotionConfig;
use cnc_common::consts::{AXES, MOTORS};

/// Transform between axis positions [mm or deg] and motor positions [steps].
pub trait Kinematics {
    fn inverse(&self, position: &[f64; AXES]) -> [f64; MOTORS];
    fn forward(&self, steps: &[f64; MOTORS]) -> [f64; AXES];
}

/// One motor driving one axis with a fixed (signed) step scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotorMap {
    pub axis: Axis,
    pub steps_per_unit: f64,
}

/// Cartesian machine: each motor follows exactly one axis.
///
/// Several motors may drive the same axis (gantry); forward kinematics
/// averages them. Axes with no motor read back as 0.
#[derive(Debug, Clone)]
pub struct CartesianKinematics {
    motors: [MotorMap; MOTORS],
}

impl CartesianKinematics {
    pub fn new(motors: [MotorMap; MOTORS]) -> Self {
        Self { motors }
    }

    /// Build from the `[[motors]]` table (unlisted motors use defaults).
    pub fn from_config(config: &MotionConfig) -> Self {
        Self::new(config.motor_table().map(|m| MotorMap {
            axis: m.axis,
            steps_per_unit: m.steps_per_unit(),
        }))
    }

    #[inline]
    pub fn motor(&self, motor: usize) -> &MotorMap {
        &self.motors[motor]
    }
}

impl Kinematics for CartesianKinematics {
    fn inverse(&self, position: &[f64; AXES]) -> [f64; MOTORS] {
        self.motors
            .map(|m| position[m.axis.index()] * m.steps_per_unit)
    }

    fn forward(&self, steps: &[f64; MOTORS]) -> [f64; AXES] {
        let mut sum = [0.0; AXES];
        let mut count = [0u8; AXES];
        for (m, s) in self.motors.iter().zip(steps.iter()) {
            if m.steps_per_unit != 0.0 {
                sum[m.axis.index()] += s / m.steps_per_unit;
                count[m.axis.index()] += 1;
            }
        }
        let mut position = [0.0; AXES];
        for i in 0..AXES {
            if count[i] > 0 {
                position[i] = sum[i] / count[i] as f64;
            }
        }
        position
    }
}
