//! Configuration loading traits and machine configuration types.
//!
//! This module provides a standardized way to load TOML configuration files
//! and the typed configuration consumed by the planner, runtime and probing
//! cycle.
//!
//! # Usage
//!
//! ```rust,no_run
//! use cnc_common::config::{ConfigLoader, ConfigError, MotionConfig};
//! use std::path::Path;
//!
//! fn main() -> Result<(), ConfigError> {
//!     let config = MotionConfig::load(Path::new("machine.toml"))?;
//!     config.validate()?;
//!     println!("Service: {}", config.shared.service_name);
//!     Ok(())
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use thiserror::Error;

use crate::axis::Axis;
use crate::consts::{
    AXES, DEFAULT_PROBE_INPUT, JUNCTION_ACCELERATION, MIN_PLANNED_USEC, MIN_SEGMENT_USEC,
    MINIMUM_PROBE_TRAVEL, MOTORS, NOM_SEGMENT_USEC, PHAT_CITY_USEC, PLANNER_TIMEOUT_MS,
    REPLAN_PASS_LIMIT,
};

/// Error type for configuration loading operations.
///
/// This enum represents all possible errors that can occur when loading
/// configuration files.
#[derive(Debug, Clone, Error)]
pub enum ConfigError {
    /// Configuration file not found at specified path.
    #[error("Configuration file not found")]
    FileNotFound,

    /// TOML parsing failed.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Semantic validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

/// Log level for application logging.
///
/// Uses lowercase serde values for TOML compatibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Most verbose, per-segment tracing.
    Trace,
    /// Planner and runtime decisions.
    Debug,
    /// Lifecycle events and probe reports.
    #[default]
    Info,
    /// Recoverable anomalies.
    Warn,
    /// Serious problems.
    Error,
}

impl LogLevel {
    /// Directive string understood by `tracing_subscriber::EnvFilter`.
    pub const fn as_directive(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Common configuration fields shared by all applications of the workspace.
///
/// # TOML Example
///
/// ```toml
/// [shared]
/// log_level = "debug"
/// service_name = "cnc-motion-01"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SharedConfig {
    /// Logging verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Application instance identifier.
    pub service_name: String,
}

impl Default for SharedConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
            service_name: "cnc-motion".to_string(),
        }
    }
}

impl SharedConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if `service_name` is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service_name.is_empty() {
            return Err(ConfigError::ValidationError(
                "service_name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Trait for loading configuration from TOML files.
///
/// Blanket-implemented for every `serde::de::DeserializeOwned` type.
///
/// # Contract
///
/// - Returns `ConfigError::FileNotFound` if the file does not exist
/// - Returns `ConfigError::ParseError` if TOML syntax is invalid
pub trait ConfigLoader: Sized + serde::de::DeserializeOwned {
    /// Load configuration from a TOML file.
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound
            } else {
                ConfigError::ParseError(e.to_string())
            }
        })?;

        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

impl<T: serde::de::DeserializeOwned> ConfigLoader for T {}

// ─── Planner ────────────────────────────────────────────────────────

/// Planner and runtime tuning.
///
/// The thresholds are empirical defaults, not load-bearing constants.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlannerConfig {
    /// Centripetal acceleration used for cornering [mm/min²].
    #[serde(default = "default_junction_acceleration")]
    pub junction_acceleration: f64,
    /// Minimum segment time [µs].
    #[serde(default = "default_min_segment_usec")]
    pub min_segment_usec: f64,
    /// Nominal segment time [µs].
    #[serde(default = "default_nom_segment_usec")]
    pub nom_segment_usec: f64,
    /// Replan immediately when less than this much time is queued [µs].
    #[serde(default = "default_min_planned_usec")]
    pub min_planned_usec: f64,
    /// Replanning may be deferred while at least this much time is queued [µs].
    #[serde(default = "default_phat_city_usec")]
    pub phat_city_usec: f64,
    /// Forced replan deadline after a commit [ms].
    #[serde(default = "default_planner_timeout_ms")]
    pub planner_timeout_ms: u64,
    /// Backward/forward pass pairs allowed per replanning call.
    #[serde(default = "default_replan_passes")]
    pub replan_passes: u8,
}

fn default_junction_acceleration() -> f64 {
    JUNCTION_ACCELERATION
}
fn default_min_segment_usec() -> f64 {
    MIN_SEGMENT_USEC
}
fn default_nom_segment_usec() -> f64 {
    NOM_SEGMENT_USEC
}
fn default_min_planned_usec() -> f64 {
    MIN_PLANNED_USEC
}
fn default_phat_city_usec() -> f64 {
    PHAT_CITY_USEC
}
fn default_planner_timeout_ms() -> u64 {
    PLANNER_TIMEOUT_MS
}
fn default_replan_passes() -> u8 {
    REPLAN_PASS_LIMIT
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            junction_acceleration: JUNCTION_ACCELERATION,
            min_segment_usec: MIN_SEGMENT_USEC,
            nom_segment_usec: NOM_SEGMENT_USEC,
            min_planned_usec: MIN_PLANNED_USEC,
            phat_city_usec: PHAT_CITY_USEC,
            planner_timeout_ms: PLANNER_TIMEOUT_MS,
            replan_passes: REPLAN_PASS_LIMIT,
        }
    }
}

impl PlannerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.junction_acceleration <= 0.0 {
            return Err(ConfigError::ValidationError(
                "planner.junction_acceleration must be positive".to_string(),
            ));
        }
        if self.min_segment_usec <= 0.0 || self.nom_segment_usec < self.min_segment_usec {
            return Err(ConfigError::ValidationError(format!(
                "planner segment times invalid: min={} nom={}",
                self.min_segment_usec, self.nom_segment_usec
            )));
        }
        if self.phat_city_usec < self.min_planned_usec {
            return Err(ConfigError::ValidationError(format!(
                "planner.phat_city_usec ({}) below min_planned_usec ({})",
                self.phat_city_usec, self.min_planned_usec
            )));
        }
        if self.replan_passes == 0 {
            return Err(ConfigError::ValidationError(
                "planner.replan_passes must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

// ─── Probe / Spindle ────────────────────────────────────────────────

/// Probing cycle configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProbeConfig {
    /// Switch input used as the probe.
    #[serde(default = "default_probe_input")]
    pub input: u8,
    /// Minimum travel between start and probe target [mm].
    #[serde(default = "default_minimum_travel")]
    pub minimum_travel: f64,
}

fn default_probe_input() -> u8 {
    DEFAULT_PROBE_INPUT
}
fn default_minimum_travel() -> f64 {
    MINIMUM_PROBE_TRAVEL
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            input: DEFAULT_PROBE_INPUT,
            minimum_travel: MINIMUM_PROBE_TRAVEL,
        }
    }
}

/// Spindle bookkeeping configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SpindleConfig {
    /// Dwell after resuming a paused spindle [s].
    #[serde(default)]
    pub dwell_seconds: f64,
}

// ─── Axes / Motors ──────────────────────────────────────────────────

/// Per-axis kinematic limits.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct AxisConfig {
    pub axis: Axis,
    /// Traverse (G0) velocity limit [mm/min].
    #[serde(default = "default_velocity_max")]
    pub velocity_max: f64,
    /// Feed (G1) velocity limit [mm/min].
    #[serde(default = "default_velocity_max")]
    pub feedrate_max: f64,
    /// Maximum jerk [mm/min³ / 1e6].
    #[serde(default = "default_jerk_max")]
    pub jerk_max: f64,
    /// High-speed jerk used by cycles such as probing [mm/min³ / 1e6].
    #[serde(default = "default_jerk_max")]
    pub jerk_high: f64,
    /// Junction deviation [mm].
    #[serde(default = "default_junction_deviation")]
    pub junction_deviation: f64,
}

fn default_velocity_max() -> f64 {
    16_000.0
}
fn default_jerk_max() -> f64 {
    5_000.0
}
fn default_junction_deviation() -> f64 {
    0.05
}

impl AxisConfig {
    /// Default limits for `axis`.
    pub fn for_axis(axis: Axis) -> Self {
        Self {
            axis,
            velocity_max: default_velocity_max(),
            feedrate_max: default_velocity_max(),
            jerk_max: default_jerk_max(),
            jerk_high: default_jerk_max(),
            junction_deviation: default_junction_deviation(),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            ("velocity_max", self.velocity_max),
            ("feedrate_max", self.feedrate_max),
            ("jerk_max", self.jerk_max),
            ("jerk_high", self.jerk_high),
            ("junction_deviation", self.junction_deviation),
        ];
        for (name, value) in checks {
            if !(value > 0.0) {
                return Err(ConfigError::ValidationError(format!(
                    "axis {}: {name} must be positive (got {value})",
                    self.axis
                )));
            }
        }
        Ok(())
    }
}

/// Motor-to-axis mapping and step scaling.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct MotorConfig {
    /// Motor number, 1-based.
    pub motor: u8,
    pub axis: Axis,
    /// Full step angle [deg].
    #[serde(default = "default_step_angle")]
    pub step_angle: f64,
    /// Travel per motor revolution [mm].
    #[serde(default = "default_travel_per_rev")]
    pub travel_per_rev: f64,
    #[serde(default = "default_microsteps")]
    pub microsteps: u16,
    /// Reverse the motor direction.
    #[serde(default)]
    pub reversed: bool,
}

fn default_step_angle() -> f64 {
    1.8
}
fn default_travel_per_rev() -> f64 {
    1.25
}
fn default_microsteps() -> u16 {
    8
}

impl MotorConfig {
    /// Default mapping of motor `index` (0-based) onto the axis of the same index.
    pub fn for_index(index: usize) -> Self {
        Self {
            motor: index as u8 + 1,
            axis: Axis::from_index(index % AXES).unwrap_or(Axis::X),
            step_angle: default_step_angle(),
            travel_per_rev: default_travel_per_rev(),
            microsteps: default_microsteps(),
            reversed: false,
        }
    }

    /// Signed steps per mm (or per degree for rotary axes).
    pub fn steps_per_unit(&self) -> f64 {
        let steps = 360.0 / (self.step_angle / self.microsteps as f64) / self.travel_per_rev;
        if self.reversed { -steps } else { steps }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.motor == 0 || self.motor as usize > MOTORS {
            return Err(ConfigError::ValidationError(format!(
                "motor {} out of range [1, {MOTORS}]",
                self.motor
            )));
        }
        if !(self.step_angle > 0.0) || !(self.travel_per_rev > 0.0) || self.microsteps == 0 {
            return Err(ConfigError::ValidationError(format!(
                "motor {}: step_angle, travel_per_rev and microsteps must be positive",
                self.motor
            )));
        }
        Ok(())
    }
}

// ─── Complete Motion Config ─────────────────────────────────────────

/// Complete configuration of the motion core.
///
/// # TOML Example
///
/// ```toml
/// [shared]
/// service_name = "cnc-motion"
///
/// [planner]
/// junction_acceleration = 100000.0
///
/// [[axes]]
/// axis = "Z"
/// velocity_max = 1200.0
/// jerk_max = 50.0
///
/// [[motors]]
/// motor = 3
/// axis = "Z"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MotionConfig {
    #[serde(default)]
    pub shared: SharedConfig,
    #[serde(default)]
    pub planner: PlannerConfig,
    #[serde(default)]
    pub probe: ProbeConfig,
    #[serde(default)]
    pub spindle: SpindleConfig,
    /// Axes not listed use `AxisConfig::for_axis` defaults.
    #[serde(default)]
    pub axes: Vec<AxisConfig>,
    /// Motors not listed map 1:1 onto axes with default scaling.
    #[serde(default)]
    pub motors: Vec<MotorConfig>,
}

impl MotionConfig {
    /// Validate all sections, axis uniqueness and motor numbering.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.shared.validate()?;
        self.planner.validate()?;

        if !(self.probe.minimum_travel > 0.0) {
            return Err(ConfigError::ValidationError(
                "probe.minimum_travel must be positive".to_string(),
            ));
        }
        if self.spindle.dwell_seconds < 0.0 {
            return Err(ConfigError::ValidationError(
                "spindle.dwell_seconds cannot be negative".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for ax in &self.axes {
            if !seen.insert(ax.axis) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate axis {}",
                    ax.axis
                )));
            }
            ax.validate()?;
        }

        let mut seen = HashSet::new();
        for m in &self.motors {
            m.validate()?;
            if !seen.insert(m.motor) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate motor {}",
                    m.motor
                )));
            }
        }
        Ok(())
    }

    /// Per-axis limits indexed by `Axis::index()`.
    pub fn axis_table(&self) -> [AxisConfig; AXES] {
        let mut table = Axis::ALL.map(AxisConfig::for_axis);
        for ax in &self.axes {
            table[ax.axis.index()] = *ax;
        }
        table
    }

    /// Motor table indexed by motor number - 1.
    pub fn motor_table(&self) -> [MotorConfig; MOTORS] {
        let mut table: [MotorConfig; MOTORS] = std::array::from_fn(MotorConfig::for_index);
        for m in &self.motors {
            if let Some(slot) = (m.motor as usize).checked_sub(1).and_then(|i| table.get_mut(i)) {
                *slot = *m;
            }
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_log_level_default() {
        assert_eq!(LogLevel::default(), LogLevel::Info);
        assert_eq!(LogLevel::Warn.as_directive(), "warn");
    }

    #[test]
    fn test_log_level_deserialization() {
        #[derive(Debug, Deserialize, PartialEq)]
        struct TestWrapper {
            level: LogLevel,
        }

        assert_eq!(
            toml::from_str::<TestWrapper>("level = \"trace\"").unwrap().level,
            LogLevel::Trace
        );
        assert_eq!(
            toml::from_str::<TestWrapper>("level = \"error\"").unwrap().level,
            LogLevel::Error
        );
    }

    #[test]
    fn test_shared_config_validation_empty_service_name() {
        let config = SharedConfig {
            log_level: LogLevel::Info,
            service_name: "".to_string(),
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_config_loader_file_not_found() {
        let result = MotionConfig::load(Path::new("/nonexistent/path/machine.toml"));
        assert!(matches!(result, Err(ConfigError::FileNotFound)));
    }

    #[test]
    fn test_config_loader_parse_error() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "invalid toml {{{{").unwrap();

        let result = MotionConfig::load(file.path());
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn empty_file_yields_defaults() {
        let config = MotionConfig::from_toml("").unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.planner, PlannerConfig::default());
        assert_eq!(config.probe.input, DEFAULT_PROBE_INPUT);
        let axes = config.axis_table();
        assert_eq!(axes[Axis::C.index()].axis, Axis::C);
        let motors = config.motor_table();
        assert_eq!(motors[2].axis, Axis::Z);
        assert_eq!(motors[2].motor, 3);
    }

    #[test]
    fn test_config_loader_success() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[shared]
log_level = "debug"
service_name = "mill-1"

[planner]
junction_acceleration = 200000.0
planner_timeout_ms = 25

[probe]
input = 3

[[axes]]
axis = "Z"
velocity_max = 1200.0
feedrate_max = 1200.0
jerk_max = 50.0
jerk_high = 500.0

[[motors]]
motor = 1
axis = "Y"
reversed = true
"#
        )
        .unwrap();
        file.flush().unwrap();

        let config = MotionConfig::load(file.path()).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.shared.log_level, LogLevel::Debug);
        assert_eq!(config.planner.junction_acceleration, 200000.0);
        assert_eq!(config.planner.planner_timeout_ms, 25);
        assert_eq!(config.planner.nom_segment_usec, NOM_SEGMENT_USEC);
        assert_eq!(config.probe.input, 3);

        let axes = config.axis_table();
        assert_eq!(axes[Axis::Z.index()].jerk_max, 50.0);
        assert_eq!(axes[Axis::Z.index()].jerk_high, 500.0);
        assert_eq!(axes[Axis::X.index()].jerk_max, 5000.0);

        let motors = config.motor_table();
        assert_eq!(motors[0].axis, Axis::Y);
        assert!(motors[0].steps_per_unit() < 0.0);
    }

    #[test]
    fn duplicate_axis_rejected() {
        let config = MotionConfig::from_toml(
            r#"
[[axes]]
axis = "X"
[[axes]]
axis = "X"
"#,
        )
        .unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(msg)) if msg.contains("duplicate axis")
        ));
    }

    #[test]
    fn motor_out_of_range_rejected() {
        let config = MotionConfig::from_toml(
            r#"
[[motors]]
motor = 9
axis = "X"
"#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn planner_thresholds_validated() {
        let mut planner = PlannerConfig::default();
        planner.phat_city_usec = 1000.0;
        assert!(planner.validate().is_err());

        let mut planner = PlannerConfig::default();
        planner.replan_passes = 0;
        assert!(planner.validate().is_err());
    }

    #[test]
    fn steps_per_unit_default_motor() {
        // 1.8° full step, 8 microsteps, 1.25 mm/rev → 1280 steps/mm.
        let m = MotorConfig::for_index(0);
        assert!((m.steps_per_unit() - 1280.0).abs() < 1e-9);
    }
}
