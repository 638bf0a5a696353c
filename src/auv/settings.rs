//! Calibration schedule constants and the vehicle properties document.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use super::error::ConfigError;
use super::model::LevelMomentMapping;

pub const SAMPLE_COUNT: usize = 19;
pub const SAMPLE_INTERVAL_S: f64 = 0.5;
pub const GAIN: f64 = 0.2;
pub const SETTLE_DURATION_S: f64 = 3.0;
pub const DEPTH_SETPOINT_M: f64 = 1.0;
pub const ROLL_SETPOINT_DEG: f64 = 90.0;
pub const MEASUREMENT_TIMEOUT_S: f64 = 5.0;
pub const SINK_TIMEOUT_S: f64 = 30.0;
pub const MIN_BUOYANT_FORCE_N: f64 = 1e-3;

/// Schedule and update-law parameters for one calibration run.
///
/// Every field has a default, so a settings document only needs to name
/// what it overrides.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CalibrationSettings {
    /// Samples taken in each sampling phase.
    pub sample_count: usize,
    /// Delay before each sample (s).
    pub sample_interval_s: f64,
    /// Weight of each sample in the incremental update.
    pub gain: f64,
    /// Wait after an attitude change before sampling (s).
    pub settle_duration_s: f64,
    /// Depth held during calibration (m).
    pub depth_setpoint_m: f64,
    /// Roll commanded for the roll moment phase (deg).
    pub roll_setpoint_deg: f64,
    /// Bounded wait for each residual sample (s).
    pub measurement_timeout_s: f64,
    /// Bounded wait for the parameter sink to respond at startup (s).
    pub sink_timeout_s: f64,
    /// Below this magnitude the buoyant force estimate is degenerate (N).
    pub min_buoyant_force_n: f64,
    pub level_moment_mapping: LevelMomentMapping,
}

impl Default for CalibrationSettings {
    fn default() -> Self {
        Self {
            sample_count: SAMPLE_COUNT,
            sample_interval_s: SAMPLE_INTERVAL_S,
            gain: GAIN,
            settle_duration_s: SETTLE_DURATION_S,
            depth_setpoint_m: DEPTH_SETPOINT_M,
            roll_setpoint_deg: ROLL_SETPOINT_DEG,
            measurement_timeout_s: MEASUREMENT_TIMEOUT_S,
            sink_timeout_s: SINK_TIMEOUT_S,
            min_buoyant_force_n: MIN_BUOYANT_FORCE_N,
            level_moment_mapping: LevelMomentMapping::default(),
        }
    }
}

impl CalibrationSettings {
    pub fn from_yaml_file(path: &Path) -> Result<Self, ConfigError> {
        let text = read_document(path)?;
        serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Same schedule with every delay zeroed. Useful for replaying recorded residuals.
    pub fn without_delays(mut self) -> Self {
        self.sample_interval_s = 0.0;
        self.settle_duration_s = 0.0;
        self
    }

    pub fn sample_interval(&self) -> Duration {
        seconds(self.sample_interval_s)
    }

    pub fn settle_duration(&self) -> Duration {
        seconds(self.settle_duration_s)
    }

    pub fn measurement_timeout(&self) -> Duration {
        seconds(self.measurement_timeout_s)
    }

    pub fn sink_timeout(&self) -> Duration {
        seconds(self.sink_timeout_s)
    }

    /// Total residual samples consumed by a complete run.
    pub fn total_samples(&self) -> usize {
        self.sample_count * 3
    }
}

// negative or NaN durations collapse to zero
fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

/// Physical properties read once at task start.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VehicleProperties {
    /// Vehicle mass (kg)
    pub mass: f64,
}

#[derive(Deserialize)]
struct PropertiesDocument {
    properties: Option<PropertiesSection>,
}

#[derive(Deserialize)]
struct PropertiesSection {
    mass: Option<f64>,
}

impl VehicleProperties {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = read_document(path)?;
        let document: PropertiesDocument =
            serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        let mass = document
            .properties
            .and_then(|section| section.mass)
            .ok_or_else(|| ConfigError::MissingMass(path.to_path_buf()))?;

        if !mass.is_finite() || mass <= 0.0 {
            return Err(ConfigError::InvalidMass {
                path: path.to_path_buf(),
                mass,
            });
        }

        Ok(Self { mass })
    }
}

fn read_document(path: &Path) -> Result<String, ConfigError> {
    fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}
