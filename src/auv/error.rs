use std::path::PathBuf;

use super::phase::CalibrationPhase;

/// Problems with the vehicle properties or calibration settings documents.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed document {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Missing properties.mass in {}", .0.display())]
    MissingMass(PathBuf),

    #[error("Invalid vehicle mass {mass} kg in {}", .path.display())]
    InvalidMass { path: PathBuf, mass: f64 },
}

/// Failures reported by the command, measurement and parameter collaborators.
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Timeout waiting for {0}")]
    Timeout(&'static str),

    #[error("Link disconnected")]
    Disconnected,

    #[error("Failed to encode message: {0}")]
    Encode(String),

    #[error("Rejected by controller: {0}")]
    Rejected(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Terminal errors of a calibration run.
#[derive(Debug, thiserror::Error)]
pub enum CalibrationError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Parameter sink unavailable: {0}")]
    SinkUnavailable(#[source] PortError),

    #[error("Parameter sink error: {0}")]
    Sink(#[source] PortError),

    #[error("Command port error: {0}")]
    Command(#[source] PortError),

    #[error("Measurement error during {phase}: {source}")]
    Measurement {
        phase: CalibrationPhase,
        #[source]
        source: PortError,
    },

    #[error("No measurement within timeout during {phase}")]
    MeasurementTimeout { phase: CalibrationPhase },

    #[error("Buoyant force estimate collapsed to {buoyant_force} N")]
    DegenerateEstimate { buoyant_force: f64 },

    #[error("Cancelled during {phase}")]
    Cancelled { phase: CalibrationPhase },

    #[error("A calibration goal is already active")]
    AlreadyRunning,

    #[error("Failed to start calibration thread: {0}")]
    Spawn(#[source] std::io::Error),
}

impl CalibrationError {
    /// Classify a measurement failure: timeouts get their own kind.
    pub fn from_measurement(phase: CalibrationPhase, err: PortError) -> Self {
        match err {
            PortError::Timeout(_) => CalibrationError::MeasurementTimeout { phase },
            source => CalibrationError::Measurement { phase, source },
        }
    }
}
