/**
 * AUV Buoyancy Calibration
 *
 * Estimates net buoyant force and center-of-buoyancy offset by holding
 * attitudes and integrating the residual forces/moments the depth and
 * attitude controller reports, pushing each refined estimate to the
 * thruster controller as it goes.
 */

pub mod action;
pub mod error;
pub mod model;
pub mod phase;
pub mod ports;
pub mod settings;
pub mod task;

pub use action::{CalibrationFeedback, CalibrationServer, GoalHandle, GoalOutcome};
pub use error::{CalibrationError, ConfigError, PortError};
pub use model::{BuoyancyModel, LevelMomentMapping, ParameterUpdate, GRAVITY};
pub use phase::CalibrationPhase;
pub use ports::{
    AttitudeSetpoint, CancelToken, CommandPort, MeasurementPort, ParameterSink,
    TopicCommandPort, TopicMeasurementPort,
};
pub use settings::{CalibrationSettings, VehicleProperties};
pub use task::{CalibrationTask, Sample};
