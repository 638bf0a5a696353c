/**
 * Calibration Ports
 *
 * The three collaborators a calibration run talks to:
 * - CommandPort: depth and attitude setpoints for the controller
 * - MeasurementPort: force/moment residuals the controller is applying
 * - ParameterSink: live buoyancy parameters of the thruster controller
 *
 * Topic-backed command and measurement ports live here too, so the same
 * task runs against the serial bridge or an in-process controller.
 */

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use nalgebra::Vector3;

use crate::pubsub::{Publisher, Subscriber, TopicRegistry};
use crate::uart::protocol::{AttitudeCommand, DepthCommand, ResidualMsg};
use super::error::PortError;
use super::model::ParameterUpdate;

pub const DEPTH_COMMAND_TOPIC: &str = "/command/depth";
pub const ATTITUDE_COMMAND_TOPIC: &str = "/command/attitude";
pub const FORCE_RESIDUAL_TOPIC: &str = "/command/force_depth";
pub const MOMENT_RESIDUAL_TOPIC: &str = "/command/moment";
pub const FEEDBACK_TOPIC: &str = "/calibration/feedback";
pub const TOPIC_CAPACITY: usize = 32;

const CANCEL_POLL: Duration = Duration::from_millis(10);

/// Attitude hold request. Angles in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AttitudeSetpoint {
    pub roll_active: bool,
    pub pitch_active: bool,
    pub roll: f64,
    pub pitch: f64,
}

impl AttitudeSetpoint {
    /// Hold both roll and pitch at the given angles.
    pub fn hold(roll: f64, pitch: f64) -> Self {
        Self {
            roll_active: true,
            pitch_active: true,
            roll,
            pitch,
        }
    }
}

pub trait CommandPort {
    fn set_depth(&mut self, enabled: bool, setpoint: f64) -> Result<(), PortError>;
    fn set_attitude(&mut self, setpoint: &AttitudeSetpoint) -> Result<(), PortError>;
}

/// Residuals published by the depth/attitude controller.
///
/// Both calls return only a sample produced after the call begins, or
/// `PortError::Timeout` once `timeout` elapses.
pub trait MeasurementPort {
    fn next_force_residual(&mut self, timeout: Duration) -> Result<Vector3<f64>, PortError>;
    fn next_moment_residual(&mut self, timeout: Duration) -> Result<Vector3<f64>, PortError>;
}

pub trait ParameterSink {
    /// Wait for the configuration service to answer.
    fn connect(&mut self, timeout: Duration) -> Result<(), PortError>;
    /// Apply a full snapshot; returns once acknowledged.
    fn apply(&mut self, update: &ParameterUpdate) -> Result<(), PortError>;
}

/// Out-of-band cancellation flag shared between a goal handle and its task.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Sleep for `duration`, waking early on cancellation.
    /// Returns false if cancelled before or during the sleep.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            thread::sleep((deadline - now).min(CANCEL_POLL));
        }
    }
}

/// Publishes setpoints on the command topics.
pub struct TopicCommandPort {
    depth: Publisher<DepthCommand>,
    attitude: Publisher<AttitudeCommand>,
}

impl TopicCommandPort {
    pub fn new(registry: &TopicRegistry) -> Self {
        Self {
            depth: Publisher::new(registry.get_or_create(DEPTH_COMMAND_TOPIC, TOPIC_CAPACITY)),
            attitude: Publisher::new(registry.get_or_create(ATTITUDE_COMMAND_TOPIC, TOPIC_CAPACITY)),
        }
    }
}

impl CommandPort for TopicCommandPort {
    fn set_depth(&mut self, enabled: bool, setpoint: f64) -> Result<(), PortError> {
        self.depth.publish(DepthCommand {
            active: enabled,
            depth: setpoint as f32,
        });
        Ok(())
    }

    fn set_attitude(&mut self, setpoint: &AttitudeSetpoint) -> Result<(), PortError> {
        self.attitude.publish(AttitudeCommand {
            roll_active: setpoint.roll_active,
            pitch_active: setpoint.pitch_active,
            roll: setpoint.roll as f32,
            pitch: setpoint.pitch as f32,
        });
        Ok(())
    }
}

/// Waits on the residual topics.
pub struct TopicMeasurementPort {
    force: Subscriber<ResidualMsg>,
    moment: Subscriber<ResidualMsg>,
}

impl TopicMeasurementPort {
    pub fn new(registry: &TopicRegistry) -> Self {
        Self {
            force: Subscriber::new(registry.get_or_create(FORCE_RESIDUAL_TOPIC, TOPIC_CAPACITY)),
            moment: Subscriber::new(registry.get_or_create(MOMENT_RESIDUAL_TOPIC, TOPIC_CAPACITY)),
        }
    }

    fn wait_fresh(
        subscriber: &Subscriber<ResidualMsg>,
        timeout: Duration,
        what: &'static str,
    ) -> Result<Vector3<f64>, PortError> {
        // anything already published predates the request
        subscriber.mark_seen();
        subscriber
            .wait_next(timeout)
            .map(|msg| msg.to_vector())
            .ok_or(PortError::Timeout(what))
    }
}

impl MeasurementPort for TopicMeasurementPort {
    fn next_force_residual(&mut self, timeout: Duration) -> Result<Vector3<f64>, PortError> {
        Self::wait_fresh(&self.force, timeout, "force residual")
    }

    fn next_moment_residual(&mut self, timeout: Duration) -> Result<Vector3<f64>, PortError> {
        Self::wait_fresh(&self.moment, timeout, "moment residual")
    }
}
