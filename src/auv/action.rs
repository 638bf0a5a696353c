/**
 * Calibration Goal Server
 *
 * Runs one CalibrationTask at a time on a background thread and reports
 * a single terminal outcome. A second start request while a goal is
 * active is rejected: two runs would race on the parameter sink.
 */

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::pubsub::{Publisher, Topic, TopicRegistry};
use super::error::CalibrationError;
use super::model::BuoyancyModel;
use super::phase::CalibrationPhase;
use super::ports::{CancelToken, CommandPort, MeasurementPort, ParameterSink, FEEDBACK_TOPIC, TOPIC_CAPACITY};
use super::task::CalibrationTask;

pub const SENSOR_TIMEOUT_REASON: &str = "sensor timeout";
pub const DEGENERATE_REASON: &str = "degenerate buoyancy estimate";

/// Terminal result of a calibration goal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GoalOutcome {
    Succeeded,
    Failed(String),
    Cancelled,
}

impl<T> From<Result<T, CalibrationError>> for GoalOutcome {
    fn from(result: Result<T, CalibrationError>) -> Self {
        match result {
            Ok(_) => GoalOutcome::Succeeded,
            Err(CalibrationError::Cancelled { .. }) => GoalOutcome::Cancelled,
            Err(CalibrationError::MeasurementTimeout { .. }) => {
                GoalOutcome::Failed(SENSOR_TIMEOUT_REASON.to_string())
            }
            Err(CalibrationError::DegenerateEstimate { .. }) => {
                GoalOutcome::Failed(DEGENERATE_REASON.to_string())
            }
            Err(err) => GoalOutcome::Failed(err.to_string()),
        }
    }
}

impl fmt::Display for GoalOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GoalOutcome::Succeeded => f.write_str("succeeded"),
            GoalOutcome::Failed(reason) => write!(f, "failed: {}", reason),
            GoalOutcome::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Progress published when a phase begins.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationFeedback {
    pub phase: CalibrationPhase,
    pub samples_consumed: usize,
    pub model: BuoyancyModel,
}

pub struct CalibrationServer {
    active: Arc<AtomicBool>,
    feedback: Arc<Topic<CalibrationFeedback>>,
}

// clears the active flag when the task thread exits, panics included
struct ActiveGuard(Arc<AtomicBool>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl CalibrationServer {
    pub fn new(registry: &TopicRegistry) -> Self {
        Self {
            active: Arc::new(AtomicBool::new(false)),
            feedback: registry.get_or_create(FEEDBACK_TOPIC, TOPIC_CAPACITY),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    pub fn feedback_topic(&self) -> Arc<Topic<CalibrationFeedback>> {
        Arc::clone(&self.feedback)
    }

    /// Accept a goal and run it in the background.
    pub fn start<C, M, S>(&self, task: CalibrationTask<C, M, S>) -> Result<GoalHandle, CalibrationError>
    where
        C: CommandPort + Send + 'static,
        M: MeasurementPort + Send + 'static,
        S: ParameterSink + Send + 'static,
    {
        if self
            .active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            log::warn!("rejecting calibration goal: one is already active");
            return Err(CalibrationError::AlreadyRunning);
        }

        let guard = ActiveGuard(Arc::clone(&self.active));
        let cancel = CancelToken::new();
        let token = cancel.clone();
        let mut task = task.with_feedback(Publisher::new(Arc::clone(&self.feedback)));

        let spawned = thread::Builder::new()
            .name("calibration".to_string())
            .spawn(move || {
                let _guard = guard;
                task.run(&token)
            });

        match spawned {
            Ok(handle) => {
                log::info!("calibration goal accepted");
                Ok(GoalHandle { cancel, handle })
            }
            // the guard went down with the closure, so the server is free again
            Err(err) => Err(CalibrationError::Spawn(err)),
        }
    }
}

/// Client side of an accepted goal.
pub struct GoalHandle {
    cancel: CancelToken,
    handle: JoinHandle<GoalOutcome>,
}

impl GoalHandle {
    /// Request cancellation; takes effect at the task's next suspension point.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Block until the goal reaches its terminal outcome.
    pub fn join(self) -> GoalOutcome {
        self.handle
            .join()
            .unwrap_or_else(|_| GoalOutcome::Failed("calibration task panicked".to_string()))
    }
}
