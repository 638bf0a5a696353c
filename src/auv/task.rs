/**
 * Calibration Task
 *
 * Sequential estimation run:
 * 1. Load vehicle mass, connect to the parameter sink, push the initial model
 * 2. Hold level attitude at depth and let the controller settle
 * 3. Fold force residuals into the buoyant force
 * 4. Fold level moment residuals into the x/y center offset
 * 5. Roll over, settle, fold roll moment residuals into the z offset
 *
 * Every consumed sample is pushed to the sink straight away, so the
 * thruster controller always runs on the latest estimate. Nothing is
 * rolled back on failure or cancellation.
 */

use std::path::{Path, PathBuf};

use log::{debug, error, info, warn};
use nalgebra::Vector3;

use crate::pubsub::Publisher;
use super::action::{CalibrationFeedback, GoalOutcome};
use super::error::CalibrationError;
use super::model::BuoyancyModel;
use super::phase::CalibrationPhase;
use super::ports::{AttitudeSetpoint, CancelToken, CommandPort, MeasurementPort, ParameterSink};
use super::settings::{CalibrationSettings, VehicleProperties};

/// One residual reading and the phase that consumed it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub phase: CalibrationPhase,
    pub reading: Vector3<f64>,
}

/// Estimate plus bookkeeping, threaded through the phases.
struct RunState {
    model: BuoyancyModel,
    samples_consumed: usize,
}

pub struct CalibrationTask<C, M, S> {
    settings: CalibrationSettings,
    properties_path: PathBuf,
    commands: C,
    measurements: M,
    sink: S,
    feedback: Option<Publisher<CalibrationFeedback>>,
}

impl<C, M, S> CalibrationTask<C, M, S>
where
    C: CommandPort,
    M: MeasurementPort,
    S: ParameterSink,
{
    pub fn new(
        settings: CalibrationSettings,
        properties_path: impl Into<PathBuf>,
        commands: C,
        measurements: M,
        sink: S,
    ) -> Self {
        Self {
            settings,
            properties_path: properties_path.into(),
            commands,
            measurements,
            sink,
            feedback: None,
        }
    }

    /// Publish progress on every phase transition.
    pub fn with_feedback(mut self, publisher: Publisher<CalibrationFeedback>) -> Self {
        self.feedback = Some(publisher);
        self
    }

    pub fn settings(&self) -> &CalibrationSettings {
        &self.settings
    }

    pub fn properties_path(&self) -> &Path {
        &self.properties_path
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Run to a terminal outcome.
    pub fn run(&mut self, cancel: &CancelToken) -> GoalOutcome {
        let result = self.execute(cancel);
        match &result {
            Ok(model) => info!(
                "calibration succeeded: Fb={:.3} N cob=({:.4}, {:.4}, {:.4}) m",
                model.buoyant_force, model.center_offset.x, model.center_offset.y, model.center_offset.z
            ),
            Err(CalibrationError::Cancelled { phase }) => warn!("calibration cancelled during {}", phase),
            Err(err) => error!("calibration failed: {}", err),
        }
        GoalOutcome::from(result)
    }

    /// Run every phase in order and return the final estimate.
    pub fn execute(&mut self, cancel: &CancelToken) -> Result<BuoyancyModel, CalibrationError> {
        let properties = VehicleProperties::load(&self.properties_path)?;
        self.sink
            .connect(self.settings.sink_timeout())
            .map_err(CalibrationError::SinkUnavailable)?;

        let mut state = RunState {
            model: BuoyancyModel::from_mass(properties.mass),
            samples_consumed: 0,
        };
        info!(
            "starting calibration: mass={} kg, initial Fb={:.3} N",
            properties.mass, state.model.buoyant_force
        );
        self.push(&state.model)?;

        let mut phase = CalibrationPhase::Leveling;
        loop {
            self.report(phase, &state);
            match phase {
                CalibrationPhase::Leveling => self.level(cancel)?,
                CalibrationPhase::VerticalForceSampling => self.sample_forces(&mut state, cancel)?,
                CalibrationPhase::LevelMomentSampling => self.sample_level_moments(&mut state, cancel)?,
                CalibrationPhase::RollSettle => self.roll(cancel)?,
                CalibrationPhase::RollMomentSampling => self.sample_roll_moments(&mut state, cancel)?,
                CalibrationPhase::Done => break,
            }
            phase = match phase.next() {
                Some(next) => next,
                None => break,
            };
        }

        Ok(state.model)
    }

    fn level(&mut self, cancel: &CancelToken) -> Result<(), CalibrationError> {
        self.commands
            .set_depth(true, self.settings.depth_setpoint_m)
            .map_err(CalibrationError::Command)?;
        self.commands
            .set_attitude(&AttitudeSetpoint::hold(0.0, 0.0))
            .map_err(CalibrationError::Command)?;
        self.settle(CalibrationPhase::Leveling, cancel)
    }

    fn roll(&mut self, cancel: &CancelToken) -> Result<(), CalibrationError> {
        self.commands
            .set_attitude(&AttitudeSetpoint::hold(self.settings.roll_setpoint_deg, 0.0))
            .map_err(CalibrationError::Command)?;
        self.settle(CalibrationPhase::RollSettle, cancel)
    }

    fn settle(&self, phase: CalibrationPhase, cancel: &CancelToken) -> Result<(), CalibrationError> {
        if cancel.sleep(self.settings.settle_duration()) {
            Ok(())
        } else {
            Err(CalibrationError::Cancelled { phase })
        }
    }

    fn sample_forces(&mut self, state: &mut RunState, cancel: &CancelToken) -> Result<(), CalibrationError> {
        let gain = self.settings.gain;
        self.sample_phase(CalibrationPhase::VerticalForceSampling, state, cancel, |model, sample| {
            model.apply_force_residual(&sample.reading, gain);
            Ok(())
        })
    }

    fn sample_level_moments(&mut self, state: &mut RunState, cancel: &CancelToken) -> Result<(), CalibrationError> {
        let gain = self.settings.gain;
        let mapping = self.settings.level_moment_mapping;
        let min_force = self.settings.min_buoyant_force_n;
        self.sample_phase(CalibrationPhase::LevelMomentSampling, state, cancel, |model, sample| {
            model.apply_level_moment(&sample.reading, gain, mapping, min_force)
        })
    }

    fn sample_roll_moments(&mut self, state: &mut RunState, cancel: &CancelToken) -> Result<(), CalibrationError> {
        let gain = self.settings.gain;
        let min_force = self.settings.min_buoyant_force_n;
        self.sample_phase(CalibrationPhase::RollMomentSampling, state, cancel, |model, sample| {
            model.apply_roll_moment(&sample.reading, gain, min_force)
        })
    }

    // fixed-count loop: delay, wait for one residual, update, push
    fn sample_phase<F>(
        &mut self,
        phase: CalibrationPhase,
        state: &mut RunState,
        cancel: &CancelToken,
        mut update: F,
    ) -> Result<(), CalibrationError>
    where
        F: FnMut(&mut BuoyancyModel, &Sample) -> Result<(), CalibrationError>,
    {
        let timeout = self.settings.measurement_timeout();
        for index in 0..self.settings.sample_count {
            if !cancel.sleep(self.settings.sample_interval()) {
                return Err(CalibrationError::Cancelled { phase });
            }

            let reading = if phase == CalibrationPhase::VerticalForceSampling {
                self.measurements.next_force_residual(timeout)
            } else {
                self.measurements.next_moment_residual(timeout)
            };
            // cancellation wins over whatever the wait produced
            if cancel.is_cancelled() {
                return Err(CalibrationError::Cancelled { phase });
            }
            let sample = Sample {
                phase,
                reading: reading.map_err(|err| CalibrationError::from_measurement(phase, err))?,
            };

            update(&mut state.model, &sample)?;
            state.samples_consumed += 1;
            self.push(&state.model)?;

            debug!(
                "{} sample {}/{}: reading=({:.3}, {:.3}, {:.3}) Fb={:.4} cob=({:.5}, {:.5}, {:.5})",
                phase,
                index + 1,
                self.settings.sample_count,
                sample.reading.x,
                sample.reading.y,
                sample.reading.z,
                state.model.buoyant_force,
                state.model.center_offset.x,
                state.model.center_offset.y,
                state.model.center_offset.z
            );
        }
        Ok(())
    }

    fn push(&mut self, model: &BuoyancyModel) -> Result<(), CalibrationError> {
        self.sink.apply(&model.to_update()).map_err(CalibrationError::Sink)
    }

    fn report(&self, phase: CalibrationPhase, state: &RunState) {
        info!("calibration phase: {}", phase);
        if let Some(feedback) = &self.feedback {
            feedback.publish(CalibrationFeedback {
                phase,
                samples_consumed: state.samples_consumed,
                model: state.model,
            });
        }
    }
}
