use std::collections::VecDeque;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use approx::assert_relative_eq;
use buoy_cal::auv::ports::{
    ATTITUDE_COMMAND_TOPIC, DEPTH_COMMAND_TOPIC, FORCE_RESIDUAL_TOPIC, MOMENT_RESIDUAL_TOPIC,
};
use buoy_cal::auv::{
    AttitudeSetpoint, BuoyancyModel, CalibrationError, CalibrationPhase, CalibrationServer, CalibrationSettings,
    CalibrationTask, CancelToken, CommandPort, GoalOutcome, MeasurementPort, ParameterSink, ParameterUpdate,
    PortError, TopicCommandPort, TopicMeasurementPort,
};
use buoy_cal::uart::{AttitudeCommand, DepthCommand, ResidualMsg};
use buoy_cal::{Publisher, Subscriber, TopicRegistry};
use nalgebra::Vector3;
use tempfile::NamedTempFile;

struct NullCommands;

impl CommandPort for NullCommands {
    fn set_depth(&mut self, _enabled: bool, _setpoint: f64) -> Result<(), PortError> {
        Ok(())
    }

    fn set_attitude(&mut self, _setpoint: &AttitudeSetpoint) -> Result<(), PortError> {
        Ok(())
    }
}

// replays scripted readings; an exhausted script times out
#[derive(Default)]
struct ScriptedResiduals {
    forces: VecDeque<Vector3<f64>>,
    moments: VecDeque<Vector3<f64>>,
    force_calls: usize,
    cancel_on_force_call: Option<(usize, CancelToken)>,
}

impl ScriptedResiduals {
    fn new(forces: Vec<Vector3<f64>>, moments: Vec<Vector3<f64>>) -> Self {
        Self {
            forces: forces.into(),
            moments: moments.into(),
            ..Self::default()
        }
    }

    fn cancel_on_force_call(mut self, call: usize, token: CancelToken) -> Self {
        self.cancel_on_force_call = Some((call, token));
        self
    }
}

impl MeasurementPort for ScriptedResiduals {
    fn next_force_residual(&mut self, _timeout: Duration) -> Result<Vector3<f64>, PortError> {
        self.force_calls += 1;
        if let Some((call, token)) = &self.cancel_on_force_call {
            if *call == self.force_calls {
                token.cancel();
            }
        }
        self.forces.pop_front().ok_or(PortError::Timeout("force residual"))
    }

    fn next_moment_residual(&mut self, _timeout: Duration) -> Result<Vector3<f64>, PortError> {
        self.moments.pop_front().ok_or(PortError::Timeout("moment residual"))
    }
}

#[derive(Clone, Default)]
struct SharedSink {
    pushes: Arc<Mutex<Vec<ParameterUpdate>>>,
    unreachable: bool,
}

impl SharedSink {
    fn pushes(&self) -> Vec<ParameterUpdate> {
        self.pushes.lock().unwrap().clone()
    }
}

impl ParameterSink for SharedSink {
    fn connect(&mut self, _timeout: Duration) -> Result<(), PortError> {
        if self.unreachable {
            Err(PortError::Timeout("controller heartbeat"))
        } else {
            Ok(())
        }
    }

    fn apply(&mut self, update: &ParameterUpdate) -> Result<(), PortError> {
        self.pushes.lock().unwrap().push(*update);
        Ok(())
    }
}

fn properties(text: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(text.as_bytes()).unwrap();
    file
}

fn vehicle(mass: f64) -> NamedTempFile {
    properties(&format!("properties:\n  mass: {}\n", mass))
}

fn fast_settings() -> CalibrationSettings {
    CalibrationSettings::default().without_delays()
}

#[test]
fn test_downward_force_residuals_reduce_buoyant_force() {
    let props = vehicle(10.0);
    let sink = SharedSink::default();
    let mut task = CalibrationTask::new(
        fast_settings(),
        props.path(),
        NullCommands,
        ScriptedResiduals::new(vec![Vector3::new(0.0, 0.0, -5.0); 19], vec![Vector3::zeros(); 38]),
        sink.clone(),
    );

    let model = task.execute(&CancelToken::new()).unwrap();

    assert_relative_eq!(model.buoyant_force, 79.1, epsilon = 1e-9);
    assert_eq!(model.center_offset, Vector3::zeros());
    // initial push + 19 * 3 samples
    assert_eq!(sink.pushes().len(), 58);
}

#[test]
fn test_force_sum_is_sequential_closed_form() {
    let forces = vec![
        Vector3::new(3.0, 0.0, 4.0),
        Vector3::new(0.0, 0.0, -2.0),
        Vector3::new(1.0, 2.0, -2.0),
        Vector3::new(0.0, 0.0, 0.0),
        Vector3::new(-6.0, 8.0, 0.0),
    ];
    let settings = CalibrationSettings { sample_count: forces.len(), ..fast_settings() };
    let props = vehicle(12.5);
    let sink = SharedSink::default();
    let mut task = CalibrationTask::new(
        settings,
        props.path(),
        NullCommands,
        ScriptedResiduals::new(forces.clone(), vec![Vector3::zeros(); 10]),
        sink.clone(),
    );

    let model = task.execute(&CancelToken::new()).unwrap();

    // +5, -2, -3, 0, +10 (z == 0 counts as upward)
    let expected = 12.5 * 9.81 + 0.2 * (5.0 - 2.0 - 3.0 + 0.0 + 10.0);
    assert_relative_eq!(model.buoyant_force, expected, epsilon = 1e-9);

    let pushes = sink.pushes();
    let mut running = 12.5 * 9.81;
    for (force, push) in forces.iter().zip(&pushes[1..]) {
        running += BuoyancyModel::signed_force_magnitude(force) * 0.2;
        assert_relative_eq!(push.buoyant_force, running, epsilon = 1e-9);
    }
}

#[test]
fn test_level_moments_use_final_force_estimate() {
    let moments = vec![
        Vector3::new(1.0, -2.0, 0.0),
        Vector3::new(0.5, 0.5, 9.0),
        Vector3::new(-3.0, 1.0, 0.0),
    ];
    let mut script = moments.clone();
    script.extend(vec![Vector3::zeros(); 3]);
    let settings = CalibrationSettings { sample_count: 3, ..fast_settings() };
    let props = vehicle(10.0);
    let mut task = CalibrationTask::new(
        settings,
        props.path(),
        NullCommands,
        ScriptedResiduals::new(vec![Vector3::new(0.0, 0.0, 2.0); 3], script),
        SharedSink::default(),
    );

    let model = task.execute(&CancelToken::new()).unwrap();

    let fb = 98.1 + 3.0 * 2.0 * 0.2;
    let sum_x: f64 = moments.iter().map(|m| m.x).sum();
    let sum_y: f64 = moments.iter().map(|m| m.y).sum();
    assert_relative_eq!(model.buoyant_force, fb, epsilon = 1e-9);
    assert_relative_eq!(model.center_offset.x, 0.2 * sum_y / fb, epsilon = 1e-12);
    assert_relative_eq!(model.center_offset.y, 0.2 * sum_x / fb, epsilon = 1e-12);
    assert_eq!(model.center_offset.z, 0.0);
}

#[test]
fn test_zero_residuals_leave_estimate_untouched() {
    let props = vehicle(7.0);
    let sink = SharedSink::default();
    let mut task = CalibrationTask::new(
        fast_settings(),
        props.path(),
        NullCommands,
        ScriptedResiduals::new(vec![Vector3::zeros(); 19], vec![Vector3::zeros(); 38]),
        sink.clone(),
    );

    assert_eq!(task.run(&CancelToken::new()), GoalOutcome::Succeeded);

    let initial = BuoyancyModel::from_mass(7.0).to_update();
    let pushes = sink.pushes();
    assert_eq!(pushes.len(), 58);
    assert!(pushes.iter().all(|push| *push == initial));
}

#[test]
fn test_cancel_mid_force_sampling() {
    let props = vehicle(10.0);
    let sink = SharedSink::default();
    let cancel = CancelToken::new();
    // the sixth wait is interrupted; its reading is discarded
    let residuals = ScriptedResiduals::new(vec![Vector3::new(0.0, 0.0, -5.0); 19], vec![Vector3::zeros(); 38])
        .cancel_on_force_call(6, cancel.clone());
    let mut task = CalibrationTask::new(fast_settings(), props.path(), NullCommands, residuals, sink.clone());

    let result = task.execute(&cancel);
    assert!(matches!(
        result,
        Err(CalibrationError::Cancelled { phase: CalibrationPhase::VerticalForceSampling })
    ));

    let pushes = sink.pushes();
    assert_eq!(pushes.len(), 1 + 5);
    let last = pushes[pushes.len() - 1];
    assert_relative_eq!(last.buoyant_force, 98.1 - 5.0, epsilon = 1e-9);
    assert_eq!((last.cob_x, last.cob_y, last.cob_z), (0.0, 0.0, 0.0));

    assert_eq!(GoalOutcome::from(result), GoalOutcome::Cancelled);
}

#[test]
fn test_timeout_mid_level_moment_sampling() {
    let props = vehicle(10.0);
    let sink = SharedSink::default();
    let mut task = CalibrationTask::new(
        fast_settings(),
        props.path(),
        NullCommands,
        // only nine moment readings arrive
        ScriptedResiduals::new(vec![Vector3::new(0.0, 0.0, -5.0); 19], vec![Vector3::new(1.0, 0.0, 0.0); 9]),
        sink.clone(),
    );

    assert_eq!(task.run(&CancelToken::new()), GoalOutcome::Failed("sensor timeout".to_string()));

    let pushes = sink.pushes();
    assert_eq!(pushes.len(), 1 + 19 + 9);
    let last = pushes[pushes.len() - 1];
    assert_relative_eq!(last.buoyant_force, 79.1, epsilon = 1e-9);
    assert_relative_eq!(last.cob_y, 9.0 * 0.2 / 79.1, epsilon = 1e-12);
    assert_eq!(last.cob_x, 0.0);
}

#[test]
fn test_degenerate_estimate_fails_before_division() {
    let settings = CalibrationSettings { sample_count: 1, gain: 1.0, ..fast_settings() };
    let props = vehicle(10.0);
    let sink = SharedSink::default();
    let mut task = CalibrationTask::new(
        settings,
        props.path(),
        NullCommands,
        ScriptedResiduals::new(vec![Vector3::new(0.0, 0.0, -98.1)], vec![Vector3::new(1.0, 1.0, 0.0); 2]),
        sink.clone(),
    );

    assert_eq!(
        task.run(&CancelToken::new()),
        GoalOutcome::Failed("degenerate buoyancy estimate".to_string())
    );
    assert!(sink.pushes().iter().all(|push| push.cob_x.is_finite() && push.cob_y.is_finite()));
    assert_eq!(sink.pushes().len(), 2);
}

#[test]
fn test_missing_mass_fails_without_pushing() {
    let props = properties("properties:\n  volume: 0.02\n");
    let sink = SharedSink::default();
    let mut task = CalibrationTask::new(
        fast_settings(),
        props.path(),
        NullCommands,
        ScriptedResiduals::default(),
        sink.clone(),
    );

    match task.run(&CancelToken::new()) {
        GoalOutcome::Failed(reason) => assert!(reason.starts_with("Configuration error")),
        other => panic!("unexpected outcome {:?}", other),
    }
    assert!(sink.pushes().is_empty());
}

#[test]
fn test_unreachable_sink_fails_without_pushing() {
    let props = vehicle(10.0);
    let sink = SharedSink { unreachable: true, ..SharedSink::default() };
    let mut task = CalibrationTask::new(
        fast_settings(),
        props.path(),
        NullCommands,
        ScriptedResiduals::default(),
        sink.clone(),
    );

    let err = task.execute(&CancelToken::new()).unwrap_err();
    assert!(matches!(err, CalibrationError::SinkUnavailable(PortError::Timeout(_))));
    assert!(sink.pushes().is_empty());
}

#[test]
fn test_server_runs_one_goal_at_a_time() {
    let registry = TopicRegistry::new();
    let server = CalibrationServer::new(&registry);
    let props = vehicle(10.0);
    let slow = CalibrationSettings { settle_duration_s: 30.0, ..CalibrationSettings::default() };

    let first = server
        .start(CalibrationTask::new(
            slow.clone(),
            props.path(),
            NullCommands,
            ScriptedResiduals::default(),
            SharedSink::default(),
        ))
        .unwrap();
    assert!(server.is_active());

    let second = server.start(CalibrationTask::new(
        slow,
        props.path(),
        NullCommands,
        ScriptedResiduals::default(),
        SharedSink::default(),
    ));
    assert!(matches!(second, Err(CalibrationError::AlreadyRunning)));

    first.cancel();
    assert_eq!(first.join(), GoalOutcome::Cancelled);
    assert!(!server.is_active());

    let third = server
        .start(CalibrationTask::new(
            fast_settings(),
            props.path(),
            NullCommands,
            ScriptedResiduals::new(vec![Vector3::zeros(); 19], vec![Vector3::zeros(); 38]),
            SharedSink::default(),
        ))
        .unwrap();
    assert_eq!(third.join(), GoalOutcome::Succeeded);

    let (feedback, _) = server.feedback_topic().peek_latest().unwrap();
    assert_eq!(feedback.phase, CalibrationPhase::Done);
    assert_eq!(feedback.samples_consumed, 57);
}

#[test]
fn test_end_to_end_over_topics() {
    let registry = Arc::new(TopicRegistry::new());
    let depth = Subscriber::<DepthCommand>::new(registry.get_or_create(DEPTH_COMMAND_TOPIC, 32));
    let attitude = Subscriber::<AttitudeCommand>::new(registry.get_or_create(ATTITUDE_COMMAND_TOPIC, 32));

    // stand-in for the controller: publishes residuals at a steady rate
    let running = Arc::new(AtomicBool::new(true));
    let controller = {
        let force = Publisher::<ResidualMsg>::new(registry.get_or_create(FORCE_RESIDUAL_TOPIC, 32));
        let moment = Publisher::<ResidualMsg>::new(registry.get_or_create(MOMENT_RESIDUAL_TOPIC, 32));
        let running = Arc::clone(&running);
        thread::spawn(move || {
            while running.load(Ordering::SeqCst) {
                force.publish(ResidualMsg { x: 0.0, y: 0.0, z: 1.0 });
                moment.publish(ResidualMsg { x: 0.0, y: 0.0, z: 0.0 });
                thread::sleep(Duration::from_millis(2));
            }
        })
    };

    let settings = CalibrationSettings { sample_count: 3, measurement_timeout_s: 1.0, ..fast_settings() };
    let props = vehicle(10.0);
    let sink = SharedSink::default();
    let mut task = CalibrationTask::new(
        settings,
        props.path(),
        TopicCommandPort::new(&registry),
        TopicMeasurementPort::new(&registry),
        sink.clone(),
    );

    let result = task.execute(&CancelToken::new());
    running.store(false, Ordering::SeqCst);
    controller.join().unwrap();

    let model = result.unwrap();
    assert_relative_eq!(model.buoyant_force, 98.1 + 3.0 * 0.2, epsilon = 1e-9);
    assert_eq!(sink.pushes().len(), 1 + 9);

    assert_eq!(depth.try_recv(), Some(DepthCommand { active: true, depth: 1.0 }));
    let level = attitude.try_recv().unwrap();
    let rolled = attitude.try_recv().unwrap();
    assert_eq!((level.roll, level.pitch), (0.0, 0.0));
    assert_eq!(rolled.roll, 90.0);
    assert!(rolled.roll_active && rolled.pitch_active);
}
