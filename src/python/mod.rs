use pyo3::prelude::*;
use pyo3::exceptions::{PyIOError, PyRuntimeError, PyValueError};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use crate::auv::{
    CalibrationError, CalibrationServer, CalibrationSettings, CalibrationTask, GoalHandle, GoalOutcome,
    TopicCommandPort, TopicMeasurementPort,
};
use crate::pubsub::TopicRegistry;
use crate::uart::UartLink;

#[pyclass]
pub struct PyCalibrationServer{
    link: UartLink,
    server: CalibrationServer,
    properties_file: String,
    settings: CalibrationSettings,
    goal: Mutex<Option<GoalHandle>>,
    last_outcome: Mutex<Option<GoalOutcome>>,
}

#[pymethods]
impl PyCalibrationServer{
    #[new]
    #[pyo3(signature = (port, baud, properties_file, settings_file=None))]
    fn new(port: &str, baud: u32, properties_file: &str, settings_file: Option<&str>) -> PyResult<Self>{
        let settings = match settings_file{
            Some(path) => CalibrationSettings::from_yaml_file(Path::new(path))
                .map_err(|e| PyValueError::new_err(e.to_string()))?,
            None => CalibrationSettings::default(),
        };

        let registry = Arc::new(TopicRegistry::new());
        //bridge thread exits on shutdown(); nothing to join from python
        let (link, _bridge) = UartLink::open(port, baud, Arc::clone(&registry))
            .map_err(|e| PyIOError::new_err(e.to_string()))?;
        let server = CalibrationServer::new(&registry);

        Ok(PyCalibrationServer{
            link,
            server,
            properties_file: properties_file.to_string(),
            settings,
            goal: Mutex::new(None),
            last_outcome: Mutex::new(None),
        })
    }

    fn start(&self) -> PyResult<()>{
        let registry = self.link.registry();
        let task = CalibrationTask::new(
            self.settings.clone(),
            &self.properties_file,
            TopicCommandPort::new(registry),
            TopicMeasurementPort::new(registry),
            self.link.parameter_sink(),
        );
        match self.server.start(task){
            Ok(handle) =>{
                *self.goal.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
                *self.last_outcome.lock().unwrap_or_else(PoisonError::into_inner) = None;
                Ok(())
            }
            Err(CalibrationError::AlreadyRunning) => Err(PyRuntimeError::new_err("calibration already running")),
            Err(e) => Err(PyRuntimeError::new_err(e.to_string())),
        }
    }

    fn cancel(&self){
        if let Some(goal) = self.goal.lock().unwrap_or_else(PoisonError::into_inner).as_ref(){
            goal.cancel();
        }
    }

    //"idle", "active", or the terminal outcome of the last goal
    fn status(&self) -> String{
        let mut goal = self.goal.lock().unwrap_or_else(PoisonError::into_inner);
        let mut last = self.last_outcome.lock().unwrap_or_else(PoisonError::into_inner);

        if goal.as_ref().is_some_and(|g| g.is_finished()){
            if let Some(handle) = goal.take(){
                *last = Some(handle.join());
            }
        }

        match (goal.as_ref(), last.as_ref()){
            (Some(_), _) => "active".to_string(),
            (None, Some(outcome)) => outcome.to_string(),
            (None, None) => "idle".to_string(),
        }
    }

    //(phase, samples consumed, Fb, cob x, cob y, cob z) of the latest phase transition
    fn feedback(&self) -> Option<(String, usize, f64, f64, f64, f64)>{
        self.server.feedback_topic().peek_latest().map(|(fb, _)|{
            let cob = fb.model.center_offset;
            (fb.phase.to_string(), fb.samples_consumed, fb.model.buoyant_force, cob.x, cob.y, cob.z)
        })
    }

    fn shutdown(&self){
        self.cancel();
        self.link.shutdown();
    }
}

#[pymodule]
fn buoy_cal(_py: Python, m: &PyModule) -> PyResult<()>{
    m.add_class::<PyCalibrationServer>()?;
    Ok(())
}
