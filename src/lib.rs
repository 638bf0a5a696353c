pub mod ring_buffer;
pub mod pubsub;
pub mod uart;
pub mod auv;

#[cfg(feature = "python")]
pub mod python;

pub use ring_buffer::RingBuffer;

pub use pubsub::{
    Message, Topic,
    Publisher,
    Subscriber,
    TopicRegistry,
};

pub use auv::{
    BuoyancyModel, CalibrationError, CalibrationPhase, CalibrationServer, CalibrationSettings,
    CalibrationTask, CancelToken, GoalHandle, GoalOutcome,
};
pub use uart::{UartLink, UartParameterSink};
