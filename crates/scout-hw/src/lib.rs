//! scout-hw — Frame sources (V4L2 camera, MJPEG over HTTP) and actuator channels.

pub mod actuator;
pub mod camera;
pub mod mjpeg;
pub mod source;

pub use actuator::{open_channel, ActuatorChannel, ActuatorError, Command, SimulatedChannel};
pub use camera::{CameraError, CameraSource, DeviceInfo};
pub use mjpeg::MjpegSource;
pub use source::{open_source, FrameSource, RetryPolicy, SourceConfig, SourceError};
