//! scoutd — recognition loop, enrollment and command dispatch for the Scout
//! surveillance robot.

pub mod config;
pub mod console;
pub mod dispatcher;
pub mod enrollment;
pub mod pipeline;

pub use config::Config;
pub use dispatcher::CommandDispatcher;
pub use enrollment::{EnrollError, EnrollOutcome, EnrollmentFlow};
pub use pipeline::{
    FrameReport, PipelineError, PipelineHandle, PipelineSettings, PipelineState,
    RecognitionPipeline,
};
