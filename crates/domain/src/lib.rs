//! Shared value types for turnflow: the staged pipeline execution
//! substrate's config, stage model, persisted-entity shapes, provider
//! capability model, and structured trace events.

pub mod capability;
pub mod config;
pub mod entities;
pub mod error;
pub mod message;
pub mod stage;
pub mod stream;
pub mod trace;

pub use capability::{LlmCapabilities};
pub use config::Config;
pub use error::{Error, Result};
pub use message::{Message, MessageContent, Role};
pub use stage::{
    Behavior, Channel, ContextSnapshot, PipelineContext, StageContext, StageInputs, StageOutput,
    StagePorts, StageStatus, Topology,
};
pub use stream::{BoxStream, StreamEvent, Usage};
pub use trace::TraceEvent;
