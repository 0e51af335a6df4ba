pub mod channel;
pub mod control;
pub mod core;
pub mod error;
pub mod publish;
pub mod source;
pub mod triggering;
pub mod writing;

pub use crate::control::{Ports, ServerStatus, SourceControl};
pub use crate::core::{DataRecord, DataSegment, DataStream, FrameIndex, RawSample};
pub use crate::error::{Error, Result};
pub use crate::source::{RunningSource, SimPulseConfig, TriangleConfig};
pub use crate::triggering::{FullTriggerState, TriggerBroker, TriggerEngine, TriggerState};
pub use crate::writing::WriteControlConfig;
