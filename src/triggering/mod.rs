pub mod broker;
pub mod engine;
pub mod state;

pub use broker::TriggerBroker;
pub use engine::TriggerEngine;
pub use state::{FullTriggerState, TriggerList, TriggerState};
