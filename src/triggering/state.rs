use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::FrameIndex;

/// Per-channel trigger configuration. All trigger kinds are independent
/// switches; the engine applies them in the fixed order edge, level, auto,
/// noise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TriggerState {
    pub auto_trigger: bool,
    pub auto_delay: Duration,

    pub edge_trigger: bool,
    pub edge_rising: bool,
    pub edge_level: i32,

    pub level_trigger: bool,
    pub level_rising: bool,
    pub level_level: i32,

    pub noise_trigger: bool,
    pub noise_delay: Duration,
}

impl Default for TriggerState {
    fn default() -> Self {
        TriggerState {
            auto_trigger: false,
            auto_delay: Duration::from_millis(250),
            edge_trigger: false,
            edge_rising: true,
            edge_level: 100,
            level_trigger: false,
            level_rising: true,
            level_level: 4000,
            noise_trigger: false,
            noise_delay: Duration::from_millis(250),
        }
    }
}

/// A trigger state plus the channels it applies to; the unit in which the
/// control surface configures and reports triggering.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct FullTriggerState {
    pub channel_indices: Vec<usize>,
    #[serde(flatten)]
    pub trigger_state: TriggerState,
}

/// Primary triggers found on one channel over one segment.
#[derive(Debug, Clone)]
pub struct TriggerList {
    pub channel_index: usize,
    pub frames: Vec<FrameIndex>,
}
