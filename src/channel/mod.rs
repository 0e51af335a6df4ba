pub mod processor;

pub use processor::{ChannelProcessor, RowCol};
