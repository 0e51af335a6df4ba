pub mod ljh;
pub mod off;
pub mod paths;
pub mod state;

pub use ljh::{Ljh3Writer, LjhWriter};
pub use off::OffWriter;
pub use paths::{make_directory, FilenamePattern};
pub use state::{WriteControlConfig, WriteRequest, WritingState, WritingStateSnapshot};
