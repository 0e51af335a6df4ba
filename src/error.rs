use thiserror::Error;

/// Error taxonomy for the acquisition core.
///
/// `Config` errors surface to the control caller and leave state untouched.
/// `Source` errors are logged and trigger a self-stop of the running source.
/// `Writer` errors surface on the first record of a file, otherwise they
/// disable the offending writer. Queue overflow is never fatal and therefore
/// not represented here; it is counted by the publisher.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("channel index {index} out of range (nchan = {nchan})")]
    ChannelIndex { index: usize, nchan: usize },

    #[error("no source is active")]
    NoActiveSource,

    #[error("source read failed: {0}")]
    Source(String),

    #[error("file writer: {0}")]
    Writer(#[from] std::io::Error),

    #[error("matrix payload: {0}")]
    Matrix(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Shorthand used wherever a formatted `Config` error is raised.
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }
}
