use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::core::FrameBlock;
use crate::error::{Error, Result};

use super::{DataSource, SourceTraits};

/// A source whose first read fails, for exercising the self-stop path end
/// to end: the read loop must log the failure, request a stop, and the
/// following read must observe it as a clean end-of-stream.
pub struct ErroringSource {
    nchan: usize,
    errored: bool,
}

impl ErroringSource {
    pub fn new(nchan: usize) -> Self {
        ErroringSource {
            nchan: nchan.max(1),
            errored: false,
        }
    }
}

#[async_trait]
impl DataSource for ErroringSource {
    fn source_name(&self) -> &'static str {
        "Erroring"
    }

    async fn sample(&mut self) -> Result<SourceTraits> {
        Ok(SourceTraits::with_defaults(self.nchan, 10_000.0))
    }

    async fn blocking_read(
        &mut self,
        abort: &mut broadcast::Receiver<()>,
    ) -> Result<Option<FrameBlock>> {
        if !matches!(
            abort.try_recv(),
            Err(broadcast::error::TryRecvError::Empty)
        ) {
            return Ok(None);
        }
        if !self.errored {
            self.errored = true;
            return Err(Error::Source("deliberate read failure".into()));
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn errors_once_then_ends_stream() {
        let mut src = ErroringSource::new(2);
        let (abort_tx, mut abort) = broadcast::channel(1);
        assert!(src.blocking_read(&mut abort).await.is_err());
        abort_tx.send(()).unwrap();
        assert!(src.blocking_read(&mut abort).await.unwrap().is_none());
    }
}
