use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::core::{DataSegment, FrameBlock, FrameIndex};
use crate::error::{Error, Result};

use super::{DataSource, SourceTraits};

/// Configuration for the triangle-wave source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TriangleConfig {
    pub nchan: usize,
    pub sample_rate: f64,
    pub min: u16,
    pub max: u16,
}

/// Exactly periodic up/down ramps between `min` and `max`, identical on all
/// channels; handy for verifying timing and the publication path without
/// any randomness.
pub struct TriangleSource {
    config: TriangleConfig,
    period: usize,
    next_frame: FrameIndex,
    next_due: Option<Instant>,
}

impl TriangleSource {
    pub fn new(config: TriangleConfig) -> Result<Self> {
        if config.nchan < 1 {
            return Err(Error::config("Triangle needs at least one channel"));
        }
        if !(config.sample_rate > 0.0) {
            return Err(Error::config("Triangle sample rate must be positive"));
        }
        if config.max <= config.min {
            return Err(Error::config(format!(
                "Triangle needs max > min, got [{}, {}]",
                config.min, config.max
            )));
        }
        let period = 2 * (config.max - config.min) as usize;
        Ok(TriangleSource {
            config,
            period,
            next_frame: 0,
            next_due: None,
        })
    }

    fn value_at(&self, frame: FrameIndex) -> u16 {
        let span = (self.config.max - self.config.min) as i64;
        let phase = frame.rem_euclid(self.period as i64);
        let offset = if phase < span { phase } else { 2 * span - phase };
        self.config.min + offset as u16
    }
}

#[async_trait]
impl DataSource for TriangleSource {
    fn source_name(&self) -> &'static str {
        "Triangles"
    }

    async fn sample(&mut self) -> Result<SourceTraits> {
        Ok(SourceTraits::with_defaults(
            self.config.nchan,
            self.config.sample_rate,
        ))
    }

    async fn blocking_read(
        &mut self,
        abort: &mut broadcast::Receiver<()>,
    ) -> Result<Option<FrameBlock>> {
        let block_period = Duration::from_secs_f64(self.period as f64 / self.config.sample_rate);
        let due = *self.next_due.get_or_insert_with(|| Instant::now() + block_period);
        tokio::select! {
            _ = abort.recv() => return Ok(None),
            _ = tokio::time::sleep_until(due) => {}
        }
        self.next_due = Some(due + block_period);

        let frame_period = Duration::from_secs_f64(1.0 / self.config.sample_rate);
        let first_frame = self.next_frame;
        self.next_frame += self.period as i64;
        let first_time = SystemTime::now() - block_period;

        let wave: Vec<u16> = (0..self.period as i64)
            .map(|i| self.value_at(first_frame + i))
            .collect();
        let segments = (0..self.config.nchan)
            .map(|_| DataSegment::new(wave.clone(), 1, first_frame, first_time, frame_period))
            .collect();
        Ok(Some(FrameBlock {
            bytes_read: self.config.nchan * self.period * 2,
            duration: block_period,
            segments,
        }))
    }
}
