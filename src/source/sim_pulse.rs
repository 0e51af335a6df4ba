use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::core::{DataSegment, FrameBlock, FrameIndex};
use crate::error::{Error, Result};

use super::{DataSource, SourceTraits};

/// Configuration for the simulated pulse source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SimPulseConfig {
    pub nchan: usize,
    pub sample_rate: f64,
    pub pedestal: f64,
    pub amplitude: f64,
    /// Frames per generated block; each block carries one pulse.
    pub nsamp: usize,
}

/// Produces double-exponential pulses on a noisy pedestal, paced to
/// wall-clock time. Every channel sees the same pulse shape with
/// independent noise.
pub struct SimPulseSource {
    config: SimPulseConfig,
    shape: Vec<f64>,
    noise_sigma: f64,
    next_frame: FrameIndex,
    next_due: Option<Instant>,
    rng: StdRng,
}

impl SimPulseSource {
    pub fn new(config: SimPulseConfig) -> Result<Self> {
        if config.nchan < 1 {
            return Err(Error::config("SimPulse needs at least one channel"));
        }
        if !(config.sample_rate > 0.0) {
            return Err(Error::config("SimPulse sample rate must be positive"));
        }
        if config.nsamp < 16 {
            return Err(Error::config("SimPulse block size must be at least 16"));
        }

        // One pulse per block, rising a quarter of the way in. Two decay
        // constants give the usual fast-rise/slow-fall calorimeter shape,
        // rescaled so the peak equals the configured amplitude.
        let start = config.nsamp / 4;
        let tau_fall = config.nsamp as f64 / 10.0;
        let tau_rise = config.nsamp as f64 / 50.0;
        let mut shape = vec![0.0; config.nsamp];
        let mut peak = 0.0f64;
        for (i, v) in shape.iter_mut().enumerate().skip(start) {
            let x = (i - start) as f64;
            *v = (-x / tau_fall).exp() - (-x / tau_rise).exp();
            peak = peak.max(*v);
        }
        if peak > 0.0 {
            for v in shape.iter_mut() {
                *v *= config.amplitude / peak;
            }
        }
        let noise_sigma = (config.amplitude / 500.0).max(0.5);

        Ok(SimPulseSource {
            config,
            shape,
            noise_sigma,
            next_frame: 0,
            next_due: None,
            rng: StdRng::seed_from_u64(0x7e5da9),
        })
    }
}

#[async_trait]
impl DataSource for SimPulseSource {
    fn source_name(&self) -> &'static str {
        "SimPulses"
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
        let block_period = Duration::from_secs_f64(self.config.nsamp as f64 / self.config.sample_rate);
        let due = *self.next_due.get_or_insert_with(|| Instant::now() + block_period);
        tokio::select! {
            _ = abort.recv() => return Ok(None),
            _ = tokio::time::sleep_until(due) => {}
        }
        self.next_due = Some(due + block_period);

        let frame_period = Duration::from_secs_f64(1.0 / self.config.sample_rate);
        let first_frame = self.next_frame;
        self.next_frame += self.config.nsamp as i64;
        let first_time = SystemTime::now() - block_period;
        let noise = Normal::new(0.0, self.noise_sigma)
            .map_err(|e| Error::Source(format!("bad noise distribution: {e}")))?;

        let mut segments = Vec::with_capacity(self.config.nchan);
        for _ in 0..self.config.nchan {
            let raw: Vec<u16> = self
                .shape
                .iter()
                .map(|&s| {
                    let v = self.config.pedestal + s + noise.sample(&mut self.rng);
                    v.clamp(0.0, 65535.0) as u16
                })
                .collect();
            segments.push(DataSegment::new(raw, 1, first_frame, first_time, frame_period));
        }
        Ok(Some(FrameBlock {
            bytes_read: self.config.nchan * self.config.nsamp * 2,
            duration: block_period,
            segments,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shape_peaks_at_amplitude() {
        let src = SimPulseSource::new(SimPulseConfig {
            nchan: 1,
            sample_rate: 10_000.0,
            pedestal: 1000.0,
            amplitude: 8000.0,
            nsamp: 1000,
        })
        .unwrap();
        let peak = src.shape.iter().cloned().fold(0.0f64, f64::max);
        assert!((peak - 8000.0).abs() < 1e-9);
        // Nothing before the pulse start.
        assert_eq!(src.shape[0], 0.0);
    }

    #[tokio::test]
    async fn read_produces_one_segment_per_channel() {
        let mut src = SimPulseSource::new(SimPulseConfig {
            nchan: 3,
            sample_rate: 100_000.0,
            pedestal: 1000.0,
            amplitude: 5000.0,
            nsamp: 100,
        })
        .unwrap();
        let (_abort_tx, mut abort) = broadcast::channel(1);
        let block = src.blocking_read(&mut abort).await.unwrap().unwrap();
        assert_eq!(block.segments.len(), 3);
        assert_eq!(block.segments[0].raw.len(), 100);
        assert_eq!(block.segments[1].first_frame, 0);

        let block2 = src.blocking_read(&mut abort).await.unwrap().unwrap();
        assert_eq!(block2.segments[0].first_frame, 100);
    }

    #[tokio::test]
    async fn abort_ends_the_stream() {
        let mut src = SimPulseSource::new(SimPulseConfig {
            nchan: 1,
            sample_rate: 10.0, // one block takes many seconds
            pedestal: 0.0,
            amplitude: 100.0,
            nsamp: 100,
        })
        .unwrap();
        let (abort_tx, mut abort) = broadcast::channel(1);
        abort_tx.send(()).unwrap();
        assert!(src.blocking_read(&mut abort).await.unwrap().is_none());
    }

    #[test]
    fn zero_channels_rejected() {
        let bad = SimPulseConfig {
            nchan: 0,
            sample_rate: 1000.0,
            pedestal: 0.0,
            amplitude: 1.0,
            nsamp: 100,
        };
        assert!(SimPulseSource::new(bad).is_err());
    }
}
