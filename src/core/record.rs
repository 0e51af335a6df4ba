use std::time::SystemTime;

use super::matrix::Dense;
use super::segment::{FrameIndex, RawSample};

/// A single triggered pulse record with its summary quantities.
#[derive(Debug, Clone)]
pub struct DataRecord {
    pub channel_index: usize,
    pub trig_frame: FrameIndex,
    pub trig_time: SystemTime,
    pub data: Vec<RawSample>,
    pub signed: bool,
    pub presamples: usize,
    pub volts_per_arb: f32,
    pub samp_period: f32,

    // Summary quantities, filled by `summarize`.
    pub pretrig_mean: f64,
    pub pulse_average: f64,
    pub pulse_rms: f64,
    pub peak_value: f64,

    // Model fit, filled by `project` when projectors are loaded.
    pub model_coefs: Vec<f64>,
    pub residual_std_dev: f64,
}

impl DataRecord {
    pub fn new(
        channel_index: usize,
        trig_frame: FrameIndex,
        trig_time: SystemTime,
        data: Vec<RawSample>,
        signed: bool,
        presamples: usize,
        volts_per_arb: f32,
        samp_period: f32,
    ) -> Self {
        DataRecord {
            channel_index,
            trig_frame,
            trig_time,
            data,
            signed,
            presamples,
            volts_per_arb,
            samp_period,
            pretrig_mean: 0.0,
            pulse_average: 0.0,
            pulse_rms: 0.0,
            peak_value: 0.0,
            model_coefs: Vec::new(),
            residual_std_dev: 0.0,
        }
    }

    fn value(&self, raw: RawSample) -> f64 {
        if self.signed {
            raw as i16 as f64
        } else {
            raw as f64
        }
    }

    /// Computes the pretrigger mean and the post-trigger summary statistics.
    pub fn summarize(&mut self) {
        let npre = self.presamples.min(self.data.len());
        if npre == 0 || self.data.len() <= npre {
            return;
        }
        self.pretrig_mean =
            self.data[..npre].iter().map(|&v| self.value(v)).sum::<f64>() / npre as f64;

        let post = &self.data[npre..];
        let n = post.len() as f64;
        let mut sum = 0.0;
        let mut sum_sq = 0.0;
        let mut max = f64::MIN;
        let mut min = f64::MAX;
        for &raw in post {
            let v = self.value(raw) - self.pretrig_mean;
            sum += v;
            sum_sq += v * v;
            max = max.max(v);
            min = min.min(v);
        }
        self.pulse_average = sum / n;
        self.pulse_rms = (sum_sq / n).sqrt();
        // Unsigned data pulses upward; signed channels can pulse either way,
        // so take the extreme of larger magnitude.
        self.peak_value = if self.signed && min.abs() > max.abs() {
            min
        } else {
            max
        };
    }

    /// Computes `coefs = projectors · (data − pretrigMean)` and the population
    /// standard deviation of the model residual. Call after `summarize`.
    pub fn project(&mut self, projectors: &Dense, basis: &Dense) {
        let x: Vec<f64> = self
            .data
            .iter()
            .map(|&v| self.value(v) - self.pretrig_mean)
            .collect();
        self.model_coefs = projectors.mul_vec(&x);
        let model = basis.mul_vec(&self.model_coefs);
        let n = x.len() as f64;
        let mut sum = 0.0;
        let mut sum_sq = 0.0;
        for (xi, mi) in x.iter().zip(&model) {
            let r = xi - mi;
            sum += r;
            sum_sq += r * r;
        }
        let mean = sum / n;
        self.residual_std_dev = (sum_sq / n - mean * mean).max(0.0).sqrt();
    }
}
