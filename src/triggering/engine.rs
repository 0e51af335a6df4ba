use crate::core::{DataStream, FrameIndex, RawSample, NO_TRIGGER_YET};

use super::state::TriggerState;

/// Trigger kinds in priority order; when two kinds claim the same frame the
/// lower value wins.
const PRIO_EDGE: u8 = 0;
const PRIO_LEVEL: u8 = 1;
const PRIO_AUTO: u8 = 2;
const PRIO_NOISE: u8 = 3;

/// Per-channel pulse detector. One `search` call per appended segment scans
/// the candidate range of the stream and returns the primary trigger frames,
/// already de-overlapped. The engine holds no reference to the stream; the
/// caller owns both and updates `last_trigger` once records are materialized.
#[derive(Debug, Clone)]
pub struct TriggerEngine {
    pub state: TriggerState,
    pub n_samples: usize,
    pub n_presamples: usize,
    pub sample_rate: f64,
    pub signed: bool,
    /// Frame of the channel's most recent emitted trigger, primary or
    /// inherited, `NO_TRIGGER_YET` before any.
    pub last_trigger: FrameIndex,
}

impl TriggerEngine {
    pub fn new(n_samples: usize, n_presamples: usize, sample_rate: f64) -> Self {
        TriggerEngine {
            state: TriggerState::default(),
            n_samples,
            n_presamples,
            sample_rate,
            signed: false,
            last_trigger: NO_TRIGGER_YET,
        }
    }

    fn value(&self, raw: RawSample) -> i32 {
        if self.signed {
            raw as i16 as i32
        } else {
            raw as i32
        }
    }

    fn delay_samples(&self, delay: std::time::Duration) -> i64 {
        ((delay.as_secs_f64() * self.sample_rate + 0.5) as i64).max(1)
    }

    fn edge_condition(&self, raw: &[RawSample], i: usize) -> bool {
        let diff = self.value(raw[i]) - self.value(raw[i - 1]);
        if self.state.edge_rising {
            diff > self.state.edge_level
        } else {
            -diff > self.state.edge_level
        }
    }

    fn level_condition(&self, raw: &[RawSample], i: usize) -> bool {
        let prev = self.value(raw[i - 1]);
        let cur = self.value(raw[i]);
        let level = self.state.level_level;
        if self.state.level_rising {
            cur >= level && prev < level
        } else {
            cur <= level && prev > level
        }
    }

    /// Finds all primary triggers in the stream's candidate range
    /// `[npre, len − (nsamp − npre)]` (sample indices). Returns absolute
    /// frame indices, sorted, with the no-overlap veto applied.
    pub fn search(&self, stream: &DataStream) -> Vec<FrameIndex> {
        let raw = &stream.segment.raw;
        let nsamp = self.n_samples as i64;
        let npre = self.n_presamples as i64;
        let len = raw.len() as i64;
        // Edge and level both look one sample back.
        let first_usable = npre.max(1);
        let last_usable = len - (nsamp - npre);
        if last_usable < first_usable {
            return Vec::new();
        }

        let fps = stream.segment.frames_per_sample;
        let first_frame = stream.segment.first_frame;
        // The previous trigger's position in this stream's sample indexing.
        let rel_last = (self.last_trigger - first_frame).div_euclid(fps);

        let mut found: Vec<(i64, u8)> = Vec::new();

        if self.state.edge_trigger {
            let mut i = first_usable;
            while i <= last_usable {
                if self.edge_condition(raw, i as usize) {
                    found.push((i, PRIO_EDGE));
                    i += nsamp + 1;
                } else {
                    i += 1;
                }
            }
        }

        if self.state.level_trigger {
            let mut veto = VetoWalk::new(&found);
            let mut fresh = Vec::new();
            let mut i = first_usable;
            while i <= last_usable {
                // Skip past any already-found trigger whose record this
                // candidate would invade.
                if let Some(jump) = veto.conflict(i, nsamp) {
                    i = jump;
                    if i > last_usable {
                        break;
                    }
                }
                if self.level_condition(raw, i as usize) {
                    fresh.push((i, PRIO_LEVEL));
                }
                i += 1;
            }
            found.extend(fresh);
        }

        if self.state.auto_trigger {
            let delay = self.delay_samples(self.state.auto_delay);
            let mut veto = VetoWalk::new(&found);
            let mut fresh = Vec::new();
            let mut candidate = (rel_last + delay).max(npre);
            while candidate <= last_usable {
                if candidate + nsamp <= veto.next() {
                    fresh.push((candidate, PRIO_AUTO));
                    candidate += delay;
                } else {
                    candidate = veto.advance() + delay;
                }
            }
            found.extend(fresh);
        }

        if self.state.noise_trigger {
            let delay = self.delay_samples(self.state.noise_delay);
            let mut veto = VetoWalk::new(&found);
            let mut fresh = Vec::new();
            let mut candidate = (rel_last + delay).max(first_usable);
            while candidate <= last_usable {
                if candidate + nsamp <= veto.next() {
                    // Only baseline qualifies: reject any sample where the
                    // configured edge or level condition would fire.
                    if self.edge_condition(raw, candidate as usize)
                        || self.level_condition(raw, candidate as usize)
                    {
                        candidate += 1;
                    } else {
                        fresh.push((candidate, PRIO_NOISE));
                        candidate += delay;
                    }
                } else {
                    candidate = veto.advance() + delay;
                }
            }
            found.extend(fresh);
        }

        // Merge all kinds: ascending frame, category priority breaking ties,
        // then enforce the record-overlap veto left to right.
        found.sort_unstable();
        let min_gap = nsamp - npre;
        let mut frames: Vec<FrameIndex> = Vec::with_capacity(found.len());
        let mut last_kept: Option<i64> = None;
        for &(i, _prio) in &found {
            if let Some(prev) = last_kept {
                if i - prev < min_gap {
                    continue;
                }
            }
            frames.push(first_frame + i * fps);
            last_kept = Some(i);
        }
        frames
    }
}

/// Walks a sorted list of already-found trigger positions, letting later
/// search stages skip candidates that would invade an earlier stage's record.
struct VetoWalk {
    positions: Vec<i64>,
    idx: usize,
}

impl VetoWalk {
    fn new(found: &[(i64, u8)]) -> Self {
        let mut positions: Vec<i64> = found.iter().map(|&(i, _)| i).collect();
        positions.sort_unstable();
        VetoWalk { positions, idx: 0 }
    }

    fn next(&self) -> i64 {
        self.positions.get(self.idx).copied().unwrap_or(i64::MAX)
    }

    /// Consumes the current position, returning it.
    fn advance(&mut self) -> i64 {
        let pos = self.next();
        self.idx += 1;
        pos
    }

    /// If `candidate + nsamp` would reach into the record at the next found
    /// position, returns the index just past that record.
    fn conflict(&mut self, candidate: i64, nsamp: i64) -> Option<i64> {
        if candidate + nsamp > self.next() {
            let jump = self.advance() + nsamp;
            Some(jump)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};

    fn stream_with_step(len: usize, at: usize, value: u16) -> DataStream {
        let mut raw = vec![0u16; len];
        for v in raw.iter_mut().skip(at) {
            *v = value;
        }
        DataStream::new(raw, 1, 0, SystemTime::UNIX_EPOCH, Duration::from_micros(100))
    }

    fn engine(nsamp: usize, npre: usize) -> TriggerEngine {
        TriggerEngine::new(nsamp, npre, 10_000.0)
    }

    #[test]
    fn edge_fires_once_per_step() {
        let mut eng = engine(1000, 100);
        eng.state.edge_trigger = true;
        eng.state.edge_level = 100;
        let stream = stream_with_step(10_000, 1000, 8000);
        assert_eq!(eng.search(&stream), vec![1000]);
    }

    #[test]
    fn edge_rising_false_selects_falling_edges() {
        let mut eng = engine(100, 20);
        eng.state.edge_trigger = true;
        eng.state.edge_rising = false;
        eng.state.edge_level = 100;
        let mut raw = vec![5000u16; 1000];
        for v in raw.iter_mut().skip(400) {
            *v = 100;
        }
        let stream =
            DataStream::new(raw, 1, 0, SystemTime::UNIX_EPOCH, Duration::from_micros(100));
        assert_eq!(eng.search(&stream), vec![400]);
    }

    #[test]
    fn auto_anchors_at_first_usable_without_history() {
        let mut eng = engine(1000, 100);
        eng.state.auto_trigger = true;
        eng.state.auto_delay = Duration::from_millis(500);
        let stream = stream_with_step(10_000, 10_000, 0);
        assert_eq!(eng.search(&stream), vec![100, 5100]);
    }

    #[test]
    fn auto_respects_last_trigger_across_segments() {
        let mut eng = engine(1000, 100);
        eng.state.auto_trigger = true;
        eng.state.auto_delay = Duration::from_millis(500);
        eng.last_trigger = 5100;
        let mut stream = stream_with_step(10_000, 10_000, 0);
        stream.segment.first_frame = 10_000;
        // Next auto trigger is 5000 frames past the last one.
        assert_eq!(eng.search(&stream), vec![10_100, 15_100]);
    }

    #[test]
    fn noise_skips_active_samples() {
        let mut eng = engine(100, 20);
        eng.state.noise_trigger = true;
        eng.state.noise_delay = Duration::from_millis(20); // 200 samples
        eng.state.edge_level = 50;
        let mut raw = vec![0u16; 1000];
        // A step the (disabled) edge condition matches at 220; the quiet
        // check must push the trigger one sample past it.
        for v in raw.iter_mut().skip(220) {
            *v = 1000;
        }
        let stream =
            DataStream::new(raw, 1, 0, SystemTime::UNIX_EPOCH, Duration::from_micros(100));
        assert_eq!(eng.search(&stream), vec![20, 221, 421, 621, 821]);
    }
}
