use std::time::{Duration, SystemTime};

/// One raw detector sample. Interpretation as signed is a per-channel policy
/// applied at analysis and publication time.
pub type RawSample = u16;

/// Counts sampling instants since the source started. Signed so that trigger
/// arithmetic can reach before the start of the run.
pub type FrameIndex = i64;

/// Sentinel for "no trigger yet": far in the past, but still safe to add
/// delay offsets to without overflow.
pub const NO_TRIGGER_YET: FrameIndex = i64::MIN / 4;

/// A contiguous single-channel run of raw samples, plus the indexing needed
/// to place it in absolute frame and wall-clock time. Immutable once built;
/// consumed exactly once by its channel's processor.
#[derive(Debug, Clone)]
pub struct DataSegment {
    pub raw: Vec<RawSample>,
    pub signed: bool,
    /// Normally 1; larger when the source decimates.
    pub frames_per_sample: i64,
    pub first_frame: FrameIndex,
    pub first_time: SystemTime,
    pub frame_period: Duration,
    pub volts_per_arb: f32,
    pub processed: bool,
}

impl DataSegment {
    pub fn new(
        raw: Vec<RawSample>,
        frames_per_sample: i64,
        first_frame: FrameIndex,
        first_time: SystemTime,
        frame_period: Duration,
    ) -> Self {
        DataSegment {
            raw,
            signed: false,
            frames_per_sample,
            first_frame,
            first_time,
            frame_period,
            volts_per_arb: 1.0 / 65535.0,
            processed: false,
        }
    }

    /// Absolute wall-clock time of sample number `sample_num` in the segment.
    pub fn time_of(&self, sample_num: usize) -> SystemTime {
        self.first_time + mul_period(self.frame_period, sample_num as i64 * self.frames_per_sample)
    }
}

/// A rolling view of one channel's sample stream. Only a finite tail is held
/// at any moment; `samples_seen` counts the lifetime total.
#[derive(Debug, Clone)]
pub struct DataStream {
    pub segment: DataSegment,
    pub samples_seen: usize,
}

impl DataStream {
    pub fn new(
        raw: Vec<RawSample>,
        frames_per_sample: i64,
        first_frame: FrameIndex,
        first_time: SystemTime,
        frame_period: Duration,
    ) -> Self {
        let samples_seen = raw.len();
        DataStream {
            segment: DataSegment::new(raw, frames_per_sample, first_frame, first_time, frame_period),
            samples_seen,
        }
    }

    pub fn len(&self) -> usize {
        self.segment.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segment.raw.is_empty()
    }

    /// Appends a segment, adopting its frame indexing: the stream's counters
    /// are rebased so the appended data keeps the frame numbers the source
    /// declared for it, whatever the stream held before.
    pub fn append_segment(&mut self, seg: &DataSegment) {
        let frames_in_stream = self.segment.raw.len() as i64 * seg.frames_per_sample;
        let time_in_stream = mul_period(self.segment.frame_period, frames_in_stream);
        self.segment.frames_per_sample = seg.frames_per_sample;
        self.segment.frame_period = seg.frame_period;
        self.segment.first_frame = seg.first_frame - frames_in_stream;
        self.segment.first_time = seg.first_time - time_in_stream;
        self.segment.raw.extend_from_slice(&seg.raw);
        self.samples_seen += seg.raw.len();
    }

    /// Discards all but the trailing `n` samples, advancing `first_frame` and
    /// `first_time` past the discarded span. Returns the resulting length.
    pub fn trim_keeping(&mut self, n: usize) -> usize {
        let len = self.segment.raw.len();
        if n >= len {
            return len;
        }
        self.segment.raw.copy_within(len - n..len, 0);
        self.segment.raw.truncate(n);
        let delta_frames = (len - n) as i64 * self.segment.frames_per_sample;
        self.segment.first_frame += delta_frames;
        self.segment.first_time += mul_period(self.segment.frame_period, delta_frames);
        n
    }

    pub fn time_of(&self, sample_num: usize) -> SystemTime {
        self.segment.time_of(sample_num)
    }
}

fn mul_period(period: Duration, frames: i64) -> Duration {
    debug_assert!(frames >= 0);
    Duration::from_nanos((period.as_nanos() as i64 * frames) as u64)
}

/// The product of one source read: one equal-length segment per channel,
/// plus the totals the heartbeat reports.
#[derive(Debug)]
pub struct FrameBlock {
    pub segments: Vec<DataSegment>,
    pub bytes_read: usize,
    pub duration: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream_of(n: usize, first_frame: FrameIndex) -> DataStream {
        let raw: Vec<RawSample> = (0..n as u16).collect();
        DataStream::new(
            raw,
            1,
            first_frame,
            SystemTime::UNIX_EPOCH,
            Duration::from_micros(100),
        )
    }

    #[test]
    fn append_preserves_final_frame_index() {
        let mut stream = stream_of(40, 0);
        let last_before = stream.segment.first_frame + stream.len() as i64 - 1;
        assert_eq!(last_before, 39);

        let seg = DataSegment::new(
            vec![7; 60],
            1,
            40,
            SystemTime::UNIX_EPOCH + Duration::from_millis(4),
            Duration::from_micros(100),
        );
        stream.append_segment(&seg);

        // The appended data keeps its declared indexing...
        let last_after = stream.segment.first_frame + stream.len() as i64 - 1;
        assert_eq!(last_after, seg.first_frame + seg.raw.len() as i64 - 1);
        // ...and the stream rebased its own head to stay consistent.
        assert_eq!(stream.segment.first_frame, 0);
        assert_eq!(stream.samples_seen, 100);
    }

    #[test]
    fn trim_rebases_and_is_idempotent() {
        let mut stream = stream_of(100, 1000);
        assert_eq!(stream.trim_keeping(30), 30);
        assert_eq!(stream.segment.first_frame, 1070);
        assert_eq!(&stream.segment.raw[..3], &[70, 71, 72]);
        let t1 = stream.segment.first_time;

        // Applying twice equals applying once.
        assert_eq!(stream.trim_keeping(30), 30);
        assert_eq!(stream.segment.first_frame, 1070);
        assert_eq!(stream.segment.first_time, t1);
        assert_eq!(stream.samples_seen, 100);
    }

    #[test]
    fn trim_larger_than_stream_is_noop() {
        let mut stream = stream_of(20, 5);
        assert_eq!(stream.trim_keeping(50), 20);
        assert_eq!(stream.segment.first_frame, 5);
    }

    #[test]
    fn time_of_scales_with_decimation() {
        let seg = DataSegment::new(
            vec![0; 10],
            4,
            0,
            SystemTime::UNIX_EPOCH,
            Duration::from_micros(10),
        );
        assert_eq!(
            seg.time_of(3),
            SystemTime::UNIX_EPOCH + Duration::from_micros(120)
        );
    }
}
