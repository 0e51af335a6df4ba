use std::time::SystemTime;

use tokio::sync::mpsc;
use tracing::warn;

use crate::core::{DataRecord, DataSegment, DataStream, Dense, FrameIndex};
use crate::error::{Error, Result};
use crate::publish::DataPublisher;
use crate::triggering::{TriggerEngine, TriggerList, TriggerState};

/// Row/column position of a channel in the multiplexing geometry.
#[derive(Debug, Clone, Copy, Default)]
pub struct RowCol {
    pub row: usize,
    pub col: usize,
    pub nrows: usize,
    pub ncols: usize,
}

/// Per-channel worker state: the rolling stream, the trigger engine, the
/// publisher, and the optional projection model. One segment is processed at
/// a time under the channel's mutex; configuration calls take the same mutex
/// between segments.
pub struct ChannelProcessor {
    pub channel_index: usize,
    pub name: String,
    pub channel_number: usize,
    pub sample_rate: f64,
    pub row_col: RowCol,
    pub stream: DataStream,
    pub engine: TriggerEngine,
    pub publisher: DataPublisher,
    pub projectors: Option<Dense>,
    pub basis: Option<Dense>,
    pub model_description: String,
}

impl ChannelProcessor {
    pub fn new(
        channel_index: usize,
        name: String,
        channel_number: usize,
        sample_rate: f64,
        engine: TriggerEngine,
        publisher: DataPublisher,
    ) -> Self {
        let stream = DataStream::new(
            Vec::new(),
            1,
            0,
            SystemTime::UNIX_EPOCH,
            std::time::Duration::from_secs_f64(1.0 / sample_rate),
        );
        ChannelProcessor {
            channel_index,
            name,
            channel_number,
            sample_rate,
            row_col: RowCol::default(),
            stream,
            engine,
            publisher,
            projectors: None,
            basis: None,
            model_description: String::new(),
        }
    }

    pub fn configure_trigger(&mut self, state: TriggerState) {
        self.engine.state = state;
    }

    /// Changes the record geometry. Refused while file writers are attached:
    /// every record in a file must share one shape.
    pub fn configure_pulse_lengths(&mut self, nsamp: usize, npre: usize) -> Result<()> {
        if self.publisher.any_file_writer() {
            return Err(Error::config(
                "cannot change pulse lengths while writing files",
            ));
        }
        if nsamp < 1 || nsamp < npre + 1 {
            return Err(Error::config(format!(
                "invalid pulse lengths: nsamp={nsamp}, npre={npre}"
            )));
        }
        self.engine.n_samples = nsamp;
        self.engine.n_presamples = npre;
        Ok(())
    }

    /// Installs the projection model, checking its dimensions against the
    /// record length.
    pub fn set_projectors_basis(
        &mut self,
        projectors: Dense,
        basis: Dense,
        model_description: String,
    ) -> Result<()> {
        let nsamp = self.engine.n_samples;
        let nbases = projectors.rows();
        if projectors.cols() != nsamp {
            return Err(Error::config(format!(
                "projectors are {}x{}, want {} columns (the record length)",
                nbases,
                projectors.cols(),
                nsamp
            )));
        }
        if basis.rows() != nsamp || basis.cols() != nbases {
            return Err(Error::config(format!(
                "basis is {}x{}, want {}x{}",
                basis.rows(),
                basis.cols(),
                nsamp,
                nbases
            )));
        }
        self.projectors = Some(projectors);
        self.basis = Some(basis);
        self.model_description = model_description;
        Ok(())
    }

    pub fn has_projectors(&self) -> bool {
        self.projectors.is_some()
    }

    /// Handles one segment end to end: append, find primaries, trade them
    /// with the broker for secondaries, materialize and publish records,
    /// then trim the stream back to one pre-trigger window of history.
    ///
    /// Returns `Ok(None)` when the broker has wound down (clean end-of-run),
    /// otherwise the cumulative count of records written to file.
    pub async fn process_segment(
        &mut self,
        mut segment: DataSegment,
        primary_tx: &mpsc::Sender<TriggerList>,
        secondary_rx: &mut mpsc::Receiver<Vec<FrameIndex>>,
    ) -> Result<Option<usize>> {
        if segment.processed {
            return Err(Error::Source(format!(
                "channel {} segment processed twice",
                self.channel_index
            )));
        }
        segment.processed = true;
        self.stream.segment.signed = segment.signed;
        self.stream.segment.volts_per_arb = segment.volts_per_arb;
        self.engine.signed = segment.signed;
        self.stream.append_segment(&segment);

        let primaries = self.engine.search(&self.stream);
        let sent = primary_tx
            .send(TriggerList {
                channel_index: self.channel_index,
                frames: primaries.clone(),
            })
            .await;
        if sent.is_err() {
            return Ok(None);
        }
        let Some(secondaries) = secondary_rx.recv().await else {
            return Ok(None);
        };

        let primary_records = self.materialize(&primaries);
        // A secondary on a frame we already triggered on would duplicate the
        // primary record; the primary wins.
        let fresh: Vec<FrameIndex> = secondaries
            .into_iter()
            .filter(|f| !primaries.contains(f))
            .collect();
        let secondary_records = self.materialize(&fresh);

        self.publisher.publish(&primary_records, false)?;
        self.publisher.publish(&secondary_records, true)?;

        // Both lists arrive sorted; the veto window for the next segment
        // starts after the latest record emitted, whichever its origin.
        let last = primaries.last().copied().max(fresh.last().copied());
        if let Some(last) = last {
            self.engine.last_trigger = last;
        }
        let keep = self.engine.n_presamples;
        self.stream.trim_keeping(keep);
        Ok(Some(self.publisher.number_written()))
    }

    fn materialize(&self, frames: &[FrameIndex]) -> Vec<DataRecord> {
        let mut records = Vec::with_capacity(frames.len());
        for &frame in frames {
            if let Some(rec) = self.record_at(frame) {
                records.push(rec);
            }
        }
        records
    }

    /// Builds the record around one trigger frame, or nothing if the frame
    /// (with its pre-trigger padding) does not fit in the current stream.
    fn record_at(&self, frame: FrameIndex) -> Option<DataRecord> {
        let seg = &self.stream.segment;
        let nsamp = self.engine.n_samples;
        let npre = self.engine.n_presamples;
        let rel = (frame - seg.first_frame).div_euclid(seg.frames_per_sample);
        let start = rel - npre as i64;
        if start < 0 || start as usize + nsamp > seg.raw.len() {
            warn!(
                channel = self.channel_index,
                frame, "trigger record does not fit in stream, skipping"
            );
            return None;
        }
        let start = start as usize;
        let mut rec = DataRecord::new(
            self.channel_index,
            frame,
            self.stream.time_of(rel as usize),
            seg.raw[start..start + nsamp].to_vec(),
            seg.signed,
            npre,
            seg.volts_per_arb,
            (1.0 / self.sample_rate) as f32,
        );
        rec.summarize();
        if let (Some(p), Some(b)) = (&self.projectors, &self.basis) {
            rec.project(p, b);
        }
        Some(rec)
    }
}
