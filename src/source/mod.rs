pub mod erroring;
pub mod sim_pulse;
pub mod triangle;

use std::collections::HashMap;
use std::io::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::{Mutex as PlMutex, RwLock};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tracing::{error, info};

use crate::channel::{ChannelProcessor, RowCol};
use crate::core::{Dense, FrameBlock};
use crate::error::{Error, Result};
use crate::publish::{ClientUpdate, DataPublisher, Heartbeat, PublisherQueues};
use crate::triggering::{FullTriggerState, TriggerBroker, TriggerEngine, TriggerState};
use crate::writing::{
    make_directory, Ljh3Writer, LjhWriter, OffWriter, WriteControlConfig, WriteRequest,
    WritingState, WritingStateSnapshot,
};

pub use erroring::ErroringSource;
pub use sim_pulse::{SimPulseConfig, SimPulseSource};
pub use triangle::{TriangleConfig, TriangleSource};

/// Record geometry before the first ConfigurePulseLengths call.
pub const DEFAULT_NSAMPLES: usize = 1024;
pub const DEFAULT_NPRESAMPLES: usize = 256;

/// Everything `sample()` must discover before a run can be prepared.
#[derive(Debug, Clone)]
pub struct SourceTraits {
    pub nchan: usize,
    pub sample_rate: f64,
    pub frames_per_sample: i64,
    pub signed: Vec<bool>,
    pub volts_per_arb: Vec<f32>,
    pub channel_names: Vec<String>,
    pub channel_numbers: Vec<usize>,
    pub row_col: Vec<RowCol>,
}

impl SourceTraits {
    pub fn with_defaults(nchan: usize, sample_rate: f64) -> Self {
        SourceTraits {
            nchan,
            sample_rate,
            frames_per_sample: 1,
            signed: vec![false; nchan],
            volts_per_arb: vec![1.0 / 65535.0; nchan],
            channel_names: (0..nchan).map(|i| format!("chan{i}")).collect(),
            channel_numbers: (0..nchan).collect(),
            row_col: vec![RowCol::default(); nchan],
        }
    }
}

/// A hardware or simulated producer of interleaved raw data. The shared
/// lifecycle drives it: `sample` to learn the channel layout, `start_run` to
/// begin streaming, then `blocking_read` until it returns `Ok(None)`
/// (end-of-stream). A read must observe the abort signal promptly; after
/// abort the next read returns end-of-stream.
#[async_trait]
pub trait DataSource: Send {
    fn source_name(&self) -> &'static str;

    async fn sample(&mut self) -> Result<SourceTraits>;

    fn start_run(&mut self) -> Result<()> {
        Ok(())
    }

    async fn blocking_read(
        &mut self,
        abort: &mut broadcast::Receiver<()>,
    ) -> Result<Option<FrameBlock>>;
}

/// Shared plumbing each run publishes into, owned by the control service.
#[derive(Clone)]
pub struct SourceContext {
    pub queues: PublisherQueues,
    pub updates: mpsc::UnboundedSender<ClientUpdate>,
    pub heartbeats: mpsc::Sender<Heartbeat>,
}

struct WorkerAck {
    channel: usize,
    result: std::result::Result<usize, String>,
}

#[derive(Serialize)]
struct NumberWrittenUpdate {
    #[serde(rename = "NumberWritten")]
    number_written: Vec<usize>,
}

/// Handle to a live acquisition: the per-channel processors, the group
/// trigger broker, the writing state, and the run's abort plumbing. Dropped
/// (after `stop` + `wait`) when the source goes back to idle.
pub struct RunningSource {
    pub source_name: &'static str,
    nchan: usize,
    sample_rate: f64,
    frames_per_sample: i64,
    channel_names: Vec<String>,
    row_col: Vec<RowCol>,
    processors: Vec<Arc<Mutex<ChannelProcessor>>>,
    broker: Arc<TriggerBroker>,
    writing: Arc<PlMutex<WritingState>>,
    writing_snapshot: Arc<RwLock<WritingStateSnapshot>>,
    abort_tx: broadcast::Sender<()>,
    running: Arc<AtomicBool>,
    done_rx: watch::Receiver<bool>,
}

/// Starts `source`: Sample, PrepareRun, StartRun, then the read loop. The
/// returned handle is the only way to reconfigure or stop the run.
pub async fn start(mut source: Box<dyn DataSource>, ctx: &SourceContext) -> Result<RunningSource> {
    let traits = source.sample().await?;
    if traits.nchan == 0 {
        return Err(Error::config("source reports zero channels"));
    }
    let nchan = traits.nchan;
    let source_name = source.source_name();
    info!(source = source_name, nchan, "starting data source");

    // PrepareRun: broker, processors, and the channel plumbing.
    let (abort_tx, _) = broadcast::channel(4);
    let broker = Arc::new(TriggerBroker::new(nchan));
    let (primary_tx, primary_rx) = mpsc::channel(nchan.max(1));
    let (done_tx, mut done_rx_acks) = mpsc::channel::<WorkerAck>(nchan.max(1));
    let mut seg_txs = Vec::with_capacity(nchan);
    let mut secondary_txs = Vec::with_capacity(nchan);
    let mut processors = Vec::with_capacity(nchan);

    for index in 0..nchan {
        let mut engine =
            TriggerEngine::new(DEFAULT_NSAMPLES, DEFAULT_NPRESAMPLES, traits.sample_rate);
        engine.signed = traits.signed[index];
        let publisher = DataPublisher::new(index, ctx.queues.clone());
        let mut dsp = ChannelProcessor::new(
            index,
            traits.channel_names[index].clone(),
            traits.channel_numbers[index],
            traits.sample_rate,
            engine,
            publisher,
        );
        dsp.row_col = traits.row_col[index];
        processors.push(Arc::new(Mutex::new(dsp)));
    }

    for (index, dsp) in processors.iter().enumerate() {
        let (seg_tx, mut seg_rx) = mpsc::channel::<crate::core::DataSegment>(4);
        let (secondary_tx, mut secondary_rx) = mpsc::channel::<Vec<crate::core::FrameIndex>>(4);
        seg_txs.push(seg_tx);
        secondary_txs.push(secondary_tx);

        let dsp = Arc::clone(dsp);
        let primary_tx = primary_tx.clone();
        let done_tx = done_tx.clone();
        tokio::spawn(async move {
            while let Some(segment) = seg_rx.recv().await {
                let mut dsp = dsp.lock().await;
                match dsp
                    .process_segment(segment, &primary_tx, &mut secondary_rx)
                    .await
                {
                    Ok(Some(number_written)) => {
                        let ack = WorkerAck {
                            channel: index,
                            result: Ok(number_written),
                        };
                        if done_tx.send(ack).await.is_err() {
                            return;
                        }
                    }
                    Ok(None) => return, // broker wound down
                    Err(e) => {
                        let ack = WorkerAck {
                            channel: index,
                            result: Err(e.to_string()),
                        };
                        let _ = done_tx.send(ack).await;
                        return;
                    }
                }
            }
        });
    }
    drop(primary_tx);
    drop(done_tx);

    {
        let broker = Arc::clone(&broker);
        let abort_rx = abort_tx.subscribe();
        tokio::spawn(async move {
            broker.run(primary_rx, secondary_txs, abort_rx).await;
        });
    }

    source.start_run()?;

    let writing = Arc::new(PlMutex::new(WritingState::default()));
    let writing_snapshot = Arc::new(RwLock::new(WritingStateSnapshot::default()));
    let running = Arc::new(AtomicBool::new(true));
    let (done_tx_watch, done_rx) = watch::channel(false);

    // The read loop: one blockingRead per cycle, dispatch a segment to every
    // channel, then wait for all of them at the barrier before reading again.
    {
        let running = Arc::clone(&running);
        let abort_tx = abort_tx.clone();
        let mut abort_rx = abort_tx.subscribe();
        let writing_snapshot = Arc::clone(&writing_snapshot);
        let updates = ctx.updates.clone();
        let heartbeats = ctx.heartbeats.clone();
        tokio::spawn(async move {
            let mut last_number_report = Instant::now();
            loop {
                let block = match source.blocking_read(&mut abort_rx).await {
                    Ok(Some(block)) => block,
                    Ok(None) => break,
                    Err(e) => {
                        error!(source = source_name, "read failed, stopping source: {e}");
                        running.store(false, Ordering::SeqCst);
                        let _ = abort_tx.send(());
                        continue; // the next read observes abort and ends the stream
                    }
                };
                let _ = heartbeats
                    .send(Heartbeat {
                        running: true,
                        time: block.duration.as_secs_f64(),
                        data_mb: block.bytes_read as f64 / 1e6,
                    })
                    .await;

                let mut dispatched = 0usize;
                for (tx, segment) in seg_txs.iter().zip(block.segments) {
                    if tx.send(segment).await.is_err() {
                        break;
                    }
                    dispatched += 1;
                }
                let mut number_written = vec![0usize; nchan];
                let mut failed = false;
                for _ in 0..dispatched {
                    match done_rx_acks.recv().await {
                        Some(WorkerAck {
                            channel,
                            result: Ok(n),
                        }) => number_written[channel] = n,
                        Some(WorkerAck {
                            channel,
                            result: Err(e),
                        }) => {
                            error!(channel, "segment processing failed: {e}");
                            failed = true;
                        }
                        None => {
                            failed = true;
                            break;
                        }
                    }
                }
                if failed || dispatched < nchan {
                    running.store(false, Ordering::SeqCst);
                    let _ = abort_tx.send(());
                    continue;
                }

                let snapshot = writing_snapshot.read().clone();
                if snapshot.active
                    && !snapshot.paused
                    && last_number_report.elapsed().as_secs() >= 1
                {
                    last_number_report = Instant::now();
                    let _ = updates.send(ClientUpdate::new(
                        "NUMBERWRITTEN",
                        &NumberWrittenUpdate { number_written },
                    ));
                }
            }
            running.store(false, Ordering::SeqCst);
            info!(source = source_name, "read loop finished");
            let _ = done_tx_watch.send(true);
            // seg_txs drop here; workers drain, the broker's ingest closes,
            // and the whole pipeline unwinds.
        });
    }

    Ok(RunningSource {
        source_name,
        nchan,
        sample_rate: traits.sample_rate,
        frames_per_sample: traits.frames_per_sample,
        channel_names: traits.channel_names,
        row_col: traits.row_col,
        processors,
        broker,
        writing,
        writing_snapshot,
        abort_tx,
        running,
        done_rx,
    })
}

impl RunningSource {
    pub fn nchan(&self) -> usize {
        self.nchan
    }

    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    pub fn channel_names(&self) -> &[String] {
        &self.channel_names
    }

    pub fn broker(&self) -> &TriggerBroker {
        &self.broker
    }

    pub fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Requests a stop; the read loop unwinds asynchronously. Use `wait` to
    /// block until it has.
    pub fn stop(&self) -> Result<()> {
        if !self.running() {
            return Err(Error::config("source not running, cannot stop"));
        }
        self.running.store(false, Ordering::SeqCst);
        let _ = self.abort_tx.send(());
        Ok(())
    }

    /// Resolves when the read loop has terminated.
    pub async fn wait(&self) {
        let mut done = self.done_signal();
        while !*done.borrow() {
            if done.changed().await.is_err() {
                return;
            }
        }
    }

    /// A watch on read-loop termination, for waiting without holding any
    /// lock that covers this handle.
    pub fn done_signal(&self) -> watch::Receiver<bool> {
        self.done_rx.clone()
    }

    pub fn writing_snapshot(&self) -> WritingStateSnapshot {
        self.writing_snapshot.read().clone()
    }

    /// Applies one trigger state to each listed channel.
    pub async fn change_trigger_state(&self, state: &FullTriggerState) -> Result<()> {
        if state.channel_indices.is_empty() {
            return Err(Error::config("trigger change lists no channels"));
        }
        for &index in &state.channel_indices {
            if index >= self.nchan {
                return Err(Error::ChannelIndex {
                    index,
                    nchan: self.nchan,
                });
            }
        }
        for &index in &state.channel_indices {
            let mut dsp = self.processors[index].lock().await;
            dsp.configure_trigger(state.trigger_state);
        }
        Ok(())
    }

    /// Gathers channels sharing identical trigger state, via per-channel
    /// snapshot copies rather than holding every lock at once.
    pub async fn compute_full_trigger_state(&self) -> Vec<FullTriggerState> {
        let mut groups: HashMap<TriggerState, Vec<usize>> = HashMap::new();
        for (index, proc_) in self.processors.iter().enumerate() {
            let state = proc_.lock().await.engine.state;
            groups.entry(state).or_default().push(index);
        }
        let mut out: Vec<FullTriggerState> = groups
            .into_iter()
            .map(|(trigger_state, channel_indices)| FullTriggerState {
                channel_indices,
                trigger_state,
            })
            .collect();
        out.sort_by_key(|fts| fts.channel_indices[0]);
        out
    }

    pub async fn configure_pulse_lengths(&self, nsamp: usize, npre: usize) -> Result<()> {
        if nsamp < 1 || nsamp < npre + 1 {
            return Err(Error::config(format!(
                "invalid pulse lengths: nsamp={nsamp}, npre={npre}"
            )));
        }
        for proc_ in &self.processors {
            let mut dsp = proc_.lock().await;
            dsp.configure_pulse_lengths(nsamp, npre)?;
        }
        Ok(())
    }

    pub async fn configure_projectors_basis(
        &self,
        index: usize,
        projectors: Dense,
        basis: Dense,
        model_description: String,
    ) -> Result<()> {
        let Some(proc_) = self.processors.get(index) else {
            return Err(Error::ChannelIndex {
                index,
                nchan: self.nchan,
            });
        };
        let mut dsp = proc_.lock().await;
        dsp.set_projectors_basis(projectors, basis, model_description)
    }

    pub async fn channels_with_projectors(&self) -> Vec<usize> {
        let mut out = Vec::new();
        for (index, proc_) in self.processors.iter().enumerate() {
            if proc_.lock().await.has_projectors() {
                out.push(index);
            }
        }
        out
    }

    /// Mix fractions require feedback/error channel pairs from the TDM
    /// hardware; no such source is compiled in.
    pub fn configure_mix_fraction(&self, _index: usize, _fraction: f64) -> Result<()> {
        Err(Error::config(format!(
            "source type {} does not support mix",
            self.source_name
        )))
    }

    /// FB/error coupling likewise only exists on TDM hardware sources.
    pub fn set_coupling(&self) -> Result<()> {
        Err(Error::config(
            "generic data sources do not support FB/error coupling",
        ))
    }

    pub fn set_experiment_state_label(&self, label: &str) -> Result<()> {
        let mut ws = self.writing.lock();
        ws.set_experiment_state_label(label)?;
        *self.writing_snapshot.write() = ws.snapshot();
        Ok(())
    }

    /// Writes `comment.txt` beside the run files, newline-terminated. A
    /// no-op unless writing is active.
    pub fn write_comment(&self, comment: &str) -> Result<()> {
        if comment.is_empty() {
            return Ok(());
        }
        let ws = self.writing.lock();
        if !ws.active {
            return Ok(());
        }
        let Some(pattern) = ws.pattern.as_ref() else {
            return Ok(());
        };
        let path = pattern.directory().join("comment.txt");
        let mut file = std::fs::File::create(path)?;
        file.write_all(comment.as_bytes())?;
        if !comment.ends_with('\n') {
            file.write_all(b"\n")?;
        }
        Ok(())
    }

    /// The writing state machine: START/STOP/PAUSE/UNPAUSE. All validation
    /// happens before any mutation; channel writer handles are swapped under
    /// every channel's own mutex, in channel order.
    pub async fn write_control(&self, config: &WriteControlConfig) -> Result<()> {
        let request = WriteRequest::parse(&config.request)?;
        match request {
            WriteRequest::Pause => {
                for proc_ in &self.processors {
                    proc_.lock().await.publisher.set_pause(true);
                }
                let mut ws = self.writing.lock();
                ws.paused = true;
                *self.writing_snapshot.write() = ws.snapshot();
            }
            WriteRequest::Unpause { label } => {
                if let Some(label) = label {
                    // Label validation and the state-file write both happen
                    // before any channel is unpaused.
                    let mut ws = self.writing.lock();
                    ws.set_experiment_state_label(&label)?;
                }
                for proc_ in &self.processors {
                    proc_.lock().await.publisher.set_pause(false);
                }
                let mut ws = self.writing.lock();
                ws.paused = false;
                *self.writing_snapshot.write() = ws.snapshot();
            }
            WriteRequest::Stop => {
                for proc_ in &self.processors {
                    let mut dsp = proc_.lock().await;
                    dsp.publisher.remove_ljh22();
                    dsp.publisher.remove_off();
                    dsp.publisher.remove_ljh3();
                    dsp.publisher.set_pause(false);
                }
                let mut ws = self.writing.lock();
                ws.clear_on_stop();
                *self.writing_snapshot.write() = ws.snapshot();
            }
            WriteRequest::Start => self.start_writing(config).await?,
        }
        Ok(())
    }

    async fn start_writing(&self, config: &WriteControlConfig) -> Result<()> {
        if !(config.write_ljh22 || config.write_off || config.write_ljh3) {
            return Err(Error::config(
                "WriteLJH22, WriteOFF and WriteLJH3 are all false",
            ));
        }
        for proc_ in &self.processors {
            let dsp = proc_.lock().await;
            if dsp.publisher.any_file_writer() {
                return Err(Error::config(
                    "writing already in progress, stop writing before starting again",
                ));
            }
        }
        if config.write_off && self.channels_with_projectors().await.is_empty() {
            return Err(Error::config(
                "no projectors are loaded, OFF files require projectors",
            ));
        }
        let path = if config.path.is_empty() {
            self.writing.lock().base_path.clone()
        } else {
            config.path.clone()
        };
        let pattern = make_directory(&path)?;

        for (index, proc_) in self.processors.iter().enumerate() {
            let mut dsp = proc_.lock().await;
            let timebase = 1.0 / dsp.sample_rate;
            let rc = self.row_col[index];
            let name = dsp.name.clone();
            let number = dsp.channel_number;
            let nsamp = dsp.engine.n_samples;
            let npre = dsp.engine.n_presamples;
            if config.write_ljh22 {
                dsp.publisher.set_ljh22(LjhWriter::new(
                    index,
                    name.clone(),
                    number,
                    npre,
                    nsamp,
                    self.frames_per_sample,
                    timebase,
                    rc.nrows,
                    rc.ncols,
                    self.nchan,
                    rc.row,
                    rc.col,
                    self.source_name.to_string(),
                    pattern.path(&name, "ljh"),
                ));
            }
            if config.write_off {
                if let (Some(projectors), Some(basis)) =
                    (dsp.projectors.clone(), dsp.basis.clone())
                {
                    let model = dsp.model_description.clone();
                    dsp.publisher.set_off(OffWriter::new(
                        index,
                        name.clone(),
                        npre,
                        nsamp,
                        timebase,
                        &projectors,
                        &basis,
                        model,
                        pattern.path(&name, "off"),
                    ));
                }
            }
            if config.write_ljh3 {
                dsp.publisher.set_ljh3(Ljh3Writer::new(
                    index,
                    timebase,
                    rc.nrows,
                    rc.ncols,
                    pattern.path(&name, "ljh3"),
                ));
            }
            dsp.publisher.set_pause(false);
        }

        let mut ws = self.writing.lock();
        ws.active = true;
        ws.paused = false;
        ws.base_path = path;
        ws.experiment_state_filename = Some(pattern.path("experiment_state", "txt"));
        ws.pattern = Some(pattern);
        *self.writing_snapshot.write() = ws.snapshot();
        Ok(())
    }

    /// Seeds the default output directory shown to clients before the first
    /// START request names one.
    pub fn set_base_path(&self, base_path: &str) {
        let mut ws = self.writing.lock();
        ws.base_path = base_path.to_string();
        *self.writing_snapshot.write() = ws.snapshot();
    }
}
