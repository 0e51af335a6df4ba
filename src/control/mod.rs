use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex as PlMutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tracing::info;

use crate::core::Dense;
use crate::error::{Error, Result};
use crate::publish::{
    bounded_queue, spawn_pub_socket, spawn_status_socket, ClientUpdate, Heartbeat, PublisherQueues,
};
use crate::source::{
    self, DataSource, ErroringSource, RunningSource, SimPulseConfig, SimPulseSource, SourceContext,
    TriangleConfig, TriangleSource,
};
use crate::triggering::FullTriggerState;
use crate::writing::WriteControlConfig;

/// TCP port assignments, all offsets from one base. Base+0 is reserved for
/// the JSON-RPC front-end that drives this service.
#[derive(Debug, Clone, Copy)]
pub struct Ports {
    pub base: u16,
}

impl Default for Ports {
    fn default() -> Self {
        Ports { base: 5500 }
    }
}

impl Ports {
    pub fn status(&self) -> u16 {
        self.base + 1
    }
    pub fn records(&self) -> u16 {
        self.base + 2
    }
    pub fn secondary_records(&self) -> u16 {
        self.base + 3
    }
    pub fn summaries(&self) -> u16 {
        self.base + 4
    }

    fn endpoint(port: u16) -> String {
        format!("tcp://0.0.0.0:{port}")
    }
}

/// The status snapshot clients poll and the STATUS broadcast carries.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServerStatus {
    pub running: bool,
    pub source_name: String,
    pub nchannels: usize,
    pub nsamples: usize,
    pub npresamp: usize,
    pub ncol: Vec<usize>,
    pub nrow: Vec<usize>,
    pub channels_with_projectors: Vec<usize>,
}

/// The service facade over every data source: holds the per-kind
/// configurations, at most one running source, and the status publication
/// plumbing. The JSON-RPC front-end calls straight into these methods.
pub struct SourceControl {
    sim_pulse: PlMutex<Option<SimPulseConfig>>,
    triangle: PlMutex<Option<TriangleConfig>>,
    active: Mutex<Option<RunningSource>>,
    status: Arc<RwLock<ServerStatus>>,
    ctx: SourceContext,
}

impl SourceControl {
    /// Builds the service and spawns its long-lived tasks: the four pub
    /// sockets and the 2-second heartbeat.
    pub fn new(ports: Ports) -> Arc<Self> {
        let (records, records_rx) = bounded_queue();
        let (secondaries, secondaries_rx) = bounded_queue();
        let (summaries, summaries_rx) = bounded_queue();
        spawn_pub_socket(Ports::endpoint(ports.records()), records_rx);
        spawn_pub_socket(Ports::endpoint(ports.secondary_records()), secondaries_rx);
        spawn_pub_socket(Ports::endpoint(ports.summaries()), summaries_rx);

        let (updates, updates_rx) = mpsc::unbounded_channel();
        spawn_status_socket(Ports::endpoint(ports.status()), updates_rx);

        let (heartbeats, heartbeats_rx) = mpsc::channel(16);
        let status: Arc<RwLock<ServerStatus>> = Arc::new(RwLock::new(ServerStatus::default()));
        spawn_heartbeat(Arc::clone(&status), updates.clone(), heartbeats_rx);

        let _ = updates.send(ClientUpdate::new("NEWDASTARD", &"new server is running"));

        Arc::new(SourceControl {
            sim_pulse: PlMutex::new(None),
            triangle: PlMutex::new(None),
            active: Mutex::new(None),
            status,
            ctx: SourceContext {
                queues: PublisherQueues {
                    records,
                    secondaries,
                    summaries,
                },
                updates,
                heartbeats,
            },
        })
    }

    pub fn server_status(&self) -> ServerStatus {
        self.status.read().clone()
    }

    /// Stores (and validates) the simulated-pulse configuration for the next
    /// start of that source.
    pub fn configure_sim_pulse(&self, config: SimPulseConfig) -> Result<()> {
        SimPulseSource::new(config.clone())?;
        info!(
            nchan = config.nchan,
            rate = config.sample_rate,
            "configured SimPulse source"
        );
        self.send_update(ClientUpdate::new("SIMPULSE", &config));
        *self.sim_pulse.lock() = Some(config);
        Ok(())
    }

    pub fn configure_triangle(&self, config: TriangleConfig) -> Result<()> {
        TriangleSource::new(config.clone())?;
        info!(
            nchan = config.nchan,
            rate = config.sample_rate,
            "configured Triangle source"
        );
        self.send_update(ClientUpdate::new("TRIANGLE", &config));
        *self.triangle.lock() = Some(config);
        Ok(())
    }

    /// Builds the named source from its stored configuration and starts it.
    pub async fn start(&self, source_name: &str) -> Result<()> {
        let mut active = self.active.lock().await;
        Self::clear_if_stopped(&self.status, &mut active);
        if active.is_some() {
            return Err(Error::config(
                "a source is already active; stop it before starting another",
            ));
        }

        let source: Box<dyn DataSource> = match source_name.to_uppercase().as_str() {
            "SIMPULSESOURCE" => {
                let config = self
                    .sim_pulse
                    .lock()
                    .clone()
                    .ok_or_else(|| Error::config("SimPulse source is not configured"))?;
                Box::new(SimPulseSource::new(config)?)
            }
            "TRIANGLESOURCE" => {
                let config = self
                    .triangle
                    .lock()
                    .clone()
                    .ok_or_else(|| Error::config("Triangle source is not configured"))?;
                Box::new(TriangleSource::new(config)?)
            }
            "ERRORINGSOURCE" => Box::new(ErroringSource::new(1)),
            other => {
                return Err(Error::config(format!(
                    "data source {other:?} is not recognized"
                )))
            }
        };

        let running = source::start(source, &self.ctx).await?;
        {
            let mut status = self.status.write();
            status.running = true;
            status.source_name = running.source_name.to_string();
            status.nchannels = running.nchan();
            // Fresh processors always come up with the default geometry.
            status.nsamples = source::DEFAULT_NSAMPLES;
            status.npresamp = source::DEFAULT_NPRESAMPLES;
            status.ncol = Vec::new();
            status.nrow = Vec::new();
        }
        *active = Some(running);
        self.broadcast_status(&active).await;
        self.broadcast_trigger_state(&active).await;
        self.broadcast_channel_names(&active);
        Ok(())
    }

    /// Stops the running source and waits for its read loop to unwind.
    pub async fn stop(&self) -> Result<()> {
        let mut active = self.active.lock().await;
        let Some(running) = active.as_ref() else {
            return Err(Error::NoActiveSource);
        };
        info!("stopping data source");
        let _ = running.stop();
        running.wait().await;
        self.status.write().running = false;
        *active = None;
        self.broadcast_status(&active).await;
        Ok(())
    }

    /// Blocks until no source is active; the self-stopped case included.
    pub async fn wait_for_stop(&self) {
        loop {
            let done = {
                let mut active = self.active.lock().await;
                Self::clear_if_stopped(&self.status, &mut active);
                match active.as_ref() {
                    None => None,
                    Some(running) => Some(running.done_signal()),
                }
            };
            match done {
                None => return,
                Some(mut signal) => {
                    while !*signal.borrow() {
                        if signal.changed().await.is_err() {
                            break;
                        }
                    }
                    let mut active = self.active.lock().await;
                    Self::clear_if_stopped(&self.status, &mut active);
                }
            }
        }
    }

    pub async fn configure_pulse_lengths(&self, nsamp: usize, npre: usize) -> Result<()> {
        let active = self.active.lock().await;
        let running = active.as_ref().ok_or(Error::NoActiveSource)?;
        info!(nsamp, npre, "configuring pulse lengths");
        running.configure_pulse_lengths(nsamp, npre).await?;
        {
            let mut status = self.status.write();
            status.nsamples = nsamp;
            status.npresamp = npre;
        }
        self.broadcast_status(&active).await;
        Ok(())
    }

    pub async fn configure_triggers(&self, state: &FullTriggerState) -> Result<()> {
        let active = self.active.lock().await;
        let running = active.as_ref().ok_or(Error::NoActiveSource)?;
        running.change_trigger_state(state).await?;
        self.broadcast_trigger_state(&active).await;
        Ok(())
    }

    pub async fn trigger_state(&self) -> Result<Vec<FullTriggerState>> {
        let active = self.active.lock().await;
        let running = active.as_ref().ok_or(Error::NoActiveSource)?;
        Ok(running.compute_full_trigger_state().await)
    }

    /// Installs a projection model from the base64-encoded binary matrices
    /// the control payload carries.
    pub async fn configure_projectors_basis(
        &self,
        channel_index: usize,
        projectors_base64: &str,
        basis_base64: &str,
        model_description: &str,
    ) -> Result<()> {
        let projectors = Dense::from_base64(projectors_base64)?;
        let basis = Dense::from_base64(basis_base64)?;
        let active = self.active.lock().await;
        let running = active.as_ref().ok_or(Error::NoActiveSource)?;
        running
            .configure_projectors_basis(channel_index, projectors, basis, model_description.into())
            .await?;
        self.broadcast_status(&active).await;
        Ok(())
    }

    pub async fn configure_mix_fraction(&self, channel_index: usize, fraction: f64) -> Result<()> {
        let active = self.active.lock().await;
        let running = active.as_ref().ok_or(Error::NoActiveSource)?;
        running.configure_mix_fraction(channel_index, fraction)
    }

    /// Turns coupling of feedback triggers into error-channel secondaries on
    /// or off. The update is broadcast before the result is known so clients
    /// always observe the attempt.
    pub async fn couple_fb_to_err(&self, couple: bool) -> Result<()> {
        self.set_coupling(if couple { "FB_TO_ERR" } else { "NO_COUPLING" })
            .await
    }

    /// The reverse direction: error triggers raise feedback secondaries.
    pub async fn couple_err_to_fb(&self, couple: bool) -> Result<()> {
        self.set_coupling(if couple { "ERR_TO_FB" } else { "NO_COUPLING" })
            .await
    }

    async fn set_coupling(&self, coupling: &str) -> Result<()> {
        let active = self.active.lock().await;
        let running = active.as_ref().ok_or(Error::NoActiveSource)?;
        self.send_update(ClientUpdate::new("TRIGCOUPLING", &coupling));
        running.set_coupling()
    }

    pub async fn write_control(&self, config: &WriteControlConfig) -> Result<()> {
        let active = self.active.lock().await;
        let running = active.as_ref().ok_or(Error::NoActiveSource)?;
        running.write_control(config).await?;
        self.broadcast_writing_state(&active);
        Ok(())
    }

    pub async fn set_experiment_state_label(&self, label: &str) -> Result<()> {
        let active = self.active.lock().await;
        let running = active.as_ref().ok_or(Error::NoActiveSource)?;
        running.set_experiment_state_label(label)
    }

    pub async fn write_comment(&self, comment: &str) -> Result<()> {
        let active = self.active.lock().await;
        let running = active.as_ref().ok_or(Error::NoActiveSource)?;
        running.write_comment(comment)
    }

    /// Subscribes `dst` to group triggers from `src` on the running source.
    pub async fn add_group_trigger(&self, src: usize, dst: usize) -> Result<()> {
        let active = self.active.lock().await;
        let running = active.as_ref().ok_or(Error::NoActiveSource)?;
        running.broker().add_connection(src, dst)
    }

    pub async fn delete_group_trigger(&self, src: usize, dst: usize) -> Result<()> {
        let active = self.active.lock().await;
        let running = active.as_ref().ok_or(Error::NoActiveSource)?;
        running.broker().delete_connection(src, dst)
    }

    /// Re-broadcasts every status message a late-joining client needs.
    pub async fn send_all_status(&self) {
        let mut active = self.active.lock().await;
        Self::clear_if_stopped(&self.status, &mut active);
        self.broadcast_status(&active).await;
        self.broadcast_trigger_state(&active).await;
        self.broadcast_channel_names(&active);
        self.broadcast_writing_state(&active);
        self.send_update(ClientUpdate::new("SENDALL", &0));
    }

    fn clear_if_stopped(status: &RwLock<ServerStatus>, active: &mut Option<RunningSource>) {
        if let Some(running) = active.as_ref() {
            if !running.running() {
                status.write().running = false;
                *active = None;
            }
        }
    }

    fn send_update(&self, update: ClientUpdate) {
        let _ = self.ctx.updates.send(update);
    }

    async fn broadcast_status(&self, active: &Option<RunningSource>) {
        if let Some(running) = active.as_ref() {
            let channels = running.channels_with_projectors().await;
            self.status.write().channels_with_projectors = channels;
        }
        self.send_update(ClientUpdate::new("STATUS", &self.server_status()));
    }

    async fn broadcast_trigger_state(&self, active: &Option<RunningSource>) {
        if let Some(running) = active.as_ref() {
            let state = running.compute_full_trigger_state().await;
            self.send_update(ClientUpdate::new("TRIGGER", &state));
        }
    }

    fn broadcast_channel_names(&self, active: &Option<RunningSource>) {
        if let Some(running) = active.as_ref() {
            self.send_update(ClientUpdate::new(
                "CHANNELNAMES",
                &running.channel_names().to_vec(),
            ));
        }
    }

    fn broadcast_writing_state(&self, active: &Option<RunningSource>) {
        if let Some(running) = active.as_ref() {
            self.send_update(ClientUpdate::new("WRITING", &running.writing_snapshot()));
        }
    }
}

fn spawn_heartbeat(
    status: Arc<RwLock<ServerStatus>>,
    updates: mpsc::UnboundedSender<ClientUpdate>,
    mut heartbeats: mpsc::Receiver<Heartbeat>,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(2));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut total = Heartbeat::default();
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    total.running = status.read().running;
                    if updates.send(ClientUpdate::new("ALIVE", &total)).is_err() {
                        break;
                    }
                    total.time = 0.0;
                    total.data_mb = 0.0;
                }
                beat = heartbeats.recv() => match beat {
                    Some(beat) => {
                        total.time += beat.time;
                        total.data_mb += beat.data_mb;
                    }
                    None => break,
                },
            }
        }
    });
}
