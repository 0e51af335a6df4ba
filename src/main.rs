use std::time::Duration;

use tracing::info;
use tracing_subscriber::EnvFilter;

use tesdaq::control::{Ports, SourceControl};
use tesdaq::source::SimPulseConfig;

/// Thin launcher: bind the publication sockets, preconfigure a simulated
/// source so a client can start one immediately, and serve until Ctrl-C.
/// The JSON-RPC front-end process talks to the `SourceControl` API.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let base = std::env::var("TESDAQ_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(5500);
    let control = SourceControl::new(Ports { base });
    info!(base, "tesdaq up; status and record streams are publishing");

    control.configure_sim_pulse(SimPulseConfig {
        nchan: 4,
        sample_rate: 200_000.0,
        pedestal: 1000.0,
        amplitude: 10_000.0,
        nsamp: 1000,
    })?;

    tokio::signal::ctrl_c().await?;
    info!("interrupt received, shutting down");
    if control.stop().await.is_ok() {
        control.wait_for_stop().await;
    }
    // Give the status socket a beat to flush the final messages.
    tokio::time::sleep(Duration::from_millis(100)).await;
    Ok(())
}
