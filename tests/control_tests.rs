use std::time::Duration;

use tesdaq::control::{Ports, SourceControl};
use tesdaq::source::{SimPulseConfig, TriangleConfig};
use tesdaq::writing::WriteControlConfig;

fn sim_config() -> SimPulseConfig {
    SimPulseConfig {
        nchan: 2,
        sample_rate: 200_000.0,
        pedestal: 1000.0,
        amplitude: 10_000.0,
        nsamp: 1000,
    }
}

#[tokio::test]
async fn start_requires_a_configured_known_source() {
    let control = SourceControl::new(Ports { base: 25_600 });
    assert!(control.start("SIMPULSESOURCE").await.is_err());
    assert!(control.start("ROACHSOURCE").await.is_err());

    control.configure_sim_pulse(sim_config()).unwrap();
    control.start("SimPulseSource").await.unwrap();
    let status = control.server_status();
    assert!(status.running);
    assert_eq!(status.source_name, "SimPulses");
    assert_eq!(status.nchannels, 2);

    // Only one source may run at a time.
    assert!(control.start("SIMPULSESOURCE").await.is_err());

    control.configure_pulse_lengths(500, 100).await.unwrap();
    let status = control.server_status();
    assert_eq!(status.nsamples, 500);
    assert_eq!(status.npresamp, 100);

    control.stop().await.unwrap();
    assert!(!control.server_status().running);
    assert!(control.stop().await.is_err());
}

#[tokio::test]
async fn operations_require_an_active_source() {
    let control = SourceControl::new(Ports { base: 25_700 });
    assert!(control
        .write_control(&WriteControlConfig {
            request: "Start".into(),
            write_ljh22: true,
            ..Default::default()
        })
        .await
        .is_err());
    assert!(control.configure_pulse_lengths(500, 100).await.is_err());
    assert!(control.trigger_state().await.is_err());
    assert!(control.set_experiment_state_label("x").await.is_err());
}

#[tokio::test]
async fn erroring_source_flips_status_to_not_running() {
    let control = SourceControl::new(Ports { base: 25_800 });
    control.start("ERRORINGSOURCE").await.unwrap();
    control.wait_for_stop().await;
    assert!(!control.server_status().running);
}

#[tokio::test]
async fn triangle_configuration_is_validated() {
    let control = SourceControl::new(Ports { base: 25_900 });
    let bad = TriangleConfig {
        nchan: 1,
        sample_rate: 10_000.0,
        min: 300,
        max: 300,
    };
    assert!(control.configure_triangle(bad).is_err());

    let good = TriangleConfig {
        nchan: 1,
        sample_rate: 100_000.0,
        min: 100,
        max: 300,
    };
    control.configure_triangle(good).unwrap();
    control.start("TRIANGLESOURCE").await.unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    control.stop().await.unwrap();
}
