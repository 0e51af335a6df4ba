use std::time::{Duration, SystemTime};

use tesdaq::core::{DataStream, NO_TRIGGER_YET};
use tesdaq::triggering::TriggerEngine;

const SAMPLE_RATE: f64 = 10_000.0;

fn stream_from(raw: Vec<u16>) -> DataStream {
    DataStream::new(
        raw,
        1,
        0,
        SystemTime::now(),
        Duration::from_secs_f64(1.0 / SAMPLE_RATE),
    )
}

/// 10000 samples of baseline with a 10-sample step of 8000 at frame 1000.
fn step_stream() -> DataStream {
    let mut raw = vec![0u16; 10_000];
    for v in raw.iter_mut().skip(1000).take(10) {
        *v = 8000;
    }
    stream_from(raw)
}

fn engine() -> TriggerEngine {
    let mut eng = TriggerEngine::new(1000, 100, SAMPLE_RATE);
    eng.last_trigger = NO_TRIGGER_YET;
    eng
}

#[test]
fn edge_trigger_finds_the_step() {
    let mut eng = engine();
    eng.state.edge_trigger = true;
    eng.state.edge_rising = true;
    eng.state.edge_level = 100;
    assert_eq!(eng.search(&step_stream()), vec![1000]);
}

#[test]
fn level_trigger_finds_the_crossing() {
    let mut eng = engine();
    eng.state.level_trigger = true;
    eng.state.level_rising = true;
    eng.state.level_level = 100;
    assert_eq!(eng.search(&step_stream()), vec![1000]);
}

#[test]
fn auto_trigger_fires_on_the_delay_grid() {
    let mut eng = engine();
    eng.state.auto_trigger = true;
    eng.state.auto_delay = Duration::from_millis(500); // 5000 frames
    assert_eq!(eng.search(&step_stream()), vec![100, 5100]);
}

#[test]
fn auto_defers_to_level_triggers() {
    let mut eng = engine();
    eng.state.level_trigger = true;
    eng.state.level_rising = true;
    eng.state.level_level = 100;
    eng.state.auto_trigger = true;
    eng.state.auto_delay = Duration::from_millis(500);
    assert_eq!(eng.search(&step_stream()), vec![1000, 6000]);

    eng.state.auto_delay = Duration::from_millis(200); // 2000 frames
    assert_eq!(
        eng.search(&step_stream()),
        vec![1000, 3000, 5000, 7000, 9000]
    );
}

#[test]
fn edge_and_level_interact_by_priority() {
    let mut eng = engine();
    eng.state.edge_trigger = true;
    eng.state.edge_rising = true;
    eng.state.edge_level = 100;
    eng.state.level_trigger = true;
    eng.state.level_rising = true;
    eng.state.level_level = 100;
    // Both would fire at 1000; the edge wins and the level is suppressed.
    assert_eq!(eng.search(&step_stream()), vec![1000]);

    // An unreachable level leaves the edge alone.
    eng.state.level_level = 10_000;
    assert_eq!(eng.search(&step_stream()), vec![1000]);

    // An unreachable edge leaves the level alone.
    eng.state.edge_level = 20_000;
    eng.state.level_level = 100;
    assert_eq!(eng.search(&step_stream()), vec![1000]);
}

/// An edge trigger suppresses level triggers whose record would overlap its
/// own, in either direction. The level step walks past the edge window while
/// the edge trigger survives throughout.
#[test]
fn edge_vetoes_nearby_level_triggers() {
    let level_change_at = [50usize, 199, 200, 201, 299, 300, 301, 399, 400, 401, 500];
    let expected_counts = [2usize, 2, 2, 1, 1, 1, 1, 1, 1, 2, 2];
    let edge_change_at = 300usize;

    for (&lca, &want) in level_change_at.iter().zip(&expected_counts) {
        let mut raw = vec![0u16; 1000];
        for v in raw.iter_mut().skip(lca) {
            *v = 100;
        }
        for v in raw.iter_mut().skip(edge_change_at).take(100) {
            *v = 400;
        }

        let mut eng = TriggerEngine::new(100, 20, SAMPLE_RATE);
        eng.last_trigger = NO_TRIGGER_YET;
        eng.state.edge_trigger = true;
        eng.state.edge_rising = true;
        eng.state.edge_level = 290;
        eng.state.level_trigger = true;
        eng.state.level_rising = true;
        eng.state.level_level = 99;

        let frames = eng.search(&stream_from(raw));
        assert_eq!(
            frames.len(),
            want,
            "level change at {lca}: found {frames:?}, want {want} triggers"
        );
        assert!(frames.contains(&300), "edge trigger must survive (lca={lca})");
    }
}

/// No two triggers may be closer than a record's post-trigger span.
#[test]
fn records_never_overlap() {
    let mut eng = engine();
    eng.state.auto_trigger = true;
    eng.state.auto_delay = Duration::from_micros(100); // 1 frame: as fast as possible
    let frames = eng.search(&step_stream());
    assert!(!frames.is_empty());
    for pair in frames.windows(2) {
        assert!(pair[1] - pair[0] >= (1000 - 100) as i64, "overlap in {pair:?}");
    }
}

/// Candidates too close to either end of the stream must not fire: the
/// record needs its full pre-trigger and post-trigger span.
#[test]
fn triggers_keep_off_the_stream_edges() {
    let mut raw = vec![0u16; 500];
    raw[30] = 8000; // too early: only 30 presamples available
    raw[460] = 8000; // too late: record would run off the end
    let mut eng = TriggerEngine::new(100, 50, SAMPLE_RATE);
    eng.last_trigger = NO_TRIGGER_YET;
    eng.state.edge_trigger = true;
    eng.state.edge_rising = true;
    eng.state.edge_level = 100;
    assert!(eng.search(&stream_from(raw)).is_empty());
}
