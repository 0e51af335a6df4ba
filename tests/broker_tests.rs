use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};

use tesdaq::triggering::{TriggerBroker, TriggerList};

struct BrokerRig {
    broker: Arc<TriggerBroker>,
    primary_tx: mpsc::Sender<TriggerList>,
    secondary_rxs: Vec<mpsc::Receiver<Vec<i64>>>,
    abort_tx: broadcast::Sender<()>,
}

fn rig(nchan: usize) -> BrokerRig {
    let broker = Arc::new(TriggerBroker::new(nchan));
    let (primary_tx, primary_rx) = mpsc::channel(nchan);
    let mut secondary_txs = Vec::new();
    let mut secondary_rxs = Vec::new();
    for _ in 0..nchan {
        let (tx, rx) = mpsc::channel(4);
        secondary_txs.push(tx);
        secondary_rxs.push(rx);
    }
    let (abort_tx, abort_rx) = broadcast::channel(1);
    {
        let broker = Arc::clone(&broker);
        tokio::spawn(async move {
            broker.run(primary_rx, secondary_txs, abort_rx).await;
        });
    }
    BrokerRig {
        broker,
        primary_tx,
        secondary_rxs,
        abort_tx,
    }
}

/// The group-trigger fan-in: channels 0 and 2 feed channel 3; the merged
/// secondary list is sorted and keeps duplicates.
#[tokio::test]
async fn fan_in_merges_sorted_with_duplicates() {
    let mut rig = rig(4);
    rig.broker.add_connection(0, 3).unwrap();
    rig.broker.add_connection(2, 3).unwrap();

    for _cycle in 0..3 {
        for c in 0..4i64 {
            rig.primary_tx
                .send(TriggerList {
                    channel_index: c as usize,
                    frames: vec![c + 10, c + 20, 30],
                })
                .await
                .unwrap();
        }
        for c in 0..3 {
            let secondaries = rig.secondary_rxs[c].recv().await.unwrap();
            assert!(
                secondaries.is_empty(),
                "channel {c} expected no secondaries, got {secondaries:?}"
            );
        }
        let ch3 = rig.secondary_rxs[3].recv().await.unwrap();
        assert_eq!(ch3, vec![10, 12, 20, 22, 30, 30]);
    }
    rig.abort_tx.send(()).unwrap();
}

/// Arrival order must not matter: lists land keyed by their channel index.
#[tokio::test]
async fn arrival_order_is_irrelevant() {
    let mut rig = rig(3);
    rig.broker.add_connection(1, 0).unwrap();

    for &c in &[2usize, 0, 1] {
        rig.primary_tx
            .send(TriggerList {
                channel_index: c,
                frames: vec![100 * c as i64],
            })
            .await
            .unwrap();
    }
    assert_eq!(rig.secondary_rxs[0].recv().await.unwrap(), vec![100]);
    assert!(rig.secondary_rxs[1].recv().await.unwrap().is_empty());
    assert!(rig.secondary_rxs[2].recv().await.unwrap().is_empty());
}

/// On abort, waiting channels observe closed secondary channels: the clean
/// end-of-run signal.
#[tokio::test]
async fn abort_closes_the_output_side() {
    let mut rig = rig(2);
    rig.abort_tx.send(()).unwrap();
    assert!(rig.secondary_rxs[0].recv().await.is_none());
    assert!(rig.secondary_rxs[1].recv().await.is_none());
}

/// Connection edits racing the broker loop are safe and take effect on the
/// next cycle.
#[tokio::test]
async fn connection_edits_apply_between_cycles() {
    let mut rig = rig(2);

    rig.primary_tx
        .send(TriggerList {
            channel_index: 0,
            frames: vec![5],
        })
        .await
        .unwrap();
    rig.primary_tx
        .send(TriggerList {
            channel_index: 1,
            frames: vec![],
        })
        .await
        .unwrap();
    assert!(rig.secondary_rxs[1].recv().await.unwrap().is_empty());
    let _ = rig.secondary_rxs[0].recv().await.unwrap();

    rig.broker.add_connection(0, 1).unwrap();
    rig.primary_tx
        .send(TriggerList {
            channel_index: 0,
            frames: vec![7],
        })
        .await
        .unwrap();
    rig.primary_tx
        .send(TriggerList {
            channel_index: 1,
            frames: vec![],
        })
        .await
        .unwrap();
    assert_eq!(rig.secondary_rxs[1].recv().await.unwrap(), vec![7]);
    let _ = rig.secondary_rxs[0].recv().await.unwrap();
}
