use std::collections::HashSet;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

use crate::core::FrameIndex;
use crate::error::{Error, Result};

use super::state::TriggerList;

/// Fans each channel's primary triggers out to the channels subscribed to it
/// (the "group trigger" mechanism). Connection edits may arrive at any time;
/// the matrix is snapshotted at the start of each brokering cycle.
///
/// The run loop is a barrier: every cycle it collects one `TriggerList` per
/// channel, then delivers one (possibly empty) sorted secondary list per
/// channel. Merged lists preserve duplicates: two sources firing on the same
/// frame both count.
pub struct TriggerBroker {
    nchan: usize,
    /// `sources[dst]` holds the source channels feeding `dst`.
    sources: Mutex<Vec<HashSet<usize>>>,
}

impl TriggerBroker {
    pub fn new(nchan: usize) -> Self {
        TriggerBroker {
            nchan,
            sources: Mutex::new(vec![HashSet::new(); nchan]),
        }
    }

    pub fn nchan(&self) -> usize {
        self.nchan
    }

    fn check_pair(&self, src: usize, dst: usize) -> Result<()> {
        if src >= self.nchan || dst >= self.nchan {
            return Err(Error::config(format!(
                "connection ({src} -> {dst}) out of range for {} channels",
                self.nchan
            )));
        }
        if src == dst {
            return Err(Error::config(format!("channel {src} cannot trigger itself")));
        }
        Ok(())
    }

    /// Subscribes `dst` to primary triggers on `src`.
    pub fn add_connection(&self, src: usize, dst: usize) -> Result<()> {
        self.check_pair(src, dst)?;
        self.sources.lock()[dst].insert(src);
        Ok(())
    }

    /// Removes the `src -> dst` subscription, if present.
    pub fn delete_connection(&self, src: usize, dst: usize) -> Result<()> {
        self.check_pair(src, dst)?;
        self.sources.lock()[dst].remove(&src);
        Ok(())
    }

    pub fn is_connected(&self, src: usize, dst: usize) -> bool {
        if src >= self.nchan || dst >= self.nchan {
            return false;
        }
        self.sources.lock()[dst].contains(&src)
    }

    /// The sources feeding `dst`, as an N-vector of booleans. Empty when
    /// `dst` is out of range.
    pub fn connections(&self, dst: usize) -> Vec<bool> {
        if dst >= self.nchan {
            return Vec::new();
        }
        let sources = self.sources.lock();
        let mut out = vec![false; self.nchan];
        for &src in &sources[dst] {
            out[src] = true;
        }
        out
    }

    /// Runs brokering cycles until the abort signal arrives or the primary
    /// ingest closes. Dropping the secondary senders on return is what lets
    /// blocked channel workers observe a clean end-of-run.
    pub async fn run(
        &self,
        mut primaries: mpsc::Receiver<TriggerList>,
        secondary_txs: Vec<mpsc::Sender<Vec<FrameIndex>>>,
        mut abort: broadcast::Receiver<()>,
    ) {
        assert_eq!(secondary_txs.len(), self.nchan);
        'cycles: loop {
            // One list per channel per cycle, in any arrival order.
            let mut primary: Vec<Vec<FrameIndex>> = vec![Vec::new(); self.nchan];
            for n in 0..self.nchan {
                let list = if n == 0 {
                    // Poll the abort signal only between cycles; once a cycle
                    // has begun, all N lists are guaranteed to arrive.
                    tokio::select! {
                        _ = abort.recv() => break 'cycles,
                        list = primaries.recv() => list,
                    }
                } else {
                    primaries.recv().await
                };
                let Some(list) = list else { break 'cycles };
                primary[list.channel_index] = list.frames;
            }

            let snapshot = self.sources.lock().clone();
            for (dst, txs) in secondary_txs.iter().enumerate() {
                let mut merged: Vec<FrameIndex> = snapshot[dst]
                    .iter()
                    .flat_map(|&src| primary[src].iter().copied())
                    .collect();
                merged.sort_unstable();
                if txs.send(merged).await.is_err() {
                    break 'cycles;
                }
            }
        }
        debug!("trigger broker wound down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_bookkeeping() {
        let broker = TriggerBroker::new(4);
        for i in 0..5 {
            for j in 0..5 {
                assert!(!broker.is_connected(i, j));
            }
        }

        broker.add_connection(0, 2).unwrap();
        broker.add_connection(2, 0).unwrap();
        assert!(broker.is_connected(0, 2));
        assert!(broker.is_connected(2, 0));
        assert!(!broker.is_connected(1, 2));

        broker.delete_connection(0, 2).unwrap();
        broker.delete_connection(2, 0).unwrap();
        assert!(!broker.is_connected(0, 2));

        assert!(broker.add_connection(0, 4).is_err());
        assert!(broker.delete_connection(4, 0).is_err());
        assert!(broker.add_connection(1, 1).is_err());
    }

    #[test]
    fn connections_vector_collects_sources() {
        let broker = TriggerBroker::new(4);
        assert!(broker.connections(7).is_empty());
        broker.add_connection(1, 0).unwrap();
        broker.add_connection(2, 0).unwrap();
        broker.add_connection(3, 0).unwrap();
        // Repeats are idempotent.
        broker.add_connection(2, 0).unwrap();
        let con = broker.connections(0);
        assert_eq!(con, vec![false, true, true, true]);
    }
}
