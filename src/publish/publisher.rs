use tracing::warn;

use crate::core::DataRecord;
use crate::error::Result;
use crate::writing::{Ljh3Writer, LjhWriter, OffWriter};

use super::sockets::PublisherQueues;
use super::wire;

/// Every sink a channel's records can fan out to: the shared pub-socket
/// queues (always present) and the optional per-channel file writers.
///
/// Socket publication never blocks: a full queue drops the message and
/// counts it. File writers are synchronous and lazy; while paused, records
/// still reach the sockets but are discarded to the files.
pub struct DataPublisher {
    channel_index: usize,
    queues: PublisherQueues,
    ljh22: Option<LjhWriter>,
    ljh3: Option<Ljh3Writer>,
    off: Option<OffWriter>,
    paused: bool,
    number_written: usize,
    dropped: u64,
}

impl DataPublisher {
    pub fn new(channel_index: usize, queues: PublisherQueues) -> Self {
        DataPublisher {
            channel_index,
            queues,
            ljh22: None,
            ljh3: None,
            off: None,
            paused: false,
            number_written: 0,
            dropped: 0,
        }
    }

    pub fn set_pause(&mut self, paused: bool) {
        self.paused = paused;
    }

    pub fn has_ljh22(&self) -> bool {
        self.ljh22.is_some()
    }

    pub fn has_ljh3(&self) -> bool {
        self.ljh3.is_some()
    }

    pub fn has_off(&self) -> bool {
        self.off.is_some()
    }

    pub fn any_file_writer(&self) -> bool {
        self.has_ljh22() || self.has_ljh3() || self.has_off()
    }

    pub fn set_ljh22(&mut self, writer: LjhWriter) {
        self.ljh22 = Some(writer);
        self.number_written = 0;
    }

    pub fn set_ljh3(&mut self, writer: Ljh3Writer) {
        self.ljh3 = Some(writer);
        self.number_written = 0;
    }

    pub fn set_off(&mut self, writer: OffWriter) {
        self.off = Some(writer);
        self.number_written = 0;
    }

    pub fn remove_ljh22(&mut self) {
        if let Some(mut w) = self.ljh22.take() {
            w.close();
        }
    }

    pub fn remove_ljh3(&mut self) {
        if let Some(mut w) = self.ljh3.take() {
            w.close();
        }
    }

    pub fn remove_off(&mut self) {
        if let Some(mut w) = self.off.take() {
            w.close();
        }
    }

    /// Records written to file since writing started on this channel.
    pub fn number_written(&self) -> usize {
        self.number_written
    }

    /// Socket messages dropped to queue overflow since startup.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Publishes a batch of finished records: full records and summaries to
    /// the sockets, then (unless paused) to any attached file writers.
    /// `secondary` routes the full records to the secondary-trigger socket.
    pub fn publish(&mut self, records: &[DataRecord], secondary: bool) -> Result<()> {
        for rec in records {
            let queue = if secondary {
                &self.queues.secondaries
            } else {
                &self.queues.records
            };
            if queue.try_send(wire::record_message(rec)).is_err() {
                self.dropped += 1;
                warn!(
                    channel = self.channel_index,
                    dropped = self.dropped,
                    "record queue full, dropping message"
                );
            }
            if self.queues.summaries.try_send(wire::summary_message(rec)).is_err() {
                self.dropped += 1;
                warn!(
                    channel = self.channel_index,
                    dropped = self.dropped,
                    "summary queue full, dropping message"
                );
            }
        }

        if self.paused || !self.any_file_writer() {
            return Ok(());
        }
        for rec in records {
            self.write_to_files(rec);
        }
        Ok(())
    }

    /// A failed create or write detaches that writer: a sick disk must not
    /// take the acquisition down with it.
    fn write_to_files(&mut self, rec: &DataRecord) {
        let time_us = wire::time_nanos(rec.trig_time) / 1000;

        let result = self.ljh22.as_mut().map(|w| {
            if !w.header_written() {
                // Like the downstream analysis tools expect, the file only
                // comes into existence once it has a record to hold.
                w.create_file()?;
                w.write_header()?;
            }
            w.write_record(rec.trig_frame, time_us, &rec.data)
        });
        if let Some(Err(e)) = result {
            warn!(channel = self.channel_index, "LJH22 write failed, disabling writer: {e}");
            self.remove_ljh22();
        }

        let first_rising = rec.presamples as u32 + 1;
        let result = self.ljh3.as_mut().map(|w| {
            if !w.header_written() {
                w.create_file()?;
                w.write_header()?;
            }
            w.write_record(first_rising, rec.trig_frame, time_us, &rec.data)
        });
        if let Some(Err(e)) = result {
            warn!(channel = self.channel_index, "LJH3 write failed, disabling writer: {e}");
            self.remove_ljh3();
        }

        let coefs: Vec<f32> = rec.model_coefs.iter().map(|&c| c as f32).collect();
        let result = self.off.as_mut().map(|w| {
            if !w.header_written() {
                w.create_file()?;
                w.write_header()?;
            }
            w.write_record(rec.presamples as i32, rec.trig_frame, time_us, &coefs)
        });
        if let Some(Err(e)) = result {
            warn!(channel = self.channel_index, "OFF write failed, disabling writer: {e}");
            self.remove_off();
        }
        self.number_written += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publish::sockets;
    use std::time::SystemTime;

    fn queues() -> (PublisherQueues, [crossbeam_channel::Receiver<wire::Message>; 3]) {
        let (records, r_rx) = sockets::bounded_queue();
        let (secondaries, s_rx) = sockets::bounded_queue();
        let (summaries, sum_rx) = sockets::bounded_queue();
        (
            PublisherQueues {
                records,
                secondaries,
                summaries,
            },
            [r_rx, s_rx, sum_rx],
        )
    }

    fn record() -> DataRecord {
        DataRecord::new(0, 10, SystemTime::UNIX_EPOCH, vec![1, 2, 3, 4], false, 1, 1.0, 1e-4)
    }

    #[test]
    fn primary_and_secondary_route_to_their_queues() {
        let (q, [r_rx, s_rx, sum_rx]) = queues();
        let mut publisher = DataPublisher::new(0, q);
        publisher.publish(&[record()], false).unwrap();
        publisher.publish(&[record()], true).unwrap();

        assert_eq!(r_rx.len(), 1);
        assert_eq!(s_rx.len(), 1);
        assert_eq!(sum_rx.len(), 2);
    }

    #[test]
    fn queue_overflow_drops_and_counts() {
        let (q, _rxs) = queues();
        let mut publisher = DataPublisher::new(0, q);
        let batch: Vec<DataRecord> = (0..sockets::QUEUE_CAPACITY + 10).map(|_| record()).collect();
        publisher.publish(&batch, false).unwrap();
        assert_eq!(publisher.dropped(), 2 * 10);
    }
}
