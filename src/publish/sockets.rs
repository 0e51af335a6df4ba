use crossbeam_channel::{Receiver, Sender, TryRecvError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};
use zeromq::{PubSocket, Socket, SocketSend, ZmqMessage};

use super::wire::Message;

/// Depth of each record/summary queue. Producers never block: overflow is
/// counted and the batch dropped, so a slow subscriber cannot stall the
/// processing path.
pub const QUEUE_CAPACITY: usize = 500;

pub fn bounded_queue() -> (Sender<Message>, Receiver<Message>) {
    crossbeam_channel::bounded(QUEUE_CAPACITY)
}

/// Spawns a PUB socket bound to `endpoint`, drained from `rx` until every
/// sender is gone. The queue side is a plain crossbeam channel so producers
/// stay synchronous; this task polls it and yields between batches.
pub fn spawn_pub_socket(endpoint: String, rx: Receiver<Message>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut socket = PubSocket::new();
        if let Err(e) = socket.bind(&endpoint).await {
            error!("could not bind pub socket {endpoint}: {e}");
            return;
        }
        info!("publishing on {endpoint}");
        loop {
            match rx.try_recv() {
                Ok([header, payload]) => {
                    let mut msg = ZmqMessage::from(header);
                    msg.push_back(payload.into());
                    if let Err(e) = socket.send(msg).await {
                        debug!("pub socket {endpoint} send failed: {e}");
                    }
                }
                Err(TryRecvError::Empty) => {
                    tokio::task::yield_now().await;
                }
                Err(TryRecvError::Disconnected) => break,
            }
        }
        debug!("pub socket {endpoint} closed");
    })
}

/// The three shared record-stream queues, cloned into every channel's
/// publisher.
#[derive(Clone)]
pub struct PublisherQueues {
    pub records: Sender<Message>,
    pub secondaries: Sender<Message>,
    pub summaries: Sender<Message>,
}
