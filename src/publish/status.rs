use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use zeromq::{PubSocket, Socket, SocketSend, ZmqMessage};

/// One status-socket message: a routing tag and a JSON payload. Tags are
/// protocol constants consumed by existing clients.
#[derive(Debug, Clone)]
pub struct ClientUpdate {
    pub tag: &'static str,
    pub payload: serde_json::Value,
}

impl ClientUpdate {
    pub fn new<T: Serialize>(tag: &'static str, payload: &T) -> Self {
        let payload = serde_json::to_value(payload).unwrap_or_else(|e| {
            warn!("could not serialize {tag} update: {e}");
            serde_json::Value::Null
        });
        ClientUpdate { tag, payload }
    }
}

/// Data-volume report from a source read loop, accumulated into the ALIVE
/// heartbeat.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct Heartbeat {
    #[serde(rename = "Running")]
    pub running: bool,
    #[serde(rename = "Time")]
    pub time: f64,
    #[serde(rename = "DataMB")]
    pub data_mb: f64,
}

/// Spawns the status PUB socket: two frames per message, tag then JSON.
pub fn spawn_status_socket(
    endpoint: String,
    mut rx: mpsc::UnboundedReceiver<ClientUpdate>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut socket = PubSocket::new();
        if let Err(e) = socket.bind(&endpoint).await {
            error!("could not bind status socket {endpoint}: {e}");
            return;
        }
        info!("status updates on {endpoint}");
        while let Some(update) = rx.recv().await {
            let json = update.payload.to_string();
            let mut msg = ZmqMessage::from(update.tag.as_bytes().to_vec());
            msg.push_back(json.into_bytes().into());
            if let Err(e) = socket.send(msg).await {
                debug!("status socket send failed: {e}");
            }
        }
        debug!("status socket {endpoint} closed");
    })
}
