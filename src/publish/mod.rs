pub mod publisher;
pub mod sockets;
pub mod status;
pub mod wire;

pub use publisher::DataPublisher;
pub use sockets::{bounded_queue, spawn_pub_socket, PublisherQueues, QUEUE_CAPACITY};
pub use status::{spawn_status_socket, ClientUpdate, Heartbeat};
pub use wire::Message;
