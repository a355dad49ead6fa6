//! Per-channel Sinks (Sink agent only).
//!
//! `recv(bytes)` delivers the payload to the local consumer. No reliability
//! or ordering across interfaces is promised.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use adanet_core::types::{Channel, ChannelKind, Message};

use crate::queue::WindmillQueue;

/// Consumes delivered messages for one channel. `ros` logs and otherwise
/// behaves like `simulated` in this build (no live ROS bridge; see
/// `DESIGN.md`). `disk` additionally persists each payload to its
/// `QUEUE_PATH`-backed queue, if one was built for it.
pub struct Sink {
    kind: ChannelKind,
    received: AtomicU64,
    last_payload: Mutex<Option<bytes::Bytes>>,
    persistent: Option<Arc<WindmillQueue>>,
}

impl Sink {
    pub fn new(channel: &Channel, persistent: Option<Arc<WindmillQueue>>) -> Self {
        Sink {
            kind: channel.kind,
            received: AtomicU64::new(0),
            last_payload: Mutex::new(None),
            persistent,
        }
    }

    pub fn recv(&self, message: Message) {
        self.received.fetch_add(1, Ordering::Relaxed);
        match self.kind {
            ChannelKind::Simulated => {
                *self.last_payload.lock().unwrap() = Some(message.payload);
            }
            ChannelKind::Disk | ChannelKind::Ros => {
                tracing::trace!(channel = %message.channel, bytes = message.payload.len(), "sink received");
                if let Some(queue) = &self.persistent {
                    queue.push(message.payload.clone());
                }
                *self.last_payload.lock().unwrap() = Some(message.payload);
            }
        }
    }

    pub fn received_count(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adanet_core::types::Qos;
    use bytes::Bytes;

    #[test]
    fn counts_received_messages() {
        let channel = Channel {
            name: "c".into(),
            kind: ChannelKind::Simulated,
            priority: 0,
            frequency: 1.0,
            size: None,
            qos: Qos::default(),
            queue_length: 0,
        };
        let sink = Sink::new(&channel, None);
        sink.recv(Message::new("c", 0.0, Bytes::from_static(b"a")));
        sink.recv(Message::new("c", 1.0, Bytes::from_static(b"b")));
        assert_eq!(sink.received_count(), 2);
    }

    #[test]
    fn disk_channel_persists_to_queue() {
        let channel = Channel {
            name: "recorded".into(),
            kind: ChannelKind::Disk,
            priority: 0,
            frequency: 1.0,
            size: None,
            qos: Qos::default(),
            queue_length: 0,
        };
        let queue = Arc::new(WindmillQueue::new_cache(4));
        let sink = Sink::new(&channel, Some(queue.clone()));
        sink.recv(Message::new("recorded", 0.0, Bytes::from_static(b"x")));
        assert_eq!(queue.len(), 1);
    }
}
