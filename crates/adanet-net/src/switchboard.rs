//! `Switchboard`: per-channel outgoing dispatch and incoming delivery.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use compact_str::CompactString;

use adanet_core::types::{Message, Solution};

type SinkFn = dyn Fn(Message) + Send + Sync;
type NetworkSendFn = dyn Fn(&str, Message) + Send + Sync;

struct ChannelRoute {
    interfaces: Vec<CompactString>,
    cursor: usize,
    frequency: f64,
}

#[derive(Default)]
struct RoutingTable {
    routes: HashMap<CompactString, ChannelRoute>,
}

/// The dispatcher applying the current Solution to outgoing messages, and
/// delivering incoming ones to the locally registered Sink.
///
/// `update_solution` and `send` serialise on a single mutex guarding the
/// routing table; the mutex is never held while calling the network layer.
pub struct Switchboard {
    table: Mutex<RoutingTable>,
    sinks: Mutex<HashMap<CompactString, Arc<SinkFn>>>,
    network_send: Arc<NetworkSendFn>,
}

impl Switchboard {
    pub fn new(network_send: Arc<NetworkSendFn>) -> Self {
        Switchboard {
            table: Mutex::new(RoutingTable::default()),
            sinks: Mutex::new(HashMap::new()),
            network_send,
        }
    }

    /// Atomic swap of the routing table; per-channel cursors are reset.
    pub fn update_solution(&self, solution: &Solution) {
        let mut table = self.table.lock().unwrap();
        table.routes.clear();
        for assignment in &solution.assignments {
            table.routes.insert(
                assignment.name.clone(),
                ChannelRoute {
                    interfaces: assignment.interfaces.clone(),
                    cursor: 0,
                    frequency: assignment.frequency,
                },
            );
        }
    }

    /// The achieved frequency for `channel`, used by the Source to pace its
    /// windmill drain. `None` if the channel has no current assignment.
    pub fn achieved_frequency(&self, channel: &str) -> Option<f64> {
        self.table
            .lock()
            .unwrap()
            .routes
            .get(channel)
            .map(|r| r.frequency)
    }

    pub fn register_sink<F>(&self, channel: impl Into<CompactString>, sink: F)
    where
        F: Fn(Message) + Send + Sync + 'static,
    {
        self.sinks.lock().unwrap().insert(channel.into(), Arc::new(sink));
    }

    /// Look up the SolvedChannel, advance its cursor, and hand the message
    /// to the network layer with the chosen interface. Drops silently (with
    /// a trace) if the channel has no assignment or an empty interface list.
    pub fn send(&self, message: Message) {
        let interface = {
            let mut table = self.table.lock().unwrap();
            match table.routes.get_mut(message.channel.as_str()) {
                Some(route) if !route.interfaces.is_empty() => {
                    let iface = route.interfaces[route.cursor % route.interfaces.len()].clone();
                    route.cursor = (route.cursor + 1) % route.interfaces.len();
                    Some(iface)
                }
                _ => None,
            }
        };

        match interface {
            Some(iface) => (self.network_send)(iface.as_str(), message),
            None => tracing::trace!(channel = %message.channel, "switchboard dropping: no route"),
        }
    }

    /// Route an incoming message to the local Sink registered for its
    /// channel; unknown channels are logged and dropped.
    pub fn recv(&self, message: Message) {
        let sink = self.sinks.lock().unwrap().get(message.channel.as_str()).cloned();
        match sink {
            Some(sink) => sink(message),
            None => tracing::warn!(channel = %message.channel, "no sink registered for channel"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adanet_core::types::SolvedChannel;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn solution_with(channel: &str, interfaces: &[&str]) -> Solution {
        Solution {
            assignments: vec![SolvedChannel {
                name: channel.into(),
                frequency: 5.0,
                interfaces: interfaces.iter().map(|s| CompactString::from(*s)).collect(),
            }],
            problem_name: "p".into(),
        }
    }

    #[test]
    fn round_robins_over_interfaces() {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let sent_clone = sent.clone();
        let sb = Switchboard::new(Arc::new(move |iface: &str, _msg: Message| {
            sent_clone.lock().unwrap().push(iface.to_string());
        }));
        sb.update_solution(&solution_with("a", &["wlan0", "wlan1"]));

        for _ in 0..4 {
            sb.send(Message::new("a", 0.0, Bytes::new()));
        }
        assert_eq!(
            *sent.lock().unwrap(),
            vec!["wlan0", "wlan1", "wlan0", "wlan1"]
        );
    }

    #[test]
    fn unrouted_channel_is_dropped_silently() {
        let called = Arc::new(AtomicUsize::new(0));
        let called_clone = called.clone();
        let sb = Switchboard::new(Arc::new(move |_: &str, _: Message| {
            called_clone.fetch_add(1, Ordering::Relaxed);
        }));
        sb.send(Message::new("unknown", 0.0, Bytes::new()));
        assert_eq!(called.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn recv_delivers_to_registered_sink() {
        let sb = Switchboard::new(Arc::new(|_: &str, _: Message| {}));
        let received = Arc::new(Mutex::new(None));
        let received_clone = received.clone();
        sb.register_sink("a", move |msg: Message| {
            *received_clone.lock().unwrap() = Some(msg);
        });
        sb.recv(Message::new("a", 1.0, Bytes::from_static(b"hi")));
        assert!(received.lock().unwrap().is_some());
    }
}
