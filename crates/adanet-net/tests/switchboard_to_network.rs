//! Cross-module integration: Switchboard dispatch wired to a live
//! NetworkManager, without any real interfaces present.
//!
//! Exercises:
//! 1. A channel with no current Solution is dropped before it ever
//!    reaches the network layer.
//! 2. A Solution naming an interface the NetworkManager hasn't discovered
//!    yet reaches `NetworkManager::send`, which logs and drops rather than
//!    panicking.
//! 3. Flow-statistics snapshots stay well-formed (P9: non-negative
//!    counters, `connected` a bool) even when nothing has ever connected.

use std::collections::HashMap;
use std::sync::Arc;

use adanet_core::clock::Clock;
use adanet_core::types::{Message, SolvedChannel, Solution};
use adanet_net::adapter::AgentRole;
use adanet_net::manager::{NetworkManager, NetworkManagerConfig};
use adanet_net::switchboard::Switchboard;
use bytes::Bytes;

fn build_manager() -> (Arc<NetworkManager>, Arc<Switchboard>) {
    let clock = Arc::new(Clock::default());
    let network_cell: Arc<std::sync::OnceLock<Arc<NetworkManager>>> =
        Arc::new(std::sync::OnceLock::new());
    let switchboard = Arc::new(Switchboard::new(Arc::new({
        let network_cell = network_cell.clone();
        move |iface: &str, msg: Message| {
            if let Some(network) = network_cell.get() {
                network.send(iface, msg);
            }
        }
    })));
    let manager = Arc::new(NetworkManager::new(
        AgentRole::Source,
        None,
        HashMap::new(),
        NetworkManagerConfig::default(),
        clock,
        switchboard.clone(),
        "test-process",
    ));
    network_cell.set(manager.clone()).unwrap();
    (manager, switchboard)
}

#[test]
fn unrouted_channel_never_reaches_network_layer() {
    let (manager, switchboard) = build_manager();
    switchboard.send(Message::new("telemetry", 0.0, Bytes::new()));
    assert!(manager.link_statistics().is_empty());
}

#[test]
fn solution_naming_undiscovered_interface_drops_without_panicking() {
    let (manager, switchboard) = build_manager();
    switchboard.update_solution(&Solution {
        assignments: vec![SolvedChannel {
            name: "telemetry".into(),
            frequency: 10.0,
            interfaces: vec!["wlan0".into()],
        }],
        problem_name: "p".into(),
    });

    switchboard.send(Message::new("telemetry", 0.0, Bytes::from_static(b"x")));

    for stats in manager.link_statistics().values() {
        assert!(stats.counter as i64 >= 0);
        assert!(stats.volume as i64 >= 0);
        assert!(stats.speed >= 0.0);
    }
}
