//! `NetworkManager`: discovers interfaces, owns an `Adapter` per usable
//! interface, routes messages to/from adapters, and aggregates per-interface
//! and per-channel flow statistics.

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use adanet_core::clock::Clock;
use adanet_core::shutdown::{ShutdownHandle, ShutdownRegistry};
use adanet_core::types::Message;

use crate::adapter::{Adapter, AdapterConfig, AgentRole};
use crate::discovery::{network_matches, PeerDiscovery};
use crate::interface;
use crate::switchboard::Switchboard;

/// Snapshot of a single interface or channel's flow statistics.
/// `reset()` restarts the rate window but preserves `volume`, per the
/// source's documented counter semantics.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlowStatistics {
    pub counter: u64,
    pub frequency: f64,
    pub volume: u64,
    pub speed: f64,
    pub connected: bool,
}

struct FlowCounter {
    counter: u64,
    volume: u64,
    window_start: std::time::Instant,
    window_bytes: u64,
}

impl Default for FlowCounter {
    fn default() -> Self {
        FlowCounter {
            counter: 0,
            volume: 0,
            window_start: std::time::Instant::now(),
            window_bytes: 0,
        }
    }
}

impl FlowCounter {
    fn record(&mut self, bytes: u64) {
        self.counter += 1;
        self.volume += bytes;
        self.window_bytes += bytes;
    }

    fn snapshot(&self, connected: bool) -> FlowStatistics {
        let elapsed = self.window_start.elapsed().as_secs_f64().max(1e-6);
        FlowStatistics {
            counter: self.counter,
            frequency: self.counter as f64 / elapsed,
            volume: self.volume,
            speed: self.window_bytes as f64 / elapsed,
            connected,
        }
    }

    /// Restart the rate window; `volume` (bytes-so-far) is preserved.
    fn reset_window(&mut self) {
        self.window_start = std::time::Instant::now();
        self.window_bytes = 0;
    }
}

pub struct NetworkManagerConfig {
    pub discovery_every: Duration,
    /// Cadence for the periodic link/channel statistics log line.
    pub log_every: Duration,
    pub adapter_config: AdapterConfig,
    /// Fixed TCP port every Sink adapter binds its Pipe on and announces;
    /// Source adapters connect to peers observed at this port.
    pub pipe_port: u16,
}

impl Default for NetworkManagerConfig {
    fn default() -> Self {
        NetworkManagerConfig {
            discovery_every: Duration::from_secs(5),
            log_every: Duration::from_secs(10),
            adapter_config: AdapterConfig::default(),
            pipe_port: 5555,
        }
    }
}

impl NetworkManagerConfig {
    /// Build from `NETWORK_IFACES_DISCOVERY_EVERY_SECS`/`NETWORK_LOG_EVERY_SECS`
    /// and `AdapterConfig::from_env`, falling back to defaults per field.
    pub fn from_env() -> Self {
        let default = Self::default();
        NetworkManagerConfig {
            discovery_every: env_secs("NETWORK_IFACES_DISCOVERY_EVERY_SECS")
                .unwrap_or(default.discovery_every),
            log_every: env_secs("NETWORK_LOG_EVERY_SECS").unwrap_or(default.log_every),
            adapter_config: AdapterConfig::from_env(),
            pipe_port: default.pipe_port,
        }
    }
}

fn env_secs(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|v| *v > 0.0)
        .map(Duration::from_secs_f64)
}

/// Enumerates interfaces, owns an `Adapter` per usable interface, aggregates
/// flow statistics under a single mutex (statistics snapshots copy under
/// lock and return the copy).
pub struct NetworkManager {
    role: AgentRole,
    config: NetworkManagerConfig,
    clock: Arc<Clock>,
    zmq_ctx: zmq::Context,
    whitelist: Option<Vec<String>>,

    adapters: Mutex<HashMap<String, Arc<Adapter>>>,
    networks: Mutex<HashMap<String, Option<ipnet::Ipv4Net>>>,
    /// Per-interface `server` override from the problem file's `Link`
    /// declarations; a Source with an entry here dials it directly instead
    /// of waiting on peer discovery.
    static_servers: HashMap<String, Ipv4Addr>,
    link_stats: Mutex<HashMap<String, FlowCounter>>,
    channel_stats: Mutex<HashMap<String, FlowCounter>>,

    switchboard: Arc<Switchboard>,
    discovery: Option<PeerDiscovery>,
}

impl NetworkManager {
    /// `process_key` identifies this OS process so its own mDNS
    /// advertisements are filtered back out of `discovery`'s observed list
    /// (Source and Sink both advertise under the same service type).
    pub fn new(
        role: AgentRole,
        whitelist: Option<Vec<String>>,
        static_servers: HashMap<String, Ipv4Addr>,
        config: NetworkManagerConfig,
        clock: Arc<Clock>,
        switchboard: Arc<Switchboard>,
        process_key: impl Into<String>,
    ) -> Self {
        let discovery = match PeerDiscovery::new(process_key.into()) {
            Ok(d) => Some(d),
            Err(e) => {
                tracing::warn!(error = %e, "peer discovery unavailable, falling back to no auto-connect");
                None
            }
        };
        NetworkManager {
            role,
            config,
            clock,
            zmq_ctx: zmq::Context::new(),
            whitelist,
            adapters: Mutex::new(HashMap::new()),
            networks: Mutex::new(HashMap::new()),
            static_servers,
            link_stats: Mutex::new(HashMap::new()),
            channel_stats: Mutex::new(HashMap::new()),
            switchboard,
            discovery,
        }
    }

    pub fn adapter(&self, name: &str) -> Option<Arc<Adapter>> {
        self.adapters.lock().unwrap().get(name).cloned()
    }

    pub fn adapters(&self) -> Vec<Arc<Adapter>> {
        self.adapters.lock().unwrap().values().cloned().collect()
    }

    /// Interfaces that are both active and connected: the set the Engine's
    /// formulate step offers to the Solver.
    pub fn usable_interfaces(&self) -> Vec<Arc<Adapter>> {
        self.adapters
            .lock()
            .unwrap()
            .values()
            .filter(|a| a.is_present() && a.is_connected())
            .cloned()
            .collect()
    }

    /// `send(interface, message)`: drop with an error log if the interface
    /// has no adapter; else count bytes and delegate to the adapter.
    pub fn send(&self, interface: &str, message: Message) {
        let adapter = match self.adapter(interface) {
            Some(a) => a,
            None => {
                tracing::error!(interface = %interface, "send: no adapter for interface");
                return;
            }
        };
        let bytes = message.payload.len() as u64;
        {
            let mut stats = self.link_stats.lock().unwrap();
            stats.entry(interface.to_string()).or_default().record(bytes);
        }
        {
            let mut stats = self.channel_stats.lock().unwrap();
            stats
                .entry(message.channel.to_string())
                .or_default()
                .record(bytes);
        }
        adapter.send(&message);
    }

    /// `recv(interface, message)`: count bytes, forward up to Switchboard.
    pub fn recv(&self, interface: &str, message: Message) {
        let bytes = message.payload.len() as u64;
        {
            let mut stats = self.link_stats.lock().unwrap();
            stats.entry(interface.to_string()).or_default().record(bytes);
        }
        {
            let mut stats = self.channel_stats.lock().unwrap();
            stats
                .entry(message.channel.to_string())
                .or_default()
                .record(bytes);
        }
        self.switchboard.recv(message);
    }

    pub fn link_statistics(&self) -> HashMap<String, FlowStatistics> {
        let adapters = self.adapters.lock().unwrap();
        let mut stats = self.link_stats.lock().unwrap();
        adapters
            .iter()
            .map(|(name, adapter)| {
                let counter = stats.entry(name.clone()).or_default();
                (name.clone(), counter.snapshot(adapter.is_connected()))
            })
            .collect()
    }

    pub fn channel_statistics(&self) -> HashMap<String, FlowStatistics> {
        self.channel_stats
            .lock()
            .unwrap()
            .iter()
            .map(|(name, counter)| (name.clone(), counter.snapshot(true)))
            .collect()
    }

    pub fn reset_statistics(&self) {
        for counter in self.link_stats.lock().unwrap().values_mut() {
            counter.reset_window();
        }
        for counter in self.channel_stats.lock().unwrap().values_mut() {
            counter.reset_window();
        }
    }

    /// Run the discovery loop until `handle` signals shutdown. Should be
    /// called from its own OS thread.
    pub fn run_discovery_loop(self: &Arc<Self>, registry: &ShutdownRegistry, handle: ShutdownHandle) {
        let allowed_kinds = interface::allowed_kinds_from_env();

        if let Some(discovery) = &self.discovery {
            if let Err(e) = discovery.spawn_observer(self.role, handle.clone()) {
                tracing::warn!(error = %e, "failed to start peer discovery observer");
            }
        }

        while !handle.should_stop() {
            let observed = interface::enumerate();
            let mut present_names: Vec<String> = Vec::new();

            for os_iface in &observed {
                if let Some(whitelist) = &self.whitelist {
                    if !whitelist.iter().any(|w| w == &os_iface.name) {
                        continue;
                    }
                }
                if let Some(kinds) = &allowed_kinds {
                    if !kinds.contains(&os_iface.kind) {
                        continue;
                    }
                }
                present_names.push(os_iface.name.clone());

                let mut adapters = self.adapters.lock().unwrap();
                if let Some(existing) = adapters.get(&os_iface.name) {
                    existing.mark_ipv4(os_iface.ipv4);
                    self.networks
                        .lock()
                        .unwrap()
                        .insert(os_iface.name.clone(), os_iface.network);
                    continue;
                }

                match Adapter::new(
                    os_iface.name.clone(),
                    self.role,
                    self.static_servers.get(&os_iface.name).copied(),
                    self.config.adapter_config,
                    self.clock.clone(),
                    &self.zmq_ctx,
                ) {
                    Ok(adapter) => {
                        adapter.mark_ipv4(os_iface.ipv4);
                        self.networks
                            .lock()
                            .unwrap()
                            .insert(os_iface.name.clone(), os_iface.network);
                        let adapter = Arc::new(adapter);
                        let worker_handle =
                            registry.register(format!("adapter:{}", os_iface.name), 50);
                        let manager = self.clone();
                        let iface_name = os_iface.name.clone();
                        adapter.spawn_workers(worker_handle, move |msg| {
                            manager.recv(&iface_name, msg);
                        });
                        tracing::info!(interface = %os_iface.name, "new interface adapter started");
                        adapters.insert(os_iface.name.clone(), adapter);
                    }
                    Err(e) => {
                        tracing::warn!(interface = %os_iface.name, error = %e, "failed to construct adapter");
                    }
                }
            }

            {
                let adapters = self.adapters.lock().unwrap();
                for (name, adapter) in adapters.iter() {
                    if !present_names.contains(name) {
                        adapter.mark_lost();
                        tracing::info!(interface = %name, "interface lost");
                    }
                }
            }

            self.reconcile_discovery();

            std::thread::sleep(self.clock.period(self.config.discovery_every));
        }
    }

    /// Bind/announce (Sink) or observe/connect (Source) each present
    /// adapter against the peer-discovery service. A no-op when discovery
    /// failed to start (e.g. no mDNS responder available).
    fn reconcile_discovery(&self) {
        let adapters = self.adapters.lock().unwrap();
        let networks = self.networks.lock().unwrap();

        for (name, adapter) in adapters.iter() {
            if !adapter.is_present() {
                continue;
            }
            let Some(local_ip) = adapter.local_ip() else {
                continue;
            };

            match self.role {
                AgentRole::Sink => {
                    if adapter.is_bound() {
                        continue;
                    }
                    match adapter.bind(local_ip, self.config.pipe_port) {
                        Ok(_) => {
                            if let (Some(discovery), Some(Some(network))) =
                                (&self.discovery, networks.get(name))
                            {
                                if let Err(e) = discovery.announce(
                                    self.role,
                                    name,
                                    local_ip,
                                    *network,
                                    self.config.pipe_port,
                                ) {
                                    tracing::warn!(interface = %name, error = %e, "peer announce failed");
                                }
                            }
                        }
                        Err(e) => tracing::warn!(interface = %name, error = %e, "bind failed"),
                    }
                }
                AgentRole::Source => {
                    if adapter.has_peer() {
                        continue;
                    }
                    // A link with a static `server` address skips discovery
                    // entirely and dials it directly.
                    if let Some(server) = adapter.static_server() {
                        let addr = NetworkManager::static_peer_endpoint(server, self.config.pipe_port);
                        if let Err(e) = adapter.connect(&addr) {
                            tracing::warn!(interface = %name, peer = %addr, error = %e, "static connect failed");
                        } else {
                            tracing::info!(interface = %name, peer = %addr, "connected to static server");
                        }
                        continue;
                    }
                    let Some(discovery) = &self.discovery else {
                        continue;
                    };
                    let peer = discovery
                        .observed()
                        .into_iter()
                        .find(|p| p.role == AgentRole::Sink && network_matches(p, local_ip));
                    if let Some(peer) = peer {
                        let addr = format!("tcp://{}:{}", peer.address, peer.port);
                        if let Err(e) = adapter.connect(&addr) {
                            tracing::warn!(interface = %name, peer = %addr, error = %e, "connect failed");
                        } else {
                            tracing::info!(interface = %name, peer = %addr, "connected to discovered peer");
                        }
                    }
                }
            }
        }
    }

    /// Log a summary line of every interface's and channel's current
    /// `FlowStatistics`, at `NETWORK_LOG_EVERY_SECS` cadence, until `handle`
    /// signals shutdown.
    pub fn run_stats_logger_loop(&self, handle: &ShutdownHandle) {
        while !handle.should_stop() {
            for (name, stats) in self.link_statistics() {
                tracing::info!(
                    interface = %name, connected = stats.connected, counter = stats.counter,
                    frequency = stats.frequency, speed = stats.speed, "link statistics"
                );
            }
            for (name, stats) in self.channel_statistics() {
                tracing::info!(
                    channel = %name, counter = stats.counter, frequency = stats.frequency,
                    speed = stats.speed, "channel statistics"
                );
            }
            std::thread::sleep(self.clock.period(self.config.log_every));
        }
    }

    /// Resolve a peer's bound address on `interface` by its IPv4 address,
    /// for Source-role bring-up against a static `server` override.
    pub fn static_peer_endpoint(server: Ipv4Addr, port: u16) -> String {
        format!("tcp://{server}:{port}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_statistics_start_empty() {
        let clock = Arc::new(Clock::default());
        let switchboard = Arc::new(Switchboard::new(Arc::new(|_: &str, _| {})));
        let manager = NetworkManager::new(
            AgentRole::Source,
            None,
            HashMap::new(),
            NetworkManagerConfig::default(),
            clock,
            switchboard,
            "test-process",
        );
        assert!(manager.link_statistics().is_empty());
    }

    #[test]
    fn send_to_unknown_interface_does_not_panic() {
        let clock = Arc::new(Clock::default());
        let switchboard = Arc::new(Switchboard::new(Arc::new(|_: &str, _| {})));
        let manager = NetworkManager::new(
            AgentRole::Source,
            None,
            HashMap::new(),
            NetworkManagerConfig::default(),
            clock,
            switchboard,
            "test-process",
        );
        manager.send(
            "wlan0",
            Message::new("a", 0.0, bytes::Bytes::new()),
        );
    }
}
