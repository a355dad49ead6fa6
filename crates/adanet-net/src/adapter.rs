//! `Adapter`: the per-interface state machine.
//!
//! Each Adapter owns a [`crate::pipe::Pipe`] and a handful of cooperatively
//! scheduled worker threads (bandwidth, ping, reconnect, mailman) that keep
//! its observable state (present/absent, linked/unlinked, pinged/unpinged,
//! connected/disconnected) current.

use std::net::{Ipv4Addr, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use adanet_core::clock::Clock;
use adanet_core::shutdown::ShutdownHandle;
use adanet_core::types::Message;

use crate::error::Result;
use crate::pipe::Pipe;

/// Whether this process plays the Source or Sink role for the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentRole {
    Source,
    Sink,
}

/// Periods for the Adapter's worker threads; all are scaled through the
/// shared [`Clock`] so `TIME_SPEED` accelerates them uniformly.
#[derive(Debug, Clone, Copy)]
pub struct AdapterConfig {
    pub bandwidth_check_every: Duration,
    pub ping_check_every: Duration,
    pub heartbeat_every: Duration,
    pub force_reconnect_after: Duration,
    pub ping_timeout: Duration,
    /// Size of the bandwidth max-window (W in §4.4).
    pub bandwidth_window: usize,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        AdapterConfig {
            bandwidth_check_every: Duration::from_secs(1),
            ping_check_every: Duration::from_secs(1),
            heartbeat_every: Duration::from_secs(1),
            force_reconnect_after: Duration::from_secs(5),
            ping_timeout: Duration::from_secs(5),
            bandwidth_window: 5,
        }
    }
}

impl AdapterConfig {
    /// Build from `IFACE_BANDWIDTH_CHECK_EVERY_SECS`/`IFACE_PING_CHECK_EVERY_SECS`,
    /// falling back to the hardcoded defaults per field.
    pub fn from_env() -> Self {
        let default = Self::default();
        AdapterConfig {
            bandwidth_check_every: env_secs("IFACE_BANDWIDTH_CHECK_EVERY_SECS")
                .unwrap_or(default.bandwidth_check_every),
            ping_check_every: env_secs("IFACE_PING_CHECK_EVERY_SECS")
                .unwrap_or(default.ping_check_every),
            ..default
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

struct MaxWindow {
    samples: Mutex<Vec<f64>>,
    capacity: usize,
}

impl MaxWindow {
    fn new(capacity: usize) -> Self {
        MaxWindow {
            samples: Mutex::new(Vec::with_capacity(capacity)),
            capacity: capacity.max(1),
        }
    }

    fn push(&self, value: f64) -> f64 {
        let mut samples = self.samples.lock().unwrap();
        samples.push(value);
        if samples.len() > self.capacity {
            samples.remove(0);
        }
        samples.iter().cloned().fold(0.0, f64::max)
    }
}

/// The per-interface driver managing link state, measurement, and the Pipe
/// socket pair. Constructed by `NetworkManager` when an interface first
/// appears, torn down when it disappears; the state machine is resilient to
/// transient link loss in between.
pub struct Adapter {
    interface: String,
    role: AgentRole,
    pipe: Arc<Pipe>,
    config: AdapterConfig,
    clock: Arc<Clock>,

    present: AtomicBool,
    linked: AtomicBool,
    has_ping: AtomicBool,
    bandwidth_out_bits: AtomicU64,
    bandwidth_in_bits: AtomicU64,
    latency_bits: AtomicU64,

    bandwidth_out_window: MaxWindow,
    bandwidth_in_window: MaxWindow,

    peer_addr: Mutex<Option<String>>,
    static_server: Option<Ipv4Addr>,

    bound_addr: Mutex<Option<String>>,
    local_ip: Mutex<Option<Ipv4Addr>>,
}

impl Adapter {
    pub fn new(
        interface: impl Into<String>,
        role: AgentRole,
        static_server: Option<Ipv4Addr>,
        config: AdapterConfig,
        clock: Arc<Clock>,
        zmq_ctx: &zmq::Context,
    ) -> Result<Self> {
        Ok(Adapter {
            interface: interface.into(),
            role,
            pipe: Arc::new(Pipe::new(zmq_ctx)?),
            config,
            clock,
            present: AtomicBool::new(true),
            linked: AtomicBool::new(false),
            has_ping: AtomicBool::new(false),
            bandwidth_out_bits: AtomicU64::new(0),
            bandwidth_in_bits: AtomicU64::new(0),
            latency_bits: AtomicU64::new(f64::INFINITY.to_bits()),
            bandwidth_out_window: MaxWindow::new(config.bandwidth_window),
            bandwidth_in_window: MaxWindow::new(config.bandwidth_window),
            peer_addr: Mutex::new(None),
            static_server,
            bound_addr: Mutex::new(None),
            local_ip: Mutex::new(None),
        })
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn role(&self) -> AgentRole {
        self.role
    }

    pub fn is_present(&self) -> bool {
        self.present.load(Ordering::Relaxed)
    }

    pub fn is_linked(&self) -> bool {
        self.linked.load(Ordering::Relaxed)
    }

    pub fn has_ping(&self) -> bool {
        self.has_ping.load(Ordering::Relaxed)
    }

    pub fn is_connected(&self) -> bool {
        self.is_linked() && self.pipe.is_connected(self.config.heartbeat_every)
    }

    pub fn latency(&self) -> f64 {
        f64::from_bits(self.latency_bits.load(Ordering::Relaxed))
    }

    pub fn bandwidth_out(&self) -> f64 {
        f64::from_bits(self.bandwidth_out_bits.load(Ordering::Relaxed))
    }

    pub fn bandwidth_in(&self) -> f64 {
        f64::from_bits(self.bandwidth_in_bits.load(Ordering::Relaxed))
    }

    /// `max(IFACE_MIN_BANDWIDTH_BYTES_SEC, window_max(out) * (1 + optimism))`
    /// when active and linked, else 0 (§4.4).
    pub fn estimated_bandwidth_out(&self) -> f64 {
        if !self.is_connected() {
            return 0.0;
        }
        let window_max = self.bandwidth_out();
        (adanet_core::config::IFACE_MIN_BANDWIDTH_BYTES_SEC)
            .max(window_max * (1.0 + adanet_core::config::IFACE_BANDWIDTH_OPTIMISM))
    }

    pub fn mark_lost(&self) {
        self.present.store(false, Ordering::Relaxed);
        self.linked.store(false, Ordering::Relaxed);
    }

    pub fn mark_ipv4(&self, ip: Option<Ipv4Addr>) {
        self.linked.store(ip.is_some(), Ordering::Relaxed);
        *self.local_ip.lock().unwrap() = ip;
        if ip.is_none() {
            self.latency_bits
                .store(f64::INFINITY.to_bits(), Ordering::Relaxed);
            self.bandwidth_out_bits.store(0, Ordering::Relaxed);
            self.bandwidth_in_bits.store(0, Ordering::Relaxed);
        }
    }

    pub fn local_ip(&self) -> Option<Ipv4Addr> {
        *self.local_ip.lock().unwrap()
    }

    pub fn is_bound(&self) -> bool {
        self.bound_addr.lock().unwrap().is_some()
    }

    pub fn has_peer(&self) -> bool {
        self.peer_addr.lock().unwrap().is_some()
    }

    /// Sink role bring-up: bind the Pipe to `local_ip` on an ephemeral (or
    /// configured) port and return the endpoint for peer-discovery
    /// announcement.
    pub fn bind(&self, local_ip: Ipv4Addr, port: u16) -> Result<String> {
        let addr = format!("tcp://{local_ip}:{port}");
        let bound = self.pipe.bind(&addr)?;
        *self.bound_addr.lock().unwrap() = Some(bound.clone());
        Ok(bound)
    }

    /// Source role bring-up, or reconnect after sustained ping-without-link.
    pub fn connect(&self, peer_addr: &str) -> Result<()> {
        self.pipe.connect(peer_addr)?;
        *self.peer_addr.lock().unwrap() = Some(peer_addr.to_string());
        Ok(())
    }

    pub fn peer_addr(&self) -> Option<String> {
        self.peer_addr.lock().unwrap().clone()
    }

    pub fn static_server(&self) -> Option<Ipv4Addr> {
        self.static_server
    }

    /// `send(m)`: if not connected, drop silently; else hand to the Pipe.
    pub fn send(&self, msg: &Message) {
        if !self.is_connected() {
            tracing::trace!(interface = %self.interface, "dropping send: not connected");
            return;
        }
        if let Err(e) = self.pipe.send_user(msg) {
            tracing::debug!(interface = %self.interface, error = %e, "transient send failure");
        }
    }

    pub fn pipe(&self) -> Arc<Pipe> {
        self.pipe.clone()
    }

    /// Spawn the BandwidthWorker/PingWorker/ReconnectWorker/Heartbeat
    /// threads. `on_recv` is invoked from the Mailman thread with each
    /// successfully decoded USER message.
    pub fn spawn_workers<F>(self: &Arc<Self>, handle: ShutdownHandle, on_recv: F) -> Vec<std::thread::JoinHandle<()>>
    where
        F: Fn(Message) + Send + Sync + 'static,
    {
        let mut handles = Vec::new();

        {
            let adapter = self.clone();
            let handle = handle.clone();
            handles.push(std::thread::spawn(move || {
                bandwidth_worker_loop(adapter, handle);
            }));
        }
        {
            let adapter = self.clone();
            let handle = handle.clone();
            handles.push(std::thread::spawn(move || {
                ping_worker_loop(adapter, handle);
            }));
        }
        {
            let adapter = self.clone();
            let handle = handle.clone();
            handles.push(std::thread::spawn(move || {
                reconnect_worker_loop(adapter, handle);
            }));
        }
        {
            let adapter = self.clone();
            let handle = handle.clone();
            handles.push(std::thread::spawn(move || {
                heartbeat_worker_loop(adapter, handle);
            }));
        }
        {
            let adapter = self.clone();
            let handle = handle.clone();
            let on_recv = Arc::new(on_recv);
            handles.push(std::thread::spawn(move || {
                mailman_loop(adapter, handle, on_recv);
            }));
        }

        handles
    }
}

fn bandwidth_worker_loop(adapter: Arc<Adapter>, handle: ShutdownHandle) {
    let mut last_counters: Option<(u64, u64, std::time::Instant)> = None;
    while !handle.should_stop() {
        if adapter.is_linked() {
            if let Some((tx, rx)) = read_iface_byte_counters(&adapter.interface) {
                let now = std::time::Instant::now();
                if let Some((last_tx, last_rx, last_at)) = last_counters {
                    let elapsed = now.duration_since(last_at).as_secs_f64().max(1e-6);
                    let out_rate = tx.saturating_sub(last_tx) as f64 / elapsed;
                    let in_rate = rx.saturating_sub(last_rx) as f64 / elapsed;
                    let out_window = adapter.bandwidth_out_window.push(out_rate);
                    let in_window = adapter.bandwidth_in_window.push(in_rate);
                    adapter
                        .bandwidth_out_bits
                        .store(out_window.to_bits(), Ordering::Relaxed);
                    adapter
                        .bandwidth_in_bits
                        .store(in_window.to_bits(), Ordering::Relaxed);
                }
                last_counters = Some((tx, rx, now));
            } else {
                // No readable OS counters (non-Linux, or the interface
                // disappeared between the link check and the read).
                last_counters = None;
            }
        } else {
            adapter.bandwidth_out_bits.store(0, Ordering::Relaxed);
            adapter.bandwidth_in_bits.store(0, Ordering::Relaxed);
            last_counters = None;
        }
        std::thread::sleep(adapter.clock.period(adapter.config.bandwidth_check_every));
    }
}

/// Read `(tx_bytes, rx_bytes)` from `/sys/class/net/<iface>/statistics/`.
/// Returns `None` if the path doesn't exist or isn't parseable (e.g. when
/// not running on Linux).
fn read_iface_byte_counters(iface: &str) -> Option<(u64, u64)> {
    let base = format!("/sys/class/net/{iface}/statistics");
    let tx = std::fs::read_to_string(format!("{base}/tx_bytes")).ok()?;
    let rx = std::fs::read_to_string(format!("{base}/rx_bytes")).ok()?;
    Some((tx.trim().parse().ok()?, rx.trim().parse().ok()?))
}

fn ping_worker_loop(adapter: Arc<Adapter>, handle: ShutdownHandle) {
    while !handle.should_stop() {
        if !adapter.is_linked() {
            adapter.has_ping.store(false, Ordering::Relaxed);
            adapter
                .latency_bits
                .store(f64::INFINITY.to_bits(), Ordering::Relaxed);
        } else if let Some(peer) = adapter.peer_addr() {
            let rtt = tcp_probe_rtt(&peer, adapter.config.ping_timeout);
            match rtt {
                Some(secs) => {
                    adapter.has_ping.store(true, Ordering::Relaxed);
                    adapter.latency_bits.store(secs.to_bits(), Ordering::Relaxed);
                }
                None => {
                    adapter.has_ping.store(false, Ordering::Relaxed);
                }
            }
        }
        std::thread::sleep(adapter.clock.period(adapter.config.ping_check_every));
    }
}

/// Stand-in for an ICMP ping: a TCP connect attempt to the peer's bound
/// socket, timed. Avoids requiring raw-socket privileges for the common
/// case where the peer's Pipe port is already known.
fn tcp_probe_rtt(peer_addr: &str, timeout: Duration) -> Option<f64> {
    let host_port = peer_addr.trim_start_matches("tcp://");
    let addr: std::net::SocketAddr = host_port.parse().ok()?;
    let start = std::time::Instant::now();
    TcpStream::connect_timeout(&addr, timeout).ok()?;
    Some(start.elapsed().as_secs_f64())
}

fn reconnect_worker_loop(adapter: Arc<Adapter>, handle: ShutdownHandle) {
    let mut unconnected_since: Option<std::time::Instant> = None;
    while !handle.should_stop() {
        if adapter.has_ping() && !adapter.is_connected() {
            let since = unconnected_since.get_or_insert_with(std::time::Instant::now);
            if since.elapsed() >= adapter.config.force_reconnect_after {
                if let Some(peer) = adapter.peer_addr() {
                    if let Err(e) = adapter.connect(&peer) {
                        tracing::debug!(interface = %adapter.interface, error = %e, "reconnect failed");
                    }
                }
                unconnected_since = None;
            }
        } else {
            unconnected_since = None;
        }
        std::thread::sleep(adapter.clock.period(Duration::from_secs(1)));
    }
}

fn heartbeat_worker_loop(adapter: Arc<Adapter>, handle: ShutdownHandle) {
    while !handle.should_stop() {
        if let Err(e) = adapter.pipe.send_heartbeat() {
            tracing::trace!(interface = %adapter.interface, error = %e, "heartbeat send failed");
        }
        std::thread::sleep(adapter.clock.period(adapter.config.heartbeat_every));
    }
}

fn mailman_loop(adapter: Arc<Adapter>, handle: ShutdownHandle, on_recv: Arc<dyn Fn(Message) + Send + Sync>) {
    while !handle.should_stop() {
        match adapter.pipe.try_recv() {
            Ok(Some(msg)) => on_recv(msg),
            Ok(None) => std::thread::sleep(Duration::from_millis(10)),
            Err(e) => {
                tracing::debug!(interface = %adapter.interface, error = %e, "recv failure");
                std::thread::sleep(Duration::from_millis(50));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimated_bandwidth_is_zero_when_disconnected() {
        let ctx = zmq::Context::new();
        let clock = Arc::new(Clock::default());
        let adapter = Adapter::new(
            "wlan0",
            AgentRole::Source,
            None,
            AdapterConfig::default(),
            clock,
            &ctx,
        )
        .unwrap();
        assert_eq!(adapter.estimated_bandwidth_out(), 0.0);
    }

    #[test]
    fn mark_lost_clears_present_and_linked() {
        let ctx = zmq::Context::new();
        let clock = Arc::new(Clock::default());
        let adapter = Adapter::new(
            "wlan0",
            AgentRole::Sink,
            None,
            AdapterConfig::default(),
            clock,
            &ctx,
        )
        .unwrap();
        adapter.mark_ipv4(Some(Ipv4Addr::new(10, 0, 0, 1)));
        assert!(adapter.is_linked());
        adapter.mark_lost();
        assert!(!adapter.is_present());
        assert!(!adapter.is_linked());
    }
}
