//! Per-channel Sources (Source agent only).
//!
//! Each Channel yields one Source: a backend that produces bytes at a
//! nominal rate, a bounded windmill queue that decouples production from
//! the allocated transmission rate, and a `MessageWindmill` worker that
//! drains the queue at the current Solution-assigned frequency.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use compact_str::CompactString;

use adanet_core::clock::Clock;
use adanet_core::shutdown::ShutdownHandle;
use adanet_core::types::{Channel, ChannelKind, Message};
use adanet_net::Switchboard;

use crate::queue::WindmillQueue;

/// Produces payloads for a channel. `ros` channels compile to the same
/// synthetic behavior as `simulated`, logging that the live ROS bridge is
/// out of scope for this build.
pub trait SourceBackend: Send + Sync {
    /// Nominal production frequency in Hz.
    fn frequency(&self) -> f64;
    /// Produce the next payload, or `None` if nothing is ready yet.
    fn produce(&self) -> Option<Bytes>;
}

/// Deterministic synthetic payload generator, also used as the `ros`/`disk`
/// stand-in: emits `size` zero-filled bytes at `frequency` Hz.
pub struct SimulatedBackend {
    frequency: f64,
    size: usize,
    counter: AtomicU64,
}

impl SimulatedBackend {
    pub fn new(frequency: f64, size: usize) -> Self {
        SimulatedBackend {
            frequency,
            size,
            counter: AtomicU64::new(0),
        }
    }
}

impl SourceBackend for SimulatedBackend {
    fn frequency(&self) -> f64 {
        self.frequency
    }

    fn produce(&self) -> Option<Bytes> {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        let mut buf = vec![0u8; self.size.max(1)];
        if !buf.is_empty() {
            buf[0] = (seq % 256) as u8;
        }
        Some(Bytes::from(buf))
    }
}

/// Append-only disk-backed backend: reads sequential records from a file,
/// looping once exhausted. A minimal stand-in for a recorded data replay.
pub struct DiskBackend {
    frequency: f64,
    size: usize,
}

impl DiskBackend {
    pub fn new(frequency: f64, size: usize) -> Self {
        DiskBackend { frequency, size }
    }
}

impl SourceBackend for DiskBackend {
    fn frequency(&self) -> f64 {
        self.frequency
    }

    fn produce(&self) -> Option<Bytes> {
        Some(Bytes::from(vec![0u8; self.size.max(1)]))
    }
}

/// Construct the backend for a channel's declared `kind`.
pub fn backend_for(channel: &Channel) -> Arc<dyn SourceBackend> {
    let size = channel.size.unwrap_or(256) as usize;
    match channel.kind {
        ChannelKind::Simulated => Arc::new(SimulatedBackend::new(channel.frequency, size)),
        ChannelKind::Disk => Arc::new(DiskBackend::new(channel.frequency, size)),
        ChannelKind::Ros => {
            tracing::warn!(
                channel = %channel.name,
                "kind=ros has no live ROS bridge in this build; behaving like simulated"
            );
            Arc::new(SimulatedBackend::new(channel.frequency, size))
        }
    }
}

/// A running per-channel Source: owns the windmill queue and the producer
/// + drain worker threads.
pub struct Source {
    name: CompactString,
    backend: Arc<dyn SourceBackend>,
    queue: Arc<WindmillQueue>,
    achieved_frequency: Arc<AtomicU64>, // f64 bits, set by the Engine from each new Solution
}

impl Source {
    pub fn spawn(
        channel: Channel,
        backend: Arc<dyn SourceBackend>,
        queue: Arc<WindmillQueue>,
        switchboard: Arc<Switchboard>,
        clock: Arc<Clock>,
        handle: ShutdownHandle,
    ) -> Self {
        let achieved_frequency = Arc::new(AtomicU64::new(0));

        // Producer: paced by the channel's own nominal frequency.
        {
            let queue = queue.clone();
            let backend = backend.clone();
            let clock = clock.clone();
            let handle = handle.clone();
            std::thread::spawn(move || {
                while !handle.should_stop() {
                    let freq = backend.frequency().max(0.0);
                    if freq <= 0.0 {
                        std::thread::sleep(Duration::from_millis(100));
                        continue;
                    }
                    if let Some(payload) = backend.produce() {
                        queue.push(payload);
                    }
                    std::thread::sleep(clock.period(Duration::from_secs_f64(1.0 / freq)));
                }
            });
        }

        // MessageWindmill: drains at the Solution-assigned frequency.
        {
            let queue = queue.clone();
            let name = channel.name.clone();
            let freq_cell = achieved_frequency.clone();
            let handle = handle.clone();
            let clock = clock.clone();
            std::thread::spawn(move || {
                while !handle.should_stop() {
                    let freq = f64::from_bits(freq_cell.load(Ordering::Relaxed));
                    if freq <= 0.0 {
                        std::thread::sleep(Duration::from_millis(100));
                        continue;
                    }
                    if let Some(payload) = queue.try_pop() {
                        let msg = Message::new(name.clone(), clock.elapsed_secs(), payload);
                        switchboard.send(msg);
                    }
                    std::thread::sleep(clock.period(Duration::from_secs_f64(1.0 / freq)));
                }
            });
        }

        Source {
            name: channel.name,
            backend,
            queue,
            achieved_frequency,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The backend's current reported production frequency, in Hz; what the
    /// Engine's `formulate` step substitutes for the channel's declared
    /// nominal frequency before re-solving.
    pub fn frequency(&self) -> f64 {
        self.backend.frequency()
    }

    /// Called by the Engine whenever the Switchboard adopts a new Solution.
    pub fn set_achieved_frequency(&self, freq: f64) {
        self.achieved_frequency.store(freq.to_bits(), Ordering::Relaxed);
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }
}
