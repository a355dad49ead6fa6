//! Drives `--simulation` mode: replaces live Source backends and measured
//! link statistics with values computed from the problem file's
//! `simulation` block, each an arithmetic script re-evaluated every tick
//! instead of being read off real hardware.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use compact_str::CompactString;

use adanet_core::clock::Clock;
use adanet_core::config::SimulationConfig;
use adanet_core::types::Channel;

use crate::source::SourceBackend;

/// Evaluates a resolved [`SimulationConfig`] against the time elapsed
/// since the Engine started.
pub struct Simulator {
    config: SimulationConfig,
    clock: Arc<Clock>,
    start: f64,
}

impl Simulator {
    pub fn new(config: SimulationConfig, clock: Arc<Clock>) -> Arc<Self> {
        let start = clock.elapsed_secs();
        Arc::new(Simulator { config, clock, start })
    }

    pub fn relative_time(&self) -> f64 {
        self.clock.elapsed_secs() - self.start
    }

    /// Scripted frequency for `channel`, evaluated at `t` with `c` bound to
    /// `baseline` (the channel's declared nominal frequency). `None` if the
    /// simulation block has no override for this channel.
    pub fn channel_frequency(&self, channel: &str, t: f64, baseline: f64) -> Option<f64> {
        let expr = self.config.channels.get(channel)?;
        Some(expr.eval(t, baseline, 0.0))
    }

    /// Scripted `(bandwidth, latency)` for `interface` at time `t`. Falls
    /// back field-by-field to the supplied baselines when the script omits
    /// one of them. `None` if there's no override for this interface at
    /// all.
    pub fn link_override(
        &self,
        interface: &str,
        t: f64,
        baseline_bandwidth: f64,
        baseline_latency: f64,
    ) -> Option<(f64, f64)> {
        let link = self.config.links.get(interface)?;
        let bandwidth = link
            .bandwidth
            .as_ref()
            .map(|e| e.eval(t, 0.0, baseline_bandwidth))
            .unwrap_or(baseline_bandwidth);
        let latency = link
            .latency
            .as_ref()
            .map(|e| e.eval(t, 0.0, baseline_latency))
            .unwrap_or(baseline_latency);
        Some((bandwidth, latency))
    }

    pub fn link_names(&self) -> impl Iterator<Item = &CompactString> {
        self.config.links.keys()
    }

    /// A synthetic backend for `channel`, driven by the simulation's
    /// `channels` script where one exists, falling back to the channel's
    /// own declared frequency otherwise.
    pub fn backend_for(self: &Arc<Self>, channel: &Channel) -> Arc<dyn SourceBackend> {
        Arc::new(SimulatedBackend {
            simulator: self.clone(),
            name: channel.name.clone(),
            baseline: channel.frequency,
            size: channel.size.unwrap_or(256) as usize,
            counter: AtomicU64::new(0),
        })
    }
}

struct SimulatedBackend {
    simulator: Arc<Simulator>,
    name: CompactString,
    baseline: f64,
    size: usize,
    counter: AtomicU64,
}

impl SourceBackend for SimulatedBackend {
    fn frequency(&self) -> f64 {
        let t = self.simulator.relative_time();
        self.simulator
            .channel_frequency(&self.name, t, self.baseline)
            .unwrap_or(self.baseline)
            .max(0.0)
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

#[cfg(test)]
mod tests {
    use super::*;
    use adanet_core::config::ProblemInput;
    use adanet_core::types::{ChannelKind, Qos};

    fn sim_from_yaml(yaml: &str) -> Arc<Simulator> {
        let input = ProblemInput::from_yaml_str(yaml).unwrap();
        let (_, sim) = input.resolve("stem").unwrap();
        Simulator::new(sim.expect("simulation block"), Arc::new(Clock::from_env()))
    }

    #[test]
    fn channel_without_override_falls_back_to_baseline() {
        let sim = sim_from_yaml(
            r#"
channels:
  - name: telemetry
    kind: simulated
    frequency: 10
simulation:
  channels:
    - name: other
      frequency: 99
"#,
        );
        assert_eq!(sim.channel_frequency("telemetry", 0.0, 10.0), None);
    }

    #[test]
    fn link_override_fills_missing_field_from_baseline() {
        let sim = sim_from_yaml(
            r#"
channels: []
simulation:
  links:
    - interface: wlan0
      bandwidth: 2000
"#,
        );
        let (bandwidth, latency) = sim.link_override("wlan0", 0.0, 500.0, 0.02).unwrap();
        assert_eq!(bandwidth, 2000.0);
        assert_eq!(latency, 0.02);
    }

    #[test]
    fn backend_reports_scripted_frequency() {
        let sim = sim_from_yaml(
            r#"
channels:
  - name: telemetry
    kind: simulated
    frequency: 10
simulation:
  channels:
    - name: telemetry
      frequency: "c * 2"
"#,
        );
        let channel = Channel {
            name: "telemetry".into(),
            kind: ChannelKind::Simulated,
            priority: 0,
            frequency: 10.0,
            size: Some(64),
            qos: Qos::default(),
            queue_length: 0,
        };
        let backend = sim.backend_for(&channel);
        assert_eq!(backend.frequency(), 20.0);
        assert!(backend.produce().is_some());
    }
}
