//! The Engine: the measure → formulate → solve → publish control loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use compact_str::CompactString;

use adanet_core::clock::Clock;
use adanet_core::shutdown::{ShutdownHandle, ShutdownRegistry, EVENT_LOOP_PRIORITY};
use adanet_core::solver::{self, SolverConfig};
use adanet_core::types::{Link, Problem};
use adanet_net::adapter::AgentRole;
use adanet_net::manager::NetworkManager;
use adanet_net::switchboard::Switchboard;

use crate::simulator::Simulator;
use crate::sink::Sink;
use crate::source::Source;

pub struct EngineConfig {
    pub delta_t: Duration,
    pub duration_limit: Option<Duration>,
    pub solver_config: SolverConfig,
}

/// Drives the measurement→formulate→solve→publish cycle (Source agent) or
/// idles while aggregating receive-side statistics (Sink agent).
pub struct Engine {
    role: AgentRole,
    problem_template: Problem,
    network: Arc<NetworkManager>,
    switchboard: Arc<Switchboard>,
    sources: Vec<Source>,
    sinks: HashMap<CompactString, Arc<Sink>>,
    clock: Arc<Clock>,
    simulator: Option<Arc<Simulator>>,
    config: EngineConfig,
}

impl Engine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        role: AgentRole,
        problem_template: Problem,
        network: Arc<NetworkManager>,
        switchboard: Arc<Switchboard>,
        sources: Vec<Source>,
        sinks: HashMap<CompactString, Arc<Sink>>,
        clock: Arc<Clock>,
        simulator: Option<Arc<Simulator>>,
        config: EngineConfig,
    ) -> Self {
        Engine {
            role,
            problem_template,
            network,
            switchboard,
            sources,
            sinks,
            clock,
            simulator,
            config,
        }
    }

    /// Run until `registry` signals shutdown (SIGINT, `stop()`, or the
    /// `--duration` limit being reached). Blocks the calling thread; callers
    /// spawn this on the outer control-loop thread.
    pub fn run(&self, registry: &ShutdownRegistry) {
        let handle = registry.register("engine", EVENT_LOOP_PRIORITY);
        let start = self.clock.elapsed_secs();

        match self.role {
            AgentRole::Source => self.run_source_loop(registry, &handle, start),
            AgentRole::Sink => self.run_sink_loop(registry, &handle, start),
        }
    }

    fn duration_exceeded(&self, start: f64) -> bool {
        match self.config.duration_limit {
            Some(limit) => self.clock.elapsed_secs() - start >= limit.as_secs_f64(),
            None => false,
        }
    }

    fn run_source_loop(&self, registry: &ShutdownRegistry, handle: &ShutdownHandle, start: f64) {
        while !handle.should_stop() {
            if self.duration_exceeded(start) {
                tracing::info!("duration limit reached, initiating shutdown");
                registry.shutdown_all();
                break;
            }

            let problem = self.formulate();
            let solve_start = std::time::Instant::now();
            let solution = solver::solve(&problem, &self.config.solver_config);
            tracing::debug!(elapsed_ms = solve_start.elapsed().as_millis(), "solved");

            self.switchboard.update_solution(&solution);
            for assignment in &solution.assignments {
                if let Some(source) = self.sources.iter().find(|s| s.name() == assignment.name) {
                    source.set_achieved_frequency(assignment.frequency);
                }
            }

            std::thread::sleep(self.clock.period(self.config.delta_t));
        }
    }

    fn run_sink_loop(&self, registry: &ShutdownRegistry, handle: &ShutdownHandle, start: f64) {
        while !handle.should_stop() {
            if self.duration_exceeded(start) {
                tracing::info!("duration limit reached, initiating shutdown");
                registry.shutdown_all();
                break;
            }
            // Receive-side statistics aggregation: periodically snapshot so
            // NETWORK_LOG_EVERY_SECS reporting has something to read.
            let _ = self.network.channel_statistics();
            std::thread::sleep(self.clock.period(Duration::from_secs(1)));
        }
        let _ = &self.sinks;
    }

    /// Build a new Problem by copying channel declarations, replacing each
    /// channel's `frequency` with the value its Source currently reports
    /// (or the simulation script's, if one overrides this channel), and
    /// replacing the links list with the currently usable set (again
    /// subject to simulation overrides, plus any purely synthetic links the
    /// simulation script names that have no live adapter).
    fn formulate(&self) -> Problem {
        let mut problem = Problem::new(self.problem_template.name.clone());
        problem.channels = self.problem_template.channels.clone();
        let sim_t = self.simulator.as_ref().map(|s| s.relative_time());

        for channel in &mut problem.channels {
            if let Some(source) = self.sources.iter().find(|s| s.name() == channel.name) {
                channel.queue_length = source.queue_len() as u64;
                channel.frequency = source.frequency();
            }
            if let (Some(sim), Some(t)) = (&self.simulator, sim_t) {
                if let Some(freq) = sim.channel_frequency(channel.name.as_str(), t, channel.frequency) {
                    channel.frequency = freq;
                }
            }
        }

        let mut seen: std::collections::HashSet<CompactString> = std::collections::HashSet::new();
        problem.links = self
            .network
            .usable_interfaces()
            .into_iter()
            .map(|adapter| {
                let iface = CompactString::from(adapter.interface());
                let (bandwidth, latency) = match (&self.simulator, sim_t) {
                    (Some(sim), Some(t)) => sim
                        .link_override(iface.as_str(), t, adapter.estimated_bandwidth_out(), adapter.latency())
                        .unwrap_or((adapter.estimated_bandwidth_out(), adapter.latency())),
                    _ => (adapter.estimated_bandwidth_out(), adapter.latency()),
                };
                seen.insert(iface.clone());
                Link {
                    interface: iface,
                    link_type: None,
                    server: adapter.static_server(),
                    bandwidth,
                    latency,
                    reliability: 1.0,
                    budget: self
                        .problem_template
                        .link(adapter.interface())
                        .and_then(|l| l.budget),
                    capacity: 0.0,
                }
            })
            .collect();

        if let (Some(sim), Some(t)) = (&self.simulator, sim_t) {
            for name in sim.link_names() {
                if seen.contains(name) {
                    continue;
                }
                if let Some((bandwidth, latency)) = sim.link_override(name.as_str(), t, 0.0, 0.0) {
                    problem.links.push(Link {
                        interface: name.clone(),
                        link_type: None,
                        server: self.problem_template.link(name.as_str()).and_then(|l| l.server),
                        bandwidth,
                        latency,
                        reliability: 1.0,
                        budget: self.problem_template.link(name.as_str()).and_then(|l| l.budget),
                        capacity: 0.0,
                    });
                }
            }
        }

        problem
    }
}
