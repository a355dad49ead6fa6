//! AdaNet agent daemon.
//!
//! Connects a Source or Sink role to its counterpart over a time-varying
//! set of physical interfaces, continuously measuring, (re)solving, and
//! dispatching channel traffic per the problem file.

mod cli;
mod engine;
mod queue;
mod simulator;
mod sink;
mod source;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use rand::Rng;
use tracing_subscriber::EnvFilter;

use adanet_core::clock::Clock;
use adanet_core::config::ProblemInput;
use adanet_core::shutdown::ShutdownRegistry;
use adanet_core::solver::SolverConfig;
use adanet_core::types::{Channel, ChannelKind};
use adanet_net::adapter::AgentRole;
use adanet_net::manager::{NetworkManager, NetworkManagerConfig};
use adanet_net::switchboard::Switchboard;

use cli::{Cli, Role};
use engine::{Engine, EngineConfig};
use queue::WindmillQueue;
use simulator::Simulator;
use sink::Sink;
use source::{backend_for, Source};

const DEFAULT_DELTA_T: Duration = Duration::from_secs(4);

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing();

    if let Some(duration) = cli.duration {
        if duration < 2 {
            anyhow::bail!("--duration must be at least 2 seconds");
        }
    }

    let role = match cli.role {
        Role::Source => AgentRole::Source,
        Role::Sink => AgentRole::Sink,
    };

    let text = std::fs::read_to_string(&cli.problem)
        .with_context(|| format!("unreadable problem file: {}", cli.problem.display()))?;

    let stem = cli
        .problem
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("problem");

    let input = ProblemInput::from_yaml_str(&text).context("invalid problem file")?;

    let (problem, simulation) = input.resolve(stem).context("invalid problem file")?;
    if cli.simulation && simulation.is_none() {
        tracing::warn!("--simulation passed but problem file has no simulation block");
    }
    let run_simulation = cli.simulation && simulation.is_some();

    tracing::info!(
        agent = %cli.agent,
        role = ?cli.role,
        solver = %cli.solver,
        problem = %problem.name,
        channels = problem.channels.len(),
        links = problem.links.len(),
        "adanet-agent starting"
    );

    let clock = Arc::new(Clock::from_env());
    let registry = Arc::new(ShutdownRegistry::new());

    let simulator = run_simulation.then(|| Simulator::new(simulation.unwrap(), clock.clone()));

    {
        let registry = registry.clone();
        if let Err(e) = ctrlc::set_handler(move || {
            tracing::info!("received interrupt, shutting down");
            registry.shutdown_all();
        }) {
            tracing::warn!(error = %e, "failed to install signal handler");
        }
    }

    let network_cell: Arc<std::sync::OnceLock<Arc<NetworkManager>>> =
        Arc::new(std::sync::OnceLock::new());
    let switchboard = Arc::new(Switchboard::new(Arc::new({
        let network_cell = network_cell.clone();
        move |iface: &str, msg| {
            if let Some(network) = network_cell.get() {
                network.send(iface, msg);
            }
        }
    })));

    let whitelist = if problem.links.is_empty() {
        None
    } else {
        Some(problem.links.iter().map(|l| l.interface.to_string()).collect())
    };
    let static_servers = problem
        .links
        .iter()
        .filter_map(|l| l.server.map(|s| (l.interface.to_string(), s)))
        .collect();

    let network = Arc::new(NetworkManager::new(
        role,
        whitelist,
        static_servers,
        NetworkManagerConfig::from_env(),
        clock.clone(),
        switchboard.clone(),
        random_process_key(),
    ));
    network_cell
        .set(network.clone())
        .unwrap_or_else(|_| unreachable!("set once, before any send"));

    {
        let network = network.clone();
        let registry_for_thread = registry.clone();
        let handle = registry.register("discovery", 100);
        std::thread::spawn(move || {
            network.run_discovery_loop(&registry_for_thread, handle);
        });
    }

    {
        let network = network.clone();
        let handle = registry.register("stats-logger", 90);
        std::thread::spawn(move || {
            network.run_stats_logger_loop(&handle);
        });
    }

    let queue_path = std::env::var("QUEUE_PATH").ok().map(PathBuf::from);
    if queue_path.is_none() && problem.channels.iter().any(|c| c.kind == ChannelKind::Disk) {
        tracing::warn!(
            "QUEUE_PATH unset; disk-kind channels fall back to an in-memory cache queue"
        );
    }

    let mut sources = Vec::new();
    let mut sinks = HashMap::new();

    match role {
        AgentRole::Source => {
            for channel in &problem.channels {
                let backend = match &simulator {
                    Some(sim) => sim.backend_for(channel),
                    None => backend_for(channel),
                };
                let queue = build_queue(channel, &queue_path);
                let source = Source::spawn(
                    channel.clone(),
                    backend,
                    queue,
                    switchboard.clone(),
                    clock.clone(),
                    registry.register(format!("source:{}", channel.name), 20),
                );
                sources.push(source);
            }
        }
        AgentRole::Sink => {
            for channel in &problem.channels {
                let persistent = (channel.kind == ChannelKind::Disk)
                    .then(|| build_queue(channel, &queue_path));
                let sink = Arc::new(Sink::new(channel, persistent));
                switchboard.register_sink(channel.name.clone(), {
                    let sink = sink.clone();
                    move |msg| sink.recv(msg)
                });
                sinks.insert(channel.name.clone(), sink);
            }
        }
    }

    let engine = Engine::new(
        role,
        problem,
        network,
        switchboard,
        sources,
        sinks,
        clock,
        simulator,
        EngineConfig {
            delta_t: DEFAULT_DELTA_T,
            duration_limit: cli.duration.map(Duration::from_secs),
            solver_config: SolverConfig::default(),
        },
    );

    engine.run(&registry);
    tracing::info!("adanet-agent stopped");
    Ok(())
}

fn init_tracing() {
    let debug = std::env::var("DEBUG")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);
    let default_filter = if debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .compact()
        .init();
}

/// `kind: disk` channels get a `QUEUE_PATH/disk/<channel>` persistent FIFO
/// when `QUEUE_PATH` is set; every other channel, and disk channels when
/// it isn't, get an in-memory cache queue.
fn build_queue(channel: &Channel, queue_path: &Option<PathBuf>) -> Arc<WindmillQueue> {
    let capacity = channel.qos.queue_size as usize;
    if channel.kind == ChannelKind::Disk {
        if let Some(base) = queue_path {
            let dir = base.join("disk").join(channel.name.as_str());
            match WindmillQueue::new_persistent(dir.clone(), capacity) {
                Ok(q) => return Arc::new(q),
                Err(e) => {
                    tracing::warn!(
                        channel = %channel.name, path = %dir.display(), error = %e,
                        "failed to open persistent queue, falling back to cache"
                    );
                }
            }
        }
    }
    Arc::new(WindmillQueue::new_cache(capacity))
}

fn random_process_key() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 16] = rng.random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
