//! Command-line surface: `<prog> <role> --agent <name> [--solver <id>]
//! --problem <path> [--duration <seconds>] [--simulation] [--logger wb]`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Role {
    Source,
    Sink,
}

#[derive(Debug, Parser)]
#[command(name = "adanet-agent", about = "AdaNet Source/Sink bridging agent")]
pub struct Cli {
    /// Agent role.
    pub role: Role,

    /// A name for this agent instance (used in logs and peer discovery).
    #[arg(long)]
    pub agent: String,

    /// Allocator to use; ignored by the sink role.
    #[arg(long, default_value = "SimpleSolver")]
    pub solver: String,

    /// Path to the YAML problem file.
    #[arg(long)]
    pub problem: PathBuf,

    /// Bound the run; when reached, initiate graceful shutdown. Must be
    /// at least 2 seconds.
    #[arg(long)]
    pub duration: Option<u64>,

    /// Replace live Sources/Sinks with synthetic ones driven by the
    /// problem's `simulation` block.
    #[arg(long, default_value_t = false)]
    pub simulation: bool,

    /// Enable an external metrics sink (out of scope for this build; the
    /// flag is accepted and logged, not acted on).
    #[arg(long)]
    pub logger: Option<String>,
}
