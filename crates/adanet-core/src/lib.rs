//! Core data model and pure-function algorithms for AdaNet.
//!
//! This crate contains:
//! - **Data model**: `Problem`, `Link`, `Channel`, `Solution`, `Message` types
//! - **Solver**: the deterministic bandwidth-to-channel Allocator
//! - **Wire codec**: the length-delimited Message record format
//! - **Units**: bandwidth/latency/size string parsing
//! - **Expr**: the safe arithmetic AST backing simulation scripts
//! - **Clock**: monotonic, simulation-speed-scaled time source
//! - **Shutdown**: priority-ordered shutdown registry
//! - **Config**: the two-stage problem-file loader
//!
//! No module here performs network I/O; that lives in `adanet-net`.

pub mod clock;
pub mod config;
pub mod error;
pub mod expr;
pub mod shutdown;
pub mod solver;
pub mod types;
pub mod units;
pub mod wire;

pub use error::{Error, Result};
pub use types::{Channel, Link, Message, Problem, Qos, Solution, SolvedChannel};
