//! Typed errors for the network crate.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("interface not found: {0}")]
    InterfaceNotFound(String),

    #[error("no adapter registered for interface {0}")]
    NoAdapter(String),

    #[error("pipe socket error: {0}")]
    Socket(String),

    #[error("peer discovery error: {0}")]
    Discovery(String),

    #[error(transparent)]
    Wire(#[from] adanet_core::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
