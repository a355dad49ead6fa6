//! Typed errors for the core crate.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid problem file: {0}")]
    InvalidProblem(String),

    #[error("unknown channel kind: {0}")]
    UnknownChannelKind(String),

    #[error("unknown link type: {0}")]
    UnknownLinkType(String),

    #[error("could not parse unit string {input:?}: {reason}")]
    UnitParse { input: String, reason: String },

    #[error("wire decode error: {0}")]
    WireDecode(String),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
