//! The AdaNet data model: `Problem`, `Link`, `Channel`, `Qos`, `Solution`,
//! `SolvedChannel`, `Message`.

mod message;
mod problem;
mod qos;
mod solution;

pub use message::Message;
pub use problem::{ChannelKind, Link, Problem};
pub use qos::{LatencyPolicy, Qos};
pub use solution::{Solution, SolvedChannel};

use compact_str::CompactString;

/// A logical stream of messages between one Source and one Sink.
#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    pub name: CompactString,
    pub kind: ChannelKind,
    pub priority: i32,
    pub frequency: f64,
    pub size: Option<u64>,
    pub qos: Qos,
    /// Runtime: packets buffered awaiting transmission.
    pub queue_length: u64,
}

impl Channel {
    pub fn new(name: impl Into<CompactString>, kind: ChannelKind) -> Self {
        Channel {
            name: name.into(),
            kind,
            priority: 0,
            frequency: 0.0,
            size: None,
            qos: Qos::default(),
            queue_length: 0,
        }
    }
}
