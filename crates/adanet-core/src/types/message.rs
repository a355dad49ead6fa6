//! `Message`: the wire unit carried by a Pipe.

use bytes::Bytes;
use compact_str::CompactString;

/// `{ channel, stamp, payload }`. Serialized as a length-delimited
/// tag-value record; see [`crate::wire`].
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub channel: CompactString,
    /// Float-seconds timestamp, assigned by the Source at production time.
    pub stamp: f64,
    pub payload: Bytes,
}

impl Message {
    pub fn new(channel: impl Into<CompactString>, stamp: f64, payload: impl Into<Bytes>) -> Self {
        Message {
            channel: channel.into(),
            stamp,
            payload: payload.into(),
        }
    }
}
