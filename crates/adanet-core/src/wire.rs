//! The on-wire Message record.
//!
//! Each USER frame is a self-describing tag-value record so that a future
//! field can be added without breaking an older reader: an unrecognized tag
//! is skipped using its own length prefix rather than failing to parse.
//!
//! Frame layout: `[level: u8][body...]`. `level = 0` is a SYSTEM heartbeat
//! frame, whose body is a single fixed byte. `level = 1` is a USER frame
//! whose body is the tag-value record below.
//!
//! Record layout: a sequence of `[tag: u8][len: u32 LE][bytes]` triples.
//! Known tags: `1` = channel (UTF-8 string), `2` = stamp (f64 LE), `3` =
//! payload (raw bytes). Unknown tags are skipped by their length.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use compact_str::CompactString;

use crate::error::{Error, Result};
use crate::types::Message;

pub const LEVEL_SYSTEM: u8 = 0;
pub const LEVEL_USER: u8 = 1;

const TAG_CHANNEL: u8 = 1;
const TAG_STAMP: u8 = 2;
const TAG_PAYLOAD: u8 = 3;

const HEARTBEAT_BYTE: u8 = 0xA5;

/// Encode a [`Message`] as a standalone USER frame.
pub fn encode_message(msg: &Message) -> Bytes {
    let mut buf = BytesMut::with_capacity(16 + msg.channel.len() + msg.payload.len());
    buf.put_u8(LEVEL_USER);

    let channel_bytes = msg.channel.as_bytes();
    buf.put_u8(TAG_CHANNEL);
    buf.put_u32_le(channel_bytes.len() as u32);
    buf.put_slice(channel_bytes);

    buf.put_u8(TAG_STAMP);
    buf.put_u32_le(8);
    buf.put_f64_le(msg.stamp);

    buf.put_u8(TAG_PAYLOAD);
    buf.put_u32_le(msg.payload.len() as u32);
    buf.put_slice(&msg.payload);

    buf.freeze()
}

/// Decode a frame previously produced by [`encode_message`] or a heartbeat.
/// Returns `None` for a well-formed heartbeat frame; `Some(message)` for a
/// USER frame.
pub fn decode_frame(mut data: impl Buf) -> Result<Option<Message>> {
    if !data.has_remaining() {
        return Err(Error::WireDecode("empty frame".into()));
    }
    let level = data.get_u8();
    match level {
        LEVEL_SYSTEM => Ok(None),
        LEVEL_USER => decode_message_body(data).map(Some),
        other => Err(Error::WireDecode(format!("unknown frame level {other}"))),
    }
}

fn decode_message_body(mut data: impl Buf) -> Result<Message> {
    let mut channel: Option<CompactString> = None;
    let mut stamp: Option<f64> = None;
    let mut payload: Option<Bytes> = None;

    while data.has_remaining() {
        if data.remaining() < 5 {
            return Err(Error::WireDecode("truncated tag-value header".into()));
        }
        let tag = data.get_u8();
        let len = data.get_u32_le() as usize;
        if data.remaining() < len {
            return Err(Error::WireDecode("truncated field body".into()));
        }
        match tag {
            TAG_CHANNEL => {
                let bytes = data.copy_to_bytes(len);
                let s = std::str::from_utf8(&bytes)
                    .map_err(|e| Error::WireDecode(format!("invalid utf8 channel: {e}")))?;
                channel = Some(CompactString::from(s));
            }
            TAG_STAMP => {
                if len != 8 {
                    return Err(Error::WireDecode("stamp field must be 8 bytes".into()));
                }
                stamp = Some(data.get_f64_le());
            }
            TAG_PAYLOAD => {
                payload = Some(data.copy_to_bytes(len));
            }
            _unknown => {
                data.advance(len);
            }
        }
    }

    Ok(Message {
        channel: channel.ok_or_else(|| Error::WireDecode("missing channel field".into()))?,
        stamp: stamp.ok_or_else(|| Error::WireDecode("missing stamp field".into()))?,
        payload: payload.unwrap_or_default(),
    })
}

/// Encode a SYSTEM heartbeat frame.
pub fn encode_heartbeat() -> Bytes {
    Bytes::from_static(&[LEVEL_SYSTEM, HEARTBEAT_BYTE])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_message() {
        let msg = Message::new("telemetry", 12.5, Bytes::from_static(b"hello"));
        let encoded = encode_message(&msg);
        let decoded = decode_frame(encoded.as_ref()).unwrap().unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn heartbeat_decodes_to_none() {
        let frame = encode_heartbeat();
        let decoded = decode_frame(frame.as_ref()).unwrap();
        assert!(decoded.is_none());
    }

    #[test]
    fn unknown_tag_is_skipped() {
        let msg = Message::new("c", 1.0, Bytes::from_static(b"x"));
        let mut encoded = BytesMut::from(&encode_message(&msg)[..]);
        // Append a bogus future field before decoding; it must be ignored.
        encoded.put_u8(200);
        encoded.put_u32_le(3);
        encoded.put_slice(b"abc");
        let decoded = decode_frame(encoded.freeze().as_ref()).unwrap().unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn empty_frame_errors() {
        let empty: &[u8] = &[];
        assert!(decode_frame(empty).is_err());
    }
}
