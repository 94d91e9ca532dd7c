//! Binary uplink decoder for channel/type/value encoded frames.
//!
//! A frame is a sequence of records, each introduced by a one-byte channel id
//! and a one-byte type tag; the tag pair fixes the width of the value that
//! follows. Decoding is lenient: the first unrecognized tag pair, or a value
//! cut short by the end of the buffer, ends decoding and whatever was read up
//! to that point is returned.

use serde_json::{json, Map, Value};

/// Decoded field name to value
pub type DecodedFields = Map<String, Value>;

const HISTORY_RECORD_LEN: usize = 9;

/// Read cursor over a frame. Every read is bounds-checked.
struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn take(&mut self, len: usize) -> Option<&'a [u8]> {
        if self.remaining() < len {
            return None;
        }
        let slice = &self.buf[self.pos..self.pos + len];
        self.pos += len;
        Some(slice)
    }

    fn u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    fn u32_le(&mut self) -> Option<u32> {
        self.take(4)
            .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}

/// Value layout selected by a (channel, type) pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tag {
    Battery,
    Valve(u8),
    Pulse(u8),
    Gpio(u8),
    History,
}

impl Tag {
    fn lookup(channel: u8, kind: u8) -> Option<Self> {
        match (channel, kind) {
            (0x01, 0x75) => Some(Tag::Battery),
            (0x03, 0x01) => Some(Tag::Valve(1)),
            (0x04, 0x01) => Some(Tag::Valve(2)),
            (0x05, 0xC8) => Some(Tag::Pulse(1)),
            (0x06, 0xC8) => Some(Tag::Pulse(2)),
            (0x07, 0x01) => Some(Tag::Gpio(1)),
            (0x08, 0x01) => Some(Tag::Gpio(2)),
            (0x20, 0xCE) => Some(Tag::History),
            _ => None,
        }
    }
}

fn on_off(value: u8) -> &'static str {
    if value == 0 {
        "off"
    } else {
        "on"
    }
}

fn open_close(value: u8) -> &'static str {
    if value == 0 {
        "close"
    } else {
        "open"
    }
}

/// Decode one history record: timestamp, status bitfield, pulse count
fn decode_history(record: &[u8]) -> Value {
    let timestamp = u32::from_le_bytes([record[0], record[1], record[2], record[3]]);
    let status = record[4];
    let pulse = u32::from_le_bytes([record[5], record[6], record[7], record[8]]);

    let channel = if status & 0x10 != 0 { 2 } else { 1 };
    let mode = if status & 0x02 != 0 { "counter" } else { "gpio" };

    json!({
        "timestamp": timestamp,
        "channel": channel,
        "status": open_close(status & 0x01),
        "mode": mode,
        "gpio": on_off(status & 0x04),
        "pulse": pulse,
    })
}

/// Decode a raw frame into named fields.
///
/// Never fails and never reads past the end of `bytes`.
pub fn decode(bytes: &[u8]) -> DecodedFields {
    let mut fields = DecodedFields::new();
    let mut history: Vec<Value> = Vec::new();
    let mut cursor = Cursor::new(bytes);

    while cursor.remaining() >= 2 {
        let start = cursor.pos;
        let (Some(channel), Some(kind)) = (cursor.u8(), cursor.u8()) else {
            break;
        };
        let Some(tag) = Tag::lookup(channel, kind) else {
            tracing::debug!(channel, kind, offset = start, "Unrecognized tag, stopping decode");
            break;
        };

        let decoded = match tag {
            Tag::Battery => cursor
                .u8()
                .map(|v| ("battery".to_string(), json!(v))),
            Tag::Valve(n) => cursor
                .u8()
                .map(|v| (format!("valve_{}", n), json!(open_close(v)))),
            Tag::Gpio(n) => cursor
                .u8()
                .map(|v| (format!("gpio_{}", n), json!(on_off(v)))),
            Tag::Pulse(n) => cursor
                .u32_le()
                .map(|v| (format!("valve_{}_pulse", n), json!(v))),
            Tag::History => match cursor.take(HISTORY_RECORD_LEN) {
                Some(record) => {
                    history.push(decode_history(record));
                    continue;
                }
                None => None,
            },
        };

        match decoded {
            Some((name, value)) => {
                fields.insert(name, value);
            }
            None => {
                tracing::debug!(?tag, offset = start, "Truncated value, stopping decode");
                break;
            }
        }
    }

    if !history.is_empty() {
        fields.insert("history".to_string(), Value::Array(history));
    }
    fields
}
