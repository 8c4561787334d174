//! Tag list and its Avro binary encoding.
//!
//! Tags are serialized as an Avro `array<record { name: bytes, value: bytes }>`:
//! a zig-zag varint block count, each item as two length-prefixed byte strings,
//! and a terminating zero-length block. An empty tag list encodes to zero bytes.

use serde::{Deserialize, Serialize};

use crate::DataItemError;

/// Maximum number of tags a data item may carry.
pub const MAX_TAGS: usize = 128;
/// Maximum size of a tag name in bytes.
pub const MAX_TAG_NAME_BYTES: usize = 1024;
/// Maximum size of a tag value in bytes.
pub const MAX_TAG_VALUE_BYTES: usize = 3072;

/// A single name/value tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    pub value: String,
}

impl Tag {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Check the tag list against the ANS-104 limits.
pub fn validate_tags(tags: &[Tag]) -> Result<(), DataItemError> {
    if tags.len() > MAX_TAGS {
        return Err(DataItemError::TooManyTags(tags.len()));
    }
    for tag in tags {
        if tag.name.is_empty() {
            return Err(DataItemError::EmptyTagName);
        }
        if tag.name.len() > MAX_TAG_NAME_BYTES {
            return Err(DataItemError::TagNameTooLong {
                len: tag.name.len(),
            });
        }
        if tag.value.len() > MAX_TAG_VALUE_BYTES {
            return Err(DataItemError::TagValueTooLong {
                name: tag.name.clone(),
                len: tag.value.len(),
            });
        }
    }
    Ok(())
}

/// Encode tags in Avro binary form.
pub fn encode_tags(tags: &[Tag]) -> Vec<u8> {
    if tags.is_empty() {
        return Vec::new();
    }

    let mut out = Vec::with_capacity(
        tags.iter()
            .map(|t| t.name.len() + t.value.len() + 4)
            .sum::<usize>()
            + 4,
    );
    write_long(&mut out, tags.len() as i64);
    for tag in tags {
        write_bytes(&mut out, tag.name.as_bytes());
        write_bytes(&mut out, tag.value.as_bytes());
    }
    write_long(&mut out, 0);
    out
}

fn write_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    write_long(out, bytes.len() as i64);
    out.extend_from_slice(bytes);
}

/// Avro `long`: zig-zag encoded, then little-endian base-128 varint.
fn write_long(out: &mut Vec<u8>, n: i64) {
    let mut z = ((n << 1) ^ (n >> 63)) as u64;
    loop {
        let byte = (z & 0x7f) as u8;
        z >>= 7;
        if z == 0 {
            out.push(byte);
            break;
        }
        out.push(byte | 0x80);
    }
}
