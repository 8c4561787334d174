//! Signed data item construction, serialization and parsing.
//!
//! Binary layout (all integers little-endian):
//!
//! | field | size |
//! |-------|------|
//! | signature type | 2 |
//! | signature | 512 |
//! | owner | 512 |
//! | target present + target | 1 (+32) |
//! | anchor present + anchor | 1 (+32) |
//! | tag count | 8 |
//! | tag bytes length | 8 |
//! | tags (Avro) | variable |
//! | data | rest |

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use sha2::{Digest, Sha256};

use crate::deep_hash::{DeepHashChunk, deep_hash};
use crate::tags::{Tag, encode_tags, validate_tags};
use crate::wallet::{OWNER_LEN, Wallet, verify_signature};
use crate::DataItemError;

/// Signature type for Arweave RSA-PSS keys.
pub const SIGNATURE_TYPE_ARWEAVE: u16 = 1;

const SIGNATURE_LEN: usize = OWNER_LEN;
const ADDRESS_LEN: usize = 32;

/// Builder for an unsigned data item.
#[derive(Debug, Clone, Default)]
pub struct DataItemBuilder {
    target: Option<[u8; ADDRESS_LEN]>,
    anchor: Option<[u8; ADDRESS_LEN]>,
    tags: Vec<Tag>,
    data: Vec<u8>,
}

impl DataItemBuilder {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            ..Default::default()
        }
    }

    /// Set the target from its base64url form (e.g. a process id).
    pub fn target(mut self, target: &str) -> Result<Self, DataItemError> {
        self.target = Some(decode_address("target", target)?);
        Ok(self)
    }

    /// Set the raw 32-byte anchor.
    pub fn anchor(mut self, anchor: [u8; ADDRESS_LEN]) -> Self {
        self.anchor = Some(anchor);
        self
    }

    pub fn tag(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push(Tag::new(name, value));
        self
    }

    pub fn tags(mut self, tags: impl IntoIterator<Item = Tag>) -> Self {
        self.tags.extend(tags);
        self
    }

    /// Sign with `wallet`, producing a complete data item.
    pub fn sign(self, wallet: &Wallet) -> Result<DataItem, DataItemError> {
        validate_tags(&self.tags)?;
        let raw_tags = encode_tags(&self.tags);

        let mut item = DataItem {
            signature: Vec::new(),
            owner: wallet.owner().to_vec(),
            target: self.target,
            anchor: self.anchor,
            tags: self.tags,
            raw_tags,
            data: self.data,
        };
        let message = item.signature_data();
        item.signature = wallet.sign(&message);
        Ok(item)
    }
}

/// A signed data item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataItem {
    signature: Vec<u8>,
    owner: Vec<u8>,
    target: Option<[u8; ADDRESS_LEN]>,
    anchor: Option<[u8; ADDRESS_LEN]>,
    tags: Vec<Tag>,
    raw_tags: Vec<u8>,
    data: Vec<u8>,
}

impl DataItem {
    /// Message id: base64url(SHA-256(signature)).
    pub fn id(&self) -> String {
        URL_SAFE_NO_PAD.encode(Sha256::digest(&self.signature))
    }

    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    /// First tag value with the given name.
    pub fn tag(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.name == name)
            .map(|t| t.value.as_str())
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn owner(&self) -> &[u8] {
        &self.owner
    }

    /// Target in base64url form.
    pub fn target(&self) -> Option<String> {
        self.target.map(|t| URL_SAFE_NO_PAD.encode(t))
    }

    /// Check the signature against the embedded owner.
    pub fn verify(&self) -> bool {
        verify_signature(&self.owner, &self.signature_data(), &self.signature)
    }

    /// The 48-byte deep hash the signature commits to.
    fn signature_data(&self) -> [u8; 48] {
        let signature_type = SIGNATURE_TYPE_ARWEAVE.to_string();
        let target: &[u8] = match &self.target {
            Some(t) => t,
            None => &[],
        };
        let anchor: &[u8] = match &self.anchor {
            Some(a) => a,
            None => &[],
        };

        deep_hash(&DeepHashChunk::List(vec![
            DeepHashChunk::Blob(b"dataitem"),
            DeepHashChunk::Blob(b"1"),
            DeepHashChunk::Blob(signature_type.as_bytes()),
            DeepHashChunk::Blob(&self.owner),
            DeepHashChunk::Blob(target),
            DeepHashChunk::Blob(anchor),
            DeepHashChunk::Blob(&self.raw_tags),
            DeepHashChunk::Blob(&self.data),
        ]))
    }

    /// Serialize to the binary wire format.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            2 + SIGNATURE_LEN + OWNER_LEN + 2 + 2 * ADDRESS_LEN + 16
                + self.raw_tags.len()
                + self.data.len(),
        );
        out.extend_from_slice(&SIGNATURE_TYPE_ARWEAVE.to_le_bytes());
        out.extend_from_slice(&self.signature);
        out.extend_from_slice(&self.owner);
        for field in [&self.target, &self.anchor] {
            match field {
                Some(bytes) => {
                    out.push(1);
                    out.extend_from_slice(bytes);
                }
                None => out.push(0),
            }
        }
        out.extend_from_slice(&(self.tags.len() as u64).to_le_bytes());
        out.extend_from_slice(&(self.raw_tags.len() as u64).to_le_bytes());
        out.extend_from_slice(&self.raw_tags);
        out.extend_from_slice(&self.data);
        out
    }

    /// Parse the binary wire format. The signature is not verified.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DataItemError> {
        let mut reader = Reader { data: bytes, pos: 0 };

        let signature_type = u16::from_le_bytes(reader.array::<2>()?);
        if signature_type != SIGNATURE_TYPE_ARWEAVE {
            return Err(DataItemError::Malformed(format!(
                "unsupported signature type {}",
                signature_type
            )));
        }
        let signature = reader.take(SIGNATURE_LEN)?.to_vec();
        let owner = reader.take(OWNER_LEN)?.to_vec();
        let target = reader.optional_address()?;
        let anchor = reader.optional_address()?;
        let tag_count = u64::from_le_bytes(reader.array::<8>()?) as usize;
        let tag_bytes_len = u64::from_le_bytes(reader.array::<8>()?) as usize;
        let raw_tags = reader.take(tag_bytes_len)?.to_vec();
        let tags = decode_tags(&raw_tags)?;
        if tags.len() != tag_count {
            return Err(DataItemError::Malformed(format!(
                "tag count mismatch: header says {}, found {}",
                tag_count,
                tags.len()
            )));
        }
        let data = reader.rest().to_vec();

        Ok(Self {
            signature,
            owner,
            target,
            anchor,
            tags,
            raw_tags,
            data,
        })
    }
}

fn decode_address(field: &'static str, value: &str) -> Result<[u8; ADDRESS_LEN], DataItemError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(value)
        .map_err(|source| DataItemError::Base64 { field, source })?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| DataItemError::InvalidAddress {
            field,
            len: bytes.len(),
        })
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], DataItemError> {
        let end = self.pos.checked_add(len).filter(|end| *end <= self.data.len());
        let Some(end) = end else {
            return Err(DataItemError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "not enough data",
            )));
        };
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], DataItemError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn optional_address(&mut self) -> Result<Option<[u8; ADDRESS_LEN]>, DataItemError> {
        match self.take(1)?[0] {
            0 => Ok(None),
            _ => Ok(Some(self.array::<ADDRESS_LEN>()?)),
        }
    }

    fn read_long(&mut self) -> Result<i64, DataItemError> {
        let mut value: u64 = 0;
        let mut shift = 0;
        loop {
            let byte = self.take(1)?[0];
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                break;
            }
            shift += 7;
            if shift > 63 {
                return Err(DataItemError::Malformed("varint overflow in tags".into()));
            }
        }
        Ok(((value >> 1) as i64) ^ -((value & 1) as i64))
    }

    fn read_string(&mut self) -> Result<String, DataItemError> {
        let len = self.read_long()?;
        let len = usize::try_from(len)
            .map_err(|_| DataItemError::Malformed("negative length in tags".into()))?;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| DataItemError::Malformed("tag is not valid UTF-8".into()))
    }

    fn rest(&mut self) -> &'a [u8] {
        let rest = &self.data[self.pos..];
        self.pos = self.data.len();
        rest
    }
}

fn decode_tags(raw: &[u8]) -> Result<Vec<Tag>, DataItemError> {
    let mut tags = Vec::new();
    if raw.is_empty() {
        return Ok(tags);
    }
    let mut reader = Reader { data: raw, pos: 0 };
    loop {
        let mut count = reader.read_long()?;
        if count == 0 {
            break;
        }
        if count < 0 {
            // negative block count is followed by the block's byte size
            count = -count;
            reader.read_long()?;
        }
        for _ in 0..count {
            let name = reader.read_string()?;
            let value = reader.read_string()?;
            tags.push(Tag { name, value });
        }
    }
    Ok(tags)
}
