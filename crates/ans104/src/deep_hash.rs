//! SHA-384 "deep hash" over nested byte chunks.

use sha2::{Digest, Sha384};

/// A deep-hash input: a byte blob or a list of nested chunks.
pub enum DeepHashChunk<'a> {
    Blob(&'a [u8]),
    List(Vec<DeepHashChunk<'a>>),
}

pub fn deep_hash(chunk: &DeepHashChunk<'_>) -> [u8; 48] {
    match chunk {
        DeepHashChunk::Blob(data) => {
            let data: &[u8] = data;
            let tag = sha384(&[b"blob".as_slice(), data.len().to_string().as_bytes()]);
            let body = sha384(&[data]);
            sha384(&[tag.as_slice(), body.as_slice()])
        }
        DeepHashChunk::List(items) => {
            let mut acc = sha384(&[b"list".as_slice(), items.len().to_string().as_bytes()]);
            for item in items {
                let item_hash = deep_hash(item);
                acc = sha384(&[acc.as_slice(), item_hash.as_slice()]);
            }
            acc
        }
    }
}

fn sha384(parts: &[&[u8]]) -> [u8; 48] {
    let mut hasher = Sha384::new();
    for part in parts {
        hasher.update(part);
    }
    let mut out = [0u8; 48];
    out.copy_from_slice(&hasher.finalize());
    out
}
