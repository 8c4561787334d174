use thiserror::Error;

/// Errors produced while building, signing or loading data items.
#[derive(Debug, Error)]
pub enum DataItemError {
    #[error("too many tags: {0} (max {max})", max = crate::tags::MAX_TAGS)]
    TooManyTags(usize),

    #[error("tag name too long: {len} bytes (max {max})", max = crate::tags::MAX_TAG_NAME_BYTES)]
    TagNameTooLong { len: usize },

    #[error(
        "tag value for '{name}' too long: {len} bytes (max {max})",
        max = crate::tags::MAX_TAG_VALUE_BYTES
    )]
    TagValueTooLong { name: String, len: usize },

    #[error("tag name must not be empty")]
    EmptyTagName,

    #[error("invalid {field}: expected 32 bytes of base64url, got {len} bytes")]
    InvalidAddress { field: &'static str, len: usize },

    #[error("invalid base64url in {field}: {source}")]
    Base64 {
        field: &'static str,
        #[source]
        source: base64::DecodeError,
    },

    #[error("wallet modulus must be 4096 bits, got {0} bytes")]
    UnsupportedKeySize(usize),

    #[error("malformed data item: {0}")]
    Malformed(String),

    #[error("malformed wallet: {0}")]
    Wallet(String),

    #[error("wallet JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("RSA: {0}")]
    Rsa(#[from] rsa::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
