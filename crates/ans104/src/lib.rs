//! Signed ANS-104 data items.
//!
//! Every message the relay writes onto the ledger is a data item: a binary
//! envelope of owner, optional target, Avro-encoded tags and a payload, signed
//! with RSA-PSS over a SHA-384 deep hash of those fields.

pub mod data_item;
pub mod deep_hash;
pub mod error;
pub mod tags;
pub mod wallet;

pub use crate::{
    data_item::{DataItem, DataItemBuilder},
    error::DataItemError,
    tags::Tag,
    wallet::Wallet,
};
