//! relay-bridge library crate.
//!
//! Watches the ledger for relay requests, performs the requested HTTP calls
//! and writes the responses back as signed messages.

pub mod config;
pub mod credentials;
pub mod database;
pub mod dedup;
pub mod dispatcher;
pub mod error;
pub mod ledger;
pub mod liveness;
pub mod logging;
pub mod poller;
pub mod publisher;
pub mod utils;

pub use error::{Error, Result};
