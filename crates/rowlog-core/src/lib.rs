//! Core types and engine for the rowlog change-audit log.
//!
//! This crate is deliberately free of database dependencies. Storage backends
//! implement [`store::ChangeHistoryStore`]; hosts drive the engine through the
//! write hooks on [`logger::ChangeLogger`].

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod change;
pub mod config;
pub mod diff;
pub mod entry;
pub mod error;
pub mod fingerprint;
pub mod logger;
pub mod memory;
pub mod registry;
pub mod store;
pub mod value;

mod dedup;
mod resolver;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
pub use logger::{ChangeLogger, PendingWrite};
