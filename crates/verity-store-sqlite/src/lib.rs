//! SQLite backend for the Verity claim store and job queue.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. Because that thread owns the only
//! connection, every `call` is serialized; transactions make each guarded
//! write all-or-nothing.

mod encode;
mod jobs;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteStore;

#[cfg(test)]
mod tests;
