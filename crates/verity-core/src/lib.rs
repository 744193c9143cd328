//! Core types and trait definitions for the Verity fact-checking pipeline.
//!
//! This crate is deliberately free of database, HTTP and runtime
//! dependencies. Every other crate depends on it; it depends on nothing
//! proprietary.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod analyzer;
pub mod claim;
pub mod error;
pub mod job;
pub mod lifecycle;
pub mod notify;
pub mod store;
pub mod verdict;

pub use error::{Error, Result};
