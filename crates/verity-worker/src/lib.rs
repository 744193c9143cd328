//! Support code for the `verity` worker binary: configuration, the HTTP
//! analyzer client and the log-backed notifier.

pub mod analyzer;
pub mod config;
pub mod notifier;

pub use analyzer::HttpAnalyzer;
pub use config::WorkerConfig;
pub use notifier::LogNotifier;
