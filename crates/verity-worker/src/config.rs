//! Worker configuration.
//!
//! Loaded from an optional TOML file and then from `VERITY_*` environment
//! variables. Nested keys use a double underscore, e.g.
//! `VERITY_AI_PROCESSING__MAX_ATTEMPTS=5`.

use std::{
  path::{Path, PathBuf},
  time::Duration,
};

use serde::Deserialize;
use verity_core::{
  job::{BackoffPolicy, JobOptions},
  verdict::DEFAULT_DISCLAIMER,
};
use verity_engine::WorkflowConfig;
use verity_queue::QueueConfig;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
  /// SQLite database file. A leading `~` is expanded.
  pub store_path:            PathBuf,
  /// Jobs processed in parallel by `verity run`.
  pub concurrency:           usize,
  /// Endpoint the HTTP analyzer POSTs claims to.
  pub analyzer_url:          String,
  /// Upper bound on a single analyzer request.
  pub analyzer_timeout_secs: u64,
  pub poll_interval_ms:      u64,
  pub stall_interval_secs:   u64,
  pub max_stalled_count:     u32,
  pub ai_processing:         JobSettings,
  pub disclaimer:            String,
}

/// Execution policy for `ai-processing` jobs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct JobSettings {
  pub max_attempts:      u32,
  /// Exponential backoff base: attempt `n` waits `base * 2^(n-1)`.
  pub backoff_base_secs: u64,
  pub timeout_secs:      u64,
  pub priority:          i32,
}

impl Default for WorkerConfig {
  fn default() -> Self {
    Self {
      store_path:            PathBuf::from("verity.db"),
      concurrency:           4,
      analyzer_url:          "http://127.0.0.1:8400/analyze".to_owned(),
      analyzer_timeout_secs: 60,
      poll_interval_ms:      500,
      stall_interval_secs:   30,
      max_stalled_count:     1,
      ai_processing:         JobSettings::default(),
      disclaimer:            DEFAULT_DISCLAIMER.to_owned(),
    }
  }
}

impl Default for JobSettings {
  fn default() -> Self {
    Self {
      max_attempts:      3,
      backoff_base_secs: 5,
      timeout_secs:      300,
      priority:          0,
    }
  }
}

impl WorkerConfig {
  /// Layer the file at `path` (if it exists) and the environment over the
  /// defaults.
  pub fn load(path: &Path) -> Result<Self, config::ConfigError> {
    Self::from_builder(
      config::Config::builder()
        .add_source(config::File::from(path).required(false)),
    )
  }

  fn from_builder(
    builder: config::ConfigBuilder<config::builder::DefaultState>,
  ) -> Result<Self, config::ConfigError> {
    builder
      .add_source(
        config::Environment::with_prefix("VERITY")
          .prefix_separator("_")
          .separator("__")
          .try_parsing(true),
      )
      .build()?
      .try_deserialize()
  }

  pub fn store_path(&self) -> PathBuf { expand_tilde(&self.store_path) }

  pub fn analyzer_timeout(&self) -> Duration {
    Duration::from_secs(self.analyzer_timeout_secs)
  }

  pub fn queue_config(&self) -> QueueConfig {
    QueueConfig {
      poll_interval: Duration::from_millis(self.poll_interval_ms),
      stall_interval: Duration::from_secs(self.stall_interval_secs),
      max_stalled_count: self.max_stalled_count,
      ..QueueConfig::default()
    }
  }

  pub fn workflow_config(&self) -> WorkflowConfig {
    WorkflowConfig {
      disclaimer: self.disclaimer.clone(),
      ..WorkflowConfig::default()
    }
  }

  pub fn job_options(&self) -> JobOptions {
    let job = &self.ai_processing;
    JobOptions {
      max_attempts: job.max_attempts,
      backoff:      BackoffPolicy::exponential(Duration::from_secs(job.backoff_base_secs)),
      timeout:      Duration::from_secs(job.timeout_secs),
      priority:     job.priority,
    }
  }
}

/// Expand a leading `~` to `$HOME`.
fn expand_tilde(path: &Path) -> PathBuf {
  if let Ok(rest) = path.strip_prefix("~")
    && let Some(home) = std::env::var_os("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}

#[cfg(test)]
mod tests {
  use super::*;

  fn from_toml(source: &str) -> WorkerConfig {
    WorkerConfig::from_builder(config::Config::builder().add_source(
      config::File::from_str(source, config::FileFormat::Toml),
    ))
    .expect("config should deserialize")
  }

  #[test]
  fn empty_file_yields_defaults() {
    let cfg = from_toml("");
    assert_eq!(cfg.concurrency, 4);
    assert_eq!(cfg.max_stalled_count, 1);
    assert_eq!(cfg.disclaimer, DEFAULT_DISCLAIMER);

    let options = cfg.job_options();
    assert_eq!(options, JobOptions::default());
  }

  #[test]
  fn file_values_override_defaults() {
    let cfg = from_toml(
      r#"
        store_path = "/var/lib/verity/claims.db"
        concurrency = 8
        poll_interval_ms = 250

        [ai_processing]
        max_attempts = 5
        backoff_base_secs = 2
      "#,
    );

    assert_eq!(cfg.store_path(), PathBuf::from("/var/lib/verity/claims.db"));
    assert_eq!(cfg.concurrency, 8);
    assert_eq!(cfg.queue_config().poll_interval, Duration::from_millis(250));
    assert_eq!(cfg.queue_config().stall_interval, Duration::from_secs(30));

    let options = cfg.job_options();
    assert_eq!(options.max_attempts, 5);
    assert_eq!(options.backoff.delay_for(2), Duration::from_secs(4));
    assert_eq!(options.timeout, Duration::from_secs(300));
  }

  #[test]
  fn tilde_is_expanded_against_home() {
    let Some(home) = std::env::var_os("HOME") else { return };
    assert_eq!(
      expand_tilde(Path::new("~/verity.db")),
      PathBuf::from(home).join("verity.db")
    );
    assert_eq!(expand_tilde(Path::new("/tmp/x.db")), PathBuf::from("/tmp/x.db"));
  }
}
