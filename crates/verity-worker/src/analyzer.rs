//! [`Analyzer`] backed by an HTTP service.
//!
//! The service receives `{"claim_id": ..., "claim_text": ...}` as JSON and
//! answers with an [`Analysis`].

use std::time::Duration;

use reqwest::{Client, StatusCode};
use tracing::debug;
use verity_core::analyzer::{Analysis, AnalysisRequest, Analyzer, AnalyzerError};

/// Longest slice of an error body carried into the error message.
const MAX_ERROR_BODY: usize = 200;

#[derive(Debug, Clone)]
pub struct HttpAnalyzer {
  client: Client,
  url:    String,
}

impl HttpAnalyzer {
  pub fn new(url: impl Into<String>, timeout: Duration) -> reqwest::Result<Self> {
    let client = Client::builder()
      .timeout(timeout)
      .user_agent(concat!("verity/", env!("CARGO_PKG_VERSION")))
      .build()?;
    Ok(Self { client, url: url.into() })
  }
}

impl Analyzer for HttpAnalyzer {
  async fn analyze(&self, request: AnalysisRequest) -> Result<Analysis, AnalyzerError> {
    let mut builder = self.client.post(&self.url).json(&request);
    if let Some(timeout) = request.timeout {
      builder = builder.timeout(timeout);
    }

    debug!(claim_id = %request.claim_id, url = %self.url, "requesting analysis");
    let response = builder.send().await.map_err(transport_error)?;

    let status = response.status();
    if !status.is_success() {
      let body = response.text().await.unwrap_or_default();
      return Err(status_error(status, &body));
    }

    response.json::<Analysis>().await.map_err(|err| {
      if err.is_decode() {
        AnalyzerError::Permanent(format!("malformed analyzer response: {err}"))
      } else {
        transport_error(err)
      }
    })
  }
}

/// Failures before a status line arrives (connect, timeout, reset) are worth
/// retrying.
fn transport_error(err: reqwest::Error) -> AnalyzerError {
  AnalyzerError::Transient(format!("analyzer request failed: {err}"))
}

/// Overload and server faults are retried; any other refusal is final.
fn status_error(status: StatusCode, body: &str) -> AnalyzerError {
  let body: String = body.trim().chars().take(MAX_ERROR_BODY).collect();
  let message = if body.is_empty() {
    format!("analyzer responded {status}")
  } else {
    format!("analyzer responded {status}: {body}")
  };

  if status.is_server_error()
    || status == StatusCode::TOO_MANY_REQUESTS
    || status == StatusCode::REQUEST_TIMEOUT
  {
    AnalyzerError::Transient(message)
  } else {
    AnalyzerError::Permanent(message)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn server_faults_and_throttling_are_transient() {
    for status in [
      StatusCode::INTERNAL_SERVER_ERROR,
      StatusCode::BAD_GATEWAY,
      StatusCode::SERVICE_UNAVAILABLE,
      StatusCode::TOO_MANY_REQUESTS,
      StatusCode::REQUEST_TIMEOUT,
    ] {
      assert!(status_error(status, "").is_transient(), "{status}");
    }
  }

  #[test]
  fn client_errors_are_permanent() {
    let err = status_error(StatusCode::UNPROCESSABLE_ENTITY, "  claim text is not a claim \n");
    assert!(!err.is_transient());
    assert_eq!(
      err.to_string(),
      "permanent analyzer error: analyzer responded 422 Unprocessable Entity: claim text is not a claim"
    );
  }

  #[test]
  fn long_error_bodies_are_truncated() {
    let body = "x".repeat(MAX_ERROR_BODY * 3);
    let AnalyzerError::Permanent(message) = status_error(StatusCode::BAD_REQUEST, &body) else {
      panic!("400 should be permanent");
    };
    assert!(message.ends_with(&"x".repeat(MAX_ERROR_BODY)));
    assert!(!message.contains(&"x".repeat(MAX_ERROR_BODY + 1)));
  }

  #[tokio::test]
  async fn unreachable_service_is_transient() {
    // Port 9 (discard) on localhost is not expected to accept connections.
    let analyzer = HttpAnalyzer::new("http://127.0.0.1:9/analyze", Duration::from_secs(2))
      .expect("client should build");
    let err = analyzer
      .analyze(AnalysisRequest {
        claim_id:   uuid::Uuid::new_v4(),
        claim_text: "The moon is made of cheese".to_owned(),
        timeout:    None,
      })
      .await
      .expect_err("nothing listens on the discard port");
    assert!(err.is_transient());
  }
}
