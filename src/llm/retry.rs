//! Retry wrapper for LLM HTTP calls.
//!
//! Retries on 429 and 5xx responses and on connection errors, with
//! exponential backoff. A 429 with a `Retry-After` header uses the
//! server's delay instead. Request timeouts are not retried; a request
//! that hit the deadline once will hit it again.

use std::time::Duration;

use anyhow::{Context, Result};

const BASE_BACKOFF_SECS: u64 = 2;

fn backoff_secs(attempt: u32) -> u64 {
    BASE_BACKOFF_SECS << attempt
}

fn is_retryable_status(status: reqwest::StatusCode) -> bool {
    status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn retry_after_secs(resp: &reqwest::Response) -> Option<u64> {
    resp.headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse()
        .ok()
}

/// Send `req`, retrying up to `max_retries` extra times on retryable
/// failures. A response with a non-retryable status (or the last retry's
/// status) is returned as-is for the caller to inspect.
pub async fn send_with_retry(
    req: reqwest::RequestBuilder,
    max_retries: u32,
) -> Result<reqwest::Response> {
    let mut attempt = 0u32;
    loop {
        let this_try = match req.try_clone() {
            Some(r) => r,
            // Streaming bodies cannot be replayed, so send once.
            None => return Ok(req.send().await.context("LLM request failed")?),
        };

        match this_try.send().await {
            Ok(resp) => {
                let status = resp.status();
                if !is_retryable_status(status) || attempt >= max_retries {
                    return Ok(resp);
                }
                let delay = retry_after_secs(&resp).unwrap_or_else(|| backoff_secs(attempt));
                tracing::warn!(
                    "LLM request returned {status}, retrying in {delay}s ({}/{max_retries})",
                    attempt + 1
                );
                tokio::time::sleep(Duration::from_secs(delay)).await;
            }
            Err(e) if e.is_timeout() => {
                return Err(e).context("LLM request timed out");
            }
            Err(e) => {
                if attempt >= max_retries {
                    return Err(e).context("LLM request failed");
                }
                let delay = backoff_secs(attempt);
                tracing::warn!(
                    "LLM request failed ({e}), retrying in {delay}s ({}/{max_retries})",
                    attempt + 1
                );
                tokio::time::sleep(Duration::from_secs(delay)).await;
            }
        }
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_retryable_statuses() {
        assert!(is_retryable_status(reqwest::StatusCode::TOO_MANY_REQUESTS));
        assert!(is_retryable_status(reqwest::StatusCode::INTERNAL_SERVER_ERROR));
        assert!(is_retryable_status(reqwest::StatusCode::SERVICE_UNAVAILABLE));
        assert!(!is_retryable_status(reqwest::StatusCode::OK));
        assert!(!is_retryable_status(reqwest::StatusCode::BAD_REQUEST));
        assert!(!is_retryable_status(reqwest::StatusCode::NOT_FOUND));
    }

    #[test]
    fn test_backoff_doubles() {
        assert_eq!(backoff_secs(0), 2);
        assert_eq!(backoff_secs(1), 4);
        assert_eq!(backoff_secs(2), 8);
    }

    #[tokio::test]
    async fn test_retries_429_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "0"))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let req = client
            .post(format!("{}/v1/embeddings", server.uri()))
            .json(&serde_json::json!({}));
        let resp = send_with_retry(req, 2).await.unwrap();
        assert_eq!(resp.status(), 200);
    }

    #[tokio::test]
    async fn test_exhausted_retries_return_last_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let req = client.post(server.uri()).json(&serde_json::json!({}));
        let resp = send_with_retry(req, 0).await.unwrap();
        assert_eq!(resp.status(), 500);
    }
}
