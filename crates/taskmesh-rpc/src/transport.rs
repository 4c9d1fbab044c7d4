//! Shared HTTP transport: one pooled `reqwest::Client`, a per-call timeout,
//! and the linear-backoff retry loop both proxies build on.

use std::time::Duration;

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use crate::auth::AuthHeaders;
use crate::error::RpcError;

/// `(i+1)·backoff` linear delay up to `maxCount`, shared by both proxies.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_count: u32,
    pub backoff: Duration,
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_count: 3,
            backoff: Duration::from_millis(200),
            call_timeout: Duration::from_secs(10),
        }
    }
}

/// Whether an HTTP status should short-circuit retries.
///
/// Non-retryable = any 4xx other than 408 (timeout) or 429 (rate limited).
pub fn is_non_retryable(status: StatusCode) -> bool {
    status.is_client_error() && status != StatusCode::REQUEST_TIMEOUT && status != StatusCode::TOO_MANY_REQUESTS
}

/// The shared transport both `Destination` and `Discovery` proxies wrap.
#[derive(Clone)]
pub struct Transport {
    client: reqwest::Client,
    policy: RetryPolicy,
}

impl Transport {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(policy.call_timeout)
                .build()
                .expect("reqwest client builds with a static config"),
            policy,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// POST `body` to `url`, retrying network errors and 5xx with linear
    /// backoff up to `max_count` attempts. `auth` is attached to every
    /// attempt when present (worker→supervisor calls only).
    pub async fn post_with_retry<Req, Resp>(
        &self,
        method: &str,
        url: &str,
        body: &Req,
        auth: Option<&AuthHeaders>,
    ) -> Result<Resp, RpcError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let mut last_err = None;
        for attempt in 0..self.policy.max_count {
            let mut builder = self.client.post(url).json(body);
            if let Some(auth) = auth {
                builder = auth.apply(builder);
            }

            match builder.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response.json::<Resp>().await?);
                    }
                    if is_non_retryable(status) {
                        return Err(RpcError::NonRetryable {
                            method: method.to_owned(),
                            status: status.as_u16(),
                        });
                    }
                    warn!(method, attempt, status = status.as_u16(), "rpc call failed, retrying");
                    last_err = Some(RpcError::Transport(
                        response.error_for_status().unwrap_err(),
                    ));
                }
                Err(err) => {
                    warn!(method, attempt, error = %err, "rpc transport error, retrying");
                    last_err = Some(RpcError::Transport(err));
                }
            }

            if attempt + 1 < self.policy.max_count {
                tokio::time::sleep(self.policy.backoff * (attempt + 1)).await;
            }
        }

        let _ = last_err;
        Err(RpcError::RetriesExhausted {
            method: method.to_owned(),
            attempts: self.policy.max_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_retryable_excludes_408_and_429() {
        assert!(!is_non_retryable(StatusCode::REQUEST_TIMEOUT));
        assert!(!is_non_retryable(StatusCode::TOO_MANY_REQUESTS));
    }

    #[test]
    fn non_retryable_includes_other_4xx() {
        assert!(is_non_retryable(StatusCode::NOT_FOUND));
        assert!(is_non_retryable(StatusCode::BAD_REQUEST));
    }

    #[test]
    fn server_errors_are_retryable() {
        assert!(!is_non_retryable(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(!is_non_retryable(StatusCode::BAD_GATEWAY));
    }

    #[tokio::test]
    async fn retries_past_a_transient_500() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/worker/rpc/receive"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/worker/rpc/receive"))
            .respond_with(ResponseTemplate::new(200).set_body_json(true))
            .mount(&server)
            .await;

        let transport = Transport::new(RetryPolicy {
            max_count: 3,
            backoff: Duration::from_millis(1),
            call_timeout: Duration::from_secs(5),
        });
        let url = format!("{}/worker/rpc/receive", server.uri());
        let ok: bool = transport
            .post_with_retry("receive", &url, &serde_json::json!({}), None)
            .await
            .unwrap();
        assert!(ok);
    }

    #[tokio::test]
    async fn stops_immediately_on_non_retryable_status() {
        use wiremock::matchers::{method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/worker/rpc/receive"))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;

        let transport = Transport::new(RetryPolicy {
            max_count: 3,
            backoff: Duration::from_millis(1),
            call_timeout: Duration::from_secs(5),
        });
        let url = format!("{}/worker/rpc/receive", server.uri());
        let result: Result<bool, RpcError> = transport
            .post_with_retry("receive", &url, &serde_json::json!({}), None)
            .await;
        assert!(matches!(result, Err(RpcError::NonRetryable { status: 404, .. })));
    }
}
