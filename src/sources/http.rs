use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::StatusCode;
use std::thread;
use std::time::Duration;
use tracing::warn;

use super::SourceError;
use crate::jobs::StatusLog;

const USER_AGENT: &str = concat!("gw2_analyzer/", env!("CARGO_PKG_VERSION"));

pub fn build_client(timeout: Duration) -> Result<Client, SourceError> {
    Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .map_err(SourceError::Http)
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub retries: u32,
    pub backoff: Duration,  // doubled after every failed attempt
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            retries: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        RetryPolicy { retries: 1, backoff: Duration::ZERO }
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff * 2u32.saturating_pow(attempt)
    }
}

fn retryable(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Sends the request built by `make`, retrying transport errors, 429 and 5xx
/// responses. Other error statuses fail immediately.
pub fn get_with_retry<F>(
    policy: &RetryPolicy,
    status: &StatusLog,
    what: &str,
    make: F,
) -> Result<Response, SourceError>
where
    F: Fn() -> RequestBuilder,
{
    let attempts = policy.retries.max(1);
    let mut last = None;

    for attempt in 0..attempts {
        match make().send() {
            Ok(resp) if resp.status().is_success() => return Ok(resp),
            Ok(resp) => {
                let code = resp.status();
                let body = resp.text().unwrap_or_default();
                let err = SourceError::Status { code, body };
                if !retryable(code) {
                    return Err(err);
                }
                last = Some(err);
            }
            Err(e) => last = Some(SourceError::Http(e)),
        }

        if attempt + 1 < attempts {
            let wait = policy.delay(attempt);
            if let Some(e) = &last {
                warn!(what, attempt = attempt + 1, error = %e, "Request failed, retrying");
                status.post(format!(
                    "{what} failed: {e}. Retrying ({}/{attempts})...",
                    attempt + 1
                ));
            }
            thread::sleep(wait);
        }
    }

    Err(last.unwrap_or(SourceError::Exhausted(what.to_string())))
}
