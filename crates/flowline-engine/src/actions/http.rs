//! Outbound webhook action
//!
//! Performs an HTTP request with configurable method/headers/body/timeout
//! and stores the response into the step output. Transient failures
//! (connect errors, timeouts, 5xx) are retried inside the executor per its
//! [`RetryPolicy`]; the interpreter only ever sees the final outcome.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{ActionError, ActionExecutor};
use crate::retry::RetryPolicy;
use flowline_core::{ActionConfig, RunContext};

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Executor for `webhook_call` actions
pub struct WebhookCallExecutor {
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl Default for WebhookCallExecutor {
    fn default() -> Self {
        Self::new(RetryPolicy::exponential())
    }
}

impl WebhookCallExecutor {
    /// Create an executor with the given retry policy
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            client: reqwest::Client::new(),
            retry,
        }
    }

    async fn attempt(
        &self,
        method: &reqwest::Method,
        url: &str,
        headers: &std::collections::BTreeMap<String, String>,
        body: Option<&Value>,
        timeout: Duration,
    ) -> Result<Value, ActionError> {
        let mut request = self.client.request(method.clone(), url).timeout(timeout);
        for (name, value) in headers {
            request = request.header(name, value);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ActionError::retryable(format!("webhook request timed out: {e}"))
                    .with_type("WEBHOOK_TIMEOUT")
            } else {
                ActionError::retryable(format!("webhook request failed: {e}"))
                    .with_type("WEBHOOK_REQUEST_FAILED")
            }
        })?;

        let status = response.status();
        let body_text = response.text().await.unwrap_or_default();
        let body_json: Value =
            serde_json::from_str(&body_text).unwrap_or(Value::String(body_text));

        if status.is_server_error() {
            return Err(ActionError::retryable(format!(
                "webhook returned server error {status}"
            ))
            .with_type("WEBHOOK_SERVER_ERROR")
            .with_details(json!({"status": status.as_u16(), "body": body_json})));
        }
        if status.is_client_error() {
            return Err(ActionError::non_retryable(format!(
                "webhook returned client error {status}"
            ))
            .with_type("WEBHOOK_CLIENT_ERROR")
            .with_details(json!({"status": status.as_u16(), "body": body_json})));
        }

        Ok(json!({"status": status.as_u16(), "response": body_json}))
    }
}

#[async_trait]
impl ActionExecutor for WebhookCallExecutor {
    fn action_type(&self) -> &'static str {
        "webhook_call"
    }

    async fn execute(&self, config: &ActionConfig, _ctx: &RunContext) -> Result<Value, ActionError> {
        let ActionConfig::WebhookCall {
            url,
            method,
            headers,
            body,
            timeout_secs,
        } = config
        else {
            return Err(ActionError::non_retryable(
                "config does not match action type 'webhook_call'",
            )
            .with_type("CONFIG_MISMATCH"));
        };

        let method = match method.as_deref() {
            None => reqwest::Method::POST,
            Some(m) => reqwest::Method::from_str(&m.to_uppercase()).map_err(|_| {
                ActionError::non_retryable(format!("invalid HTTP method '{m}'"))
                    .with_type("INVALID_METHOD")
            })?,
        };
        let timeout = Duration::from_secs(timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS));

        let mut attempt = 1;
        loop {
            match self
                .attempt(&method, url, headers, body.as_ref(), timeout)
                .await
            {
                Ok(output) => {
                    debug!(%url, attempt, "webhook call succeeded");
                    return Ok(output);
                }
                Err(err) if err.retryable && self.retry.should_retry(attempt) => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(%url, attempt, error = %err, ?delay, "webhook call failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
