//! Minimal Sui JSON-RPC client.

use super::TransportError;
use backoff::future::retry;
use backoff::ExponentialBackoff;
use reqwest::Client;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct SuiRpcClient {
    client: Client,
    url: String,
    next_id: Arc<AtomicU64>,
    max_elapsed: Duration,
}

impl SuiRpcClient {
    pub fn new(url: String) -> Self {
        Self {
            client: Client::new(),
            url,
            next_id: Arc::new(AtomicU64::new(1)),
            max_elapsed: Duration::from_secs(30),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Invoke a JSON-RPC method and return its `result`.
    ///
    /// Network failures, 429 and 5xx responses are retried with exponential
    /// backoff; JSON-RPC errors and 4xx responses are not.
    pub async fn call(&self, method: &str, params: Value) -> Result<Value, TransportError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        let backoff = ExponentialBackoff {
            max_elapsed_time: Some(self.max_elapsed),
            ..Default::default()
        };

        debug!(method, id, "Sui RPC call");

        let response = retry(backoff, || async {
            let response = self
                .client
                .post(&self.url)
                .json(&body)
                .send()
                .await
                .map_err(|e| backoff::Error::transient(TransportError::Network(e.to_string())))?;

            let status = response.status();
            if status == 429 || status.is_server_error() {
                return Err(backoff::Error::transient(TransportError::Http {
                    status: status.as_u16(),
                    message: "Server busy".to_string(),
                }));
            }
            if !status.is_success() {
                return Err(backoff::Error::permanent(TransportError::Http {
                    status: status.as_u16(),
                    message: "Client error".to_string(),
                }));
            }

            response
                .json::<Value>()
                .await
                .map_err(|e| backoff::Error::permanent(TransportError::Parse(e.to_string())))
        })
        .await?;

        unwrap_result(response)
    }
}

fn unwrap_result(mut response: Value) -> Result<Value, TransportError> {
    if let Some(error) = response.get("error") {
        return Err(TransportError::Rpc {
            code: error.get("code").and_then(|c| c.as_i64()).unwrap_or(0),
            message: error
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown error")
                .to_string(),
        });
    }

    response
        .get_mut("result")
        .map(Value::take)
        .ok_or_else(|| TransportError::Parse("Missing result field".to_string()))
}
