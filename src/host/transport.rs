//! Remote function transport: the "invoke remote function" collaborator
//!
//! Used for endpoint probes. Feature code making real calls through its own
//! client reports outcomes with `HealthMonitor::record_api_call`.

use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;

/// Remote call errors
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Server returned status {0}")]
    ServerError(reqwest::StatusCode),
    #[error("Call timed out after {0:?}")]
    Timeout(Duration),
    #[error("Remote function error: {0}")]
    Remote(String),
}

/// Successful call outcome
#[derive(Debug, Clone)]
pub struct InvokeResponse {
    pub elapsed: Duration,
    pub body: serde_json::Value,
}

/// Invoke a named remote function with a JSON body.
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    async fn invoke(
        &self,
        target: &str,
        body: &serde_json::Value,
        timeout: Duration,
    ) -> Result<InvokeResponse, TransportError>;
}

/// HTTP transport: POSTs to `{base_url}/{target}`
#[derive(Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpTransport {
    pub fn new(base_url: &str, api_key: Option<&str>) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder().build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.map(str::to_string),
        })
    }

    fn url_for(&self, target: &str) -> String {
        format!("{}/{}", self.base_url, target.trim_start_matches('/'))
    }
}

#[async_trait]
impl RemoteTransport for HttpTransport {
    async fn invoke(
        &self,
        target: &str,
        body: &serde_json::Value,
        timeout: Duration,
    ) -> Result<InvokeResponse, TransportError> {
        let started = Instant::now();

        let mut request = self.http.post(self.url_for(target)).timeout(timeout).json(body);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout(timeout)
            } else {
                TransportError::Http(e)
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::ServerError(status));
        }

        // Probe targets may answer with an empty body
        let bytes = response.bytes().await?;
        let body = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .map_err(|e| TransportError::Remote(format!("invalid JSON response: {e}")))?
        };

        if let Some(error) = body.get("error").filter(|e| !e.is_null()) {
            return Err(TransportError::Remote(error.to_string()));
        }

        Ok(InvokeResponse {
            elapsed: started.elapsed(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_joins_without_double_slash() {
        let transport = HttpTransport::new("https://api.example.com/functions/v1/", None).unwrap();
        assert_eq!(
            transport.url_for("/geocode"),
            "https://api.example.com/functions/v1/geocode"
        );
    }
}
