use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use serde_json::Value;

use super::transport::{DeviceError, DeviceTransport};

#[derive(Deserialize)]
struct ExecResponse {
    output: String,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: String,
}

/// Transport speaking the management API over HTTPS. One client instance
/// serves the whole fleet; per-device throttling lives in the device
/// client above this layer.
pub struct HttpTransport {
    client: Client,
    base_url: String,
    api_key: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    fn url(&self, device_id: &str, tail: &str) -> String {
        format!("{}/devices/{}/{}", self.base_url, device_id, tail)
    }

    fn classify_send_error(err: reqwest::Error) -> DeviceError {
        if err.is_timeout() {
            DeviceError::Timeout
        } else if err.is_connect() {
            DeviceError::Unreachable(err.to_string())
        } else {
            DeviceError::Protocol(err.to_string())
        }
    }

    async fn classify_status(res: Response, resource: &str) -> Result<Response, DeviceError> {
        let status = res.status();
        if status.is_success() {
            return Ok(res);
        }
        let detail = match res.json::<ApiErrorBody>().await {
            Ok(body) if !body.message.is_empty() => body.message,
            _ => status.to_string(),
        };
        Err(match status {
            StatusCode::NOT_FOUND => DeviceError::NotFound(resource.to_string()),
            s if s.is_server_error() => DeviceError::Upstream(detail),
            StatusCode::TOO_MANY_REQUESTS => DeviceError::Upstream(detail),
            _ => DeviceError::Rejected(detail),
        })
    }
}

#[async_trait]
impl DeviceTransport for HttpTransport {
    async fn read(&self, device_id: &str, resource: &str) -> Result<Value, DeviceError> {
        let res = self
            .client
            .get(self.url(device_id, resource))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(Self::classify_send_error)?;
        let res = Self::classify_status(res, resource).await?;
        res.json::<Value>()
            .await
            .map_err(|e| DeviceError::Protocol(e.to_string()))
    }

    async fn patch(
        &self,
        device_id: &str,
        resource: &str,
        delta: &Value,
    ) -> Result<Value, DeviceError> {
        let res = self
            .client
            .patch(self.url(device_id, resource))
            .bearer_auth(&self.api_key)
            .json(delta)
            .send()
            .await
            .map_err(Self::classify_send_error)?;
        let res = Self::classify_status(res, resource).await?;
        res.json::<Value>()
            .await
            .map_err(|e| DeviceError::Protocol(e.to_string()))
    }

    async fn execute(&self, device_id: &str, command: &str) -> Result<String, DeviceError> {
        let res = self
            .client
            .post(self.url(device_id, "exec"))
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({ "command": command }))
            .send()
            .await
            .map_err(Self::classify_send_error)?;
        let res = Self::classify_status(res, "exec").await?;
        res.json::<ExecResponse>()
            .await
            .map(|body| body.output)
            .map_err(|e| DeviceError::Protocol(e.to_string()))
    }

    async fn health(&self, device_id: &str) -> Result<(), DeviceError> {
        let res = self
            .client
            .get(self.url(device_id, "status"))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(Self::classify_send_error)?;
        Self::classify_status(res, "status").await.map(|_| ())
    }
}
