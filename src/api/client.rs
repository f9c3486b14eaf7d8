//! HTTP client for the game backend.

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::api::types::{
    ActionRequest, ActionResponse, InitResponse, MessageLog, MessagesResponse, RunResponse,
};
use crate::config::ApiConfig;
use crate::error::ApiError;
use crate::session::RunStatus;

/// Operations the session driver needs from the backend.
#[async_trait]
pub trait GameApi: Send + Sync {
    /// Start a new conversation and its first run.
    async fn init(&self) -> Result<InitResponse, ApiError>;

    /// Enqueue a run for one user message.
    async fn submit_action(&self, request: &ActionRequest) -> Result<ActionResponse, ApiError>;

    /// Current status of a run.
    async fn run_status(&self, thread_id: &str, run_id: &str) -> Result<RunStatus, ApiError>;

    /// Full conversation log, oldest first.
    async fn messages(&self, thread_id: &str) -> Result<MessageLog, ApiError>;
}

/// [`GameApi`] over JSON/HTTP.
pub struct HttpGameApi {
    client: Client,
    config: ApiConfig,
}

impl HttpGameApi {
    pub fn new(config: ApiConfig) -> Result<Self, ApiError> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(|e| ApiError::Network {
            reason: format!("failed to build HTTP client: {}", e),
        })?;

        Ok(Self { client, config })
    }

    fn api_url(&self, path: &str) -> String {
        format!(
            "{}/api/v1/{}",
            self.config.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    async fn send<B, R>(&self, method: Method, path: &str, body: Option<&B>) -> Result<R, ApiError>
    where
        B: Serialize + ?Sized + Sync,
        R: DeserializeOwned,
    {
        let url = self.api_url(path);
        tracing::debug!("{} {}", method, url);

        let mut request = self
            .client
            .request(method, &url)
            .header("Content-Type", "application/json");
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            tracing::error!("Request to {} failed: {}", url, e);
            ApiError::Network {
                reason: e.to_string(),
            }
        })?;

        let status = response.status();
        let text = response.text().await.map_err(|e| ApiError::Network {
            reason: format!("failed to read response body: {}", e),
        })?;

        tracing::debug!("Response status: {}", status);
        tracing::trace!("Response body: {}", text);

        if !status.is_success() {
            return Err(ApiError::Server {
                status: status.as_u16(),
                body: text,
            });
        }

        serde_json::from_str(&text).map_err(|e| ApiError::InvalidResponse {
            reason: format!("JSON parse error: {}. Raw: {}", e, text),
        })
    }
}

#[async_trait]
impl GameApi for HttpGameApi {
    async fn init(&self) -> Result<InitResponse, ApiError> {
        self.send::<(), _>(Method::POST, "init/", None).await
    }

    async fn submit_action(&self, request: &ActionRequest) -> Result<ActionResponse, ApiError> {
        self.send(Method::POST, "action/", Some(request)).await
    }

    async fn run_status(&self, thread_id: &str, run_id: &str) -> Result<RunStatus, ApiError> {
        let path = format!(
            "threads/{}/runs/{}",
            urlencoding::encode(thread_id),
            urlencoding::encode(run_id)
        );
        let run: RunResponse = self.send::<(), _>(Method::GET, &path, None).await?;
        Ok(run.status)
    }

    async fn messages(&self, thread_id: &str) -> Result<MessageLog, ApiError> {
        let path = format!("messages/{}", urlencoding::encode(thread_id));
        let resp: MessagesResponse = self.send::<(), _>(Method::GET, &path, None).await?;
        MessageLog::try_from(resp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_url_joins_paths() {
        let config = ApiConfig::default().with_base_url("http://host:8000/");
        let api = HttpGameApi::new(config).unwrap();

        assert_eq!(api.api_url("init/"), "http://host:8000/api/v1/init/");
        assert_eq!(
            api.api_url("/threads/t1/runs/r1"),
            "http://host:8000/api/v1/threads/t1/runs/r1"
        );
    }
}
