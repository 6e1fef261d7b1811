//! HTTP client for the Gemini Interactions API.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::client::{CreateJob, Job, JobClient};
use crate::config::ProviderConfig;
use crate::{DeepResearchError, ProviderError, SecretValue};

const API_KEY_HEADER: &str = "x-goog-api-key";

pub struct InteractionsClient {
    http: Client,
    base_url: String,
    api_key: SecretValue,
}

impl std::fmt::Debug for InteractionsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InteractionsClient")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key)
            .finish()
    }
}

impl InteractionsClient {
    pub fn new(config: &ProviderConfig, api_key: SecretValue) -> Result<Self, DeepResearchError> {
        let http = Client::builder()
            .timeout(config.request_timeout())
            .user_agent(concat!("deepresearch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|err| {
                DeepResearchError::InvalidConfiguration(format!("http client init failed: {err}"))
            })?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/interactions{}", self.base_url, path)
    }

    async fn send(&self, request: RequestBuilder) -> Result<Job, ProviderError> {
        let response = request
            .header(API_KEY_HEADER, self.api_key.expose())
            .send()
            .await
            .map_err(|err| ProviderError::Transport(err.to_string()))?;
        parse_response(response).await
    }
}

#[async_trait]
impl JobClient for InteractionsClient {
    #[instrument(name = "provider.create", skip(self, request), fields(resuming = request.previous_interaction_id.is_some()))]
    async fn create(&self, request: CreateJob) -> Result<Job, ProviderError> {
        let job = self.send(self.http.post(self.url("")).json(&request)).await?;
        debug!(job_id = %job.id, status = %job.status, "provider accepted interaction");
        Ok(job)
    }

    #[instrument(name = "provider.get", skip(self))]
    async fn get(&self, job_id: &str) -> Result<Job, ProviderError> {
        self.send(self.http.get(self.url(&format!("/{job_id}")))).await
    }

    #[instrument(name = "provider.cancel", skip(self))]
    async fn cancel(&self, job_id: &str) -> Result<Job, ProviderError> {
        self.send(self.http.post(self.url(&format!("/{job_id}:cancel"))))
            .await
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

async fn parse_response(response: Response) -> Result<Job, ProviderError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|err| ProviderError::Transport(err.to_string()))?;

    if !status.is_success() {
        return Err(ProviderError::rejected(
            status.as_u16(),
            rejection_message(&body, status.canonical_reason()),
        ));
    }

    serde_json::from_str::<Job>(&body).map_err(|err| ProviderError::Decode(err.to_string()))
}

/// Provider's own `error.message` when the body carries one, else the raw body.
fn rejection_message(body: &str, reason: Option<&str>) -> String {
    if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(body) {
        return envelope.error.message;
    }
    let trimmed = body.trim();
    if trimmed.is_empty() {
        reason.unwrap_or("provider request rejected").to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_prefers_provider_message() {
        let body = r#"{"error": {"code": 400, "message": "API key not valid. Please pass a valid API key.", "status": "INVALID_ARGUMENT"}}"#;
        assert_eq!(
            rejection_message(body, Some("Bad Request")),
            "API key not valid. Please pass a valid API key."
        );
    }

    #[test]
    fn rejection_falls_back_to_body_then_reason() {
        assert_eq!(rejection_message(" quota exceeded ", None), "quota exceeded");
        assert_eq!(rejection_message("", Some("Too Many Requests")), "Too Many Requests");
    }

    #[test]
    fn urls_are_built_from_trimmed_base() {
        let config = ProviderConfig {
            base_url: "http://localhost:9000/v1beta/".into(),
            ..ProviderConfig::default()
        };
        let client = InteractionsClient::new(&config, SecretValue::new("k")).unwrap();
        assert_eq!(client.url(""), "http://localhost:9000/v1beta/interactions");
        assert_eq!(
            client.url("/abc:cancel"),
            "http://localhost:9000/v1beta/interactions/abc:cancel"
        );
    }

    #[test]
    fn debug_output_hides_key() {
        let client =
            InteractionsClient::new(&ProviderConfig::default(), SecretValue::new("secret-key"))
                .unwrap();
        assert!(!format!("{client:?}").contains("secret-key"));
    }
}
