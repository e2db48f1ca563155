use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use shared::{
    domain::SessionId,
    error::ApiError,
    protocol::{OperationRequest, OperationResult, ResetResponse, UploadResponse},
};
use url::Url;

use crate::{error::ServiceError, service::DatasetService};

/// Upper bound on how long any single service call may take before it is
/// reported as a transport failure.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Dataset service reached over HTTP.
pub struct HttpDatasetService {
    http: Client,
    base_url: Url,
}

impl HttpDatasetService {
    pub fn new(server_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(server_url.trim())
            .with_context(|| format!("invalid server url '{server_url}'"))?;
        if base_url.cannot_be_a_base() {
            bail!("server url '{server_url}' cannot be used as a base url");
        }
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn session_endpoint(&self, session_id: &SessionId, action: &str) -> Url {
        self.endpoint(&["sessions", session_id.as_str(), action])
    }
}

#[async_trait]
impl DatasetService for HttpDatasetService {
    async fn upload(&self, filename: &str, bytes: &[u8]) -> Result<UploadResponse, ServiceError> {
        let mut url = self.endpoint(&["upload"]);
        url.query_pairs_mut().append_pair("filename", filename);
        let response = self
            .http
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "text/csv")
            .body(bytes.to_vec())
            .send()
            .await
            .map_err(transport_error)?;
        decode_json(expect_success(response).await?).await
    }

    async fn apply_operation(
        &self,
        session_id: &SessionId,
        request: &OperationRequest,
    ) -> Result<OperationResult, ServiceError> {
        let response = self
            .http
            .post(self.session_endpoint(session_id, "operations"))
            .json(request)
            .send()
            .await
            .map_err(transport_error)?;
        decode_json(expect_success(response).await?).await
    }

    async fn reset(&self, session_id: &SessionId) -> Result<ResetResponse, ServiceError> {
        let response = self
            .http
            .post(self.session_endpoint(session_id, "reset"))
            .send()
            .await
            .map_err(transport_error)?;
        decode_json(expect_success(response).await?).await
    }

    async fn export(&self, session_id: &SessionId) -> Result<Vec<u8>, ServiceError> {
        let response = self
            .http
            .get(self.session_endpoint(session_id, "export"))
            .send()
            .await
            .map_err(transport_error)?;
        let bytes = expect_success(response)
            .await?
            .bytes()
            .await
            .map_err(transport_error)?;
        Ok(bytes.to_vec())
    }
}

/// Passes 2xx responses through. Anything else is a rejection when the body
/// is a service error document, and a transport failure otherwise.
async fn expect_success(response: Response) -> Result<Response, ServiceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.bytes().await.map_err(transport_error)?;
    match serde_json::from_slice::<ApiError>(&body) {
        Ok(api_error) => Err(ServiceError::Rejected(api_error)),
        Err(_) => Err(ServiceError::Transport(format!(
            "unexpected response status {status}"
        ))),
    }
}

async fn decode_json<T: DeserializeOwned>(response: Response) -> Result<T, ServiceError> {
    let body = response.bytes().await.map_err(transport_error)?;
    serde_json::from_slice(&body).map_err(|e| ServiceError::Malformed(e.to_string()))
}

fn transport_error(err: reqwest::Error) -> ServiceError {
    if err.is_timeout() {
        ServiceError::Transport("request timed out".to_string())
    } else if err.is_connect() {
        ServiceError::Transport(format!("failed to connect: {err}"))
    } else {
        ServiceError::Transport(err.to_string())
    }
}
