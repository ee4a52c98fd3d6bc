//! HTTP transport for the storefront account API.
//!
//! `ApiClient` knows nothing about sessions: callers hand it an
//! `ApiRequest` and, for the protected surface, the bearer token to attach.
//! Token lookup and renewal live in `auth::SessionManager`.

use std::fmt;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::{header, Client, Method, Url};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// Base URL used when nothing is configured
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000/api/v1";

/// HTTP request timeout in seconds.
/// 30s allows for slow API responses while failing fast enough for good UX.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Standard response envelope: `{"success": .., "message": .., "data": ..}`.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope<T> {
    #[serde(default)]
    pub success: bool,
    pub message: Option<String>,
    pub data: Option<T>,
}

impl<T> Envelope<T> {
    /// Envelope for a 2xx response without a body
    fn empty() -> Self {
        Self {
            success: true,
            message: None,
            data: None,
        }
    }

    /// Take the payload, treating its absence as a malformed response.
    pub fn into_data(self) -> Result<T, ApiError> {
        self.data
            .ok_or_else(|| ApiError::InvalidResponse("response is missing `data`".to_string()))
    }
}

/// One call against the API, kept as plain data so it can be dispatched
/// again after the session has been renewed.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    path: Vec<String>,
    body: Option<Value>,
    authorized: bool,
}

impl ApiRequest {
    pub fn new<I, S>(method: Method, path: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            method,
            path: path.into_iter().map(Into::into).collect(),
            body: None,
            authorized: false,
        }
    }

    pub fn get<I, S>(path: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(Method::GET, path)
    }

    pub fn post<I, S>(path: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(Method::POST, path)
    }

    /// Attach a JSON body
    pub fn with_body<B: Serialize>(mut self, body: &B) -> Result<Self, ApiError> {
        self.body = Some(serde_json::to_value(body).map_err(ApiError::Encode)?);
        Ok(self)
    }

    /// Mark the request as part of the protected surface: it carries the
    /// session's bearer token and is renewed-and-retried on a 401.
    pub fn authorized(mut self) -> Self {
        self.authorized = true;
        self
    }

    pub fn is_authorized(&self) -> bool {
        self.authorized
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }
}

impl fmt::Display for ApiRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} /{}", self.method, self.path.join("/"))
    }
}

/// API client for the account service.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    /// Create a new API client rooted at `base_url`
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .with_context(|| format!("Invalid API base URL: {}", base_url))?;
        if base_url.cannot_be_a_base() {
            bail!("API base URL cannot carry a path: {}", base_url);
        }

        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json"),
        );

        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self { client, base_url })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Resolve path segments against the base URL. Each segment is
    /// percent-encoded, so opaque tokens are safe to pass as-is.
    fn endpoint(&self, path: &[String]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().extend(path);
        }
        url
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            debug!(%status, body = %ApiError::truncate_body(&body), "Request rejected");
            Err(ApiError::from_status(status, &body))
        }
    }

    /// Dispatch a request, attaching `bearer` as the Authorization header
    /// when supplied.
    pub async fn send<T: DeserializeOwned>(
        &self,
        request: &ApiRequest,
        bearer: Option<&str>,
    ) -> Result<Envelope<T>, ApiError> {
        let url = self.endpoint(&request.path);
        debug!(request = %request, bearer = bearer.is_some(), "Dispatching request");

        let mut builder = self.client.request(request.method.clone(), url);
        if let Some(token) = bearer {
            builder = builder.bearer_auth(token);
        }
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let response = Self::check_response(response).await?;

        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(Envelope::empty());
        }

        serde_json::from_str(&text).map_err(|e| {
            ApiError::InvalidResponse(format!("{} in {}", e, ApiError::truncate_body(&text)))
        })
    }
}
