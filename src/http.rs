/*!
    HTTP boundary.

    `ApiClient` owns an explicit [`ClientConfig`] (base URL, bearer token,
    user agent, timeout) instead of reading ambient globals, so independent
    clients can coexist in tests. Everything that touches the network goes
    through here: spec downloads and live endpoint execution.

    Spec downloads race a [`CancellationToken`] so a caller that goes away
    mid-download never has its snapshot updated afterwards.
*/

use crate::error::{AppError, AppResult};
use crate::spec::{self, NormalizedSpec, SnapshotHandle};
use log::{debug, error, info};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest::{Client, Method};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_USER_AGENT: &str = "autoadmin";
pub const DEFAULT_SWAGGER_PATH: &str = "/swagger/doc.json";

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    base_url: String,
    token: Option<String>,
    pub user_agent: String,
    pub timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            base_url: String::new(),
            token: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

impl ClientConfig {
    pub fn new(base_url: &str) -> Self {
        let mut config = ClientConfig::default();
        config.set_base_url(base_url);
        config
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// Trailing slashes are dropped so paths can be appended verbatim.
    pub fn set_base_url(&mut self, base_url: &str) {
        self.base_url = base_url.trim().trim_end_matches('/').to_string();
    }

    /// Blank tokens clear the token.
    pub fn set_token(&mut self, token: &str) {
        let token = token.trim();
        self.token = (!token.is_empty()).then(|| token.to_string());
    }

    pub fn clear_token(&mut self) {
        self.token = None;
    }
}

/// A fully built request, ready to send.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedRequest {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<String>,
}

impl PreparedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Response as received, before any interpretation.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: String,
    pub elapsed_ms: u64,
}

impl RawResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Where a spec document comes from.
#[derive(Debug, Clone, PartialEq)]
pub enum SpecSource {
    /// Pasted or previously stored text.
    Text(String),
    File(PathBuf),
    Url(String),
    /// `{base_url}{swagger_path}`, conventionally `/swagger/doc.json`.
    Convention { base_url: String, swagger_path: String },
}

impl SpecSource {
    /// A `--spec` argument: URLs are fetched, anything else is a file.
    pub fn from_arg(arg: &str) -> Self {
        if arg.starts_with("http://") || arg.starts_with("https://") {
            SpecSource::Url(arg.to_string())
        } else {
            SpecSource::File(PathBuf::from(arg))
        }
    }

    pub fn convention(base_url: &str, swagger_path: Option<&str>) -> Self {
        SpecSource::Convention {
            base_url: base_url.trim_end_matches('/').to_string(),
            swagger_path: swagger_path.unwrap_or(DEFAULT_SWAGGER_PATH).to_string(),
        }
    }
}

pub struct ApiClient {
    client: Client,
    config: ClientConfig,
}

impl ApiClient {
    pub fn new(config: ClientConfig) -> AppResult<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(ApiClient { client, config })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn set_token(&mut self, token: &str) {
        self.config.set_token(token);
    }

    pub fn set_base_url(&mut self, base_url: &str) {
        self.config.set_base_url(base_url);
    }

    /// Send a prepared request. Any HTTP status is a successful send; only
    /// transport failures are errors.
    pub async fn send(&self, request: &PreparedRequest) -> AppResult<RawResponse> {
        debug!("Attempting {} {}", request.method, request.url);
        if request.url.trim().is_empty() {
            error!("Request URL is empty!");
            return Err(AppError::EndpointExecution {
                status: None,
                message: "Attempted request with empty URL".to_string(),
            });
        }
        let method = Method::from_bytes(request.method.as_bytes()).map_err(|e| AppError::EndpointExecution {
            status: None,
            message: format!("Invalid method {}: {}", request.method, e),
        })?;

        let mut headers = HeaderMap::new();
        for (name, value) in &request.headers {
            if name.eq_ignore_ascii_case("authorization") {
                debug!("Authorization header length: {}", value.len());
            }
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| AppError::EndpointExecution {
                status: None,
                message: format!("Invalid header name {}: {}", name, e),
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| AppError::EndpointExecution {
                status: None,
                message: format!("Invalid value for header {}: {}", name, e),
            })?;
            headers.insert(name, value);
        }
        if !headers.contains_key(USER_AGENT) {
            if let Ok(agent) = HeaderValue::from_str(&self.config.user_agent) {
                headers.insert(USER_AGENT, agent);
            }
        }

        let mut builder = self.client.request(method, &request.url).headers(headers);
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let started = Instant::now();
        let response = builder.send().await.map_err(|e| {
            error!("{} {} failed: {}", request.method, request.url, e);
            if e.is_connect() {
                debug!("Failure is a connection error");
            } else if e.is_timeout() {
                debug!("Failure is a timeout");
            }
            AppError::EndpointExecution {
                status: None,
                message: e.to_string(),
            }
        })?;
        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await?;
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        debug!("{} {} returned status {} in {}ms", request.method, request.url, status, elapsed_ms);

        Ok(RawResponse {
            status,
            content_type,
            body,
            elapsed_ms,
        })
    }

    async fn download(&self, url: &str) -> AppResult<String> {
        debug!("Fetching spec from '{}'", url);
        let mut request = self
            .client
            .get(url)
            .header(ACCEPT, "application/json, application/yaml;q=0.9, */*;q=0.8")
            .header(USER_AGENT, &self.config.user_agent);
        if let Some(token) = self.config.token() {
            request = request.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        let response = request.send().await.map_err(|e| AppError::SpecFetch {
            status: None,
            message: e.to_string(),
        })?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            error!("GET {} failed with status {}: {}", url, status, text);
            return Err(AppError::SpecFetch {
                status: Some(status.as_u16()),
                message: status.canonical_reason().unwrap_or("request failed").to_string(),
            });
        }
        response.text().await.map_err(|e| AppError::SpecFetch {
            status: Some(status.as_u16()),
            message: e.to_string(),
        })
    }

    /// Obtain raw spec text, giving up with [`AppError::Cancelled`] when `cancel` fires.
    pub async fn fetch_spec(&self, source: &SpecSource, cancel: &CancellationToken) -> AppResult<String> {
        let fetch = async {
            match source {
                SpecSource::Text(text) => Ok(text.clone()),
                SpecSource::File(path) => Ok(tokio::fs::read_to_string(path).await?),
                SpecSource::Url(url) => self.download(url).await,
                SpecSource::Convention { base_url, swagger_path } => {
                    let url = format!("{}/{}", base_url.trim_end_matches('/'), swagger_path.trim_start_matches('/'));
                    self.download(&url).await
                }
            }
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("Spec fetch cancelled");
                Err(AppError::Cancelled)
            }
            text = fetch => text,
        }
    }

    /// Fetch, decode, and normalize a spec, then publish it to `handle`.
    ///
    /// The snapshot is left untouched when `cancel` fired at any point.
    pub async fn load_spec(
        &self,
        source: &SpecSource,
        cancel: &CancellationToken,
        handle: &SnapshotHandle,
    ) -> AppResult<std::sync::Arc<NormalizedSpec>> {
        let text = self.fetch_spec(source, cancel).await?;
        let normalized = spec::load_text(&text)?;
        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }
        handle.replace(normalized);
        Ok(handle.snapshot())
    }
}
