use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::{Method, RequestBuilder, Response};
use url::Url;

use crate::client::error::ClientError;
use crate::settings::EndpointSettings;

pub const EVENT_STREAM_CONTENT_TYPE: &str = "text/event-stream";

/// HTTP access shared by every probe and the event stream. Clones share the underlying connection
/// pool and header set, so a bearer token installed by the auth flow is seen by all in-flight and
/// future requests.
#[derive(Debug, Clone)]
pub struct FleetClient {
    inner: Arc<FleetClientRef>,
}

impl FleetClient {
    pub fn new(client: reqwest::Client, headers: HeaderMap, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(FleetClientRef { client, headers: RwLock::new(headers), timeout }),
        }
    }

    pub fn from_settings(settings: &EndpointSettings) -> Result<Self, ClientError> {
        let headers = settings.header_map()?;
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(settings.insecure_skip_verify)
            .build()?;
        Ok(Self::new(client, headers, settings.timeout))
    }

    /// Bound applied to each probe request and to establishing the event stream.
    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }

    pub fn set_header(&self, name: &str, value: &str) -> Result<(), ClientError> {
        if name.is_empty() {
            return Ok(());
        }

        let name = HeaderName::from_str(name).map_err(|err| ClientError::InvalidHeader(err.to_string()))?;
        let value = HeaderValue::from_str(value).map_err(|err| ClientError::InvalidHeader(err.to_string()))?;
        self.inner.write_headers().insert(name, value);
        Ok(())
    }

    pub fn clear_header(&self, name: &str) {
        if let Ok(name) = HeaderName::from_str(name) {
            self.inner.write_headers().remove(name);
        }
    }

    /// Header names are case-insensitive.
    pub fn has_header(&self, name: &str) -> bool {
        HeaderName::from_str(name)
            .map(|name| self.inner.read_headers().contains_key(name))
            .unwrap_or(false)
    }

    pub fn set_bearer_token(&self, token: &str) -> Result<(), ClientError> {
        self.set_header(AUTHORIZATION.as_str(), format!("Bearer {token}").as_str())
    }

    pub fn clear_bearer_token(&self) {
        self.clear_header(AUTHORIZATION.as_str());
    }

    /// Issue a GET bounded by the client timeout. The response status is not inspected.
    #[tracing::instrument(level = "trace", skip(self))]
    pub async fn get(&self, url: &Url) -> Result<Response, ClientError> {
        self.request(Method::GET, url)
            .timeout(self.inner.timeout)
            .send()
            .await
            .map_err(|err| self.timeout_or(url, err))
    }

    /// Open a long-lived event stream. Only establishing the connection is bounded by the client
    /// timeout; reading the body is not.
    #[tracing::instrument(level = "trace", skip(self))]
    pub async fn open_stream(&self, url: &Url) -> Result<Response, ClientError> {
        let send = self
            .request(Method::GET, url)
            .header(ACCEPT, EVENT_STREAM_CONTENT_TYPE)
            .send();

        match tokio::time::timeout(self.inner.timeout, send).await {
            Ok(response) => response.map_err(|err| self.timeout_or(url, err)),
            Err(_elapsed) => Err(ClientError::Timeout(url.clone(), self.inner.timeout)),
        }
    }

    fn request(&self, method: Method, url: &Url) -> RequestBuilder {
        let headers = self.inner.read_headers().clone();
        self.inner.client.request(method, url.clone()).headers(headers)
    }

    fn timeout_or(&self, url: &Url, error: reqwest::Error) -> ClientError {
        if error.is_timeout() {
            ClientError::Timeout(url.clone(), self.inner.timeout)
        } else {
            error.into()
        }
    }
}

/// Fail a response that does not carry a 2xx status.
pub fn check_status(url: &Url, response: Response) -> Result<Response, ClientError> {
    let code = response.status();
    if code.is_success() {
        Ok(response)
    } else {
        Err(ClientError::Status { url: url.clone(), code })
    }
}

struct FleetClientRef {
    client: reqwest::Client,
    headers: RwLock<HeaderMap>,
    timeout: Duration,
}

impl fmt::Debug for FleetClientRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let header_names: Vec<String> = self.read_headers().keys().map(|k| k.to_string()).collect();
        f.debug_struct("FleetClientRef")
            .field("headers", &header_names)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl FleetClientRef {
    // header writes are single insert/remove calls; a poisoned lock still guards a whole map.
    fn read_headers(&self) -> std::sync::RwLockReadGuard<'_, HeaderMap> {
        self.headers.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_headers(&self) -> std::sync::RwLockWriteGuard<'_, HeaderMap> {
        self.headers.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
