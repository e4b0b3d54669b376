/// HTTP transport seam underneath the rate-limited client
use crate::error::TransportError;
use async_trait::async_trait;
use reqwest::{Client, Method};
use std::borrow::Cow;
use std::time::Duration;
use tracing::debug;

/// Browser user agent used when none is configured
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// A single outgoing request
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: Method,
    pub url: String,
    pub params: Vec<(String, String)>,
    pub headers: Vec<(String, String)>,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            params: Vec::new(),
            headers: Vec::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn with_headers(mut self, headers: &[(String, String)]) -> Self {
        self.headers.extend_from_slice(headers);
        self
    }
}

/// Response with the final URL after redirects
#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    pub url: String,
    pub body: Vec<u8>,
}

impl FetchResponse {
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }

    pub fn is_success(&self) -> bool {
        self.status == 200
    }
}

/// Trait for anything that can put a request on the wire
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, request: &FetchRequest) -> Result<FetchResponse, TransportError>;
}

/// reqwest-backed transport with proxy, timeout and user agent applied
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(timeout_seconds: u64, proxy: Option<&str>, user_agent: Option<&str>) -> Result<Self, TransportError> {
        let mut builder = Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .user_agent(user_agent.unwrap_or(DEFAULT_USER_AGENT))
            .redirect(reqwest::redirect::Policy::limited(10));

        if let Some(proxy) = proxy.filter(|p| !p.is_empty()) {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|e| TransportError::InvalidRequest(format!("bad proxy {}: {}", proxy, e)))?;
            builder = builder.proxy(proxy);
        }

        Ok(Self { client: builder.build()? })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn execute(&self, request: &FetchRequest) -> Result<FetchResponse, TransportError> {
        let mut builder = self.client.request(request.method.clone(), &request.url);
        if !request.params.is_empty() {
            builder = builder.query(&request.params);
        }
        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout(request.url.clone())
            } else {
                TransportError::Http(e)
            }
        })?;

        let status = response.status().as_u16();
        let url = response.url().to_string();
        let body = response.bytes().await?.to_vec();
        debug!("{} {} -> {} ({} bytes)", request.method, url, status, body.len());

        Ok(FetchResponse { status, url, body })
    }
}
