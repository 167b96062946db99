use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{CONTENT_TYPE, USER_AGENT};
use thiserror::Error;

const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("request to {url} timed out after {timeout_ms}ms")]
    Timeout { url: String, timeout_ms: u64 },
    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },
    #[error("{url}: body exceeds {limit} bytes")]
    TooLarge { url: String, limit: usize },
    #[error("{url}: content type {content_type:?} is not an image")]
    NotImage {
        url: String,
        content_type: Option<String>,
    },
    #[error("request to {url} failed: {message}")]
    Network { url: String, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: String,
    pub timeout: Duration,
    /// Bodies larger than this are rejected without being fully read.
    pub max_bytes: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn is_ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Media type without parameters, lowercased (`image/png`).
    pub fn mime(&self) -> Option<String> {
        self.content_type
            .as_deref()
            .and_then(|value| value.split(';').next())
            .map(|value| value.trim().to_ascii_lowercase())
            .filter(|value| !value.is_empty())
    }
}

#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn get(&self, request: &FetchRequest) -> Result<HttpResponse, FetchError>;
}

pub struct ReqwestClient {
    http: reqwest::Client,
}

impl ReqwestClient {
    pub fn new() -> Result<Self, FetchError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| FetchError::Network {
                url: String::new(),
                message: e.to_string(),
            })?;
        Ok(Self { http })
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn get(&self, request: &FetchRequest) -> Result<HttpResponse, FetchError> {
        let url = request.url.as_str();
        let network = |e: reqwest::Error| {
            if e.is_timeout() {
                FetchError::Timeout {
                    url: url.to_string(),
                    timeout_ms: request.timeout.as_millis() as u64,
                }
            } else {
                FetchError::Network {
                    url: url.to_string(),
                    message: e.to_string(),
                }
            }
        };

        let mut response = self
            .http
            .get(url)
            .header(USER_AGENT, BROWSER_USER_AGENT)
            .timeout(request.timeout)
            .send()
            .await
            .map_err(network)?;

        let status = response.status().as_u16();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        let too_large = || FetchError::TooLarge {
            url: url.to_string(),
            limit: request.max_bytes,
        };
        if response
            .content_length()
            .map(|len| len as usize > request.max_bytes)
            .unwrap_or(false)
        {
            return Err(too_large());
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(network)? {
            if body.len() + chunk.len() > request.max_bytes {
                return Err(too_large());
            }
            body.extend_from_slice(&chunk);
        }

        Ok(HttpResponse {
            status,
            content_type,
            body,
        })
    }
}
