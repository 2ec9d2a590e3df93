//! HTTP transport seam.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{header, Client, Method};
use serde::de::DeserializeOwned;
use serde::Serialize;

use drivehub_common::{Error, Result};

/// A replayable HTTP request.
///
/// Kept as plain data so the executor can send it a second time after a
/// token renewal.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    /// HTTP method.
    pub method: Method,
    /// Absolute URL without query string.
    pub url: String,
    /// Query parameters.
    pub query: Vec<(String, String)>,
    /// Value of the Content-Type header.
    pub content_type: Option<String>,
    /// Request body.
    pub body: Option<Bytes>,
}

impl ApiRequest {
    /// Create a request with no query or body.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            query: Vec::new(),
            content_type: None,
            body: None,
        }
    }

    /// GET request.
    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    /// POST request.
    pub fn post(url: impl Into<String>) -> Self {
        Self::new(Method::POST, url)
    }

    /// Add a query parameter.
    pub fn query(mut self, name: &str, value: impl Into<String>) -> Self {
        self.query.push((name.to_string(), value.into()));
        self
    }

    /// Set a raw body.
    pub fn body(mut self, content_type: impl Into<String>, body: impl Into<Bytes>) -> Self {
        self.content_type = Some(content_type.into());
        self.body = Some(body.into());
        self
    }

    /// Set a JSON body.
    pub fn json<T: Serialize>(self, value: &T) -> Result<Self> {
        let body = serde_json::to_vec(value)?;
        Ok(self.body("application/json", body))
    }

    /// Value of a query parameter.
    pub fn query_value(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Status and body of a completed HTTP exchange.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    /// HTTP status code.
    pub status: u16,
    /// Raw body.
    pub body: Bytes,
}

impl ApiResponse {
    /// Create a response.
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Create a JSON response.
    pub fn json_body(status: u16, value: &serde_json::Value) -> Self {
        Self::new(status, value.to_string())
    }

    /// Check for a 2xx status.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body decoded as lossy UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Body decoded as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_slice(&self.body)
            .map_err(|e| Error::Serialization(format!("Failed to parse response: {}", e)))
    }
}

/// Sends requests, attaching the bearer credential when one is given.
///
/// Implementations return every status as a response; only transport-level
/// failures become errors.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    /// Send `request`, authenticated with `bearer` if present.
    async fn send(&self, request: &ApiRequest, bearer: Option<&str>) -> Result<ApiResponse>;
}

/// Transport backed by a reqwest client.
pub struct ReqwestTransport {
    http: Client,
}

impl ReqwestTransport {
    /// Create a transport with the DriveHub user agent.
    pub fn new() -> Result<Self> {
        let http = Client::builder()
            .user_agent("DriveHub/0.1")
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self { http })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: &ApiRequest, bearer: Option<&str>) -> Result<ApiResponse> {
        let mut builder = self.http.request(request.method.clone(), &request.url);

        if let Some(token) = bearer {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(content_type) = &request.content_type {
            builder = builder.header(header::CONTENT_TYPE, content_type.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::Network(format!("{} {} failed: {}", request.method, request.url, e)))?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| Error::Network(format!("Failed to read response body: {}", e)))?;

        Ok(ApiResponse { status, body })
    }
}
