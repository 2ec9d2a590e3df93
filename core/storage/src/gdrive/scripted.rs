//! Scripted identity provider and transport for testing.
//!
//! Both doubles record what they were asked for, so tests can assert on call
//! counts as well as on results.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::Mutex;

use drivehub_common::{Error, Result};

use super::auth::{IdentityProvider, Prompt, TokenGrant, TokenRequest};
use super::transport::{ApiRequest, ApiResponse, HttpTransport};

/// Outcome of one scripted token request.
#[derive(Debug, Clone)]
pub enum ScriptedGrant {
    /// Issue this grant.
    Grant(TokenGrant),
    /// Refuse with a provider error code.
    Fail(String),
    /// Behave as if the user closed the prompt.
    Cancel,
    /// Never answer.
    Hang,
}

/// Identity provider that replays queued outcomes per prompt kind.
///
/// An empty queue refuses the request.
pub struct ScriptedIdentityProvider {
    silent: Mutex<VecDeque<ScriptedGrant>>,
    consent: Mutex<VecDeque<ScriptedGrant>>,
    requests: Mutex<Vec<TokenRequest>>,
    delay: Option<Duration>,
}

impl ScriptedIdentityProvider {
    /// Create a provider with empty queues.
    pub fn new() -> Self {
        Self {
            silent: Mutex::new(VecDeque::new()),
            consent: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// Wait `delay` before answering each request.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Queue the outcome of the next silent request.
    pub async fn push_silent(&self, outcome: ScriptedGrant) {
        self.silent.lock().await.push_back(outcome);
    }

    /// Queue the outcome of the next consent request.
    pub async fn push_consent(&self, outcome: ScriptedGrant) {
        self.consent.lock().await.push_back(outcome);
    }

    /// Requests received so far.
    pub async fn requests(&self) -> Vec<TokenRequest> {
        self.requests.lock().await.clone()
    }

    /// Number of requests received so far.
    pub async fn request_count(&self) -> usize {
        self.requests.lock().await.len()
    }
}

impl Default for ScriptedIdentityProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdentityProvider for ScriptedIdentityProvider {
    async fn request_token(&self, request: &TokenRequest) -> Result<TokenGrant> {
        self.requests.lock().await.push(request.clone());

        let queue = match request.prompt {
            Prompt::Silent => &self.silent,
            Prompt::Consent => &self.consent,
        };
        let outcome = queue.lock().await.pop_front();

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        match outcome {
            Some(ScriptedGrant::Grant(grant)) => Ok(grant),
            Some(ScriptedGrant::Fail(code)) => Err(Error::Authentication(code)),
            Some(ScriptedGrant::Cancel) => Err(Error::UserCancelled),
            Some(ScriptedGrant::Hang) => std::future::pending().await,
            None => Err(Error::Authentication("no scripted grant".to_string())),
        }
    }
}

/// A request as seen by [`ScriptedTransport`].
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// The request.
    pub request: ApiRequest,
    /// Bearer token attached to it.
    pub bearer: Option<String>,
}

struct Route {
    pattern: String,
    queued: VecDeque<ApiResponse>,
    fallback: Option<ApiResponse>,
}

/// Transport that answers from scripted routes.
///
/// A route matches when its pattern occurs in the request URL. Queued
/// responses are used once each in order; after that the route's fallback
/// answers, if set. Requests that match nothing fail with a network error.
pub struct ScriptedTransport {
    routes: Mutex<Vec<Route>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl ScriptedTransport {
    /// Create a transport with no routes.
    pub fn new() -> Self {
        Self {
            routes: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Answer the next request matching `pattern` with `response`.
    pub async fn enqueue(&self, pattern: &str, response: ApiResponse) {
        let mut routes = self.routes.lock().await;
        match routes.iter_mut().find(|r| r.pattern == pattern) {
            Some(route) => route.queued.push_back(response),
            None => routes.push(Route {
                pattern: pattern.to_string(),
                queued: VecDeque::from([response]),
                fallback: None,
            }),
        }
    }

    /// Answer every request matching `pattern` with `response` once its queue is empty.
    pub async fn always(&self, pattern: &str, response: ApiResponse) {
        let mut routes = self.routes.lock().await;
        match routes.iter_mut().find(|r| r.pattern == pattern) {
            Some(route) => route.fallback = Some(response),
            None => routes.push(Route {
                pattern: pattern.to_string(),
                queued: VecDeque::new(),
                fallback: Some(response),
            }),
        }
    }

    /// Requests sent so far.
    pub async fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().await.clone()
    }

    /// Number of requests sent so far.
    pub async fn request_count(&self) -> usize {
        self.requests.lock().await.len()
    }

    /// Number of requests whose URL contains `pattern`.
    pub async fn count_matching(&self, pattern: &str) -> usize {
        self.requests
            .lock()
            .await
            .iter()
            .filter(|r| r.request.url.contains(pattern))
            .count()
    }
}

impl Default for ScriptedTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: &ApiRequest, bearer: Option<&str>) -> Result<ApiResponse> {
        self.requests.lock().await.push(RecordedRequest {
            request: request.clone(),
            bearer: bearer.map(str::to_string),
        });

        let mut routes = self.routes.lock().await;
        for route in routes
            .iter_mut()
            .filter(|r| request.url.contains(&r.pattern))
        {
            if let Some(response) = route.queued.pop_front() {
                return Ok(response);
            }
            if let Some(response) = &route.fallback {
                return Ok(response.clone());
            }
        }

        Err(Error::Network(format!(
            "No scripted response for {} {}",
            request.method, request.url
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_queue_then_fallback() {
        let transport = ScriptedTransport::new();
        transport.enqueue("/about", ApiResponse::new(401, "")).await;
        transport.always("/about", ApiResponse::new(200, "{}")).await;

        let request = ApiRequest::get("https://x/drive/v3/about");
        assert_eq!(transport.send(&request, Some("t")).await.unwrap().status, 401);
        assert_eq!(transport.send(&request, Some("t")).await.unwrap().status, 200);
        assert_eq!(transport.send(&request, Some("t")).await.unwrap().status, 200);
        assert_eq!(transport.count_matching("/about").await, 3);
    }

    #[tokio::test]
    async fn test_unmatched_request_fails() {
        let transport = ScriptedTransport::new();
        let result = transport.send(&ApiRequest::get("https://x/none"), None).await;
        assert!(result.is_err());
        assert_eq!(transport.request_count().await, 1);
    }

    #[tokio::test]
    async fn test_identity_empty_queue_refuses() {
        let identity = ScriptedIdentityProvider::new();
        let result = identity.request_token(&TokenRequest::silent(None)).await;
        assert!(matches!(result, Err(Error::Authentication(_))));
    }
}
