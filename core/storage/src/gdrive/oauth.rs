//! OAuth2 authorization-code flow with a loopback redirect.
//!
//! Every token request opens the provider's authorization page in the
//! browser and waits for the redirect on `127.0.0.1`. Silent requests pass
//! `prompt=none`, so the provider either redirects straight back with a code
//! or with an error, without showing anything.

use async_trait::async_trait;
use axum::extract::{Query, State};
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use oauth2::basic::BasicClient;
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, EndpointNotSet, EndpointSet,
    PkceCodeChallenge, RedirectUrl, Scope, TokenResponse, TokenUrl,
};
use serde::{Deserialize, Serialize};
use std::future::IntoFuture;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use drivehub_common::{Error, Result};

use super::auth::{IdentityProvider, Prompt, TokenGrant, TokenRequest};

/// Google OAuth2 authorization endpoint.
const AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
/// Google OAuth2 token endpoint.
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
/// Path the provider redirects to.
const CALLBACK_PATH: &str = "/callback";

/// Lifetime assumed when the provider omits `expires_in`.
const DEFAULT_LIFETIME: Duration = Duration::from_secs(3600);

const CLOSE_PAGE: &str = "<html><body><p>DriveHub received the response. You can close this window.</p></body></html>";

type OAuthClient = BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

/// OAuth client registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthConfig {
    /// OAuth client ID.
    pub client_id: String,
    /// OAuth client secret, for client types that have one.
    pub client_secret: Option<String>,
    /// Local port of the redirect listener.
    pub redirect_port: u16,
    /// Scopes requested on every authorization.
    pub scopes: Vec<String>,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: None,
            redirect_port: 8765,
            scopes: vec![
                "https://www.googleapis.com/auth/drive".to_string(),
                "openid".to_string(),
                "email".to_string(),
                "profile".to_string(),
            ],
        }
    }
}

impl OAuthConfig {
    /// Redirect URI registered with the provider.
    pub fn redirect_uri(&self) -> String {
        format!("http://127.0.0.1:{}{}", self.redirect_port, CALLBACK_PATH)
    }
}

/// Query parameters of a redirect to the callback path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CallbackParams {
    /// Authorization code.
    pub code: Option<String>,
    /// Echoed CSRF state.
    pub state: Option<String>,
    /// Provider error code.
    pub error: Option<String>,
}

impl CallbackParams {
    /// Turn the callback into an authorization code, checking the CSRF state.
    ///
    /// # Errors
    /// - `UserCancelled` when the user denied access
    /// - `Authentication` for any other provider error, a state mismatch, or a missing code
    pub fn into_code(self, expected_state: &str) -> Result<String> {
        if let Some(error) = self.error {
            return match error.as_str() {
                "access_denied" => Err(Error::UserCancelled),
                _ => Err(Error::Authentication(error)),
            };
        }

        if self.state.as_deref() != Some(expected_state) {
            return Err(Error::Authentication(
                "OAuth state mismatch in redirect".to_string(),
            ));
        }

        self.code
            .filter(|c| !c.is_empty())
            .ok_or_else(|| Error::Authentication("Redirect carried no authorization code".to_string()))
    }
}

/// Sender for the first redirect; later ones find it empty.
type CallbackSlot = Arc<Mutex<Option<oneshot::Sender<CallbackParams>>>>;

/// GET /callback
async fn receive_callback(
    State(slot): State<CallbackSlot>,
    Query(params): Query<CallbackParams>,
) -> Html<&'static str> {
    match slot.lock().ok().and_then(|mut sender| sender.take()) {
        Some(sender) => {
            let _ = sender.send(params);
        }
        None => debug!("Ignoring repeated redirect"),
    }
    Html(CLOSE_PAGE)
}

/// Serve the callback route on `listener` until one redirect arrives.
///
/// The server shuts down gracefully once the redirect is answered, so the
/// browser still receives the close page.
async fn serve_callback(listener: TcpListener) -> Result<CallbackParams> {
    let (params_tx, params_rx) = oneshot::channel();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();

    let slot: CallbackSlot = Arc::new(Mutex::new(Some(params_tx)));
    let app = Router::new()
        .route(CALLBACK_PATH, get(receive_callback))
        .with_state(slot);

    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = stop_rx.await;
        })
        .into_future();
    let received = async move {
        let params = params_rx.await;
        let _ = stop_tx.send(());
        params
    };

    let (served, params) = tokio::join!(server, received);
    if let Err(e) = served {
        debug!("Redirect server stopped with error: {}", e);
    }
    params.map_err(|_| Error::Network("Redirect server stopped before the callback".to_string()))
}

/// Identity provider that runs the browser flow against a loopback listener.
pub struct LoopbackIdentityProvider {
    config: OAuthConfig,
    client: OAuthClient,
    http: oauth2::reqwest::Client,
}

impl LoopbackIdentityProvider {
    /// Create a provider for a registered client.
    ///
    /// # Errors
    /// - No client ID configured
    /// - Malformed endpoint or redirect URL
    pub fn new(config: OAuthConfig) -> Result<Self> {
        if config.client_id.trim().is_empty() {
            return Err(Error::InvalidInput(
                "OAuth client_id is not configured".to_string(),
            ));
        }

        let auth_url = AuthUrl::new(AUTH_URL.to_string())
            .map_err(|e| Error::InvalidInput(format!("Invalid auth URL: {}", e)))?;
        let token_url = TokenUrl::new(TOKEN_URL.to_string())
            .map_err(|e| Error::InvalidInput(format!("Invalid token URL: {}", e)))?;
        let redirect_url = RedirectUrl::new(config.redirect_uri())
            .map_err(|e| Error::InvalidInput(format!("Invalid redirect URL: {}", e)))?;

        let mut client = BasicClient::new(ClientId::new(config.client_id.clone()))
            .set_auth_uri(auth_url)
            .set_token_uri(token_url)
            .set_redirect_uri(redirect_url);
        if let Some(secret) = &config.client_secret {
            client = client.set_client_secret(ClientSecret::new(secret.clone()));
        }

        // Token endpoint responses must not be followed across redirects.
        let http = oauth2::reqwest::ClientBuilder::new()
            .redirect(oauth2::reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| Error::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            config,
            client,
            http,
        })
    }
}

#[async_trait]
impl IdentityProvider for LoopbackIdentityProvider {
    async fn request_token(&self, request: &TokenRequest) -> Result<TokenGrant> {
        let listener = TcpListener::bind(("127.0.0.1", self.config.redirect_port))
            .await
            .map_err(|e| {
                Error::Network(format!(
                    "Cannot listen on port {}: {}",
                    self.config.redirect_port, e
                ))
            })?;

        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();

        let prompt = match request.prompt {
            Prompt::Silent => "none",
            Prompt::Consent => "consent",
        };

        let mut auth_request = self
            .client
            .authorize_url(CsrfToken::new_random)
            .set_pkce_challenge(pkce_challenge)
            .add_extra_param("prompt", prompt);
        for scope in &self.config.scopes {
            auth_request = auth_request.add_scope(Scope::new(scope.clone()));
        }
        if let Some(hint) = &request.login_hint {
            auth_request = auth_request.add_extra_param("login_hint", hint.clone());
        }
        let (auth_url, csrf_token) = auth_request.url();

        debug!(prompt, hint = ?request.login_hint, "Opening authorization page");
        if let Err(e) = open::that(auth_url.as_str()) {
            warn!("Could not open a browser ({}). Open this URL manually: {}", e, auth_url);
        }

        let params = serve_callback(listener).await?;
        let code = params.into_code(csrf_token.secret())?;

        let token = self
            .client
            .exchange_code(AuthorizationCode::new(code))
            .set_pkce_verifier(pkce_verifier)
            .request_async(&self.http)
            .await
            .map_err(|e| Error::Authentication(format!("Token exchange failed: {}", e)))?;

        info!(prompt, "Obtained access token");

        Ok(TokenGrant::new(
            token.access_token().secret().clone(),
            token.expires_in().unwrap_or(DEFAULT_LIFETIME),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn redirect(code: Option<&str>, state: Option<&str>, error: Option<&str>) -> CallbackParams {
        CallbackParams {
            code: code.map(str::to_string),
            state: state.map(str::to_string),
            error: error.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_callback_server_returns_first_redirect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());
        let server = tokio::spawn(serve_callback(listener));

        let unrelated = reqwest::get(format!("{}/favicon.ico", base)).await.unwrap();
        assert_eq!(unrelated.status().as_u16(), 404);

        let page = reqwest::get(format!(
            "{}/callback?code=4%2Fabc&state=xyz&scope=email%20openid",
            base
        ))
        .await
        .unwrap();
        assert!(page.status().is_success());
        assert!(page.text().await.unwrap().contains("close this window"));

        let params = server.await.unwrap().unwrap();
        assert_eq!(params, redirect(Some("4/abc"), Some("xyz"), None));
    }

    #[test]
    fn test_denied_access_is_cancellation() {
        let params = redirect(None, Some("s"), Some("access_denied"));
        assert!(params.into_code("s").unwrap_err().is_cancelled());
    }

    #[test]
    fn test_silent_refusal_is_authentication_error() {
        let params = redirect(None, None, Some("interaction_required"));
        assert!(matches!(
            params.into_code("s"),
            Err(Error::Authentication(code)) if code == "interaction_required"
        ));
    }

    #[test]
    fn test_state_mismatch_is_rejected() {
        assert!(redirect(Some("c"), Some("forged"), None)
            .into_code("expected")
            .is_err());
        assert!(redirect(None, Some("expected"), None)
            .into_code("expected")
            .is_err());
        assert_eq!(
            redirect(Some("c"), Some("expected"), None)
                .into_code("expected")
                .unwrap(),
            "c"
        );
    }

    #[test]
    fn test_default_config() {
        let config = OAuthConfig::default();
        assert_eq!(config.redirect_uri(), "http://127.0.0.1:8765/callback");
        assert!(config.scopes.iter().any(|s| s.ends_with("/auth/drive")));
    }

    #[test]
    fn test_missing_client_id_is_rejected() {
        assert!(LoopbackIdentityProvider::new(OAuthConfig::default()).is_err());

        let config = OAuthConfig {
            client_id: "client.apps.googleusercontent.com".to_string(),
            ..OAuthConfig::default()
        };
        assert!(LoopbackIdentityProvider::new(config).is_ok());
    }
}
