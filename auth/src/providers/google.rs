//! Sign in with Google (authorization code flow).
//!
//! The browser is sent to Google's consent page with a CSRF `state`; the
//! callback code is exchanged for an access token, which is only used once
//! to read the profile. Unverified addresses are refused because the email
//! becomes the default receipt address.

use crate::error::{AuthError, Result};
use crate::providers::{OAuth2Provider, OAuthTokenResponse, OAuthUserInfo};
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Deserialize;
use serde::de::DeserializeOwned;

const AUTHORIZATION_ENDPOINT: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_ENDPOINT: &str = "https://oauth2.googleapis.com/token";
const USERINFO_ENDPOINT: &str = "https://openidconnect.googleapis.com/v1/userinfo";
const DEFAULT_SCOPES: [&str; 3] = ["openid", "email", "profile"];

/// Google as an [`OAuth2Provider`].
///
/// Register `<PUBLIC_BASE_URL>/auth/google/callback` as a redirect URI for
/// the client in Google Cloud Console.
///
/// ```no_run
/// use farmstand_auth::providers::GoogleOAuthProvider;
///
/// let google = GoogleOAuthProvider::new("client-id".to_string(), "client-secret".to_string())
///     .with_select_account(false);
/// ```
#[derive(Clone, Debug)]
pub struct GoogleOAuthProvider {
    client_id: String,
    client_secret: String,
    http_client: Client,
    scopes: Vec<String>,
    /// Adds `prompt=select_account`. On by default: the stand's shared
    /// tablet must not sign the next customer in as the previous one.
    select_account: bool,
    token_endpoint: String,
    userinfo_endpoint: String,
}

impl GoogleOAuthProvider {
    /// Provider for one OAuth client, requesting `openid email profile`.
    #[must_use]
    pub fn new(client_id: String, client_secret: String) -> Self {
        Self {
            client_id,
            client_secret,
            http_client: Client::new(),
            scopes: DEFAULT_SCOPES.map(String::from).to_vec(),
            select_account: true,
            token_endpoint: TOKEN_ENDPOINT.to_string(),
            userinfo_endpoint: USERINFO_ENDPOINT.to_string(),
        }
    }

    /// Replace the requested scopes.
    #[must_use]
    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }

    /// Toggle the account chooser.
    #[must_use]
    pub const fn with_select_account(mut self, select_account: bool) -> Self {
        self.select_account = select_account;
        self
    }

    /// Send token and userinfo requests to `base_url` instead of Google.
    #[must_use]
    pub fn with_api_base(mut self, base_url: &str) -> Self {
        let base = base_url.trim_end_matches('/');
        self.token_endpoint = format!("{base}/token");
        self.userinfo_endpoint = format!("{base}/v1/userinfo");
        self
    }
}

/// Decode a successful JSON body; anything else becomes `fail(reason)`.
async fn json_body<T: DeserializeOwned>(
    response: std::result::Result<Response, reqwest::Error>,
    endpoint: &'static str,
    fail: fn(String) -> AuthError,
) -> Result<T> {
    let response = response.map_err(|e| fail(e.to_string()))?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        tracing::error!(%status, endpoint, %body, "Google rejected the request");
        return Err(fail(format!("{endpoint} endpoint returned {status}")));
    }
    response.json().await.map_err(|e| fail(e.to_string()))
}

#[async_trait]
impl OAuth2Provider for GoogleOAuthProvider {
    fn authorization_url(&self, state: &str, redirect_uri: &str) -> Result<String> {
        let scope = self.scopes.join(" ");
        let mut query = vec![
            ("response_type", "code"),
            ("client_id", self.client_id.as_str()),
            ("redirect_uri", redirect_uri),
            ("scope", scope.as_str()),
            ("state", state),
        ];
        if self.select_account {
            query.push(("prompt", "select_account"));
        }

        let query = serde_urlencoded::to_string(&query)
            .map_err(|e| AuthError::InternalError(format!("authorization URL: {e}")))?;
        Ok(format!("{AUTHORIZATION_ENDPOINT}?{query}"))
    }

    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<OAuthTokenResponse> {
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
        ];
        let sent = self.http_client.post(&self.token_endpoint).form(&form).send().await;
        let token: TokenBody = json_body(sent, "token", AuthError::OAuthTokenExchangeFailed).await?;

        Ok(OAuthTokenResponse {
            access_token: token.access_token,
            expires_at: token
                .expires_in
                .map(|secs| chrono::Utc::now() + chrono::Duration::seconds(i64::from(secs))),
        })
    }

    async fn fetch_user_info(&self, access_token: &str) -> Result<OAuthUserInfo> {
        let sent = self
            .http_client
            .get(&self.userinfo_endpoint)
            .bearer_auth(access_token)
            .send()
            .await;
        let profile: ProfileBody = json_body(sent, "userinfo", AuthError::OAuthUserInfoFailed).await?;

        if !profile.email_verified {
            tracing::warn!(email = %profile.email, "Refusing Google account with unverified email");
            return Err(AuthError::EmailNotVerified);
        }

        Ok(OAuthUserInfo {
            subject: profile.sub,
            email: profile.email,
            email_verified: true,
            name: profile.name,
        })
    }
}

#[derive(Debug, Deserialize)]
struct TokenBody {
    access_token: String,
    /// Seconds, usually 3599.
    expires_in: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ProfileBody {
    sub: String,
    name: Option<String>,
    email: String,
    #[serde(default)]
    email_verified: bool,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use axum::{Form, Json, Router, http::HeaderMap, routing::{get, post}};
    use serde_json::{Value, json};
    use std::collections::HashMap;

    fn provider() -> GoogleOAuthProvider {
        GoogleOAuthProvider::new("test_client_id".to_string(), "test_secret".to_string())
    }

    /// Serve a stand-in for Google's token and userinfo endpoints.
    async fn fake_google(email_verified: bool) -> String {
        let app = Router::new()
            .route(
                "/token",
                post(|Form(form): Form<HashMap<String, String>>| async move {
                    if form.get("code").map(String::as_str) == Some("good-code")
                        && form.get("grant_type").map(String::as_str) == Some("authorization_code")
                    {
                        Ok(Json(json!({
                            "access_token": "ya29.token",
                            "expires_in": 3599,
                            "token_type": "Bearer"
                        })))
                    } else {
                        Err(axum::http::StatusCode::BAD_REQUEST)
                    }
                }),
            )
            .route(
                "/v1/userinfo",
                get(move |headers: HeaderMap| async move {
                    let authorized = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        == Some("Bearer ya29.token");
                    if !authorized {
                        return Err(axum::http::StatusCode::UNAUTHORIZED);
                    }
                    let body: Value = json!({
                        "sub": "110169484474386276334",
                        "name": "Ada Farmer",
                        "email": "ada@example.com",
                        "email_verified": email_verified
                    });
                    Ok(Json(body))
                }),
            );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[test]
    fn test_google_provider_creation() {
        let google = provider();
        assert_eq!(google.scopes, vec!["openid", "email", "profile"]);
        assert!(google.select_account);
        assert_eq!(google.token_endpoint, TOKEN_ENDPOINT);
    }

    #[test]
    fn test_authorization_url() {
        let url = provider()
            .authorization_url("test_state_123", "http://localhost:3000/auth/google/callback")
            .unwrap();

        assert!(url.starts_with(AUTHORIZATION_ENDPOINT));
        assert!(url.contains("client_id=test_client_id"));
        assert!(url.contains(
            "redirect_uri=http%3A%2F%2Flocalhost%3A3000%2Fauth%2Fgoogle%2Fcallback"
        ));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("scope=openid+email+profile"));
        assert!(url.contains("state=test_state_123"));
        assert!(url.contains("prompt=select_account"));
    }

    #[test]
    fn test_authorization_url_without_account_chooser() {
        let url = provider()
            .with_select_account(false)
            .with_scopes(vec!["openid".to_string(), "email".to_string()])
            .authorization_url("s", "http://localhost/cb")
            .unwrap();

        assert!(!url.contains("prompt="));
        assert!(url.contains("scope=openid+email"));
    }

    #[tokio::test]
    async fn test_code_exchange_and_userinfo() {
        let base = fake_google(true).await;
        let google = provider().with_api_base(&base);

        let tokens = google
            .exchange_code("good-code", "http://localhost/cb")
            .await
            .unwrap();
        assert_eq!(tokens.access_token, "ya29.token");
        assert!(tokens.expires_at.is_some());

        let info = google.fetch_user_info(&tokens.access_token).await.unwrap();
        assert_eq!(info.subject, "110169484474386276334");
        assert_eq!(info.email, "ada@example.com");
        assert_eq!(info.name.as_deref(), Some("Ada Farmer"));
    }

    #[tokio::test]
    async fn test_rejected_code_is_exchange_failure() {
        let base = fake_google(true).await;
        let google = provider().with_api_base(&base);

        let result = google.exchange_code("stale-code", "http://localhost/cb").await;
        assert!(matches!(result, Err(AuthError::OAuthTokenExchangeFailed(_))));
    }

    #[tokio::test]
    async fn test_unverified_email_rejected() {
        let base = fake_google(false).await;
        let google = provider().with_api_base(&base);

        let result = google.fetch_user_info("ya29.token").await;
        assert_eq!(result, Err(AuthError::EmailNotVerified));
    }
}
