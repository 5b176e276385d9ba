//! OpenID Connect token exchange against a Keycloak style realm.

use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::Deserialize;
use tracing::debug;

use super::supplier::{TokenExchange, TokenGrant};
use crate::driver::error::{DriverError, DriverResult};

/// Identity provider coordinates
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OidcConfig {
    pub auth_server_url: String,
    pub realm: String,
    pub client_id: String,
    pub client_secret: String,
}

impl OidcConfig {
    pub fn token_endpoint(&self) -> String {
        format!(
            "{}/realms/{}/protocol/openid-connect/token",
            self.auth_server_url.trim_end_matches('/'),
            self.realm
        )
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

/// Resource owner password grant, rotated with the refresh token grant.
pub struct OidcExchange {
    config: OidcConfig,
    username: String,
    password: String,
    client: reqwest::Client,
}

impl OidcExchange {
    pub fn new(config: OidcConfig, username: impl Into<String>, password: impl Into<String>) -> DriverResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| DriverError::configuration(format!("Cannot build HTTP client: {}", e)))?;
        Ok(Self {
            config,
            username: username.into(),
            password: password.into(),
            client,
        })
    }

    pub fn config(&self) -> &OidcConfig {
        &self.config
    }

    async fn request(&self, form: &[(&str, &str)]) -> DriverResult<TokenGrant> {
        let url = self.config.token_endpoint();
        debug!(%url, grant_type = form[0].1, "Token request");

        let response = self
            .client
            .post(&url)
            .form(form)
            .send()
            .await
            .map_err(|e| DriverError::authentication(format!("Token request to {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DriverError::authentication(format!(
                "Token endpoint {} answered {}: {}",
                url, status, body
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| DriverError::authentication(format!("Malformed token response: {}", e)))?;
        Ok(grant_from(token, Utc::now()))
    }
}

impl TokenExchange for OidcExchange {
    fn exchange(&self) -> BoxFuture<'_, DriverResult<TokenGrant>> {
        Box::pin(async move {
            self.request(&[
                ("grant_type", "password"),
                ("username", self.username.as_str()),
                ("password", self.password.as_str()),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
            ])
            .await
        })
    }

    fn refresh<'a>(&'a self, refresh_token: &'a str) -> BoxFuture<'a, DriverResult<TokenGrant>> {
        Box::pin(async move {
            self.request(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
            ])
            .await
        })
    }
}

fn grant_from(response: TokenResponse, now: DateTime<Utc>) -> TokenGrant {
    // An `expires_in` beyond chrono's range leaves the expiry unknown.
    let expires_at = jwt_expiry(&response.access_token).or_else(|| {
        response
            .expires_in
            .and_then(chrono::Duration::try_seconds)
            .and_then(|lifetime| now.checked_add_signed(lifetime))
    });
    TokenGrant {
        access_token: response.access_token,
        refresh_token: response.refresh_token,
        expires_at,
    }
}

/// `exp` claim of a JWT, if the token is one.
pub fn jwt_expiry(token: &str) -> Option<DateTime<Utc>> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: serde_json::Value = serde_json::from_slice(&bytes).ok()?;
    let exp = claims.get("exp")?;
    let seconds = exp.as_i64().or_else(|| exp.as_f64().map(|f| f as i64))?;
    DateTime::from_timestamp(seconds, 0)
}
