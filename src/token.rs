use reqwest::StatusCode;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::config::Endpoints;
use crate::error::{AppError, Result};
use crate::types::TokenResponse;

/// OAuth2 client-credentials token shared by every shard update.
///
/// Reads are concurrent. Refreshes are single-flight: callers that find the
/// token rejected queue on `refresh_lock`, and whoever gets there after the
/// first refresh picks up the new token instead of exchanging again.
pub struct TokenManager {
    http: reqwest::Client,
    token_url: String,
    check_url: String,
    client_id: String,
    client_secret: String,
    token: RwLock<Option<String>>,
    refresh_lock: Mutex<()>,
}

impl TokenManager {
    pub fn new(
        http: reqwest::Client,
        endpoints: &Endpoints,
        oauth_region: &str,
        client_id: String,
        client_secret: String,
    ) -> Self {
        let base = endpoints.oauth_url(oauth_region);
        Self {
            http,
            token_url: format!("{base}/oauth/token"),
            check_url: format!("{base}/oauth/check_token"),
            client_id,
            client_secret,
            token: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Return a bearer token the authority currently accepts, exchanging
    /// credentials for a new one if none is held or the held one is rejected.
    pub async fn ensure_valid_token(&self) -> Result<String> {
        let current = self.token.read().await.clone();
        if let Some(token) = &current {
            if self.is_accepted(token).await? {
                return Ok(token.clone());
            }
            debug!("OAuth token rejected by check_token, refreshing");
        }
        self.refresh(current).await
    }

    async fn is_accepted(&self, token: &str) -> Result<bool> {
        let resp = self
            .http
            .get(&self.check_url)
            .query(&[("token", token)])
            .send()
            .await?;

        match resp.status() {
            s if s.is_success() => Ok(true),
            StatusCode::UNAUTHORIZED | StatusCode::BAD_REQUEST => Ok(false),
            s => Err(AppError::Auth(format!(
                "check_token failed with status {}",
                s.as_u16()
            ))),
        }
    }

    /// `stale` is the token the caller saw rejected (or `None`).
    async fn refresh(&self, stale: Option<String>) -> Result<String> {
        let _guard = self.refresh_lock.lock().await;

        if let Some(token) = self.token.read().await.as_ref() {
            if stale.as_deref() != Some(token.as_str()) {
                return Ok(token.clone());
            }
        }

        let token = self.exchange().await?;
        *self.token.write().await = Some(token.clone());
        info!("OAuth token refreshed");
        Ok(token)
    }

    async fn exchange(&self) -> Result<String> {
        let resp = self
            .http
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(AppError::Auth(format!(
                "token exchange failed with status {}",
                status.as_u16()
            )));
        }

        let body = resp.bytes().await?;
        serde_json::from_slice::<TokenResponse>(&body)
            .ok()
            .and_then(|t| t.access_token)
            .ok_or_else(|| AppError::Auth("token response has no access_token".to_string()))
    }
}
