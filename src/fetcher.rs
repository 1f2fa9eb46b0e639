use std::sync::Arc;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::header::{IF_MODIFIED_SINCE, LAST_MODIFIED};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::config::Endpoints;
use crate::error::{AppError, Result};
use crate::token::TokenManager;
use crate::types::{ConnectedRealmResponse, RealmResponse};

/// IMF-fixdate, as used by `If-Modified-Since` / `Last-Modified`.
pub const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

#[derive(Debug)]
pub enum FetchOutcome {
    /// The resource changed since the watermark.
    Fresh {
        body: Bytes,
        /// `Last-Modified` of the response, or the Unix epoch if absent.
        last_modified: DateTime<Utc>,
    },
    /// Upstream answered 304: nothing to do this cycle.
    NotModified,
}

/// Authenticated GETs against the Blizzard data API.
pub struct Fetcher {
    http: reqwest::Client,
    tokens: Arc<TokenManager>,
    endpoints: Endpoints,
}

impl Fetcher {
    pub fn new(http: reqwest::Client, tokens: Arc<TokenManager>, endpoints: Endpoints) -> Self {
        Self { http, tokens, endpoints }
    }

    /// Conditional GET. 304 is a normal outcome, not an error; any status
    /// other than 2xx/304 is `AppError::Fetch`.
    pub async fn fetch_if_changed(&self, url: &str, watermark: DateTime<Utc>) -> Result<FetchOutcome> {
        self.send_authenticated(url, Some(watermark)).await
    }

    /// Unconditional authenticated GET, deserialized as JSON.
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        match self.send_authenticated(url, None).await? {
            FetchOutcome::Fresh { body, .. } => Ok(serde_json::from_slice(&body)?),
            FetchOutcome::NotModified => Err(AppError::Fetch {
                status: StatusCode::NOT_MODIFIED.as_u16(),
                url: url.to_string(),
            }),
        }
    }

    async fn send_authenticated(
        &self,
        url: &str,
        watermark: Option<DateTime<Utc>>,
    ) -> Result<FetchOutcome> {
        let token = self.tokens.ensure_valid_token().await?;

        let mut req = self.http.get(url).bearer_auth(token);
        if let Some(watermark) = watermark {
            req = req.header(IF_MODIFIED_SINCE, format_http_date(watermark));
        }
        let resp = req.send().await?;

        let status = resp.status();
        if status == StatusCode::NOT_MODIFIED {
            debug!(url, "not modified");
            return Ok(FetchOutcome::NotModified);
        }
        if !status.is_success() {
            return Err(AppError::Fetch {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let last_modified = resp
            .headers()
            .get(LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_http_date)
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        let body = resp.bytes().await?;

        Ok(FetchOutcome::Fresh { body, last_modified })
    }

    pub fn auctions_url(&self, region: &str, connected_realm_id: i64, locale: &str) -> String {
        format!(
            "{}/data/wow/connected-realm/{connected_realm_id}/auctions?namespace=dynamic-{region}&locale={locale}",
            self.endpoints.api_url(region)
        )
    }

    pub fn realm_url(&self, region: &str, slug: &str, locale: &str) -> String {
        format!(
            "{}/data/wow/realm/{slug}?namespace=dynamic-{region}&locale={locale}",
            self.endpoints.api_url(region)
        )
    }

    /// Realm slug → `(connected realm id, realm display name)`.
    pub async fn resolve_connected_realm(
        &self,
        region: &str,
        slug: &str,
        locale: &str,
    ) -> Result<(i64, String)> {
        let realm: RealmResponse = self.get_json(&self.realm_url(region, slug, locale)).await?;
        let connected: ConnectedRealmResponse = self.get_json(&realm.connected_realm.href).await?;
        Ok((connected.id, realm.name))
    }
}

pub fn format_http_date(dt: DateTime<Utc>) -> String {
    dt.format(HTTP_DATE_FORMAT).to_string()
}

pub fn parse_http_date(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(s.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
