//! [`Backend`] implementation over the hosted service's HTTP endpoints.
//!
//! - rows: `/rest/v1/{table}` (PostgREST)
//! - remote procedures: `/rest/v1/rpc/{name}`
//! - blobs: `/storage/v1/object/{bucket}/{path}`
//! - current user: `/auth/v1/user`

use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderValue, ACCEPT, CONTENT_RANGE, CONTENT_TYPE};
use reqwest::{Method, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use url::Url;

use fitcha_shared::types::{Identity, UserId};

use crate::backend::Backend;
use crate::error::{NetError, Result};
use crate::query::Query;

const SINGLE_OBJECT: &str = "application/vnd.pgrst.object+json";

pub struct RestBackend {
    http: reqwest::Client,
    base_url: Url,
    anon_key: String,
    access_token: RwLock<Option<String>>,
}

impl RestBackend {
    pub fn new(base_url: &str, anon_key: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        let mut base_url = Url::parse(base_url)?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self {
            http,
            base_url,
            anon_key: anon_key.to_string(),
            access_token: RwLock::new(None),
        })
    }

    /// Use the signed-in user's token for subsequent calls (`None` falls
    /// back to the anon key).
    pub fn set_access_token(&self, token: Option<String>) {
        if let Ok(mut guard) = self.access_token.write() {
            *guard = token;
        }
    }

    pub fn access_token(&self) -> Option<String> {
        self.access_token.read().ok().and_then(|guard| guard.clone())
    }

    /// Realtime socket endpoint derived from the base URL.
    pub fn realtime_url(&self) -> Result<Url> {
        let mut url = self.base_url.join("realtime/v1/websocket")?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|_| NetError::Unexpected(format!("cannot use {scheme} for {url}")))?;
        url.query_pairs_mut()
            .append_pair("apikey", &self.anon_key)
            .append_pair("vsn", "1.0.0");
        Ok(url)
    }

    /// Resolve the identity owning the current access token.
    pub async fn current_user(&self) -> Result<Identity> {
        #[derive(Deserialize)]
        struct AuthUser {
            id: UserId,
            #[serde(default)]
            user_metadata: Metadata,
        }

        #[derive(Deserialize, Default)]
        struct Metadata {
            #[serde(default)]
            first_name: String,
            #[serde(default)]
            last_name: String,
            #[serde(default)]
            avatar_url: Option<String>,
        }

        let url = self.base_url.join("auth/v1/user")?;
        let response = self.request(Method::GET, url).send().await?;
        let user: AuthUser = serde_json::from_value(read_json(response).await?)?;
        Ok(Identity {
            id: user.id,
            first_name: user.user_metadata.first_name,
            last_name: user.user_metadata.last_name,
            avatar_url: user.user_metadata.avatar_url,
        })
    }

    fn rest_url(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(&format!("rest/v1/{path}"))?)
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let bearer = self.access_token().unwrap_or_else(|| self.anon_key.clone());
        self.http
            .request(method, url)
            .header("apikey", &self.anon_key)
            .bearer_auth(bearer)
    }
}

#[async_trait]
impl Backend for RestBackend {
    async fn select(&self, query: &Query) -> Result<Vec<Value>> {
        let url = self.rest_url(query.table_name())?;
        debug!(table = query.table_name(), "select");
        let response = self
            .request(Method::GET, url)
            .query(&query.to_params())
            .send()
            .await?;
        match read_json(response).await? {
            Value::Array(rows) => Ok(rows),
            other => Err(NetError::Unexpected(format!("expected rows, got {other}"))),
        }
    }

    async fn insert(&self, table: &str, row: Value, columns: &str) -> Result<Value> {
        let url = self.rest_url(table)?;
        debug!(table, "insert");
        let response = self
            .request(Method::POST, url)
            .query(&[("select", columns)])
            .header("Prefer", "return=representation")
            .header(ACCEPT, HeaderValue::from_static(SINGLE_OBJECT))
            .json(&row)
            .send()
            .await?;
        read_json(response).await
    }

    async fn update(&self, query: &Query, patch: Value) -> Result<Vec<Value>> {
        let url = self.rest_url(query.table_name())?;
        debug!(table = query.table_name(), "update");
        let response = self
            .request(Method::PATCH, url)
            .query(&query.to_write_params())
            .header("Prefer", "return=representation")
            .json(&patch)
            .send()
            .await?;
        match read_json(response).await? {
            Value::Array(rows) => Ok(rows),
            Value::Null => Ok(Vec::new()),
            row => Ok(vec![row]),
        }
    }

    async fn delete(&self, query: &Query) -> Result<()> {
        let url = self.rest_url(query.table_name())?;
        debug!(table = query.table_name(), "delete");
        let response = self
            .request(Method::DELETE, url)
            .query(query.filters())
            .send()
            .await?;
        check_status(response).await.map(|_| ())
    }

    async fn count(&self, query: &Query) -> Result<u64> {
        let url = self.rest_url(query.table_name())?;
        let response = self
            .request(Method::HEAD, url)
            .query(&query.to_params())
            .header("Prefer", "count=exact")
            .send()
            .await?;
        let response = check_status(response).await?;
        let range = response
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| NetError::Unexpected("missing Content-Range".into()))?;
        parse_content_range_total(range)
    }

    async fn rpc(&self, name: &str, params: Value) -> Result<Value> {
        let url = self.rest_url(&format!("rpc/{name}"))?;
        debug!(procedure = name, "rpc");
        let response = self.request(Method::POST, url).json(&params).send().await?;
        read_json(response).await
    }

    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<String> {
        let url = self
            .base_url
            .join(&format!("storage/v1/object/{bucket}/{path}"))?;
        debug!(bucket, path, len = data.len(), "upload");
        let response = self
            .request(Method::POST, url)
            .header(CONTENT_TYPE, content_type)
            .header("x-upsert", "true")
            .body(data)
            .send()
            .await?;
        check_status(response).await?;
        let public = self
            .base_url
            .join(&format!("storage/v1/object/public/{bucket}/{path}"))?;
        Ok(public.to_string())
    }
}

/// Fail with the service's own message on non-success statuses.
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(NetError::Status {
        status: status.as_u16(),
        message: error_message(&body).unwrap_or_else(|| status.to_string()),
    })
}

async fn read_json(response: Response) -> Result<Value> {
    let response = check_status(response).await?;
    let text = response.text().await?;
    if text.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(&text)?)
}

/// Pick the human-readable part of an error body.
fn error_message(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    ["message", "msg", "error_description", "error"]
        .iter()
        .find_map(|field| value.get(field).and_then(Value::as_str))
        .map(str::to_string)
}

/// `"0-9/42"` or `"*/0"` → total.
fn parse_content_range_total(range: &str) -> Result<u64> {
    range
        .rsplit_once('/')
        .and_then(|(_, total)| total.trim().parse().ok())
        .ok_or_else(|| NetError::Unexpected(format!("bad Content-Range: {range}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_range_total() {
        assert_eq!(parse_content_range_total("0-9/42").unwrap(), 42);
        assert_eq!(parse_content_range_total("*/0").unwrap(), 0);
        assert!(parse_content_range_total("0-9/*").is_err());
    }

    #[test]
    fn test_error_message_fields() {
        assert_eq!(
            error_message(r#"{"message":"permission denied"}"#).as_deref(),
            Some("permission denied")
        );
        assert_eq!(
            error_message(r#"{"error_description":"Invalid token"}"#).as_deref(),
            Some("Invalid token")
        );
        assert_eq!(error_message("not json"), None);
    }

    #[test]
    fn test_realtime_url() {
        let backend =
            RestBackend::new("https://demo.example.co", "anon", Duration::from_secs(5)).unwrap();
        let url = backend.realtime_url().unwrap();
        assert_eq!(url.scheme(), "wss");
        assert_eq!(url.path(), "/realtime/v1/websocket");
        assert!(url.query().unwrap().contains("apikey=anon"));
    }

    #[test]
    fn test_access_token_override() {
        let backend =
            RestBackend::new("http://localhost:54321", "anon", Duration::from_secs(5)).unwrap();
        assert_eq!(backend.access_token(), None);
        backend.set_access_token(Some("jwt".into()));
        assert_eq!(backend.access_token().as_deref(), Some("jwt"));
        assert_eq!(backend.realtime_url().unwrap().scheme(), "ws");
    }
}
