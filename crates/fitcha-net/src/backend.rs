//! The remote data seam.
//!
//! Everything the client needs from the hosted backend (row CRUD, exact
//! counts, remote procedures, blob storage) goes through [`Backend`], so the
//! concrete HTTP client can be swapped for a scripted one in tests.

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

use crate::error::{NetError, Result};
use crate::query::Query;

#[async_trait]
pub trait Backend: Send + Sync {
    /// Rows matching `query`.
    async fn select(&self, query: &Query) -> Result<Vec<Value>>;

    /// Exactly one row matching `query`.
    async fn select_one(&self, query: &Query) -> Result<Value> {
        self.select(query)
            .await?
            .into_iter()
            .next()
            .ok_or(NetError::NotFound)
    }

    /// Insert one row and return it with `columns` selected.
    async fn insert(&self, table: &str, row: Value, columns: &str) -> Result<Value>;

    /// Patch every row matching `query`; returns the updated rows.
    async fn update(&self, query: &Query, patch: Value) -> Result<Vec<Value>>;

    async fn delete(&self, query: &Query) -> Result<()>;

    /// Exact number of rows matching `query`.
    async fn count(&self, query: &Query) -> Result<u64>;

    /// Call a named remote procedure.
    async fn rpc(&self, name: &str, params: Value) -> Result<Value>;

    /// Store a blob and return its public URL.
    async fn upload(&self, bucket: &str, path: &str, data: Bytes, content_type: &str)
        -> Result<String>;
}
