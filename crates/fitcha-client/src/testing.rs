//! Scripted in-memory [`Backend`] for container tests.
//!
//! Responses are queued per (operation, table or procedure). The last
//! ready response in a queue is sticky, so a snapshot scripted once also
//! answers later refetches. Deferred responses let a test hold a call
//! open and resolve it after other events have been applied.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{json, Value};
use tokio::sync::oneshot;

use fitcha_net::error::{NetError, Result};
use fitcha_net::{Backend, Query};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Select,
    Insert,
    Update,
    Delete,
    Count,
    Rpc,
    Upload,
}

/// One recorded backend call.
#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub op: Op,
    /// Table, procedure or bucket.
    pub target: String,
    pub filters: Vec<(String, String)>,
    /// Insert row, update patch or procedure parameters.
    pub body: Value,
}

type Scripted = std::result::Result<Value, String>;

enum Reply {
    Ready(Scripted),
    Deferred(oneshot::Receiver<Scripted>),
}

#[derive(Default)]
pub struct MockBackend {
    replies: Mutex<HashMap<(Op, String), VecDeque<Reply>>>,
    calls: Mutex<Vec<Call>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, op: Op, target: &str, value: Value) -> &Self {
        self.push(op, target, Reply::Ready(Ok(value)))
    }

    pub fn fail(&self, op: Op, target: &str, message: &str) -> &Self {
        self.push(op, target, Reply::Ready(Err(message.to_string())))
    }

    /// Queue a reply the test resolves later through the returned sender.
    pub fn defer(&self, op: Op, target: &str) -> oneshot::Sender<Scripted> {
        let (tx, rx) = oneshot::channel();
        self.push(op, target, Reply::Deferred(rx));
        tx
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn calls_to(&self, op: Op, target: &str) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.op == op && c.target == target)
            .collect()
    }

    pub fn count_calls(&self, op: Op, target: &str) -> usize {
        self.calls_to(op, target).len()
    }

    fn push(&self, op: Op, target: &str, reply: Reply) -> &Self {
        if let Ok(mut replies) = self.replies.lock() {
            replies
                .entry((op, target.to_string()))
                .or_default()
                .push_back(reply);
        }
        self
    }

    fn record(&self, op: Op, target: &str, filters: &[(String, String)], body: Value) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(Call {
                op,
                target: target.to_string(),
                filters: filters.to_vec(),
                body,
            });
        }
    }

    async fn reply(&self, op: Op, target: &str) -> Option<Result<Value>> {
        let next = {
            let mut replies = self.replies.lock().ok()?;
            let queue = replies.get_mut(&(op, target.to_string()))?;
            let sticky = match (queue.len(), queue.front()) {
                (1, Some(Reply::Ready(scripted))) => Some(Reply::Ready(scripted.clone())),
                _ => None,
            };
            match sticky {
                Some(reply) => reply,
                None => queue.pop_front()?,
            }
        };
        let scripted = match next {
            Reply::Ready(scripted) => scripted,
            Reply::Deferred(rx) => rx
                .await
                .unwrap_or_else(|_| Err("deferred reply dropped".to_string())),
        };
        Some(scripted.map_err(|message| NetError::Status {
            status: 400,
            message,
        }))
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn select(&self, query: &Query) -> Result<Vec<Value>> {
        self.record(Op::Select, query.table_name(), query.filters(), Value::Null);
        match self.reply(Op::Select, query.table_name()).await {
            Some(Ok(Value::Array(rows))) => Ok(rows),
            Some(Ok(Value::Null)) | None => Ok(Vec::new()),
            Some(Ok(row)) => Ok(vec![row]),
            Some(Err(e)) => Err(e),
        }
    }

    async fn insert(&self, table: &str, row: Value, _columns: &str) -> Result<Value> {
        self.record(Op::Insert, table, &[], row);
        self.reply(Op::Insert, table)
            .await
            .unwrap_or_else(|| Err(NetError::Unexpected(format!("unscripted insert into {table}"))))
    }

    async fn update(&self, query: &Query, patch: Value) -> Result<Vec<Value>> {
        self.record(Op::Update, query.table_name(), query.filters(), patch);
        match self.reply(Op::Update, query.table_name()).await {
            Some(Ok(Value::Array(rows))) => Ok(rows),
            Some(Ok(Value::Null)) | None => Ok(Vec::new()),
            Some(Ok(row)) => Ok(vec![row]),
            Some(Err(e)) => Err(e),
        }
    }

    async fn delete(&self, query: &Query) -> Result<()> {
        self.record(Op::Delete, query.table_name(), query.filters(), Value::Null);
        match self.reply(Op::Delete, query.table_name()).await {
            Some(Err(e)) => Err(e),
            _ => Ok(()),
        }
    }

    async fn count(&self, query: &Query) -> Result<u64> {
        self.record(Op::Count, query.table_name(), query.filters(), Value::Null);
        match self.reply(Op::Count, query.table_name()).await {
            Some(Ok(value)) => Ok(value.as_u64().unwrap_or(0)),
            Some(Err(e)) => Err(e),
            None => Ok(0),
        }
    }

    async fn rpc(&self, name: &str, params: Value) -> Result<Value> {
        self.record(Op::Rpc, name, &[], params);
        self.reply(Op::Rpc, name).await.unwrap_or(Ok(Value::Null))
    }

    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        data: Bytes,
        content_type: &str,
    ) -> Result<String> {
        self.record(
            Op::Upload,
            bucket,
            &[],
            json!({ "path": path, "len": data.len(), "content_type": content_type }),
        );
        match self.reply(Op::Upload, bucket).await {
            Some(Ok(Value::String(url))) => Ok(url),
            Some(Err(e)) => Err(e),
            _ => Ok(format!("https://storage.test/{bucket}/{path}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_last_reply_is_sticky() {
        let backend = MockBackend::new();
        backend
            .respond(Op::Rpc, "get_unread_conversation_count", json!(1))
            .respond(Op::Rpc, "get_unread_conversation_count", json!(2));

        let name = "get_unread_conversation_count";
        assert_eq!(backend.rpc(name, json!({})).await.unwrap(), json!(1));
        assert_eq!(backend.rpc(name, json!({})).await.unwrap(), json!(2));
        assert_eq!(backend.rpc(name, json!({})).await.unwrap(), json!(2));
        assert_eq!(backend.count_calls(Op::Rpc, name), 3);
    }

    #[tokio::test]
    async fn test_deferred_reply_waits() {
        let backend = std::sync::Arc::new(MockBackend::new());
        let release = backend.defer(Op::Insert, "messages");

        let task = {
            let backend = backend.clone();
            tokio::spawn(async move { backend.insert("messages", json!({}), "*").await })
        };
        tokio::task::yield_now().await;
        release.send(Err("network error".into())).unwrap();

        let err = task.await.unwrap().unwrap_err();
        assert_eq!(err.to_string(), "network error");
    }
}
