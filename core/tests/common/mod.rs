#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use parley_core::pii::RegexPiiMasker;
use parley_core::providers::ProviderDeps;
use parley_core::runtime_config::{ChatRuntimeConfig, StaticRuntimeConfig};
use parley_core::tools::{ToolExecutionRequest, ToolExecutor, ToolMessage, ToolResult};
use parley_core::transport::{BodyReader, HttpMethod, HttpRequest, HttpResponse, HttpTransport};
use parley_core::{ParleyError, Result};
use serde_json::Value;

/// One scripted reply
pub enum Reply {
    Json(u16, Value),
    Status(u16),
    NoBody(u16),
    Fail(ParleyError),
    /// Never answers; only cancellation ends the request
    Hang,
    Chunks(u16, Vec<Vec<u8>>),
    Reader(u16, ChunkReader),
}

/// In-memory transport that answers requests in order and records them
#[derive(Default)]
pub struct ScriptedTransport {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub fn new(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn posts(&self) -> usize {
        self.requests()
            .iter()
            .filter(|r| r.method == HttpMethod::Post)
            .count()
    }

    pub fn body(&self, idx: usize) -> Value {
        self.requests()[idx].body.clone().unwrap_or(Value::Null)
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        self.requests.lock().unwrap().push(request);
        let reply = self.replies.lock().unwrap().pop_front();
        match reply {
            Some(Reply::Json(status, v)) => Ok(HttpResponse::from_json(status, &v)),
            Some(Reply::Status(status)) => Ok(HttpResponse::from_bytes(status, "upstream says no")),
            Some(Reply::NoBody(status)) => Ok(HttpResponse::empty(status)),
            Some(Reply::Fail(e)) => Err(e),
            Some(Reply::Hang) => std::future::pending::<Result<HttpResponse>>().await,
            Some(Reply::Chunks(status, chunks)) => Ok(HttpResponse::from_reader(
                status,
                Box::new(ChunkReader::new(chunks)),
            )),
            Some(Reply::Reader(status, reader)) => {
                Ok(HttpResponse::from_reader(status, Box::new(reader)))
            }
            None => Err(ParleyError::Transport("no scripted reply left".into())),
        }
    }
}

/// Body reader over fixed chunks that counts `cancel` calls
pub struct ChunkReader {
    chunks: VecDeque<Vec<u8>>,
    pub cancels: Arc<AtomicUsize>,
    read_error: Option<ParleyError>,
    cancel_error: Option<ParleyError>,
    hang_at_end: bool,
}

impl ChunkReader {
    pub fn new(chunks: Vec<Vec<u8>>) -> Self {
        Self {
            chunks: chunks.into(),
            cancels: Arc::new(AtomicUsize::new(0)),
            read_error: None,
            cancel_error: None,
            hang_at_end: false,
        }
    }

    pub fn from_strs(chunks: &[&str]) -> Self {
        Self::new(chunks.iter().map(|c| c.as_bytes().to_vec()).collect())
    }

    pub fn failing_read(mut self, err: ParleyError) -> Self {
        self.read_error = Some(err);
        self
    }

    pub fn failing_cancel(mut self, err: ParleyError) -> Self {
        self.cancel_error = Some(err);
        self
    }

    pub fn hanging(mut self) -> Self {
        self.hang_at_end = true;
        self
    }

    pub fn cancel_count(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.cancels)
    }
}

#[async_trait]
impl BodyReader for ChunkReader {
    async fn read(&mut self) -> Result<Option<Bytes>> {
        if let Some(chunk) = self.chunks.pop_front() {
            return Ok(Some(Bytes::from(chunk)));
        }
        if let Some(e) = self.read_error.take() {
            return Err(e);
        }
        if self.hang_at_end {
            std::future::pending::<()>().await;
        }
        Ok(None)
    }

    async fn cancel(&mut self) -> Result<()> {
        self.cancels.fetch_add(1, Ordering::SeqCst);
        match self.cancel_error.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Executor that answers every call with the same JSON
pub struct FixedExecutor {
    pub content: String,
    pub calls: AtomicUsize,
}

impl FixedExecutor {
    pub fn new(content: &str) -> Arc<Self> {
        Arc::new(Self {
            content: content.to_string(),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ToolExecutor for FixedExecutor {
    async fn execute(&self, request: ToolExecutionRequest) -> ToolResult<Vec<ToolMessage>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(request
            .tool_calls
            .iter()
            .map(|c| ToolMessage::new(c.id.clone(), self.content.clone()))
            .collect())
    }
}

pub fn deps(transport: Arc<ScriptedTransport>, executor: Arc<dyn ToolExecutor>) -> ProviderDeps {
    ProviderDeps {
        transport,
        tool_executor: executor,
        runtime: Arc::new(StaticRuntimeConfig::new(ChatRuntimeConfig::default())),
        masker: Arc::new(RegexPiiMasker::new()),
    }
}

pub fn header<'a>(request: &'a HttpRequest, name: &str) -> Option<&'a str> {
    request
        .headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

pub fn sse(events: &[&str]) -> Vec<u8> {
    events
        .iter()
        .map(|e| format!("data: {e}\n\n"))
        .collect::<String>()
        .into_bytes()
}
