//! Injected HTTP transport.
//!
//! Providers never own a connection pool; they send [`HttpRequest`]s through an
//! [`HttpTransport`] supplied at construction. [`ReqwestTransport`] is the
//! default, tests substitute scripted transports.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use serde_json::Value;
use tracing::debug;

use crate::{ParleyError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// Outbound request description
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: HttpMethod::Get,
            url: url.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn post_json(url: impl Into<String>, body: Value) -> Self {
        Self {
            method: HttpMethod::Post,
            url: url.into(),
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: Some(body),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn bearer_auth(self, key: &str) -> Self {
        self.header("authorization", format!("Bearer {key}"))
    }
}

/// Incremental reader over a response body.
///
/// `cancel` releases the underlying connection. Calling it on an already
/// released body returns an error whose message contains "already closed".
#[async_trait]
pub trait BodyReader: Send {
    /// Next chunk, or `None` at end of body.
    async fn read(&mut self) -> Result<Option<Bytes>>;

    async fn cancel(&mut self) -> Result<()>;
}

enum ResponseBody {
    Empty,
    Buffered(Bytes),
    Stream(Box<dyn BodyReader>),
}

/// Response status plus a body that can be consumed once
pub struct HttpResponse {
    pub status: u16,
    body: ResponseBody,
}

impl std::fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

impl HttpResponse {
    pub fn empty(status: u16) -> Self {
        Self {
            status,
            body: ResponseBody::Empty,
        }
    }

    pub fn from_bytes(status: u16, bytes: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: ResponseBody::Buffered(bytes.into()),
        }
    }

    pub fn from_json(status: u16, value: &Value) -> Self {
        Self::from_bytes(status, value.to_string())
    }

    pub fn from_reader(status: u16, reader: Box<dyn BodyReader>) -> Self {
        Self {
            status,
            body: ResponseBody::Stream(reader),
        }
    }

    /// 2xx
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Read the whole body and parse it as JSON.
    pub async fn json(self) -> Result<Value> {
        let bytes = self.bytes().await?;
        if bytes.is_empty() {
            return Err(ParleyError::Protocol("empty response body".into()));
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    /// Read the whole body as lossy UTF-8 text; failures yield an empty string.
    pub async fn text(self) -> String {
        match self.bytes().await {
            Ok(b) => String::from_utf8_lossy(&b).into_owned(),
            Err(_) => String::new(),
        }
    }

    async fn bytes(self) -> Result<Bytes> {
        match self.body {
            ResponseBody::Empty => Ok(Bytes::new()),
            ResponseBody::Buffered(b) => Ok(b),
            ResponseBody::Stream(mut reader) => {
                let mut buf = BytesMut::new();
                let res = loop {
                    match reader.read().await {
                        Ok(Some(chunk)) => buf.extend_from_slice(&chunk),
                        Ok(None) => break Ok(buf.freeze()),
                        Err(e) => break Err(e),
                    }
                };
                if let Err(e) = release_reader(reader.as_mut()).await {
                    debug!(target: "http_transport", error = %e, "Reader cancel failed after buffering body");
                }
                res
            }
        }
    }

    /// Streaming access to the body; `None` when the response carried no body.
    pub fn into_reader(self) -> Option<Box<dyn BodyReader>> {
        match self.body {
            ResponseBody::Empty => None,
            ResponseBody::Buffered(b) => Some(Box::new(BufferedBody { chunk: Some(b) })),
            ResponseBody::Stream(reader) => Some(reader),
        }
    }
}

/// Call `cancel` on `reader`, swallowing failures that only say the body is
/// already gone (abort-like or "already closed").
pub async fn release_reader(reader: &mut dyn BodyReader) -> Result<()> {
    match reader.cancel().await {
        Ok(()) => Ok(()),
        Err(e) if e.is_abort_like() || is_already_closed(&e) => {
            debug!(target: "http_transport", error = %e, "Ignoring benign reader cancel failure");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

fn is_already_closed(err: &ParleyError) -> bool {
    let msg = err.to_string().to_ascii_lowercase();
    msg.contains("already closed") || msg.contains("already released")
}

struct BufferedBody {
    chunk: Option<Bytes>,
}

#[async_trait]
impl BodyReader for BufferedBody {
    async fn read(&mut self) -> Result<Option<Bytes>> {
        Ok(self.chunk.take())
    }

    async fn cancel(&mut self) -> Result<()> {
        self.chunk = None;
        Ok(())
    }
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse>;
}

/// Default transport backed by a shared `reqwest::Client`.
///
/// Timeouts are not configured on the client; callers bound every request with
/// a deadline and drop the future to abort it.
#[derive(Clone, Default)]
pub struct ReqwestTransport {
    http: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse> {
        debug!(target: "http_transport", method = ?request.method, "Sending request");
        let mut req = match request.method {
            HttpMethod::Get => self.http.get(&request.url),
            HttpMethod::Post => self.http.post(&request.url),
        };
        for (name, value) in &request.headers {
            req = req.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            req = req.json(body);
        }
        let resp = req.send().await.map_err(map_reqwest_error)?;
        let status = resp.status().as_u16();
        Ok(HttpResponse::from_reader(
            status,
            Box::new(ReqwestBody {
                response: Some(resp),
            }),
        ))
    }
}

struct ReqwestBody {
    response: Option<reqwest::Response>,
}

#[async_trait]
impl BodyReader for ReqwestBody {
    async fn read(&mut self) -> Result<Option<Bytes>> {
        match self.response.as_mut() {
            Some(resp) => resp.chunk().await.map_err(map_reqwest_error),
            None => Err(ParleyError::Transport("body already closed".into())),
        }
    }

    async fn cancel(&mut self) -> Result<()> {
        match self.response.take() {
            Some(resp) => {
                drop(resp);
                Ok(())
            }
            None => Err(ParleyError::Transport("body already closed".into())),
        }
    }
}

fn map_reqwest_error(e: reqwest::Error) -> ParleyError {
    if let Some(status) = e.status() {
        return ParleyError::Http {
            status: status.as_u16(),
            message: e.to_string(),
        };
    }
    ParleyError::Transport(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct OneShotReader {
        body: Option<Bytes>,
        cancel_error: Option<ParleyError>,
        cancels: Arc<AtomicUsize>,
    }

    impl OneShotReader {
        fn boxed(body: &str, cancel_error: Option<ParleyError>) -> (Box<dyn BodyReader>, Arc<AtomicUsize>) {
            let cancels = Arc::new(AtomicUsize::new(0));
            let reader = Self {
                body: Some(Bytes::from(body.to_string())),
                cancel_error,
                cancels: Arc::clone(&cancels),
            };
            (Box::new(reader), cancels)
        }
    }

    #[async_trait]
    impl BodyReader for OneShotReader {
        async fn read(&mut self) -> Result<Option<Bytes>> {
            Ok(self.body.take())
        }

        async fn cancel(&mut self) -> Result<()> {
            self.cancels.fetch_add(1, Ordering::SeqCst);
            self.cancel_error.take().map_or(Ok(()), Err)
        }
    }

    #[tokio::test]
    async fn buffering_streamed_body_releases_reader_despite_cancel_failure() {
        for cancel_error in [
            None,
            Some(ParleyError::Transport("stream already closed".into())),
            Some(ParleyError::Transport("socket poisoned".into())),
        ] {
            let (reader, cancels) = OneShotReader::boxed(r#"{"a":1}"#, cancel_error);
            let resp = HttpResponse::from_reader(200, reader);
            assert_eq!(resp.json().await.unwrap()["a"], 1);
            assert_eq!(cancels.load(Ordering::SeqCst), 1);
        }
    }

    #[tokio::test]
    async fn release_reader_only_surfaces_real_failures() {
        let (mut reader, _) = OneShotReader::boxed("", Some(ParleyError::Cancelled("aborted".into())));
        assert!(release_reader(reader.as_mut()).await.is_ok());
        let (mut reader, _) = OneShotReader::boxed("", Some(ParleyError::Transport("body already released".into())));
        assert!(release_reader(reader.as_mut()).await.is_ok());
        let (mut reader, _) = OneShotReader::boxed("", Some(ParleyError::Transport("socket poisoned".into())));
        assert!(release_reader(reader.as_mut()).await.is_err());
    }

    #[tokio::test]
    async fn buffered_response_parses_json_and_streams_once() {
        let resp = HttpResponse::from_json(200, &json!({"a": 1}));
        assert!(resp.ok());
        assert_eq!(resp.json().await.unwrap()["a"], 1);

        let mut reader = HttpResponse::from_bytes(200, "data: x\n\n")
            .into_reader()
            .unwrap();
        assert!(reader.read().await.unwrap().is_some());
        assert!(reader.read().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn empty_response_has_no_reader() {
        assert!(HttpResponse::empty(200).into_reader().is_none());
        assert!(HttpResponse::empty(204).json().await.is_err());
    }

    #[test]
    fn request_builders_set_headers() {
        let req = HttpRequest::post_json("http://x/chat/completions", json!({})).bearer_auth("k");
        assert_eq!(req.method, HttpMethod::Post);
        assert!(req
            .headers
            .iter()
            .any(|(n, v)| n == "authorization" && v == "Bearer k"));
    }
}
