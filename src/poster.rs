//! HTTP delivery of task content.
//!
//! Content is streamed into the request body as it is read, so a large
//! archive member is never held in memory whole.

use async_trait::async_trait;
use futures::stream::{self, Stream};
use reqwest::header::CONTENT_TYPE;
use reqwest::{Body, Client, Response, StatusCode, Url};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::QueueError;
use crate::queue::Task;

/// Bytes read from the content per body chunk.
const CHUNK_SIZE: usize = 64 * 1024;

/// Statuses that count as a successful delivery.
pub const SUCCESS_CODES: [StatusCode; 3] =
    [StatusCode::OK, StatusCode::CREATED, StatusCode::ACCEPTED];

/// Why one delivery failed.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The server answered with a status outside [`SUCCESS_CODES`]
    #[error("{status} ({message})")]
    Rejected { status: u16, message: String },

    /// No usable response arrived
    #[error("request failed: {0}")]
    Transport(#[source] reqwest::Error),
}

impl DeliveryError {
    pub fn status(&self) -> Option<u16> {
        match self {
            DeliveryError::Rejected { status, .. } => Some(*status),
            DeliveryError::Transport(e) => e.status().map(|s| s.as_u16()),
        }
    }
}

/// Content that can be pulled into a request body a chunk at a time.
#[async_trait]
pub trait BodySource: Send + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Fill the front of `buf`; `Ok(0)` at the end.
    async fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;
}

#[async_trait]
impl BodySource for Task {
    type Error = QueueError;

    async fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, QueueError> {
        self.read(buf).await
    }
}

#[async_trait]
impl BodySource for Vec<u8> {
    type Error = std::convert::Infallible;

    async fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let n = buf.len().min(self.len());
        buf[..n].copy_from_slice(&self[..n]);
        self.drain(..n);
        Ok(n)
    }
}

/// A source shared by every attempt of one delivery.
struct Feed<S: BodySource> {
    source: S,
    /// Some content has gone into a request body.
    pulled: bool,
    failure: Option<S::Error>,
}

/// Stands in for the source's own error inside the request; the real one
/// is kept in the [`Feed`].
#[derive(Debug, Error)]
#[error("reading the content failed")]
struct SourceFailed;

fn body_stream<S: BodySource>(
    feed: Arc<Mutex<Feed<S>>>,
) -> impl Stream<Item = Result<Vec<u8>, SourceFailed>> + Send + 'static {
    stream::try_unfold(feed, |feed| async move {
        let mut buf = vec![0u8; CHUNK_SIZE];
        let n = {
            let mut guard = feed.lock().await;
            match guard.source.read_chunk(&mut buf).await {
                Ok(n) => {
                    guard.pulled |= n > 0;
                    n
                }
                Err(e) => {
                    guard.failure = Some(e);
                    return Err(SourceFailed);
                }
            }
        };
        if n == 0 {
            return Ok(None);
        }
        buf.truncate(n);
        Ok(Some((buf, feed)))
    })
}

/// POSTs task content to one URL and keeps the errors of failed attempts.
pub struct Poster {
    client: Client,
    url: Url,
    max_retry: u32,
    errors: Vec<DeliveryError>,
}

impl Poster {
    pub fn new(url: Url, timeout: Duration, max_retry: u32) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url,
            max_retry,
            errors: Vec::new(),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Stream `content` to the server. Returns whether the server accepted
    /// it; on failure one [`DeliveryError`] is recorded. An error reading
    /// `content` is returned as is and recorded nowhere.
    pub async fn post<S: BodySource>(&mut self, name: &str, content: S) -> Result<bool, S::Error> {
        let feed = Arc::new(Mutex::new(Feed {
            source: content,
            pulled: false,
            failure: None,
        }));
        let result = self.send(&feed).await;

        if let Some(e) = feed.lock().await.failure.take() {
            return Err(e);
        }

        let error = match result {
            Ok(resp) if SUCCESS_CODES.contains(&resp.status()) => {
                debug!(task = name, status = %resp.status(), "delivered");
                return Ok(true);
            }
            Ok(resp) => rejection(resp).await,
            Err(e) => DeliveryError::Transport(e),
        };

        warn!(task = name, "delivery failed: {}", error);
        self.errors.push(error);
        Ok(false)
    }

    pub fn errors(&self) -> &[DeliveryError] {
        &self.errors
    }

    pub fn take_errors(&mut self) -> Vec<DeliveryError> {
        std::mem::take(&mut self.errors)
    }

    /// Send once, retrying only failures to connect that happened before
    /// any content was pulled: nothing reached the server then, and the
    /// source still holds all of it.
    async fn send<S: BodySource>(
        &self,
        feed: &Arc<Mutex<Feed<S>>>,
    ) -> Result<Response, reqwest::Error> {
        let mut retry_count = 0;
        loop {
            let result = self
                .client
                .post(self.url.clone())
                .body(Body::wrap_stream(body_stream(feed.clone())))
                .send()
                .await;

            let untouched = !feed.lock().await.pulled;
            match result {
                Err(e) if e.is_connect() && untouched && retry_count < self.max_retry => {
                    retry_count += 1;
                    warn!(
                        "connection error, retry {}/{}: {}",
                        retry_count, self.max_retry, e
                    );
                    tokio::time::sleep(Duration::from_millis(500 * retry_count as u64)).await;
                }
                other => return other,
            }
        }
    }
}

async fn rejection(resp: Response) -> DeliveryError {
    let status = resp.status();
    let content_type = resp
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned);
    let body = resp.text().await.unwrap_or_default();

    DeliveryError::Rejected {
        status: status.as_u16(),
        message: error_message(status, content_type.as_deref(), &body),
    }
}

/// Message for a rejected delivery.
///
/// A `text/plain` body is used as is. A JSON body contributes its `error`
/// field, or failing that its `errors` field. Anything else falls back to
/// the status line.
pub fn error_message(status: StatusCode, content_type: Option<&str>, body: &str) -> String {
    let essence = content_type
        .and_then(|ct| ct.split(';').next())
        .map(|ct| ct.trim().to_ascii_lowercase());

    let from_body = match essence.as_deref() {
        Some("text/plain") => Some(body.to_string()),
        Some("application/json") => json_error(body),
        _ => None,
    };

    from_body.unwrap_or_else(|| {
        status
            .canonical_reason()
            .map(str::to_string)
            .unwrap_or_else(|| format!("HTTP status {}", status.as_u16()))
    })
}

fn json_error(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let field = value.get("error").or_else(|| value.get("errors"))?;
    Some(match field {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    })
}
