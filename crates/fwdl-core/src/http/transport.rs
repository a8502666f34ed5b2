//! libcurl-backed `RangeTransport`.
//!
//! Each `connect` runs one blocking curl transfer on a dedicated thread. The
//! parsed response head is handed back through a oneshot as soon as the first
//! body bytes (or the end of the transfer) arrive; body chunks follow through a
//! bounded channel, so a slow disk applies back-pressure to the socket.
//! Dropping the `HttpResponse` or its `BodyStream` aborts the transfer.

use std::cell::RefCell;
use std::io;
use std::str;
use std::time::Duration;

use async_trait::async_trait;
use curl::easy::Easy;
use tokio::sync::oneshot;

use super::body::{BodySender, BodyStream};
use super::parse::{parse_head, ResponseHead};
use super::{HttpResponse, RangeTransport};
use crate::error::DownloadError;
use crate::retry::{classify_curl_error, TransferPhase};

/// Body chunks buffered between the transfer thread and the reader.
const BODY_QUEUE_DEPTH: usize = 16;

type HeadSender = oneshot::Sender<Result<ResponseHead, DownloadError>>;

/// Per-connection curl settings.
#[derive(Debug, Clone)]
pub struct CurlOptions {
    pub connect_timeout: Duration,
    /// Abort when throughput stays below `low_speed_limit` bytes/s for
    /// `low_speed_time`.
    pub low_speed_limit: u32,
    pub low_speed_time: Duration,
    pub user_agent: Option<String>,
    pub max_redirects: u32,
}

impl Default for CurlOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(20),
            low_speed_limit: 1024,
            low_speed_time: Duration::from_secs(60),
            user_agent: Some(concat!("fwdl/", env!("CARGO_PKG_VERSION")).to_string()),
            max_redirects: 10,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CurlTransport {
    options: CurlOptions,
}

impl CurlTransport {
    pub fn new(options: CurlOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl RangeTransport for CurlTransport {
    async fn connect(&self, url: &str, resume_from: u64) -> Result<HttpResponse, DownloadError> {
        let (head_tx, head_rx) = oneshot::channel();
        let (body_tx, body) = BodyStream::channel(BODY_QUEUE_DEPTH);
        let owned_url = url.to_string();
        let options = self.options.clone();

        std::thread::Builder::new()
            .name("fwdl-transfer".to_string())
            .spawn(move || perform(&owned_url, resume_from, &options, head_tx, body_tx))
            .map_err(|e| DownloadError::Connection(format!("spawn transfer thread: {e}")))?;

        let head = match head_rx.await {
            Ok(result) => result?,
            Err(_) => {
                return Err(DownloadError::Connection(
                    "transfer ended before response headers".to_string(),
                ))
            }
        };
        tracing::debug!(
            url,
            offset = resume_from,
            code = head.status,
            content_length = ?head.content_length,
            "response headers received"
        );
        Ok(HttpResponse::new(head, resume_from, Some(body)))
    }
}

/// Runs one GET on the current thread.
fn perform(
    url: &str,
    resume_from: u64,
    options: &CurlOptions,
    head_tx: HeadSender,
    body_tx: BodySender,
) {
    let lines = RefCell::new(Vec::new());
    let head_tx = RefCell::new(Some(head_tx));
    let mut easy = Easy::new();

    let result = configure(&mut easy, url, resume_from, options)
        .and_then(|()| run_transfer(&mut easy, &lines, &head_tx, &body_tx));

    let unsent_head = head_tx.borrow_mut().take();
    match (result, unsent_head) {
        // No body bytes at all (e.g. 204, 404 with empty body, zero-length file).
        (Ok(()), Some(tx)) => {
            let _ = tx.send(Ok(parse_head(&lines.borrow())));
        }
        // Dropping body_tx marks the end of the body.
        (Ok(()), None) => {}
        (Err(e), Some(tx)) => {
            let _ = tx.send(Err(classify_curl_error(&e, TransferPhase::Connect)));
        }
        // The reader went away; nobody is listening.
        (Err(e), None) if e.is_write_error() => {}
        (Err(e), None) => {
            let err = classify_curl_error(&e, TransferPhase::Body);
            let _ = body_tx.blocking_send(Err(io::Error::new(io::ErrorKind::Other, err.to_string())));
        }
    }
}

fn configure(
    easy: &mut Easy,
    url: &str,
    resume_from: u64,
    options: &CurlOptions,
) -> Result<(), curl::Error> {
    easy.url(url)?;
    easy.get(true)?;
    easy.follow_location(true)?;
    easy.max_redirections(options.max_redirects)?;
    easy.connect_timeout(options.connect_timeout)?;
    easy.low_speed_limit(options.low_speed_limit)?;
    easy.low_speed_time(options.low_speed_time)?;
    if let Some(agent) = &options.user_agent {
        easy.useragent(agent)?;
    }
    if resume_from > 0 {
        easy.range(&format!("{}-", resume_from))?;
    }
    Ok(())
}

fn run_transfer(
    easy: &mut Easy,
    lines: &RefCell<Vec<String>>,
    head_tx: &RefCell<Option<HeadSender>>,
    body_tx: &BodySender,
) -> Result<(), curl::Error> {
    let mut transfer = easy.transfer();
    transfer.header_function(|data| {
        if let Ok(s) = str::from_utf8(data) {
            let line = s.trim_end();
            let mut lines = lines.borrow_mut();
            // Each redirect hop starts a new header block.
            if line.starts_with("HTTP/") {
                lines.clear();
            }
            if !line.is_empty() {
                lines.push(line.to_string());
            }
        }
        true
    })?;
    transfer.write_function(|data| {
        if let Some(tx) = head_tx.borrow_mut().take() {
            if tx.send(Ok(parse_head(&lines.borrow()))).is_err() {
                return Ok(0);
            }
        }
        match body_tx.blocking_send(Ok(data.to_vec())) {
            Ok(()) => Ok(data.len()),
            Err(_) => Ok(0),
        }
    })?;
    transfer.perform()
}
