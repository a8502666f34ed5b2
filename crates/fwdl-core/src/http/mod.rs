//! Range-aware HTTP client.
//!
//! A `RangeTransport` opens one GET per attempt, optionally with
//! `Range: bytes=<offset>-`, and hands back an `HttpResponse` exposing status
//! validity, resume support, remaining length and the body as a chunked
//! async stream. `CurlTransport` is the production implementation; tests
//! inject their own transport.

mod body;
mod parse;
mod transport;

pub use body::{BodySender, BodyStream};
pub use parse::ResponseHead;
pub use transport::{CurlOptions, CurlTransport};

use async_trait::async_trait;

use crate::error::DownloadError;
use crate::naming::disposition_file_name;

pub const HTTP_OK: u32 = 200;
pub const HTTP_PARTIAL_CONTENT: u32 = 206;

/// Injected HTTP capability used by download tasks.
#[async_trait]
pub trait RangeTransport: Send + Sync {
    /// Opens a GET for `url`. When `resume_from > 0` the request carries
    /// `Range: bytes=<resume_from>-`. Resolves once response headers arrive.
    async fn connect(&self, url: &str, resume_from: u64) -> Result<HttpResponse, DownloadError>;
}

/// One response: parsed headers plus the (not yet consumed) body.
pub struct HttpResponse {
    head: ResponseHead,
    resume_from: u64,
    body: Option<BodyStream>,
}

impl HttpResponse {
    pub fn new(head: ResponseHead, resume_from: u64, body: Option<BodyStream>) -> Self {
        Self {
            head,
            resume_from,
            body,
        }
    }

    pub fn head(&self) -> &ResponseHead {
        &self.head
    }

    pub fn status(&self) -> u32 {
        self.head.status
    }

    /// Offset the request asked to start from.
    pub fn resume_from(&self) -> u64 {
        self.resume_from
    }

    /// 200 (full content) or 206 (partial content).
    pub fn is_valid_response(&self) -> bool {
        self.head.status == HTTP_OK || self.head.status == HTTP_PARTIAL_CONTENT
    }

    /// True when the server honored the range request.
    pub fn is_partial(&self) -> bool {
        self.head.status == HTTP_PARTIAL_CONTENT
    }

    /// 206, or a 200 that still advertises `Accept-Ranges: bytes`.
    pub fn supports_resume(&self) -> bool {
        self.is_partial() || self.head.accept_ranges
    }

    /// Bytes remaining in this response (not the full resource when resuming).
    pub fn content_length(&self) -> Option<u64> {
        self.head.content_length
    }

    /// Full resource size: `resume_from + Content-Length` for a 206, plain
    /// `Content-Length` otherwise. A length that overflows is unknown.
    pub fn total_size(&self) -> Option<u64> {
        let len = self.head.content_length?;
        if self.is_partial() {
            self.resume_from.checked_add(len)
        } else {
            Some(len)
        }
    }

    pub fn etag(&self) -> Option<&str> {
        self.head.etag.as_deref()
    }

    /// Server-suggested file name from `Content-Disposition`, if any.
    pub fn suggested_file_name(&self) -> Option<String> {
        self.head
            .content_disposition
            .as_deref()
            .and_then(disposition_file_name)
    }

    /// Takes the body stream. Fails if the connection has no body (or it was
    /// already taken or closed).
    pub fn open_stream(&mut self) -> Result<BodyStream, DownloadError> {
        self.body
            .take()
            .ok_or_else(|| DownloadError::Stream("response has no body".to_string()))
    }

    /// Releases the connection. Safe to call more than once.
    pub fn close(&mut self) {
        self.body = None;
    }
}

impl std::fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpResponse")
            .field("head", &self.head)
            .field("resume_from", &self.resume_from)
            .field("has_body", &self.body.is_some())
            .finish()
    }
}
