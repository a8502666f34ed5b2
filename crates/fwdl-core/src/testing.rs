//! Test doubles shared by task and coordinator tests.

use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc::UnboundedReceiver;

use crate::connectivity::NetworkStatus;
use crate::error::DownloadError;
use crate::events::DownloadEvent;
use crate::http::{BodyStream, HttpResponse, RangeTransport, ResponseHead};
use crate::retry::RetryPolicy;
use crate::store::{DownloadRecord, DownloadStatus, ProgressStore};
use crate::task::{TaskConfig, TaskContext};

/// Deterministic body: byte i is a function of i.
pub(crate) fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i.wrapping_mul(31) % 251) as u8).collect()
}

pub(crate) fn test_config() -> TaskConfig {
    TaskConfig {
        chunk_size: 4096,
        persist_threshold_bytes: 16 * 1024,
        pause_poll: Duration::from_millis(10),
        persist_retry_delay: Duration::from_millis(1),
        retry: RetryPolicy {
            max_retries: 3,
            delay: Duration::from_millis(10),
        },
    }
}

pub(crate) fn context(
    transport: Arc<FakeTransport>,
    store: Arc<dyn ProgressStore>,
    network: NetworkStatus,
    config: TaskConfig,
) -> TaskContext {
    TaskContext {
        transport,
        store,
        network,
        config,
    }
}

struct FakeState {
    body: Arc<Vec<u8>>,
    etag: Option<String>,
    ranges: bool,
    content_disposition: Option<String>,
    chunk: usize,
    delay: Duration,
    fail_connects: u32,
    cut_after: Option<u64>,
    status: Option<u32>,
    range_status: Option<u32>,
    length_header: Option<Option<u64>>,
    offsets: Vec<u64>,
}

/// In-process `RangeTransport` serving one resource.
pub(crate) struct FakeTransport {
    state: Mutex<FakeState>,
}

impl FakeTransport {
    pub(crate) fn new(body: Vec<u8>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(FakeState {
                body: Arc::new(body),
                etag: None,
                ranges: true,
                content_disposition: None,
                chunk: 4096,
                delay: Duration::ZERO,
                fail_connects: 0,
                cut_after: None,
                status: None,
                range_status: None,
                length_header: None,
                offsets: Vec::new(),
            }),
        })
    }

    pub(crate) fn set_body(&self, body: Vec<u8>) {
        self.state.lock().body = Arc::new(body);
    }

    pub(crate) fn set_ranges(&self, on: bool) {
        self.state.lock().ranges = on;
    }

    pub(crate) fn set_etag(&self, etag: Option<&str>) {
        self.state.lock().etag = etag.map(str::to_string);
    }

    pub(crate) fn set_content_disposition(&self, value: &str) {
        self.state.lock().content_disposition = Some(value.to_string());
    }

    /// Body chunk size and pause between chunks.
    pub(crate) fn set_pacing(&self, chunk: usize, delay: Duration) {
        let mut st = self.state.lock();
        st.chunk = chunk.max(1);
        st.delay = delay;
    }

    /// The next `n` connects fail with a connection error.
    pub(crate) fn fail_next_connects(&self, n: u32) {
        self.state.lock().fail_connects = n;
    }

    /// The next response body breaks off after `n` bytes.
    pub(crate) fn cut_next_after(&self, n: u64) {
        self.state.lock().cut_after = Some(n);
    }

    /// Answer every request with `code`.
    pub(crate) fn set_status(&self, code: Option<u32>) {
        self.state.lock().status = code;
    }

    /// Answer ranged requests (offset > 0) with `code`.
    pub(crate) fn set_range_status(&self, code: Option<u32>) {
        self.state.lock().range_status = code;
    }

    /// `Content-Length` sent on 200/206 instead of the real one
    /// (`Some(None)`: no header at all).
    pub(crate) fn set_length_header(&self, value: Option<Option<u64>>) {
        self.state.lock().length_header = value;
    }

    /// Offsets of every connect so far.
    pub(crate) fn offsets(&self) -> Vec<u64> {
        self.state.lock().offsets.clone()
    }
}

#[async_trait]
impl RangeTransport for FakeTransport {
    async fn connect(&self, _url: &str, resume_from: u64) -> Result<HttpResponse, DownloadError> {
        let mut st = self.state.lock();
        st.offsets.push(resume_from);
        if st.fail_connects > 0 {
            st.fail_connects -= 1;
            return Err(DownloadError::Connection("connection refused".to_string()));
        }

        let len = st.body.len() as u64;
        let (status, start) = match (st.status, st.range_status) {
            (Some(code), _) => (code, 0),
            (None, Some(code)) if resume_from > 0 => (code, 0),
            (None, _) if resume_from > 0 && st.ranges && resume_from < len => (206, resume_from),
            (None, _) if resume_from > 0 && st.ranges => (416, 0),
            (None, _) => (200, 0),
        };
        let ok = status == 200 || status == 206;
        let content_length = match st.length_header {
            Some(header) if ok => header,
            _ => Some(if ok { len - start } else { 0 }),
        };
        let head = ResponseHead {
            status,
            content_length,
            accept_ranges: st.ranges,
            etag: st.etag.clone(),
            content_disposition: st.content_disposition.clone(),
        };

        let (tx, body) = BodyStream::channel(2);
        if ok {
            let data = st.body.clone();
            let chunk = st.chunk;
            let delay = st.delay;
            let cut = st.cut_after.take();
            tokio::spawn(async move {
                let mut pos = start as usize;
                let mut sent = 0u64;
                while pos < data.len() {
                    let mut end = (pos + chunk).min(data.len());
                    if let Some(cut) = cut {
                        if sent >= cut {
                            let err = io::Error::new(io::ErrorKind::ConnectionReset, "connection reset by peer");
                            let _ = tx.send(Err(err)).await;
                            return;
                        }
                        end = end.min(pos + (cut - sent) as usize);
                    }
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    if tx.send(Ok(data[pos..end].to_vec())).await.is_err() {
                        return;
                    }
                    sent += (end - pos) as u64;
                    pos = end;
                }
            });
        }
        Ok(HttpResponse::new(head, resume_from, Some(body)))
    }
}

/// Store wrapper whose writes can be made to fail.
pub(crate) struct FlakyStore<S> {
    inner: S,
    remaining: AtomicU32,
    failures: AtomicU32,
}

impl<S: ProgressStore> FlakyStore<S> {
    pub(crate) fn new(inner: S) -> Self {
        Self {
            inner,
            remaining: AtomicU32::new(0),
            failures: AtomicU32::new(0),
        }
    }

    /// Fail the next `n` writes (`u32::MAX`: effectively all of them).
    pub(crate) fn fail_next(&self, n: u32) {
        self.remaining.store(n, Ordering::SeqCst);
    }

    pub(crate) fn failures(&self) -> u32 {
        self.failures.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<()> {
        let take = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if take.is_ok() {
            self.failures.fetch_add(1, Ordering::SeqCst);
            bail!("database is locked");
        }
        Ok(())
    }
}

#[async_trait]
impl<S: ProgressStore> ProgressStore for FlakyStore<S> {
    async fn upsert(&self, record: &DownloadRecord) -> Result<()> {
        self.check()?;
        self.inner.upsert(record).await
    }

    async fn update_progress(&self, id: &str, downloaded_bytes: u64, total_bytes: u64) -> Result<()> {
        self.check()?;
        self.inner.update_progress(id, downloaded_bytes, total_bytes).await
    }

    async fn update_status(
        &self,
        id: &str,
        status: DownloadStatus,
        error_message: Option<&str>,
    ) -> Result<()> {
        self.check()?;
        self.inner.update_status(id, status, error_message).await
    }

    async fn update_retry_count(&self, id: &str, retry_count: u32) -> Result<()> {
        self.check()?;
        self.inner.update_retry_count(id, retry_count).await
    }

    async fn get_by_id(&self, id: &str) -> Result<Option<DownloadRecord>> {
        self.inner.get_by_id(id).await
    }

    async fn list_by_status(&self, statuses: &[DownloadStatus]) -> Result<Vec<DownloadRecord>> {
        self.inner.list_by_status(statuses).await
    }

    async fn list_all(&self) -> Result<Vec<DownloadRecord>> {
        self.inner.list_all().await
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.check()?;
        self.inner.delete(id).await
    }

    async fn purge_finished_before(&self, cutoff_unix: i64) -> Result<u64> {
        self.inner.purge_finished_before(cutoff_unix).await
    }
}

/// Next event matching `pred`; panics after 10 s.
pub(crate) async fn wait_event(
    rx: &mut UnboundedReceiver<DownloadEvent>,
    mut pred: impl FnMut(&DownloadEvent) -> bool,
) -> DownloadEvent {
    let wait = async {
        loop {
            match rx.recv().await {
                Some(ev) if pred(&ev) => return ev,
                Some(_) => continue,
                None => panic!("listener channel closed"),
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(10), wait)
        .await
        .expect("timed out waiting for event")
}

/// Every event up to and including the first `Completed`.
pub(crate) async fn events_until_finished(
    rx: &mut UnboundedReceiver<DownloadEvent>,
) -> Vec<DownloadEvent> {
    let mut seen = Vec::new();
    let wait = async {
        while let Some(ev) = rx.recv().await {
            let done = matches!(ev, DownloadEvent::Completed { .. });
            seen.push(ev);
            if done {
                return;
            }
        }
    };
    tokio::time::timeout(Duration::from_secs(10), wait)
        .await
        .expect("timed out waiting for completion");
    seen
}

pub(crate) fn progressed_past(bytes: u64) -> impl FnMut(&DownloadEvent) -> bool {
    move |ev| matches!(ev, DownloadEvent::Progress { downloaded_bytes, .. } if *downloaded_bytes >= bytes)
}

/// Polls `cond` every 5 ms for up to 5 s.
pub(crate) async fn eventually(mut cond: impl FnMut() -> bool) {
    for _ in 0..1000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}
