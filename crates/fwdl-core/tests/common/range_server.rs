//! Minimal HTTP/1.1 server for integration tests.
//!
//! Serves one static body. GET with `Range: bytes=N-` gets 206 Partial
//! Content; everything else gets 200 with the full body. Optional knobs make
//! it behave like the servers downloads have to survive: no range support,
//! a validator, a server-chosen file name, a connection that dies mid-body.

#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

#[derive(Debug, Clone, Default)]
pub struct RangeServerOptions {
    /// If false, GET ignores Range and always returns 200 with the full body.
    pub ignore_ranges: bool,
    pub etag: Option<String>,
    pub content_disposition: Option<String>,
    /// The first GET closes the socket after this many body bytes while
    /// still advertising the full length.
    pub drop_first_after: Option<usize>,
    /// Every GET is answered with this status line and no body.
    pub status_override: Option<&'static str>,
}

pub struct RangeServer {
    pub url: String,
    requests: Arc<Mutex<Vec<Option<u64>>>>,
}

impl RangeServer {
    /// Range start of every GET so far (`None` for a plain GET).
    pub fn range_starts(&self) -> Vec<Option<u64>> {
        self.requests.lock().unwrap().clone()
    }
}

/// Starts a server in a background thread serving `body` at `<url>file.bin`.
/// The server runs until the process exits.
pub fn start(body: Vec<u8>) -> RangeServer {
    start_with_options(body, RangeServerOptions::default())
}

pub fn start_with_options(body: Vec<u8>, opts: RangeServerOptions) -> RangeServer {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().unwrap().port();
    let body = Arc::new(body);
    let opts = Arc::new(opts);
    let requests = Arc::new(Mutex::new(Vec::new()));
    let dropped = Arc::new(AtomicBool::new(false));
    let log = Arc::clone(&requests);
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let body = Arc::clone(&body);
            let opts = Arc::clone(&opts);
            let log = Arc::clone(&log);
            let dropped = Arc::clone(&dropped);
            thread::spawn(move || handle(stream, &body, &opts, &log, &dropped));
        }
    });
    RangeServer {
        url: format!("http://127.0.0.1:{}/file.bin", port),
        requests,
    }
}

fn handle(
    mut stream: std::net::TcpStream,
    body: &[u8],
    opts: &RangeServerOptions,
    log: &Mutex<Vec<Option<u64>>>,
    dropped: &AtomicBool,
) {
    let _ = stream.set_read_timeout(Some(std::time::Duration::from_secs(2)));
    let _ = stream.set_write_timeout(Some(std::time::Duration::from_secs(2)));
    let mut buf = [0u8; 8192];
    let n = match stream.read(&mut buf) {
        Ok(0) | Err(_) => return,
        Ok(n) => n,
    };
    let request = match std::str::from_utf8(&buf[..n]) {
        Ok(s) => s,
        Err(_) => return,
    };
    let (method, range_start) = parse_request(request);
    if !method.eq_ignore_ascii_case("GET") {
        let _ = stream.write_all(b"HTTP/1.1 405 Method Not Allowed\r\nContent-Length: 0\r\n\r\n");
        return;
    }
    log.lock().unwrap().push(range_start);

    if let Some(status) = opts.status_override {
        let response = format!("HTTP/1.1 {}\r\nContent-Length: 0\r\n\r\n", status);
        let _ = stream.write_all(response.as_bytes());
        return;
    }

    let total = body.len() as u64;
    let mut headers = String::new();
    let (status, slice) = match range_start {
        Some(start) if !opts.ignore_ranges && start >= total => {
            let response = format!(
                "HTTP/1.1 416 Range Not Satisfiable\r\nContent-Range: bytes */{}\r\nContent-Length: 0\r\n\r\n",
                total
            );
            let _ = stream.write_all(response.as_bytes());
            return;
        }
        Some(start) if !opts.ignore_ranges => {
            headers.push_str(&format!(
                "Content-Range: bytes {}-{}/{}\r\n",
                start,
                total - 1,
                total
            ));
            ("206 Partial Content", &body[start as usize..])
        }
        _ => ("200 OK", body),
    };
    if !opts.ignore_ranges {
        headers.push_str("Accept-Ranges: bytes\r\n");
    }
    if let Some(etag) = &opts.etag {
        headers.push_str(&format!("ETag: \"{}\"\r\n", etag));
    }
    if let Some(cd) = &opts.content_disposition {
        headers.push_str(&format!("Content-Disposition: {}\r\n", cd));
    }

    let response = format!(
        "HTTP/1.1 {}\r\nContent-Length: {}\r\n{}\r\n",
        status,
        slice.len(),
        headers
    );
    let _ = stream.write_all(response.as_bytes());

    let cut = opts
        .drop_first_after
        .filter(|_| !dropped.swap(true, Ordering::SeqCst));
    match cut {
        Some(n) => {
            let _ = stream.write_all(&slice[..n.min(slice.len())]);
            let _ = stream.flush();
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
        None => {
            let _ = stream.write_all(slice);
        }
    }
}

/// Returns (method, start of `Range: bytes=N-` if present).
fn parse_request(request: &str) -> (&str, Option<u64>) {
    let mut method = "";
    let mut range = None;
    for line in request.lines() {
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        if method.is_empty() {
            method = line.split_whitespace().next().unwrap_or("");
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("range") {
                let value = value.trim();
                if let Some(spec) = value.strip_prefix("bytes=") {
                    if let Some((a, _)) = spec.split_once('-') {
                        range = a.trim().parse::<u64>().ok();
                    }
                }
            }
        }
    }
    (method, range)
}
