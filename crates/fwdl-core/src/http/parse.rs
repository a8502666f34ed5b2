//! Parse HTTP response header lines into a `ResponseHead`.

/// Status and the headers the download engine consumes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseHead {
    /// Final status code (after redirects).
    pub status: u32,
    /// `Content-Length`: bytes remaining in this response.
    pub content_length: Option<u64>,
    /// True if server sent `Accept-Ranges: bytes`.
    pub accept_ranges: bool,
    /// `ETag` value without surrounding quotes.
    pub etag: Option<String>,
    /// Raw `Content-Disposition` value (filename hint).
    pub content_disposition: Option<String>,
}

/// Parse the header lines of the final response block (status line first).
pub(crate) fn parse_head(lines: &[String]) -> ResponseHead {
    let mut head = ResponseHead::default();

    for line in lines {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line.starts_with("HTTP/") {
            head.status = line
                .split_whitespace()
                .nth(1)
                .and_then(|code| code.parse().ok())
                .unwrap_or(0);
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            let name = name.trim();
            let value = value.trim();
            if name.eq_ignore_ascii_case("content-length") {
                if let Ok(n) = value.parse::<u64>() {
                    head.content_length = Some(n);
                }
            }
            if name.eq_ignore_ascii_case("accept-ranges") {
                head.accept_ranges = value.eq_ignore_ascii_case("bytes");
            }
            if name.eq_ignore_ascii_case("etag") {
                head.etag = Some(value.trim_start_matches("W/").trim_matches('"').to_string());
            }
            if name.eq_ignore_ascii_case("content-disposition") {
                head.content_disposition = Some(value.to_string());
            }
        }
    }

    head
}
