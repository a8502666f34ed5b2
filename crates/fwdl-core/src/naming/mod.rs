//! Local file names for downloads.
//!
//! A name comes from the caller, from the server's `Content-Disposition`
//! header, or from the last URL path segment, in that order, and is always
//! sanitized before it touches the filesystem.

mod disposition;

pub use disposition::disposition_file_name;

/// Used when neither the URL nor the server yields anything usable.
pub const FALLBACK_FILE_NAME: &str = "download.bin";

/// Linux NAME_MAX.
const NAME_MAX: usize = 255;

/// Picks the name to save `url` under, given an optional raw
/// `Content-Disposition` value.
pub fn derive_file_name(url: &str, content_disposition: Option<&str>) -> String {
    content_disposition
        .and_then(disposition_file_name)
        .or_else(|| file_name_from_url(url))
        .map(|raw| sanitize_file_name(&raw))
        .filter(|name| usable(name))
        .unwrap_or_else(|| FALLBACK_FILE_NAME.to_string())
}

/// Last non-empty path segment of `url`, percent-decoded.
pub fn file_name_from_url(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let segment = parsed.path_segments()?.filter(|s| !s.is_empty()).last()?;
    let decoded = disposition::percent_decode(segment).unwrap_or_else(|| segment.to_string());
    usable(&decoded).then_some(decoded)
}

/// Makes `name` safe as a single path component: separators, NUL and
/// control characters become `_`, runs of `_` collapse, leading and trailing
/// dots and blanks are dropped, and the result is cut to NAME_MAX bytes.
pub fn sanitize_file_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        let c = match c {
            '/' | '\\' | '\0' => '_',
            c if c.is_control() || c.is_whitespace() => '_',
            c => c,
        };
        if c == '_' && out.ends_with('_') {
            continue;
        }
        out.push(c);
    }

    let trimmed = out.trim_matches(|c: char| c == '.' || c == '_');
    let mut end = trimmed.len().min(NAME_MAX);
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    trimmed[..end].to_string()
}

fn usable(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".."
}
