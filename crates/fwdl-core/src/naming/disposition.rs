//! `Content-Disposition` file name extraction.

/// File name carried by a raw `Content-Disposition` value. The RFC 5987
/// `filename*=UTF-8''...` form wins over plain `filename=`.
pub fn disposition_file_name(value: &str) -> Option<String> {
    let mut plain = None;

    for param in value.split(';').map(str::trim) {
        let Some((key, raw)) = param.split_once('=') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let raw = raw.trim();

        if key == "filename*" {
            let encoded = raw
                .split_once("''")
                .filter(|(charset, _)| charset.eq_ignore_ascii_case("utf-8"))
                .map(|(_, rest)| rest);
            if let Some(name) = encoded.and_then(percent_decode).filter(|n| !n.is_empty()) {
                return Some(name);
            }
        } else if key == "filename" {
            let name = unquote(raw);
            if !name.is_empty() {
                plain = Some(name);
            }
        }
    }

    plain
}

fn unquote(raw: &str) -> String {
    let Some(inner) = raw
        .strip_prefix('"')
        .and_then(|r| r.strip_suffix('"'))
    else {
        return raw.to_string();
    };
    let mut out = String::with_capacity(inner.len());
    let mut escaped = false;
    for c in inner.chars() {
        if escaped || c != '\\' {
            out.push(c);
            escaped = false;
        } else {
            escaped = true;
        }
    }
    out
}

/// Decodes `%XX` escapes. Malformed escapes are kept literally; `None` if
/// the decoded bytes are not UTF-8.
pub(super) fn percent_decode(input: &str) -> Option<String> {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(b) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(b);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8(out).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoted_and_token_forms() {
        assert_eq!(
            disposition_file_name("attachment; filename=\"report.pdf\"").as_deref(),
            Some("report.pdf")
        );
        assert_eq!(
            disposition_file_name("attachment; filename=simple.bin").as_deref(),
            Some("simple.bin")
        );
        assert_eq!(
            disposition_file_name("attachment; filename=\"say \\\"hi\\\".txt\"").as_deref(),
            Some("say \"hi\".txt")
        );
    }

    #[test]
    fn extended_form_wins() {
        assert_eq!(
            disposition_file_name("attachment; filename*=utf-8''na%C3%AFve.txt; filename=naive.txt")
                .as_deref(),
            Some("naïve.txt")
        );
    }

    #[test]
    fn missing_or_empty() {
        assert_eq!(disposition_file_name("inline"), None);
        assert_eq!(disposition_file_name("attachment; filename=\"\""), None);
    }

    #[test]
    fn percent_decode_keeps_malformed_escapes() {
        assert_eq!(percent_decode("a%20b").as_deref(), Some("a b"));
        assert_eq!(percent_decode("100%").as_deref(), Some("100%"));
        assert_eq!(percent_decode("%zz").as_deref(), Some("%zz"));
        assert_eq!(percent_decode("%FF"), None);
    }
}
