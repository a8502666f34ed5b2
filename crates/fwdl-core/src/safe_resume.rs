//! Decide whether bytes already on disk can be continued against a fresh
//! response, or must be discarded.

use std::fmt;

use crate::http::HttpResponse;

/// Outcome of comparing a resumed response with what the record remembers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeCheck {
    /// Append the response body to the existing partial file.
    Continue,
    /// Discard partial data and restart from byte 0.
    Restart(RestartReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestartReason {
    /// A ranged request was answered with the full body (200).
    RangeIgnored,
    /// The validator or size no longer matches the stored one.
    RemoteChanged { etag_changed: bool, size_changed: bool },
}

impl fmt::Display for RestartReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RestartReason::RangeIgnored => write!(f, "server ignored the range request"),
            RestartReason::RemoteChanged {
                etag_changed,
                size_changed,
            } => {
                write!(f, "remote resource changed")?;
                match (etag_changed, size_changed) {
                    (true, true) => write!(f, " (ETag, size)"),
                    (true, false) => write!(f, " (ETag)"),
                    (false, true) => write!(f, " (size)"),
                    (false, false) => Ok(()),
                }
            }
        }
    }
}

/// Checks a response obtained for `offset` against the stored validator and
/// total. A fresh download (`offset == 0`) always continues. A missing ETag
/// on either side is not treated as a change.
pub fn check_resume(
    offset: u64,
    stored_etag: Option<&str>,
    stored_total: u64,
    response: &HttpResponse,
) -> ResumeCheck {
    if offset == 0 {
        return ResumeCheck::Continue;
    }
    if !response.is_partial() {
        return ResumeCheck::Restart(RestartReason::RangeIgnored);
    }

    let etag_changed = matches!(
        (stored_etag, response.etag()),
        (Some(a), Some(b)) if a != b
    );
    let size_changed = match response.total_size() {
        Some(total) => stored_total > 0 && total != stored_total,
        None => false,
    };

    if etag_changed || size_changed {
        ResumeCheck::Restart(RestartReason::RemoteChanged {
            etag_changed,
            size_changed,
        })
    } else {
        ResumeCheck::Continue
    }
}
