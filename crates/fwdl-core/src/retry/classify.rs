//! Classify curl errors into download error kinds.

use crate::error::DownloadError;

/// Where in the exchange a curl error surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferPhase {
    /// Before the response headers were complete.
    Connect,
    /// While the body was streaming.
    Body,
}

/// Maps a curl error to `Connection` (network failure before the response),
/// `Request` (the request itself is unusable: bad URL, unsupported scheme,
/// TLS setup) or `Stream` (the body broke off mid-transfer).
pub fn classify_curl_error(e: &curl::Error, phase: TransferPhase) -> DownloadError {
    let network = e.is_operation_timedout()
        || e.is_couldnt_connect()
        || e.is_couldnt_resolve_host()
        || e.is_couldnt_resolve_proxy()
        || e.is_read_error()
        || e.is_recv_error()
        || e.is_send_error()
        || e.is_got_nothing()
        || e.is_partial_file();

    match phase {
        TransferPhase::Connect if network => DownloadError::Connection(e.to_string()),
        TransferPhase::Connect => DownloadError::Request(e.to_string()),
        TransferPhase::Body => DownloadError::Stream(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_phase_is_connection_error() {
        // CURLE_COULDNT_CONNECT
        let e = curl::Error::new(7);
        assert!(matches!(
            classify_curl_error(&e, TransferPhase::Connect),
            DownloadError::Connection(_)
        ));
    }

    #[test]
    fn malformed_url_is_not_retried() {
        // CURLE_URL_MALFORMAT
        let e = curl::Error::new(3);
        let err = classify_curl_error(&e, TransferPhase::Connect);
        assert!(matches!(err, DownloadError::Request(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn body_phase_is_stream_error() {
        // CURLE_PARTIAL_FILE
        let e = curl::Error::new(18);
        let err = classify_curl_error(&e, TransferPhase::Body);
        assert!(matches!(err, DownloadError::Stream(_)));
        assert!(err.is_transient());
    }
}
