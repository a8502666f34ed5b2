//! Chunked async body stream fed by a transfer thread or a test producer.

use std::io;
use tokio::sync::mpsc;

/// Producer half of a body stream. Dropping it ends the body.
pub type BodySender = mpsc::Sender<io::Result<Vec<u8>>>;

/// Response body delivered as a sequence of byte chunks.
pub struct BodyStream {
    rx: mpsc::Receiver<io::Result<Vec<u8>>>,
    pending: Vec<u8>,
    pos: usize,
    deferred_error: Option<io::Error>,
    eof: bool,
}

impl BodyStream {
    /// Creates a bounded body channel; `depth` chunks may be queued before the
    /// producer blocks.
    pub fn channel(depth: usize) -> (BodySender, BodyStream) {
        let (tx, rx) = mpsc::channel(depth.max(1));
        let stream = BodyStream {
            rx,
            pending: Vec::new(),
            pos: 0,
            deferred_error: None,
            eof: false,
        };
        (tx, stream)
    }

    /// Fills `buf` completely unless the body ends first; returns 0 at end of
    /// body. An error that arrives after some bytes were collected is held
    /// back and returned by the next call, so no received byte is dropped.
    pub async fn read_chunk(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some(e) = self.deferred_error.take() {
            return Err(e);
        }
        let mut filled = 0;
        while filled < buf.len() {
            if self.pos < self.pending.len() {
                let n = (self.pending.len() - self.pos).min(buf.len() - filled);
                buf[filled..filled + n].copy_from_slice(&self.pending[self.pos..self.pos + n]);
                self.pos += n;
                filled += n;
                continue;
            }
            if self.eof {
                break;
            }
            match self.rx.recv().await {
                Some(Ok(data)) => {
                    self.pending = data;
                    self.pos = 0;
                }
                Some(Err(e)) if filled == 0 => return Err(e),
                Some(Err(e)) => {
                    self.deferred_error = Some(e);
                    break;
                }
                None => self.eof = true,
            }
        }
        Ok(filled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn aggregates_small_chunks_into_full_reads() {
        let (tx, mut body) = BodyStream::channel(8);
        tokio::spawn(async move {
            for part in [&b"abc"[..], b"defg", b"hi", b"j"] {
                tx.send(Ok(part.to_vec())).await.unwrap();
            }
        });
        let mut buf = [0u8; 4];
        assert_eq!(body.read_chunk(&mut buf).await.unwrap(), 4);
        assert_eq!(&buf, b"abcd");
        assert_eq!(body.read_chunk(&mut buf).await.unwrap(), 4);
        assert_eq!(&buf, b"efgh");
        assert_eq!(body.read_chunk(&mut buf).await.unwrap(), 2);
        assert_eq!(&buf[..2], b"ij");
        assert_eq!(body.read_chunk(&mut buf).await.unwrap(), 0);
        assert_eq!(body.read_chunk(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn error_after_partial_fill_is_deferred() {
        let (tx, mut body) = BodyStream::channel(8);
        tx.send(Ok(b"xyz".to_vec())).await.unwrap();
        tx.send(Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")))
            .await
            .unwrap();
        drop(tx);

        let mut buf = [0u8; 8];
        assert_eq!(body.read_chunk(&mut buf).await.unwrap(), 3);
        assert_eq!(&buf[..3], b"xyz");
        let err = body.read_chunk(&mut buf).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::ConnectionReset);
    }
}
