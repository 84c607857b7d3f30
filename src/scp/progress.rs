//! Body copy with progress reporting
//!
//! SCP bodies are framed by the size in the header, not by EOF: the stream
//! keeps going with protocol bytes afterwards. [`copy_exact`] moves exactly
//! the declared number of bytes and feeds a [`ProgressReporter`] on the way.

use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use super::error::ScpError;
use super::types::{TransferDirection, TransferProgress, TransferState};

/// Chunk size for body copies
const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Minimum gap between two in-progress events
const PROGRESS_INTERVAL: Duration = Duration::from_millis(200);

/// Throttled progress emitter for one transfer.
///
/// Events are sent with `try_send`; a slow observer loses intermediate
/// events but never stalls the copy.
pub struct ProgressReporter {
    tx: Option<mpsc::Sender<TransferProgress>>,
    remote_path: String,
    direction: TransferDirection,
    total_bytes: u64,
    start: Instant,
    last_emit: Option<Instant>,
}

impl ProgressReporter {
    pub fn new(
        tx: Option<mpsc::Sender<TransferProgress>>,
        remote_path: impl Into<String>,
        direction: TransferDirection,
        total_bytes: u64,
    ) -> Self {
        Self {
            tx,
            remote_path: remote_path.into(),
            direction,
            total_bytes,
            start: Instant::now(),
            last_emit: None,
        }
    }

    /// Reporter that drops everything
    pub fn disabled(direction: TransferDirection) -> Self {
        Self::new(None, String::new(), direction, 0)
    }

    pub fn report(&mut self, transferred: u64) {
        if self.tx.is_none() {
            return;
        }
        if let Some(last) = self.last_emit {
            if last.elapsed() < PROGRESS_INTERVAL {
                return;
            }
        }
        self.emit(TransferState::InProgress, transferred);
        self.last_emit = Some(Instant::now());
    }

    pub fn finish(&mut self, transferred: u64) {
        self.emit(TransferState::Completed, transferred);
    }

    fn emit(&self, state: TransferState, transferred: u64) {
        let Some(tx) = &self.tx else {
            return;
        };

        let elapsed = self.start.elapsed().as_secs_f64().max(0.001);
        let speed = (transferred as f64 / elapsed) as u64;
        let eta_seconds = match state {
            TransferState::Completed => Some(0),
            TransferState::InProgress if speed > 0 => {
                Some(self.total_bytes.saturating_sub(transferred) / speed)
            }
            TransferState::InProgress => None,
        };

        let _ = tx.try_send(TransferProgress {
            remote_path: self.remote_path.clone(),
            direction: self.direction,
            state,
            total_bytes: self.total_bytes,
            transferred_bytes: transferred,
            speed,
            eta_seconds,
        });
    }
}

/// Copy exactly `size` bytes from `reader` to `writer`.
///
/// Never reads past `size`. A reader that ends early is an
/// `UnexpectedEof` stream error.
pub async fn copy_exact<R, W>(
    reader: &mut R,
    writer: &mut W,
    size: u64,
    reporter: &mut ProgressReporter,
) -> Result<u64, ScpError>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    let buf_len = usize::try_from(size)
        .unwrap_or(usize::MAX)
        .clamp(1, COPY_BUFFER_SIZE);
    let mut buf = vec![0u8; buf_len];
    let mut copied: u64 = 0;

    while copied < size {
        let want = (size - copied).min(buf.len() as u64) as usize;
        let n = reader.read(&mut buf[..want]).await?;
        if n == 0 {
            return Err(ScpError::StreamIo(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("stream ended after {} of {} bytes", copied, size),
            )));
        }
        writer.write_all(&buf[..n]).await?;
        copied += n as u64;
        reporter.report(copied);
    }

    writer.flush().await?;
    reporter.finish(copied);
    Ok(copied)
}
