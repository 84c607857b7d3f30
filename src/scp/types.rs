//! SCP data types

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Metadata announced by the remote sender ahead of a file body
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    /// Mode bits from the Create line
    pub permissions: u32,
    /// Body size in bytes
    pub size: u64,
    /// File name (not a path)
    pub filename: String,
    /// Last access time (Unix timestamp), if a Time line was sent
    pub atime: Option<i64>,
    /// Last modified time (Unix timestamp), if a Time line was sent
    pub mtime: Option<i64>,
}

impl FileInfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a later parse into this one.
    ///
    /// Each incoming field wins only when it is non-zero / non-empty.
    pub fn update(&mut self, new: &FileInfo) {
        if !new.filename.is_empty() {
            self.filename = new.filename.clone();
        }
        if new.permissions != 0 {
            self.permissions = new.permissions;
        }
        if new.size != 0 {
            self.size = new.size;
        }
        if let Some(atime) = new.atime.filter(|t| *t != 0) {
            self.atime = Some(atime);
        }
        if let Some(mtime) = new.mtime.filter(|t| *t != 0) {
            self.mtime = Some(mtime);
        }
    }
}

/// Transfer direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferDirection {
    Upload,
    Download,
}

/// Transfer state carried by progress events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferState {
    InProgress,
    Completed,
}

/// Progress event for one transfer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferProgress {
    pub remote_path: String,
    pub direction: TransferDirection,
    pub state: TransferState,
    pub total_bytes: u64,
    pub transferred_bytes: u64,
    /// Bytes per second since the body started
    pub speed: u64,
    pub eta_seconds: Option<u64>,
}

impl TransferProgress {
    pub fn percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 100.0;
        }
        (self.transferred_bytes as f64 / self.total_bytes as f64) * 100.0
    }
}

/// Per-call knobs for a transfer
#[derive(Debug, Clone, Default)]
pub struct TransferOptions {
    /// Receives throttled progress events; a full channel drops events rather
    /// than stalling the transfer.
    pub progress_tx: Option<mpsc::Sender<TransferProgress>>,
    /// Caller-side cancellation
    pub cancel: Option<CancellationToken>,
    /// Absolute deadline; falls back to the configured timeout when unset
    pub deadline: Option<Instant>,
}

impl TransferOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_progress(mut self, tx: mpsc::Sender<TransferProgress>) -> Self {
        self.progress_tx = Some(tx);
        self
    }

    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_info_update_keeps_time_then_create() {
        let mut info = FileInfo::new();
        info.update(&FileInfo {
            atime: Some(1_610_000_001),
            mtime: Some(1_610_000_000),
            ..FileInfo::default()
        });
        info.update(&FileInfo {
            permissions: 0o644,
            size: 5,
            filename: "hello".to_string(),
            ..FileInfo::default()
        });

        assert_eq!(info.permissions, 0o644);
        assert_eq!(info.size, 5);
        assert_eq!(info.filename, "hello");
        assert_eq!(info.mtime, Some(1_610_000_000));
        assert_eq!(info.atime, Some(1_610_000_001));
    }

    #[test]
    fn test_file_info_update_ignores_defaults() {
        let mut info = FileInfo {
            permissions: 0o600,
            size: 10,
            filename: "a".to_string(),
            atime: Some(1),
            mtime: Some(2),
        };
        info.update(&FileInfo {
            atime: Some(0),
            ..FileInfo::default()
        });
        assert_eq!(info.permissions, 0o600);
        assert_eq!(info.size, 10);
        assert_eq!(info.filename, "a");
        assert_eq!(info.atime, Some(1));
        assert_eq!(info.mtime, Some(2));
    }

    #[test]
    fn test_progress_percent() {
        let progress = TransferProgress {
            remote_path: "/remote/file.txt".to_string(),
            direction: TransferDirection::Download,
            state: TransferState::InProgress,
            total_bytes: 2048,
            transferred_bytes: 1024,
            speed: 0,
            eta_seconds: None,
        };
        assert_eq!(progress.percent(), 50.0);
    }
}
