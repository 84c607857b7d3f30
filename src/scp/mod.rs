//! SCP protocol engine
//!
//! # Wire format
//!
//! ```text
//! Create line    C0644 <size> <filename>\n
//! Time line      T<mtime> 0 <atime> 0\n
//! Response       0x00 | 0x01 <message>\n | 0x02 <message>\n
//! Body           <size> raw bytes, then 0x00
//! ```
//!
//! Uploads run `<scp> -qt <path>` remotely and push a Create line and the
//! body; downloads run `<scp> -f <path>` and read them back. Only single
//! regular files are supported.

pub mod client;
pub mod codec;
pub mod config;
mod deadline;
pub mod download;
pub mod error;
#[cfg(test)]
mod mock;
pub mod progress;
pub mod transport;
pub mod types;
pub mod upload;

pub use client::ScpClient;
pub use codec::{parse_permissions, Command, Response, ResponseKind};
pub use config::{ConfigError, ScpConfig};
pub use download::{download, DownloadState};
pub use error::ScpError;
pub use transport::{ExitStatus, ExitWaiter, RemoteProcess, ScpTransport};
pub use types::{FileInfo, TransferDirection, TransferOptions, TransferProgress, TransferState};
pub use upload::{upload, UploadState};
