//! OxideTerm SCP - single-file transfers over an SSH exec channel
//!
//! The [`scp`] module holds the protocol engine: wire codec, upload and
//! download orchestrators and the [`ScpClient`] facade. It runs over any
//! [`ScpTransport`]; the [`ssh`] module provides one backed by russh.

pub mod logging;
pub mod scp;
pub mod ssh;

pub use scp::{
    parse_permissions, FileInfo, ScpClient, ScpConfig, ScpError, ScpTransport, TransferOptions,
    TransferProgress,
};
pub use ssh::{AuthMethod, HostKeyPolicy, SshConfig, SshError};
