//! SCP error types

use std::time::Duration;

use thiserror::Error;

use crate::ssh::SshError;

#[derive(Error, Debug)]
pub enum ScpError {
    #[error("Malformed wire line: {0}")]
    MalformedWireLine(String),

    /// Mode bits outside `0..=0o777`, reported in octal and decimal.
    #[error("bad permissions {permissions:o} ({permissions})")]
    BadPermissions { permissions: u32 },

    #[error("Command '{0}' is invalid")]
    InvalidCommand(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// Warning or error frame sent by the remote `scp`; the message is
    /// passed through untouched.
    #[error("{0}")]
    RemoteFailure(String),

    #[error("Remote command failed ({status}): {stderr}")]
    RemoteExit { status: String, stderr: String },

    #[error("Stream IO error: {0}")]
    StreamIo(#[from] std::io::Error),

    #[error("Deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    #[error("Transfer cancelled")]
    Cancelled,

    #[error("Transfer task failed: {0}")]
    TaskFailed(String),

    #[error(transparent)]
    Ssh(#[from] SshError),
}

impl ScpError {
    /// True for the two ways a transfer can be cut short by its caller.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, ScpError::DeadlineExceeded(_) | ScpError::Cancelled)
    }
}
