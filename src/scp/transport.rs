//! Session adapter contract
//!
//! The transfer engine needs very little from the underlying connection:
//! start a remote command and get its stdin, its stdout and a way to wait
//! for its exit. "Run and wait" is [`ScpTransport::exec`] followed by
//! [`ExitWaiter::wait`]; "start without waiting" is `exec` alone, with the
//! wait deferred until the data exchange is done.

use std::fmt;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::oneshot;

use super::error::ScpError;

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Exit outcome of a remote command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExitStatus {
    pub code: Option<u32>,
    pub signal: Option<String>,
    /// Whatever the command wrote to stderr
    pub stderr: String,
}

impl ExitStatus {
    pub fn from_code(code: u32) -> Self {
        Self {
            code: Some(code),
            ..Default::default()
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0) && self.signal.is_none()
    }

    /// `Ok` on success, [`ScpError::RemoteExit`] otherwise.
    pub fn into_result(self) -> Result<(), ScpError> {
        if self.success() {
            return Ok(());
        }
        Err(ScpError::RemoteExit {
            status: self.to_string(),
            stderr: self.stderr.trim_end().to_string(),
        })
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.code, &self.signal) {
            (_, Some(signal)) => write!(f, "killed by signal {}", signal),
            (Some(code), None) => write!(f, "exit status {}", code),
            (None, None) => write!(f, "no exit status"),
        }
    }
}

/// Resolves once the remote command has exited
pub struct ExitWaiter {
    rx: oneshot::Receiver<Result<ExitStatus, ScpError>>,
}

/// Sending half of an [`ExitWaiter`], held by whoever drives the command
pub type ExitNotifier = oneshot::Sender<Result<ExitStatus, ScpError>>;

impl ExitWaiter {
    pub fn channel() -> (ExitNotifier, ExitWaiter) {
        let (tx, rx) = oneshot::channel();
        (tx, ExitWaiter { rx })
    }

    pub async fn wait(self) -> Result<ExitStatus, ScpError> {
        self.rx.await.map_err(|_| {
            ScpError::TaskFailed("remote command driver went away before reporting exit".into())
        })?
    }
}

/// A started remote command
pub struct RemoteProcess {
    /// Bytes written here reach the command's stdin; shutting it down sends EOF
    pub stdin: BoxedWriter,
    /// The command's stdout
    pub stdout: BoxedReader,
    pub exit: ExitWaiter,
}

/// A connection able to run remote commands.
///
/// One transfer uses the handles of one `exec` call exclusively; concurrent
/// transfers call `exec` separately.
#[async_trait]
pub trait ScpTransport: Send + Sync {
    /// Start `command` remotely without waiting for it to finish.
    async fn exec(&self, command: &str) -> Result<RemoteProcess, ScpError>;

    /// Release the connection. Must be idempotent.
    async fn close(&self) -> Result<(), ScpError> {
        Ok(())
    }
}

/// Remote receiver invocation: `<binary> -qt <path>`
pub fn sink_command(remote_binary: &str, remote_path: &str) -> String {
    format!("{} -qt {}", remote_binary, shell_quote(remote_path))
}

/// Remote sender invocation: `<binary> -f <path>`
pub fn source_command(remote_binary: &str, remote_path: &str) -> String {
    format!("{} -f {}", remote_binary, shell_quote(remote_path))
}

/// Quote a path for a POSIX shell.
fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_templates() {
        assert_eq!(
            sink_command("/usr/bin/scp", "/data/test.txt"),
            "/usr/bin/scp -qt '/data/test.txt'"
        );
        assert_eq!(
            source_command("scp", "/input/it's here.txt"),
            r"scp -f '/input/it'\''s here.txt'"
        );
    }

    #[test]
    fn test_exit_status() {
        assert!(ExitStatus::from_code(0).success());
        assert!(ExitStatus::from_code(0).into_result().is_ok());

        let failed = ExitStatus {
            code: Some(1),
            signal: None,
            stderr: "scp: /data: Permission denied\n".to_string(),
        };
        assert!(!failed.success());
        match failed.into_result() {
            Err(ScpError::RemoteExit { status, stderr }) => {
                assert_eq!(status, "exit status 1");
                assert_eq!(stderr, "scp: /data: Permission denied");
            }
            other => panic!("Expected RemoteExit, got {:?}", other),
        }

        let killed = ExitStatus {
            code: None,
            signal: Some("TERM".to_string()),
            stderr: String::new(),
        };
        assert!(!killed.success());
        assert_eq!(killed.to_string(), "killed by signal TERM");
    }

    #[tokio::test]
    async fn test_exit_waiter_dropped_notifier() {
        let (tx, waiter) = ExitWaiter::channel();
        drop(tx);
        assert!(matches!(waiter.wait().await, Err(ScpError::TaskFailed(_))));
    }
}
