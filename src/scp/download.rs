//! Download orchestrator
//!
//! The remote `scp -f` sender talks first once it sees our ready Ack:
//! an optional Time line, then a Create line, then the body. Each header
//! line must be acknowledged before the sender goes on.

use tokio::io::{AsyncReadExt, AsyncWrite, BufReader};
use tracing::{debug, info, warn};

use super::codec::{
    ack, parse_file_info_line, parse_time_line, read_line, ResponseKind, TAG_CREATE,
    TAG_DIRECTORY, TAG_END_DIRECTORY, TAG_TIME,
};
use super::config::ScpConfig;
use super::deadline::TransferBounds;
use super::error::ScpError;
use super::progress::{copy_exact, ProgressReporter};
use super::transport::{source_command, BoxedReader, BoxedWriter, RemoteProcess, ScpTransport};
use super::types::{FileInfo, TransferDirection, TransferOptions};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownloadState {
    Init,
    StartRemote,
    SendReadyAck,
    ReadHeader,
    SendAck,
    StreamBody,
    SendFinalAck,
    AwaitRemoteExit,
    Done,
    Failed,
}

/// Download `remote_path` into `sink`.
///
/// Exactly the announced number of bytes is written to `sink`. Returns the
/// header metadata, including timestamps when the sender supplied them.
pub async fn download<T, W>(
    transport: &T,
    config: &ScpConfig,
    sink: &mut W,
    remote_path: &str,
    options: TransferOptions,
) -> Result<FileInfo, ScpError>
where
    T: ScpTransport + ?Sized,
    W: AsyncWrite + Unpin + Send + ?Sized,
{
    let bounds = TransferBounds::new(&options, config.timeout());
    bounds.check()?;

    info!("SCP download: {}", remote_path);

    let mut state = DownloadState::Init;
    let outcome = bounds
        .run(receive_file(
            &mut state,
            transport,
            config,
            sink,
            remote_path,
            &options,
        ))
        .await;

    match &outcome {
        Ok(info) => info!(
            "SCP download of {} completed: {} bytes",
            remote_path, info.size
        ),
        Err(e) => {
            warn!(
                "SCP download of {} failed in state {:?}: {}",
                remote_path, state, e
            );
            enter(&mut state, DownloadState::Failed);
        }
    }
    outcome
}

async fn receive_file<T, W>(
    state: &mut DownloadState,
    transport: &T,
    config: &ScpConfig,
    sink: &mut W,
    remote_path: &str,
    options: &TransferOptions,
) -> Result<FileInfo, ScpError>
where
    T: ScpTransport + ?Sized,
    W: AsyncWrite + Unpin + Send + ?Sized,
{
    enter(state, DownloadState::StartRemote);
    let command = source_command(&config.remote_binary, remote_path);
    debug!("Starting remote source: {}", command);
    let RemoteProcess {
        mut stdin,
        stdout,
        exit,
    } = transport.exec(&command).await?;
    let mut stdout = BufReader::new(stdout);

    enter(state, DownloadState::SendReadyAck);
    ack(&mut stdin).await?;

    enter(state, DownloadState::ReadHeader);
    let info = read_header(&mut stdin, &mut stdout).await?;
    debug!(
        "Remote file {} ({} bytes, mode {:04o})",
        info.filename, info.size, info.permissions
    );

    enter(state, DownloadState::SendAck);
    ack(&mut stdin).await?;

    enter(state, DownloadState::StreamBody);
    let mut reporter = ProgressReporter::new(
        options.progress_tx.clone(),
        remote_path,
        TransferDirection::Download,
        info.size,
    );
    copy_exact(&mut stdout, sink, info.size, &mut reporter).await?;

    enter(state, DownloadState::SendFinalAck);
    ack(&mut stdin).await?;

    enter(state, DownloadState::AwaitRemoteExit);
    let status = exit.wait().await?;
    debug!("Remote source exited: {}", status);
    status.into_result()?;

    enter(state, DownloadState::Done);
    Ok(info)
}

/// Read the optional Time line and the Create line.
///
/// The Time line is acknowledged here; the Create line is left for the
/// caller to acknowledge once it is ready for the body.
async fn read_header(
    stdin: &mut BoxedWriter,
    stdout: &mut BufReader<BoxedReader>,
) -> Result<FileInfo, ScpError> {
    let mut info = FileInfo::new();

    loop {
        let tag = stdout.read_u8().await?;
        if ResponseKind::from_status(tag) == Some(ResponseKind::Ok) {
            return Err(ScpError::ProtocolViolation(
                "unexpected Ok status while waiting for a file header".into(),
            ));
        }

        let line = read_line(stdout).await?;
        let text = String::from_utf8_lossy(&line);
        debug!("<- {:?}{:?}", tag as char, text);

        if ResponseKind::from_status(tag).is_some() {
            return Err(ScpError::RemoteFailure(text.into_owned()));
        }

        match tag {
            TAG_TIME => {
                let (atime, mtime) = parse_time_line(&text)?;
                info.update(&FileInfo {
                    atime: Some(atime),
                    mtime: Some(mtime),
                    ..FileInfo::default()
                });
                ack(stdin).await?;
            }
            TAG_CREATE => {
                let (permissions, size, filename) = parse_file_info_line(&text)?;
                info.update(&FileInfo {
                    permissions,
                    size,
                    filename,
                    ..FileInfo::default()
                });
                return Ok(info);
            }
            TAG_DIRECTORY | TAG_END_DIRECTORY => {
                return Err(ScpError::ProtocolViolation(format!(
                    "directory transfers are not supported (got {:?} line)",
                    tag as char
                )));
            }
            other => {
                return Err(ScpError::ProtocolViolation(format!(
                    "unexpected header tag 0x{:02x}",
                    other
                )));
            }
        }
    }
}

fn enter(state: &mut DownloadState, next: DownloadState) {
    debug!("Download state {:?} -> {:?}", state, next);
    *state = next;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scp::codec::encode_time;
    use crate::scp::mock::MockTransport;
    use crate::scp::transport::ExitStatus;
    use std::time::Duration;
    use tokio::time::Instant;
    use tokio_util::sync::CancellationToken;

    #[tokio::test]
    async fn test_download_with_times() {
        let transport = MockTransport::new(|mut remote| async move {
            remote.expect_ack().await;
            remote.send(&encode_time(1610000000, 1610000001)).await;
            remote.expect_ack().await;
            remote.send(b"C0644 5 hello\n").await;
            remote.expect_ack().await;
            remote.send(b"hello\0").await;
            remote.expect_ack().await;
            remote.exit(ExitStatus::from_code(0));
        });

        let mut sink = Vec::new();
        let info = download(
            &transport,
            &ScpConfig::default(),
            &mut sink,
            "/input/hello",
            TransferOptions::new(),
        )
        .await
        .unwrap();
        transport.join_remote().await;

        assert_eq!(sink, b"hello");
        assert_eq!(info.filename, "hello");
        assert_eq!(info.permissions, 0o644);
        assert_eq!(info.size, 5);
        assert_eq!(info.mtime, Some(1610000000));
        assert_eq!(info.atime, Some(1610000001));
        assert_eq!(
            transport.executed(),
            vec!["/usr/bin/scp -f '/input/hello'".to_string()]
        );
    }

    #[tokio::test]
    async fn test_download_without_times() {
        let transport = MockTransport::new(|mut remote| async move {
            remote.expect_ack().await;
            remote.send(b"C0600 3 my file.txt\n").await;
            remote.expect_ack().await;
            remote.send(b"abc\0").await;
            remote.expect_ack().await;
            remote.exit(ExitStatus::from_code(0));
        });

        let mut sink = Vec::new();
        let info = download(
            &transport,
            &ScpConfig::default(),
            &mut sink,
            "/input/my file.txt",
            TransferOptions::new(),
        )
        .await
        .unwrap();

        assert_eq!(sink, b"abc");
        assert_eq!(info.filename, "my file.txt");
        assert_eq!(info.mtime, None);
    }

    #[tokio::test]
    async fn test_missing_file_reports_remote_message() {
        let transport = MockTransport::new(|mut remote| async move {
            remote.expect_ack().await;
            remote
                .send(b"\x01scp: /input/nope: No such file or directory\n")
                .await;
            remote.exit(ExitStatus::from_code(1));
        });

        let mut sink = Vec::new();
        let err = download(
            &transport,
            &ScpConfig::default(),
            &mut sink,
            "/input/nope",
            TransferOptions::new(),
        )
        .await
        .unwrap_err();

        assert_eq!(
            err.to_string(),
            "scp: /input/nope: No such file or directory\n"
        );
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn test_directory_is_rejected() {
        let transport = MockTransport::new(|mut remote| async move {
            remote.expect_ack().await;
            remote.send(b"D0755 0 dir\n").await;
            remote.exit(ExitStatus::from_code(1));
        });

        let mut sink = Vec::new();
        let err = download(
            &transport,
            &ScpConfig::default(),
            &mut sink,
            "/input/dir",
            TransferOptions::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ScpError::ProtocolViolation(_)), "{:?}", err);
    }

    #[tokio::test]
    async fn test_failed_exit_is_authoritative() {
        let transport = MockTransport::new(|mut remote| async move {
            remote.expect_ack().await;
            remote.send(b"C0644 2 ok\n").await;
            remote.expect_ack().await;
            remote.send(b"ok\0").await;
            remote.expect_ack().await;
            remote.exit(ExitStatus::from_code(1));
        });

        let mut sink = Vec::new();
        let err = download(
            &transport,
            &ScpConfig::default(),
            &mut sink,
            "/input/ok",
            TransferOptions::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ScpError::RemoteExit { .. }), "{:?}", err);
    }

    #[tokio::test]
    async fn test_truncated_body() {
        let transport = MockTransport::new(|mut remote| async move {
            remote.expect_ack().await;
            remote.send(b"C0644 10 big\n").await;
            remote.expect_ack().await;
            remote.send(b"abc").await;
            remote.exit(ExitStatus::from_code(1));
        });

        let mut sink = Vec::new();
        let err = download(
            &transport,
            &ScpConfig::default(),
            &mut sink,
            "/input/big",
            TransferOptions::new(),
        )
        .await
        .unwrap_err();

        match err {
            ScpError::StreamIo(e) => assert_eq!(e.kind(), std::io::ErrorKind::UnexpectedEof),
            other => panic!("Expected StreamIo, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cancel_interrupts_body_copy() {
        let transport = MockTransport::new(|mut remote| async move {
            remote.expect_ack().await;
            remote.send(b"C0644 1000 slow\n").await;
            remote.expect_ack().await;
            remote.send(b"partial").await;
            std::future::pending::<()>().await;
        });
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let mut sink = Vec::new();
        let err = download(
            &transport,
            &ScpConfig::default(),
            &mut sink,
            "/input/slow",
            TransferOptions::new().with_cancel(token),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ScpError::Cancelled));
    }

    #[tokio::test]
    async fn test_expired_deadline_skips_exec() {
        let transport = MockTransport::new(|_remote| async {});
        let mut sink = Vec::new();

        let err = download(
            &transport,
            &ScpConfig::default(),
            &mut sink,
            "/input/x",
            TransferOptions::new().with_deadline(Instant::now()),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ScpError::DeadlineExceeded(_)));
        assert!(transport.executed().is_empty());
    }
}
