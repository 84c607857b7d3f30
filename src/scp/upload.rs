//! Upload orchestrator
//!
//! Two tasks share one remote `scp -t` invocation:
//!
//! - the data-plane speaks the protocol over the command's stdin/stdout
//! - the control-plane waits for the command to exit
//!
//! The first error from either task is the result of the upload. The
//! remote exit status is authoritative: a clean exchange followed by a
//! failed exit is still a failed upload.

use tokio::io::{AsyncRead, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::codec::{ack, encode_command, parse_response};
use super::config::ScpConfig;
use super::deadline::TransferBounds;
use super::error::ScpError;
use super::progress::{copy_exact, ProgressReporter};
use super::transport::{sink_command, BoxedReader, BoxedWriter, RemoteProcess, ScpTransport};
use super::types::{TransferDirection, TransferOptions};

/// Number of tasks in the upload group, and the error channel capacity
const UPLOAD_TASKS: usize = 2;

/// Data-plane progress through one upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    Init,
    SendHeader,
    AwaitAck1,
    StreamBody,
    SendTerminator,
    AwaitAck2,
    Done,
    Failed,
}

/// Upload `size` bytes from `source` to `remote_path`.
///
/// The remote file is created with `permissions` (at most `0o777`). The
/// source must yield at least `size` bytes; anything past that is left
/// unread.
pub async fn upload<T, R>(
    transport: &T,
    config: &ScpConfig,
    source: R,
    remote_path: &str,
    permissions: u32,
    size: u64,
    options: TransferOptions,
) -> Result<(), ScpError>
where
    T: ScpTransport + ?Sized,
    R: AsyncRead + Unpin + Send + 'static,
{
    let filename = remote_file_name(remote_path)?;
    let header = encode_command(permissions, size, filename)?;

    let bounds = TransferBounds::new(&options, config.timeout());
    bounds.check()?;

    info!(
        "SCP upload: {} bytes to {} (mode {:04o})",
        size, remote_path, permissions
    );

    let command = sink_command(&config.remote_binary, remote_path);
    debug!("Starting remote sink: {}", command);
    let RemoteProcess {
        stdin,
        stdout,
        exit,
    } = bounds.run(transport.exec(&command)).await?;

    let token = bounds.token().child_token();
    let (err_tx, mut err_rx) = mpsc::channel::<ScpError>(UPLOAD_TASKS);
    let mut tasks = JoinSet::new();

    let reporter = ProgressReporter::new(
        options.progress_tx.clone(),
        remote_path,
        TransferDirection::Upload,
        size,
    );

    // Data-plane
    {
        let token = token.clone();
        let err_tx = err_tx.clone();
        tasks.spawn(async move {
            let result = tokio::select! {
                _ = token.cancelled() => return,
                res = send_file(stdin, stdout, source, header, size, reporter) => res,
            };
            if let Err(e) = result {
                let _ = err_tx.try_send(e);
            }
        });
    }

    // Control-plane
    {
        let token = token.clone();
        let err_tx = err_tx.clone();
        tasks.spawn(async move {
            let result = tokio::select! {
                _ = token.cancelled() => return,
                res = exit.wait() => res.and_then(|status| {
                    debug!("Remote sink exited: {}", status);
                    status.into_result()
                }),
            };
            if let Err(e) = result {
                let _ = err_tx.try_send(e);
            }
        });
    }
    drop(err_tx);

    let outcome = bounds.run(join_tasks(&mut tasks, &mut err_rx)).await;

    token.cancel();
    tasks.shutdown().await;

    match &outcome {
        Ok(()) => info!("SCP upload to {} completed", remote_path),
        Err(e) => warn!("SCP upload to {} failed: {}", remote_path, e),
    }
    outcome
}

/// Wait for the group, returning the first reported error.
async fn join_tasks(
    tasks: &mut JoinSet<()>,
    err_rx: &mut mpsc::Receiver<ScpError>,
) -> Result<(), ScpError> {
    loop {
        tokio::select! {
            biased;
            Some(err) = err_rx.recv() => return Err(err),
            joined = tasks.join_next() => match joined {
                Some(Ok(())) => {}
                Some(Err(e)) => return Err(ScpError::TaskFailed(e.to_string())),
                None => break,
            },
        }
    }

    // Every task has finished; an error may still be queued.
    match err_rx.try_recv() {
        Ok(err) => Err(err),
        Err(_) => Ok(()),
    }
}

async fn send_file<R>(
    mut stdin: BoxedWriter,
    stdout: BoxedReader,
    mut source: R,
    header: Vec<u8>,
    size: u64,
    mut reporter: ProgressReporter,
) -> Result<(), ScpError>
where
    R: AsyncRead + Unpin,
{
    let mut stdout = BufReader::new(stdout);
    let mut state = UploadState::Init;

    let result = exchange(
        &mut state,
        &mut stdin,
        &mut stdout,
        &mut source,
        &header,
        size,
        &mut reporter,
    )
    .await;

    if let Err(e) = &result {
        debug!("Upload failed in state {:?}: {}", state, e);
        enter(&mut state, UploadState::Failed);
    }

    if let Err(e) = stdin.shutdown().await {
        debug!("Closing remote stdin: {}", e);
    }
    result
}

async fn exchange<R>(
    state: &mut UploadState,
    stdin: &mut BoxedWriter,
    stdout: &mut BufReader<BoxedReader>,
    source: &mut R,
    header: &[u8],
    size: u64,
    reporter: &mut ProgressReporter,
) -> Result<(), ScpError>
where
    R: AsyncRead + Unpin,
{
    enter(state, UploadState::SendHeader);
    debug!("-> {:?}", String::from_utf8_lossy(header));
    stdin.write_all(header).await?;
    stdin.flush().await?;

    enter(state, UploadState::AwaitAck1);
    parse_response(stdout).await?.into_result()?;

    enter(state, UploadState::StreamBody);
    copy_exact(source, stdin, size, reporter).await?;

    enter(state, UploadState::SendTerminator);
    ack(stdin).await?;

    enter(state, UploadState::AwaitAck2);
    parse_response(stdout).await?.into_result()?;

    enter(state, UploadState::Done);
    Ok(())
}

fn enter(state: &mut UploadState, next: UploadState) {
    debug!("Upload state {:?} -> {:?}", state, next);
    *state = next;
}

/// Last component of a remote path; it names the file in the Create line.
fn remote_file_name(remote_path: &str) -> Result<&str, ScpError> {
    match remote_path.rsplit('/').next() {
        Some(name) if !name.is_empty() => Ok(name),
        _ => Err(ScpError::InvalidCommand(format!(
            "remote path {:?} has no file name",
            remote_path
        ))),
    }
}
