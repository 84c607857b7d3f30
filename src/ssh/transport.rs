//! SCP transport over a russh session
//!
//! A single owner task holds the `Handle<ClientHandler>`; the transport talks
//! to it through an mpsc channel. Every `exec` opens a fresh session channel
//! and spawns a pump task that bridges the channel to in-memory pipes:
//!
//! ```text
//!   RemoteProcess.stdin  ──duplex──▶ pump ──channel.data()──▶ remote stdin
//!   RemoteProcess.stdout ◀──duplex── pump ◀──ChannelMsg::Data── remote stdout
//!   RemoteProcess.exit   ◀─oneshot── pump ◀──ExitStatus/ExitSignal
//! ```

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use russh::client::{Handle, Msg};
use russh::{Channel, ChannelMsg, Disconnect};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::client::ClientHandler;
use super::error::SshError;
use crate::scp::error::ScpError;
use crate::scp::transport::{ExitNotifier, ExitStatus, ExitWaiter, RemoteProcess, ScpTransport};

/// Buffer size of each stdin/stdout pipe
const PIPE_CAPACITY: usize = 64 * 1024;

/// Extended data type code for stderr
const SSH_EXTENDED_DATA_STDERR: u32 = 1;

enum HandleCommand {
    OpenSession(oneshot::Sender<Result<Channel<Msg>, SshError>>),
    Disconnect(oneshot::Sender<()>),
}

fn spawn_handle_owner(handle: Handle<ClientHandler>) -> mpsc::Sender<HandleCommand> {
    let (tx, mut rx) = mpsc::channel::<HandleCommand>(16);

    tokio::spawn(async move {
        while let Some(cmd) = rx.recv().await {
            match cmd {
                HandleCommand::OpenSession(reply) => {
                    let result = handle
                        .channel_open_session()
                        .await
                        .map_err(|e| SshError::ChannelError(format!("Failed to open channel: {}", e)));
                    let _ = reply.send(result);
                }
                HandleCommand::Disconnect(reply) => {
                    if let Err(e) = handle
                        .disconnect(Disconnect::ByApplication, "", "en")
                        .await
                    {
                        debug!("Disconnect failed: {}", e);
                    }
                    let _ = reply.send(());
                    break;
                }
            }
        }
        debug!("SSH handle owner task stopped");
    });

    tx
}

/// [`ScpTransport`] backed by an authenticated russh session
pub struct SshTransport {
    cmd_tx: mpsc::Sender<HandleCommand>,
    closed: AtomicBool,
}

impl SshTransport {
    pub fn new(handle: Handle<ClientHandler>) -> Self {
        Self {
            cmd_tx: spawn_handle_owner(handle),
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst) || self.cmd_tx.is_closed()
    }

    async fn open_session_channel(&self) -> Result<Channel<Msg>, SshError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(HandleCommand::OpenSession(reply_tx))
            .await
            .map_err(|_| SshError::Disconnected)?;
        reply_rx.await.map_err(|_| SshError::Disconnected)?
    }
}

#[async_trait]
impl ScpTransport for SshTransport {
    async fn exec(&self, command: &str) -> Result<RemoteProcess, ScpError> {
        if self.is_closed() {
            return Err(SshError::Disconnected.into());
        }

        let channel = self.open_session_channel().await?;
        channel
            .exec(true, command)
            .await
            .map_err(|e| SshError::ChannelError(format!("Exec request failed: {}", e)))?;
        debug!("Remote command started: {}", command);

        let (client_stdin, pump_stdin) = tokio::io::duplex(PIPE_CAPACITY);
        let (pump_stdout, client_stdout) = tokio::io::duplex(PIPE_CAPACITY);
        let (exit_tx, exit) = ExitWaiter::channel();

        tokio::spawn(pump_channel(channel, pump_stdin, pump_stdout, exit_tx));

        Ok(RemoteProcess {
            stdin: Box::new(client_stdin),
            stdout: Box::new(client_stdout),
            exit,
        })
    }

    async fn close(&self) -> Result<(), ScpError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(HandleCommand::Disconnect(reply_tx))
            .await
            .is_ok()
        {
            let _ = reply_rx.await;
        }
        info!("SSH connection closed");
        Ok(())
    }
}

/// Move bytes between the channel and the pipes until the channel closes,
/// then report the exit status.
async fn pump_channel(
    mut channel: Channel<Msg>,
    mut stdin: DuplexStream,
    mut stdout: DuplexStream,
    exit_tx: ExitNotifier,
) {
    let mut buf = vec![0u8; PIPE_CAPACITY];
    let mut stdin_open = true;
    let mut status = ExitStatus::default();
    let mut stderr = Vec::new();
    let mut failure: Option<SshError> = None;

    loop {
        tokio::select! {
            read = stdin.read(&mut buf), if stdin_open => {
                match read {
                    Ok(0) | Err(_) => {
                        stdin_open = false;
                        if let Err(e) = channel.eof().await {
                            debug!("Failed to send EOF: {}", e);
                        }
                    }
                    Ok(n) => {
                        if let Err(e) = channel.data(&buf[..n]).await {
                            warn!("Failed to send data to SSH channel: {}", e);
                            failure = Some(SshError::ChannelError(e.to_string()));
                            break;
                        }
                    }
                }
            }

            msg = channel.wait() => {
                match msg {
                    Some(ChannelMsg::Data { data }) => {
                        if let Err(e) = stdout.write_all(&data).await {
                            debug!("Dropping remote output, reader is gone: {}", e);
                        }
                    }
                    Some(ChannelMsg::ExtendedData { data, ext }) if ext == SSH_EXTENDED_DATA_STDERR => {
                        stderr.extend_from_slice(&data);
                    }
                    Some(ChannelMsg::ExitStatus { exit_status }) => {
                        debug!("Remote command exit status {}", exit_status);
                        status.code = Some(exit_status);
                    }
                    Some(ChannelMsg::ExitSignal { signal_name, .. }) => {
                        debug!("Remote command exit signal {:?}", signal_name);
                        status.signal = Some(format!("{:?}", signal_name));
                    }
                    Some(ChannelMsg::Eof) => {
                        // Exit status usually follows EOF.
                        let _ = stdout.shutdown().await;
                    }
                    Some(ChannelMsg::Close) | None => break,
                    Some(_) => {}
                }
            }
        }
    }

    drop(stdout);
    let _ = channel.close().await;

    let result = match failure {
        Some(e) => Err(ScpError::Ssh(e)),
        None => {
            status.stderr = String::from_utf8_lossy(&stderr).into_owned();
            Ok(status)
        }
    };
    let _ = exit_tx.send(result);
}
