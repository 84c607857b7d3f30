//! SCP client facade

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tracing::{debug, info};

use super::config::ScpConfig;
use super::download::download;
use super::error::ScpError;
use super::transport::ScpTransport;
use super::types::{FileInfo, TransferOptions};
use super::upload::upload;
use crate::ssh::{SshClient, SshConfig, SshError, SshTransport};

/// Runs single-file transfers over one transport.
///
/// A client built with [`ScpClient::new`] borrows the caller's connection
/// and leaves it open on [`ScpClient::close`]; one built with
/// [`ScpClient::connect`] owns its SSH session and closes it.
pub struct ScpClient<T: ScpTransport> {
    transport: Arc<T>,
    config: ScpConfig,
    owns_transport: bool,
    closed: AtomicBool,
}

impl<T: ScpTransport> ScpClient<T> {
    pub fn new(transport: Arc<T>, config: ScpConfig) -> Self {
        Self {
            transport,
            config,
            owns_transport: false,
            closed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &ScpConfig {
        &self.config
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    /// Upload exactly `size` bytes from `source` to `remote_path`.
    pub async fn copy<R>(
        &self,
        source: R,
        remote_path: &str,
        permissions: u32,
        size: u64,
        options: TransferOptions,
    ) -> Result<(), ScpError>
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        self.ensure_open()?;
        upload(
            self.transport.as_ref(),
            &self.config,
            source,
            remote_path,
            permissions,
            size,
            options,
        )
        .await
    }

    /// Upload everything `source` yields.
    ///
    /// The size must be announced before the body, so the source is read to
    /// the end in memory first.
    pub async fn copy_from_reader<R>(
        &self,
        mut source: R,
        remote_path: &str,
        permissions: u32,
        options: TransferOptions,
    ) -> Result<(), ScpError>
    where
        R: AsyncRead + Unpin,
    {
        self.ensure_open()?;
        let mut contents = Vec::new();
        source.read_to_end(&mut contents).await?;
        let size = contents.len() as u64;
        debug!("Buffered {} bytes for {}", size, remote_path);

        self.copy(Cursor::new(contents), remote_path, permissions, size, options)
            .await
    }

    /// Download `remote_path` into `sink`.
    pub async fn copy_from_remote<W>(
        &self,
        sink: &mut W,
        remote_path: &str,
        options: TransferOptions,
    ) -> Result<FileInfo, ScpError>
    where
        W: AsyncWrite + Unpin + Send + ?Sized,
    {
        self.ensure_open()?;
        download(
            self.transport.as_ref(),
            &self.config,
            sink,
            remote_path,
            options,
        )
        .await
    }

    /// Release the client. Closes the connection only if this client opened it.
    ///
    /// Calling it more than once is a no-op.
    pub async fn close(&self) -> Result<(), ScpError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if self.owns_transport {
            self.transport.close().await?;
        }
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), ScpError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SshError::Disconnected.into());
        }
        Ok(())
    }
}

impl ScpClient<SshTransport> {
    /// Open an SSH session and wrap it in a client that owns it.
    pub async fn connect(ssh_config: SshConfig, scp_config: ScpConfig) -> Result<Self, ScpError> {
        let host = format!("{}@{}:{}", ssh_config.username, ssh_config.host, ssh_config.port);
        let transport = SshClient::new(ssh_config).connect().await?;
        info!("SCP client ready on {}", host);

        let mut client = Self::new(Arc::new(transport), scp_config);
        client.owns_transport = true;
        Ok(client)
    }
}
