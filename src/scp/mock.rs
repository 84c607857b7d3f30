//! In-memory stand-in for a remote `scp`, used by unit tests

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader, DuplexStream};
use tokio::task::JoinHandle;

use super::codec::read_line;
use super::error::ScpError;
use super::transport::{ExitNotifier, ExitStatus, ExitWaiter, RemoteProcess, ScpTransport};

type Script = Box<dyn FnOnce(RemoteEnd) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send>;

/// The remote side of one `exec`
pub struct RemoteEnd {
    /// What the client wrote to the command's stdin
    pub input: BufReader<DuplexStream>,
    /// Becomes the command's stdout
    pub output: DuplexStream,
    exit: Option<ExitNotifier>,
}

impl RemoteEnd {
    pub async fn line(&mut self) -> Vec<u8> {
        read_line(&mut self.input).await.unwrap()
    }

    pub async fn bytes(&mut self, n: usize) -> Vec<u8> {
        let mut buf = vec![0u8; n];
        self.input.read_exact(&mut buf).await.unwrap();
        buf
    }

    pub async fn expect_ack(&mut self) {
        assert_eq!(self.bytes(1).await, b"\0");
    }

    pub async fn send(&mut self, bytes: &[u8]) {
        self.output.write_all(bytes).await.unwrap();
        self.output.flush().await.unwrap();
    }

    pub fn exit(&mut self, status: ExitStatus) {
        if let Some(tx) = self.exit.take() {
            let _ = tx.send(Ok(status));
        }
    }
}

/// Transport whose single `exec` runs a scripted remote
pub struct MockTransport {
    script: Mutex<Option<Script>>,
    remote: Mutex<Option<JoinHandle<()>>>,
    pub commands: Mutex<Vec<String>>,
    pub closed: AtomicUsize,
}

impl MockTransport {
    pub fn new<F, Fut>(script: F) -> Self
    where
        F: FnOnce(RemoteEnd) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let script: Script = Box::new(move |end| -> Pin<Box<dyn Future<Output = ()> + Send>> {
            Box::pin(script(end))
        });
        Self {
            script: Mutex::new(Some(script)),
            remote: Mutex::new(None),
            commands: Mutex::new(Vec::new()),
            closed: AtomicUsize::new(0),
        }
    }

    /// Wait for the script to finish, re-raising any assertion it failed.
    pub async fn join_remote(&self) {
        let handle = self.remote.lock().unwrap().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                if e.is_panic() {
                    std::panic::resume_unwind(e.into_panic());
                }
            }
        }
    }

    pub fn executed(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn close_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScpTransport for MockTransport {
    async fn exec(&self, command: &str) -> Result<RemoteProcess, ScpError> {
        self.commands.lock().unwrap().push(command.to_string());
        let script = self
            .script
            .lock()
            .unwrap()
            .take()
            .ok_or_else(|| ScpError::TaskFailed("mock transport already used".into()))?;

        let (client_stdin, remote_stdin) = tokio::io::duplex(64 * 1024);
        let (remote_stdout, client_stdout) = tokio::io::duplex(64 * 1024);
        let (exit_tx, exit) = ExitWaiter::channel();

        let end = RemoteEnd {
            input: BufReader::new(remote_stdin),
            output: remote_stdout,
            exit: Some(exit_tx),
        };
        *self.remote.lock().unwrap() = Some(tokio::spawn(script(end)));

        Ok(RemoteProcess {
            stdin: Box::new(client_stdin),
            stdout: Box::new(client_stdout),
            exit,
        })
    }

    async fn close(&self) -> Result<(), ScpError> {
        self.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
