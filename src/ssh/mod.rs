//! SSH connection layer
//!
//! Connects and authenticates with russh and exposes the session as an
//! [`crate::scp::ScpTransport`].

mod agent;
pub mod client;
pub mod config;
pub mod error;
pub mod transport;

pub use client::{fingerprint, ClientHandler, SshClient};
pub use config::{AuthMethod, HostKeyPolicy, SshConfig};
pub use error::SshError;
pub use transport::SshTransport;
