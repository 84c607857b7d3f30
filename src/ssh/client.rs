//! SSH Client implementation using russh

use std::net::ToSocketAddrs;
use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use russh::client;
use russh::keys::key::PrivateKeyWithHashAlg;
use russh::keys::{PublicKey, PublicKeyBase64};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::agent::authenticate_with_agent;
use super::config::{AuthMethod, HostKeyPolicy, SshConfig};
use super::error::SshError;
use super::transport::SshTransport;

/// Connects and authenticates an SSH session for SCP use
pub struct SshClient {
    config: SshConfig,
}

impl SshClient {
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }

    /// Connect to the SSH server and return a transport able to run `scp`
    pub async fn connect(self) -> Result<SshTransport, SshError> {
        let addr = format!("{}:{}", self.config.host, self.config.port);

        info!("Connecting to SSH server at {}", addr);

        let socket_addr = addr
            .to_socket_addrs()
            .map_err(|e| SshError::ConnectionFailed(format!("Failed to resolve address: {}", e)))?
            .next()
            .ok_or_else(|| SshError::ConnectionFailed("No address found".to_string()))?;

        let ssh_config = client::Config {
            inactivity_timeout: None,
            keepalive_interval: Some(Duration::from_secs(30)),
            keepalive_max: 3,
            ..Default::default()
        };

        let handler = ClientHandler::new(
            self.config.host.clone(),
            self.config.port,
            self.config.host_key.clone(),
        );

        let mut handle = tokio::time::timeout(
            Duration::from_secs(self.config.timeout_secs),
            client::connect(Arc::new(ssh_config), socket_addr, handler),
        )
        .await
        .map_err(|_| SshError::Timeout("Connection timed out".to_string()))??;

        debug!("SSH handshake completed");

        let authenticated = match &self.config.auth {
            AuthMethod::Password { password } => handle
                .authenticate_password(&self.config.username, password)
                .await
                .map_err(|e| SshError::AuthenticationFailed(e.to_string()))?
                .success(),
            AuthMethod::Key {
                key_path,
                passphrase,
            } => {
                let key = russh::keys::load_secret_key(key_path, passphrase.as_deref())
                    .map_err(|e| SshError::KeyError(e.to_string()))?;
                let key_with_hash = PrivateKeyWithHashAlg::new(Arc::new(key), None);

                handle
                    .authenticate_publickey(&self.config.username, key_with_hash)
                    .await
                    .map_err(|e| SshError::AuthenticationFailed(e.to_string()))?
                    .success()
            }
            AuthMethod::Agent => {
                authenticate_with_agent(&mut handle, &self.config.username).await?;
                true
            }
        };

        if !authenticated {
            return Err(SshError::AuthenticationFailed(
                "Authentication rejected by server".to_string(),
            ));
        }

        info!("SSH authentication successful");

        Ok(SshTransport::new(handle))
    }
}

/// OpenSSH-style `SHA256:<base64>` fingerprint of a public key
pub fn fingerprint(key: &PublicKey) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.public_key_bytes());
    format!("SHA256:{}", BASE64.encode(hasher.finalize()).trim_end_matches('='))
}

/// Client handler for russh callbacks
pub struct ClientHandler {
    host: String,
    port: u16,
    policy: HostKeyPolicy,
}

impl ClientHandler {
    pub fn new(host: String, port: u16, policy: HostKeyPolicy) -> Self {
        Self { host, port, policy }
    }

    fn verify(&self, actual: String) -> Result<bool, SshError> {
        match &self.policy {
            HostKeyPolicy::AcceptAny => {
                debug!(
                    "Accepting host key for {}:{} ({})",
                    self.host, self.port, actual
                );
                Ok(true)
            }
            HostKeyPolicy::Fingerprint(expected) if *expected == actual => {
                info!("Host key verified for {}:{}", self.host, self.port);
                Ok(true)
            }
            HostKeyPolicy::Fingerprint(expected) => {
                warn!(
                    "Host key mismatch for {}:{}! Expected {}, got {}",
                    self.host, self.port, expected, actual
                );
                Err(SshError::HostKeyMismatch {
                    host: format!("{}:{}", self.host, self.port),
                    expected: expected.clone(),
                    actual,
                })
            }
        }
    }
}

impl client::Handler for ClientHandler {
    type Error = SshError;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        self.verify(fingerprint(server_public_key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn handler(policy: HostKeyPolicy) -> ClientHandler {
        ClientHandler::new("files.example.com".into(), 22, policy)
    }

    #[test]
    fn test_accept_any_policy() {
        assert!(handler(HostKeyPolicy::AcceptAny)
            .verify("SHA256:whatever".into())
            .unwrap());
    }

    #[test]
    fn test_fingerprint_policy() {
        let pinned = handler(HostKeyPolicy::Fingerprint("SHA256:good".into()));
        assert!(pinned.verify("SHA256:good".into()).unwrap());

        match pinned.verify("SHA256:evil".into()) {
            Err(SshError::HostKeyMismatch {
                host,
                expected,
                actual,
            }) => {
                assert_eq!(host, "files.example.com:22");
                assert_eq!(expected, "SHA256:good");
                assert_eq!(actual, "SHA256:evil");
            }
            other => panic!("Expected HostKeyMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_fingerprint_format() {
        let key = PublicKey::from_openssh(
            "ssh-ed25519 AAAAC3NzaC1lZDI1NTE5AAAAIHq7+A4A8h2ShgKbL0hZm2x3NSVO1dQkkqfAL0RRr6V3",
        )
        .unwrap();
        let fp = fingerprint(&key);
        assert!(fp.starts_with("SHA256:"));
        assert!(!fp.ends_with('='));
        assert_eq!(fp.len(), "SHA256:".len() + 43);
    }

    #[test]
    fn test_fingerprint_hashes_wire_key_blob() {
        let blob_b64 = "AAAAC3NzaC1lZDI1NTE5AAAAIHq7+A4A8h2ShgKbL0hZm2x3NSVO1dQkkqfAL0RRr6V3";
        let key = PublicKey::from_openssh(&format!("ssh-ed25519 {}", blob_b64)).unwrap();

        let blob = BASE64.decode(blob_b64).unwrap();
        assert_eq!(key.public_key_bytes(), blob);

        let expected = format!(
            "SHA256:{}",
            BASE64.encode(Sha256::digest(&blob)).trim_end_matches('=')
        );
        assert_eq!(fingerprint(&key), expected);
    }
}
