//! SSH Agent authentication
//!
//! Signing is delegated to the system agent over `SSH_AUTH_SOCK`. Each
//! identity the agent offers is tried in turn until the server accepts one.

use std::future::Future;

use russh::client::Handle;
use russh::keys::agent::client::{AgentClient, AgentStream};
use russh::keys::ssh_key;
use russh::{AgentAuthError, CryptoVec, Signer};
use tracing::{debug, info, warn};

use super::client::ClientHandler;
use super::error::SshError;

type DynAgent = AgentClient<Box<dyn AgentStream + Send + Unpin + 'static>>;

/// Signer that owns its copy of the key, so the signing future is `Send`.
struct AgentSigner<'a> {
    agent: &'a mut DynAgent,
}

impl Signer for AgentSigner<'_> {
    type Error = AgentAuthError;

    fn auth_publickey_sign(
        &mut self,
        key: &ssh_key::PublicKey,
        hash_alg: Option<ssh_key::HashAlg>,
        to_sign: CryptoVec,
    ) -> impl Future<Output = Result<CryptoVec, Self::Error>> + Send {
        let key_owned = key.clone();
        async move {
            self.agent
                .sign_request(&key_owned, hash_alg, to_sign)
                .await
                .map_err(Into::into)
        }
    }
}

#[cfg(unix)]
async fn connect_agent() -> Result<DynAgent, SshError> {
    let agent = AgentClient::connect_env().await.map_err(|e| {
        SshError::AuthenticationFailed(format!(
            "Failed to connect to SSH agent: {}. Is SSH_AUTH_SOCK set?",
            e
        ))
    })?;
    Ok(agent.dynamic())
}

#[cfg(not(unix))]
async fn connect_agent() -> Result<DynAgent, SshError> {
    Err(SshError::AuthenticationFailed(
        "SSH agent is not supported on this platform".to_string(),
    ))
}

/// Authenticate `username` with the first agent key the server accepts.
pub async fn authenticate_with_agent(
    handle: &mut Handle<ClientHandler>,
    username: &str,
) -> Result<(), SshError> {
    let mut agent = connect_agent().await?;

    let keys = agent
        .request_identities()
        .await
        .map_err(|e| SshError::AuthenticationFailed(format!("Failed to list agent keys: {}", e)))?;
    if keys.is_empty() {
        return Err(SshError::AuthenticationFailed(
            "SSH agent has no keys loaded".to_string(),
        ));
    }
    debug!("SSH agent offers {} key(s)", keys.len());

    for key in &keys {
        let result = handle
            .authenticate_publickey_with(
                username,
                key.clone(),
                None,
                &mut AgentSigner { agent: &mut agent },
            )
            .await;

        match result {
            Ok(auth) if auth.success() => {
                info!("SSH agent authentication succeeded ({})", key.comment());
                return Ok(());
            }
            Ok(_) => debug!("Agent key rejected: {}", key.comment()),
            Err(e) => warn!("Agent signing failed for {}: {}", key.comment(), e),
        }
    }

    Err(SshError::AuthenticationFailed(format!(
        "No agent key was accepted (tried {})",
        keys.len()
    )))
}
