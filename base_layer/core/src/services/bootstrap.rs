// Copyright 2024. The Keymaster Project
//
// Redistribution and use in source and binary forms, with or without modification, are permitted provided that the
// following conditions are met:
//
// 1. Redistributions of source code must retain the above copyright notice, this list of conditions and the following
// disclaimer.
//
// 2. Redistributions in binary form must reproduce the above copyright notice, this list of conditions and the
// following disclaimer in the documentation and/or other materials provided with the distribution.
//
// 3. Neither the name of the copyright holder nor the names of its contributors may be used to endorse or promote
// products derived from this software without specific prior written permission.
//
// THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS "AS IS" AND ANY EXPRESS OR IMPLIED WARRANTIES,
// INCLUDING, BUT NOT LIMITED TO, THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR PURPOSE ARE
// DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT HOLDER OR CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL,
// SPECIAL, EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR
// SERVICES; LOSS OF USE, DATA, OR PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY THEORY OF LIABILITY,
// WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE
// USE OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.

use chrono::{Duration as ChronoDuration, Utc};
use log::*;
use rand::{rngs::OsRng, RngCore};
use thiserror::Error;

use crate::{
    authorized_keys::{generate_for_account, render_authorized_keys, GeneratorError},
    consts::BOOTSTRAP_SESSION_TTL,
    remote::{
        connect_with_fallback,
        deploy_authorized_keys,
        parse_host_port,
        verify_or_trust_host_key,
        ConnectionError,
        RemoteConnector,
        RemoteError,
        RemoteSession,
    },
    services::keygen::{generate_ed25519_keypair, GeneratedKeypair},
    storage::{KeyStoreBackend, KeyStoreDatabase, KeyStoreError, NewAccount},
    types::{Account, BootstrapSession, BootstrapStatus, PublicKey, Secret},
};

const LOG_TARGET: &str = "keymaster::services::bootstrap";

const EPHEMERAL_KEY_COMMENT: &str = "keymaster-bootstrap";

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("Bootstrap session {0} does not exist")]
    SessionNotFound(String),
    #[error("Bootstrap session {0} has expired")]
    SessionExpired(String),
    #[error("Bootstrap session {id} is {status}, not active")]
    SessionNotActive { id: String, status: BootstrapStatus },
    #[error("Generator error: {0}")]
    GeneratorError(#[from] GeneratorError),
    #[error("Connection error: {0}")]
    ConnectionError(#[from] ConnectionError),
    #[error("Key store error: {0}")]
    KeyStoreError(#[from] KeyStoreError),
    #[error("Remote error: {0}")]
    RemoteError(#[from] RemoteError),
}

/// A started bootstrap: the persisted session, the command the operator runs on the target host,
/// and the ephemeral private key that must stay in memory until commit.
#[derive(Debug)]
pub struct PendingBootstrap {
    pub session: BootstrapSession,
    pub install_command: String,
    pub ephemeral_private_key: Secret,
}

/// Counters from one sweep run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub marked_orphaned: usize,
    pub purged: usize,
}

/// Establishes the system key on hosts Keymaster has no credentials for yet, through a
/// short-lived ephemeral keypair the operator installs by hand.
pub struct BootstrapService<TBackend, TConnector> {
    db: KeyStoreDatabase<TBackend>,
    connector: TConnector,
}

impl<TBackend, TConnector> BootstrapService<TBackend, TConnector>
where
    TBackend: KeyStoreBackend + 'static,
    TConnector: RemoteConnector,
{
    pub fn new(db: KeyStoreDatabase<TBackend>, connector: TConnector) -> Self {
        Self { db, connector }
    }

    /// Create the ephemeral keypair and persist a new session. The returned install command
    /// appends the ephemeral public key on the target host.
    pub fn begin(
        &self,
        username: &str,
        hostname: &str,
        label: &str,
        tags: &str,
    ) -> Result<PendingBootstrap, BootstrapError> {
        let GeneratedKeypair {
            private_key_pem,
            public_key_line,
        } = generate_ed25519_keypair(EPHEMERAL_KEY_COMMENT);

        let mut id_bytes = [0u8; 16];
        OsRng.fill_bytes(&mut id_bytes);
        let now = Utc::now().naive_utc();
        let ttl = ChronoDuration::from_std(BOOTSTRAP_SESSION_TTL).expect("TTL fits");
        let session = BootstrapSession {
            id: hex::encode(id_bytes),
            username: username.to_string(),
            hostname: hostname.to_string(),
            label: label.to_string(),
            tags: tags.to_string(),
            temp_public_key: public_key_line.clone(),
            created_at: now,
            expires_at: now + ttl,
            status: BootstrapStatus::Active,
        };
        self.db.save_bootstrap_session(&session)?;
        info!(
            target: LOG_TARGET,
            "Started bootstrap session {} for {}", session.id, session.address()
        );

        let install_command = format!(
            "mkdir -p ~/.ssh && chmod 700 ~/.ssh && echo '{}' >> ~/.ssh/authorized_keys && chmod 600 \
             ~/.ssh/authorized_keys",
            public_key_line
        );
        Ok(PendingBootstrap {
            session,
            install_command,
            ephemeral_private_key: private_key_pem,
        })
    }

    /// Commit a bootstrap once the operator confirms the ephemeral key is installed: connect
    /// with it, deploy the managed content, register the account and delete the session. The
    /// ephemeral key is zeroed whatever the outcome.
    pub fn commit(&self, pending: &mut PendingBootstrap) -> Result<Account, BootstrapError> {
        let result = self.try_commit(pending);
        pending.ephemeral_private_key.zero();
        result
    }

    fn try_commit(&self, pending: &mut PendingBootstrap) -> Result<Account, BootstrapError> {
        let id = pending.session.id.clone();
        let session = self
            .db
            .get_bootstrap_session(&id)?
            .ok_or_else(|| BootstrapError::SessionNotFound(id.clone()))?;
        if session.status != BootstrapStatus::Active {
            return Err(BootstrapError::SessionNotActive {
                id,
                status: session.status,
            });
        }
        if session.is_expired(Utc::now().naive_utc()) {
            self.db.set_bootstrap_status(&id, BootstrapStatus::Orphaned)?;
            return Err(BootstrapError::SessionExpired(id));
        }

        self.db.set_bootstrap_status(&id, BootstrapStatus::Committing)?;
        match bootstrap_deployment(
            &self.db,
            &self.connector,
            &session.username,
            &session.hostname,
            &session.label,
            &session.tags,
            &pending.ephemeral_private_key,
        ) {
            Ok(account) => {
                self.db.set_bootstrap_status(&id, BootstrapStatus::Completed)?;
                self.db.delete_bootstrap_session(&id)?;
                info!(
                    target: LOG_TARGET,
                    "Bootstrap session {} completed for {}", id, account.address()
                );
                Ok(account)
            },
            Err(e) => {
                // the session stays behind for diagnosis; the sweeper collects it later
                let _ = self.db.set_bootstrap_status(&id, BootstrapStatus::Failed);
                warn!(target: LOG_TARGET, "Bootstrap session {} failed: {}", id, e);
                Err(e)
            },
        }
    }

    /// Mark a pending session as failed without attempting the deployment
    pub fn abort(&self, pending: &mut PendingBootstrap) -> Result<(), BootstrapError> {
        pending.ephemeral_private_key.zero();
        self.db
            .set_bootstrap_status(&pending.session.id, BootstrapStatus::Failed)?;
        Ok(())
    }

    /// Collect leftover sessions: previously orphaned or failed sessions are purged, and active
    /// sessions past their TTL are marked orphaned for the next run. Safe to run repeatedly.
    pub fn sweep(&self) -> Result<SweepReport, BootstrapError> {
        let mut report = SweepReport::default();
        for session in self.db.list_orphaned_bootstrap_sessions()? {
            self.db.delete_bootstrap_session(&session.id)?;
            report.purged += 1;
        }
        for session in self.db.list_expired_bootstrap_sessions(Utc::now().naive_utc())? {
            self.db.set_bootstrap_status(&session.id, BootstrapStatus::Orphaned)?;
            report.marked_orphaned += 1;
        }
        if report.marked_orphaned > 0 || report.purged > 0 {
            debug!(
                target: LOG_TARGET,
                "Bootstrap sweep marked {} session(s) orphaned, purged {}",
                report.marked_orphaned,
                report.purged
            );
        }
        Ok(report)
    }
}

/// The shared bootstrap deployment path, also used when accepting a transfer package: connect
/// with an ephemeral credential, trust the host on first use, install the managed content and
/// register the account at the active serial.
pub fn bootstrap_deployment<TBackend, TConnector>(
    db: &KeyStoreDatabase<TBackend>,
    connector: &TConnector,
    username: &str,
    hostname: &str,
    label: &str,
    tags: &str,
    ephemeral_private_key: &Secret,
) -> Result<Account, BootstrapError>
where
    TBackend: KeyStoreBackend + 'static,
    TConnector: RemoteConnector,
{
    let active = db
        .get_active_system_key()?
        .ok_or(GeneratorError::NoActiveSystemKey)?;

    let existing = db.get_account_by_address(username, hostname)?;
    let content = match existing.as_ref() {
        Some(account) => generate_for_account(db, account.id, active.serial)?.content,
        // no account row yet, so the desired content is the system key plus the global keys
        None => render_authorized_keys(
            Some((active.public_key.as_str(), active.serial)),
            &effective_global_keys(db)?,
        ),
    };

    let target = parse_host_port(hostname)?;
    let mut session = connect_with_fallback(
        connector,
        username,
        &target.host,
        target.port_or_default(),
        Some(ephemeral_private_key),
    )?;
    if let Err(e) = verify_or_trust_host_key(db, &session, &target.host, target.port_or_default()) {
        let _ = session.close();
        return Err(e.into());
    }
    let deploy_result = deploy_authorized_keys(&mut session, &content);
    let _ = session.close();
    deploy_result?;

    let account = match existing {
        Some(account) => account,
        None => db.add_account(NewAccount {
            username: username.to_string(),
            hostname: hostname.to_string(),
            label: label.to_string(),
            tags: tags.to_string(),
        })?,
    };
    let account = db.update_account_serial(account.id, active.serial)?;
    db.set_account_dirty(account.id, false)?;
    Ok(account)
}

fn effective_global_keys<TBackend: KeyStoreBackend + 'static>(
    db: &KeyStoreDatabase<TBackend>,
) -> Result<Vec<PublicKey>, KeyStoreError> {
    let now = Utc::now().naive_utc();
    let mut keys: Vec<PublicKey> = db
        .list_global_keys()?
        .into_iter()
        .filter(|k| !k.is_expired(now))
        .collect();
    keys.sort_by(|a, b| a.comment.cmp(&b.comment));
    Ok(keys)
}
