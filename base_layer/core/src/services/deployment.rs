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

use std::time::Duration;

use log::*;
use rand::Rng;
use thiserror::Error;

use crate::{
    authorized_keys::{generate_for_account, GeneratorError},
    consts::{SERIAL_ADVANCE_BACKOFF_MS, SERIAL_ADVANCE_MAX_RETRIES},
    remote::{
        connect_verified,
        deploy_authorized_keys,
        parse_host_port,
        ConnectionError,
        RemoteConnector,
        RemoteError,
        RemoteSession,
    },
    storage::{actions, KeyStoreBackend, KeyStoreDatabase, KeyStoreError},
    types::{Account, SystemKey},
};

const LOG_TARGET: &str = "keymaster::services::deployment";

#[derive(Debug, Error)]
pub enum DeployError {
    #[error("No active system key exists")]
    NoActiveSystemKey,
    #[error("Account {account} records serial {serial} but no such system key exists")]
    InconsistentSerial { account: String, serial: u32 },
    #[error("Generator error: {0}")]
    GeneratorError(#[from] GeneratorError),
    #[error("Connection error: {0}")]
    ConnectionError(#[from] ConnectionError),
    #[error("Key store error: {0}")]
    KeyStoreError(#[from] KeyStoreError),
    #[error("Remote error: {0}")]
    RemoteError(#[from] RemoteError),
}

/// The result of one successful deployment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployOutcome {
    pub account: String,
    /// The serial the account is now at
    pub serial: u32,
    pub content_hash: String,
}

/// Deploys canonical authorized_keys content to managed accounts. Each run owns its own remote
/// session; per-account runs are expected to be serialized by the caller.
pub struct DeploymentService<TBackend, TConnector> {
    db: KeyStoreDatabase<TBackend>,
    connector: TConnector,
}

impl<TBackend, TConnector> DeploymentService<TBackend, TConnector>
where
    TBackend: KeyStoreBackend + 'static,
    TConnector: RemoteConnector,
{
    pub fn new(db: KeyStoreDatabase<TBackend>, connector: TConnector) -> Self {
        Self { db, connector }
    }

    /// Deploy the canonical content for one account and advance its serial on success
    pub fn deploy_account(&self, account: &Account) -> Result<DeployOutcome, DeployError> {
        match self.try_deploy(account) {
            Ok(outcome) => {
                self.db.append_audit(
                    actions::DEPLOY_KEYS,
                    &format!("{} now at serial {}", outcome.account, outcome.serial),
                );
                Ok(outcome)
            },
            Err(e) => {
                self.db.append_audit(
                    actions::DEPLOY_FAILED,
                    &format!("{}: {}", account.address(), e),
                );
                Err(e)
            },
        }
    }

    fn try_deploy(&self, account: &Account) -> Result<DeployOutcome, DeployError> {
        let active = self
            .db
            .get_active_system_key()?
            .ok_or(DeployError::NoActiveSystemKey)?;
        let connect_key = self.connect_key_for(account, &active)?;

        // Forward deploys always install the active system key's content, whichever key the
        // connection itself had to use
        let generated = generate_for_account(&self.db, account.id, active.serial)?;

        let target = parse_host_port(&account.hostname)?;
        let mut session = connect_verified(
            &self.connector,
            &self.db,
            &account.username,
            &target.host,
            target.port_or_default(),
            Some(&connect_key.private_key),
        )?;
        let deploy_result = deploy_authorized_keys(&mut session, &generated.content);
        let _ = session.close();
        deploy_result?;

        debug!(
            target: LOG_TARGET,
            "Deployed serial {} to {}", active.serial, account.address()
        );

        self.advance_serial_with_retry(account.id, active.serial)?;
        self.db.set_account_dirty(account.id, false)?;
        let content_hash = generated.hash();
        if account.key_hash.as_deref() != Some(content_hash.as_str()) {
            self.db.update_account_key_hash(account.id, Some(&content_hash))?;
        }

        Ok(DeployOutcome {
            account: account.address(),
            serial: active.serial,
            content_hash,
        })
    }

    /// The key used for the connection itself: the key last deployed to the account, or the
    /// active key for a first deploy.
    fn connect_key_for(&self, account: &Account, active: &SystemKey) -> Result<SystemKey, DeployError> {
        if account.serial == 0 {
            // a fresh account trusts the active key because bootstrap installed it
            return self
                .db
                .get_system_key_by_serial(active.serial)?
                .ok_or(DeployError::NoActiveSystemKey);
        }
        self.db
            .get_system_key_by_serial(account.serial)?
            .ok_or_else(|| DeployError::InconsistentSerial {
                account: account.address(),
                serial: account.serial,
            })
    }

    /// The post-deploy serial advance races with other writers on a busy store; contention is
    /// retried a bounded number of times with a jittered backoff.
    fn advance_serial_with_retry(&self, account_id: u32, serial: u32) -> Result<(), KeyStoreError> {
        let mut attempt = 0;
        loop {
            match self.db.update_account_serial(account_id, serial) {
                Ok(_) => return Ok(()),
                Err(e) if e.is_database_locked() && attempt + 1 < SERIAL_ADVANCE_MAX_RETRIES => {
                    attempt += 1;
                    let (low, high) = SERIAL_ADVANCE_BACKOFF_MS;
                    let delay = rand::thread_rng().gen_range(low..=high);
                    warn!(
                        target: LOG_TARGET,
                        "Serial advance for account {} contended (attempt {}), retrying in {}ms",
                        account_id,
                        attempt,
                        delay
                    );
                    std::thread::sleep(Duration::from_millis(delay));
                },
                Err(e) => return Err(e),
            }
        }
    }
}
