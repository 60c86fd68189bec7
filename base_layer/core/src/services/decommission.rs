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

use std::collections::HashSet;

use log::*;
use thiserror::Error;

use crate::{
    authorized_keys::{generate_for_account_selective, split_managed_section_with, GeneratorError},
    remote::{
        classify_connection_error,
        connect_verified,
        deploy_authorized_keys,
        parse_host_port,
        read_authorized_keys,
        remove_authorized_keys,
        ConnectionError,
        RemoteConnector,
        RemoteError,
        RemoteSession,
    },
    storage::{actions, KeyStoreBackend, KeyStoreDatabase, KeyStoreError},
    types::{Account, SystemKey},
};

const LOG_TARGET: &str = "keymaster::services::decommission";

#[derive(Debug, Error)]
pub enum DecommissionError {
    #[error("No system key is available to reach {0}")]
    NoConnectKey(String),
    #[error("Generator error: {0}")]
    GeneratorError(#[from] GeneratorError),
    #[error("Connection error: {0}")]
    ConnectionError(#[from] ConnectionError),
    #[error("Key store error: {0}")]
    KeyStoreError(#[from] KeyStoreError),
    #[error("Remote error: {0}")]
    RemoteError(#[from] RemoteError),
}

/// What should happen to the remote file and the local records
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecommissionOptions {
    /// Leave the remote host untouched and only remove local records
    pub skip_remote_cleanup: bool,
    /// Strip the managed section but keep the file (and any foreign lines) in place
    pub keep_file: bool,
    /// Carry on with the local removal when the remote cleanup fails
    pub force: bool,
    /// Report what would happen without touching anything
    pub dry_run: bool,
    /// Remove only these key ids from the managed section instead of the whole section
    pub selective_keys: Vec<u32>,
    /// Remove only the system key line, leaving managed user keys in place
    pub remove_system_key_only: bool,
}

impl DecommissionOptions {
    fn is_selective(&self) -> bool {
        !self.selective_keys.is_empty() || self.remove_system_key_only
    }

    /// Selective runs rewrite the managed section rather than removing the account
    pub fn removes_account(&self) -> bool {
        !self.is_selective()
    }
}

/// How the remote file ended up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCleanup {
    /// The managed section was regenerated without the removed keys
    SectionRewritten,
    /// The managed section was removed; foreign lines were preserved
    SectionStripped,
    FileRemoved,
    /// There was no authorized_keys file to clean
    FileMissing,
    Skipped(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecommissionOutcome {
    pub account: String,
    pub remote: RemoteCleanup,
    pub database_removed: bool,
}

/// Removes Keymaster-managed content from hosts and accounts from the store, preserving
/// everything Keymaster does not own.
pub struct DecommissionService<TBackend, TConnector> {
    db: KeyStoreDatabase<TBackend>,
    connector: TConnector,
}

impl<TBackend, TConnector> DecommissionService<TBackend, TConnector>
where
    TBackend: KeyStoreBackend + 'static,
    TConnector: RemoteConnector,
{
    pub fn new(db: KeyStoreDatabase<TBackend>, connector: TConnector) -> Self {
        Self { db, connector }
    }

    pub fn decommission_account(
        &self,
        account: &Account,
        options: &DecommissionOptions,
    ) -> Result<DecommissionOutcome, DecommissionError> {
        if options.dry_run {
            self.db.append_audit(
                actions::DECOMMISSION_DRYRUN,
                &format!("{} (no changes made)", account.address()),
            );
            return Ok(DecommissionOutcome {
                account: account.address(),
                remote: RemoteCleanup::Skipped("dry run".to_string()),
                database_removed: false,
            });
        }
        self.db.append_audit(actions::DECOMMISSION_START, &account.address());

        let remote = if options.skip_remote_cleanup {
            RemoteCleanup::Skipped("remote cleanup skipped".to_string())
        } else {
            match self.clean_remote(account, options) {
                Ok(cleanup) => cleanup,
                Err(e) if options.force => {
                    warn!(
                        target: LOG_TARGET,
                        "Remote cleanup of {} failed ({}), continuing under force", account.address(), e
                    );
                    RemoteCleanup::Skipped(classify_connection_reason(account, &e))
                },
                Err(e) => {
                    self.db.append_audit(
                        actions::DECOMMISSION_FAILED,
                        &format!("{}: remote cleanup failed: {}", account.address(), e),
                    );
                    return Ok(DecommissionOutcome {
                        account: account.address(),
                        remote: RemoteCleanup::Skipped(classify_connection_reason(account, &e)),
                        database_removed: false,
                    });
                },
            }
        };

        let database_removed = if options.removes_account() {
            match self.db.delete_account(account.id) {
                Ok(_) => true,
                Err(e) => {
                    self.db.append_audit(
                        actions::DECOMMISSION_FAILED,
                        &format!("{}: account removal failed: {}", account.address(), e),
                    );
                    return Err(e.into());
                },
            }
        } else {
            false
        };

        self.db.append_audit(
            actions::DECOMMISSION_SUCCESS,
            &format!("{} remote={:?} database_removed={}", account.address(), remote, database_removed),
        );
        Ok(DecommissionOutcome {
            account: account.address(),
            remote,
            database_removed,
        })
    }

    fn clean_remote(
        &self,
        account: &Account,
        options: &DecommissionOptions,
    ) -> Result<RemoteCleanup, DecommissionError> {
        let connect_key = self.connect_key_for(account)?;
        let target = parse_host_port(&account.hostname)?;
        let mut session = connect_verified(
            &self.connector,
            &self.db,
            &account.username,
            &target.host,
            target.port_or_default(),
            Some(&connect_key.private_key),
        )?;

        let result = self.clean_remote_session(&mut session, account, options);
        let _ = session.close();
        result
    }

    fn clean_remote_session<S: RemoteSession>(
        &self,
        session: &mut S,
        account: &Account,
        options: &DecommissionOptions,
    ) -> Result<RemoteCleanup, DecommissionError> {
        if options.is_selective() {
            let Some(content) = read_authorized_keys(session)? else {
                return Ok(RemoteCleanup::FileMissing);
            };
            let content = String::from_utf8_lossy(&content).into_owned();
            let split = self.split_with_store(&content)?;

            let exclude: HashSet<u32> = options.selective_keys.iter().copied().collect();
            let regenerated = generate_for_account_selective(
                &self.db,
                account.id,
                account.serial,
                &exclude,
                options.remove_system_key_only,
            )?;

            let mut lines: Vec<String> = Vec::new();
            if !regenerated.is_empty() {
                let text = String::from_utf8_lossy(&regenerated.content).into_owned();
                lines.extend(text.lines().map(ToString::to_string));
            }
            lines.extend(split.foreign);

            if lines.is_empty() {
                remove_authorized_keys(session)?;
                return Ok(RemoteCleanup::FileRemoved);
            }
            deploy_authorized_keys(session, render_lines(&lines).as_bytes())?;
            return Ok(RemoteCleanup::SectionRewritten);
        }

        if options.keep_file {
            let Some(content) = read_authorized_keys(session)? else {
                return Ok(RemoteCleanup::FileMissing);
            };
            let content = String::from_utf8_lossy(&content).into_owned();
            let split = self.split_with_store(&content)?;
            if split.foreign.is_empty() {
                // nothing foreign left, keeping an empty file helps nobody
                remove_authorized_keys(session)?;
                return Ok(RemoteCleanup::FileRemoved);
            }
            deploy_authorized_keys(session, render_lines(&split.foreign).as_bytes())?;
            return Ok(RemoteCleanup::SectionStripped);
        }

        if remove_authorized_keys(session)? {
            Ok(RemoteCleanup::FileRemoved)
        } else {
            Ok(RemoteCleanup::FileMissing)
        }
    }

    /// Split remote content, treating a key line inside the managed section as managed only when
    /// the store actually knows the key. A foreign key appended into the managed block survives.
    fn split_with_store(&self, content: &str) -> Result<crate::authorized_keys::ManagedSplit, KeyStoreError> {
        let known: HashSet<(String, String)> = self
            .db
            .list_public_keys()?
            .into_iter()
            .map(|k| (k.algorithm, k.key_data))
            .collect();
        Ok(split_managed_section_with(content, |key| {
            known.contains(&(key.algorithm.clone(), key.key_data.clone()))
        }))
    }

    fn connect_key_for(&self, account: &Account) -> Result<SystemKey, DecommissionError> {
        let key = if account.serial > 0 {
            self.db.get_system_key_by_serial(account.serial)?
        } else {
            self.db.get_active_system_key()?
        };
        key.or(self.db.get_active_system_key()?)
            .ok_or_else(|| DecommissionError::NoConnectKey(account.address()))
    }
}

fn render_lines(lines: &[String]) -> String {
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

fn classify_connection_reason(account: &Account, err: &DecommissionError) -> String {
    match err {
        DecommissionError::ConnectionError(e) => classify_connection_error(&account.hostname, e),
        other => other.to_string(),
    }
}
