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

use log::*;
use thiserror::Error;

use crate::{
    authorized_keys::split_managed_section,
    remote::{
        connect_verified,
        parse_host_port,
        read_authorized_keys,
        ConnectionError,
        RemoteConnector,
        RemoteError,
        RemoteSession,
    },
    storage::{KeyStoreBackend, KeyStoreDatabase, KeyStoreError, NewPublicKey},
    types::{Account, PublicKey},
};

const LOG_TARGET: &str = "keymaster::services::import";

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("Connection error: {0}")]
    ConnectionError(#[from] ConnectionError),
    #[error("Key store error: {0}")]
    KeyStoreError(#[from] KeyStoreError),
    #[error("Remote error: {0}")]
    RemoteError(#[from] RemoteError),
}

/// What an import run brought home
#[derive(Debug, Default)]
pub struct ImportOutcome {
    /// Keys created in the store by this run
    pub imported: Vec<PublicKey>,
    /// Lines passed over: duplicates, malformed lines and keys without a comment
    pub skipped: usize,
}

/// Reads a host's existing authorized_keys and ingests the foreign keys it finds.
pub struct ImportService<TBackend, TConnector> {
    db: KeyStoreDatabase<TBackend>,
    connector: TConnector,
}

impl<TBackend, TConnector> ImportService<TBackend, TConnector>
where
    TBackend: KeyStoreBackend + 'static,
    TConnector: RemoteConnector,
{
    pub fn new(db: KeyStoreDatabase<TBackend>, connector: TConnector) -> Self {
        Self { db, connector }
    }

    pub fn import_from_account(&self, account: &Account) -> Result<ImportOutcome, ImportError> {
        let system_key = self.db.get_active_system_key()?;
        if system_key.is_none() {
            warn!(
                target: LOG_TARGET,
                "No active system key while importing from {}; relying on agent authentication",
                account.address()
            );
        }

        let target = parse_host_port(&account.hostname)?;
        let mut session = connect_verified(
            &self.connector,
            &self.db,
            &account.username,
            &target.host,
            target.port_or_default(),
            system_key.as_ref().map(|k| &k.private_key),
        )?;
        let content = read_authorized_keys(&mut session);
        let _ = session.close();

        let Some(content) = content? else {
            debug!(target: LOG_TARGET, "{} has no authorized_keys file", account.address());
            return Ok(ImportOutcome::default());
        };
        self.ingest(&String::from_utf8_lossy(&content))
    }

    /// Parse raw authorized_keys content and insert every well-formed, commented, new key.
    /// Keymaster's own managed section is not imported.
    pub fn ingest(&self, content: &str) -> Result<ImportOutcome, ImportError> {
        let mut outcome = ImportOutcome::default();
        let foreign = split_managed_section(content).foreign;
        for line in foreign {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            let Some(parsed) = crate::authorized_keys::parse_public_key_line(trimmed) else {
                outcome.skipped += 1;
                continue;
            };
            if !is_key_algorithm(&parsed.algorithm) || parsed.comment.is_empty() {
                // a key without a comment has no usable identity in the store
                outcome.skipped += 1;
                continue;
            }
            match self.db.add_public_key_checked(NewPublicKey {
                algorithm: parsed.algorithm,
                key_data: parsed.key_data,
                comment: parsed.comment,
                is_global: false,
            })? {
                Some(key) => outcome.imported.push(key),
                None => outcome.skipped += 1,
            }
        }
        info!(
            target: LOG_TARGET,
            "Import finished: {} new key(s), {} skipped",
            outcome.imported.len(),
            outcome.skipped
        );
        Ok(outcome)
    }
}

fn is_key_algorithm(algorithm: &str) -> bool {
    algorithm.starts_with("ssh-") || algorithm.starts_with("ecdsa-")
}
