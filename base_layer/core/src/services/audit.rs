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
    authorized_keys::{
        extract_header_serial,
        generate_for_account,
        normalize_authorized_keys_content,
        GeneratorError,
    },
    remote::{
        connect_verified,
        parse_host_port,
        read_authorized_keys,
        ConnectionError,
        RemoteConnector,
        RemoteError,
        RemoteSession,
    },
    services::drift::{analyze_drift, record_drift, DriftAnalysis},
    storage::{KeyStoreBackend, KeyStoreDatabase, KeyStoreError},
    types::{Account, DriftEvent},
};

const LOG_TARGET: &str = "keymaster::services::audit";

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Account {0} has never been deployed")]
    NotDeployed(String),
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

/// The auditor's verdict on one account. Detected drift is a successful audit whose outcome the
/// caller maps to a non-zero exit, not an operational failure.
#[derive(Debug)]
pub enum AuditReport {
    Clean,
    Drift {
        analysis: DriftAnalysis,
        event: Option<DriftEvent>,
    },
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        matches!(self, AuditReport::Clean)
    }
}

/// Compares the remote authorized_keys state of managed accounts against the desired state in
/// the store.
pub struct AuditService<TBackend, TConnector> {
    db: KeyStoreDatabase<TBackend>,
    connector: TConnector,
}

impl<TBackend, TConnector> AuditService<TBackend, TConnector>
where
    TBackend: KeyStoreBackend + 'static,
    TConnector: RemoteConnector,
{
    pub fn new(db: KeyStoreDatabase<TBackend>, connector: TConnector) -> Self {
        Self { db, connector }
    }

    /// Strict audit: the whole remote file must match the generator output for the account's
    /// deployed serial, byte for byte after normalization.
    pub fn audit_account_strict(&self, account: &Account) -> Result<AuditReport, AuditError> {
        let remote_content = self.read_remote(account)?.unwrap_or_default();
        let expected = generate_for_account(&self.db, account.id, account.serial)?;
        let expected_text = String::from_utf8_lossy(&expected.content).into_owned();

        if normalize_authorized_keys_content(&expected_text) ==
            normalize_authorized_keys_content(&remote_content)
        {
            debug!(target: LOG_TARGET, "{} is clean at serial {}", account.address(), account.serial);
            return Ok(AuditReport::Clean);
        }

        let analysis = analyze_drift(&expected_text, &remote_content, account.serial);
        let event = record_drift(&self.db, account.id, &analysis)?;
        Ok(AuditReport::Drift { analysis, event })
    }

    /// Serial audit: only the header of the remote file is checked against the account's
    /// deployed serial.
    pub fn audit_account_serial(&self, account: &Account) -> Result<AuditReport, AuditError> {
        let remote_content = self.read_remote(account)?.unwrap_or_default();
        if extract_header_serial(&remote_content) == Some(account.serial) {
            return Ok(AuditReport::Clean);
        }

        let analysis = DriftAnalysis {
            missing_keymaster_header: remote_content.is_empty() ||
                extract_header_serial(&remote_content).is_none(),
            serial_mismatch: extract_header_serial(&remote_content)
                .map(|found| found != account.serial)
                .unwrap_or(false),
            ..Default::default()
        };
        let event = record_drift(&self.db, account.id, &analysis)?;
        Ok(AuditReport::Drift { analysis, event })
    }

    fn read_remote(&self, account: &Account) -> Result<Option<String>, AuditError> {
        if !account.has_been_deployed() {
            return Err(AuditError::NotDeployed(account.address()));
        }
        let connect_key = self
            .db
            .get_system_key_by_serial(account.serial)?
            .ok_or_else(|| AuditError::InconsistentSerial {
                account: account.address(),
                serial: account.serial,
            })?;

        let target = parse_host_port(&account.hostname)?;
        let mut session = connect_verified(
            &self.connector,
            &self.db,
            &account.username,
            &target.host,
            target.port_or_default(),
            Some(&connect_key.private_key),
        )?;
        let content = read_authorized_keys(&mut session);
        let _ = session.close();
        Ok(content?.map(|bytes| String::from_utf8_lossy(&bytes).into_owned()))
    }
}
