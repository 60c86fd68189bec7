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

use std::{convert::TryFrom, str::FromStr};

use chrono::NaiveDateTime;
use diesel::prelude::*;

use crate::{
    schema::{accounts, account_keys, audit_log, bootstrap_sessions, drift_events, known_hosts, public_keys, system_keys},
    storage::{
        error::KeyStoreError,
        snapshot::{
            AccountKeySnapshot,
            AccountSnapshot,
            AuditEntrySnapshot,
            KnownHostSnapshot,
            PublicKeySnapshot,
            SystemKeySnapshot,
        },
    },
    types::{
        Account,
        AuditLogEntry,
        BootstrapSession,
        BootstrapStatus,
        DriftEvent,
        DriftSeverity,
        KnownHost,
        PublicKey,
        Secret,
        SystemKey,
    },
};

fn into_u32(value: i32, what: &str) -> Result<u32, KeyStoreError> {
    u32::try_from(value).map_err(|_| KeyStoreError::ConversionError(format!("negative {}", what)))
}

pub(super) fn into_i32(value: u32, what: &str) -> Result<i32, KeyStoreError> {
    i32::try_from(value).map_err(|_| KeyStoreError::ConversionError(format!("{} out of range", what)))
}

/// A Sql version of the Account struct
#[derive(Clone, Debug, Queryable, Insertable, PartialEq, Eq)]
#[diesel(table_name = accounts)]
pub struct AccountSql {
    pub id: i32,
    pub username: String,
    pub hostname: String,
    pub label: String,
    pub tags: String,
    pub serial: i32,
    pub is_active: bool,
    pub is_dirty: bool,
    pub key_hash: Option<String>,
}

#[derive(Clone, Debug, Insertable)]
#[diesel(table_name = accounts)]
pub struct NewAccountSql {
    pub username: String,
    pub hostname: String,
    pub label: String,
    pub tags: String,
}

#[derive(Default, AsChangeset)]
#[diesel(table_name = accounts)]
pub struct UpdateAccountSql {
    pub label: Option<String>,
    pub hostname: Option<String>,
    pub tags: Option<String>,
    pub serial: Option<i32>,
    pub is_active: Option<bool>,
    pub is_dirty: Option<bool>,
    pub key_hash: Option<Option<String>>,
}

impl TryFrom<AccountSql> for Account {
    type Error = KeyStoreError;

    fn try_from(o: AccountSql) -> Result<Self, Self::Error> {
        Ok(Self {
            id: into_u32(o.id, "account id")?,
            username: o.username,
            hostname: o.hostname,
            label: o.label,
            tags: o.tags,
            serial: into_u32(o.serial, "account serial")?,
            is_active: o.is_active,
            is_dirty: o.is_dirty,
            key_hash: o.key_hash,
        })
    }
}

impl TryFrom<AccountSql> for AccountSnapshot {
    type Error = KeyStoreError;

    fn try_from(o: AccountSql) -> Result<Self, Self::Error> {
        let account = Account::try_from(o)?;
        Ok(Self {
            id: account.id,
            username: account.username,
            hostname: account.hostname,
            label: account.label,
            tags: account.tags,
            serial: account.serial,
            is_active: account.is_active,
            is_dirty: account.is_dirty,
            key_hash: account.key_hash,
        })
    }
}

impl TryFrom<&AccountSnapshot> for AccountSql {
    type Error = KeyStoreError;

    fn try_from(o: &AccountSnapshot) -> Result<Self, Self::Error> {
        Ok(Self {
            id: into_i32(o.id, "account id")?,
            username: o.username.clone(),
            hostname: o.hostname.clone(),
            label: o.label.clone(),
            tags: o.tags.clone(),
            serial: into_i32(o.serial, "account serial")?,
            is_active: o.is_active,
            is_dirty: o.is_dirty,
            key_hash: o.key_hash.clone(),
        })
    }
}

/// A Sql version of the PublicKey struct
#[derive(Clone, Debug, Queryable, Insertable, PartialEq, Eq)]
#[diesel(table_name = public_keys)]
pub struct PublicKeySql {
    pub id: i32,
    pub algorithm: String,
    pub key_data: String,
    pub comment: String,
    pub is_global: bool,
    pub expires_at: Option<NaiveDateTime>,
}

#[derive(Clone, Debug, Insertable)]
#[diesel(table_name = public_keys)]
pub struct NewPublicKeySql {
    pub algorithm: String,
    pub key_data: String,
    pub comment: String,
    pub is_global: bool,
    pub expires_at: Option<NaiveDateTime>,
}

impl TryFrom<PublicKeySql> for PublicKey {
    type Error = KeyStoreError;

    fn try_from(o: PublicKeySql) -> Result<Self, Self::Error> {
        Ok(Self {
            id: into_u32(o.id, "key id")?,
            algorithm: o.algorithm,
            key_data: o.key_data,
            comment: o.comment,
            is_global: o.is_global,
            expires_at: o.expires_at,
        })
    }
}

impl TryFrom<PublicKeySql> for PublicKeySnapshot {
    type Error = KeyStoreError;

    fn try_from(o: PublicKeySql) -> Result<Self, Self::Error> {
        let key = PublicKey::try_from(o)?;
        Ok(Self {
            id: key.id,
            algorithm: key.algorithm,
            key_data: key.key_data,
            comment: key.comment,
            is_global: key.is_global,
            expires_at: key.expires_at,
        })
    }
}

impl TryFrom<&PublicKeySnapshot> for PublicKeySql {
    type Error = KeyStoreError;

    fn try_from(o: &PublicKeySnapshot) -> Result<Self, Self::Error> {
        Ok(Self {
            id: into_i32(o.id, "key id")?,
            algorithm: o.algorithm.clone(),
            key_data: o.key_data.clone(),
            comment: o.comment.clone(),
            is_global: o.is_global,
            expires_at: o.expires_at,
        })
    }
}

/// One key-to-account assignment row
#[derive(Clone, Copy, Debug, Queryable, Insertable, PartialEq, Eq)]
#[diesel(table_name = account_keys)]
pub struct AccountKeySql {
    pub key_id: i32,
    pub account_id: i32,
}

impl TryFrom<AccountKeySql> for AccountKeySnapshot {
    type Error = KeyStoreError;

    fn try_from(o: AccountKeySql) -> Result<Self, Self::Error> {
        Ok(Self {
            key_id: into_u32(o.key_id, "key id")?,
            account_id: into_u32(o.account_id, "account id")?,
        })
    }
}

/// A Sql version of the SystemKey struct
#[derive(Clone, Debug, Queryable, PartialEq, Eq)]
#[diesel(table_name = system_keys)]
pub struct SystemKeySql {
    pub id: i32,
    pub serial: i32,
    pub public_key: String,
    pub private_key: Vec<u8>,
    pub is_active: bool,
}

#[derive(Clone, Debug, Insertable)]
#[diesel(table_name = system_keys)]
pub struct NewSystemKeySql {
    pub serial: i32,
    pub public_key: String,
    pub private_key: Vec<u8>,
    pub is_active: bool,
}

impl TryFrom<SystemKeySql> for SystemKey {
    type Error = KeyStoreError;

    fn try_from(o: SystemKeySql) -> Result<Self, Self::Error> {
        Ok(Self {
            id: into_u32(o.id, "system key id")?,
            serial: into_u32(o.serial, "system key serial")?,
            public_key: o.public_key,
            private_key: Secret::new(o.private_key),
            is_active: o.is_active,
        })
    }
}

impl TryFrom<SystemKeySql> for SystemKeySnapshot {
    type Error = KeyStoreError;

    fn try_from(o: SystemKeySql) -> Result<Self, Self::Error> {
        Ok(Self {
            serial: into_u32(o.serial, "system key serial")?,
            public_key: o.public_key,
            private_key: o.private_key,
            is_active: o.is_active,
        })
    }
}

/// A Sql version of the KnownHost struct
#[derive(Clone, Debug, Queryable, Insertable, PartialEq, Eq)]
#[diesel(table_name = known_hosts)]
pub struct KnownHostSql {
    pub hostname: String,
    pub key: String,
}

impl From<KnownHostSql> for KnownHost {
    fn from(o: KnownHostSql) -> Self {
        Self {
            hostname: o.hostname,
            key: o.key,
        }
    }
}

impl From<KnownHostSql> for KnownHostSnapshot {
    fn from(o: KnownHostSql) -> Self {
        Self {
            hostname: o.hostname,
            key: o.key,
        }
    }
}

/// A Sql version of one audit log entry
#[derive(Clone, Debug, Queryable, PartialEq, Eq)]
#[diesel(table_name = audit_log)]
pub struct AuditEntrySql {
    pub id: i32,
    pub timestamp: NaiveDateTime,
    pub username: String,
    pub action: String,
    pub details: String,
}

#[derive(Clone, Debug, Insertable)]
#[diesel(table_name = audit_log)]
pub struct NewAuditEntrySql {
    pub timestamp: NaiveDateTime,
    pub username: String,
    pub action: String,
    pub details: String,
}

impl TryFrom<AuditEntrySql> for AuditLogEntry {
    type Error = KeyStoreError;

    fn try_from(o: AuditEntrySql) -> Result<Self, Self::Error> {
        Ok(Self {
            id: into_u32(o.id, "audit entry id")?,
            timestamp: o.timestamp,
            username: o.username,
            action: o.action,
            details: o.details,
        })
    }
}

impl From<AuditEntrySql> for AuditEntrySnapshot {
    fn from(o: AuditEntrySql) -> Self {
        Self {
            timestamp: o.timestamp,
            username: o.username,
            action: o.action,
            details: o.details,
        }
    }
}

/// A Sql version of the BootstrapSession struct
#[derive(Clone, Debug, Queryable, Insertable, PartialEq, Eq)]
#[diesel(table_name = bootstrap_sessions)]
pub struct BootstrapSessionSql {
    pub id: String,
    pub username: String,
    pub hostname: String,
    pub label: String,
    pub tags: String,
    pub temp_public_key: String,
    pub created_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
    pub status: String,
}

impl TryFrom<BootstrapSessionSql> for BootstrapSession {
    type Error = KeyStoreError;

    fn try_from(o: BootstrapSessionSql) -> Result<Self, Self::Error> {
        let status = BootstrapStatus::from_str(&o.status)
            .map_err(|_| KeyStoreError::ConversionError(format!("unknown bootstrap status '{}'", o.status)))?;
        Ok(Self {
            id: o.id,
            username: o.username,
            hostname: o.hostname,
            label: o.label,
            tags: o.tags,
            temp_public_key: o.temp_public_key,
            created_at: o.created_at,
            expires_at: o.expires_at,
            status,
        })
    }
}

impl From<&BootstrapSession> for BootstrapSessionSql {
    fn from(o: &BootstrapSession) -> Self {
        Self {
            id: o.id.clone(),
            username: o.username.clone(),
            hostname: o.hostname.clone(),
            label: o.label.clone(),
            tags: o.tags.clone(),
            temp_public_key: o.temp_public_key.clone(),
            created_at: o.created_at,
            expires_at: o.expires_at,
            status: o.status.to_string(),
        }
    }
}

/// A Sql version of the DriftEvent struct
#[derive(Clone, Debug, Queryable, PartialEq, Eq)]
#[diesel(table_name = drift_events)]
pub struct DriftEventSql {
    pub id: i32,
    pub account_id: i32,
    pub drift_type: String,
    pub details: String,
    pub detected_at: NaiveDateTime,
    pub was_remediated: bool,
    pub remediated_at: Option<NaiveDateTime>,
}

#[derive(Clone, Debug, Insertable)]
#[diesel(table_name = drift_events)]
pub struct NewDriftEventSql {
    pub account_id: i32,
    pub drift_type: String,
    pub details: String,
    pub detected_at: NaiveDateTime,
    pub was_remediated: bool,
}

impl TryFrom<DriftEventSql> for DriftEvent {
    type Error = KeyStoreError;

    fn try_from(o: DriftEventSql) -> Result<Self, Self::Error> {
        let severity = DriftSeverity::from_str(&o.drift_type)
            .map_err(|_| KeyStoreError::ConversionError(format!("unknown drift type '{}'", o.drift_type)))?;
        Ok(Self {
            id: into_u32(o.id, "drift event id")?,
            account_id: into_u32(o.account_id, "account id")?,
            severity,
            details: o.details,
            detected_at: o.detected_at,
            was_remediated: o.was_remediated,
            remediated_at: o.remediated_at,
        })
    }
}
