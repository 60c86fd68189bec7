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

use std::sync::Arc;

use chrono::NaiveDateTime;
use log::*;

use crate::{
    storage::{
        error::KeyStoreError,
        snapshot::{IntegrateOutcome, StoreSnapshot},
    },
    types::{
        Account,
        AuditLogEntry,
        BootstrapSession,
        BootstrapStatus,
        DriftEvent,
        DriftSeverity,
        DriftStats,
        KnownHost,
        PublicKey,
        Secret,
        SystemKey,
    },
};

const LOG_TARGET: &str = "keymaster::storage::database";

/// The stable audit action tags emitted by the core
pub mod actions {
    pub const ADD_ACCOUNT: &str = "ADD_ACCOUNT";
    pub const DELETE_ACCOUNT: &str = "DELETE_ACCOUNT";
    pub const TOGGLE_ACCOUNT_STATUS: &str = "TOGGLE_ACCOUNT_STATUS";
    pub const UPDATE_ACCOUNT_LABEL: &str = "UPDATE_ACCOUNT_LABEL";
    pub const UPDATE_ACCOUNT_TAGS: &str = "UPDATE_ACCOUNT_TAGS";
    pub const ADD_PUBLIC_KEY: &str = "ADD_PUBLIC_KEY";
    pub const DELETE_PUBLIC_KEY: &str = "DELETE_PUBLIC_KEY";
    pub const TOGGLE_KEY_GLOBAL: &str = "TOGGLE_KEY_GLOBAL";
    pub const ASSIGN_KEY: &str = "ASSIGN_KEY";
    pub const UNASSIGN_KEY: &str = "UNASSIGN_KEY";
    pub const CREATE_SYSTEM_KEY: &str = "CREATE_SYSTEM_KEY";
    pub const ROTATE_SYSTEM_KEY: &str = "ROTATE_SYSTEM_KEY";
    pub const TRUST_HOST: &str = "TRUST_HOST";
    pub const ACCOUNT_KEY_HASH_UPDATED: &str = "ACCOUNT_KEY_HASH_UPDATED";
    pub const DEPLOY_KEYS: &str = "DEPLOY_KEYS";
    pub const DEPLOY_FAILED: &str = "DEPLOY_FAILED";
    pub const DECOMMISSION_START: &str = "DECOMMISSION_START";
    pub const DECOMMISSION_DRYRUN: &str = "DECOMMISSION_DRYRUN";
    pub const DECOMMISSION_SUCCESS: &str = "DECOMMISSION_SUCCESS";
    pub const DECOMMISSION_FAILED: &str = "DECOMMISSION_FAILED";
}

/// The OS user initiating the current process, recorded against every audit entry
pub fn os_username() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Parse an operator-supplied expiry spec: empty or `never` clears the expiry, otherwise an
/// ISO-8601 date (`2025-03-01`) or datetime (`2025-03-01T12:00:00`) in UTC is accepted.
pub fn parse_expiry(spec: &str) -> Result<Option<NaiveDateTime>, KeyStoreError> {
    let spec = spec.trim();
    if spec.is_empty() || spec.eq_ignore_ascii_case("never") {
        return Ok(None);
    }
    if let Ok(datetime) = NaiveDateTime::parse_from_str(spec, "%Y-%m-%dT%H:%M:%S") {
        return Ok(Some(datetime));
    }
    chrono::NaiveDate::parse_from_str(spec, "%Y-%m-%d")
        .map(|date| Some(date.and_hms_opt(0, 0, 0).expect("midnight is valid")))
        .map_err(|_| KeyStoreError::ConversionError(format!("invalid expiry '{}'", spec)))
}

/// Fields for a new account row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAccount {
    pub username: String,
    pub hostname: String,
    pub label: String,
    pub tags: String,
}

/// Fields for a new public key row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPublicKey {
    pub algorithm: String,
    pub key_data: String,
    pub comment: String,
    pub is_global: bool,
}

/// This trait defines the functionality a database backend needs to provide for the Keymaster
/// core. Lookups return `None` for missing rows; mutations that require a present row fail with
/// [`KeyStoreError::ValueNotFound`]; unique violations map to [`KeyStoreError::DuplicateValue`].
pub trait KeyStoreBackend: Send + Sync + Clone {
    // -- accounts --
    fn fetch_accounts(&self) -> Result<Vec<Account>, KeyStoreError>;
    fn fetch_active_accounts(&self) -> Result<Vec<Account>, KeyStoreError>;
    fn fetch_account(&self, id: u32) -> Result<Option<Account>, KeyStoreError>;
    fn fetch_account_by_address(
        &self,
        username: &str,
        hostname: &str,
    ) -> Result<Option<Account>, KeyStoreError>;
    fn search_accounts(&self, query: &str) -> Result<Vec<Account>, KeyStoreError>;
    fn insert_account(&self, account: NewAccount) -> Result<Account, KeyStoreError>;
    fn delete_account(&self, id: u32) -> Result<Account, KeyStoreError>;
    fn toggle_account_active(&self, id: u32) -> Result<Account, KeyStoreError>;
    fn update_account_label(&self, id: u32, label: &str) -> Result<Account, KeyStoreError>;
    fn update_account_hostname(&self, id: u32, hostname: &str) -> Result<Account, KeyStoreError>;
    fn update_account_tags(&self, id: u32, tags: &str) -> Result<Account, KeyStoreError>;
    fn update_account_serial(&self, id: u32, serial: u32) -> Result<Account, KeyStoreError>;
    fn set_account_dirty(&self, id: u32, dirty: bool) -> Result<(), KeyStoreError>;
    fn update_account_key_hash(&self, id: u32, key_hash: Option<&str>) -> Result<(), KeyStoreError>;

    // -- public keys --
    fn fetch_public_keys(&self) -> Result<Vec<PublicKey>, KeyStoreError>;
    fn fetch_global_keys(&self) -> Result<Vec<PublicKey>, KeyStoreError>;
    fn fetch_key_by_id(&self, id: u32) -> Result<Option<PublicKey>, KeyStoreError>;
    fn fetch_key_by_comment(&self, comment: &str) -> Result<Option<PublicKey>, KeyStoreError>;
    fn insert_public_key(&self, key: NewPublicKey) -> Result<PublicKey, KeyStoreError>;
    /// As [`KeyStoreBackend::insert_public_key`], but a duplicate comment returns `Ok(None)`
    /// instead of an error
    fn insert_public_key_checked(&self, key: NewPublicKey) -> Result<Option<PublicKey>, KeyStoreError>;
    fn delete_public_key(&self, id: u32) -> Result<PublicKey, KeyStoreError>;
    /// Toggling a key to global removes any per-account assignments in the same transaction
    fn toggle_key_global(&self, id: u32) -> Result<PublicKey, KeyStoreError>;
    fn set_key_expiry(&self, id: u32, expires_at: Option<NaiveDateTime>) -> Result<PublicKey, KeyStoreError>;
    /// Fails with [`KeyStoreError::InvalidAssignment`] when the key is global
    fn assign_key(&self, key_id: u32, account_id: u32) -> Result<(), KeyStoreError>;
    fn unassign_key(&self, key_id: u32, account_id: u32) -> Result<(), KeyStoreError>;
    fn fetch_keys_for_account(&self, account_id: u32) -> Result<Vec<PublicKey>, KeyStoreError>;
    fn fetch_accounts_for_key(&self, key_id: u32) -> Result<Vec<Account>, KeyStoreError>;

    // -- system keys --
    /// Insert the first system key with the next free serial. Fails with `DuplicateValue` when an
    /// active system key already exists; rotation is the only way to replace one.
    fn insert_system_key(&self, public_key: &str, private_key: &Secret) -> Result<SystemKey, KeyStoreError>;
    /// One transaction: deactivate every system key, then insert the replacement with
    /// `max(serial) + 1` as the only active key
    fn rotate_system_key(&self, public_key: &str, private_key: &Secret) -> Result<SystemKey, KeyStoreError>;
    fn fetch_active_system_key(&self) -> Result<Option<SystemKey>, KeyStoreError>;
    fn fetch_system_key_by_serial(&self, serial: u32) -> Result<Option<SystemKey>, KeyStoreError>;
    fn has_system_keys(&self) -> Result<bool, KeyStoreError>;

    // -- known hosts --
    fn fetch_known_host(&self, hostname: &str) -> Result<Option<KnownHost>, KeyStoreError>;
    fn upsert_known_host(&self, hostname: &str, key: &str) -> Result<(), KeyStoreError>;

    // -- audit log --
    fn append_audit_entry(&self, username: &str, action: &str, details: &str) -> Result<(), KeyStoreError>;
    /// Newest first
    fn fetch_audit_log(&self) -> Result<Vec<AuditLogEntry>, KeyStoreError>;

    // -- bootstrap sessions --
    fn save_bootstrap_session(&self, session: &BootstrapSession) -> Result<(), KeyStoreError>;
    fn fetch_bootstrap_session(&self, id: &str) -> Result<Option<BootstrapSession>, KeyStoreError>;
    fn delete_bootstrap_session(&self, id: &str) -> Result<(), KeyStoreError>;
    fn set_bootstrap_status(&self, id: &str, status: BootstrapStatus) -> Result<(), KeyStoreError>;
    fn fetch_expired_bootstrap_sessions(
        &self,
        now: NaiveDateTime,
    ) -> Result<Vec<BootstrapSession>, KeyStoreError>;
    fn fetch_orphaned_bootstrap_sessions(&self) -> Result<Vec<BootstrapSession>, KeyStoreError>;

    // -- drift events --
    fn insert_drift_event(
        &self,
        account_id: u32,
        severity: DriftSeverity,
        details: &str,
    ) -> Result<DriftEvent, KeyStoreError>;
    fn mark_drift_remediated(&self, event_id: u32) -> Result<(), KeyStoreError>;
    fn fetch_drift_events_for_account(&self, account_id: u32) -> Result<Vec<DriftEvent>, KeyStoreError>;
    fn fetch_drift_events_by_host(&self, hostname: &str) -> Result<Vec<DriftEvent>, KeyStoreError>;
    fn fetch_recent_drift_events(&self, limit: usize) -> Result<Vec<DriftEvent>, KeyStoreError>;
    fn fetch_drift_stats(&self) -> Result<DriftStats, KeyStoreError>;

    // -- backup --
    fn export_snapshot(&self) -> Result<StoreSnapshot, KeyStoreError>;
    /// Wipe and replace the whole store in one transaction
    fn import_snapshot(&self, snapshot: &StoreSnapshot) -> Result<(), KeyStoreError>;
    /// Merge a snapshot into the store, skipping rows that collide on natural keys
    fn integrate_snapshot(&self, snapshot: &StoreSnapshot) -> Result<IntegrateOutcome, KeyStoreError>;
}

/// The store handle used across the core. Wraps a backend and layers the audit policy on top:
/// every user-visible mutation appends an audit entry attributed to the OS user, and a failed
/// audit append never fails the mutation itself.
pub struct KeyStoreDatabase<T> {
    db: Arc<T>,
}

impl<T> Clone for KeyStoreDatabase<T> {
    fn clone(&self) -> Self {
        Self { db: self.db.clone() }
    }
}

impl<T> KeyStoreDatabase<T>
where T: KeyStoreBackend + 'static
{
    pub fn new(db: T) -> Self {
        Self { db: Arc::new(db) }
    }

    fn audit(&self, action: &str, details: String) {
        if let Err(e) = self.db.append_audit_entry(&os_username(), action, &details) {
            warn!(
                target: LOG_TARGET,
                "Failed to append '{}' audit entry ({}): {}", action, details, e
            );
        }
    }

    // -- accounts --

    pub fn list_accounts(&self) -> Result<Vec<Account>, KeyStoreError> {
        self.db.fetch_accounts()
    }

    pub fn list_active_accounts(&self) -> Result<Vec<Account>, KeyStoreError> {
        self.db.fetch_active_accounts()
    }

    pub fn get_account(&self, id: u32) -> Result<Option<Account>, KeyStoreError> {
        self.db.fetch_account(id)
    }

    pub fn get_account_by_address(
        &self,
        username: &str,
        hostname: &str,
    ) -> Result<Option<Account>, KeyStoreError> {
        self.db.fetch_account_by_address(username, hostname)
    }

    pub fn search_accounts(&self, query: &str) -> Result<Vec<Account>, KeyStoreError> {
        self.db.search_accounts(query)
    }

    pub fn add_account(&self, account: NewAccount) -> Result<Account, KeyStoreError> {
        let added = self.db.insert_account(account)?;
        self.audit(actions::ADD_ACCOUNT, added.address());
        Ok(added)
    }

    pub fn delete_account(&self, id: u32) -> Result<Account, KeyStoreError> {
        let deleted = self.db.delete_account(id)?;
        self.audit(actions::DELETE_ACCOUNT, deleted.address());
        Ok(deleted)
    }

    pub fn toggle_account_active(&self, id: u32) -> Result<Account, KeyStoreError> {
        let account = self.db.toggle_account_active(id)?;
        self.audit(
            actions::TOGGLE_ACCOUNT_STATUS,
            format!(
                "{} is now {}",
                account.address(),
                if account.is_active { "active" } else { "inactive" }
            ),
        );
        Ok(account)
    }

    pub fn update_account_label(&self, id: u32, label: &str) -> Result<Account, KeyStoreError> {
        let account = self.db.update_account_label(id, label)?;
        self.audit(
            actions::UPDATE_ACCOUNT_LABEL,
            format!("{} label set to '{}'", account.address(), label),
        );
        Ok(account)
    }

    pub fn update_account_hostname(&self, id: u32, hostname: &str) -> Result<Account, KeyStoreError> {
        self.db.update_account_hostname(id, hostname)
    }

    pub fn update_account_tags(&self, id: u32, tags: &str) -> Result<Account, KeyStoreError> {
        let account = self.db.update_account_tags(id, tags)?;
        self.audit(
            actions::UPDATE_ACCOUNT_TAGS,
            format!("{} tags set to '{}'", account.address(), tags),
        );
        Ok(account)
    }

    pub fn update_account_serial(&self, id: u32, serial: u32) -> Result<Account, KeyStoreError> {
        self.db.update_account_serial(id, serial)
    }

    pub fn set_account_dirty(&self, id: u32, dirty: bool) -> Result<(), KeyStoreError> {
        self.db.set_account_dirty(id, dirty)
    }

    /// Record the hash of the content last deployed to the account
    pub fn update_account_key_hash(&self, id: u32, key_hash: Option<&str>) -> Result<(), KeyStoreError> {
        self.db.update_account_key_hash(id, key_hash)?;
        if let Some(hash) = key_hash {
            if let Ok(Some(account)) = self.db.fetch_account(id) {
                self.audit(
                    actions::ACCOUNT_KEY_HASH_UPDATED,
                    format!("{} content hash {}", account.address(), hash),
                );
            }
        }
        Ok(())
    }

    // -- public keys --

    pub fn list_public_keys(&self) -> Result<Vec<PublicKey>, KeyStoreError> {
        self.db.fetch_public_keys()
    }

    pub fn list_global_keys(&self) -> Result<Vec<PublicKey>, KeyStoreError> {
        self.db.fetch_global_keys()
    }

    pub fn get_key_by_id(&self, id: u32) -> Result<Option<PublicKey>, KeyStoreError> {
        self.db.fetch_key_by_id(id)
    }

    pub fn get_key_by_comment(&self, comment: &str) -> Result<Option<PublicKey>, KeyStoreError> {
        self.db.fetch_key_by_comment(comment)
    }

    pub fn add_public_key(&self, key: NewPublicKey) -> Result<PublicKey, KeyStoreError> {
        let added = self.db.insert_public_key(key)?;
        self.audit(actions::ADD_PUBLIC_KEY, describe_key(&added));
        if added.is_global {
            self.mark_all_active_accounts_dirty();
        }
        Ok(added)
    }

    pub fn add_public_key_checked(&self, key: NewPublicKey) -> Result<Option<PublicKey>, KeyStoreError> {
        let added = self.db.insert_public_key_checked(key)?;
        if let Some(key) = added.as_ref() {
            self.audit(actions::ADD_PUBLIC_KEY, describe_key(key));
            if key.is_global {
                self.mark_all_active_accounts_dirty();
            }
        }
        Ok(added)
    }

    pub fn delete_public_key(&self, id: u32) -> Result<PublicKey, KeyStoreError> {
        self.mark_key_holders_dirty(id);
        let deleted = self.db.delete_public_key(id)?;
        self.audit(actions::DELETE_PUBLIC_KEY, describe_key(&deleted));
        Ok(deleted)
    }

    pub fn toggle_key_global(&self, id: u32) -> Result<PublicKey, KeyStoreError> {
        self.mark_key_holders_dirty(id);
        let key = self.db.toggle_key_global(id)?;
        self.audit(
            actions::TOGGLE_KEY_GLOBAL,
            format!(
                "'{}' is now {}",
                key.comment,
                if key.is_global { "global" } else { "per-account" }
            ),
        );
        if key.is_global {
            self.mark_all_active_accounts_dirty();
        }
        Ok(key)
    }

    pub fn set_key_expiry(
        &self,
        id: u32,
        expires_at: Option<NaiveDateTime>,
    ) -> Result<PublicKey, KeyStoreError> {
        self.mark_key_holders_dirty(id);
        self.db.set_key_expiry(id, expires_at)
    }

    pub fn assign_key(&self, key_id: u32, account_id: u32) -> Result<(), KeyStoreError> {
        self.db.assign_key(key_id, account_id)?;
        if let (Ok(Some(key)), Ok(Some(account))) =
            (self.db.fetch_key_by_id(key_id), self.db.fetch_account(account_id))
        {
            self.audit(
                actions::ASSIGN_KEY,
                format!("'{}' assigned to {}", key.comment, account.address()),
            );
        }
        self.db.set_account_dirty(account_id, true)?;
        Ok(())
    }

    pub fn unassign_key(&self, key_id: u32, account_id: u32) -> Result<(), KeyStoreError> {
        self.db.unassign_key(key_id, account_id)?;
        if let (Ok(Some(key)), Ok(Some(account))) =
            (self.db.fetch_key_by_id(key_id), self.db.fetch_account(account_id))
        {
            self.audit(
                actions::UNASSIGN_KEY,
                format!("'{}' unassigned from {}", key.comment, account.address()),
            );
        }
        self.db.set_account_dirty(account_id, true)?;
        Ok(())
    }

    pub fn list_keys_for_account(&self, account_id: u32) -> Result<Vec<PublicKey>, KeyStoreError> {
        self.db.fetch_keys_for_account(account_id)
    }

    pub fn list_accounts_for_key(&self, key_id: u32) -> Result<Vec<Account>, KeyStoreError> {
        self.db.fetch_accounts_for_key(key_id)
    }

    /// Accounts whose deployed content is invalidated by a change to this key are flagged dirty.
    /// Best-effort, like the audit writes it accompanies.
    fn mark_key_holders_dirty(&self, key_id: u32) {
        let affected = match self.db.fetch_key_by_id(key_id) {
            Ok(Some(key)) if key.is_global => self.db.fetch_active_accounts(),
            Ok(Some(_)) => self.db.fetch_accounts_for_key(key_id),
            _ => return,
        };
        if let Ok(accounts) = affected {
            for account in accounts {
                let _ = self.db.set_account_dirty(account.id, true);
            }
        }
    }

    fn mark_all_active_accounts_dirty(&self) {
        if let Ok(accounts) = self.db.fetch_active_accounts() {
            for account in accounts {
                let _ = self.db.set_account_dirty(account.id, true);
            }
        }
    }

    // -- system keys --

    pub fn create_system_key(&self, public_key: &str, private_key: &Secret) -> Result<SystemKey, KeyStoreError> {
        let created = self.db.insert_system_key(public_key, private_key)?;
        self.audit(
            actions::CREATE_SYSTEM_KEY,
            format!("serial {} created", created.serial),
        );
        Ok(created)
    }

    pub fn rotate_system_key(&self, public_key: &str, private_key: &Secret) -> Result<SystemKey, KeyStoreError> {
        let rotated = self.db.rotate_system_key(public_key, private_key)?;
        self.audit(
            actions::ROTATE_SYSTEM_KEY,
            format!("serial advanced to {}", rotated.serial),
        );
        Ok(rotated)
    }

    pub fn get_active_system_key(&self) -> Result<Option<SystemKey>, KeyStoreError> {
        self.db.fetch_active_system_key()
    }

    pub fn get_system_key_by_serial(&self, serial: u32) -> Result<Option<SystemKey>, KeyStoreError> {
        self.db.fetch_system_key_by_serial(serial)
    }

    pub fn has_system_keys(&self) -> Result<bool, KeyStoreError> {
        self.db.has_system_keys()
    }

    // -- known hosts --

    pub fn get_known_host(&self, hostname: &str) -> Result<Option<KnownHost>, KeyStoreError> {
        self.db.fetch_known_host(hostname)
    }

    /// Record (or overwrite) the trusted key for a canonical host
    pub fn trust_host(&self, hostname: &str, key: &str) -> Result<(), KeyStoreError> {
        self.db.upsert_known_host(hostname, key)?;
        self.audit(actions::TRUST_HOST, format!("{} trusted", hostname));
        Ok(())
    }

    // -- audit log --

    pub fn append_audit(&self, action: &str, details: &str) {
        self.audit(action, details.to_string());
    }

    pub fn list_audit_log(&self) -> Result<Vec<AuditLogEntry>, KeyStoreError> {
        self.db.fetch_audit_log()
    }

    // -- bootstrap sessions --

    pub fn save_bootstrap_session(&self, session: &BootstrapSession) -> Result<(), KeyStoreError> {
        self.db.save_bootstrap_session(session)
    }

    pub fn get_bootstrap_session(&self, id: &str) -> Result<Option<BootstrapSession>, KeyStoreError> {
        self.db.fetch_bootstrap_session(id)
    }

    pub fn delete_bootstrap_session(&self, id: &str) -> Result<(), KeyStoreError> {
        self.db.delete_bootstrap_session(id)
    }

    pub fn set_bootstrap_status(&self, id: &str, status: BootstrapStatus) -> Result<(), KeyStoreError> {
        self.db.set_bootstrap_status(id, status)
    }

    pub fn list_expired_bootstrap_sessions(
        &self,
        now: NaiveDateTime,
    ) -> Result<Vec<BootstrapSession>, KeyStoreError> {
        self.db.fetch_expired_bootstrap_sessions(now)
    }

    pub fn list_orphaned_bootstrap_sessions(&self) -> Result<Vec<BootstrapSession>, KeyStoreError> {
        self.db.fetch_orphaned_bootstrap_sessions()
    }

    // -- drift events --

    pub fn record_drift_event(
        &self,
        account_id: u32,
        severity: DriftSeverity,
        details: &str,
    ) -> Result<DriftEvent, KeyStoreError> {
        self.db.insert_drift_event(account_id, severity, details)
    }

    pub fn mark_drift_remediated(&self, event_id: u32) -> Result<(), KeyStoreError> {
        self.db.mark_drift_remediated(event_id)
    }

    pub fn list_drift_events_for_account(&self, account_id: u32) -> Result<Vec<DriftEvent>, KeyStoreError> {
        self.db.fetch_drift_events_for_account(account_id)
    }

    pub fn list_drift_events_by_host(&self, hostname: &str) -> Result<Vec<DriftEvent>, KeyStoreError> {
        self.db.fetch_drift_events_by_host(hostname)
    }

    pub fn list_recent_drift_events(&self, limit: usize) -> Result<Vec<DriftEvent>, KeyStoreError> {
        self.db.fetch_recent_drift_events(limit)
    }

    pub fn drift_stats(&self) -> Result<DriftStats, KeyStoreError> {
        self.db.fetch_drift_stats()
    }

    // -- backup --

    pub fn export_snapshot(&self) -> Result<StoreSnapshot, KeyStoreError> {
        self.db.export_snapshot()
    }

    pub fn import_snapshot(&self, snapshot: &StoreSnapshot) -> Result<(), KeyStoreError> {
        self.db.import_snapshot(snapshot)
    }

    pub fn integrate_snapshot(&self, snapshot: &StoreSnapshot) -> Result<IntegrateOutcome, KeyStoreError> {
        self.db.integrate_snapshot(snapshot)
    }
}

fn describe_key(key: &PublicKey) -> String {
    match key.fingerprint_sha256() {
        Some(fp) => format!("'{}' ({})", key.comment, fp),
        None => format!("'{}'", key.comment),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn expiry_spec_parsing() {
        assert_eq!(parse_expiry("").unwrap(), None);
        assert_eq!(parse_expiry("never").unwrap(), None);
        assert_eq!(parse_expiry("Never").unwrap(), None);

        let date = parse_expiry("2025-03-01").unwrap().unwrap();
        assert_eq!(date.to_string(), "2025-03-01 00:00:00");

        let datetime = parse_expiry("2025-03-01T12:30:00").unwrap().unwrap();
        assert_eq!(datetime.to_string(), "2025-03-01 12:30:00");

        assert!(parse_expiry("not a date").is_err());
    }
}
