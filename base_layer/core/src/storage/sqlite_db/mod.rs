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

pub mod models;

use std::{convert::TryFrom, sync::Arc};

use chrono::{NaiveDateTime, Utc};
use diesel::{
    dsl::max,
    prelude::*,
    r2d2::{ConnectionManager, PooledConnection},
    result::{DatabaseErrorKind, Error as DieselError},
    sql_types::Integer,
    SqliteConnection,
};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use keymaster_common_sqlite::{
    error::SqliteStorageError,
    sqlite_connection_pool::PooledDbConnection,
    util::diesel_ext::ExpectedRowsExtension,
};
use log::*;

use crate::{
    schema::{accounts, account_keys, audit_log, bootstrap_sessions, drift_events, known_hosts, public_keys, system_keys},
    storage::{
        database::{KeyStoreBackend, NewAccount, NewPublicKey},
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

use models::{
    into_i32,
    AccountKeySql,
    AccountSql,
    AuditEntrySql,
    BootstrapSessionSql,
    DriftEventSql,
    KnownHostSql,
    NewAccountSql,
    NewAuditEntrySql,
    NewDriftEventSql,
    NewPublicKeySql,
    NewSystemKeySql,
    PublicKeySql,
    SystemKeySql,
    UpdateAccountSql,
};

const LOG_TARGET: &str = "keymaster::storage::sqlite_db";

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("./migrations");

diesel::sql_function!(fn last_insert_rowid() -> Integer);

/// A sqlite backend for the Keymaster key store, accessed through a connection pool.
#[derive(Clone)]
pub struct SqliteKeyStore<TKeyStoreDbConnection> {
    database_connection: Arc<TKeyStoreDbConnection>,
}

impl<TKeyStoreDbConnection: PooledDbConnection<Error = SqliteStorageError>> SqliteKeyStore<TKeyStoreDbConnection> {
    pub fn new(database_connection: TKeyStoreDbConnection) -> Self {
        Self {
            database_connection: Arc::new(database_connection),
        }
    }

    pub fn init(database_connection: TKeyStoreDbConnection) -> Self {
        let db = Self::new(database_connection);
        db.run_migrations().expect("Migrations to run");
        db
    }

    fn run_migrations(&self) -> Result<(), SqliteStorageError> {
        let mut conn = self.database_connection.get_pooled_connection()?;
        let applied = conn
            .run_pending_migrations(MIGRATIONS)
            .map_err(|e| SqliteStorageError::MigrationError(e.to_string()))?;
        for migration in applied {
            debug!(target: LOG_TARGET, "Running migration {}", migration);
        }
        Ok(())
    }

    fn connection(
        &self,
    ) -> Result<PooledConnection<ConnectionManager<SqliteConnection>>, KeyStoreError> {
        Ok(self.database_connection.get_pooled_connection()?)
    }
}

/// Map a sqlite unique violation onto the duplicate-value error for the given natural key
fn or_duplicate<TOk>(result: Result<TOk, DieselError>, what: &str) -> Result<TOk, KeyStoreError> {
    result.map_err(|e| match e {
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
            KeyStoreError::DuplicateValue(what.to_string())
        },
        e => KeyStoreError::DieselError(e),
    })
}

fn find_account(conn: &mut SqliteConnection, id: i32) -> Result<AccountSql, KeyStoreError> {
    accounts::table
        .find(id)
        .first::<AccountSql>(conn)
        .optional()?
        .ok_or_else(|| KeyStoreError::ValueNotFound(format!("account id {}", id)))
}

fn find_public_key(conn: &mut SqliteConnection, id: i32) -> Result<PublicKeySql, KeyStoreError> {
    public_keys::table
        .find(id)
        .first::<PublicKeySql>(conn)
        .optional()?
        .ok_or_else(|| KeyStoreError::ValueNotFound(format!("key id {}", id)))
}

fn next_system_key_serial(conn: &mut SqliteConnection) -> Result<i32, KeyStoreError> {
    let current = system_keys::table
        .select(max(system_keys::serial))
        .first::<Option<i32>>(conn)?;
    Ok(current.unwrap_or(0) + 1)
}

impl<TKeyStoreDbConnection> KeyStoreBackend for SqliteKeyStore<TKeyStoreDbConnection>
where TKeyStoreDbConnection: PooledDbConnection<Error = SqliteStorageError> + 'static
{
    // -- accounts --

    fn fetch_accounts(&self) -> Result<Vec<Account>, KeyStoreError> {
        let mut conn = self.connection()?;
        accounts::table
            .order((accounts::hostname.asc(), accounts::username.asc()))
            .load::<AccountSql>(&mut conn)?
            .into_iter()
            .map(Account::try_from)
            .collect()
    }

    fn fetch_active_accounts(&self) -> Result<Vec<Account>, KeyStoreError> {
        let mut conn = self.connection()?;
        accounts::table
            .filter(accounts::is_active.eq(true))
            .order((accounts::hostname.asc(), accounts::username.asc()))
            .load::<AccountSql>(&mut conn)?
            .into_iter()
            .map(Account::try_from)
            .collect()
    }

    fn fetch_account(&self, id: u32) -> Result<Option<Account>, KeyStoreError> {
        let mut conn = self.connection()?;
        accounts::table
            .find(into_i32(id, "account id")?)
            .first::<AccountSql>(&mut conn)
            .optional()?
            .map(Account::try_from)
            .transpose()
    }

    fn fetch_account_by_address(
        &self,
        username: &str,
        hostname: &str,
    ) -> Result<Option<Account>, KeyStoreError> {
        let mut conn = self.connection()?;
        accounts::table
            .filter(accounts::username.eq(username))
            .filter(accounts::hostname.eq(hostname))
            .first::<AccountSql>(&mut conn)
            .optional()?
            .map(Account::try_from)
            .transpose()
    }

    fn search_accounts(&self, query: &str) -> Result<Vec<Account>, KeyStoreError> {
        let mut conn = self.connection()?;
        let pattern = format!("%{}%", query);
        accounts::table
            .filter(
                accounts::username
                    .like(pattern.clone())
                    .or(accounts::hostname.like(pattern.clone()))
                    .or(accounts::label.like(pattern.clone()))
                    .or(accounts::tags.like(pattern)),
            )
            .order((accounts::hostname.asc(), accounts::username.asc()))
            .load::<AccountSql>(&mut conn)?
            .into_iter()
            .map(Account::try_from)
            .collect()
    }

    fn insert_account(&self, account: NewAccount) -> Result<Account, KeyStoreError> {
        let mut conn = self.connection()?;
        let row = NewAccountSql {
            username: account.username,
            hostname: account.hostname,
            label: account.label,
            tags: account.tags,
        };
        or_duplicate(
            diesel::insert_into(accounts::table).values(&row).execute(&mut conn),
            "username and hostname",
        )?;
        let id = diesel::select(last_insert_rowid()).get_result::<i32>(&mut conn)?;
        find_account(&mut conn, id).and_then(Account::try_from)
    }

    fn delete_account(&self, id: u32) -> Result<Account, KeyStoreError> {
        let mut conn = self.connection()?;
        let id = into_i32(id, "account id")?;
        let deleted = find_account(&mut conn, id)?;
        diesel::delete(accounts::table.find(id))
            .execute(&mut conn)
            .num_rows_affected_or_not_found(1)?;
        Account::try_from(deleted)
    }

    fn toggle_account_active(&self, id: u32) -> Result<Account, KeyStoreError> {
        let mut conn = self.connection()?;
        let id = into_i32(id, "account id")?;
        let current = find_account(&mut conn, id)?;
        diesel::update(accounts::table.find(id))
            .set(accounts::is_active.eq(!current.is_active))
            .execute(&mut conn)
            .num_rows_affected_or_not_found(1)?;
        find_account(&mut conn, id).and_then(Account::try_from)
    }

    fn update_account_label(&self, id: u32, label: &str) -> Result<Account, KeyStoreError> {
        self.update_account(id, UpdateAccountSql {
            label: Some(label.to_string()),
            ..Default::default()
        })
    }

    fn update_account_hostname(&self, id: u32, hostname: &str) -> Result<Account, KeyStoreError> {
        self.update_account(id, UpdateAccountSql {
            hostname: Some(hostname.to_string()),
            ..Default::default()
        })
    }

    fn update_account_tags(&self, id: u32, tags: &str) -> Result<Account, KeyStoreError> {
        self.update_account(id, UpdateAccountSql {
            tags: Some(tags.to_string()),
            ..Default::default()
        })
    }

    fn update_account_serial(&self, id: u32, serial: u32) -> Result<Account, KeyStoreError> {
        self.update_account(id, UpdateAccountSql {
            serial: Some(into_i32(serial, "account serial")?),
            ..Default::default()
        })
    }

    fn set_account_dirty(&self, id: u32, dirty: bool) -> Result<(), KeyStoreError> {
        self.update_account(id, UpdateAccountSql {
            is_dirty: Some(dirty),
            ..Default::default()
        })
        .map(|_| ())
    }

    fn update_account_key_hash(&self, id: u32, key_hash: Option<&str>) -> Result<(), KeyStoreError> {
        self.update_account(id, UpdateAccountSql {
            key_hash: Some(key_hash.map(ToString::to_string)),
            ..Default::default()
        })
        .map(|_| ())
    }

    // -- public keys --

    fn fetch_public_keys(&self) -> Result<Vec<PublicKey>, KeyStoreError> {
        let mut conn = self.connection()?;
        public_keys::table
            .order(public_keys::comment.asc())
            .load::<PublicKeySql>(&mut conn)?
            .into_iter()
            .map(PublicKey::try_from)
            .collect()
    }

    fn fetch_global_keys(&self) -> Result<Vec<PublicKey>, KeyStoreError> {
        let mut conn = self.connection()?;
        public_keys::table
            .filter(public_keys::is_global.eq(true))
            .order(public_keys::comment.asc())
            .load::<PublicKeySql>(&mut conn)?
            .into_iter()
            .map(PublicKey::try_from)
            .collect()
    }

    fn fetch_key_by_id(&self, id: u32) -> Result<Option<PublicKey>, KeyStoreError> {
        let mut conn = self.connection()?;
        public_keys::table
            .find(into_i32(id, "key id")?)
            .first::<PublicKeySql>(&mut conn)
            .optional()?
            .map(PublicKey::try_from)
            .transpose()
    }

    fn fetch_key_by_comment(&self, comment: &str) -> Result<Option<PublicKey>, KeyStoreError> {
        let mut conn = self.connection()?;
        public_keys::table
            .filter(public_keys::comment.eq(comment))
            .first::<PublicKeySql>(&mut conn)
            .optional()?
            .map(PublicKey::try_from)
            .transpose()
    }

    fn insert_public_key(&self, key: NewPublicKey) -> Result<PublicKey, KeyStoreError> {
        let mut conn = self.connection()?;
        let row = NewPublicKeySql {
            algorithm: key.algorithm,
            key_data: key.key_data,
            comment: key.comment,
            is_global: key.is_global,
            expires_at: None,
        };
        or_duplicate(
            diesel::insert_into(public_keys::table).values(&row).execute(&mut conn),
            "key comment",
        )?;
        let id = diesel::select(last_insert_rowid()).get_result::<i32>(&mut conn)?;
        find_public_key(&mut conn, id).and_then(PublicKey::try_from)
    }

    fn insert_public_key_checked(&self, key: NewPublicKey) -> Result<Option<PublicKey>, KeyStoreError> {
        match self.insert_public_key(key) {
            Ok(key) => Ok(Some(key)),
            Err(KeyStoreError::DuplicateValue(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn delete_public_key(&self, id: u32) -> Result<PublicKey, KeyStoreError> {
        let mut conn = self.connection()?;
        let id = into_i32(id, "key id")?;
        let deleted = find_public_key(&mut conn, id)?;
        diesel::delete(public_keys::table.find(id))
            .execute(&mut conn)
            .num_rows_affected_or_not_found(1)?;
        PublicKey::try_from(deleted)
    }

    fn toggle_key_global(&self, id: u32) -> Result<PublicKey, KeyStoreError> {
        let mut conn = self.connection()?;
        let id = into_i32(id, "key id")?;
        conn.transaction::<_, KeyStoreError, _>(|conn| {
            let current = find_public_key(conn, id)?;
            let becoming_global = !current.is_global;
            if becoming_global {
                // Invariant: no assignment row may reference a global key
                diesel::delete(account_keys::table.filter(account_keys::key_id.eq(id))).execute(conn)?;
            }
            diesel::update(public_keys::table.find(id))
                .set(public_keys::is_global.eq(becoming_global))
                .execute(conn)
                .num_rows_affected_or_not_found(1)?;
            find_public_key(conn, id).and_then(PublicKey::try_from)
        })
    }

    fn set_key_expiry(&self, id: u32, expires_at: Option<NaiveDateTime>) -> Result<PublicKey, KeyStoreError> {
        let mut conn = self.connection()?;
        let id = into_i32(id, "key id")?;
        diesel::update(public_keys::table.find(id))
            .set(public_keys::expires_at.eq(expires_at))
            .execute(&mut conn)
            .num_rows_affected_or_not_found(1)?;
        find_public_key(&mut conn, id).and_then(PublicKey::try_from)
    }

    fn assign_key(&self, key_id: u32, account_id: u32) -> Result<(), KeyStoreError> {
        let mut conn = self.connection()?;
        let key_id = into_i32(key_id, "key id")?;
        let account_id = into_i32(account_id, "account id")?;
        conn.transaction::<_, KeyStoreError, _>(|conn| {
            let key = find_public_key(conn, key_id)?;
            if key.is_global {
                return Err(KeyStoreError::InvalidAssignment(key.comment));
            }
            find_account(conn, account_id)?;
            or_duplicate(
                diesel::insert_into(account_keys::table)
                    .values(AccountKeySql { key_id, account_id })
                    .execute(conn),
                "key assignment",
            )?;
            Ok(())
        })
    }

    fn unassign_key(&self, key_id: u32, account_id: u32) -> Result<(), KeyStoreError> {
        let mut conn = self.connection()?;
        let removed = diesel::delete(
            account_keys::table
                .filter(account_keys::key_id.eq(into_i32(key_id, "key id")?))
                .filter(account_keys::account_id.eq(into_i32(account_id, "account id")?)),
        )
        .execute(&mut conn)?;
        if removed == 0 {
            return Err(KeyStoreError::ValueNotFound(format!(
                "assignment of key {} to account {}",
                key_id, account_id
            )));
        }
        Ok(())
    }

    fn fetch_keys_for_account(&self, account_id: u32) -> Result<Vec<PublicKey>, KeyStoreError> {
        let mut conn = self.connection()?;
        account_keys::table
            .inner_join(public_keys::table)
            .filter(account_keys::account_id.eq(into_i32(account_id, "account id")?))
            .select(public_keys::all_columns)
            .order(public_keys::comment.asc())
            .load::<PublicKeySql>(&mut conn)?
            .into_iter()
            .map(PublicKey::try_from)
            .collect()
    }

    fn fetch_accounts_for_key(&self, key_id: u32) -> Result<Vec<Account>, KeyStoreError> {
        let mut conn = self.connection()?;
        account_keys::table
            .inner_join(accounts::table)
            .filter(account_keys::key_id.eq(into_i32(key_id, "key id")?))
            .select(accounts::all_columns)
            .order((accounts::hostname.asc(), accounts::username.asc()))
            .load::<AccountSql>(&mut conn)?
            .into_iter()
            .map(Account::try_from)
            .collect()
    }

    // -- system keys --

    fn insert_system_key(&self, public_key: &str, private_key: &Secret) -> Result<SystemKey, KeyStoreError> {
        let mut conn = self.connection()?;
        conn.transaction::<_, KeyStoreError, _>(|conn| {
            let active_exists = system_keys::table
                .filter(system_keys::is_active.eq(true))
                .count()
                .get_result::<i64>(conn)? >
                0;
            if active_exists {
                return Err(KeyStoreError::DuplicateValue("active system key".to_string()));
            }
            let serial = next_system_key_serial(conn)?;
            diesel::insert_into(system_keys::table)
                .values(NewSystemKeySql {
                    serial,
                    public_key: public_key.to_string(),
                    private_key: private_key.bytes(),
                    is_active: true,
                })
                .execute(conn)?;
            system_keys::table
                .filter(system_keys::serial.eq(serial))
                .first::<SystemKeySql>(conn)
                .map_err(KeyStoreError::from)
                .and_then(SystemKey::try_from)
        })
    }

    fn rotate_system_key(&self, public_key: &str, private_key: &Secret) -> Result<SystemKey, KeyStoreError> {
        let mut conn = self.connection()?;
        conn.transaction::<_, KeyStoreError, _>(|conn| {
            diesel::update(system_keys::table)
                .set(system_keys::is_active.eq(false))
                .execute(conn)?;
            let serial = next_system_key_serial(conn)?;
            diesel::insert_into(system_keys::table)
                .values(NewSystemKeySql {
                    serial,
                    public_key: public_key.to_string(),
                    private_key: private_key.bytes(),
                    is_active: true,
                })
                .execute(conn)?;
            system_keys::table
                .filter(system_keys::serial.eq(serial))
                .first::<SystemKeySql>(conn)
                .map_err(KeyStoreError::from)
                .and_then(SystemKey::try_from)
        })
    }

    fn fetch_active_system_key(&self) -> Result<Option<SystemKey>, KeyStoreError> {
        let mut conn = self.connection()?;
        system_keys::table
            .filter(system_keys::is_active.eq(true))
            .first::<SystemKeySql>(&mut conn)
            .optional()?
            .map(SystemKey::try_from)
            .transpose()
    }

    fn fetch_system_key_by_serial(&self, serial: u32) -> Result<Option<SystemKey>, KeyStoreError> {
        let mut conn = self.connection()?;
        system_keys::table
            .filter(system_keys::serial.eq(into_i32(serial, "system key serial")?))
            .first::<SystemKeySql>(&mut conn)
            .optional()?
            .map(SystemKey::try_from)
            .transpose()
    }

    fn has_system_keys(&self) -> Result<bool, KeyStoreError> {
        let mut conn = self.connection()?;
        Ok(system_keys::table.count().get_result::<i64>(&mut conn)? > 0)
    }

    // -- known hosts --

    fn fetch_known_host(&self, hostname: &str) -> Result<Option<KnownHost>, KeyStoreError> {
        let mut conn = self.connection()?;
        Ok(known_hosts::table
            .find(hostname)
            .first::<KnownHostSql>(&mut conn)
            .optional()?
            .map(KnownHost::from))
    }

    fn upsert_known_host(&self, hostname: &str, key: &str) -> Result<(), KeyStoreError> {
        let mut conn = self.connection()?;
        diesel::replace_into(known_hosts::table)
            .values(KnownHostSql {
                hostname: hostname.to_string(),
                key: key.to_string(),
            })
            .execute(&mut conn)?;
        Ok(())
    }

    // -- audit log --

    fn append_audit_entry(&self, username: &str, action: &str, details: &str) -> Result<(), KeyStoreError> {
        let mut conn = self.connection()?;
        diesel::insert_into(audit_log::table)
            .values(NewAuditEntrySql {
                timestamp: Utc::now().naive_utc(),
                username: username.to_string(),
                action: action.to_string(),
                details: details.to_string(),
            })
            .execute(&mut conn)?;
        Ok(())
    }

    fn fetch_audit_log(&self) -> Result<Vec<AuditLogEntry>, KeyStoreError> {
        let mut conn = self.connection()?;
        audit_log::table
            .order((audit_log::timestamp.desc(), audit_log::id.desc()))
            .load::<AuditEntrySql>(&mut conn)?
            .into_iter()
            .map(AuditLogEntry::try_from)
            .collect()
    }

    // -- bootstrap sessions --

    fn save_bootstrap_session(&self, session: &BootstrapSession) -> Result<(), KeyStoreError> {
        let mut conn = self.connection()?;
        diesel::replace_into(bootstrap_sessions::table)
            .values(BootstrapSessionSql::from(session))
            .execute(&mut conn)?;
        Ok(())
    }

    fn fetch_bootstrap_session(&self, id: &str) -> Result<Option<BootstrapSession>, KeyStoreError> {
        let mut conn = self.connection()?;
        bootstrap_sessions::table
            .find(id)
            .first::<BootstrapSessionSql>(&mut conn)
            .optional()?
            .map(BootstrapSession::try_from)
            .transpose()
    }

    fn delete_bootstrap_session(&self, id: &str) -> Result<(), KeyStoreError> {
        let mut conn = self.connection()?;
        diesel::delete(bootstrap_sessions::table.find(id))
            .execute(&mut conn)
            .num_rows_affected_or_not_found(1)?;
        Ok(())
    }

    fn set_bootstrap_status(&self, id: &str, status: BootstrapStatus) -> Result<(), KeyStoreError> {
        let mut conn = self.connection()?;
        diesel::update(bootstrap_sessions::table.find(id))
            .set(bootstrap_sessions::status.eq(status.to_string()))
            .execute(&mut conn)
            .num_rows_affected_or_not_found(1)?;
        Ok(())
    }

    fn fetch_expired_bootstrap_sessions(
        &self,
        now: NaiveDateTime,
    ) -> Result<Vec<BootstrapSession>, KeyStoreError> {
        let mut conn = self.connection()?;
        bootstrap_sessions::table
            .filter(bootstrap_sessions::expires_at.le(now))
            .filter(bootstrap_sessions::status.eq_any(vec![
                BootstrapStatus::Active.to_string(),
                BootstrapStatus::Committing.to_string(),
            ]))
            .order(bootstrap_sessions::expires_at.asc())
            .load::<BootstrapSessionSql>(&mut conn)?
            .into_iter()
            .map(BootstrapSession::try_from)
            .collect()
    }

    fn fetch_orphaned_bootstrap_sessions(&self) -> Result<Vec<BootstrapSession>, KeyStoreError> {
        let mut conn = self.connection()?;
        bootstrap_sessions::table
            .filter(bootstrap_sessions::status.eq_any(vec![
                BootstrapStatus::Orphaned.to_string(),
                BootstrapStatus::Failed.to_string(),
            ]))
            .order(bootstrap_sessions::created_at.asc())
            .load::<BootstrapSessionSql>(&mut conn)?
            .into_iter()
            .map(BootstrapSession::try_from)
            .collect()
    }

    // -- drift events --

    fn insert_drift_event(
        &self,
        account_id: u32,
        severity: DriftSeverity,
        details: &str,
    ) -> Result<DriftEvent, KeyStoreError> {
        let mut conn = self.connection()?;
        diesel::insert_into(drift_events::table)
            .values(NewDriftEventSql {
                account_id: into_i32(account_id, "account id")?,
                drift_type: severity.to_string(),
                details: details.to_string(),
                detected_at: Utc::now().naive_utc(),
                was_remediated: false,
            })
            .execute(&mut conn)?;
        let id = diesel::select(last_insert_rowid()).get_result::<i32>(&mut conn)?;
        drift_events::table
            .find(id)
            .first::<DriftEventSql>(&mut conn)
            .map_err(KeyStoreError::from)
            .and_then(DriftEvent::try_from)
    }

    fn mark_drift_remediated(&self, event_id: u32) -> Result<(), KeyStoreError> {
        let mut conn = self.connection()?;
        diesel::update(drift_events::table.find(into_i32(event_id, "drift event id")?))
            .set((
                drift_events::was_remediated.eq(true),
                drift_events::remediated_at.eq(Some(Utc::now().naive_utc())),
            ))
            .execute(&mut conn)
            .num_rows_affected_or_not_found(1)?;
        Ok(())
    }

    fn fetch_drift_events_for_account(&self, account_id: u32) -> Result<Vec<DriftEvent>, KeyStoreError> {
        let mut conn = self.connection()?;
        drift_events::table
            .filter(drift_events::account_id.eq(into_i32(account_id, "account id")?))
            .order(drift_events::detected_at.desc())
            .load::<DriftEventSql>(&mut conn)?
            .into_iter()
            .map(DriftEvent::try_from)
            .collect()
    }

    fn fetch_drift_events_by_host(&self, hostname: &str) -> Result<Vec<DriftEvent>, KeyStoreError> {
        let mut conn = self.connection()?;
        drift_events::table
            .inner_join(accounts::table)
            .filter(accounts::hostname.eq(hostname))
            .select(drift_events::all_columns)
            .order(drift_events::detected_at.desc())
            .load::<DriftEventSql>(&mut conn)?
            .into_iter()
            .map(DriftEvent::try_from)
            .collect()
    }

    fn fetch_recent_drift_events(&self, limit: usize) -> Result<Vec<DriftEvent>, KeyStoreError> {
        let mut conn = self.connection()?;
        drift_events::table
            .order(drift_events::detected_at.desc())
            .limit(limit as i64)
            .load::<DriftEventSql>(&mut conn)?
            .into_iter()
            .map(DriftEvent::try_from)
            .collect()
    }

    fn fetch_drift_stats(&self) -> Result<DriftStats, KeyStoreError> {
        let mut conn = self.connection()?;
        let events = drift_events::table.load::<DriftEventSql>(&mut conn)?;
        let mut stats = DriftStats {
            total: events.len(),
            ..Default::default()
        };
        for event in events {
            let event = DriftEvent::try_from(event)?;
            match event.severity {
                DriftSeverity::Critical => stats.critical += 1,
                DriftSeverity::Warning => stats.warning += 1,
                DriftSeverity::Info => stats.info += 1,
            }
            if !event.was_remediated {
                stats.unremediated += 1;
            }
        }
        Ok(stats)
    }

    // -- backup --

    fn export_snapshot(&self) -> Result<StoreSnapshot, KeyStoreError> {
        let mut conn = self.connection()?;
        conn.transaction::<_, KeyStoreError, _>(|conn| {
            Ok(StoreSnapshot {
                accounts: accounts::table
                    .load::<AccountSql>(conn)?
                    .into_iter()
                    .map(TryFrom::try_from)
                    .collect::<Result<_, _>>()?,
                public_keys: public_keys::table
                    .load::<PublicKeySql>(conn)?
                    .into_iter()
                    .map(TryFrom::try_from)
                    .collect::<Result<_, _>>()?,
                account_keys: account_keys::table
                    .load::<AccountKeySql>(conn)?
                    .into_iter()
                    .map(TryFrom::try_from)
                    .collect::<Result<_, _>>()?,
                system_keys: system_keys::table
                    .order(system_keys::serial.asc())
                    .load::<SystemKeySql>(conn)?
                    .into_iter()
                    .map(TryFrom::try_from)
                    .collect::<Result<_, _>>()?,
                known_hosts: known_hosts::table
                    .load::<KnownHostSql>(conn)?
                    .into_iter()
                    .map(From::from)
                    .collect(),
                audit_log: audit_log::table
                    .order(audit_log::timestamp.asc())
                    .load::<AuditEntrySql>(conn)?
                    .into_iter()
                    .map(From::from)
                    .collect(),
            })
        })
    }

    fn import_snapshot(&self, snapshot: &StoreSnapshot) -> Result<(), KeyStoreError> {
        let mut conn = self.connection()?;
        conn.transaction::<_, KeyStoreError, _>(|conn| {
            diesel::delete(account_keys::table).execute(conn)?;
            diesel::delete(drift_events::table).execute(conn)?;
            diesel::delete(bootstrap_sessions::table).execute(conn)?;
            diesel::delete(accounts::table).execute(conn)?;
            diesel::delete(public_keys::table).execute(conn)?;
            diesel::delete(system_keys::table).execute(conn)?;
            diesel::delete(known_hosts::table).execute(conn)?;
            diesel::delete(audit_log::table).execute(conn)?;

            for account in &snapshot.accounts {
                diesel::insert_into(accounts::table)
                    .values(AccountSql::try_from(account)?)
                    .execute(conn)?;
            }
            for key in &snapshot.public_keys {
                diesel::insert_into(public_keys::table)
                    .values(PublicKeySql::try_from(key)?)
                    .execute(conn)?;
            }
            for assignment in &snapshot.account_keys {
                diesel::insert_into(account_keys::table)
                    .values(AccountKeySql {
                        key_id: into_i32(assignment.key_id, "key id")?,
                        account_id: into_i32(assignment.account_id, "account id")?,
                    })
                    .execute(conn)?;
            }
            for system_key in &snapshot.system_keys {
                diesel::insert_into(system_keys::table)
                    .values(NewSystemKeySql {
                        serial: into_i32(system_key.serial, "system key serial")?,
                        public_key: system_key.public_key.clone(),
                        private_key: system_key.private_key.clone(),
                        is_active: system_key.is_active,
                    })
                    .execute(conn)?;
            }
            for host in &snapshot.known_hosts {
                diesel::insert_into(known_hosts::table)
                    .values(KnownHostSql {
                        hostname: host.hostname.clone(),
                        key: host.key.clone(),
                    })
                    .execute(conn)?;
            }
            for entry in &snapshot.audit_log {
                diesel::insert_into(audit_log::table)
                    .values(NewAuditEntrySql {
                        timestamp: entry.timestamp,
                        username: entry.username.clone(),
                        action: entry.action.clone(),
                        details: entry.details.clone(),
                    })
                    .execute(conn)?;
            }
            Ok(())
        })
    }

    fn integrate_snapshot(&self, snapshot: &StoreSnapshot) -> Result<IntegrateOutcome, KeyStoreError> {
        use std::collections::HashMap;

        let mut conn = self.connection()?;
        conn.transaction::<_, KeyStoreError, _>(|conn| {
            let mut outcome = IntegrateOutcome::default();
            // snapshot ids are remapped onto this store's ids, keyed by the natural keys
            let mut account_ids = HashMap::new();
            let mut key_ids = HashMap::new();

            for account in &snapshot.accounts {
                let existing = accounts::table
                    .filter(accounts::username.eq(&account.username))
                    .filter(accounts::hostname.eq(&account.hostname))
                    .first::<AccountSql>(conn)
                    .optional()?;
                match existing {
                    Some(row) => {
                        outcome.accounts_skipped += 1;
                        account_ids.insert(account.id, row.id);
                    },
                    None => {
                        diesel::insert_into(accounts::table)
                            .values(NewAccountSql {
                                username: account.username.clone(),
                                hostname: account.hostname.clone(),
                                label: account.label.clone(),
                                tags: account.tags.clone(),
                            })
                            .execute(conn)?;
                        let id = diesel::select(last_insert_rowid()).get_result::<i32>(conn)?;
                        outcome.accounts_added += 1;
                        account_ids.insert(account.id, id);
                    },
                }
            }

            for key in &snapshot.public_keys {
                let existing = public_keys::table
                    .filter(public_keys::comment.eq(&key.comment))
                    .first::<PublicKeySql>(conn)
                    .optional()?;
                match existing {
                    Some(row) => {
                        outcome.keys_skipped += 1;
                        key_ids.insert(key.id, row.id);
                    },
                    None => {
                        diesel::insert_into(public_keys::table)
                            .values(NewPublicKeySql {
                                algorithm: key.algorithm.clone(),
                                key_data: key.key_data.clone(),
                                comment: key.comment.clone(),
                                is_global: key.is_global,
                                expires_at: key.expires_at,
                            })
                            .execute(conn)?;
                        let id = diesel::select(last_insert_rowid()).get_result::<i32>(conn)?;
                        outcome.keys_added += 1;
                        key_ids.insert(key.id, id);
                    },
                }
            }

            for assignment in &snapshot.account_keys {
                let (Some(&key_id), Some(&account_id)) = (
                    key_ids.get(&assignment.key_id),
                    account_ids.get(&assignment.account_id),
                ) else {
                    continue;
                };
                let key = find_public_key(conn, key_id)?;
                if key.is_global {
                    continue;
                }
                let exists = account_keys::table
                    .filter(account_keys::key_id.eq(key_id))
                    .filter(account_keys::account_id.eq(account_id))
                    .count()
                    .get_result::<i64>(conn)? >
                    0;
                if !exists {
                    diesel::insert_into(account_keys::table)
                        .values(AccountKeySql { key_id, account_id })
                        .execute(conn)?;
                    outcome.assignments_added += 1;
                }
            }

            // Foreign system keys are merged inactive; the local active key stays authoritative
            for system_key in &snapshot.system_keys {
                let serial = into_i32(system_key.serial, "system key serial")?;
                let exists = system_keys::table
                    .filter(system_keys::serial.eq(serial))
                    .count()
                    .get_result::<i64>(conn)? >
                    0;
                if !exists {
                    diesel::insert_into(system_keys::table)
                        .values(NewSystemKeySql {
                            serial,
                            public_key: system_key.public_key.clone(),
                            private_key: system_key.private_key.clone(),
                            is_active: false,
                        })
                        .execute(conn)?;
                }
            }

            for host in &snapshot.known_hosts {
                let exists = known_hosts::table
                    .find(&host.hostname)
                    .first::<KnownHostSql>(conn)
                    .optional()?
                    .is_some();
                if !exists {
                    diesel::insert_into(known_hosts::table)
                        .values(KnownHostSql {
                            hostname: host.hostname.clone(),
                            key: host.key.clone(),
                        })
                        .execute(conn)?;
                    outcome.known_hosts_added += 1;
                }
            }

            Ok(outcome)
        })
    }
}

impl<TKeyStoreDbConnection> SqliteKeyStore<TKeyStoreDbConnection>
where TKeyStoreDbConnection: PooledDbConnection<Error = SqliteStorageError>
{
    fn update_account(&self, id: u32, update: UpdateAccountSql) -> Result<Account, KeyStoreError> {
        let mut conn = self.connection()?;
        let id = into_i32(id, "account id")?;
        let rows = or_duplicate(
            diesel::update(accounts::table.find(id)).set(update).execute(&mut conn),
            "username and hostname",
        )?;
        if rows == 0 {
            return Err(KeyStoreError::ValueNotFound(format!("account id {}", id)));
        }
        find_account(&mut conn, id).and_then(Account::try_from)
    }
}
