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

#![allow(dead_code)]

use keymaster_common_sqlite::connection::DbConnection;
use keymaster_core::{
    storage::{KeyStoreDatabase, NewAccount, NewPublicKey, SqliteKeyStore},
    types::{Account, PublicKey, Secret, SystemKey},
};
use keymaster_test_utils::{paths::create_temporary_data_path, random};

pub type TestDatabase = KeyStoreDatabase<SqliteKeyStore<DbConnection>>;

pub const HOST_KEY_LINE: &str = "ssh-ed25519 AAAAHOSTKEY files.example.org";

/// A fresh sqlite-backed store in a temporary directory
pub fn store() -> TestDatabase {
    let path = create_temporary_data_path().join(format!("{}.sqlite3", random::string(8)));
    let db = DbConnection::connect_path(path).unwrap();
    KeyStoreDatabase::new(SqliteKeyStore::init(db))
}

pub fn add_account(db: &TestDatabase, username: &str, hostname: &str) -> Account {
    db.add_account(NewAccount {
        username: username.to_string(),
        hostname: hostname.to_string(),
        label: String::new(),
        tags: String::new(),
    })
    .unwrap()
}

pub fn add_key(db: &TestDatabase, algorithm: &str, data: &str, comment: &str, is_global: bool) -> PublicKey {
    db.add_public_key(NewPublicKey {
        algorithm: algorithm.to_string(),
        key_data: data.to_string(),
        comment: comment.to_string(),
        is_global,
    })
    .unwrap()
}

/// Create the first system key (serial 1) with the given PEM bytes
pub fn add_system_key(db: &TestDatabase, public_key: &str, pem: &str) -> SystemKey {
    db.create_system_key(public_key, &Secret::from(pem)).unwrap()
}

/// Rotate until the active system key carries the wanted serial
pub fn rotate_to_serial(db: &TestDatabase, serial: u32, public_key: &str, pem: &str) -> SystemKey {
    if !db.has_system_keys().unwrap() {
        db.create_system_key(public_key, &Secret::from(pem)).unwrap();
    }
    loop {
        let active = db.get_active_system_key().unwrap().unwrap();
        if active.serial >= serial {
            return active;
        }
        db.rotate_system_key(public_key, &Secret::from(pem)).unwrap();
    }
}
