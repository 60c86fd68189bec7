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

use keymaster_common_sqlite::error::SqliteStorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum KeyStoreError {
    #[error("Value not found: {0}")]
    ValueNotFound(String),
    #[error("A record with that {0} already exists")]
    DuplicateValue(String),
    #[error("Cannot assign global key '{0}' to an account")]
    InvalidAssignment(String),
    #[error("No active system key exists")]
    NoActiveSystemKey,
    #[error("Conversion error: {0}")]
    ConversionError(String),
    #[error("Storage error: {0}")]
    SqliteStorageError(#[from] SqliteStorageError),
    #[error("Database error: {0}")]
    DieselError(#[from] diesel::result::Error),
}

impl KeyStoreError {
    /// True when the error is sqlite write contention that a short backoff may clear
    pub fn is_database_locked(&self) -> bool {
        match self {
            KeyStoreError::SqliteStorageError(e) => e.is_database_locked(),
            KeyStoreError::DieselError(diesel::result::Error::DatabaseError(_, info)) => {
                info.message().contains("database is locked")
            },
            _ => false,
        }
    }
}
