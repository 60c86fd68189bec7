// Copyright 2023. The Keymaster Project
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

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SqliteStorageError {
    #[error("Database connection error: {0}")]
    ConnectionError(#[from] diesel::ConnectionError),
    #[error("Database error: {0}")]
    DieselError(#[from] diesel::result::Error),
    #[error("Diesel R2d2 error: {0}")]
    DieselR2d2Error(String),
    #[error("Database migration error: {0}")]
    MigrationError(String),
    #[error("Database path contained non-UTF8 characters")]
    InvalidUnicodePath,
    #[error("Expected exactly {expected} row(s) to be affected but {actual} were")]
    UnexpectedRowCount { expected: usize, actual: usize },
}

impl SqliteStorageError {
    /// True when the underlying sqlite error indicates write contention on a busy database.
    pub fn is_database_locked(&self) -> bool {
        match self {
            SqliteStorageError::DieselError(diesel::result::Error::DatabaseError(_, info)) => {
                info.message().contains("database is locked")
            },
            SqliteStorageError::DieselR2d2Error(msg) => msg.contains("database is locked"),
            _ => false,
        }
    }
}
