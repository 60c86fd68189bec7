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

use std::path::{Path, PathBuf};

use diesel::{
    r2d2::{ConnectionManager, PooledConnection},
    SqliteConnection,
};
use log::*;

use crate::{
    error::SqliteStorageError,
    sqlite_connection_pool::{PooledDbConnection, SqliteConnectionPool},
};

const LOG_TARGET: &str = "keymaster::common_sqlite::connection";

/// The location of a sqlite database, either a file on disk or a named shared in-memory database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DbConnectionUrl {
    File(PathBuf),
    MemoryShared(String),
}

impl DbConnectionUrl {
    pub fn file<P: AsRef<Path>>(path: P) -> Self {
        DbConnectionUrl::File(path.as_ref().to_path_buf())
    }

    pub fn memory_shared<T: Into<String>>(identifier: T) -> Self {
        DbConnectionUrl::MemoryShared(identifier.into())
    }

    /// The connection string handed to diesel
    pub fn value(&self) -> Result<String, SqliteStorageError> {
        match self {
            DbConnectionUrl::File(path) => path
                .to_str()
                .map(ToString::to_string)
                .ok_or(SqliteStorageError::InvalidUnicodePath),
            DbConnectionUrl::MemoryShared(identifier) => {
                Ok(format!("file:{}?mode=memory&cache=shared", identifier))
            },
        }
    }
}

impl TryFrom<String> for DbConnectionUrl {
    type Error = SqliteStorageError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Ok(DbConnectionUrl::file(value))
    }
}

/// A shared handle to a pool of connections to a single sqlite database
#[derive(Clone)]
pub struct DbConnection {
    pool: SqliteConnectionPool,
}

impl DbConnection {
    /// Connect to the database at the given file path, creating it if it does not exist
    pub fn connect_path<P: AsRef<Path>>(path: P) -> Result<Self, SqliteStorageError> {
        Self::connect_url(&DbConnectionUrl::file(path))
    }

    /// Connect to a named in-memory database, useful for tests
    pub fn connect_memory(name: String) -> Result<Self, SqliteStorageError> {
        Self::connect_url(&DbConnectionUrl::memory_shared(name))
    }

    pub fn connect_url(db_url: &DbConnectionUrl) -> Result<Self, SqliteStorageError> {
        debug!(target: LOG_TARGET, "Connecting to sqlite database '{:?}'", db_url);
        let mut pool = SqliteConnectionPool::new(db_url.value()?);
        pool.create_pool()?;
        Ok(Self { pool })
    }
}

impl PooledDbConnection for DbConnection {
    type Error = SqliteStorageError;

    fn get_pooled_connection(
        &self,
    ) -> Result<PooledConnection<ConnectionManager<SqliteConnection>>, Self::Error> {
        self.pool.get_pooled_connection()
    }
}

#[cfg(test)]
mod test {
    use keymaster_test_utils::random;

    use super::*;

    #[test]
    fn memory_url_value() {
        let url = DbConnectionUrl::memory_shared("abc".to_string());
        assert_eq!(url.value().unwrap(), "file:abc?mode=memory&cache=shared");
    }

    #[test]
    fn connect_and_fetch_connection() {
        let db = DbConnection::connect_memory(random::string(8)).unwrap();
        db.get_pooled_connection().unwrap();
    }
}
