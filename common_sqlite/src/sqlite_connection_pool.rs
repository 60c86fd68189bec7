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

use std::time::Duration;

use diesel::{
    connection::SimpleConnection,
    r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection},
    SqliteConnection,
};
use log::*;

use crate::error::SqliteStorageError;

const LOG_TARGET: &str = "keymaster::common_sqlite::pool";

const DEFAULT_POOL_SIZE: u32 = 8;
const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);
const BUSY_TIMEOUT_MS: u32 = 5_000;

/// Capability trait over anything that can lend out pooled sqlite connections. Storage backends
/// are generic over this so tests can substitute their own pool.
pub trait PooledDbConnection: Send + Sync + Clone {
    type Error;

    fn get_pooled_connection(
        &self,
    ) -> Result<PooledConnection<ConnectionManager<SqliteConnection>>, Self::Error>;
}

/// Applied to every fresh connection before it enters the pool. Foreign keys are off by default
/// in sqlite and the schema relies on CASCADE deletes.
#[derive(Debug, Clone, Copy)]
struct ConnectionOptions;

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for ConnectionOptions {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        conn.batch_execute(&format!(
            "PRAGMA foreign_keys = ON; PRAGMA busy_timeout = {};",
            BUSY_TIMEOUT_MS
        ))
        .map_err(diesel::r2d2::Error::QueryError)
    }
}

#[derive(Clone)]
pub struct SqliteConnectionPool {
    pool: Option<Pool<ConnectionManager<SqliteConnection>>>,
    db_url: String,
    pool_size: u32,
    connection_timeout: Duration,
}

impl SqliteConnectionPool {
    pub fn new(db_url: String) -> Self {
        Self {
            pool: None,
            db_url,
            pool_size: DEFAULT_POOL_SIZE,
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
        }
    }

    pub fn with_pool_size(mut self, pool_size: u32) -> Self {
        self.pool_size = pool_size;
        self
    }

    /// Create the pool if it has not been created yet, otherwise this is a no-op
    pub fn create_pool(&mut self) -> Result<(), SqliteStorageError> {
        if self.pool.is_none() {
            let pool = Pool::builder()
                .max_size(self.pool_size)
                .connection_timeout(self.connection_timeout)
                .connection_customizer(Box::new(ConnectionOptions))
                .build(ConnectionManager::<SqliteConnection>::new(self.db_url.clone()))
                .map_err(|e| SqliteStorageError::DieselR2d2Error(e.to_string()))?;
            self.pool = Some(pool);
        } else {
            warn!(
                target: LOG_TARGET,
                "Connection pool for {} already exists", self.db_url
            );
        }
        Ok(())
    }

    pub fn get_pooled_connection(
        &self,
    ) -> Result<PooledConnection<ConnectionManager<SqliteConnection>>, SqliteStorageError> {
        self.pool
            .as_ref()
            .ok_or_else(|| {
                SqliteStorageError::DieselR2d2Error("A connection pool has not been created".to_string())
            })?
            .get()
            .map_err(|e| SqliteStorageError::DieselR2d2Error(e.to_string()))
    }
}
