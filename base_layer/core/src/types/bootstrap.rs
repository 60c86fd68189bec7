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

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Lifecycle of a bootstrap session: `active → committing → {completed | failed}`, with expired
/// sessions moved to `orphaned` by the sweeper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum BootstrapStatus {
    Active,
    Committing,
    Completed,
    Failed,
    Orphaned,
}

/// A short-lived record that lets Keymaster install its system key on a new host through an
/// ephemeral keypair. The private half never touches the database; only the OpenSSH rendering of
/// the public half is stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapSession {
    /// 16 random bytes, hex encoded
    pub id: String,
    pub username: String,
    pub hostname: String,
    pub label: String,
    pub tags: String,
    pub temp_public_key: String,
    pub created_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
    pub status: BootstrapStatus,
}

impl BootstrapSession {
    pub fn is_expired(&self, now: NaiveDateTime) -> bool {
        now >= self.expires_at
    }

    pub fn address(&self) -> String {
        format!("{}@{}", self.username, self.hostname)
    }
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            BootstrapStatus::Active,
            BootstrapStatus::Committing,
            BootstrapStatus::Completed,
            BootstrapStatus::Failed,
            BootstrapStatus::Orphaned,
        ] {
            assert_eq!(BootstrapStatus::from_str(&status.to_string()).unwrap(), status);
        }
    }

    #[test]
    fn status_strings_are_lowercase() {
        assert_eq!(BootstrapStatus::Committing.to_string(), "committing");
    }
}
