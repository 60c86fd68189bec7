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

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// A managed `user@host` account. `serial` records the system key last successfully deployed to
/// the account; 0 means the account has never been deployed. `key_hash`, when present, is the
/// SHA-256 of the canonical generator output last installed on the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: u32,
    pub username: String,
    pub hostname: String,
    pub label: String,
    pub tags: String,
    pub serial: u32,
    pub is_active: bool,
    pub is_dirty: bool,
    pub key_hash: Option<String>,
}

impl Account {
    /// The `user@host` form used in audit details and connection errors
    pub fn address(&self) -> String {
        format!("{}@{}", self.username, self.hostname)
    }

    /// Tags are stored as a single comma or semicolon separated string
    pub fn tag_list(&self) -> Vec<String> {
        self.tags
            .split([',', ';'])
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(ToString::to_string)
            .collect()
    }

    pub fn has_been_deployed(&self) -> bool {
        self.serial > 0
    }
}

impl Display for Account {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.username, self.hostname)?;
        if !self.label.is_empty() {
            write!(f, " ({})", self.label)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn account() -> Account {
        Account {
            id: 1,
            username: "deploy".to_string(),
            hostname: "files.example.org".to_string(),
            label: "archive".to_string(),
            tags: "prod, dmz;backup".to_string(),
            serial: 3,
            is_active: true,
            is_dirty: false,
            key_hash: None,
        }
    }

    #[test]
    fn address_is_user_at_host() {
        assert_eq!(account().address(), "deploy@files.example.org");
    }

    #[test]
    fn tags_split_on_commas_and_semicolons() {
        assert_eq!(account().tag_list(), vec!["prod", "dmz", "backup"]);
    }

    #[test]
    fn display_includes_label_when_set() {
        assert_eq!(account().to_string(), "deploy@files.example.org (archive)");
    }
}
