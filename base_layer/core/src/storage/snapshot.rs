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

/// A full, transactionally consistent export of the durable store state. Bootstrap sessions and
/// drift events are operational records tied to one instance and are not part of a snapshot.
///
/// Snapshots are a trusted backup artifact: system-key private material is carried as raw bytes
/// here, not behind the display redaction of [`crate::types::Secret`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub accounts: Vec<AccountSnapshot>,
    pub public_keys: Vec<PublicKeySnapshot>,
    pub account_keys: Vec<AccountKeySnapshot>,
    pub system_keys: Vec<SystemKeySnapshot>,
    pub known_hosts: Vec<KnownHostSnapshot>,
    pub audit_log: Vec<AuditEntrySnapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountSnapshot {
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

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeySnapshot {
    pub id: u32,
    pub algorithm: String,
    pub key_data: String,
    pub comment: String,
    pub is_global: bool,
    pub expires_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountKeySnapshot {
    pub key_id: u32,
    pub account_id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemKeySnapshot {
    pub serial: u32,
    pub public_key: String,
    pub private_key: Vec<u8>,
    pub is_active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownHostSnapshot {
    pub hostname: String,
    pub key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntrySnapshot {
    pub timestamp: NaiveDateTime,
    pub username: String,
    pub action: String,
    pub details: String,
}

/// Counters reported by a snapshot integration, where duplicates on natural keys are skipped
/// rather than replaced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrateOutcome {
    pub accounts_added: usize,
    pub accounts_skipped: usize,
    pub keys_added: usize,
    pub keys_skipped: usize,
    pub assignments_added: usize,
    pub known_hosts_added: usize,
}
