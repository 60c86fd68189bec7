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

use base64::{
    engine::general_purpose::{STANDARD, STANDARD_NO_PAD},
    Engine,
};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::types::Secret;

/// A user public key. `comment` is unique across the store and doubles as the key's display
/// name. Global keys are deployed to every active account and can never be assigned to a single
/// account. `expires_at` of `None` means the key never expires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKey {
    pub id: u32,
    pub algorithm: String,
    pub key_data: String,
    pub comment: String,
    pub is_global: bool,
    pub expires_at: Option<NaiveDateTime>,
}

impl PublicKey {
    pub fn is_expired(&self, now: NaiveDateTime) -> bool {
        self.expires_at.map(|e| e <= now).unwrap_or(false)
    }

    /// The exact line this key contributes to an authorized_keys file
    pub fn authorized_keys_line(&self) -> String {
        if self.comment.is_empty() {
            format!("{} {}", self.algorithm, self.key_data)
        } else {
            format!("{} {} {}", self.algorithm, self.key_data, self.comment)
        }
    }

    /// OpenSSH-style SHA-256 fingerprint (`SHA256:<base64>` without padding), or `None` when the
    /// key data is not valid base64.
    pub fn fingerprint_sha256(&self) -> Option<String> {
        fingerprint_sha256(&self.key_data)
    }
}

/// Fingerprint an authorized-keys base64 blob the way `ssh-keygen -lf` renders it
pub fn fingerprint_sha256(key_data: &str) -> Option<String> {
    let blob = STANDARD.decode(key_data.trim()).ok()?;
    let digest = Sha256::digest(&blob);
    Some(format!("SHA256:{}", STANDARD_NO_PAD.encode(digest)))
}

/// A Keymaster-owned system keypair. The public half is deployed (with SFTP-only restrictions)
/// to every managed host; the private half is the connection identity for deploy, audit and
/// decommission runs. Serials are unique and strictly increasing; at most one system key is
/// active at a time.
#[derive(Debug)]
pub struct SystemKey {
    pub id: u32,
    pub serial: u32,
    pub public_key: String,
    pub private_key: Secret,
    pub is_active: bool,
}

/// A trusted host key, recorded on first use. `hostname` is the canonical `host:port` form and
/// `key` the full authorized-keys rendering of the presented host key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnownHost {
    pub hostname: String,
    pub key: String,
}

/// One append-only audit log record. `username` is the OS user that initiated the action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: u32,
    pub timestamp: NaiveDateTime,
    pub username: String,
    pub action: String,
    pub details: String,
}
