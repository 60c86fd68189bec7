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

use std::collections::HashSet;

use chrono::Utc;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::{
    consts::{MANAGED_HEADER_PREFIX, SYSTEM_KEY_RESTRICTIONS, USER_KEYS_HEADER},
    storage::{KeyStoreBackend, KeyStoreDatabase, KeyStoreError},
    types::PublicKey,
};

#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("No active system key exists")]
    NoActiveSystemKey,
    #[error("No system key exists with serial {0}")]
    UnknownSystemKeySerial(u32),
    #[error("Account {0} does not exist")]
    AccountNotFound(u32),
    #[error("Key store error: {0}")]
    KeyStoreError(#[from] KeyStoreError),
}

/// Canonical generator output for one account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedKeys {
    pub content: Vec<u8>,
    /// The system key serial embedded in the header; 0 when the system key block was omitted
    pub serial: u32,
}

impl GeneratedKeys {
    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    pub fn hash(&self) -> String {
        hash_authorized_keys_content(&self.content)
    }
}

/// Build the canonical authorized_keys payload for an account.
///
/// A `serial` of 0 selects the currently active system key; any other value selects that exact
/// system key and fails when the store no longer holds it.
pub fn generate_for_account<T: KeyStoreBackend + 'static>(
    db: &KeyStoreDatabase<T>,
    account_id: u32,
    serial: u32,
) -> Result<GeneratedKeys, GeneratorError> {
    generate_for_account_selective(db, account_id, serial, &HashSet::new(), false)
}

/// Selective variant of [`generate_for_account`]: keys in `exclude_key_ids` are dropped from the
/// user block, and `remove_system_key` omits the header and system-key line entirely.
pub fn generate_for_account_selective<T: KeyStoreBackend + 'static>(
    db: &KeyStoreDatabase<T>,
    account_id: u32,
    serial: u32,
    exclude_key_ids: &HashSet<u32>,
    remove_system_key: bool,
) -> Result<GeneratedKeys, GeneratorError> {
    if db.get_account(account_id)?.is_none() {
        return Err(GeneratorError::AccountNotFound(account_id));
    }

    let system = if remove_system_key {
        None
    } else if serial == 0 {
        Some(db.get_active_system_key()?.ok_or(GeneratorError::NoActiveSystemKey)?)
    } else {
        Some(
            db.get_system_key_by_serial(serial)?
                .ok_or(GeneratorError::UnknownSystemKeySerial(serial))?,
        )
    };

    let user_keys = collect_user_keys(db, account_id, exclude_key_ids)?;
    let system_line = system.as_ref().map(|s| (s.public_key.as_str(), s.serial));
    Ok(GeneratedKeys {
        serial: system_line.map(|(_, s)| s).unwrap_or(0),
        content: render_authorized_keys(system_line, &user_keys),
    })
}

/// The effective user-key set for an account: global keys plus explicitly assigned keys,
/// deduplicated by key id, with expired and excluded keys dropped, sorted by comment.
fn collect_user_keys<T: KeyStoreBackend + 'static>(
    db: &KeyStoreDatabase<T>,
    account_id: u32,
    exclude_key_ids: &HashSet<u32>,
) -> Result<Vec<PublicKey>, KeyStoreError> {
    let now = Utc::now().naive_utc();
    let mut seen = HashSet::new();
    let mut keys = Vec::new();
    for key in db
        .list_global_keys()?
        .into_iter()
        .chain(db.list_keys_for_account(account_id)?)
    {
        if exclude_key_ids.contains(&key.id) || key.is_expired(now) || !seen.insert(key.id) {
            continue;
        }
        keys.push(key);
    }
    keys.sort_by(|a, b| a.comment.cmp(&b.comment));
    Ok(keys)
}

/// Render the canonical byte payload. The header and restricted system-key line are emitted only
/// when a system key is given; the `# User Keys` block only when at least one user key survived
/// filtering. Non-empty output always ends with exactly one newline.
pub fn render_authorized_keys(system: Option<(&str, u32)>, user_keys: &[PublicKey]) -> Vec<u8> {
    let mut lines = Vec::new();
    if let Some((public_key, serial)) = system {
        lines.push(format!("{} (Serial: {})", MANAGED_HEADER_PREFIX, serial));
        lines.push(format!("{} {}", SYSTEM_KEY_RESTRICTIONS, public_key));
    }
    if !user_keys.is_empty() {
        if !lines.is_empty() {
            lines.push(String::new());
        }
        lines.push(USER_KEYS_HEADER.to_string());
        lines.extend(user_keys.iter().map(PublicKey::authorized_keys_line));
    }
    if lines.is_empty() {
        return Vec::new();
    }
    let mut content = lines.join("\n").into_bytes();
    content.push(b'\n');
    content
}

/// Normalize authorized_keys content for comparison: CRLF becomes LF, every line loses trailing
/// whitespace, and trailing empty lines are dropped.
pub fn normalize_authorized_keys_content(content: &str) -> String {
    let mut lines: Vec<&str> = content.lines().map(str::trim_end).collect();
    while lines.last().map(|l| l.is_empty()).unwrap_or(false) {
        lines.pop();
    }
    lines.join("\n")
}

/// SHA-256 over the normalized content, as lowercase hex. Stable across CRLF and trailing
/// whitespace variants of the same logical file.
pub fn hash_authorized_keys_content(content: &[u8]) -> String {
    let text = String::from_utf8_lossy(content);
    let normalized = normalize_authorized_keys_content(&text);
    hex::encode(Sha256::digest(normalized.as_bytes()))
}

#[cfg(test)]
mod test {
    use super::*;

    fn user_key(id: u32, algorithm: &str, data: &str, comment: &str) -> PublicKey {
        PublicKey {
            id,
            algorithm: algorithm.to_string(),
            key_data: data.to_string(),
            comment: comment.to_string(),
            is_global: false,
            expires_at: None,
        }
    }

    #[test]
    fn renders_canonical_layout() {
        let keys = vec![
            user_key(1, "ssh-rsa", "AAAA", "a-comment"),
            user_key(2, "ssh-ed25519", "AAAB", "b-comment"),
        ];
        let content = render_authorized_keys(Some(("ssh-ed25519 AAA7 sys", 7)), &keys);
        let expected = concat!(
            "# Keymaster Managed Keys (Serial: 7)\n",
            "command=\"internal-sftp\",no-port-forwarding,no-x11-forwarding,no-agent-forwarding,no-pty ",
            "ssh-ed25519 AAA7 sys\n",
            "\n",
            "# User Keys\n",
            "ssh-rsa AAAA a-comment\n",
            "ssh-ed25519 AAAB b-comment\n",
        );
        assert_eq!(String::from_utf8(content).unwrap(), expected);
    }

    #[test]
    fn user_keys_header_omitted_when_no_user_keys() {
        let content = render_authorized_keys(Some(("ssh-ed25519 AAA7 sys", 7)), &[]);
        let text = String::from_utf8(content).unwrap();
        assert!(!text.contains("# User Keys"));
        assert!(text.ends_with("sys\n"));
        assert_eq!(text.matches('\n').count(), 2);
    }

    #[test]
    fn system_key_omission_leaves_only_user_block() {
        let keys = vec![user_key(1, "ssh-rsa", "AAAA", "a")];
        let content = render_authorized_keys(None, &keys);
        assert_eq!(String::from_utf8(content).unwrap(), "# User Keys\nssh-rsa AAAA a\n");
    }

    #[test]
    fn empty_inputs_render_empty_payload() {
        assert!(render_authorized_keys(None, &[]).is_empty());
    }

    #[test]
    fn hash_is_stable_across_crlf_and_trailing_whitespace() {
        let canonical = b"# Keymaster Managed Keys (Serial: 1)\ncommand=x ssh-ed25519 A sys\n";
        let crlf = b"# Keymaster Managed Keys (Serial: 1)\r\ncommand=x ssh-ed25519 A sys\r\n";
        let padded = b"# Keymaster Managed Keys (Serial: 1)  \ncommand=x ssh-ed25519 A sys\n\n\n";
        let digest = hash_authorized_keys_content(canonical);
        assert_eq!(hash_authorized_keys_content(crlf), digest);
        assert_eq!(hash_authorized_keys_content(padded), digest);
    }

    #[test]
    fn hash_differs_for_different_content() {
        assert_ne!(
            hash_authorized_keys_content(b"ssh-rsa AAAA a\n"),
            hash_authorized_keys_content(b"ssh-rsa AAAA b\n")
        );
    }
}
