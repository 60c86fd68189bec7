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

use crate::consts::MANAGED_HEADER_PREFIX;

/// One parsed public key line from an authorized_keys file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPublicKey {
    pub algorithm: String,
    pub key_data: String,
    pub comment: String,
}

/// Parse a single authorized_keys line into `(algorithm, key_data, comment)`. Returns `None` for
/// blank lines, comments and lines with fewer than two fields. The comment may contain spaces
/// and is taken verbatim to the end of the line.
pub fn parse_public_key_line(line: &str) -> Option<ParsedPublicKey> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return None;
    }
    let mut parts = trimmed.splitn(3, char::is_whitespace);
    let algorithm = parts.next()?.to_string();
    let key_data = parts.next()?.to_string();
    if key_data.is_empty() {
        return None;
    }
    let comment = parts.next().unwrap_or("").trim().to_string();
    Some(ParsedPublicKey {
        algorithm,
        key_data,
        comment,
    })
}

/// Extract the serial from the managed header, taken from the first non-blank line of the file.
/// Returns `None` when the first non-blank line is not a Keymaster header or carries no
/// parseable serial.
pub fn extract_header_serial(content: &str) -> Option<u32> {
    let first = content.lines().find(|l| !l.trim().is_empty())?;
    let trimmed = first.trim();
    if !trimmed.starts_with(MANAGED_HEADER_PREFIX) {
        return None;
    }
    let start = trimmed.find("Serial:")? + "Serial:".len();
    let digits: String = trimmed[start..]
        .trim_start()
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}

/// True when the content opens with the Keymaster managed header
pub fn has_managed_header(content: &str) -> bool {
    content
        .lines()
        .find(|l| !l.trim().is_empty())
        .map(|l| l.trim().starts_with(MANAGED_HEADER_PREFIX))
        .unwrap_or(false)
}

/// The result of splitting a remote authorized_keys file into the Keymaster-managed section and
/// everything Keymaster must not touch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManagedSplit {
    pub managed: Vec<String>,
    pub foreign: Vec<String>,
}

impl ManagedSplit {
    pub fn has_managed_section(&self) -> bool {
        !self.managed.is_empty()
    }
}

/// Split file content into managed and foreign lines using the structural rules alone: inside a
/// section every blank, comment, `ssh-`/`ecdsa-` and `command=` line is managed.
pub fn split_managed_section(content: &str) -> ManagedSplit {
    split_managed_section_with(content, |_| true)
}

/// Split file content into managed and foreign lines.
///
/// A managed section begins at a line whose trimmed prefix is `# Keymaster Managed Keys`. While
/// inside the section, blank lines, comment lines and `command=` restricted lines belong to the
/// section unconditionally; a `ssh-`/`ecdsa-` key line belongs to it only while `is_managed_key`
/// accepts it. The first line matching neither ends the section and is foreign, as is every key
/// the callback rejects. A later header line re-enters the section.
///
/// Callers that know the set of Keymaster-managed keys pass a store-aware callback so that a
/// foreign key appended inside the managed block survives a rewrite.
pub fn split_managed_section_with<F>(content: &str, is_managed_key: F) -> ManagedSplit
where F: Fn(&ParsedPublicKey) -> bool {
    let mut split = ManagedSplit::default();
    let mut in_section = false;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with(MANAGED_HEADER_PREFIX) {
            in_section = true;
            split.managed.push(line.to_string());
            continue;
        }
        if in_section && is_managed_section_line(trimmed, &is_managed_key) {
            split.managed.push(line.to_string());
        } else {
            in_section = false;
            split.foreign.push(line.to_string());
        }
    }
    // A trailing run of blank foreign lines is file padding, not content worth preserving
    while split.foreign.last().map(|l| l.trim().is_empty()).unwrap_or(false) {
        split.foreign.pop();
    }
    split
}

fn is_managed_section_line<F>(trimmed: &str, is_managed_key: &F) -> bool
where F: Fn(&ParsedPublicKey) -> bool {
    if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with("command=") {
        return true;
    }
    if trimmed.starts_with("ssh-") || trimmed.starts_with("ecdsa-") {
        return parse_public_key_line(trimmed).map(|k| is_managed_key(&k)).unwrap_or(true);
    }
    false
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parses_line_with_spaced_comment() {
        let parsed = parse_public_key_line("ssh-ed25519 AAAB alice work laptop").unwrap();
        assert_eq!(parsed.algorithm, "ssh-ed25519");
        assert_eq!(parsed.key_data, "AAAB");
        assert_eq!(parsed.comment, "alice work laptop");
    }

    #[test]
    fn parses_line_without_comment() {
        let parsed = parse_public_key_line("ssh-rsa AAAA").unwrap();
        assert_eq!(parsed.comment, "");
    }

    #[test]
    fn rejects_blanks_comments_and_fragments() {
        assert!(parse_public_key_line("").is_none());
        assert!(parse_public_key_line("   ").is_none());
        assert!(parse_public_key_line("# a comment").is_none());
        assert!(parse_public_key_line("ssh-ed25519").is_none());
    }

    #[test]
    fn extracts_serial_from_header() {
        let content = "# Keymaster Managed Keys (Serial: 42)\ncommand=... ssh-ed25519 X sys\n";
        assert_eq!(extract_header_serial(content), Some(42));
    }

    #[test]
    fn serial_skips_leading_blank_lines() {
        let content = "\n\n# Keymaster Managed Keys (Serial: 7)\n";
        assert_eq!(extract_header_serial(content), Some(7));
    }

    #[test]
    fn serial_absent_for_foreign_content() {
        assert_eq!(extract_header_serial("ssh-rsa AAAA someone\n"), None);
        assert_eq!(extract_header_serial(""), None);
        assert_eq!(extract_header_serial("# Keymaster Managed Keys (no serial)"), None);
    }

    #[test]
    fn structural_split_claims_every_key_in_section() {
        let content = concat!(
            "ssh-ed25519 F1 foreign1\n",
            "# Keymaster Managed Keys (Serial: 2)\n",
            "command=\"internal-sftp\",no-pty ssh-ed25519 SYS sys\n",
            "\n",
            "# User Keys\n",
            "ssh-ed25519 K1 k-one\n",
        );
        let split = split_managed_section(content);
        assert_eq!(split.foreign, vec!["ssh-ed25519 F1 foreign1"]);
        assert_eq!(split.managed.len(), 5);
    }

    #[test]
    fn store_aware_split_keeps_unknown_keys() {
        let content = concat!(
            "ssh-ed25519 F1 foreign1\n",
            "# Keymaster Managed Keys (Serial: 2)\n",
            "command=\"internal-sftp\",no-pty ssh-ed25519 SYS sys\n",
            "\n",
            "# User Keys\n",
            "ssh-ed25519 K1 k-one\n",
            "ssh-ed25519 F2 foreign2\n",
        );
        let split = split_managed_section_with(content, |k| k.key_data != "F2");
        assert_eq!(split.foreign, vec!["ssh-ed25519 F1 foreign1", "ssh-ed25519 F2 foreign2"]);
        assert!(split.managed.iter().any(|l| l.contains(" K1 ")));
    }

    #[test]
    fn split_without_header_is_all_foreign() {
        let content = "ssh-rsa AAAA a\nssh-ed25519 BBBB b\n";
        let split = split_managed_section(content);
        assert!(!split.has_managed_section());
        assert_eq!(split.foreign.len(), 2);
    }

    #[test]
    fn section_ends_at_first_unmanaged_line() {
        let content = concat!(
            "# Keymaster Managed Keys (Serial: 1)\n",
            "command=\"internal-sftp\" ssh-ed25519 SYS sys\n",
            "some-unmanaged-directive\n",
            "# a later foreign comment\n",
        );
        let split = split_managed_section(content);
        assert_eq!(split.foreign[0], "some-unmanaged-directive");
        assert_eq!(split.foreign[1], "# a later foreign comment");
    }
}
