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

use log::*;

use crate::{
    authorized_keys::{extract_header_serial, has_managed_header, parse_public_key_line},
    storage::{KeyStoreBackend, KeyStoreDatabase, KeyStoreError},
    types::{DriftEvent, DriftSeverity},
};

const LOG_TARGET: &str = "keymaster::services::drift";

/// A parsed comparison between the expected authorized_keys content and what a host actually
/// serves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DriftAnalysis {
    pub missing_keymaster_header: bool,
    pub serial_mismatch: bool,
    /// Expected key lines absent from the remote file
    pub missing_keys: Vec<String>,
    /// Key lines on the remote that the store does not expect
    pub extra_keys: Vec<String>,
}

impl DriftAnalysis {
    pub fn has_drift(&self) -> bool {
        self.classification().is_some()
    }

    /// Severity precedence: a missing header or serial mismatch is critical, missing keys warn,
    /// and foreign extras alone are informational.
    pub fn classification(&self) -> Option<DriftSeverity> {
        if self.missing_keymaster_header || self.serial_mismatch {
            return Some(DriftSeverity::Critical);
        }
        if !self.missing_keys.is_empty() {
            return Some(DriftSeverity::Warning);
        }
        if !self.extra_keys.is_empty() {
            return Some(DriftSeverity::Info);
        }
        None
    }

    /// One-line report of the classification and its first salient cause
    pub fn summary(&self) -> String {
        let severity = match self.classification() {
            Some(severity) => severity,
            None => return "no drift".to_string(),
        };
        let cause = if self.missing_keymaster_header {
            "managed header is missing".to_string()
        } else if self.serial_mismatch {
            "serial does not match the deployed serial".to_string()
        } else if !self.missing_keys.is_empty() {
            format!("{} expected key(s) missing", self.missing_keys.len())
        } else {
            format!("{} foreign key(s) present", self.extra_keys.len())
        };
        format!("{}: {}", severity, cause)
    }

    /// What an operator should do about it
    pub fn remediation_plan(&self) -> String {
        if self.missing_keymaster_header || self.serial_mismatch || !self.missing_keys.is_empty() {
            "redeploy the account to restore the managed content".to_string()
        } else if !self.extra_keys.is_empty() {
            "review the foreign keys and import or remove them".to_string()
        } else {
            "no action required".to_string()
        }
    }
}

/// Compare expected and remote content. Key lines are compared by their full
/// `<algorithm> <data> <comment>` rendering after whitespace normalization; managed-section
/// furniture (headers, the restricted system-key line) is ignored on both sides.
pub fn analyze_drift(expected: &str, remote: &str, expected_serial: u32) -> DriftAnalysis {
    let missing_keymaster_header = !has_managed_header(remote);
    let serial_mismatch = if missing_keymaster_header {
        false
    } else {
        extract_header_serial(remote) != Some(expected_serial)
    };

    let expected_keys = key_lines(expected);
    let remote_keys = key_lines(remote);

    let missing_keys = expected_keys
        .iter()
        .filter(|k| !remote_keys.contains(k))
        .cloned()
        .collect();
    let extra_keys = remote_keys
        .iter()
        .filter(|k| !expected_keys.contains(k))
        .cloned()
        .collect();

    DriftAnalysis {
        missing_keymaster_header,
        serial_mismatch,
        missing_keys,
        extra_keys,
    }
}

fn key_lines(content: &str) -> Vec<String> {
    content
        .lines()
        .filter(|line| !line.trim_start().starts_with("command="))
        .filter_map(parse_public_key_line)
        .map(|k| {
            if k.comment.is_empty() {
                format!("{} {}", k.algorithm, k.key_data)
            } else {
                format!("{} {} {}", k.algorithm, k.key_data, k.comment)
            }
        })
        .collect()
}

/// Persist a drift observation for the account; no event is written when there is no drift
pub fn record_drift<T: KeyStoreBackend + 'static>(
    db: &KeyStoreDatabase<T>,
    account_id: u32,
    analysis: &DriftAnalysis,
) -> Result<Option<DriftEvent>, KeyStoreError> {
    let Some(severity) = analysis.classification() else {
        return Ok(None);
    };
    let event = db.record_drift_event(account_id, severity, &analysis.summary())?;
    info!(
        target: LOG_TARGET,
        "Recorded {} drift for account {}: {}", severity, account_id, analysis.summary()
    );
    Ok(Some(event))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn classification_precedence() {
        let critical = DriftAnalysis {
            missing_keymaster_header: true,
            serial_mismatch: false,
            missing_keys: vec!["k1".to_string(), "k2".to_string()],
            extra_keys: vec!["x".to_string()],
        };
        assert_eq!(critical.classification(), Some(DriftSeverity::Critical));

        let warning = DriftAnalysis {
            missing_keymaster_header: false,
            serial_mismatch: false,
            missing_keys: vec!["k1".to_string()],
            extra_keys: vec!["x".to_string(), "y".to_string()],
        };
        assert_eq!(warning.classification(), Some(DriftSeverity::Warning));

        let info = DriftAnalysis {
            missing_keymaster_header: false,
            serial_mismatch: false,
            missing_keys: vec![],
            extra_keys: vec!["x".to_string()],
        };
        assert_eq!(info.classification(), Some(DriftSeverity::Info));

        assert_eq!(DriftAnalysis::default().classification(), None);
    }

    #[test]
    fn serial_mismatch_is_critical() {
        let expected = "# Keymaster Managed Keys (Serial: 4)\ncommand=x ssh-ed25519 SYS sys\n";
        let remote = "# Keymaster Managed Keys (Serial: 3)\ncommand=x ssh-ed25519 SYS sys\n";
        let analysis = analyze_drift(expected, remote, 4);
        assert!(analysis.serial_mismatch);
        assert_eq!(analysis.classification(), Some(DriftSeverity::Critical));
        assert!(analysis.summary().starts_with("critical: "));
    }

    #[test]
    fn missing_and_extra_keys_are_detected() {
        let expected = concat!(
            "# Keymaster Managed Keys (Serial: 1)\n",
            "command=x ssh-ed25519 SYS sys\n",
            "\n",
            "# User Keys\n",
            "ssh-ed25519 AAAB alice\n",
        );
        let remote = concat!(
            "# Keymaster Managed Keys (Serial: 1)\n",
            "command=x ssh-ed25519 SYS sys\n",
            "\n",
            "# User Keys\n",
            "ssh-ed25519 CCCC mallory\n",
        );
        let analysis = analyze_drift(expected, remote, 1);
        assert_eq!(analysis.missing_keys, vec!["ssh-ed25519 AAAB alice"]);
        assert_eq!(analysis.extra_keys, vec!["ssh-ed25519 CCCC mallory"]);
        assert_eq!(analysis.classification(), Some(DriftSeverity::Warning));
    }

    #[test]
    fn identical_content_has_no_drift() {
        let content = concat!(
            "# Keymaster Managed Keys (Serial: 2)\n",
            "command=x ssh-ed25519 SYS sys\n",
            "\n",
            "# User Keys\n",
            "ssh-ed25519 AAAB alice\n",
        );
        let analysis = analyze_drift(content, content, 2);
        assert!(!analysis.has_drift());
        assert_eq!(analysis.summary(), "no drift");
        assert_eq!(analysis.remediation_plan(), "no action required");
    }
}
