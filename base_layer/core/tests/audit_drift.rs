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

mod support;

use keymaster_core::{
    services::{AuditError, AuditReport, AuditService, DeploymentService},
    test_utils::{MockRemoteConnector, MockRemoteHost},
    types::{Account, DriftSeverity},
};
use support::{TestDatabase, HOST_KEY_LINE};

/// A deployed account whose remote file matches the store exactly
fn deployed() -> (TestDatabase, MockRemoteConnector, MockRemoteHost, Account) {
    let db = support::store();
    let connector = MockRemoteConnector::new();

    support::add_system_key(&db, "ssh-ed25519 SYS sys", "sys-pem");
    let account = support::add_account(&db, "deploy", "files.example.org");
    let key = support::add_key(&db, "ssh-ed25519", "AAAB", "alice", false);
    db.assign_key(key.id, account.id).unwrap();

    let host = connector.add_endpoint("deploy", "files.example.org", 22, HOST_KEY_LINE);
    connector.accept_key("deploy", "files.example.org", 22, b"sys-pem");
    db.trust_host("files.example.org:22", HOST_KEY_LINE).unwrap();

    DeploymentService::new(db.clone(), connector.clone())
        .deploy_account(&account)
        .unwrap();
    let account = db.get_account(account.id).unwrap().unwrap();
    (db, connector, host, account)
}

#[test]
fn strict_audit_of_matching_content_is_clean() {
    let (db, connector, _host, account) = deployed();
    let service = AuditService::new(db.clone(), connector);
    assert!(service.audit_account_strict(&account).unwrap().is_clean());
    assert!(db.list_drift_events_for_account(account.id).unwrap().is_empty());
}

#[test]
fn strict_audit_tolerates_line_ending_noise() {
    let (db, connector, host, account) = deployed();
    let crlf = host.authorized_keys().unwrap().replace('\n', "\r\n") + "\r\n";
    host.put_file(".ssh/authorized_keys", crlf.as_bytes());

    let service = AuditService::new(db.clone(), connector);
    assert!(service.audit_account_strict(&account).unwrap().is_clean());
}

#[test]
fn foreign_key_on_remote_is_info_drift() {
    let (db, connector, host, account) = deployed();
    let mut content = host.authorized_keys().unwrap();
    content.push_str("ssh-ed25519 XXXX stray\n");
    host.put_file(".ssh/authorized_keys", content.as_bytes());

    let service = AuditService::new(db.clone(), connector);
    match service.audit_account_strict(&account).unwrap() {
        AuditReport::Drift { analysis, event } => {
            assert_eq!(analysis.classification(), Some(DriftSeverity::Info));
            assert_eq!(analysis.extra_keys, vec!["ssh-ed25519 XXXX stray"]);
            let event = event.unwrap();
            assert_eq!(event.account_id, account.id);
            assert!(!event.was_remediated);
        },
        AuditReport::Clean => panic!("expected drift"),
    }
    assert_eq!(db.list_drift_events_for_account(account.id).unwrap().len(), 1);
}

#[test]
fn removed_expected_key_is_warning_drift() {
    let (db, connector, host, account) = deployed();
    let content = host
        .authorized_keys()
        .unwrap()
        .lines()
        .filter(|l| !l.contains("alice"))
        .collect::<Vec<_>>()
        .join("\n") +
        "\n";
    host.put_file(".ssh/authorized_keys", content.as_bytes());

    let service = AuditService::new(db.clone(), connector);
    match service.audit_account_strict(&account).unwrap() {
        AuditReport::Drift { analysis, .. } => {
            assert_eq!(analysis.classification(), Some(DriftSeverity::Warning));
            assert_eq!(analysis.missing_keys, vec!["ssh-ed25519 AAAB alice"]);
        },
        AuditReport::Clean => panic!("expected drift"),
    }
}

#[test]
fn wiped_remote_file_is_critical_drift() {
    let (db, connector, host, account) = deployed();
    host.put_file(".ssh/authorized_keys", b"ssh-ed25519 OTHER other\n");

    let service = AuditService::new(db.clone(), connector);
    match service.audit_account_strict(&account).unwrap() {
        AuditReport::Drift { analysis, .. } => {
            assert!(analysis.missing_keymaster_header);
            assert_eq!(analysis.classification(), Some(DriftSeverity::Critical));
        },
        AuditReport::Clean => panic!("expected drift"),
    }
}

#[test]
fn serial_audit_checks_only_the_header() {
    let (db, connector, host, account) = deployed();
    let service = AuditService::new(db.clone(), connector);
    assert!(service.audit_account_serial(&account).unwrap().is_clean());

    // rewrite the header to an older serial; the user block is untouched
    let content = host.authorized_keys().unwrap().replace("(Serial: 1)", "(Serial: 9)");
    host.put_file(".ssh/authorized_keys", content.as_bytes());
    match service.audit_account_serial(&account).unwrap() {
        AuditReport::Drift { analysis, .. } => {
            assert!(analysis.serial_mismatch);
            assert_eq!(analysis.classification(), Some(DriftSeverity::Critical));
        },
        AuditReport::Clean => panic!("expected drift"),
    }
}

#[test]
fn audit_requires_a_deployed_account() {
    let db = support::store();
    let connector = MockRemoteConnector::new();
    support::add_system_key(&db, "ssh-ed25519 SYS sys", "sys-pem");
    let account = support::add_account(&db, "deploy", "files.example.org");

    let service = AuditService::new(db.clone(), connector);
    assert!(matches!(
        service.audit_account_strict(&account),
        Err(AuditError::NotDeployed(_))
    ));
}

#[test]
fn drift_events_aggregate_in_stats() {
    let (db, connector, host, account) = deployed();
    host.put_file(".ssh/authorized_keys", b"nothing managed here\n");
    let service = AuditService::new(db.clone(), connector);
    service.audit_account_strict(&account).unwrap();

    let stats = db.drift_stats().unwrap();
    assert_eq!(stats.total, 1);
    assert_eq!(stats.critical, 1);
    assert_eq!(stats.unremediated, 1);

    let event = &db.list_drift_events_for_account(account.id).unwrap()[0];
    db.mark_drift_remediated(event.id).unwrap();
    let stats = db.drift_stats().unwrap();
    assert_eq!(stats.unremediated, 0);

    let by_host = db.list_drift_events_by_host("files.example.org").unwrap();
    assert_eq!(by_host.len(), 1);
    assert!(by_host[0].was_remediated);
}
