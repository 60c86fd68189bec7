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

use chrono::{Duration, Utc};
use keymaster_core::{
    services::{BootstrapError, BootstrapService},
    storage::actions,
    test_utils::MockRemoteConnector,
    types::BootstrapStatus,
};
use support::HOST_KEY_LINE;

#[test]
fn begin_persists_an_active_session_with_ttl() {
    let db = support::store();
    let service = BootstrapService::new(db.clone(), MockRemoteConnector::new());

    let pending = service.begin("deploy", "new.example.org", "fresh", "prod").unwrap();
    assert_eq!(pending.session.id.len(), 32);
    assert!(pending.install_command.contains("ssh-ed25519"));
    assert!(pending.install_command.contains(">> ~/.ssh/authorized_keys"));
    assert!(!pending.ephemeral_private_key.is_empty());

    let stored = db.get_bootstrap_session(&pending.session.id).unwrap().unwrap();
    assert_eq!(stored.status, BootstrapStatus::Active);
    assert_eq!(stored.expires_at - stored.created_at, Duration::minutes(30));
    assert_eq!(stored.temp_public_key, pending.session.temp_public_key);
}

#[test]
fn session_expiry_boundary() {
    let db = support::store();
    let service = BootstrapService::new(db.clone(), MockRemoteConnector::new());
    let pending = service.begin("deploy", "new.example.org", "", "").unwrap();
    let session = db.get_bootstrap_session(&pending.session.id).unwrap().unwrap();

    let just_before = session.expires_at - Duration::seconds(1);
    let exactly = session.expires_at;
    assert!(!session.is_expired(just_before));
    assert!(session.is_expired(exactly));

    assert!(db.list_expired_bootstrap_sessions(just_before).unwrap().is_empty());
    assert_eq!(db.list_expired_bootstrap_sessions(exactly).unwrap().len(), 1);
}

#[test]
fn commit_installs_content_registers_account_and_cleans_up() {
    let db = support::store();
    let connector = MockRemoteConnector::new();
    let active = support::add_system_key(&db, "ssh-ed25519 SYS sys", "sys-pem");
    support::add_key(&db, "ssh-rsa", "GGGG", "global", true);

    let service = BootstrapService::new(db.clone(), connector.clone());
    let mut pending = service.begin("deploy", "new.example.org", "fresh", "prod").unwrap();

    let host = connector.add_endpoint("deploy", "new.example.org", 22, HOST_KEY_LINE);
    connector.accept_key(
        "deploy",
        "new.example.org",
        22,
        &pending.ephemeral_private_key.bytes(),
    );

    let account = service.commit(&mut pending).unwrap();
    assert_eq!(account.serial, active.serial);
    assert_eq!(account.address(), "deploy@new.example.org");
    assert_eq!(account.label, "fresh");

    let content = host.authorized_keys().unwrap();
    assert!(content.starts_with("# Keymaster Managed Keys (Serial: 1)\n"));
    assert!(content.contains("ssh-rsa GGGG global"));

    // the session is gone, the host trusted, and the ephemeral key zeroed
    assert!(db.get_bootstrap_session(&pending.session.id).unwrap().is_none());
    assert_eq!(
        db.get_known_host("new.example.org:22").unwrap().unwrap().key,
        HOST_KEY_LINE
    );
    assert!(pending.ephemeral_private_key.reveal().iter().all(|b| *b == 0));
    let log = db.list_audit_log().unwrap();
    assert!(log.iter().any(|e| e.action == actions::TRUST_HOST));
    assert!(log.iter().any(|e| e.action == actions::ADD_ACCOUNT));
}

#[test]
fn commit_without_active_system_key_fails_and_marks_the_session() {
    let db = support::store();
    let connector = MockRemoteConnector::new();
    let service = BootstrapService::new(db.clone(), connector.clone());
    let mut pending = service.begin("deploy", "new.example.org", "", "").unwrap();
    connector.add_endpoint("deploy", "new.example.org", 22, HOST_KEY_LINE);
    connector.accept_key(
        "deploy",
        "new.example.org",
        22,
        &pending.ephemeral_private_key.bytes(),
    );

    let result = service.commit(&mut pending);
    assert!(matches!(result, Err(BootstrapError::GeneratorError(_))));
    let session = db.get_bootstrap_session(&pending.session.id).unwrap().unwrap();
    assert_eq!(session.status, BootstrapStatus::Failed);
    assert!(pending.ephemeral_private_key.reveal().iter().all(|b| *b == 0));
}

#[test]
fn commit_of_expired_session_is_rejected() {
    let db = support::store();
    let connector = MockRemoteConnector::new();
    support::add_system_key(&db, "ssh-ed25519 SYS sys", "sys-pem");
    let service = BootstrapService::new(db.clone(), connector);
    let mut pending = service.begin("deploy", "new.example.org", "", "").unwrap();

    // age the persisted session past its TTL
    let mut session = db.get_bootstrap_session(&pending.session.id).unwrap().unwrap();
    session.expires_at = Utc::now().naive_utc() - Duration::minutes(1);
    db.save_bootstrap_session(&session).unwrap();

    assert!(matches!(
        service.commit(&mut pending),
        Err(BootstrapError::SessionExpired(_))
    ));
    let session = db.get_bootstrap_session(&pending.session.id).unwrap().unwrap();
    assert_eq!(session.status, BootstrapStatus::Orphaned);
}

#[test]
fn sweep_orphans_expired_sessions_then_purges_them() {
    let db = support::store();
    let service = BootstrapService::new(db.clone(), MockRemoteConnector::new());
    let pending = service.begin("deploy", "new.example.org", "", "").unwrap();

    let mut session = db.get_bootstrap_session(&pending.session.id).unwrap().unwrap();
    session.expires_at = Utc::now().naive_utc() - Duration::minutes(5);
    db.save_bootstrap_session(&session).unwrap();

    let report = service.sweep().unwrap();
    assert_eq!(report.marked_orphaned, 1);
    assert_eq!(report.purged, 0);
    assert_eq!(
        db.get_bootstrap_session(&pending.session.id).unwrap().unwrap().status,
        BootstrapStatus::Orphaned
    );

    let report = service.sweep().unwrap();
    assert_eq!(report.marked_orphaned, 0);
    assert_eq!(report.purged, 1);
    assert!(db.get_bootstrap_session(&pending.session.id).unwrap().is_none());

    // nothing left to do
    let report = service.sweep().unwrap();
    assert_eq!(report, Default::default());
}

#[test]
fn rebootstrap_of_existing_account_reuses_the_row() {
    let db = support::store();
    let connector = MockRemoteConnector::new();
    support::add_system_key(&db, "ssh-ed25519 SYS sys", "sys-pem");
    let existing = support::add_account(&db, "deploy", "new.example.org");
    let key = support::add_key(&db, "ssh-ed25519", "AAAB", "alice", false);
    db.assign_key(key.id, existing.id).unwrap();

    let service = BootstrapService::new(db.clone(), connector.clone());
    let mut pending = service.begin("deploy", "new.example.org", "", "").unwrap();
    let host = connector.add_endpoint("deploy", "new.example.org", 22, HOST_KEY_LINE);
    connector.accept_key(
        "deploy",
        "new.example.org",
        22,
        &pending.ephemeral_private_key.bytes(),
    );

    let account = service.commit(&mut pending).unwrap();
    assert_eq!(account.id, existing.id);
    assert_eq!(account.serial, 1);
    // assigned keys are part of the content because the account already existed
    assert!(host.authorized_keys().unwrap().contains("ssh-ed25519 AAAB alice"));
}
