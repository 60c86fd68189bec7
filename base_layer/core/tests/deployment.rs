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
    remote::{is_refused_error, ConnectionError},
    services::{DeployError, DeploymentService},
    storage::actions,
    test_utils::{MockRemoteConnector, MockTransportError},
};
use support::HOST_KEY_LINE;

#[test]
fn deploy_installs_canonical_content_and_advances_serial() {
    let db = support::store();
    let connector = MockRemoteConnector::new();

    support::rotate_to_serial(&db, 7, "ssh-ed25519 AAA7 sys", "sys-pem");
    let account = support::add_account(&db, "deploy", "files.example.org");
    support::add_key(&db, "ssh-rsa", "AAAA", "a-comment", true);
    let assigned = support::add_key(&db, "ssh-ed25519", "AAAB", "b-comment", false);
    db.assign_key(assigned.id, account.id).unwrap();

    let host = connector.add_endpoint("deploy", "files.example.org", 22, HOST_KEY_LINE);
    connector.accept_key("deploy", "files.example.org", 22, b"sys-pem");
    db.trust_host("files.example.org:22", HOST_KEY_LINE).unwrap();

    let service = DeploymentService::new(db.clone(), connector);
    let outcome = service.deploy_account(&account).unwrap();
    assert_eq!(outcome.serial, 7);

    let expected = concat!(
        "# Keymaster Managed Keys (Serial: 7)\n",
        "command=\"internal-sftp\",no-port-forwarding,no-x11-forwarding,no-agent-forwarding,no-pty ",
        "ssh-ed25519 AAA7 sys\n",
        "\n",
        "# User Keys\n",
        "ssh-rsa AAAA a-comment\n",
        "ssh-ed25519 AAAB b-comment\n",
    );
    assert_eq!(host.authorized_keys().unwrap(), expected);
    assert_eq!(host.permissions(".ssh/authorized_keys"), Some(0o600));
    assert_eq!(host.stray_temp_files(), 0);

    let refreshed = db.get_account(account.id).unwrap().unwrap();
    assert_eq!(refreshed.serial, 7);
    assert!(!refreshed.is_dirty);
    assert!(refreshed.key_hash.is_some());

    let log = db.list_audit_log().unwrap();
    assert!(log.iter().any(|e| e.action == actions::DEPLOY_KEYS));
    assert!(log.iter().any(|e| e.action == actions::ACCOUNT_KEY_HASH_UPDATED));
}

#[test]
fn deploy_is_deterministic_for_equal_state() {
    let db = support::store();
    let connector = MockRemoteConnector::new();

    support::add_system_key(&db, "ssh-ed25519 AAA1 sys", "sys-pem");
    let account = support::add_account(&db, "deploy", "files.example.org");
    support::add_key(&db, "ssh-rsa", "AAAA", "a-comment", true);

    let host = connector.add_endpoint("deploy", "files.example.org", 22, HOST_KEY_LINE);
    connector.accept_key("deploy", "files.example.org", 22, b"sys-pem");
    db.trust_host("files.example.org:22", HOST_KEY_LINE).unwrap();

    let service = DeploymentService::new(db.clone(), connector);
    service.deploy_account(&account).unwrap();
    let first = host.authorized_keys().unwrap();
    let first_hash = db.get_account(account.id).unwrap().unwrap().key_hash;

    let account = db.get_account(account.id).unwrap().unwrap();
    service.deploy_account(&account).unwrap();
    assert_eq!(host.authorized_keys().unwrap(), first);
    assert_eq!(db.get_account(account.id).unwrap().unwrap().key_hash, first_hash);
}

#[test]
fn unknown_host_key_fails_closed() {
    let db = support::store();
    let connector = MockRemoteConnector::new();

    support::add_system_key(&db, "ssh-ed25519 AAA1 sys", "sys-pem");
    let account = support::add_account(&db, "deploy", "files.example.org");
    connector.add_endpoint("deploy", "files.example.org", 22, HOST_KEY_LINE);
    connector.accept_key("deploy", "files.example.org", 22, b"sys-pem");
    // no trust_host call

    let service = DeploymentService::new(db.clone(), connector);
    let result = service.deploy_account(&account);
    assert!(matches!(
        result,
        Err(DeployError::ConnectionError(ConnectionError::UnknownHostKey { .. }))
    ));
}

#[test]
fn changed_host_key_is_rejected() {
    let db = support::store();
    let connector = MockRemoteConnector::new();

    support::add_system_key(&db, "ssh-ed25519 AAA1 sys", "sys-pem");
    let account = support::add_account(&db, "deploy", "files.example.org");
    connector.add_endpoint("deploy", "files.example.org", 22, HOST_KEY_LINE);
    connector.accept_key("deploy", "files.example.org", 22, b"sys-pem");
    db.trust_host("files.example.org:22", "ssh-ed25519 SOMETHINGELSE old").unwrap();

    let service = DeploymentService::new(db.clone(), connector);
    let result = service.deploy_account(&account);
    assert!(matches!(
        result,
        Err(DeployError::ConnectionError(ConnectionError::HostKeyMismatch { .. }))
    ));
}

#[test]
fn auth_falls_back_to_agent_when_key_is_rejected() {
    let db = support::store();
    let connector = MockRemoteConnector::new();

    support::add_system_key(&db, "ssh-ed25519 AAA1 sys", "sys-pem");
    let account = support::add_account(&db, "deploy", "files.example.org");
    let host = connector.add_endpoint("deploy", "files.example.org", 22, HOST_KEY_LINE);
    // the endpoint rejects the system key but accepts agent identities
    connector.accept_agent("deploy", "files.example.org", 22);
    connector.set_agent_reachable(true);
    db.trust_host("files.example.org:22", HOST_KEY_LINE).unwrap();

    let service = DeploymentService::new(db.clone(), connector);
    service.deploy_account(&account).unwrap();
    assert!(host.authorized_keys().is_some());
}

#[test]
fn auth_error_is_final_without_an_agent() {
    let db = support::store();
    let connector = MockRemoteConnector::new();

    support::add_system_key(&db, "ssh-ed25519 AAA1 sys", "sys-pem");
    let account = support::add_account(&db, "deploy", "files.example.org");
    connector.add_endpoint("deploy", "files.example.org", 22, HOST_KEY_LINE);
    connector.set_agent_reachable(false);
    db.trust_host("files.example.org:22", HOST_KEY_LINE).unwrap();

    let service = DeploymentService::new(db.clone(), connector);
    let result = service.deploy_account(&account);
    assert!(matches!(
        result,
        Err(DeployError::ConnectionError(ConnectionError::AuthFailed(_)))
    ));
}

#[test]
fn transport_errors_abort_without_agent_fallback() {
    let db = support::store();
    let connector = MockRemoteConnector::new();

    support::add_system_key(&db, "ssh-ed25519 AAA1 sys", "sys-pem");
    let account = support::add_account(&db, "deploy", "files.example.org");
    connector.add_endpoint("deploy", "files.example.org", 22, HOST_KEY_LINE);
    connector.accept_key("deploy", "files.example.org", 22, b"sys-pem");
    connector.accept_agent("deploy", "files.example.org", 22);
    connector.set_agent_reachable(true);
    connector.fail_transport("deploy", "files.example.org", 22, MockTransportError::Refused);
    db.trust_host("files.example.org:22", HOST_KEY_LINE).unwrap();

    let service = DeploymentService::new(db.clone(), connector);
    match service.deploy_account(&account) {
        Err(DeployError::ConnectionError(e)) => assert!(is_refused_error(&e)),
        other => panic!("expected a refused transport error, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn restricted_shell_uses_sftp_fallback() {
    let db = support::store();
    let connector = MockRemoteConnector::new();

    support::add_system_key(&db, "ssh-ed25519 AAA1 sys", "sys-pem");
    let account = support::add_account(&db, "deploy", "files.example.org");
    let host = connector.add_endpoint("deploy", "files.example.org", 22, HOST_KEY_LINE);
    connector.accept_key("deploy", "files.example.org", 22, b"sys-pem");
    db.trust_host("files.example.org:22", HOST_KEY_LINE).unwrap();
    host.refuse_exec();

    let service = DeploymentService::new(db.clone(), connector);
    service.deploy_account(&account).unwrap();
    assert!(host.authorized_keys().unwrap().starts_with("# Keymaster Managed Keys"));
    assert_eq!(host.permissions(".ssh/authorized_keys"), Some(0o600));
    assert_eq!(host.stray_temp_files(), 0);
}

#[test]
fn missing_system_key_for_recorded_serial_is_reported() {
    let db = support::store();
    let connector = MockRemoteConnector::new();

    support::add_system_key(&db, "ssh-ed25519 AAA1 sys", "sys-pem");
    let account = support::add_account(&db, "deploy", "files.example.org");
    // the account claims a serial that never existed
    db.update_account_serial(account.id, 9).unwrap();
    let account = db.get_account(account.id).unwrap().unwrap();

    connector.add_endpoint("deploy", "files.example.org", 22, HOST_KEY_LINE);
    let service = DeploymentService::new(db.clone(), connector);
    assert!(matches!(
        service.deploy_account(&account),
        Err(DeployError::InconsistentSerial { serial: 9, .. })
    ));
}
