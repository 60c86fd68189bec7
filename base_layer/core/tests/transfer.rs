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

use base64::{engine::general_purpose::STANDARD, Engine};
use keymaster_core::{
    services::{DeploymentService, TransferError, TransferPackage, TransferService},
    test_utils::{MockRemoteConnector, MockRemoteHost},
    types::Account,
};
use support::{TestDatabase, HOST_KEY_LINE};

/// A managed, deployed account on the exporting instance
fn exporting_instance() -> (TestDatabase, MockRemoteConnector, MockRemoteHost, Account) {
    let db = support::store();
    let connector = MockRemoteConnector::new();

    support::add_system_key(&db, "ssh-ed25519 SYS sys", "sys-pem");
    let account = support::add_account(&db, "alice", "host.example");
    let host = connector.add_endpoint("alice", "host.example", 22, HOST_KEY_LINE);
    connector.accept_key("alice", "host.example", 22, b"sys-pem");
    db.trust_host("host.example:22", HOST_KEY_LINE).unwrap();

    DeploymentService::new(db.clone(), connector.clone())
        .deploy_account(&account)
        .unwrap();
    let account = db.get_account(account.id).unwrap().unwrap();
    (db, connector, host, account)
}

#[test]
fn export_builds_a_verifiable_package_and_installs_the_transfer_key() {
    let (db, connector, host, account) = exporting_instance();
    let service = TransferService::new(db, connector);

    let raw = service.export_transfer_package(&account).unwrap();
    let package: TransferPackage = serde_json::from_str(&raw).unwrap();
    assert_eq!(package.magic, "keymaster-transfer-v1");
    assert_eq!(package.user, "alice");
    assert_eq!(package.host, "host.example");
    assert_eq!(package.host_key, HOST_KEY_LINE);
    assert_eq!(package.crc.len(), 64);

    // the ephemeral public key was appended to the remote file
    let content = host.authorized_keys().unwrap();
    assert!(content.lines().last().unwrap().contains("keymaster-transfer"));
    // the managed section is still in place above it
    assert!(content.starts_with("# Keymaster Managed Keys"));
}

#[test]
fn accepted_package_takes_over_the_account() {
    let (source_db, source_connector, host, account) = exporting_instance();
    let raw = TransferService::new(source_db, source_connector)
        .export_transfer_package(&account)
        .unwrap();
    let package: TransferPackage = serde_json::from_str(&raw).unwrap();

    // the receiving instance has its own store, system key and connector; the target host is
    // shared state between the two
    let db = support::store();
    let connector = MockRemoteConnector::new();
    support::add_system_key(&db, "ssh-ed25519 NEWSYS sys", "new-sys-pem");
    connector.register_host("alice", "host.example", 22, HOST_KEY_LINE, host.clone());
    connector.accept_key(
        "alice",
        "host.example",
        22,
        &STANDARD.decode(&package.transfer_private_key).unwrap(),
    );

    let service = TransferService::new(db.clone(), connector);
    let adopted = service.accept_transfer_package(&raw).unwrap();
    assert_eq!(adopted.address(), "alice@host.example");
    assert_eq!(adopted.serial, 1);

    // the receiver trusted the packaged host key and installed its own managed content
    assert_eq!(db.get_known_host("host.example:22").unwrap().unwrap().key, HOST_KEY_LINE);
    assert!(host.authorized_keys().unwrap().contains("ssh-ed25519 NEWSYS sys"));
}

#[test]
fn tampered_package_fails_the_crc_check() {
    let (db, connector, _host, account) = exporting_instance();
    let service = TransferService::new(db, connector);
    let raw = service.export_transfer_package(&account).unwrap();
    let mut package: TransferPackage = serde_json::from_str(&raw).unwrap();

    // flip the first character of the packaged private key
    let mut chars: Vec<char> = package.transfer_private_key.chars().collect();
    chars[0] = if chars[0] == 'A' { 'B' } else { 'A' };
    package.transfer_private_key = chars.into_iter().collect();
    let tampered = serde_json::to_string(&package).unwrap();

    assert!(matches!(
        service.accept_transfer_package(&tampered),
        Err(TransferError::CrcMismatch)
    ));
}

#[test]
fn wrong_magic_is_rejected() {
    let (db, connector, _host, account) = exporting_instance();
    let service = TransferService::new(db, connector);
    let raw = service.export_transfer_package(&account).unwrap();
    let tampered = raw.replace("keymaster-transfer-v1", "keymaster-transfer-v0");

    assert!(matches!(
        service.accept_transfer_package(&tampered),
        Err(TransferError::BadMagic(_))
    ));
}

#[test]
fn conflicting_recorded_host_key_fails_closed() {
    let (source_db, source_connector, _host, account) = exporting_instance();
    let raw = TransferService::new(source_db, source_connector)
        .export_transfer_package(&account)
        .unwrap();

    let db = support::store();
    support::add_system_key(&db, "ssh-ed25519 NEWSYS sys", "new-sys-pem");
    // the receiver already trusts a different key for this host
    db.trust_host("host.example:22", "ssh-ed25519 CONFLICTING key").unwrap();

    let service = TransferService::new(db, MockRemoteConnector::new());
    assert!(matches!(
        service.accept_transfer_package(&raw),
        Err(TransferError::HostKeyConflict(_))
    ));
}
