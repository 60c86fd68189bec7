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

use keymaster_core::{services::ImportService, test_utils::MockRemoteConnector};
use support::HOST_KEY_LINE;

#[test]
fn import_ingests_new_commented_keys_only() {
    let db = support::store();
    let connector = MockRemoteConnector::new();
    support::add_system_key(&db, "ssh-ed25519 SYS sys", "sys-pem");
    let account = support::add_account(&db, "deploy", "files.example.org");
    // one of the remote keys is already known
    support::add_key(&db, "ssh-ed25519", "KNOWN", "existing", false);

    let host = connector.add_endpoint("deploy", "files.example.org", 22, HOST_KEY_LINE);
    connector.accept_key("deploy", "files.example.org", 22, b"sys-pem");
    db.trust_host("files.example.org:22", HOST_KEY_LINE).unwrap();

    host.put_file(
        ".ssh/authorized_keys",
        concat!(
            "# hand-maintained file\n",
            "ssh-ed25519 AAAA alice laptop\n",
            "ssh-rsa BBBB\n",                  // no comment, skipped
            "ssh-ed25519 KNOWN existing\n",    // duplicate comment, skipped
            "not-even-a-key\n",                // malformed, skipped
            "\n",
            "ecdsa-sha2-nistp256 CCCC carol\n",
        )
        .as_bytes(),
    );

    let service = ImportService::new(db.clone(), connector);
    let outcome = service.import_from_account(&account).unwrap();

    let comments: Vec<String> = outcome.imported.iter().map(|k| k.comment.clone()).collect();
    assert_eq!(comments, vec!["alice laptop", "carol"]);
    assert_eq!(outcome.skipped, 3);
    assert!(db.get_key_by_comment("alice laptop").unwrap().is_some());
    // imported keys are never global
    assert!(outcome.imported.iter().all(|k| !k.is_global));
}

#[test]
fn import_does_not_reingest_the_managed_section() {
    let db = support::store();
    let connector = MockRemoteConnector::new();
    support::add_system_key(&db, "ssh-ed25519 SYS sys", "sys-pem");
    let account = support::add_account(&db, "deploy", "files.example.org");

    let host = connector.add_endpoint("deploy", "files.example.org", 22, HOST_KEY_LINE);
    connector.accept_key("deploy", "files.example.org", 22, b"sys-pem");
    db.trust_host("files.example.org:22", HOST_KEY_LINE).unwrap();

    host.put_file(
        ".ssh/authorized_keys",
        concat!(
            "# Keymaster Managed Keys (Serial: 3)\n",
            "command=\"internal-sftp\",no-pty ssh-ed25519 SYS sys\n",
            "\n",
            "# User Keys\n",
            "ssh-ed25519 MMMM managed-user\n",
        )
        .as_bytes(),
    );

    let service = ImportService::new(db.clone(), connector);
    let outcome = service.import_from_account(&account).unwrap();
    assert!(outcome.imported.is_empty());
    assert_eq!(outcome.skipped, 0);
    assert!(db.get_key_by_comment("managed-user").unwrap().is_none());
}

#[test]
fn import_without_system_key_falls_back_to_agent() {
    let db = support::store();
    let connector = MockRemoteConnector::new();
    let account = support::add_account(&db, "deploy", "files.example.org");

    let host = connector.add_endpoint("deploy", "files.example.org", 22, HOST_KEY_LINE);
    connector.accept_agent("deploy", "files.example.org", 22);
    connector.set_agent_reachable(true);
    db.trust_host("files.example.org:22", HOST_KEY_LINE).unwrap();
    host.put_file(".ssh/authorized_keys", b"ssh-ed25519 AAAA alice\n");

    let service = ImportService::new(db.clone(), connector);
    let outcome = service.import_from_account(&account).unwrap();
    assert_eq!(outcome.imported.len(), 1);
}

#[test]
fn missing_remote_file_imports_nothing() {
    let db = support::store();
    let connector = MockRemoteConnector::new();
    support::add_system_key(&db, "ssh-ed25519 SYS sys", "sys-pem");
    let account = support::add_account(&db, "deploy", "files.example.org");
    connector.add_endpoint("deploy", "files.example.org", 22, HOST_KEY_LINE);
    connector.accept_key("deploy", "files.example.org", 22, b"sys-pem");
    db.trust_host("files.example.org:22", HOST_KEY_LINE).unwrap();

    let service = ImportService::new(db.clone(), connector);
    let outcome = service.import_from_account(&account).unwrap();
    assert!(outcome.imported.is_empty());
    assert_eq!(outcome.skipped, 0);
}
