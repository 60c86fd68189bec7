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

use base64::{engine::general_purpose::STANDARD, Engine};
use log::*;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::{
    consts::TRANSFER_PACKAGE_MAGIC,
    remote::{
        canonicalize_host_port,
        connect_verified,
        deploy_authorized_keys,
        parse_host_port,
        read_authorized_keys,
        ConnectionError,
        RemoteConnector,
        RemoteError,
        RemoteSession,
    },
    services::{
        bootstrap::{bootstrap_deployment, BootstrapError},
        keygen::generate_ed25519_keypair,
    },
    storage::{KeyStoreBackend, KeyStoreDatabase, KeyStoreError},
    types::{Account, Secret},
};

const LOG_TARGET: &str = "keymaster::services::transfer";

const EPHEMERAL_KEY_COMMENT: &str = "keymaster-transfer";

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("Not a Keymaster transfer package (magic '{0}')")]
    BadMagic(String),
    #[error("Transfer package integrity check failed (CRC mismatch)")]
    CrcMismatch,
    #[error("Malformed transfer package: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("Transfer private key is not valid base64")]
    InvalidPrivateKey,
    #[error("Recorded key for {0} does not match the key in the package")]
    HostKeyConflict(String),
    #[error("No key is recorded for {0}; the package cannot vouch for the host")]
    MissingHostKey(String),
    #[error("Bootstrap error: {0}")]
    BootstrapError(#[from] BootstrapError),
    #[error("Connection error: {0}")]
    ConnectionError(#[from] ConnectionError),
    #[error("Key store error: {0}")]
    KeyStoreError(#[from] KeyStoreError),
    #[error("Remote error: {0}")]
    RemoteError(#[from] RemoteError),
}

/// The wire form of an account hand-over between Keymaster instances. `crc` is the hex SHA-256
/// of the compact JSON encoding of every other field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TransferPackage {
    pub magic: String,
    pub user: String,
    pub host: String,
    pub host_key: String,
    /// base64 of the ephemeral private key PEM
    pub transfer_private_key: String,
    pub crc: String,
}

// The field order here fixes the bytes the crc is computed over
#[derive(Serialize)]
struct TransferPayload<'a> {
    magic: &'a str,
    user: &'a str,
    host: &'a str,
    host_key: &'a str,
    transfer_private_key: &'a str,
}

fn payload_crc(package: &TransferPackage) -> Result<String, serde_json::Error> {
    let payload = TransferPayload {
        magic: &package.magic,
        user: &package.user,
        host: &package.host,
        host_key: &package.host_key,
        transfer_private_key: &package.transfer_private_key,
    };
    let compact = serde_json::to_vec(&payload)?;
    Ok(hex::encode(Sha256::digest(&compact)))
}

/// Builds and accepts transfer packages. Export installs a fresh ephemeral key on the host so
/// the receiving instance can take over without sharing system-key material.
pub struct TransferService<TBackend, TConnector> {
    db: KeyStoreDatabase<TBackend>,
    connector: TConnector,
}

impl<TBackend, TConnector> TransferService<TBackend, TConnector>
where
    TBackend: KeyStoreBackend + 'static,
    TConnector: RemoteConnector,
{
    pub fn new(db: KeyStoreDatabase<TBackend>, connector: TConnector) -> Self {
        Self { db, connector }
    }

    /// Build a transfer package for an account: generate an ephemeral keypair, append its public
    /// half on the host, and emit the integrity-checked JSON blob.
    pub fn export_transfer_package(&self, account: &Account) -> Result<String, TransferError> {
        let keypair = generate_ed25519_keypair(EPHEMERAL_KEY_COMMENT);

        let canonical = canonicalize_host_port(&account.hostname)?;
        let known_host = self
            .db
            .get_known_host(&canonical)?
            .ok_or_else(|| TransferError::MissingHostKey(canonical.clone()))?;

        self.install_ephemeral_key(account, &keypair.public_key_line)?;
        info!(
            target: LOG_TARGET,
            "Installed transfer key on {} for hand-over", account.address()
        );

        let mut package = TransferPackage {
            magic: TRANSFER_PACKAGE_MAGIC.to_string(),
            user: account.username.clone(),
            host: account.hostname.clone(),
            host_key: known_host.key,
            transfer_private_key: STANDARD.encode(keypair.private_key_pem.reveal()),
            crc: String::new(),
        };
        package.crc = payload_crc(&package)?;
        Ok(serde_json::to_string(&package)?)
    }

    /// Verify and act on a transfer package: check magic and crc, seed the trusted host key, and
    /// run the bootstrap deployment with the packaged ephemeral credential.
    pub fn accept_transfer_package(&self, raw: &str) -> Result<Account, TransferError> {
        let package: TransferPackage = serde_json::from_str(raw)?;
        if package.magic != TRANSFER_PACKAGE_MAGIC {
            return Err(TransferError::BadMagic(package.magic));
        }
        if payload_crc(&package)? != package.crc {
            return Err(TransferError::CrcMismatch);
        }

        let mut private_key = Secret::new(
            STANDARD
                .decode(&package.transfer_private_key)
                .map_err(|_| TransferError::InvalidPrivateKey)?,
        );

        // First committed trust wins: a conflicting record fails closed
        let canonical = canonicalize_host_port(&package.host)?;
        match self.db.get_known_host(&canonical)? {
            None => self.db.trust_host(&canonical, &package.host_key)?,
            Some(known) if known.key == package.host_key => {},
            Some(_) => {
                private_key.zero();
                return Err(TransferError::HostKeyConflict(canonical));
            },
        }

        let result = bootstrap_deployment(
            &self.db,
            &self.connector,
            &package.user,
            &package.host,
            "",
            "",
            &private_key,
        );
        private_key.zero();
        Ok(result?)
    }

    /// Append the ephemeral public key to the host's authorized_keys through the atomic replace
    fn install_ephemeral_key(&self, account: &Account, public_key_line: &str) -> Result<(), TransferError> {
        let connect_key = if account.serial > 0 {
            self.db.get_system_key_by_serial(account.serial)?
        } else {
            self.db.get_active_system_key()?
        }
        .ok_or_else(|| {
            TransferError::BootstrapError(BootstrapError::GeneratorError(
                crate::authorized_keys::GeneratorError::NoActiveSystemKey,
            ))
        })?;

        let target = parse_host_port(&account.hostname)?;
        let mut session = connect_verified(
            &self.connector,
            &self.db,
            &account.username,
            &target.host,
            target.port_or_default(),
            Some(&connect_key.private_key),
        )?;
        let result = (|| {
            let mut content = read_authorized_keys(&mut session)?.unwrap_or_default();
            if !content.is_empty() && !content.ends_with(b"\n") {
                content.push(b'\n');
            }
            content.extend_from_slice(public_key_line.as_bytes());
            content.push(b'\n');
            deploy_authorized_keys(&mut session, &content)
        })();
        let _ = session.close();
        Ok(result?)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn package() -> TransferPackage {
        let mut package = TransferPackage {
            magic: TRANSFER_PACKAGE_MAGIC.to_string(),
            user: "alice".to_string(),
            host: "host.example".to_string(),
            host_key: "ssh-ed25519 HOSTKEY host.example".to_string(),
            transfer_private_key: STANDARD.encode(b"pem bytes"),
            crc: String::new(),
        };
        package.crc = payload_crc(&package).unwrap();
        package
    }

    #[test]
    fn crc_is_stable_for_identical_payloads() {
        let a = package();
        let b = package();
        assert_eq!(a.crc, b.crc);
        assert_eq!(a.crc.len(), 64);
    }

    #[test]
    fn crc_changes_with_any_field() {
        let reference = package();
        let mut tampered = reference.clone();
        tampered.host = "other.example".to_string();
        assert_ne!(payload_crc(&tampered).unwrap(), reference.crc);
    }

    #[test]
    fn package_serializes_with_magic() {
        let encoded = serde_json::to_string(&package()).unwrap();
        assert!(encoded.contains("\"magic\":\"keymaster-transfer-v1\""));
    }
}
