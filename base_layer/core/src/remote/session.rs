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

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use log::*;

use crate::{
    consts::{AUTHORIZED_KEYS_PATH, DEFAULT_CONNECT_TIMEOUT, SSH_AUTH_SOCK_ENV, SSH_DIR},
    remote::{address::canonical_form, error::ConnectionError},
    storage::{KeyStoreBackend, KeyStoreDatabase},
    types::Secret,
};

const LOG_TARGET: &str = "keymaster::remote::session";

/// The captured result of one remote command execution
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub status: i32,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }

    pub fn stderr_string(&self) -> String {
        String::from_utf8_lossy(&self.stderr).trim().to_string()
    }
}

/// How a connection should authenticate
#[derive(Debug)]
pub enum AuthMethod<'a> {
    /// A private key in OpenSSH PEM form (the system key or a bootstrap/transfer ephemeral key)
    PrivateKey(&'a Secret),
    /// Identities offered by a reachable ssh-agent
    Agent,
}

/// Everything a transport needs to dial one host
#[derive(Debug)]
pub struct ConnectTarget<'a> {
    pub username: &'a str,
    pub host: &'a str,
    pub port: u16,
    pub auth: AuthMethod<'a>,
    pub connect_timeout: Duration,
}

impl<'a> ConnectTarget<'a> {
    pub fn new(username: &'a str, host: &'a str, port: u16, auth: AuthMethod<'a>) -> Self {
        Self {
            username,
            host,
            port,
            auth,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Canonical `host:port` identity of the target
    pub fn canonical_host(&self) -> String {
        canonical_form(self.host, self.port)
    }
}

/// One authenticated SSH session to a managed host, exposing the SFTP and exec primitives the
/// core builds its policies on. Sessions are never shared between operations; each deploy, audit
/// or decommission run owns its own.
pub trait RemoteSession {
    /// The host key presented during the handshake, rendered as an authorized-keys line
    fn host_key_line(&self) -> &str;
    /// Run a command on the remote host. A non-zero exit status is reported through
    /// [`ExecOutput`], not as an error; `Err` means the command could not be executed at all
    /// (restricted shell, dropped connection).
    fn exec(&mut self, command: &str) -> Result<ExecOutput, ConnectionError>;
    /// Read a whole file. A missing file is [`ConnectionError::FileNotFound`], distinct from
    /// transport failures.
    fn read_file(&mut self, path: &str) -> Result<Vec<u8>, ConnectionError>;
    fn write_file(&mut self, path: &str, content: &[u8]) -> Result<(), ConnectionError>;
    fn rename(&mut self, from: &str, to: &str) -> Result<(), ConnectionError>;
    fn set_permissions(&mut self, path: &str, mode: u32) -> Result<(), ConnectionError>;
    /// Create a directory; succeeds when the directory already exists
    fn make_dir(&mut self, path: &str, mode: u32) -> Result<(), ConnectionError>;
    fn remove_file(&mut self, path: &str) -> Result<(), ConnectionError>;
    fn close(&mut self) -> Result<(), ConnectionError>;
}

/// A factory for [`RemoteSession`]s. The concrete SSH transport lives behind this trait; the
/// core contributes the authentication-order, trust and atomic-replace policies.
pub trait RemoteConnector {
    type Session: RemoteSession;

    fn connect(&self, target: &ConnectTarget<'_>) -> Result<Self::Session, ConnectionError>;

    /// Whether an ssh-agent is reachable for fallback authentication
    fn agent_available(&self) -> bool {
        std::env::var(SSH_AUTH_SOCK_ENV).is_ok()
    }
}

/// Establish a session using the configured authentication order: the private key alone when one
/// is given, falling back to an ssh-agent only when the key was rejected for authentication
/// reasons. Transport errors abort immediately.
pub fn connect_with_fallback<C: RemoteConnector>(
    connector: &C,
    username: &str,
    host: &str,
    port: u16,
    private_key: Option<&Secret>,
) -> Result<C::Session, ConnectionError> {
    if let Some(key) = private_key {
        let target = ConnectTarget::new(username, host, port, AuthMethod::PrivateKey(key));
        match connector.connect(&target) {
            Ok(session) => return Ok(session),
            Err(e) if crate::remote::is_auth_error(&e) => {
                if !connector.agent_available() {
                    return Err(e);
                }
                debug!(
                    target: LOG_TARGET,
                    "Key authentication for {}@{} failed, falling back to agent", username, host
                );
            },
            Err(e) => return Err(e),
        }
    } else if !connector.agent_available() {
        return Err(ConnectionError::AuthFailed(
            "no private key configured and no agent is reachable".to_string(),
        ));
    }
    connector.connect(&ConnectTarget::new(username, host, port, AuthMethod::Agent))
}

/// Enforce trust-on-first-use strictly: an unrecorded host fails closed and a recorded host must
/// present a byte-identical key.
pub fn verify_host_key<T, S>(
    db: &KeyStoreDatabase<T>,
    session: &S,
    host: &str,
    port: u16,
) -> Result<(), ConnectionError>
where
    T: KeyStoreBackend + 'static,
    S: RemoteSession,
{
    let canonical = canonical_form(host, port);
    match db.get_known_host(&canonical)? {
        None => Err(ConnectionError::UnknownHostKey { host: canonical }),
        Some(known) if known.key == session.host_key_line() => Ok(()),
        Some(_) => Err(ConnectionError::HostKeyMismatch { host: canonical }),
    }
}

/// Trust-on-first-use for flows that establish trust (bootstrap, transfer accept): an unrecorded
/// host key is recorded and trusted; a recorded one must still match exactly.
pub fn verify_or_trust_host_key<T, S>(
    db: &KeyStoreDatabase<T>,
    session: &S,
    host: &str,
    port: u16,
) -> Result<(), ConnectionError>
where
    T: KeyStoreBackend + 'static,
    S: RemoteSession,
{
    let canonical = canonical_form(host, port);
    match db.get_known_host(&canonical)? {
        None => {
            info!(target: LOG_TARGET, "Trusting {} on first use", canonical);
            db.trust_host(&canonical, session.host_key_line())?;
            Ok(())
        },
        Some(known) if known.key == session.host_key_line() => Ok(()),
        Some(_) => Err(ConnectionError::HostKeyMismatch { host: canonical }),
    }
}

/// Connect with auth fallback and strict host-key verification. The session is closed again when
/// verification fails.
pub fn connect_verified<C, T>(
    connector: &C,
    db: &KeyStoreDatabase<T>,
    username: &str,
    host: &str,
    port: u16,
    private_key: Option<&Secret>,
) -> Result<C::Session, ConnectionError>
where
    C: RemoteConnector,
    T: KeyStoreBackend + 'static,
{
    let mut session = connect_with_fallback(connector, username, host, port, private_key)?;
    if let Err(e) = verify_host_key(db, &session, host, port) {
        let _ = session.close();
        return Err(e);
    }
    Ok(session)
}

/// Make sure `~/.ssh` exists with owner-only permissions
pub fn ensure_ssh_dir<S: RemoteSession>(session: &mut S) -> Result<(), ConnectionError> {
    let command = format!("mkdir -p {} && chmod 700 {}", SSH_DIR, SSH_DIR);
    match session.exec(&command) {
        Ok(output) if output.success() => Ok(()),
        // restricted shells refuse exec; fall back to the SFTP primitives
        _ => {
            session.make_dir(SSH_DIR, 0o700)?;
            session.set_permissions(SSH_DIR, 0o700)
        },
    }
}

/// Atomically replace the remote authorized_keys file.
///
/// The content is written to a temporary file next to the target and moved over it in a single
/// remote command; when the server refuses to exec, the SFTP rename and chmod primitives take
/// over. A failure at any step leaves the previous file intact.
pub fn deploy_authorized_keys<S: RemoteSession>(session: &mut S, content: &[u8]) -> Result<(), ConnectionError> {
    ensure_ssh_dir(session)?;
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let tmp_path = format!("{}/authorized_keys.{}", SSH_DIR, suffix);
    session.write_file(&tmp_path, content)?;

    let command = format!(
        "mv {} {} && chmod 600 {}",
        tmp_path, AUTHORIZED_KEYS_PATH, AUTHORIZED_KEYS_PATH
    );
    match session.exec(&command) {
        Ok(output) if output.success() => Ok(()),
        exec_result => {
            if let Ok(output) = exec_result {
                debug!(
                    target: LOG_TARGET,
                    "Remote move exited with status {} ({}), retrying over sftp",
                    output.status,
                    output.stderr_string()
                );
            }
            match session
                .rename(&tmp_path, AUTHORIZED_KEYS_PATH)
                .and_then(|_| session.set_permissions(AUTHORIZED_KEYS_PATH, 0o600))
            {
                Ok(()) => Ok(()),
                Err(e) => {
                    // never leave the temp file behind on a failed replace
                    let _ = session.remove_file(&tmp_path);
                    Err(e)
                },
            }
        },
    }
}

/// Read the remote authorized_keys file; `None` when the file does not exist
pub fn read_authorized_keys<S: RemoteSession>(session: &mut S) -> Result<Option<Vec<u8>>, ConnectionError> {
    match session.read_file(AUTHORIZED_KEYS_PATH) {
        Ok(content) => Ok(Some(content)),
        Err(ConnectionError::FileNotFound(_)) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Remove the remote authorized_keys file; a missing file is not an error. Returns whether a
/// file was actually removed.
pub fn remove_authorized_keys<S: RemoteSession>(session: &mut S) -> Result<bool, ConnectionError> {
    match session.remove_file(AUTHORIZED_KEYS_PATH) {
        Ok(()) => Ok(true),
        Err(ConnectionError::FileNotFound(_)) => Ok(false),
        Err(e) => Err(e),
    }
}
