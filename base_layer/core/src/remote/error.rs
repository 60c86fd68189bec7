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

use thiserror::Error;

use crate::storage::KeyStoreError;

/// Errors raised while interpreting host specs and other remote-side inputs
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Invalid host spec: {0}")]
    InvalidHostSpec(String),
}

/// Failures while talking to a managed host. Transport-level problems, authentication
/// exhaustion, trust-on-first-use violations and remote execution failures are distinguished so
/// callers can retry, fall back or fail closed appropriately.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Connection to {host} timed out")]
    Timeout { host: String },
    #[error("Connection to {host} was refused")]
    Refused { host: String },
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("All authentication methods failed: {0}")]
    AuthFailed(String),
    #[error("No key is recorded for {host}; trust it explicitly before connecting")]
    UnknownHostKey { host: String },
    #[error("Recorded key for {host} does not match the key presented by the host")]
    HostKeyMismatch { host: String },
    #[error("Remote command '{command}' exited with status {status}: {stderr}")]
    RemoteCommand {
        command: String,
        status: i32,
        stderr: String,
    },
    #[error("SFTP error: {0}")]
    Sftp(String),
    #[error("Remote file not found: {0}")]
    FileNotFound(String),
    #[error("Operation cancelled")]
    Cancelled,
    #[error("Key store error: {0}")]
    KeyStoreError(#[from] KeyStoreError),
}

/// True for errors caused by an expired connect, command or transfer deadline
pub fn is_timeout_error(err: &ConnectionError) -> bool {
    matches!(err, ConnectionError::Timeout { .. })
}

/// True when the host actively refused the connection
pub fn is_refused_error(err: &ConnectionError) -> bool {
    matches!(err, ConnectionError::Refused { .. })
}

/// True when every configured authentication method was rejected
pub fn is_auth_error(err: &ConnectionError) -> bool {
    matches!(err, ConnectionError::AuthFailed(_))
}

/// True for trust-on-first-use violations
pub fn is_host_key_error(err: &ConnectionError) -> bool {
    matches!(
        err,
        ConnectionError::UnknownHostKey { .. } | ConnectionError::HostKeyMismatch { .. }
    )
}

/// A single-line, operator-facing description of a connection failure, prefixed with the host it
/// concerns.
pub fn classify_connection_error(host: &str, err: &ConnectionError) -> String {
    let reason = match err {
        ConnectionError::Timeout { .. } => "connection timed out".to_string(),
        ConnectionError::Refused { .. } => "connection refused".to_string(),
        ConnectionError::AuthFailed(detail) => format!("authentication failed ({})", detail),
        ConnectionError::UnknownHostKey { .. } => {
            "host key is not trusted yet; run a trust operation first".to_string()
        },
        ConnectionError::HostKeyMismatch { .. } => {
            "host key changed since it was trusted; refusing to connect".to_string()
        },
        other => other.to_string(),
    };
    format!("{}: {}", host, reason)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn classification_predicates() {
        let timeout = ConnectionError::Timeout { host: "h:22".to_string() };
        let refused = ConnectionError::Refused { host: "h:22".to_string() };
        let auth = ConnectionError::AuthFailed("all methods".to_string());
        let unknown = ConnectionError::UnknownHostKey { host: "h:22".to_string() };
        let mismatch = ConnectionError::HostKeyMismatch { host: "h:22".to_string() };

        assert!(is_timeout_error(&timeout));
        assert!(!is_timeout_error(&refused));
        assert!(is_refused_error(&refused));
        assert!(is_auth_error(&auth));
        assert!(is_host_key_error(&unknown));
        assert!(is_host_key_error(&mismatch));
        assert!(!is_host_key_error(&auth));
    }

    #[test]
    fn classified_message_is_prefixed_with_host() {
        let err = ConnectionError::Timeout { host: "files.example.org:22".to_string() };
        let message = classify_connection_error("files.example.org:22", &err);
        assert!(message.starts_with("files.example.org:22: "));
        assert!(message.contains("timed out"));
    }
}
