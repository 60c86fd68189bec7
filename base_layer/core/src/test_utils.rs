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

//! In-memory doubles for the remote-session abstraction, used by the crate's own tests and by
//! downstream integration tests.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use crate::{
    consts::AUTHORIZED_KEYS_PATH,
    remote::{AuthMethod, ConnectTarget, ConnectionError, ExecOutput, RemoteConnector, RemoteSession},
};

#[derive(Debug, Default)]
struct MockHostState {
    files: HashMap<String, Vec<u8>>,
    permissions: HashMap<String, u32>,
    exec_log: Vec<String>,
    refuse_exec: bool,
}

/// The filesystem and exec state of one fake host, shared between the test and any sessions
/// handed out for it.
#[derive(Debug, Clone, Default)]
pub struct MockRemoteHost {
    state: Arc<Mutex<MockHostState>>,
}

impl MockRemoteHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_file(&self, path: &str, content: &[u8]) {
        self.state.lock().unwrap().files.insert(path.to_string(), content.to_vec());
    }

    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.state.lock().unwrap().files.get(path).cloned()
    }

    pub fn authorized_keys(&self) -> Option<String> {
        self.file(AUTHORIZED_KEYS_PATH).map(|c| String::from_utf8_lossy(&c).into_owned())
    }

    pub fn permissions(&self, path: &str) -> Option<u32> {
        self.state.lock().unwrap().permissions.get(path).copied()
    }

    pub fn exec_log(&self) -> Vec<String> {
        self.state.lock().unwrap().exec_log.clone()
    }

    /// Emulate a restricted shell that cannot execute commands
    pub fn refuse_exec(&self) {
        self.state.lock().unwrap().refuse_exec = true;
    }

    /// Count of temp files left lying around outside the real target path
    pub fn stray_temp_files(&self) -> usize {
        self.state
            .lock()
            .unwrap()
            .files
            .keys()
            .filter(|p| p.starts_with(".ssh/authorized_keys.") && p.as_str() != AUTHORIZED_KEYS_PATH)
            .count()
    }
}

/// A scripted [`RemoteSession`] over a [`MockRemoteHost`]
pub struct MockRemoteSession {
    host: MockRemoteHost,
    host_key_line: String,
}

impl MockRemoteSession {
    pub fn new(host: MockRemoteHost, host_key_line: &str) -> Self {
        Self {
            host,
            host_key_line: host_key_line.to_string(),
        }
    }
}

impl RemoteSession for MockRemoteSession {
    fn host_key_line(&self) -> &str {
        &self.host_key_line
    }

    fn exec(&mut self, command: &str) -> Result<ExecOutput, ConnectionError> {
        let mut state = self.host.state.lock().unwrap();
        state.exec_log.push(command.to_string());
        if state.refuse_exec {
            return Ok(ExecOutput {
                status: 127,
                stdout: Vec::new(),
                stderr: b"command execution is not allowed".to_vec(),
            });
        }
        // Understand the two command shapes the core issues
        if command.starts_with("mkdir -p ") {
            return Ok(ExecOutput::default());
        }
        if let Some(rest) = command.strip_prefix("mv ") {
            let mut parts = rest.split_whitespace();
            let (Some(from), Some(to)) = (parts.next(), parts.next()) else {
                return Ok(ExecOutput {
                    status: 1,
                    stdout: Vec::new(),
                    stderr: b"usage: mv src dst".to_vec(),
                });
            };
            match state.files.remove(from) {
                Some(content) => {
                    state.files.insert(to.to_string(), content);
                    state.permissions.insert(to.to_string(), 0o600);
                    return Ok(ExecOutput::default());
                },
                None => {
                    return Ok(ExecOutput {
                        status: 1,
                        stdout: Vec::new(),
                        stderr: format!("mv: {}: No such file or directory", from).into_bytes(),
                    })
                },
            }
        }
        Ok(ExecOutput::default())
    }

    fn read_file(&mut self, path: &str) -> Result<Vec<u8>, ConnectionError> {
        self.host
            .state
            .lock()
            .unwrap()
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| ConnectionError::FileNotFound(path.to_string()))
    }

    fn write_file(&mut self, path: &str, content: &[u8]) -> Result<(), ConnectionError> {
        self.host
            .state
            .lock()
            .unwrap()
            .files
            .insert(path.to_string(), content.to_vec());
        Ok(())
    }

    fn rename(&mut self, from: &str, to: &str) -> Result<(), ConnectionError> {
        let mut state = self.host.state.lock().unwrap();
        let content = state
            .files
            .remove(from)
            .ok_or_else(|| ConnectionError::FileNotFound(from.to_string()))?;
        state.files.insert(to.to_string(), content);
        Ok(())
    }

    fn set_permissions(&mut self, path: &str, mode: u32) -> Result<(), ConnectionError> {
        self.host.state.lock().unwrap().permissions.insert(path.to_string(), mode);
        Ok(())
    }

    fn make_dir(&mut self, _path: &str, _mode: u32) -> Result<(), ConnectionError> {
        Ok(())
    }

    fn remove_file(&mut self, path: &str) -> Result<(), ConnectionError> {
        self.host
            .state
            .lock()
            .unwrap()
            .files
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| ConnectionError::FileNotFound(path.to_string()))
    }

    fn close(&mut self) -> Result<(), ConnectionError> {
        Ok(())
    }
}

#[derive(Debug)]
struct MockEndpoint {
    host: MockRemoteHost,
    host_key_line: String,
    accepted_keys: Vec<Vec<u8>>,
    accept_agent: bool,
    transport_error: Option<MockTransportError>,
}

/// Scripted transport-level failure for one endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockTransportError {
    Timeout,
    Refused,
}

/// A [`RemoteConnector`] over a set of scripted endpoints keyed by `user@host:port`
#[derive(Clone, Default)]
pub struct MockRemoteConnector {
    endpoints: Arc<Mutex<HashMap<String, MockEndpoint>>>,
    agent_reachable: Arc<Mutex<bool>>,
}

impl MockRemoteConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an endpoint and return its host state for inspection
    pub fn add_endpoint(&self, username: &str, host: &str, port: u16, host_key_line: &str) -> MockRemoteHost {
        let remote = MockRemoteHost::new();
        self.register_host(username, host, port, host_key_line, remote.clone());
        remote
    }

    /// Register an endpoint backed by existing host state, so two connectors can share one host
    pub fn register_host(
        &self,
        username: &str,
        host: &str,
        port: u16,
        host_key_line: &str,
        remote: MockRemoteHost,
    ) {
        self.endpoints.lock().unwrap().insert(endpoint_key(username, host, port), MockEndpoint {
            host: remote,
            host_key_line: host_key_line.to_string(),
            accepted_keys: Vec::new(),
            accept_agent: false,
            transport_error: None,
        });
    }

    /// Accept the given private key bytes for an endpoint
    pub fn accept_key(&self, username: &str, host: &str, port: u16, key: &[u8]) {
        if let Some(endpoint) = self.endpoints.lock().unwrap().get_mut(&endpoint_key(username, host, port)) {
            endpoint.accepted_keys.push(key.to_vec());
        }
    }

    pub fn accept_agent(&self, username: &str, host: &str, port: u16) {
        if let Some(endpoint) = self.endpoints.lock().unwrap().get_mut(&endpoint_key(username, host, port)) {
            endpoint.accept_agent = true;
        }
    }

    pub fn fail_transport(&self, username: &str, host: &str, port: u16, error: MockTransportError) {
        if let Some(endpoint) = self.endpoints.lock().unwrap().get_mut(&endpoint_key(username, host, port)) {
            endpoint.transport_error = Some(error);
        }
    }

    pub fn set_agent_reachable(&self, reachable: bool) {
        *self.agent_reachable.lock().unwrap() = reachable;
    }
}

fn endpoint_key(username: &str, host: &str, port: u16) -> String {
    format!("{}@{}:{}", username, host, port)
}

impl RemoteConnector for MockRemoteConnector {
    type Session = MockRemoteSession;

    fn connect(&self, target: &ConnectTarget<'_>) -> Result<Self::Session, ConnectionError> {
        let endpoints = self.endpoints.lock().unwrap();
        let endpoint = endpoints
            .get(&endpoint_key(target.username, target.host, target.port))
            .ok_or_else(|| ConnectionError::Transport(format!("no route to {}", target.host)))?;
        match endpoint.transport_error {
            Some(MockTransportError::Timeout) => {
                return Err(ConnectionError::Timeout { host: target.canonical_host() })
            },
            Some(MockTransportError::Refused) => {
                return Err(ConnectionError::Refused { host: target.canonical_host() })
            },
            None => {},
        }
        let authenticated = match &target.auth {
            AuthMethod::PrivateKey(secret) => endpoint.accepted_keys.iter().any(|k| k == secret.reveal()),
            AuthMethod::Agent => endpoint.accept_agent,
        };
        if !authenticated {
            return Err(ConnectionError::AuthFailed(format!(
                "{}@{}: permission denied (publickey)",
                target.username, target.host
            )));
        }
        Ok(MockRemoteSession::new(endpoint.host.clone(), &endpoint.host_key_line))
    }

    fn agent_available(&self) -> bool {
        *self.agent_reachable.lock().unwrap()
    }
}
