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

//! SSH session abstraction and the policies layered on it: host-spec canonicalization,
//! trust-on-first-use enforcement, authentication ordering and the atomic authorized_keys
//! replace.

pub mod address;
pub mod error;
pub mod session;

pub use address::{canonical_form, canonicalize_host_port, parse_host_port, HostPort};
pub use error::{
    classify_connection_error,
    is_auth_error,
    is_host_key_error,
    is_refused_error,
    is_timeout_error,
    ConnectionError,
    RemoteError,
};
pub use session::{
    connect_verified,
    connect_with_fallback,
    deploy_authorized_keys,
    ensure_ssh_dir,
    read_authorized_keys,
    remove_authorized_keys,
    verify_host_key,
    verify_or_trust_host_key,
    AuthMethod,
    ConnectTarget,
    ExecOutput,
    RemoteConnector,
    RemoteSession,
};
