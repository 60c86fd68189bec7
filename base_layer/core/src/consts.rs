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

use std::time::Duration;

/// Default timeout for establishing an SSH connection to a managed host
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Default timeout for a single remote command execution
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);
/// Default timeout for a single SFTP transfer
pub const DEFAULT_SFTP_TIMEOUT: Duration = Duration::from_secs(60);

/// Default SSH port used when a host spec carries no explicit port
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Remote directory that holds the authorized_keys file, relative to the account home
pub const SSH_DIR: &str = ".ssh";
/// Remote path of the managed file, relative to the account home
pub const AUTHORIZED_KEYS_PATH: &str = ".ssh/authorized_keys";

/// First line of every Keymaster-managed section, before the serial is appended
pub const MANAGED_HEADER_PREFIX: &str = "# Keymaster Managed Keys";
/// Header of the user-key block inside the managed section
pub const USER_KEYS_HEADER: &str = "# User Keys";
/// Restrictions applied to the system key on every managed host
pub const SYSTEM_KEY_RESTRICTIONS: &str =
    "command=\"internal-sftp\",no-port-forwarding,no-x11-forwarding,no-agent-forwarding,no-pty";

/// Bootstrap sessions are swept once this much time has passed since creation
pub const BOOTSTRAP_SESSION_TTL: Duration = Duration::from_secs(30 * 60);

/// Number of times the post-deploy serial advance is retried on write contention
pub const SERIAL_ADVANCE_MAX_RETRIES: usize = 5;
/// Bounds of the jittered backoff between serial advance attempts, in milliseconds
pub const SERIAL_ADVANCE_BACKOFF_MS: (u64, u64) = (50, 150);

/// Magic tag identifying a Keymaster transfer package
pub const TRANSFER_PACKAGE_MAGIC: &str = "keymaster-transfer-v1";

/// Environment variable holding the ssh-agent socket path on unix systems
pub const SSH_AUTH_SOCK_ENV: &str = "SSH_AUTH_SOCK";
