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

use crate::{consts::DEFAULT_SSH_PORT, remote::error::RemoteError};

/// A host spec broken into its parts. `username` is only present when the spec carried a
/// `user@` prefix; `port` only when one was given explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPort {
    pub username: Option<String>,
    pub host: String,
    pub port: Option<u16>,
}

impl HostPort {
    pub fn port_or_default(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_SSH_PORT)
    }
}

/// Parse a host spec in any of the accepted forms: `user@host`, `host`, `host:port`, `[v6]`,
/// `[v6]:port` and bare IPv6.
///
/// A spec with more than one colon outside brackets is taken as a bare IPv6 address; a single
/// colon separates host and port.
pub fn parse_host_port(spec: &str) -> Result<HostPort, RemoteError> {
    let spec = spec.trim();
    if spec.is_empty() {
        return Err(RemoteError::InvalidHostSpec("empty host spec".to_string()));
    }

    let (username, rest) = match spec.split_once('@') {
        Some((user, rest)) => {
            if user.is_empty() {
                return Err(RemoteError::InvalidHostSpec(format!("missing username in '{}'", spec)));
            }
            (Some(user.to_string()), rest)
        },
        None => (None, spec),
    };

    let (host, port) = split_host_port(rest)?;
    if host.is_empty() {
        return Err(RemoteError::InvalidHostSpec(format!("missing host in '{}'", spec)));
    }
    Ok(HostPort { username, host, port })
}

fn split_host_port(rest: &str) -> Result<(String, Option<u16>), RemoteError> {
    if let Some(stripped) = rest.strip_prefix('[') {
        // bracketed IPv6, optionally followed by :port
        let (host, tail) = stripped
            .split_once(']')
            .ok_or_else(|| RemoteError::InvalidHostSpec(format!("unterminated '[' in '{}'", rest)))?;
        let port = match tail {
            "" => None,
            tail => Some(parse_port(tail.strip_prefix(':').ok_or_else(|| {
                RemoteError::InvalidHostSpec(format!("unexpected trailing '{}' in '{}'", tail, rest))
            })?)?),
        };
        return Ok((host.to_string(), port));
    }

    match rest.matches(':').count() {
        0 => Ok((rest.to_string(), None)),
        1 => {
            let (host, port) = rest.split_once(':').expect("one colon");
            Ok((host.to_string(), Some(parse_port(port)?)))
        },
        // two or more colons without brackets can only be a bare IPv6 address
        _ => Ok((rest.to_string(), None)),
    }
}

fn parse_port(port: &str) -> Result<u16, RemoteError> {
    port.parse()
        .map_err(|_| RemoteError::InvalidHostSpec(format!("invalid port '{}'", port)))
}

/// The canonical `host:port` form used as the identity for known-host lookups. IPv6 hosts are
/// always bracketed.
pub fn canonicalize_host_port(spec: &str) -> Result<String, RemoteError> {
    let parsed = parse_host_port(spec)?;
    Ok(canonical_form(&parsed.host, parsed.port_or_default()))
}

/// Render a host and port in canonical form
pub fn canonical_form(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn plain_host() {
        let parsed = parse_host_port("files.example.org").unwrap();
        assert_eq!(parsed.username, None);
        assert_eq!(parsed.host, "files.example.org");
        assert_eq!(parsed.port, None);
        assert_eq!(parsed.port_or_default(), 22);
    }

    #[test]
    fn user_host_and_port() {
        let parsed = parse_host_port("deploy@files.example.org:2222").unwrap();
        assert_eq!(parsed.username.as_deref(), Some("deploy"));
        assert_eq!(parsed.host, "files.example.org");
        assert_eq!(parsed.port, Some(2222));
    }

    #[test]
    fn bracketed_ipv6_with_port() {
        let parsed = parse_host_port("user@[2001:db8::1]:2222").unwrap();
        assert_eq!(parsed.username.as_deref(), Some("user"));
        assert_eq!(parsed.host, "2001:db8::1");
        assert_eq!(parsed.port, Some(2222));
    }

    #[test]
    fn bracketed_ipv6_without_port() {
        let parsed = parse_host_port("[2001:db8::1]").unwrap();
        assert_eq!(parsed.host, "2001:db8::1");
        assert_eq!(parsed.port, None);
    }

    #[test]
    fn bare_ipv6_is_all_host() {
        let parsed = parse_host_port("2001:db8::1").unwrap();
        assert_eq!(parsed.host, "2001:db8::1");
        assert_eq!(parsed.port, None);
    }

    #[test]
    fn canonical_forms() {
        assert_eq!(canonicalize_host_port("files.example.org").unwrap(), "files.example.org:22");
        assert_eq!(canonicalize_host_port("files.example.org:2222").unwrap(), "files.example.org:2222");
        assert_eq!(
            canonicalize_host_port("user@[2001:db8::1]:2222").unwrap(),
            "[2001:db8::1]:2222"
        );
        assert_eq!(canonicalize_host_port("2001:db8::1").unwrap(), "[2001:db8::1]:22");
    }

    #[test]
    fn rejects_malformed_specs() {
        assert!(parse_host_port("").is_err());
        assert!(parse_host_port("@host").is_err());
        assert!(parse_host_port("host:notaport").is_err());
        assert!(parse_host_port("[2001:db8::1").is_err());
        assert!(parse_host_port("[2001:db8::1]x").is_err());
    }
}
