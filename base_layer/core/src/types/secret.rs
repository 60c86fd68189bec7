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

use std::fmt;

use serde::{Serialize, Serializer};
use zeroize::Zeroize;

/// The string emitted wherever a [`Secret`] is displayed or serialized.
pub const REDACTED: &str = "[SECRET]";

/// An owned byte container for private key material and other sensitive values.
///
/// Every standard rendering (`Display`, `Debug`, serde serialization) yields the literal
/// `[SECRET]`; the interior bytes are only reachable through [`Secret::reveal`] and
/// [`Secret::bytes`]. The contents are wiped on drop. `Clone` and `Copy` are intentionally not
/// implemented so that exactly one owner is responsible for zeroing.
#[derive(Default)]
pub struct Secret {
    bytes: Vec<u8>,
}

impl Secret {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    /// An independent copy of the interior bytes. Mutating the returned buffer has no effect on
    /// the secret itself.
    pub fn bytes(&self) -> Vec<u8> {
        self.bytes.clone()
    }

    /// Lend the interior bytes out without copying.
    pub fn reveal(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Overwrite the interior bytes with zeroes in place. A no-op on an empty secret.
    pub fn zero(&mut self) {
        self.bytes.as_mut_slice().zeroize();
    }
}

impl From<Vec<u8>> for Secret {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

impl From<String> for Secret {
    fn from(s: String) -> Self {
        Self::new(s.into_bytes())
    }
}

impl From<&str> for Secret {
    fn from(s: &str) -> Self {
        Self::new(s.as_bytes().to_vec())
    }
}

impl Drop for Secret {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl Serialize for Secret {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(REDACTED)
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl Eq for Secret {}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn display_and_debug_are_redacted() {
        let secret = Secret::from("super secret");
        assert_eq!(format!("{}", secret), REDACTED);
        assert_eq!(format!("{:?}", secret), REDACTED);
        assert_eq!(format!("{:>20}", secret), REDACTED);
    }

    #[test]
    fn serialization_is_redacted() {
        let secret = Secret::from("super secret");
        assert_eq!(serde_json::to_string(&secret).unwrap(), "\"[SECRET]\"");
    }

    #[test]
    fn bytes_returns_an_independent_copy() {
        let secret = Secret::from("abc");
        let mut copy = secret.bytes();
        copy[0] = b'x';
        assert_eq!(secret.reveal(), b"abc");
    }

    #[test]
    fn zero_overwrites_in_place() {
        let mut secret = Secret::from("abc");
        secret.zero();
        assert_eq!(secret.len(), 3);
        assert!(secret.reveal().iter().all(|b| *b == 0));
    }

    #[test]
    fn zero_on_empty_is_a_noop() {
        let mut secret = Secret::default();
        secret.zero();
        assert!(secret.is_empty());
    }
}
