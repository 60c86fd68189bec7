// Copyright 2023. The Keymaster Project
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

use diesel::result::Error as DieselError;

use crate::error::SqliteStorageError;

/// sqlite does not implement `get_result` for UPDATE/DELETE, so affected-row counts are all we
/// have to detect a missing target row.
pub trait ExpectedRowsExtension {
    fn num_rows_affected_or_not_found(self, expected: usize) -> Result<usize, SqliteStorageError>;
}

impl ExpectedRowsExtension for Result<usize, DieselError> {
    fn num_rows_affected_or_not_found(self, expected: usize) -> Result<usize, SqliteStorageError> {
        match self {
            Ok(0) => Err(SqliteStorageError::DieselError(DieselError::NotFound)),
            Ok(actual) if actual == expected => Ok(actual),
            Ok(actual) => Err(SqliteStorageError::UnexpectedRowCount { expected, actual }),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn zero_rows_is_not_found() {
        let result: Result<usize, DieselError> = Ok(0);
        assert!(matches!(
            result.num_rows_affected_or_not_found(1),
            Err(SqliteStorageError::DieselError(DieselError::NotFound))
        ));
    }

    #[test]
    fn expected_rows_pass_through() {
        let result: Result<usize, DieselError> = Ok(1);
        assert_eq!(result.num_rows_affected_or_not_found(1).unwrap(), 1);
    }

    #[test]
    fn surplus_rows_are_an_error() {
        let result: Result<usize, DieselError> = Ok(3);
        assert!(matches!(
            result.num_rows_affected_or_not_found(1),
            Err(SqliteStorageError::UnexpectedRowCount { expected: 1, actual: 3 })
        ));
    }
}
