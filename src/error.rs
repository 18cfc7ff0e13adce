// Copyright (c) 2023 The TQUIC Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Error type for congestion control operations.

use strum_macros::EnumIter;

/// Congestion controller error.
#[derive(Clone, Debug, PartialEq, Eq, EnumIter)]
pub enum Error {
    /// The rate sample carries a negative delivered count or interval, and
    /// was discarded without touching the controller state.
    InvalidSample,

    /// The controller was used before `init()` completed or after
    /// `release()`.
    Uninitialized,

    /// The interval history could not be allocated while setting up a flow.
    AllocationFailure,

    /// The configuration is invalid.
    InvalidConfig(String),

    /// The operation cannot be completed because it was attempted in an
    /// invalid state.
    InvalidState(String),

    /// There is no more work to do.
    Done,

    /// I/O error.
    IoError(String),
}

impl Error {
    /// Whether the error is recovered locally by dropping the current event.
    ///
    /// Such errors never reach the host stack as a failure.
    pub fn is_local(&self) -> bool {
        matches!(self, Error::InvalidSample | Error::Uninitialized)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        None
    }
}

impl std::convert::From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::IoError(format!("{}", err))
    }
}

impl std::convert::From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::IoError(format!("{}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn local_errors() {
        for err in Error::iter() {
            match err {
                Error::InvalidSample | Error::Uninitialized => assert!(err.is_local()),
                _ => assert!(!err.is_local()),
            }
        }
        assert_eq!(Error::iter().filter(|e| e.is_local()).count(), 2);
    }

    #[test]
    fn io_error() {
        use std::error::Error;
        let e = std::io::Error::from(std::io::ErrorKind::UnexpectedEof);
        let e = super::Error::from(e);

        assert_eq!(format!("{}", e), "IoError(\"unexpected end of file\")");
        assert!(e.source().is_none());
    }

    #[test]
    fn display() {
        assert_eq!(format!("{}", Error::InvalidSample), "InvalidSample");
        assert_eq!(
            format!("{}", Error::InvalidConfig("num_intervals".into())),
            "InvalidConfig(\"num_intervals\")"
        );
    }
}
