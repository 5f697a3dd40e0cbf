// Copyright Rouven Bauer
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use thiserror::Error;

use crate::error_::DriverError;

/// A value doesn't fit the wire format (e.g., an oversized collection or a
/// temporal value the negotiated protocol version cannot express).
#[derive(Error, Debug)]
#[error("{reason}")]
pub(crate) struct SerializeError {
    reason: String,
}

impl SerializeError {
    pub(crate) fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    pub(crate) fn too_large(what: &str, max: usize) -> Self {
        Self::new(format!("{what} exceeds the maximum wire size of {max}"))
    }
}

impl From<SerializeError> for DriverError {
    fn from(err: SerializeError) -> Self {
        DriverError::Serialization { message: err.reason }
    }
}

/// Received bytes could not be decoded: either the buffer ended early /
/// carried an unknown marker ([`DeserializeError::Malformed`]), or the data
/// was well-formed PackStream that is illegal at this point of the protocol
/// ([`DeserializeError::ProtocolViolation`]).
#[derive(Error, Debug)]
pub(crate) enum DeserializeError {
    #[error("{0}")]
    Malformed(String),
    #[error("{0}")]
    ProtocolViolation(String),
}

impl DeserializeError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed(reason.into())
    }

    pub(crate) fn protocol_violation(reason: impl Into<String>) -> Self {
        Self::ProtocolViolation(reason.into())
    }
}

impl From<DeserializeError> for DriverError {
    fn from(err: DeserializeError) -> Self {
        match err {
            DeserializeError::Malformed(message) => DriverError::Deserialization { message },
            DeserializeError::ProtocolViolation(message) => {
                DriverError::InvalidMessageFormat { message }
            }
        }
    }
}
