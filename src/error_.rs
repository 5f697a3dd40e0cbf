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

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::io;

use log::info;
use thiserror::Error;

use crate::value::ValueReceive;

/// Errors that can occur while using the transport.
///
/// **Important notes on usage:**
///  * Error messages are *not* considered part of the API.
///    They may change at any time and don't follow semantic versioning.
///  * The only string in errors that can be (somewhat<sup>1</sup>) reliably
///    used is [`ServerError::code()`].
///
/// <sup>1</sup>The code is received from the server and therefore might still
/// change depending on the server version.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum DriverError {
    /// Used when the caller violated the API contract.
    /// E.g., committing outside a transaction, configuring a fetch size of
    /// `0`, or using a driver that has been closed.
    #[error("invalid argument: {message}")]
    #[non_exhaustive]
    InvalidArgument { message: String },

    /// Used when a value could not be encoded into PackStream.
    /// E.g., a collection with more than `i32::MAX` entries or a temporal
    /// value representing a leap second.
    #[error("serialization failed: {message}")]
    #[non_exhaustive]
    Serialization { message: String },

    /// Used when bytes received from the server could not be decoded as
    /// PackStream.
    #[error("deserialization failed: {message}")]
    #[non_exhaustive]
    Deserialization { message: String },

    /// Used when structurally valid PackStream carried fields or tags that
    /// are not legal for the negotiated protocol version.
    /// If you encounter this error, there's either a bug in this crate or in
    /// the server.
    #[error("received an invalid message for the negotiated protocol version: {message}")]
    #[non_exhaustive]
    InvalidMessageFormat { message: String },

    /// Used when the handshake completed, but no protocol version both sides
    /// support could be agreed on.
    #[error("unsupported protocol version: {message}")]
    #[non_exhaustive]
    UnsupportedProtocolVersion { message: String },

    /// Used when the server sent unexpected bytes during the handshake
    /// preamble exchange.
    #[error("handshake failed: {message}")]
    #[non_exhaustive]
    HandshakeFailed { message: String },

    /// Used when experiencing a connectivity error.
    /// E.g., not being able to connect, a broken socket, or not being able to
    /// fetch routing information.
    #[error("connection failed: {message} (during commit: {during_commit}){}",
            source.as_ref().map(|err| format!(" caused by: {err}")).unwrap_or_default())]
    #[non_exhaustive]
    Network {
        message: String,
        source: Option<io::Error>,
        /// Will be true when the connection was lost while the driver cannot
        /// be sure whether the ongoing transaction has been committed or not.
        /// To recover from this situation, business logic is required to
        /// check whether the work should or shouldn't be retried.
        during_commit: bool,
    },

    /// Used when the server replied with FAILURE to a request.
    #[error("{error}")]
    #[non_exhaustive]
    Server { error: Box<ServerError> },

    /// Used when a commit or rollback failed at the protocol level.
    #[error("transaction failed: {message}")]
    #[non_exhaustive]
    Transaction { message: String },

    /// Used when a request requires a Bolt version or feature the connection
    /// did not negotiate.
    /// E.g., impersonation over Bolt 4.3 or earlier.
    #[error("feature not supported: {message}")]
    #[non_exhaustive]
    FeatureNotSupported { message: String },

    /// Used when connection acquisition timed out
    /// (`DriverConfig::with_connection_acquisition_timeout()`).
    #[error("pool exhausted: {message}")]
    #[non_exhaustive]
    PoolExhausted { message: String },

    /// Used when an asynchronous operation was cancelled before it completed.
    /// The affected connection is closed rather than reused.
    #[error("operation cancelled: {message}")]
    #[non_exhaustive]
    Cancelled { message: String },
}

impl DriverError {
    pub fn is_retryable(&self) -> bool {
        match self {
            DriverError::Server { error } => error.is_retryable(),
            DriverError::Network { during_commit, .. } => !during_commit,
            _ => false,
        }
    }

    pub(crate) fn wrap_read<T>(res: io::Result<T>) -> Result<T> {
        res.map_err(Self::read_err)
    }

    pub(crate) fn read_err(err: io::Error) -> Self {
        info!("read error: {err}");
        Self::Network {
            message: String::from("failed to read"),
            source: Some(err),
            during_commit: false,
        }
    }

    pub(crate) fn wrap_write<T>(res: io::Result<T>) -> Result<T> {
        res.map_err(Self::write_err)
    }

    pub(crate) fn write_err(err: io::Error) -> Self {
        info!("write error: {err}");
        Self::Network {
            message: String::from("failed to write"),
            source: Some(err),
            during_commit: false,
        }
    }

    pub(crate) fn connect_err(err: io::Error) -> Self {
        Self::Network {
            message: String::from("failed to open connection"),
            source: Some(err),
            during_commit: false,
        }
    }

    pub(crate) fn wrap_connect<T>(res: io::Result<T>) -> Result<T> {
        res.map_err(Self::connect_err)
    }

    pub(crate) fn disconnect(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            source: None,
            during_commit: false,
        }
    }

    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    pub(crate) fn protocol_error(message: impl Into<String>) -> Self {
        Self::InvalidMessageFormat {
            message: message.into(),
        }
    }

    pub(crate) fn feature_not_supported(message: impl Into<String>) -> Self {
        Self::FeatureNotSupported {
            message: message.into(),
        }
    }

    pub(crate) fn cancelled(message: impl Into<String>) -> Self {
        Self::Cancelled {
            message: message.into(),
        }
    }

    pub(crate) fn failed_commit(mut self) -> Self {
        if let Self::Network { during_commit, .. } = &mut self {
            *during_commit = true;
        }
        self
    }

    pub(crate) fn wrap_commit<T>(res: Result<T>) -> Result<T> {
        res.map_err(Self::failed_commit)
    }

    pub(crate) fn connection_acquisition_timeout(during: impl AsRef<str>) -> Self {
        Self::PoolExhausted {
            message: format!("connection acquisition timed out while {}", during.as_ref()),
        }
    }

    pub(crate) fn fatal_during_discovery(&self) -> bool {
        match self {
            DriverError::Server { error } => error.fatal_during_discovery(),
            DriverError::InvalidArgument { .. } => true,
            DriverError::FeatureNotSupported { .. } => true,
            _ => false,
        }
    }
}

impl From<ServerError> for DriverError {
    fn from(error: ServerError) -> Self {
        DriverError::Server {
            error: Box::new(error),
        }
    }
}

pub type Result<T> = std::result::Result<T, DriverError>;

/// A FAILURE as received from the server: a code, a human-readable message,
/// and whatever further metadata the server attached.
///
/// Codes take the shape `Neo.<classification>.<category>.<title>`.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ServerError {
    pub code: String,
    pub message: String,
    pub details: HashMap<String, ValueReceive>,
}

/// Server error codes that mark a cluster member as a stale write target
/// rather than a failed one.
const LEADER_SWITCH_CODES: [&str; 2] = [
    "Neo.ClientError.Cluster.NotALeader",
    "Neo.ClientError.General.ForbiddenOnReadOnlyDatabase",
];

impl ServerError {
    pub(crate) fn from_meta(mut meta: HashMap<String, ValueReceive>) -> Self {
        let mut take_string = |key: &str, fallback: &str| match meta.remove(key) {
            Some(ValueReceive::String(value)) => value,
            _ => String::from(fallback),
        };
        let code = take_string("code", "Neo.DatabaseError.General.UnknownError");
        let message = take_string("message", "An unknown error occurred.");
        Self {
            code: normalize_code(code),
            message,
            details: meta,
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    fn code_part(&self, index: usize) -> &str {
        self.code.split('.').nth(index).unwrap_or("")
    }

    pub fn classification(&self) -> &str {
        self.code_part(1)
    }

    pub fn category(&self) -> &str {
        self.code_part(2)
    }

    pub fn title(&self) -> &str {
        self.code_part(3)
    }

    pub(crate) fn is_retryable(&self) -> bool {
        self.classification() == "TransientError"
            || self.code == "Neo.ClientError.Security.AuthorizationExpired"
            || LEADER_SWITCH_CODES.contains(&self.code.as_str())
    }

    pub(crate) fn fatal_during_discovery(&self) -> bool {
        match self.code() {
            "Neo.ClientError.Database.DatabaseNotFound"
            | "Neo.ClientError.Transaction.InvalidBookmark"
            | "Neo.ClientError.Transaction.InvalidBookmarkMixture"
            | "Neo.ClientError.Statement.TypeError"
            | "Neo.ClientError.Statement.ArgumentError"
            | "Neo.ClientError.Request.Invalid" => true,
            code => {
                code.starts_with("Neo.ClientError.Security.")
                    && code != "Neo.ClientError.Security.AuthorizationExpired"
            }
        }
    }

    pub(crate) fn deactivates_server(&self) -> bool {
        self.code == "Neo.TransientError.General.DatabaseUnavailable"
    }

    pub(crate) fn invalidates_writer(&self) -> bool {
        LEADER_SWITCH_CODES.contains(&self.code.as_str())
    }

    pub(crate) fn with_context(&self, reason: &str) -> Self {
        Self {
            code: self.code.clone(),
            message: format!("{}: {}", reason, self.message),
            details: self.details.clone(),
        }
    }
}

/// In 5.0, some transient errors have been re-classified as client errors.
/// For consistent retry behavior against older servers, the driver re-maps
/// them, too.
fn normalize_code(code: String) -> String {
    match code.as_str() {
        "Neo.TransientError.Transaction.Terminated" => {
            String::from("Neo.ClientError.Transaction.Terminated")
        }
        "Neo.TransientError.Transaction.LockClientStopped" => {
            String::from("Neo.ClientError.Transaction.LockClientStopped")
        }
        _ => code,
    }
}

impl Display for ServerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "server error {}: {}", self.code, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::macros::hash_map;

    fn error_with_code(code: &str) -> ServerError {
        ServerError::from_meta(hash_map!(
            String::from("code") => ValueReceive::String(String::from(code)),
            String::from("message") => ValueReceive::String(String::from("boom")),
        ))
    }

    #[test]
    fn server_error_splits_code() {
        let err = error_with_code("Neo.ClientError.Statement.SyntaxError");
        assert_eq!(err.classification(), "ClientError");
        assert_eq!(err.category(), "Statement");
        assert_eq!(err.title(), "SyntaxError");
        assert!(!err.is_retryable());
    }

    #[test]
    fn server_error_defaults() {
        let err = ServerError::from_meta(hash_map!());
        assert_eq!(err.code(), "Neo.DatabaseError.General.UnknownError");
        assert_eq!(err.message(), "An unknown error occurred.");
    }

    #[test]
    fn transient_errors_are_retryable() {
        assert!(error_with_code("Neo.TransientError.General.Whatever").is_retryable());
        assert!(error_with_code("Neo.ClientError.Cluster.NotALeader").is_retryable());
    }

    #[test]
    fn legacy_terminated_code_is_remapped() {
        let err = error_with_code("Neo.TransientError.Transaction.Terminated");
        assert_eq!(err.code(), "Neo.ClientError.Transaction.Terminated");
        assert!(!err.is_retryable());
    }

    #[test]
    fn network_errors_are_retryable_unless_during_commit() {
        let err = DriverError::disconnect("socket closed");
        assert!(err.is_retryable());
        let err = err.failed_commit();
        assert!(!err.is_retryable());
    }

    #[test]
    fn leftover_failure_meta_is_kept() {
        let err = ServerError::from_meta(hash_map!(
            String::from("code") =>
                ValueReceive::String(String::from("Neo.ClientError.Statement.SyntaxError")),
            String::from("hint") => ValueReceive::String(String::from("check your query")),
        ));
        assert!(err.details.contains_key("hint"));
    }
}
