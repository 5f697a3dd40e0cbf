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

use std::result::Result as StdResult;
use std::sync::Arc;

use super::super::config::ConfigureFetchSizeError;
use super::super::config::auth::AuthToken;
use super::bookmarks::Bookmarks;

// imports for docs
#[allow(unused)]
use crate::driver::{Driver, DriverConfig};

/// Configuration for a session.
///
/// See [`Driver::session()`].
#[derive(Debug, Default)]
pub struct SessionConfig {
    pub(crate) database: Option<Arc<String>>,
    pub(crate) bookmarks: Option<Arc<Bookmarks>>,
    pub(crate) impersonated_user: Option<Arc<String>>,
    pub(crate) fetch_size: Option<i64>,
    pub(crate) auth: Option<Arc<AuthToken>>,
}

impl SessionConfig {
    /// Create a new session configuration with default values.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Specify which database the session should run against.
    ///
    /// If omitted, the server's default database is used.
    /// Always specify the database when possible, it saves round trips.
    #[inline]
    pub fn with_database(self, database: Arc<String>) -> Self {
        Self {
            database: Some(database),
            ..self
        }
    }

    /// Use the server's default database.
    ///
    /// This is the *default*.
    #[inline]
    pub fn with_default_database(self) -> Self {
        Self {
            database: None,
            ..self
        }
    }

    /// Bookmarks the session starts with; usually obtained from
    /// [`Session::last_bookmarks()`](`super::Session::last_bookmarks`) of
    /// another session to build a causal chain.
    #[inline]
    pub fn with_bookmarks(self, bookmarks: Arc<Bookmarks>) -> Self {
        Self {
            bookmarks: Some(bookmarks),
            ..self
        }
    }

    /// Start the session without bookmarks.
    ///
    /// This is the *default*.
    #[inline]
    pub fn without_bookmarks(self) -> Self {
        Self {
            bookmarks: None,
            ..self
        }
    }

    /// Execute all work in the session impersonating the given user.
    ///
    /// Requires Bolt 4.4+ and the authenticated user to have the permission
    /// to impersonate.
    #[inline]
    pub fn with_impersonated_user(self, user: Arc<String>) -> Self {
        Self {
            impersonated_user: Some(user),
            ..self
        }
    }

    /// Don't impersonate anyone.
    ///
    /// This is the *default*.
    #[inline]
    pub fn without_impersonated_user(self) -> Self {
        Self {
            impersonated_user: None,
            ..self
        }
    }

    /// Change how many records are fetched at once when streaming results,
    /// overriding [`DriverConfig::with_fetch_size()`] for this session.
    ///
    /// Valid values are positive numbers and `-1` for "fetch all records at
    /// once".
    #[allow(clippy::result_large_err)]
    #[inline]
    pub fn with_fetch_size(
        self,
        fetch_size: i64,
    ) -> StdResult<Self, ConfigureFetchSizeError<Self>> {
        match fetch_size {
            -1 | 1.. => Ok(Self {
                fetch_size: Some(fetch_size),
                ..self
            }),
            _ => Err(ConfigureFetchSizeError { builder: self }),
        }
    }

    /// Use the fetch size configured on the driver.
    ///
    /// This is the *default*.
    #[inline]
    pub fn with_default_fetch_size(self) -> Self {
        Self {
            fetch_size: None,
            ..self
        }
    }

    /// Authenticate this session with a different auth token than the one
    /// configured on the driver.
    ///
    /// Requires Bolt 5.1+; on older versions, a dedicated connection is
    /// opened for the session instead of re-authenticating a pooled one.
    #[inline]
    pub fn with_session_auth(self, auth: Arc<AuthToken>) -> Self {
        Self {
            auth: Some(auth),
            ..self
        }
    }

    /// Use the driver's auth token.
    ///
    /// This is the *default*.
    #[inline]
    pub fn without_session_auth(self) -> Self {
        Self { auth: None, ..self }
    }
}
