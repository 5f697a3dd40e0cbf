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

//! Borrowed argument bundles, one per request message. Keeping them as
//! structs (even the empty ones) keeps the [`BoltProtocol`] trait uniform
//! across messages and protocol versions.
//!
//! [`BoltProtocol`]: super::BoltProtocol

use std::collections::HashMap;
use std::sync::Arc;

use crate::driver::config::auth::AuthToken;
use crate::driver::session::bookmarks::Bookmarks;
use crate::value::ValueSend;

/// The transaction-scoping entries RUN (auto-commit) and BEGIN share in
/// their `extra` dictionary.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct TxContext<'a> {
    pub(super) bookmarks: Option<&'a Bookmarks>,
    pub(super) tx_timeout: Option<i64>,
    pub(super) tx_metadata: Option<&'a HashMap<String, ValueSend>>,
    pub(super) mode: Option<&'a str>,
    pub(super) db: Option<&'a str>,
    pub(super) imp_user: Option<&'a str>,
}

impl<'a> TxContext<'a> {
    /// 4.x sends the access mode on RUN instead of BEGIN.
    pub(super) fn without_mode(self) -> Self {
        Self { mode: None, ..self }
    }
}

macro_rules! plain_parameters {
    ($($name:ident),* $(,)?) => {
        $(
            #[derive(Debug, Clone, Copy, Default)]
            pub(crate) struct $name {}

            impl $name {
                pub(crate) fn new() -> Self {
                    Self {}
                }
            }
        )*
    };
}

plain_parameters!(
    GoodbyeParameters,
    ResetParameters,
    CommitParameters,
    RollbackParameters,
);

#[derive(Debug, Clone, Copy)]
pub(crate) struct HelloParameters<'a> {
    pub(super) user_agent: &'a str,
    pub(super) auth: &'a Arc<AuthToken>,
    pub(super) routing_context: Option<&'a HashMap<String, ValueSend>>,
}

impl<'a> HelloParameters<'a> {
    pub(crate) fn new(
        user_agent: &'a str,
        auth: &'a Arc<AuthToken>,
        routing_context: Option<&'a HashMap<String, ValueSend>>,
    ) -> Self {
        Self {
            user_agent,
            auth,
            routing_context,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct ReauthParameters<'a> {
    pub(super) auth: &'a Arc<AuthToken>,
}

impl<'a> ReauthParameters<'a> {
    pub(crate) fn new(auth: &'a Arc<AuthToken>) -> Self {
        Self { auth }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct RunParameters<'a> {
    pub(super) query: &'a str,
    pub(super) parameters: Option<&'a HashMap<String, ValueSend>>,
    pub(super) tx: TxContext<'a>,
}

impl<'a> RunParameters<'a> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new_auto_commit_run(
        query: &'a str,
        parameters: Option<&'a HashMap<String, ValueSend>>,
        bookmarks: Option<&'a Bookmarks>,
        tx_timeout: Option<i64>,
        tx_metadata: Option<&'a HashMap<String, ValueSend>>,
        mode: Option<&'a str>,
        db: Option<&'a str>,
        imp_user: Option<&'a str>,
    ) -> Self {
        Self {
            query,
            parameters,
            tx: TxContext {
                bookmarks,
                tx_timeout,
                tx_metadata,
                mode,
                db,
                imp_user,
            },
        }
    }

    /// Inside an explicit transaction, RUN carries no `extra` entries;
    /// BEGIN already scoped the transaction.
    pub(crate) fn new_transaction_run(
        query: &'a str,
        parameters: Option<&'a HashMap<String, ValueSend>>,
    ) -> Self {
        Self {
            query,
            parameters,
            tx: TxContext::default(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct BeginParameters<'a> {
    pub(super) tx: TxContext<'a>,
}

impl<'a> BeginParameters<'a> {
    pub(crate) fn new(
        bookmarks: Option<&'a Bookmarks>,
        tx_timeout: Option<i64>,
        tx_metadata: Option<&'a HashMap<String, ValueSend>>,
        mode: Option<&'a str>,
        db: Option<&'a str>,
        imp_user: Option<&'a str>,
    ) -> Self {
        Self {
            tx: TxContext {
                bookmarks,
                tx_timeout,
                tx_metadata,
                mode,
                db,
                imp_user,
            },
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct DiscardParameters {
    pub(super) n: i64,
    pub(super) qid: i64,
}

impl DiscardParameters {
    pub(crate) fn new(n: i64, qid: i64) -> Self {
        Self { n, qid }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct PullParameters {
    pub(super) n: i64,
    pub(super) qid: i64,
}

impl PullParameters {
    pub(crate) fn new(n: i64, qid: i64) -> Self {
        Self { n, qid }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct RouteParameters<'a> {
    pub(super) routing_context: &'a HashMap<String, ValueSend>,
    pub(super) bookmarks: Option<&'a Bookmarks>,
    pub(super) db: Option<&'a str>,
    pub(super) imp_user: Option<&'a str>,
}

impl<'a> RouteParameters<'a> {
    pub(crate) fn new(
        routing_context: &'a HashMap<String, ValueSend>,
        bookmarks: Option<&'a Bookmarks>,
        db: Option<&'a str>,
        imp_user: Option<&'a str>,
    ) -> Self {
        Self {
            routing_context,
            bookmarks,
            db,
            imp_user,
        }
    }
}

/// Which API triggered the TELEMETRY message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TelemetryAPI {
    TxFunc,
    UnmanagedTx,
    AutoCommit,
}

impl TelemetryAPI {
    pub(super) fn wire_value(&self) -> i64 {
        match self {
            TelemetryAPI::TxFunc => 0,
            TelemetryAPI::UnmanagedTx => 1,
            TelemetryAPI::AutoCommit => 2,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct TelemetryParameters {
    pub(super) api: TelemetryAPI,
}

impl TelemetryParameters {
    pub(crate) fn new(api: TelemetryAPI) -> Self {
        Self { api }
    }
}
