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

use core::fmt::{Debug, Formatter};
use std::collections::HashMap;

use crate::error_::{DriverError, Result, ServerError};
use crate::value::ValueReceive;

#[derive(Debug, Copy, Clone, Ord, PartialOrd, Eq, PartialEq)]
pub(crate) enum ResponseMessage {
    Hello,
    Logon,
    Logoff,
    Reset,
    Run,
    Discard,
    Pull,
    Begin,
    Commit,
    Rollback,
    Route,
    Telemetry,
}

/// One entry of the reply queue: which request the next server reply
/// answers, and what to do with it.
#[derive(Debug)]
pub(crate) struct BoltResponse {
    pub(crate) message: ResponseMessage,
    pub(crate) callbacks: ResponseCallbacks,
}

impl BoltResponse {
    pub(crate) fn new(message: ResponseMessage, callbacks: ResponseCallbacks) -> Self {
        Self { message, callbacks }
    }

    pub(crate) fn from_message(message: ResponseMessage) -> Self {
        Self::new(message, ResponseCallbacks::new())
    }
}

pub(crate) type BoltMeta = HashMap<String, ValueReceive>;
pub(crate) type BoltRecordFields = Vec<ValueReceive>;

type Hook<A> = Option<Box<dyn FnMut(A) -> Result<()> + Send + Sync>>;

/// Per-request reply hooks.
///
/// A hook left unset falls back to the default reaction: SUCCESS, IGNORED,
/// and RECORD are swallowed, FAILURE turns into the returned error.
#[derive(Default)]
pub(crate) struct ResponseCallbacks {
    success: Hook<BoltMeta>,
    failure: Hook<ServerError>,
    ignored: Option<Box<dyn FnMut() -> Result<()> + Send + Sync>>,
    record: Hook<BoltRecordFields>,
}

impl ResponseCallbacks {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_on_success<F: FnMut(BoltMeta) -> Result<()> + Send + Sync + 'static>(
        mut self,
        hook: F,
    ) -> Self {
        self.success = Some(Box::new(hook));
        self
    }

    /// Prepend a borrowing hook in front of whatever success hook is
    /// installed. The pre-hook failing skips the main hook.
    pub(crate) fn with_on_success_pre_hook<
        F: FnMut(&BoltMeta) -> Result<()> + Send + Sync + 'static,
    >(
        mut self,
        mut pre_hook: F,
    ) -> Self {
        self.success = Some(match self.success.take() {
            None => Box::new(move |meta| pre_hook(&meta)),
            Some(mut chained) => Box::new(move |meta| {
                pre_hook(&meta)?;
                chained(meta)
            }),
        });
        self
    }

    pub(crate) fn with_on_failure<F: FnMut(ServerError) -> Result<()> + Send + Sync + 'static>(
        mut self,
        hook: F,
    ) -> Self {
        self.failure = Some(Box::new(hook));
        self
    }

    pub(crate) fn with_on_ignored<F: FnMut() -> Result<()> + Send + Sync + 'static>(
        mut self,
        hook: F,
    ) -> Self {
        self.ignored = Some(Box::new(hook));
        self
    }

    pub(crate) fn with_on_record<
        F: FnMut(BoltRecordFields) -> Result<()> + Send + Sync + 'static,
    >(
        mut self,
        hook: F,
    ) -> Self {
        self.record = Some(Box::new(hook));
        self
    }

    pub(crate) fn on_success(&mut self, meta: ValueReceive) -> Result<()> {
        let ValueReceive::Map(meta) = meta else {
            return Err(DriverError::protocol_error(
                "SUCCESS meta was not a Dictionary",
            ));
        };
        match &mut self.success {
            None => Ok(()),
            Some(hook) => hook(meta),
        }
    }

    pub(crate) fn on_failure(&mut self, error: ServerError) -> Result<()> {
        match &mut self.failure {
            None => Err(error.into()),
            Some(hook) => hook(error),
        }
    }

    pub(crate) fn on_ignored(&mut self) -> Result<()> {
        match &mut self.ignored {
            None => Ok(()),
            Some(hook) => hook(),
        }
    }

    pub(crate) fn on_record(&mut self, data: ValueReceive) -> Result<()> {
        let ValueReceive::List(fields) = data else {
            return Err(DriverError::protocol_error("RECORD data was not a List"));
        };
        match &mut self.record {
            None => Ok(()),
            Some(hook) => hook(fields),
        }
    }
}

impl Debug for ResponseCallbacks {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        fn set_or_dash<T>(hook: &Option<T>) -> &'static str {
            match hook {
                None => "-",
                Some(_) => "set",
            }
        }
        f.debug_struct("ResponseCallbacks")
            .field("success", &set_or_dash(&self.success))
            .field("failure", &set_or_dash(&self.failure))
            .field("ignored", &set_or_dash(&self.ignored))
            .field("record", &set_or_dash(&self.record))
            .finish()
    }
}
