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

use std::cell::RefCell;
use std::collections::VecDeque;
use std::iter::FusedIterator;
use std::mem;
use std::rc::Rc;
use std::result;
use std::sync::{Arc, Weak};

use atomic_refcell::AtomicRefCell;
use parking_lot::Mutex;

use super::eager_result::{EagerResult, GetSingleRecordError};
use super::io::bolt::message_parameters::{DiscardParameters, PullParameters, RunParameters};
use super::io::bolt::{BoltMeta, BoltRecordFields, ResponseCallbacks};
use super::io::PooledBolt;
use super::summary::Summary;
use super::Record;
use crate::error_::{DriverError, Result, ServerError};
use crate::value::ValueReceive;

/// The result of a query: an iterator over [`Record`]s that fetches batches
/// of records from the server on demand (`PULL` with the configured fetch
/// size) and produces a [`Summary`] once fully consumed.
#[derive(Debug)]
pub struct RecordStream<'driver> {
    connection: Rc<RefCell<PooledBolt<'driver>>>,
    fetch_size: i64,
    auto_commit: bool,
    core: Arc<AtomicRefCell<StreamCore>>,
}

/// Where the stream currently stands; records may still sit in the buffer
/// in any phase.
#[derive(Debug)]
enum Phase {
    /// more records are wanted; the server may have more
    Streaming,
    /// the rest of the result is being thrown away
    Draining,
    /// summary received, or a failure was already reported
    Finished,
    /// terminal failure that hasn't been handed to the caller yet
    Failed(DriverError),
}

#[derive(Debug)]
struct StreamCore {
    keys: Option<Arc<Vec<Arc<String>>>>,
    qid: Option<i64>,
    buffer: VecDeque<Record>,
    phase: Phase,
    summary: Option<Summary>,
    bookmark: Option<String>,
    siblings: Option<TxFailureSink>,
}

impl<'driver> RecordStream<'driver> {
    pub(crate) fn new(
        connection: Rc<RefCell<PooledBolt<'driver>>>,
        fetch_size: i64,
        auto_commit: bool,
        siblings: Option<TxFailureSink>,
    ) -> Self {
        let summary = {
            let connection = (*connection).borrow();
            Summary::new(
                connection.address(),
                connection.server_agent(),
                connection.protocol_version(),
            )
        };
        let core = Arc::new(AtomicRefCell::new(StreamCore {
            keys: None,
            qid: None,
            buffer: VecDeque::new(),
            phase: Phase::Streaming,
            summary: Some(summary),
            bookmark: None,
            siblings: siblings.clone(),
        }));
        if let Some(siblings) = siblings {
            siblings.register(Arc::downgrade(&core));
        }
        Self {
            connection,
            fetch_size,
            auto_commit,
            core,
        }
    }

    /// Send RUN plus the first PULL and process the RUN reply, so the caller
    /// learns right away whether the query was accepted.
    pub(crate) fn run(&mut self, parameters: RunParameters) -> Result<()> {
        if let Some(error) = self.core.borrow().sibling_failure() {
            return Err(DriverError::Server {
                error: Box::new(error.as_ref().clone()),
            });
        }

        let res = (|| {
            {
                let mut connection = self.connection.borrow_mut();
                connection.run(parameters, self.run_callbacks())?;
            }
            self.request_batch()?;
            let mut connection = self.connection.borrow_mut();
            connection.write_all(None)?;
            // leave only the PULL reply outstanding
            while connection.expected_reply_len() > 1 {
                connection.read_one(None)?;
            }
            Ok(())
        })();
        if let Err(err) = res {
            self.core.borrow_mut().phase = Phase::Finished;
            return Err(self.scoped(err));
        }

        let mut core = self.core.borrow_mut();
        match mem::replace(&mut core.phase, Phase::Finished) {
            Phase::Failed(err) => Err(err),
            phase => {
                core.phase = phase;
                Ok(())
            }
        }
    }

    /// Fully consumes the result and returns the [`Summary`].
    ///
    /// Records that have not been streamed yet are discarded
    /// (`DISCARD` with `n=-1`).
    ///
    /// Returns [`None`] if
    ///  * [`RecordStream::consume()`] has been called before or
    ///  * the stream failed.
    pub fn consume(&mut self) -> Result<Option<Summary>> {
        {
            let mut core = self.core.borrow_mut();
            core.buffer.clear();
            if matches!(core.phase, Phase::Streaming) {
                core.phase = Phase::Draining;
            }
        }
        for record in &mut *self {
            record?;
        }
        Ok(self.core.borrow_mut().summary.take())
    }

    /// The field names of the records in the order they appear in each
    /// record, as announced by the server when the query was started.
    pub fn keys(&self) -> Vec<Arc<String>> {
        self.core
            .borrow()
            .keys
            .as_ref()
            .expect(
                "keys are missing; the RUN SUCCESS handler either ran and filled them in, \
                 or it errored and the stream was never handed out",
            )
            .iter()
            .map(Arc::clone)
            .collect()
    }

    /// Exhausts the stream and returns a single record.
    ///
    /// If any error occurs while consuming the stream, the error is returned
    /// as `Ok(Err(error))`.
    /// If consumption is successful, `Ok(Ok(record))` is returned iff exactly
    /// one record was streamed; `Err(GetSingleRecordError)` otherwise.
    pub fn single(&mut self) -> result::Result<Result<Record>, GetSingleRecordError> {
        match self.next() {
            None => Err(GetSingleRecordError::NoRecords),
            Some(Err(err)) => Ok(Err(err)),
            Some(Ok(record)) => match self.next() {
                None => Ok(Ok(record)),
                Some(Err(err)) => Ok(Err(err)),
                Some(Ok(_)) => match self.consume() {
                    Ok(_) => Err(GetSingleRecordError::TooManyRecords),
                    Err(err) => Ok(Err(err)),
                },
            },
        }
    }

    /// Collects the result into an [`EagerResult`].
    ///
    /// Returns [`None`] if the stream has already been consumed (i.e.,
    /// [`RecordStream::consume()`] has been called before).
    pub fn try_as_eager_result(&mut self) -> Result<Option<EagerResult>> {
        let keys = self.keys();
        let records = self.collect::<Result<_>>()?;
        let Some(summary) = self.consume()? else {
            return Ok(None);
        };
        Ok(Some(EagerResult {
            keys,
            records,
            summary,
        }))
    }

    pub(crate) fn into_bookmark(self) -> Option<String> {
        Arc::try_unwrap(self.core)
            .expect("stream handed out core references it didn't take back")
            .into_inner()
            .bookmark
    }

    fn request_batch(&self) -> Result<()> {
        let qid = self.core.borrow().qid.unwrap_or(-1);
        self.connection.borrow_mut().pull(
            PullParameters::new(self.fetch_size, qid),
            self.record_callbacks(),
        )
    }

    fn request_discard(&self) -> Result<()> {
        let qid = self.core.borrow().qid.unwrap_or(-1);
        self.connection.borrow_mut().discard(
            DiscardParameters::new(-1, qid),
            self.summary_callbacks(),
        )
    }

    fn run_callbacks(&self) -> ResponseCallbacks {
        let core = Arc::downgrade(&self.core);
        self.failure_callbacks().with_on_success(move |meta| {
            core.upgrade()
                .map(|core| core.borrow_mut().run_success(meta))
                .unwrap_or(Ok(()))
        })
    }

    fn record_callbacks(&self) -> ResponseCallbacks {
        let core = Arc::downgrade(&self.core);
        self.summary_callbacks().with_on_record(move |fields| {
            core.upgrade()
                .map(|core| core.borrow_mut().record(fields))
                .unwrap_or(Ok(()))
        })
    }

    fn summary_callbacks(&self) -> ResponseCallbacks {
        let core = Arc::downgrade(&self.core);
        self.failure_callbacks().with_on_success(move |meta| {
            core.upgrade()
                .map(|core| core.borrow_mut().stream_success(meta))
                .unwrap_or(Ok(()))
        })
    }

    fn failure_callbacks(&self) -> ResponseCallbacks {
        let failure_core = Arc::downgrade(&self.core);
        let ignored_core = Arc::downgrade(&self.core);
        ResponseCallbacks::new()
            .with_on_failure(move |error| {
                if let Some(core) = failure_core.upgrade() {
                    let mut core = core.borrow_mut();
                    if let Some(siblings) = &core.siblings {
                        siblings.spread(
                            Some(&failure_core),
                            &error,
                            "a failed query closed the containing transaction",
                        );
                    }
                    core.fail(error.into());
                }
                Ok(())
            })
            .with_on_ignored(move || {
                if let Some(core) = ignored_core.upgrade() {
                    core.borrow_mut().ignored();
                }
                Ok(())
            })
    }

    fn scoped(&self, err: DriverError) -> DriverError {
        match self.auto_commit {
            // losing the connection mid-stream of an auto-commit query means
            // the commit state is unknown
            true => err.failed_commit(),
            false => err,
        }
    }
}

impl Iterator for RecordStream<'_> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            enum Input {
                ReadReply,
                RequestBatch,
                RequestDiscard,
            }

            let need = {
                let mut core = self.core.borrow_mut();
                if let Some(record) = core.buffer.pop_front() {
                    return Some(Ok(record));
                }
                match &core.phase {
                    Phase::Finished => return None,
                    Phase::Failed(_) => {
                        let Phase::Failed(err) = mem::replace(&mut core.phase, Phase::Finished)
                        else {
                            unreachable!("checked the phase right above");
                        };
                        return Some(Err(err));
                    }
                    Phase::Streaming | Phase::Draining => {
                        if RefCell::borrow(&self.connection).expects_reply() {
                            Input::ReadReply
                        } else if matches!(core.phase, Phase::Streaming) {
                            Input::RequestBatch
                        } else {
                            Input::RequestDiscard
                        }
                    }
                }
            };
            let res = match need {
                Input::ReadReply => self.connection.borrow_mut().read_one(None),
                Input::RequestBatch => self
                    .request_batch()
                    .and_then(|_| self.connection.borrow_mut().write_all(None)),
                Input::RequestDiscard => self
                    .request_discard()
                    .and_then(|_| self.connection.borrow_mut().write_all(None)),
            };
            if let Err(err) = res {
                let err = self.scoped(err);
                self.core.borrow_mut().fail(err);
            }
        }
    }
}

impl FusedIterator for RecordStream<'_> {}

impl StreamCore {
    fn run_success(&mut self, mut meta: BoltMeta) -> Result<()> {
        match meta.remove("qid") {
            Some(ValueReceive::Integer(qid)) => self.qid = Some(qid),
            Some(_) => {
                return Err(DriverError::protocol_error(
                    "SUCCESS after RUN 'qid' was not an integer",
                ))
            }
            None => {}
        }
        let keys = match meta.remove("fields") {
            Some(ValueReceive::List(fields)) => fields
                .into_iter()
                .map(|field| match field {
                    ValueReceive::String(field) => Ok(Arc::new(field)),
                    _ => Err(DriverError::protocol_error(
                        "SUCCESS after RUN 'fields' was not a list of strings",
                    )),
                })
                .collect::<Result<Vec<_>>>()?,
            _ => {
                return Err(DriverError::protocol_error(
                    "SUCCESS after RUN did not contain a list of 'fields'",
                ))
            }
        };
        self.keys = Some(Arc::new(keys));
        if let Some(summary) = self.summary.as_mut() {
            summary.load_run_meta(&mut meta)?;
        }
        Ok(())
    }

    fn record(&mut self, values: BoltRecordFields) -> Result<()> {
        let keys = self
            .keys
            .as_ref()
            .ok_or_else(|| DriverError::protocol_error("RECORD received before RUN SUCCESS"))?;
        if keys.len() != values.len() {
            return Err(DriverError::protocol_error(format!(
                "RECORD contained {} entries but {} keys were announced",
                values.len(),
                keys.len()
            )));
        }
        self.buffer.push_back(Record::new(Arc::clone(keys), values));
        Ok(())
    }

    /// SUCCESS of a PULL or DISCARD: either the stream continues
    /// (`has_more`), or this was the terminal summary.
    fn stream_success(&mut self, mut meta: BoltMeta) -> Result<()> {
        if let Some(ValueReceive::Boolean(true)) = meta.remove("has_more") {
            return Ok(());
        }
        self.phase = Phase::Finished;
        if let Some(ValueReceive::String(bookmark)) = meta.remove("bookmark") {
            self.bookmark = Some(bookmark);
        }
        if let Some(summary) = self.summary.as_mut() {
            summary.load_pull_meta(&mut meta)?;
        }
        Ok(())
    }

    fn fail(&mut self, error: DriverError) {
        if !matches!(self.phase, Phase::Failed(_)) {
            self.phase = Phase::Failed(error);
        }
        self.summary = None;
    }

    fn ignored(&mut self) {
        self.fail(DriverError::protocol_error(
            "the server ignored this part of the result stream",
        ));
    }

    fn sibling_failure(&self) -> Option<Arc<ServerError>> {
        self.siblings
            .as_ref()
            .and_then(TxFailureSink::current)
    }
}

/// Lets all result streams of one transaction know when any of them (or the
/// transaction itself) hits a server failure: the server aborts the whole
/// transaction in that case, so the siblings are done for as well.
#[derive(Debug, Default, Clone)]
pub(crate) struct TxFailureSink(Arc<Mutex<TxFailureState>>);

#[derive(Debug, Default)]
struct TxFailureState {
    error: Option<Arc<ServerError>>,
    members: Vec<Weak<AtomicRefCell<StreamCore>>>,
}

impl TxFailureSink {
    fn register(&self, member: Weak<AtomicRefCell<StreamCore>>) {
        let mut state = self.0.lock();
        if let Some(error) = &state.error {
            // late to the party: the transaction is already dead
            if let Some(member) = member.upgrade() {
                fail_foreign(&member, error);
            }
            return;
        }
        state.members.push(member);
    }

    fn spread(
        &self,
        source: Option<&Weak<AtomicRefCell<StreamCore>>>,
        error: &ServerError,
        context: &str,
    ) {
        let error = Arc::new(error.with_context(context));
        let mut state = self.0.lock();
        for member in &state.members {
            if matches!(source, Some(source) if source.ptr_eq(member)) {
                continue;
            }
            if let Some(member) = member.upgrade() {
                fail_foreign(&member, &error);
            }
        }
        state.error = Some(error);
    }

    pub(crate) fn current(&self) -> Option<Arc<ServerError>> {
        self.0.lock().error.as_ref().map(Arc::clone)
    }

    /// Callback for BEGIN (and TELEMETRY) failures: the transaction never
    /// came to life, make sure every stream learns that.
    pub(crate) fn on_tx_failure(
        &self,
    ) -> impl FnMut(ServerError) -> Result<()> + Send + Sync + 'static {
        let sink = self.clone();
        move |error| {
            sink.spread(None, &error, "the transaction could not be started");
            Ok(())
        }
    }
}

fn fail_foreign(core: &Arc<AtomicRefCell<StreamCore>>, error: &Arc<ServerError>) {
    core.borrow_mut().fail(DriverError::Server {
        error: Box::new(error.as_ref().clone()),
    });
}
