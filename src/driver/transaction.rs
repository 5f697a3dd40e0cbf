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
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::rc::Rc;
use std::result;
use std::sync::Arc;

use atomic_refcell::AtomicRefCell;

use super::eager_result::{EagerResult, GetSingleRecordError};
use super::io::bolt::message_parameters::{BeginParameters, RunParameters};
use super::io::bolt::ResponseCallbacks;
use super::io::PooledBolt;
use super::record_stream::{RecordStream, TxFailureSink};
use super::Record;
use crate::error_::{DriverError, Result};
use crate::summary::Summary;
use crate::value::{ValueReceive, ValueSend};

/// An explicit transaction.
///
/// **NOTE:**
/// After any method on the transaction (or on a
/// [`TransactionRecordStream`] it spawned) has returned an error, the
/// transaction is unusable and only rollback remains.
#[derive(Debug)]
pub struct Transaction<'driver, 'tx> {
    core: &'tx mut TxCore<'driver>,
    /// Failures surfacing while a spawned stream is dropped land here so
    /// commit cannot silently succeed afterwards.
    deferred: RefCell<Result<()>>,
}

impl<'driver, 'tx> Transaction<'driver, 'tx> {
    pub(crate) fn new(core: &'tx mut TxCore<'driver>) -> Self {
        Self {
            core,
            deferred: RefCell::new(Ok(())),
        }
    }

    /// Prepare a query to be executed inside this transaction.
    ///
    /// The returned [`TransactionQueryBuilder`] collects parameters and
    /// starts the query with [`TransactionQueryBuilder::run()`].
    pub fn query<Q: AsRef<str>>(&'tx self, query: Q) -> TransactionQueryBuilder<'driver, 'tx, Q> {
        TransactionQueryBuilder::new(self, query)
    }

    fn start_stream<Q: AsRef<str>>(
        &'tx self,
        builder: TransactionQueryBuilder<'driver, 'tx, Q>,
    ) -> Result<TransactionRecordStream<'driver, 'tx>> {
        let stream = self
            .core
            .run(builder.query.as_ref(), &builder.parameters)?;
        Ok(TransactionRecordStream { stream, tx: self })
    }

    /// Commit the transaction.
    pub fn commit(self) -> Result<()> {
        self.deferred.into_inner()?;
        self.core.commit()
    }

    /// Roll the transaction back.
    ///
    /// Dropping the transaction rolls back as well, but swallows any error
    /// the rollback may produce.
    pub fn rollback(self) -> Result<()> {
        if self.deferred.into_inner().is_err() {
            // the server aborted the transaction along with the failure
            return Ok(());
        }
        self.core.rollback()
    }
}

/// A result cursor tied to a [`Transaction`].
///
/// Implements [`Iterator`] over the transaction's [`Record`]s.
///
/// Every stream spawned from a transaction must be gone before the
/// transaction can end. Plain [`drop`] works but discards any outstanding
/// error; [`TransactionRecordStream::consume()`] reports it.
#[derive(Debug)]
pub struct TransactionRecordStream<'driver, 'tx> {
    stream: RecordStream<'driver>,
    tx: &'tx Transaction<'driver, 'tx>,
}

impl Drop for TransactionRecordStream<'_, '_> {
    fn drop(&mut self) {
        if let Err(err) = self.stream.consume() {
            let mut deferred = self.tx.deferred.borrow_mut();
            if deferred.is_ok() {
                *deferred = Err(err);
            }
        }
    }
}

impl<'driver> TransactionRecordStream<'driver, '_> {
    /// see [`RecordStream::consume()`] (except that this consumes `self`)
    pub fn consume(mut self) -> Result<Option<Summary>> {
        self.stream.consume()
    }
    /// see [`RecordStream::keys()`]
    pub fn keys(&self) -> Vec<Arc<String>> {
        self.stream.keys()
    }
    /// see [`RecordStream::single()`]
    pub fn single(&mut self) -> result::Result<Result<Record>, GetSingleRecordError> {
        self.stream.single()
    }
    /// see [`RecordStream::try_as_eager_result()`]
    pub fn try_as_eager_result(&mut self) -> Result<Option<EagerResult>> {
        self.stream.try_as_eager_result()
    }
}

impl Iterator for TransactionRecordStream<'_, '_> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        self.stream.next()
    }
}

#[derive(Debug)]
pub(crate) struct TxCore<'driver> {
    connection: Rc<RefCell<PooledBolt<'driver>>>,
    bookmark: Arc<AtomicRefCell<Option<String>>>,
    failure_sink: TxFailureSink,
    fetch_size: i64,
    closed: bool,
    committed: bool,
}

impl<'driver> TxCore<'driver> {
    pub(crate) fn new(
        connection: PooledBolt<'driver>,
        fetch_size: i64,
        failure_sink: TxFailureSink,
    ) -> Self {
        Self {
            connection: Rc::new(RefCell::new(connection)),
            bookmark: Default::default(),
            failure_sink,
            fetch_size,
            closed: false,
            committed: false,
        }
    }

    pub(crate) fn begin(
        &mut self,
        parameters: BeginParameters,
        callbacks: ResponseCallbacks,
    ) -> Result<()> {
        {
            let mut connection = self.connection.borrow_mut();
            connection.begin(parameters, callbacks)?;
            connection.write_all(None)?;
            connection.read_all(None)?;
        }
        self.server_failure()
    }

    pub(crate) fn commit(&mut self) -> Result<()> {
        self.closed = true;
        self.server_failure()?;
        let mut connection = self.connection.borrow_mut();
        // flush whatever streams left queued before COMMIT goes out
        connection.write_all(None)?;
        connection.read_all(None)?;
        let bookmark = Arc::clone(&self.bookmark);
        let callbacks = ResponseCallbacks::new()
            .with_on_success(move |mut meta| {
                if let Some(ValueReceive::String(new_bookmark)) = meta.remove("bookmark") {
                    *bookmark.borrow_mut() = Some(new_bookmark);
                };
                Ok(())
            })
            .with_on_ignored(|| {
                Err(DriverError::Transaction {
                    message: String::from("COMMIT was ignored by the server"),
                })
            });
        connection.commit(callbacks)?;
        connection.write_all(None)?;
        DriverError::wrap_commit(connection.read_all(None))?;
        self.committed = true;
        Ok(())
    }

    pub(crate) fn rollback(&mut self) -> Result<()> {
        self.closed = true;
        if self.failure_sink.current().is_some() {
            // transaction already failed, nothing to roll back
            return Ok(());
        }
        let mut connection = self.connection.borrow_mut();
        connection.rollback()?;
        connection.write_all(None)?;
        connection.read_all(None)
    }

    pub(crate) fn close(&mut self) -> Result<()> {
        if self.server_failure().is_err() || self.connection.borrow_mut().closed() {
            self.closed = true;
        }
        match self.closed {
            true => Ok(()),
            false => self.rollback(),
        }
    }

    pub(crate) fn committed(&self) -> bool {
        self.committed
    }

    pub(crate) fn into_bookmark(self) -> Option<String> {
        self.bookmark.borrow_mut().take()
    }

    pub(crate) fn run(
        &self,
        query: &str,
        parameters: &HashMap<String, ValueSend>,
    ) -> Result<RecordStream<'driver>> {
        let mut stream = RecordStream::new(
            Rc::clone(&self.connection),
            self.fetch_size,
            false,
            Some(self.failure_sink.clone()),
        );
        stream.run(RunParameters::new_transaction_run(query, Some(parameters)))?;
        Ok(stream)
    }

    fn server_failure(&self) -> Result<()> {
        match self.failure_sink.current() {
            None => Ok(()),
            Some(error) => Err(DriverError::Server {
                error: Box::new(error.as_ref().clone()),
            }),
        }
    }
}

/// A builder for queries to be executed in a transaction.
///
/// See [`Transaction::query()`].
pub struct TransactionQueryBuilder<'driver, 'tx, Q: AsRef<str>> {
    tx: &'tx Transaction<'driver, 'tx>,
    query: Q,
    parameters: HashMap<String, ValueSend>,
}

impl<'driver, 'tx, Q: AsRef<str>> TransactionQueryBuilder<'driver, 'tx, Q> {
    fn new(tx: &'tx Transaction<'driver, 'tx>, query: Q) -> Self {
        Self {
            tx,
            query,
            parameters: Default::default(),
        }
    }

    /// Configure query parameters.
    ///
    /// Always prefer parameters over query string manipulation. Parameters
    /// rule out injection and let the server cache the query plan.
    pub fn with_parameters(mut self, parameters: HashMap<String, ValueSend>) -> Self {
        self.parameters = parameters;
        self
    }

    /// Reset the query to run without parameters.
    ///
    /// This is the *default*.
    pub fn without_parameters(mut self) -> Self {
        self.parameters = Default::default();
        self
    }

    /// Run the query as configured.
    pub fn run(self) -> Result<TransactionRecordStream<'driver, 'tx>> {
        self.tx.start_stream(self)
    }
}

impl<Q: AsRef<str>> Debug for TransactionQueryBuilder<'_, '_, Q> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionQueryBuilder")
            .field("tx", &self.tx)
            .field("query", &self.query.as_ref())
            .field("parameters", &self.parameters)
            .finish()
    }
}

/// Controls after how long the server kills a transaction.
///
/// Choices:
///  * [`TransactionTimeout::none`] never time out
///  * [`TransactionTimeout::from_millis`] time out after the given duration
///  * [`TransactionTimeout::default`] whatever default the server is
///    configured with.
#[derive(Debug, Clone, Copy, Default)]
pub struct TransactionTimeout {
    /// `None` defers to the server default, `Some(0)` disables the timeout.
    raw: Option<i64>,
}

impl TransactionTimeout {
    /// A transaction timeout in milliseconds, overriding the server default.
    ///
    /// Returns [`None`] for zero and negative durations, which the server
    /// rejects as timeouts.
    #[inline]
    pub fn from_millis(timeout: i64) -> Option<Self> {
        (timeout > 0).then_some(Self { raw: Some(timeout) })
    }

    /// Instruct the server to never time the transaction out.
    #[inline]
    pub fn none() -> Self {
        Self { raw: Some(0) }
    }

    #[inline]
    pub(crate) fn raw(&self) -> Option<i64> {
        self.raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_timeout_domain() {
        assert!(TransactionTimeout::from_millis(-1).is_none());
        assert!(TransactionTimeout::from_millis(0).is_none());
        assert_eq!(TransactionTimeout::from_millis(1).unwrap().raw(), Some(1));
        assert_eq!(TransactionTimeout::none().raw(), Some(0));
        assert_eq!(TransactionTimeout::default().raw(), None);
    }
}
