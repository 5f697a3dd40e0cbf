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

pub(crate) mod bookmarks;
pub(crate) mod config;
pub(crate) mod retry;

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::rc::Rc;
use std::result::Result as StdResult;
use std::sync::Arc;

use log::info;

use super::io::bolt::message_parameters::{
    BeginParameters, RunParameters, TelemetryAPI, TelemetryParameters,
};
use super::io::bolt::ResponseCallbacks;
use super::io::{AcquireConfig, Pool, PooledBolt, SessionAuth};
use super::record_stream::{RecordStream, TxFailureSink};
use super::transaction::{Transaction, TransactionTimeout, TxCore};
use super::{EagerResult, ReducedDriverConfig, RoutingControl};
use crate::error_::Result;
use crate::value::ValueSend;
use bookmarks::Bookmarks;
pub use config::SessionConfig;
use retry::RetryPolicy;

// imports for docs
#[allow(unused)]
use super::Driver;

/// A session is a container for a sequentially ordered series of
/// transactions.
///
/// Besides holding configuration, a session maintains a causal chain: every
/// transaction in it can read the writes of any earlier transaction in the
/// same session. To chain across two sessions, carry bookmarks over manually
/// with [`Session::last_bookmarks()`] and [`SessionConfig::with_bookmarks()`].
///
/// Work runs in one of three shapes:
///  * [`Session::auto_commit()`], a single query in a server-managed
///    transaction,
///  * [`Session::transaction()`], an explicit transaction driven by the
///    caller,
///  * [`Session::execute_read()`] / [`Session::execute_write()`], a
///    transaction function retried on transient failures.
///
/// See also [`Driver::session()`].
#[derive(Debug)]
pub struct Session<'driver> {
    config: SessionConfig,
    pool: &'driver Pool,
    driver_config: &'driver ReducedDriverConfig,
    chain: CausalChain,
}

impl<'driver> Session<'driver> {
    pub(super) fn new(
        config: SessionConfig,
        pool: &'driver Pool,
        driver_config: &'driver ReducedDriverConfig,
    ) -> Self {
        let chain = CausalChain::new(config.bookmarks.clone());
        Session {
            config,
            pool,
            driver_config,
            chain,
        }
    }

    /// Prepare a query that runs in a server-managed (auto-commit)
    /// transaction.
    ///
    /// This mode is required for queries that manage transactions themselves,
    /// such as `CALL {...} IN TRANSACTION`. Its drawback: until every result
    /// has been consumed, the client cannot always tell whether the
    /// transaction went through.
    ///
    /// Configure and start the query through the returned
    /// [`AutoCommitBuilder`].
    pub fn auto_commit<'session, Q: AsRef<str>>(
        &'session mut self,
        query: Q,
    ) -> AutoCommitBuilder<'driver, 'session, Q, EagerReceiver> {
        AutoCommitBuilder::new(self, query)
    }

    fn auto_commit_run<'session, Q: AsRef<str>, R, FRes: FnOnce(&mut RecordStream) -> Result<R>>(
        &'session mut self,
        builder: AutoCommitBuilder<'driver, 'session, Q, FRes>,
    ) -> Result<R> {
        let mut connection = self.acquire_connection(builder.mode)?;
        if self.driver_config.telemetry {
            connection.telemetry(
                TelemetryParameters::new(TelemetryAPI::AutoCommit),
                ResponseCallbacks::new().with_on_failure(|_| Ok(())),
            )?;
        }
        let connection = Rc::new(RefCell::new(connection));
        let mut stream = RecordStream::new(connection, self.fetch_size(), true, None);
        let bookmarks = self.chain.current();
        let run_parameters = RunParameters::new_auto_commit_run(
            builder.query.as_ref(),
            Some(&builder.parameters),
            Some(&bookmarks),
            builder.tx_timeout.raw(),
            Some(&builder.tx_metadata),
            builder.mode.as_protocol_str(),
            self.config.database.as_ref().map(|db| db.as_str()),
            self.config
                .impersonated_user
                .as_ref()
                .map(|imp| imp.as_str()),
        );
        let outcome = stream
            .run(run_parameters)
            .and_then(|_| (builder.receiver)(&mut stream));
        if outcome.is_err() {
            let _ = stream.consume();
            return outcome;
        }
        stream.consume()?;
        // auto-commit: a success summary without a bookmark clears the
        // causal chain
        self.chain.advance(stream.into_bookmark());
        outcome
    }

    /// Prepare an explicit transaction.
    ///
    /// Configure and start the transaction through the returned
    /// [`TransactionBuilder`].
    pub fn transaction<'session>(&'session mut self) -> TransactionBuilder<'driver, 'session> {
        TransactionBuilder::new(self)
    }

    /// Run `work` in a managed read transaction, retrying on transient
    /// failures with the retry policy configured on the driver.
    ///
    /// Shorthand for
    /// `session.transaction().with_routing_control(RoutingControl::Read)
    /// .run_with_retry(...)`.
    pub fn execute_read<R>(&mut self, work: impl FnMut(Transaction) -> Result<R>) -> Result<R> {
        self.execute_with_retry(RoutingControl::Read, work)
    }

    /// Run `work` in a managed write transaction, retrying on transient
    /// failures with the retry policy configured on the driver.
    pub fn execute_write<R>(&mut self, work: impl FnMut(Transaction) -> Result<R>) -> Result<R> {
        self.execute_with_retry(RoutingControl::Write, work)
    }

    fn execute_with_retry<R>(
        &mut self,
        mode: RoutingControl,
        work: impl FnMut(Transaction) -> Result<R>,
    ) -> Result<R> {
        let policy = self.driver_config.default_backoff;
        self.transaction()
            .with_routing_control(mode)
            .with_api(TelemetryAPI::TxFunc)
            .run_with_retry(policy, work)
            .map_err(Into::into)
    }

    fn transaction_run<R, FTx: FnOnce(Transaction) -> Result<R>>(
        &mut self,
        builder: &TransactionBuilder<'driver, '_>,
        receiver: FTx,
    ) -> Result<R> {
        let mut connection = self.acquire_connection(builder.mode)?;
        let failure_sink = TxFailureSink::default();

        if self.driver_config.telemetry {
            connection.telemetry(
                TelemetryParameters::new(builder.api),
                ResponseCallbacks::new().with_on_failure(failure_sink.on_tx_failure()),
            )?;
        }
        let mut core = TxCore::new(connection, self.fetch_size(), failure_sink.clone());
        let bookmarks = self.chain.current();
        let begin_parameters = BeginParameters::new(
            Some(&bookmarks),
            builder.tx_timeout.raw(),
            Some(&builder.tx_metadata),
            builder.mode.as_protocol_str(),
            self.config.database.as_ref().map(|db| db.as_str()),
            self.config
                .impersonated_user
                .as_ref()
                .map(|imp| imp.as_str()),
        );
        core.begin(
            begin_parameters,
            ResponseCallbacks::new().with_on_failure(failure_sink.on_tx_failure()),
        )?;

        let outcome = receiver(Transaction::new(&mut core));
        match &outcome {
            Ok(_) => core.close()?,
            Err(_) => {
                if let Err(close_err) = core.close() {
                    info!(
                        "while propagating user code error: \
                        ignored error closing the transaction: {close_err}"
                    );
                }
            }
        }
        if core.committed() {
            self.chain.advance(core.into_bookmark());
        }
        outcome
    }

    pub(super) fn acquire_connection(
        &mut self,
        mode: RoutingControl,
    ) -> Result<PooledBolt<'driver>> {
        let deadline = self.pool.config.connection_acquisition_deadline();
        let bookmarks = self.chain.current();
        self.pool.acquire(AcquireConfig {
            mode,
            db: self.config.database.as_ref(),
            imp_user: self
                .config
                .impersonated_user
                .as_ref()
                .map(|imp| imp.as_str()),
            bookmarks: Some(&bookmarks),
            session_auth: self.session_auth(),
            deadline,
            health_check_after: self.driver_config.idle_time_before_connection_test,
        })
    }

    /// The bookmarks the session last received, or the ones it was
    /// initialized with.
    ///
    /// Feed them to another session to causally chain the two.
    #[inline]
    pub fn last_bookmarks(&self) -> Arc<Bookmarks> {
        self.chain.current()
    }

    #[inline]
    fn fetch_size(&self) -> i64 {
        self.config
            .fetch_size
            .unwrap_or(self.driver_config.fetch_size)
    }

    #[inline]
    fn session_auth(&self) -> SessionAuth {
        match &self.config.auth {
            Some(auth) => SessionAuth::Reauth(auth),
            None => SessionAuth::None,
        }
    }
}

/// Builder type to prepare an auto-commit transaction.
///
/// Created through [`Session::auto_commit()`]; [`AutoCommitBuilder::run()`]
/// executes the query once configuration is done.
pub struct AutoCommitBuilder<'driver, 'session, Q, FRes> {
    session: Option<&'session mut Session<'driver>>,
    query: Q,
    parameters: HashMap<String, ValueSend>,
    tx_metadata: HashMap<String, ValueSend>,
    tx_timeout: TransactionTimeout,
    mode: RoutingControl,
    receiver: FRes,
}

pub(crate) fn eager_receiver(stream: &mut RecordStream) -> Result<EagerResult> {
    stream.try_as_eager_result().map(|eager| {
        eager.expect("an unconsumed stream always yields an eager result")
    })
}

pub(crate) type EagerReceiver = fn(&mut RecordStream) -> Result<EagerResult>;

impl<'driver, 'session, Q: AsRef<str>> AutoCommitBuilder<'driver, 'session, Q, EagerReceiver> {
    fn new(session: &'session mut Session<'driver>, query: Q) -> Self {
        Self {
            session: Some(session),
            query,
            parameters: Default::default(),
            tx_metadata: Default::default(),
            tx_timeout: Default::default(),
            mode: RoutingControl::Write,
            receiver: eager_receiver,
        }
    }
}

impl<'driver, 'session, Q: AsRef<str>, R, FRes: FnOnce(&mut RecordStream) -> Result<R>>
    AutoCommitBuilder<'driver, 'session, Q, FRes>
{
    /// Configure query parameters.
    ///
    /// Always prefer parameters over query string manipulation. Parameters
    /// rule out injection and let the server cache the query plan.
    ///
    /// # Example
    /// ```no_run
    /// use bolt_transport::value_map;
    /// # use bolt_transport::driver::Driver;
    ///
    /// # fn example(driver: &Driver) -> bolt_transport::Result<()> {
    /// let mut session = driver.session(Default::default());
    /// let result = session
    ///     .auto_commit("CREATE (n:Node {id: $id}) RETURN n")
    ///     .with_parameters(value_map!({"id": 1}))
    ///     .run()?;
    /// # Ok(())
    /// # }
    /// ```
    #[inline]
    pub fn with_parameters(mut self, parameters: HashMap<String, ValueSend>) -> Self {
        self.parameters = parameters;
        self
    }

    /// Reset the query to run without parameters.
    ///
    /// This is the *default*.
    #[inline]
    pub fn without_parameters(mut self) -> Self {
        self.parameters = Default::default();
        self
    }

    /// Attach transaction metadata to the query.
    ///
    /// The server writes transaction metadata to its query log; it also
    /// shows up in `SHOW TRANSACTIONS YIELD *`.
    #[inline]
    pub fn with_transaction_meta(mut self, tx_metadata: HashMap<String, ValueSend>) -> Self {
        self.tx_metadata = tx_metadata;
        self
    }

    /// Reset the query to carry no transaction metadata.
    ///
    /// This is the *default*.
    #[inline]
    pub fn without_transaction_meta(mut self) -> Self {
        self.tx_metadata = Default::default();
        self
    }

    /// Instruct the server to abort the transaction after the given timeout.
    ///
    /// See [`TransactionTimeout`] for options.
    #[inline]
    pub fn with_transaction_timeout(mut self, tx_timeout: TransactionTimeout) -> Self {
        self.tx_timeout = tx_timeout;
        self
    }

    /// Choose whether a reader or a writer in the cluster receives the
    /// query.
    ///
    /// See [`TransactionBuilder::with_routing_control()`].
    #[inline]
    pub fn with_routing_control(mut self, mode: RoutingControl) -> Self {
        self.mode = mode;
        self
    }

    /// Install a custom receiver for the result stream.
    ///
    /// The default receiver loads the stream into memory and returns it as
    /// an [`EagerResult`].
    #[inline]
    pub fn with_receiver<R_, FRes_: FnOnce(&mut RecordStream) -> Result<R_>>(
        self,
        receiver: FRes_,
    ) -> AutoCommitBuilder<'driver, 'session, Q, FRes_> {
        AutoCommitBuilder {
            session: self.session,
            query: self.query,
            parameters: self.parameters,
            tx_metadata: self.tx_metadata,
            tx_timeout: self.tx_timeout,
            mode: self.mode,
            receiver,
        }
    }

    /// Run the query and return the result.
    pub fn run(mut self) -> Result<R> {
        let session = self.session.take().expect("builder is run at most once");
        session.auto_commit_run(self)
    }
}

impl<Q: AsRef<str>, FRes> Debug for AutoCommitBuilder<'_, '_, Q, FRes> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutoCommitBuilder")
            .field("session", &self.session.as_ref().map(|_| "..."))
            .field("query", &self.query.as_ref())
            .field("parameters", &self.parameters)
            .field("tx_metadata", &self.tx_metadata)
            .field("tx_timeout", &self.tx_timeout)
            .field("mode", &self.mode)
            .field("receiver", &"...")
            .finish()
    }
}

/// Builder type to prepare an explicit transaction.
///
/// Created through [`Session::transaction()`]; [`TransactionBuilder::run()`]
/// starts the transaction once configuration is done.
pub struct TransactionBuilder<'driver, 'session> {
    session: Option<&'session mut Session<'driver>>,
    tx_metadata: HashMap<String, ValueSend>,
    tx_timeout: TransactionTimeout,
    mode: RoutingControl,
    api: TelemetryAPI,
}

impl<'driver, 'session> TransactionBuilder<'driver, 'session> {
    fn new(session: &'session mut Session<'driver>) -> Self {
        Self {
            session: Some(session),
            tx_metadata: Default::default(),
            tx_timeout: Default::default(),
            mode: RoutingControl::Write,
            api: TelemetryAPI::UnmanagedTx,
        }
    }

    /// Attach transaction metadata to the transaction.
    ///
    /// The server writes transaction metadata to its query log; it also
    /// shows up in `SHOW TRANSACTIONS YIELD *`.
    #[inline]
    pub fn with_transaction_meta(mut self, tx_metadata: HashMap<String, ValueSend>) -> Self {
        self.tx_metadata = tx_metadata;
        self
    }

    /// Reset the transaction to carry no metadata (this is the default).
    #[inline]
    pub fn without_transaction_meta(mut self) -> Self {
        self.tx_metadata = Default::default();
        self
    }

    /// Instruct the server to abort the transaction after the given timeout.
    ///
    /// See [`TransactionTimeout`] for options.
    #[inline]
    pub fn with_transaction_timeout(mut self, tx_timeout: TransactionTimeout) -> Self {
        self.tx_timeout = tx_timeout;
        self
    }

    /// Choose whether a reader or a writer in the cluster receives the
    /// transaction.
    ///
    /// Writers (*default*) can serve reads and writes. Read-only work is
    /// better sent to a reader, keeping load off the writer.
    #[inline]
    pub fn with_routing_control(mut self, mode: RoutingControl) -> Self {
        self.mode = mode;
        self
    }

    #[inline]
    pub(crate) fn with_api(mut self, api: TelemetryAPI) -> Self {
        self.api = api;
        self
    }

    /// Run the transaction; `receiver` does the work.
    ///
    /// The `receiver` is handed a [`Transaction`] to execute queries on and
    /// to finish the transaction with (commit, rollback, ...).
    ///
    /// Against a clustered or cloud-hosted setup, prefer
    /// [`TransactionBuilder::run_with_retry()`]: such environments produce
    /// intermittent failures (leader switches, connections cut by load
    /// balancers, ...) that a bare run would surface to the caller.
    pub fn run<R>(mut self, receiver: impl FnOnce(Transaction) -> Result<R>) -> Result<R> {
        let session = self.session.take().expect("builder is run at most once");
        session.transaction_run(&self, receiver)
    }

    /// Run the transaction under a retry policy.
    ///
    /// Like [`TransactionBuilder::run()`], except the `receiver` is invoked
    /// again whenever it fails with an error the `retry_policy` considers
    /// retryable.
    ///
    /// See also [`retry::RetryPolicy`].
    pub fn run_with_retry<R, P: RetryPolicy>(
        mut self,
        retry_policy: P,
        mut receiver: impl FnMut(Transaction) -> Result<R>,
    ) -> StdResult<R, P::Error> {
        let session = self.session.take().expect("builder is run at most once");
        retry_policy.execute(|| session.transaction_run(&self, &mut receiver))
    }
}

impl Debug for TransactionBuilder<'_, '_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionBuilder")
            .field("session", &self.session.as_ref().map(|_| "..."))
            .field("tx_metadata", &self.tx_metadata)
            .field("tx_timeout", &self.tx_timeout)
            .field("mode", &self.mode)
            .finish()
    }
}

/// The session's view of its causal chain.
#[derive(Debug)]
struct CausalChain {
    bookmarks: Arc<Bookmarks>,
}

impl CausalChain {
    fn new(bookmarks: Option<Arc<Bookmarks>>) -> Self {
        Self {
            bookmarks: bookmarks.unwrap_or_default(),
        }
    }

    fn current(&self) -> Arc<Bookmarks> {
        Arc::clone(&self.bookmarks)
    }

    /// Called after a successful commit (including consuming an auto-commit
    /// result): the new bookmark supersedes the whole chain; no bookmark in
    /// the success summary resets it.
    fn advance(&mut self, bookmark: Option<String>) {
        self.bookmarks = match bookmark {
            Some(bookmark) => Arc::new(Bookmarks::from_raw([bookmark])),
            None => Arc::default(),
        };
    }
}
