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

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use atomic_refcell::AtomicRefCell;
use log::{info, warn};
use rand::Rng;

use super::pool::{AsyncAcquireArgs, AsyncPool, AsyncPooledBolt};
use crate::driver::eager_result::EagerResult;
use crate::driver::io::bolt::message_parameters::{
    BeginParameters, DiscardParameters, PullParameters, RunParameters, TelemetryAPI,
    TelemetryParameters,
};
use crate::driver::io::bolt::{BoltMeta, ResponseCallbacks};
use crate::driver::io::{PoolConfig, SessionAuth};
use crate::driver::session::bookmarks::Bookmarks;
use crate::driver::session::config::SessionConfig;
use crate::driver::summary::Summary;
use crate::driver::{ConnectionConfig, Driver, DriverConfig, Record, RoutingControl};
use crate::error_::{DriverError, Result, ServerError};
use std::time::Instant;
use crate::value::{ValueReceive, ValueSend};

/// The driver-level configuration async sessions need to know about.
#[derive(Debug)]
struct AsyncReducedConfig {
    fetch_size: i64,
    telemetry: bool,
    idle_time_before_connection_test: Option<Duration>,
    max_retry_time: Duration,
    retry_delay_initial: Duration,
    retry_delay_multiplier: f64,
    retry_delay_max: Duration,
}

/// The async twin of [`Driver`](`crate::driver::Driver`).
///
/// Stale connections are dropped when they are pulled out of the pool; the
/// async pool doesn't run a background eviction task.
#[derive(Debug)]
pub struct AsyncDriver {
    config: Arc<AsyncReducedConfig>,
    pool: Arc<AsyncPool>,
}

impl AsyncDriver {
    pub fn new(mut connection_config: ConnectionConfig, config: DriverConfig) -> Self {
        let auth = Driver::resolve_auth(&mut connection_config, &config);
        let pool_config = PoolConfig {
            routing_context: connection_config.routing_context,
            tls_config: connection_config.tls_config.map(Arc::new),
            user_agent: config.user_agent,
            auth,
            max_connection_lifetime: config.max_connection_lifetime,
            idle_timeout: config.idle_timeout,
            max_connection_pool_size: config.max_connection_pool_size,
            connection_timeout: config.connection_timeout,
            handshake_timeout: config.handshake_timeout,
            keep_alive: config.keep_alive,
            no_delay: config.no_delay,
            connection_acquisition_timeout: config.connection_acquisition_timeout,
            routing_table_refresh_ttl_margin: config.routing_table_refresh_ttl_margin,
            routing_max_retry_attempts: config.routing_max_retry_attempts,
            resolver: config.resolver,
            telemetry: config.telemetry,
        };
        let addresses = connection_config
            .addresses
            .into_iter()
            .map(Arc::new)
            .collect::<Vec<_>>();
        AsyncDriver {
            config: Arc::new(AsyncReducedConfig {
                fetch_size: config.fetch_size,
                telemetry: config.telemetry,
                idle_time_before_connection_test: config.idle_time_before_connection_test,
                max_retry_time: config.max_retry_time,
                retry_delay_initial: config.retry_delay_initial,
                retry_delay_multiplier: config.retry_delay_multiplier,
                retry_delay_max: config.retry_delay_max,
            }),
            pool: Arc::new(AsyncPool::new(addresses, pool_config)),
        }
    }

    /// Spawn a new [`AsyncSession`] with the given configuration.
    pub fn session(&self, config: SessionConfig) -> AsyncSession {
        AsyncSession::new(config, Arc::clone(&self.pool), Arc::clone(&self.config))
    }

    /// Establish a connection to the server (or, in a clustered setup, to
    /// any reader) and return once it has been established or failed.
    pub async fn verify_connectivity(&self) -> Result<()> {
        let connection = self
            .pool
            .acquire(AsyncAcquireArgs {
                mode: RoutingControl::Read,
                db: None,
                imp_user: None,
                bookmarks: None,
                session_auth: SessionAuth::None,
                health_check_after: Some(Duration::ZERO),
            })
            .await?;
        connection.release().await;
        Ok(())
    }

    /// Shut the driver down: idle connections are dropped and further
    /// acquisitions return errors.
    pub fn close(&self) {
        self.pool.close();
    }
}

/// The async twin of [`Session`](`crate::session::Session`).
///
/// Operations on one session are strictly ordered; the session borrows at
/// most one connection at a time.
#[derive(Debug)]
pub struct AsyncSession {
    config: SessionConfig,
    pool: Arc<AsyncPool>,
    driver_config: Arc<AsyncReducedConfig>,
    bookmarks: Arc<Bookmarks>,
}

impl AsyncSession {
    fn new(
        config: SessionConfig,
        pool: Arc<AsyncPool>,
        driver_config: Arc<AsyncReducedConfig>,
    ) -> Self {
        let bookmarks = config.bookmarks.clone().unwrap_or_default();
        Self {
            config,
            pool,
            driver_config,
            bookmarks,
        }
    }

    /// Run an auto-commit query without parameters and load the whole result
    /// into memory.
    pub async fn run(&mut self, query: impl AsRef<str>) -> Result<EagerResult> {
        self.run_with_parameters(query, HashMap::new()).await
    }

    /// Run an auto-commit query with parameters and load the whole result
    /// into memory.
    pub async fn run_with_parameters(
        &mut self,
        query: impl AsRef<str>,
        parameters: HashMap<String, ValueSend>,
    ) -> Result<EagerResult> {
        let mut stream = self
            .run_stream(query.as_ref(), parameters, RoutingControl::Write)
            .await?;
        let mut records = Vec::new();
        while let Some(record) = stream.next().await {
            records.push(record?);
        }
        let keys = stream.keys();
        let summary = stream.consume().await?;
        Ok(EagerResult {
            keys,
            records,
            summary,
        })
    }

    /// Run an auto-commit query and stream the result.
    ///
    /// The stream holds on to the session's connection until it is
    /// [`consume`](`AsyncRecordStream::consume`)d or dropped; dropping it
    /// without consuming closes the connection (records cannot be discarded
    /// without awaiting).
    pub async fn run_stream(
        &mut self,
        query: &str,
        parameters: HashMap<String, ValueSend>,
        mode: RoutingControl,
    ) -> Result<AsyncRecordStream<'_>> {
        let mut connection = self.acquire_connection(mode).await?;
        if self.driver_config.telemetry {
            connection.bolt().telemetry(
                TelemetryParameters::new(TelemetryAPI::AutoCommit),
                ResponseCallbacks::new().with_on_failure(|_| Ok(())),
            )?;
        }
        let state = StreamState::shared(connection.bolt_ref());
        let fetch_size = self.fetch_size();
        let bookmarks = Arc::clone(&self.bookmarks);
        let res = async {
            connection.bolt().run(
                RunParameters::new_auto_commit_run(
                    query,
                    Some(&parameters),
                    Some(&bookmarks),
                    None,
                    None,
                    mode.as_protocol_str(),
                    self.config.database.as_ref().map(|db| db.as_str()),
                    self.config
                        .impersonated_user
                        .as_ref()
                        .map(|imp| imp.as_str()),
                ),
                StreamState::run_callbacks(&state),
            )?;
            connection.bolt().write_all().await?;
            connection.bolt().read_all().await
        }
        .await;
        if let Err(e) = res {
            connection.release().await;
            return Err(e);
        }
        Ok(AsyncRecordStream {
            session: self,
            connection: Some(connection),
            state,
            fetch_size,
            auto_commit: true,
        })
    }

    /// Begin an explicit transaction.
    pub async fn begin_transaction(
        &mut self,
        mode: RoutingControl,
    ) -> Result<AsyncTransaction<'_>> {
        let api = TelemetryAPI::UnmanagedTx;
        AsyncTransaction::begin(self, mode, api).await
    }

    /// Run `work` in a managed read transaction, retrying on transient
    /// failures with exponential backoff.
    pub async fn execute_read<R, W>(&mut self, work: W) -> Result<R>
    where
        W: for<'tx, 'sess> FnMut(
            &'tx mut AsyncTransaction<'sess>,
        ) -> Pin<Box<dyn Future<Output = Result<R>> + 'tx>>,
    {
        self.execute_with_retry(RoutingControl::Read, work).await
    }

    /// Run `work` in a managed write transaction, retrying on transient
    /// failures with exponential backoff.
    pub async fn execute_write<R, W>(&mut self, work: W) -> Result<R>
    where
        W: for<'tx, 'sess> FnMut(
            &'tx mut AsyncTransaction<'sess>,
        ) -> Pin<Box<dyn Future<Output = Result<R>> + 'tx>>,
    {
        self.execute_with_retry(RoutingControl::Write, work).await
    }

    async fn execute_with_retry<R, W>(&mut self, mode: RoutingControl, mut work: W) -> Result<R>
    where
        W: for<'tx, 'sess> FnMut(
            &'tx mut AsyncTransaction<'sess>,
        ) -> Pin<Box<dyn Future<Output = Result<R>> + 'tx>>,
    {
        let max_retry_time = self.driver_config.max_retry_time;
        let mut current_delay = self.driver_config.retry_delay_initial.as_secs_f64();
        let max_delay = self.driver_config.retry_delay_max.as_secs_f64();
        let multiplier = self.driver_config.retry_delay_multiplier;
        let mut time_start: Option<Instant> = None;
        loop {
            let res: Result<R> = 'attempt: {
                let mut tx =
                    match AsyncTransaction::begin(&mut *self, mode, TelemetryAPI::TxFunc).await {
                        Ok(tx) => tx,
                        Err(e) => break 'attempt Err(e),
                    };
                match work(&mut tx).await {
                    Ok(r) => match tx.commit().await {
                        Ok(()) => break 'attempt Ok(r),
                        Err(e) => break 'attempt Err(e),
                    },
                    Err(e) => {
                        if let Err(rollback_err) = tx.rollback().await {
                            info!(
                                "while propagating user code error: \
                                ignored rollback error: {rollback_err}"
                            );
                        }
                        break 'attempt Err(e);
                    }
                }
            };
            if time_start.is_none() {
                time_start = Some(Instant::now());
            }
            let err = match res {
                Err(e) if e.is_retryable() => e,
                res => return res,
            };
            if time_start.expect("set above").elapsed() > max_retry_time {
                return Err(err);
            }
            let jitter_factor = 1.0 + rand::thread_rng().gen_range(-0.2..=0.2);
            let delay = current_delay * jitter_factor;
            warn!("transaction failed and will be retried in {delay:.4} seconds: {err}");
            tokio::time::sleep(Duration::try_from_secs_f64(delay).unwrap_or(Duration::MAX)).await;
            current_delay = (current_delay * multiplier).min(max_delay);
        }
    }

    /// Get the bookmarks last received by the session or the ones it was
    /// initialized with.
    pub fn last_bookmarks(&self) -> Arc<Bookmarks> {
        Arc::clone(&self.bookmarks)
    }

    async fn acquire_connection(&mut self, mode: RoutingControl) -> Result<AsyncPooledBolt> {
        let bookmarks = Arc::clone(&self.bookmarks);
        self.pool
            .acquire(AsyncAcquireArgs {
                mode,
                db: self.config.database.as_ref(),
                imp_user: self
                    .config
                    .impersonated_user
                    .as_ref()
                    .map(|imp| imp.as_str()),
                bookmarks: Some(&bookmarks),
                session_auth: match &self.config.auth {
                    Some(auth) => SessionAuth::Reauth(auth),
                    None => SessionAuth::None,
                },
                health_check_after: self.driver_config.idle_time_before_connection_test,
            })
            .await
    }

    fn fetch_size(&self) -> i64 {
        self.config
            .fetch_size
            .unwrap_or(self.driver_config.fetch_size)
    }

    /// After a successful commit: the new bookmark supersedes the whole
    /// causal chain; no bookmark in the success summary resets it.
    fn update_bookmarks(&mut self, bookmark: Option<String>) {
        self.bookmarks = match bookmark {
            Some(bookmark) => Arc::new(Bookmarks::from_raw([bookmark])),
            None => Arc::new(Bookmarks::default()),
        };
    }
}

/// The async twin of [`Transaction`](`crate::transaction::Transaction`).
///
/// Queries run eagerly: each [`AsyncTransaction::run()`] streams its whole
/// result before returning, so the transaction never has more than one
/// request in flight.
#[derive(Debug)]
pub struct AsyncTransaction<'session> {
    session: &'session mut AsyncSession,
    connection: Option<AsyncPooledBolt>,
    failed: bool,
    done: bool,
}

impl<'session> AsyncTransaction<'session> {
    async fn begin(
        session: &'session mut AsyncSession,
        mode: RoutingControl,
        api: TelemetryAPI,
    ) -> Result<AsyncTransaction<'session>> {
        let mut connection = session.acquire_connection(mode).await?;
        let bookmarks = Arc::clone(&session.bookmarks);
        let res = async {
            if session.driver_config.telemetry {
                connection.bolt().telemetry(
                    TelemetryParameters::new(api),
                    ResponseCallbacks::new().with_on_failure(|_| Ok(())),
                )?;
            }
            connection.bolt().begin(
                BeginParameters::new(
                    Some(&bookmarks),
                    None,
                    None,
                    mode.as_protocol_str(),
                    session.config.database.as_ref().map(|db| db.as_str()),
                    session
                        .config
                        .impersonated_user
                        .as_ref()
                        .map(|imp| imp.as_str()),
                ),
                ResponseCallbacks::new(),
            )?;
            connection.bolt().write_all().await?;
            connection.bolt().read_all().await
        }
        .await;
        if let Err(e) = res {
            connection.release().await;
            return Err(e);
        }
        Ok(Self {
            session,
            connection: Some(connection),
            failed: false,
            done: false,
        })
    }

    /// Run a query inside the transaction and load the whole result into
    /// memory.
    pub async fn run(
        &mut self,
        query: impl AsRef<str>,
        parameters: HashMap<String, ValueSend>,
    ) -> Result<EagerResult> {
        if self.failed || self.done {
            return Err(DriverError::invalid_argument(
                "cannot run queries on a closed or failed transaction",
            ));
        }
        let connection = self
            .connection
            .as_mut()
            .expect("transaction holds a connection until closed");
        let state = StreamState::shared(connection.bolt_ref());
        let fetch_size = self.session.fetch_size();
        let res = async {
            connection.bolt().run(
                RunParameters::new_transaction_run(query.as_ref(), Some(&parameters)),
                StreamState::run_callbacks(&state),
            )?;
            connection.bolt().write_all().await?;
            connection.bolt().read_all().await?;

            let mut records = Vec::new();
            loop {
                {
                    let mut state = state.borrow_mut();
                    while let Some(record) = state.buffer.pop_front() {
                        records.push(record);
                    }
                    if let Some(failure) = state.failure.take() {
                        return Err(failure);
                    }
                    if state.finished {
                        break;
                    }
                }
                let qid = state.borrow().qid.unwrap_or(-1);
                connection.bolt().pull(
                    PullParameters::new(fetch_size, qid),
                    StreamState::pull_callbacks(&state),
                )?;
                connection.bolt().write_all().await?;
                connection.bolt().read_all().await?;
            }
            let mut state = state.borrow_mut();
            Ok(EagerResult {
                keys: state
                    .keys
                    .as_ref()
                    .map(|keys| keys.as_ref().clone())
                    .unwrap_or_default(),
                records,
                summary: state
                    .summary
                    .take()
                    .expect("summary is present on a finished, unfailed stream"),
            })
        }
        .await;
        if res.is_err() {
            self.failed = true;
        }
        res
    }

    /// Commit the transaction.
    pub async fn commit(mut self) -> Result<()> {
        self.done = true;
        let mut connection = self
            .connection
            .take()
            .expect("transaction holds a connection until closed");
        let bookmark: Arc<AtomicRefCell<Option<String>>> = Default::default();
        let res = async {
            connection.bolt().commit(
                ResponseCallbacks::new()
                    .with_on_success({
                        let bookmark = Arc::clone(&bookmark);
                        move |mut meta| {
                            if let Some(ValueReceive::String(bms)) = meta.remove("bookmark") {
                                *bookmark.borrow_mut() = Some(bms);
                            }
                            Ok(())
                        }
                    })
                    .with_on_ignored(|| {
                        Err(DriverError::Transaction {
                            message: String::from("COMMIT was ignored by the server"),
                        })
                    }),
            )?;
            connection.bolt().write_all().await?;
            DriverError::wrap_commit(connection.bolt().read_all().await)
        }
        .await;
        connection.release().await;
        res?;
        let bookmark = bookmark.borrow_mut().take();
        self.session.update_bookmarks(bookmark);
        Ok(())
    }

    /// Roll the transaction back.
    ///
    /// Bookmarks of the session are left untouched.
    pub async fn rollback(mut self) -> Result<()> {
        self.done = true;
        let mut connection = self
            .connection
            .take()
            .expect("transaction holds a connection until closed");
        if self.failed {
            // the server already aborted the transaction
            connection.release().await;
            return Ok(());
        }
        let res = async {
            connection.bolt().rollback()?;
            connection.bolt().write_all().await?;
            connection.bolt().read_all().await
        }
        .await;
        connection.release().await;
        res
    }
}

/// Streaming result of [`AsyncSession::run_stream()`].
#[derive(Debug)]
pub struct AsyncRecordStream<'session> {
    session: &'session mut AsyncSession,
    connection: Option<AsyncPooledBolt>,
    state: Arc<AtomicRefCell<StreamState>>,
    fetch_size: i64,
    auto_commit: bool,
}

impl AsyncRecordStream<'_> {
    /// The field names of the records, as announced by the server when the
    /// query was started.
    pub fn keys(&self) -> Vec<Arc<String>> {
        self.state
            .borrow()
            .keys
            .as_ref()
            .map(|keys| keys.as_ref().clone())
            .unwrap_or_default()
    }

    /// Fetch the next record, suspending on network reads as necessary.
    pub async fn next(&mut self) -> Option<Result<Record>> {
        loop {
            {
                let mut state = self.state.borrow_mut();
                if let Some(record) = state.buffer.pop_front() {
                    return Some(Ok(record));
                }
                if let Some(failure) = state.failure.take() {
                    state.finished = true;
                    return Some(Err(failure));
                }
                if state.finished {
                    return None;
                }
            }
            if let Err(e) = self.fetch_batch(self.fetch_size).await {
                self.state.borrow_mut().finished = true;
                return Some(Err(e));
            }
        }
    }

    /// Discard whatever the server has left for this stream and return the
    /// summary.
    ///
    /// For auto-commit streams, the session's bookmarks are updated from the
    /// success summary.
    pub async fn consume(mut self) -> Result<Summary> {
        let res = async {
            loop {
                {
                    let mut state = self.state.borrow_mut();
                    state.buffer.clear();
                    if let Some(failure) = state.failure.take() {
                        state.finished = true;
                        return Err(failure);
                    }
                    if state.finished {
                        break;
                    }
                }
                self.discard_rest().await?;
            }
            Ok(())
        }
        .await;
        if let Some(connection) = self.connection.take() {
            connection.release().await;
        }
        res?;
        let mut state = self.state.borrow_mut();
        if self.auto_commit {
            let bookmark = state.bookmark.take();
            self.session.update_bookmarks(bookmark);
        }
        state
            .summary
            .take()
            .ok_or_else(|| DriverError::invalid_argument("stream was already consumed"))
    }

    async fn fetch_batch(&mut self, n: i64) -> Result<()> {
        let connection = self
            .connection
            .as_mut()
            .expect("stream holds a connection until consumed");
        let qid = self.state.borrow().qid.unwrap_or(-1);
        connection.bolt().pull(
            PullParameters::new(n, qid),
            StreamState::pull_callbacks(&self.state),
        )?;
        connection.bolt().write_all().await?;
        connection.bolt().read_all().await
    }

    async fn discard_rest(&mut self) -> Result<()> {
        let connection = self
            .connection
            .as_mut()
            .expect("stream holds a connection until consumed");
        let qid = self.state.borrow().qid.unwrap_or(-1);
        connection.bolt().discard(
            DiscardParameters::new(-1, qid),
            StreamState::pull_callbacks(&self.state),
        )?;
        connection.bolt().write_all().await?;
        connection.bolt().read_all().await
    }
}

/// Response state shared between a stream and the protocol callbacks.
#[derive(Debug)]
struct StreamState {
    keys: Option<Arc<Vec<Arc<String>>>>,
    qid: Option<i64>,
    buffer: VecDeque<Record>,
    finished: bool,
    bookmark: Option<String>,
    summary: Option<Summary>,
    failure: Option<DriverError>,
}

impl StreamState {
    fn shared(connection: &super::connection::AsyncBolt) -> Arc<AtomicRefCell<Self>> {
        Arc::new(AtomicRefCell::new(Self {
            keys: None,
            qid: None,
            buffer: VecDeque::new(),
            finished: false,
            bookmark: None,
            summary: Some(Summary::new(
                Arc::clone(connection.data.address()),
                connection.data.server_agent(),
                connection.data.protocol_version(),
            )),
            failure: None,
        }))
    }

    fn run_callbacks(state: &Arc<AtomicRefCell<Self>>) -> ResponseCallbacks {
        let on_success_state = Arc::clone(state);
        let on_failure_state = Arc::clone(state);
        let on_ignored_state = Arc::clone(state);
        ResponseCallbacks::new()
            .with_on_success(move |meta| on_success_state.borrow_mut().run_success(meta))
            .with_on_failure(move |error| {
                on_failure_state.borrow_mut().failure(error);
                Ok(())
            })
            .with_on_ignored(move || {
                on_ignored_state.borrow_mut().ignored();
                Ok(())
            })
    }

    fn pull_callbacks(state: &Arc<AtomicRefCell<Self>>) -> ResponseCallbacks {
        let on_success_state = Arc::clone(state);
        let on_failure_state = Arc::clone(state);
        let on_ignored_state = Arc::clone(state);
        let on_record_state = Arc::clone(state);
        ResponseCallbacks::new()
            .with_on_success(move |meta| on_success_state.borrow_mut().pull_success(meta))
            .with_on_failure(move |error| {
                on_failure_state.borrow_mut().failure(error);
                Ok(())
            })
            .with_on_ignored(move || {
                on_ignored_state.borrow_mut().ignored();
                Ok(())
            })
            .with_on_record(move |fields| {
                let mut state = on_record_state.borrow_mut();
                let keys = state.keys.as_ref().ok_or_else(|| {
                    DriverError::protocol_error("RECORD received before RUN SUCCESS")
                })?;
                if keys.len() != fields.len() {
                    return Err(DriverError::protocol_error(format!(
                        "RECORD contained {} entries but {} keys were announced",
                        fields.len(),
                        keys.len()
                    )));
                }
                let record = Record::new(Arc::clone(keys), fields);
                state.buffer.push_back(record);
                Ok(())
            })
    }

    fn run_success(&mut self, mut meta: BoltMeta) -> Result<()> {
        if let Some(qid) = meta.remove("qid") {
            let ValueReceive::Integer(qid) = qid else {
                return Err(DriverError::protocol_error(
                    "SUCCESS after RUN 'qid' was not an integer",
                ));
            };
            self.qid = Some(qid);
        }
        let Some(ValueReceive::List(fields)) = meta.remove("fields") else {
            return Err(DriverError::protocol_error(
                "SUCCESS after RUN did not contain a list of 'fields'",
            ));
        };
        let fields = fields
            .into_iter()
            .map(|field| match field {
                ValueReceive::String(field) => Ok(Arc::new(field)),
                _ => Err(DriverError::protocol_error(
                    "SUCCESS after RUN 'fields' was not a list of strings",
                )),
            })
            .collect::<Result<Vec<_>>>()?;
        self.keys = Some(Arc::new(fields));
        if let Some(summary) = self.summary.as_mut() {
            summary.load_run_meta(&mut meta)?;
        }
        Ok(())
    }

    fn pull_success(&mut self, mut meta: BoltMeta) -> Result<()> {
        let Some(ValueReceive::Boolean(true)) = meta.remove("has_more") else {
            self.finished = true;
            if let Some(ValueReceive::String(bms)) = meta.remove("bookmark") {
                self.bookmark = Some(bms);
            }
            if let Some(summary) = self.summary.as_mut() {
                summary.load_pull_meta(&mut meta)?;
            }
            return Ok(());
        };
        Ok(())
    }

    fn failure(&mut self, error: ServerError) {
        self.failure = Some(error.into());
        self.summary = None;
    }

    fn ignored(&mut self) {
        self.failure = Some(DriverError::protocol_error("record stream was ignored"));
        self.summary = None;
    }
}
