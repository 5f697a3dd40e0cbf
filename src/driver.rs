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

pub(crate) mod config;
pub(crate) mod eager_result;

/// Authentication token types.
pub mod auth {
    pub use super::config::auth::AuthToken;
}

pub(crate) mod io;
pub(crate) mod record;
pub mod record_stream;
pub(crate) mod session;
pub(crate) mod summary;
pub(crate) mod transaction;

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use log::warn;
use parking_lot::{Condvar, Mutex};

use crate::error_::Result;
use std::time::Instant;
pub use config::{
    ConfigureFetchSizeError, ConnectionConfig, ConnectionConfigParseError, DriverConfig,
    TlsConfigError,
};
use config::auth::AuthToken;
pub use eager_result::{EagerResult, GetSingleRecordError};
use io::{AcquireConfig, Pool, PoolConfig, SessionAuth};
pub use record::Record;
use session::config::SessionConfig;
use session::retry::ExponentialBackoff;
use session::Session;

/// Defines whether work can be routed to any cluster member (`Read`) or has
/// to go to the leader/primary (`Write`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingControl {
    /// The work may be routed to a read replica.
    Read,
    /// The work has to be sent to a writer.
    Write,
}

impl RoutingControl {
    pub(crate) fn as_protocol_str(&self) -> Option<&'static str> {
        match self {
            RoutingControl::Read => Some("r"),
            RoutingControl::Write => Some("w"),
        }
    }
}

/// The driver-level configuration sessions need to know about.
#[derive(Debug)]
pub(crate) struct ReducedDriverConfig {
    pub(crate) fetch_size: i64,
    pub(crate) idle_time_before_connection_test: Option<Duration>,
    pub(crate) telemetry: bool,
    pub(crate) default_backoff: ExponentialBackoff,
}

/// The entry point of the crate: owns the connection pool (and the routing
/// table cache for routing-enabled configurations) and hands out
/// [`Session`]s.
///
/// There is no need to pool driver objects; usually, each application uses
/// one global driver.
///
/// # Example
/// ```no_run
/// use std::sync::Arc;
///
/// use bolt_transport::driver::auth::AuthToken;
/// use bolt_transport::driver::{ConnectionConfig, Driver, DriverConfig};
///
/// let connection_config: ConnectionConfig = "neo4j://localhost:7687".parse().unwrap();
/// let driver = Driver::new(
///     connection_config,
///     DriverConfig::new().with_auth(Arc::new(AuthToken::new_basic_auth("user", "pass"))),
/// );
/// driver.verify_connectivity().unwrap();
/// ```
#[derive(Debug)]
pub struct Driver {
    config: ReducedDriverConfig,
    pool: Arc<Pool>,
    eviction_task: Mutex<Option<EvictionTask>>,
}

impl Driver {
    pub fn new(mut connection_config: ConnectionConfig, config: DriverConfig) -> Self {
        let auth = Self::resolve_auth(&mut connection_config, &config);
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
        let eviction_interval = Self::eviction_interval(&pool_config);
        let pool = Arc::new(Pool::new(addresses, pool_config));
        let eviction_task = Mutex::new(eviction_interval.map(|interval| {
            EvictionTask::spawn(Arc::clone(&pool), interval)
        }));
        Driver {
            config: ReducedDriverConfig {
                fetch_size: config.fetch_size,
                idle_time_before_connection_test: config.idle_time_before_connection_test,
                telemetry: config.telemetry,
                default_backoff: ExponentialBackoff::new()
                    .with_max_retry_time(config.max_retry_time)
                    .with_delays(
                        config.retry_delay_initial,
                        config.retry_delay_multiplier,
                        config.retry_delay_max,
                    ),
            },
            pool,
            eviction_task,
        }
    }

    /// Credentials in the URI take effect when the driver is otherwise left
    /// with the default (no) authentication.
    pub(crate) fn resolve_auth(
        connection_config: &mut ConnectionConfig,
        config: &DriverConfig,
    ) -> Arc<AuthToken> {
        let uri_user = connection_config.uri_user.take();
        let uri_password = connection_config.uri_password.take();
        if *config.auth != AuthToken::new_none_auth() {
            return Arc::clone(&config.auth);
        }
        match uri_user {
            None => Arc::clone(&config.auth),
            Some(user) => Arc::new(AuthToken::new_basic_auth(
                user,
                uri_password.unwrap_or_default(),
            )),
        }
    }

    fn eviction_interval(config: &PoolConfig) -> Option<Duration> {
        let interval = match (config.idle_timeout, config.max_connection_lifetime) {
            (Some(idle), Some(lifetime)) => idle.min(lifetime),
            (Some(idle), None) => idle,
            (None, Some(lifetime)) => lifetime,
            (None, None) => return None,
        };
        Some((interval / 2).max(Duration::from_secs(1)))
    }

    /// Spawn a new [`Session`] with the given configuration.
    ///
    /// Session creation is cheap; it's recommended to create a new session
    /// for each piece of work. Sessions borrow connections from the driver's
    /// pool as needed.
    pub fn session(&self, config: SessionConfig) -> Session<'_> {
        Session::new(config, &self.pool, &self.config)
    }

    /// Establish a connection to the server (or, in a clustered setup, to
    /// any reader) and return once it has been established or failed.
    pub fn verify_connectivity(&self) -> Result<()> {
        let deadline = self.pool.config.connection_acquisition_deadline();
        let mut connection = self.pool.acquire(AcquireConfig {
            mode: RoutingControl::Read,
            db: None,
            imp_user: None,
            bookmarks: None,
            session_auth: SessionAuth::None,
            deadline,
            health_check_after: Some(Duration::ZERO),
        })?;
        connection.write_all(deadline)?;
        connection.read_all(deadline)
    }

    /// Shut the driver down: idle connections are closed, waiters are woken
    /// up, and loaned connections are closed when they are returned.
    ///
    /// Using the driver after closing it returns errors.
    /// Dropping the driver closes it as well.
    pub fn close(&self) {
        if let Some(task) = self.eviction_task.lock().take() {
            task.stop();
        }
        self.pool.close();
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        self.close();
    }
}

/// Periodically drops stale connections from the pool.
/// Runs on its own thread because an idle application would otherwise never
/// notice connections outliving their configured lifetime.
#[derive(Debug)]
struct EvictionTask {
    shutdown: Arc<(Mutex<bool>, Condvar)>,
    handle: JoinHandle<()>,
}

impl EvictionTask {
    fn spawn(pool: Arc<Pool>, interval: Duration) -> Self {
        let shutdown: Arc<(Mutex<bool>, Condvar)> = Arc::new((Mutex::new(false), Condvar::new()));
        let handle = {
            let shutdown = Arc::clone(&shutdown);
            std::thread::Builder::new()
                .name(String::from("bolt-transport-evict"))
                .spawn(move || {
                    let (lock, condvar) = &*shutdown;
                    let mut stop = lock.lock();
                    loop {
                        if *stop {
                            return;
                        }
                        let deadline = Instant::now() + interval;
                        if condvar.wait_until(&mut stop, deadline).timed_out() && !*stop {
                            pool.evict_stale();
                        }
                    }
                })
                .expect("failed to spawn eviction thread")
        };
        Self { shutdown, handle }
    }

    fn stop(self) {
        {
            let (lock, condvar) = &*self.shutdown;
            *lock.lock() = true;
            condvar.notify_all();
        }
        if self.handle.join().is_err() {
            warn!("eviction thread panicked");
        }
    }
}
