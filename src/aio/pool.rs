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
use std::ops::DerefMut;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use parking_lot::Mutex;
use tokio::sync::{Mutex as TokioMutex, OwnedSemaphorePermit, Semaphore};

use super::connection::{open, AsyncBolt, AsyncConnectParameters};
use crate::address_::Address;
use crate::driver::io::bolt::message_parameters::{
    HelloParameters, ReauthParameters, RouteParameters,
};
use crate::driver::io::bolt::ResponseCallbacks;
use crate::driver::io::{PoolConfig, RoutingTable, SessionAuth};
use crate::driver::session::bookmarks::Bookmarks;
use crate::driver::RoutingControl;
use crate::error_::{DriverError, Result};

type RtKey = (Option<Arc<String>>, Option<Arc<String>>);
type RoutingTables = HashMap<RtKey, RoutingTable>;

#[derive(Debug, Clone, Copy)]
pub(super) struct AsyncAcquireArgs<'a> {
    pub(super) mode: RoutingControl,
    pub(super) db: Option<&'a Arc<String>>,
    pub(super) imp_user: Option<&'a str>,
    pub(super) bookmarks: Option<&'a Bookmarks>,
    pub(super) session_auth: SessionAuth<'a>,
    pub(super) health_check_after: Option<Duration>,
}

/// Async variant of the connection pool: per-address sub-pools whose size is
/// enforced with a semaphore, plus the routing-table cache for routing
/// configurations.
#[derive(Debug)]
pub(super) struct AsyncPool {
    config: Arc<PoolConfig>,
    addresses: Vec<Arc<Address>>,
    pools: Mutex<HashMap<Arc<Address>, Arc<AsyncInnerPool>>>,
    routing_tables: TokioMutex<RoutingTables>,
    round_robin: AtomicUsize,
    closing: Arc<AtomicBool>,
}

impl AsyncPool {
    pub(super) fn new(addresses: Vec<Arc<Address>>, config: PoolConfig) -> Self {
        assert!(!addresses.is_empty());
        Self {
            config: Arc::new(config),
            addresses,
            pools: Mutex::new(HashMap::new()),
            routing_tables: TokioMutex::new(HashMap::new()),
            round_robin: AtomicUsize::new(0),
            closing: Arc::new(AtomicBool::new(false)),
        }
    }

    pub(super) fn config(&self) -> &Arc<PoolConfig> {
        &self.config
    }

    pub(super) fn is_routing(&self) -> bool {
        self.config.routing_context.is_some()
    }

    pub(super) fn close(&self) {
        self.closing.store(true, Ordering::Release);
        let pools = self.pools.lock();
        for pool in pools.values() {
            pool.drain();
        }
    }

    pub(super) async fn acquire(&self, args: AsyncAcquireArgs<'_>) -> Result<AsyncPooledBolt> {
        if !self.is_routing() {
            let pool = self.pool_for(&self.addresses[0]);
            return pool.acquire(args.session_auth, args.health_check_after).await;
        }

        let attempts = self.config.routing_max_retry_attempts.max(1);
        let mut last_err = None;
        for _ in 0..attempts {
            let targets = match self.fresh_targets(args).await {
                Ok(targets) => targets,
                Err(err) => {
                    warn!("failed to obtain fresh routing table: {err}");
                    last_err = Some(err);
                    continue;
                }
            };
            let offset = self.round_robin.fetch_add(1, Ordering::Relaxed);
            for i in 0..targets.len() {
                let target = &targets[(offset + i) % targets.len()];
                match self
                    .pool_for(target)
                    .acquire(args.session_auth, args.health_check_after)
                    .await
                {
                    Ok(connection) => return Ok(connection),
                    Err(err @ DriverError::Network { .. }) => {
                        self.deactivate_server(target).await;
                        last_err = Some(err);
                    }
                    Err(err) => return Err(err),
                }
            }
        }
        Err(last_err.unwrap_or_else(|| DriverError::disconnect("routing options depleted")))
    }

    fn pool_for(&self, address: &Arc<Address>) -> Arc<AsyncInnerPool> {
        let mut pools = self.pools.lock();
        Arc::clone(pools.entry(Arc::clone(address)).or_insert_with(|| {
            Arc::new(AsyncInnerPool::new(
                Arc::clone(address),
                Arc::clone(&self.config),
                Arc::clone(&self.closing),
            ))
        }))
    }

    async fn fresh_targets(&self, args: AsyncAcquireArgs<'_>) -> Result<Vec<Arc<Address>>> {
        let key: RtKey = (
            args.db.map(Arc::clone),
            args.imp_user.map(|user| Arc::new(String::from(user))),
        );
        let mut tables = self.routing_tables.lock().await;
        let ttl_margin = self.config.routing_table_refresh_ttl_margin;
        let rt = tables.entry(key.clone()).or_insert_with(RoutingTable::empty);
        if !rt.is_fresh(args.mode, ttl_margin) {
            let new_rt = self.fetch_rt(args, rt).await?;
            tables.insert(key.clone(), new_rt);
        }
        let rt = tables.get(&key).expect("inserted above");
        let targets = rt.servers_for_mode(args.mode).to_vec();
        if targets.is_empty() {
            return Err(DriverError::disconnect("routing options depleted"));
        }
        Ok(targets)
    }

    async fn fetch_rt(
        &self,
        args: AsyncAcquireArgs<'_>,
        current: &RoutingTable,
    ) -> Result<RoutingTable> {
        let mut routers = current.routers.clone();
        let extra: Vec<_> = self
            .addresses
            .iter()
            .filter(|a| !routers.contains(a))
            .map(Arc::clone)
            .collect();
        routers.extend(extra);
        let mut last_err = None;
        for router in &routers {
            let res = self.fetch_rt_from_router(router, args).await;
            match res {
                Ok(rt) => {
                    if rt.routers.is_empty() || rt.readers.is_empty() {
                        debug!("received routing table without routers or readers -> discarded");
                        last_err = Some(DriverError::disconnect(
                            "received incomplete routing table",
                        ));
                        continue;
                    }
                    return Ok(rt);
                }
                Err(err) => {
                    if err.fatal_during_discovery() {
                        return Err(err);
                    }
                    info!("ignored error during discovery: {err:?}");
                    last_err = Some(err);
                }
            }
        }
        Err(DriverError::disconnect(format!(
            "unable to retrieve routing information; last error: {}",
            last_err.unwrap_or_else(|| DriverError::disconnect("no known routers left"))
        )))
    }

    async fn fetch_rt_from_router(
        &self,
        router: &Arc<Address>,
        args: AsyncAcquireArgs<'_>,
    ) -> Result<RoutingTable> {
        let mut connection = self
            .pool_for(router)
            .acquire(args.session_auth, args.health_check_after)
            .await?;
        let rt = Arc::new(Mutex::new(None));
        let res = async {
            connection.bolt().route(
                RouteParameters::new(
                    self.config
                        .routing_context
                        .as_ref()
                        .expect("routing pools always have a routing context"),
                    args.bookmarks,
                    args.db.map(|db| db.as_str()),
                    args.imp_user,
                ),
                ResponseCallbacks::new().with_on_success({
                    let rt = Arc::clone(&rt);
                    move |meta| {
                        let mut res = match RoutingTable::try_parse(meta) {
                            Ok(new_rt) => Some(Ok(new_rt)),
                            Err(e) => {
                                warn!("failed to parse routing table: {e}");
                                Some(Err(DriverError::protocol_error(format!("{e}"))))
                            }
                        };
                        std::mem::swap(rt.lock().deref_mut(), &mut res);
                        Ok(())
                    }
                }),
            )?;
            connection.bolt().write_all().await?;
            connection.bolt().read_all().await
        }
        .await;
        connection.release().await;
        res?;
        let rt = Arc::try_unwrap(rt).expect("read_all flushes all ResponseCallbacks");
        rt.into_inner().ok_or_else(|| {
            DriverError::protocol_error(
                "server did not reply with SUCCESS or FAILURE to ROUTE request",
            )
        })?
    }

    async fn deactivate_server(&self, address: &Arc<Address>) {
        debug!("deactivating address: {address:?}");
        let mut tables = self.routing_tables.lock().await;
        tables
            .iter_mut()
            .for_each(|(_, rt)| rt.deactivate(address));
        self.pools.lock().remove(address);
    }
}

#[derive(Debug)]
struct AsyncInnerPool {
    address: Arc<Address>,
    config: Arc<PoolConfig>,
    closing: Arc<AtomicBool>,
    capacity: Arc<Semaphore>,
    idle: Mutex<VecDeque<AsyncBolt>>,
}

impl AsyncInnerPool {
    fn new(address: Arc<Address>, config: Arc<PoolConfig>, closing: Arc<AtomicBool>) -> Self {
        let capacity = Arc::new(Semaphore::new(config.max_connection_pool_size));
        Self {
            address,
            config,
            closing,
            capacity,
            idle: Mutex::new(VecDeque::new()),
        }
    }

    fn drain(&self) {
        // connections are simply dropped; GOODBYE would require awaiting
        self.idle.lock().clear();
    }

    async fn acquire(
        self: Arc<Self>,
        session_auth: SessionAuth<'_>,
        health_check_after: Option<Duration>,
    ) -> Result<AsyncPooledBolt> {
        let permit = match self.config.connection_acquisition_timeout {
            None => Semaphore::acquire_owned(Arc::clone(&self.capacity)).await,
            Some(timeout) => {
                match tokio::time::timeout(
                    timeout,
                    Semaphore::acquire_owned(Arc::clone(&self.capacity)),
                )
                .await
                {
                    Ok(permit) => permit,
                    Err(_) => {
                        return Err(DriverError::connection_acquisition_timeout(
                            "waiting for room in the connection pool",
                        ))
                    }
                }
            }
        }
        .expect("pool semaphore is never closed");

        loop {
            if self.closing.load(Ordering::Acquire) {
                return Err(DriverError::invalid_argument(
                    "cannot acquire connection from a closed driver",
                ));
            }
            let connection = self.idle.lock().pop_front();
            let Some(mut connection) = connection else {
                let connection = self.open_new(session_auth).await?;
                return Ok(AsyncPooledBolt {
                    conn: Some(connection),
                    pool: Arc::clone(&self),
                    _permit: permit,
                });
            };
            if let Some(max_lifetime) = self.config.max_connection_lifetime {
                if connection.data.is_older_than(max_lifetime) {
                    connection.close().await;
                    continue;
                }
            }
            if let Some(timeout) = self.config.idle_timeout {
                if connection.data.is_idle_for(timeout) {
                    connection.close().await;
                    continue;
                }
            }
            if let Some(timeout) = health_check_after {
                if connection.data.is_idle_for(timeout) {
                    let res = async {
                        connection.reset()?;
                        connection.write_all().await?;
                        connection.read_all().await
                    }
                    .await;
                    if let Err(err) = res {
                        debug!("liveness check failed: {err}");
                        continue;
                    }
                }
            }
            match self.reauth(&mut connection, session_auth).await? {
                true => {
                    return Ok(AsyncPooledBolt {
                        conn: Some(connection),
                        pool: Arc::clone(&self),
                        _permit: permit,
                    })
                }
                false => {
                    connection.close().await;
                    continue;
                }
            }
        }
    }

    /// Returns `false` when the connection cannot carry the required auth
    /// and must be replaced.
    async fn reauth(
        &self,
        connection: &mut AsyncBolt,
        session_auth: SessionAuth<'_>,
    ) -> Result<bool> {
        if let SessionAuth::Reauth(auth) = session_auth {
            let reauth_params = ReauthParameters::new(auth);
            if connection.data.needs_reauth(reauth_params) {
                if !connection.supports_reauth() {
                    debug!("session auth without LOGON support: purge connection");
                    return Ok(false);
                }
                connection.reauth(reauth_params)?;
            }
        }
        Ok(true)
    }

    async fn open_new(&self, session_auth: SessionAuth<'_>) -> Result<AsyncBolt> {
        let auth = match session_auth {
            SessionAuth::None => &self.config.auth,
            SessionAuth::Reauth(auth) => auth,
        };
        let mut connection = open(
            Arc::clone(&self.address),
            AsyncConnectParameters {
                connect_timeout: self.config.connection_timeout,
                handshake_timeout: self.config.handshake_timeout,
                keep_alive: self.config.keep_alive,
                no_delay: self.config.no_delay,
                tls_config: self.config.tls_config.as_ref().map(Arc::clone),
            },
        )
        .await?;
        connection.hello(HelloParameters::new(
            &self.config.user_agent,
            auth,
            self.config.routing_context.as_ref(),
        ))?;
        connection.write_all().await?;
        connection.read_all().await?;
        Ok(connection)
    }

    async fn release(&self, mut connection: AsyncBolt) {
        if self.closing.load(Ordering::Acquire)
            || connection.cancelled_mid_io()
            || connection.closed()
        {
            connection.close().await;
            return;
        }
        if connection.data.needs_reset() {
            let res = async {
                connection.reset()?;
                connection.write_all().await?;
                connection.read_all().await
            }
            .await;
            if res.is_err() {
                info!("ignoring failure during reset, dropping connection");
                return;
            }
        }
        let exceeded_lifetime = self
            .config
            .max_connection_lifetime
            .map(|max| connection.data.is_older_than(max))
            .unwrap_or_default();
        if exceeded_lifetime {
            connection.close().await;
            return;
        }
        self.idle.lock().push_back(connection);
    }
}

/// A connection loaned out of the pool.
///
/// Dropping it without calling [`AsyncPooledBolt::release()`] closes the
/// underlying connection (there is no way to asynchronously return it to a
/// clean state from `Drop`); that is the cancellation path.
#[derive(Debug)]
pub(super) struct AsyncPooledBolt {
    conn: Option<AsyncBolt>,
    pool: Arc<AsyncInnerPool>,
    _permit: OwnedSemaphorePermit,
}

impl AsyncPooledBolt {
    pub(super) fn bolt(&mut self) -> &mut AsyncBolt {
        self.conn
            .as_mut()
            .expect("connection should be Some from init to drop")
    }

    pub(super) fn bolt_ref(&self) -> &AsyncBolt {
        self.conn
            .as_ref()
            .expect("connection should be Some from init to drop")
    }

    /// Gracefully give the connection back to the pool.
    pub(super) async fn release(mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn).await;
        }
    }
}
