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

mod routing;
mod single_pool;

use std::collections::{HashMap, HashSet};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use itertools::Itertools;
use log::{debug, error, info, warn};
use parking_lot::{Condvar, Mutex};
use rustls::ClientConfig;

use super::bolt::message_parameters::RouteParameters;
use super::bolt::{BoltData, ResponseCallbacks};
use crate::address_::resolution::{resolve_targets, AddressResolver};
use crate::address_::Address;
use crate::driver::config::auth::AuthToken;
use crate::driver::session::bookmarks::Bookmarks;
use crate::driver::RoutingControl;
use crate::error_::{DriverError, Result, ServerError};
use crate::sync::RefreshLock;
use crate::value::ValueSend;
pub(crate) use routing::RoutingTable;
pub(crate) use single_pool::SessionAuth;
use single_pool::{SimplePool, SinglePooledBolt};

#[derive(Debug)]
pub(crate) struct PoolConfig {
    pub(crate) routing_context: Option<HashMap<String, ValueSend>>,
    pub(crate) tls_config: Option<Arc<ClientConfig>>,
    pub(crate) user_agent: String,
    pub(crate) auth: Arc<AuthToken>,
    pub(crate) max_connection_lifetime: Option<Duration>,
    pub(crate) idle_timeout: Option<Duration>,
    pub(crate) max_connection_pool_size: usize,
    pub(crate) connection_timeout: Option<Duration>,
    pub(crate) handshake_timeout: Option<Duration>,
    pub(crate) keep_alive: bool,
    pub(crate) no_delay: bool,
    pub(crate) connection_acquisition_timeout: Option<Duration>,
    pub(crate) routing_table_refresh_ttl_margin: Duration,
    pub(crate) routing_max_retry_attempts: usize,
    pub(crate) resolver: Option<Box<dyn AddressResolver>>,
    pub(crate) telemetry: bool,
}

impl PoolConfig {
    pub(crate) fn connection_acquisition_deadline(&self) -> Option<Instant> {
        self.connection_acquisition_timeout
            .map(|timeout| Instant::now() + timeout)
    }
}

/// What a session needs a connection for; carried through acquisition so
/// routing can pick a server and freshly opened connections authenticate
/// correctly.
#[derive(Debug, Copy, Clone)]
pub(crate) struct AcquireConfig<'a> {
    pub(crate) mode: RoutingControl,
    pub(crate) db: Option<&'a Arc<String>>,
    pub(crate) imp_user: Option<&'a str>,
    pub(crate) bookmarks: Option<&'a Bookmarks>,
    pub(crate) session_auth: SessionAuth<'a>,
    pub(crate) deadline: Option<Instant>,
    pub(crate) health_check_after: Option<Duration>,
}

impl AcquireConfig<'_> {
    fn rt_key(&self) -> RtKey {
        (
            self.db.map(Arc::clone),
            self.imp_user.map(|user| Arc::new(String::from(user))),
        )
    }
}

#[derive(Debug)]
pub(crate) struct Pool {
    pub(crate) config: Arc<PoolConfig>,
    closing: Arc<AtomicBool>,
    pools: Pools,
}

#[derive(Debug)]
enum Pools {
    Direct(SimplePool),
    Routing(RoutingPool),
}

impl Pool {
    pub(crate) fn new(mut addresses: Vec<Arc<Address>>, config: PoolConfig) -> Self {
        assert!(!addresses.is_empty());
        let config = Arc::new(config);
        let closing = Arc::new(AtomicBool::new(false));
        let pools = match config.routing_context {
            None => Pools::Direct(SimplePool::new(
                addresses.swap_remove(0),
                Arc::clone(&config),
                Arc::clone(&closing),
            )),
            Some(_) => Pools::Routing(RoutingPool::new(
                addresses,
                Arc::clone(&config),
                Arc::clone(&closing),
            )),
        };
        Self {
            config,
            closing,
            pools,
        }
    }

    #[inline]
    pub(crate) fn is_routing(&self) -> bool {
        self.config.routing_context.is_some()
    }

    /// Marks the pool as closing, closes all idle connections, and wakes up
    /// every waiter. Loaned connections are closed upon return.
    pub(crate) fn close(&self) {
        self.closing.store(true, Ordering::Release);
        match &self.pools {
            Pools::Direct(pool) => pool.drain(),
            Pools::Routing(pool) => pool.drain(),
        }
    }

    pub(crate) fn evict_stale(&self) {
        match &self.pools {
            Pools::Direct(pool) => pool.evict_stale(),
            Pools::Routing(pool) => pool.evict_stale(),
        }
    }

    pub(crate) fn acquire(&self, args: AcquireConfig) -> Result<PooledBolt<'_>> {
        let bolt = match &self.pools {
            Pools::Direct(pool) => pool.acquire(
                args.deadline,
                args.health_check_after,
                args.session_auth,
                None,
            )?,
            Pools::Routing(pool) => pool.acquire(args)?,
        };
        Ok(PooledBolt {
            bolt: Some(bolt),
            pool: self,
        })
    }

    fn handle_server_error(&self, bolt_data: &mut BoltData, error: &mut ServerError) -> Result<()> {
        if let Pools::Routing(pool) = &self.pools {
            pool.apply_server_error(bolt_data.address(), error);
        }
        Ok(())
    }

    fn deactivate_server(&self, address: &Address) {
        if let Pools::Routing(pool) = &self.pools {
            pool.deactivate_server(address);
        }
    }
}

/// A loaned connection plus its pool, so I/O failures and server errors can
/// feed back into the routing state.
#[derive(Debug)]
pub(crate) struct PooledBolt<'pool> {
    bolt: Option<SinglePooledBolt>,
    pool: &'pool Pool,
}

impl PooledBolt<'_> {
    /// Routing-aware I/O: a connection dying mid-operation takes its server
    /// out of the routing tables.
    fn with_io<T>(&mut self, io_op: impl FnOnce(&mut SinglePooledBolt) -> Result<T>) -> Result<T> {
        let bolt = self
            .bolt
            .as_mut()
            .expect("connection is present from loan to return");
        let was_broken = bolt.unexpectedly_closed();
        let res = io_op(bolt);
        let is_broken = self
            .bolt
            .as_ref()
            .expect("connection is present from loan to return")
            .unexpectedly_closed();
        if !was_broken && is_broken {
            self.pool.deactivate_server(&self.deref().address())
        }
        res
    }

    pub(crate) fn read_one(&mut self, deadline: Option<Instant>) -> Result<()> {
        let pool = self.pool;
        self.with_io(|bolt| {
            let mut cb = |data: &mut BoltData, error: &mut ServerError| {
                pool.handle_server_error(data, error)
            };
            bolt.read_one(deadline, Some(&mut cb))
        })
    }

    pub(crate) fn read_all(&mut self, deadline: Option<Instant>) -> Result<()> {
        let pool = self.pool;
        self.with_io(|bolt| {
            let mut cb = |data: &mut BoltData, error: &mut ServerError| {
                pool.handle_server_error(data, error)
            };
            bolt.read_all(deadline, Some(&mut cb))
        })
    }

    pub(crate) fn write_all(&mut self, deadline: Option<Instant>) -> Result<()> {
        self.with_io(|bolt| bolt.write_all(deadline))
    }
}

impl Deref for PooledBolt<'_> {
    type Target = SinglePooledBolt;

    fn deref(&self) -> &Self::Target {
        self.bolt
            .as_ref()
            .expect("connection is present from loan to return")
    }
}

impl DerefMut for PooledBolt<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.bolt
            .as_mut()
            .expect("connection is present from loan to return")
    }
}

impl Drop for PooledBolt<'_> {
    fn drop(&mut self) {
        match &self.pool.pools {
            Pools::Direct(_) => drop(self.bolt.take()),
            Pools::Routing(pool) => {
                // serialize with waiters so the wake-up cannot slip between
                // their last capacity check and their going to sleep
                let _guard = pool.returned.0.lock();
                drop(self.bolt.take());
                pool.returned.1.notify_all();
            }
        }
    }
}

/// Routing tables are cached per database and impersonated user.
type RtKey = (Option<Arc<String>>, Option<Arc<String>>);
type RoutingTables = HashMap<RtKey, RoutingTable>;

#[derive(Debug)]
struct RoutingPool {
    server_pools: RefreshLock<HashMap<Arc<Address>, SimplePool>>,
    tables: RefreshLock<RoutingTables>,
    /// woken whenever a connection goes back to any server pool
    returned: (Mutex<()>, Condvar),
    /// the configured seed routers
    seeds: Vec<Arc<Address>>,
    config: Arc<PoolConfig>,
    closing: Arc<AtomicBool>,
}

/// Outcome of one try-every-target sweep in [`RoutingPool::acquire`].
enum Sweep {
    Acquired(SinglePooledBolt),
    AllSaturated,
    TableChanged,
}

impl RoutingPool {
    fn new(seeds: Vec<Arc<Address>>, config: Arc<PoolConfig>, closing: Arc<AtomicBool>) -> Self {
        assert!(config.routing_context.is_some());
        assert!(!seeds.is_empty());
        Self {
            server_pools: RefreshLock::new(HashMap::new()),
            tables: RefreshLock::new(HashMap::new()),
            returned: (Mutex::new(()), Condvar::new()),
            seeds,
            config,
            closing,
        }
    }

    fn acquire(&self, args: AcquireConfig) -> Result<SinglePooledBolt> {
        debug!(
            "acquiring {:?} connection towards {}",
            args.mode,
            args.db
                .map(|db| format!("{db:?}"))
                .unwrap_or_else(|| String::from("the default database"))
        );
        loop {
            if self.closing.load(Ordering::Acquire) {
                return Err(DriverError::invalid_argument(
                    "cannot acquire connection from a closed driver",
                ));
            }
            let targets = self.fresh_targets(args)?;
            match self.sweep_targets(&targets, args)? {
                Sweep::Acquired(connection) => return Ok(connection),
                Sweep::TableChanged => continue,
                Sweep::AllSaturated => {}
            }
            // every eligible server is at capacity: re-check while holding
            // the wake-up lock, then sleep until a connection comes back
            let mut guard = self.returned.0.lock();
            match self.sweep_targets(&targets, args)? {
                Sweep::Acquired(connection) => return Ok(connection),
                Sweep::TableChanged => continue,
                Sweep::AllSaturated => match args.deadline {
                    None => self.returned.1.wait(&mut guard),
                    Some(deadline) => {
                        if self.returned.1.wait_until(&mut guard, deadline).timed_out() {
                            return Err(DriverError::connection_acquisition_timeout(
                                "waiting for room in the connection pool",
                            ));
                        }
                    }
                },
            }
        }
    }

    /// Try every target in order; a server dying during the attempt is
    /// deactivated and invalidates the target list.
    fn sweep_targets(&self, targets: &[Arc<Address>], args: AcquireConfig) -> Result<Sweep> {
        for target in targets {
            let mut on_server_error = |data: &mut BoltData, error: &mut ServerError| {
                self.apply_server_error(data.address(), error);
                Ok(())
            };
            let acquired = self.pool_of(target).try_acquire(
                args.deadline,
                args.health_check_after,
                args.session_auth,
                Some(&mut on_server_error),
            );
            match acquired {
                Ok(Some(connection)) => return Ok(Sweep::Acquired(connection)),
                // saturated, try the next (least busy) server
                Ok(None) => continue,
                Err(DriverError::Network { .. }) => {
                    self.deactivate_server(target);
                    return Ok(Sweep::TableChanged);
                }
                Err(err) => return Err(err),
            }
        }
        Ok(Sweep::AllSaturated)
    }

    /// Servers of the requested role from a fresh routing table, least
    /// loaded first. Table refreshes are retried up to
    /// `routing_max_retry_attempts` times.
    fn fresh_targets(&self, args: AcquireConfig) -> Result<Vec<Arc<Address>>> {
        let key = args.rt_key();
        let margin = self.config.routing_table_refresh_ttl_margin;
        let mut last_err = None;
        for _ in 0..self.config.routing_max_retry_attempts.max(1) {
            let tables = self.tables.maybe_refresh(
                |tables| {
                    tables
                        .get(&key)
                        .map(|table| !table.is_fresh(args.mode, margin))
                        .unwrap_or(true)
                },
                |tables| {
                    let table = self.fetch_table(args, tables)?;
                    tables.insert(key.clone(), table);
                    self.drop_unknown_server_pools(tables);
                    Ok(())
                },
            );
            match tables {
                Ok(tables) => {
                    let servers = tables
                        .get(&key)
                        .expect("refreshed above")
                        .servers_for_mode(args.mode);
                    if servers.is_empty() {
                        last_err = Some(DriverError::disconnect("routing options depleted"));
                        continue;
                    }
                    return Ok(self.by_load(servers));
                }
                Err(err) => {
                    warn!("failed to obtain a fresh routing table: {err}");
                    last_err = Some(err);
                }
            }
        }
        Err(last_err.expect("loop ran at least once"))
    }

    fn by_load(&self, servers: &[Arc<Address>]) -> Vec<Arc<Address>> {
        if servers.len() <= 1 {
            return servers.to_vec();
        }
        let pools = self.server_pools.read();
        servers
            .iter()
            .map(|server| {
                let load = pools.get(server).map(SimplePool::in_use).unwrap_or(0);
                (Arc::clone(server), load)
            })
            .sorted_unstable_by_key(|(_, load)| *load)
            .map(|(server, _)| server)
            .collect()
    }

    /// Ask routers for a new table: first the ones from the current table,
    /// then the configured seeds (flipped for tables that never saw a
    /// writer, where the seeds are the better bet).
    ///
    /// Runs while `tables` is locked for refreshing; unreachable routers are
    /// deactivated directly in the borrowed tables.
    fn fetch_table(&self, args: AcquireConfig, tables: &mut RoutingTables) -> Result<RoutingTable> {
        let (known_routers, seeds_first) = match tables.get(&args.rt_key()) {
            None => (Vec::new(), true),
            Some(table) => (
                table
                    .routers
                    .iter()
                    .filter(|router| !self.seeds.contains(router))
                    .map(Arc::clone)
                    .collect(),
                table.initialized_without_writers,
            ),
        };
        let mut routers = known_routers;
        match seeds_first {
            true => drop(routers.splice(0..0, self.seeds.iter().map(Arc::clone))),
            false => routers.extend(self.seeds.iter().map(Arc::clone)),
        }

        let mut last_err = None;
        for router in &routers {
            for target in resolve_targets(router, self.config.resolver.as_deref())? {
                let Ok(target) = target else {
                    Self::deactivate_in(tables, router);
                    self.drop_server_pool(router);
                    continue;
                };
                match self.fetch_table_from(&target, args) {
                    Ok(table) => return Ok(table),
                    Err(err) if err.fatal_during_discovery() => return Err(err),
                    Err(err) => {
                        info!("ignored error during discovery: {err:?}");
                        Self::deactivate_in(tables, &target);
                        self.drop_server_pool(&target);
                        last_err = Some(err);
                    }
                }
            }
        }
        error!("no router produced a routing table");
        Err(DriverError::disconnect(format!(
            "unable to retrieve routing information; last error: {}",
            last_err.unwrap_or_else(|| DriverError::disconnect("no known routers left"))
        )))
    }

    fn fetch_table_from(&self, router: &Arc<Address>, args: AcquireConfig) -> Result<RoutingTable> {
        let mut connection = self.pool_of(router).acquire(
            args.deadline,
            args.health_check_after,
            args.session_auth,
            None,
        )?;
        let table = Arc::new(Mutex::new(None));
        connection.route(
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
                let table = Arc::clone(&table);
                move |meta| {
                    let parsed = RoutingTable::try_parse(meta).map_err(|e| {
                        warn!("failed to parse routing table: {e}");
                        DriverError::protocol_error(format!("{e}"))
                    });
                    *table.lock() = Some(parsed);
                    Ok(())
                }
            }),
        )?;
        connection.write_all(args.deadline)?;
        connection.read_all(args.deadline, None)?;
        drop(connection);

        let table = Arc::try_unwrap(table)
            .expect("read_all resolves all response callbacks")
            .into_inner()
            .ok_or_else(|| {
                DriverError::protocol_error(
                    "server did not reply with SUCCESS or FAILURE to ROUTE request",
                )
            })??;
        // a table without routers or readers is useless; no writers is a
        // legitimate transient state (e.g., during a leader switch)
        if table.routers.is_empty() || table.readers.is_empty() {
            debug!("received incomplete routing table -> discarded");
            return Err(DriverError::disconnect(
                "received routing table without routers or readers",
            ));
        }
        Ok(table)
    }

    fn pool_of(&self, address: &Arc<Address>) -> SimplePool {
        let pools = self
            .server_pools
            .maybe_refresh(
                |pools| !pools.contains_key(address),
                |pools| {
                    pools.insert(
                        Arc::clone(address),
                        SimplePool::new(
                            Arc::clone(address),
                            Arc::clone(&self.config),
                            Arc::clone(&self.closing),
                        ),
                    );
                    Ok(())
                },
            )
            .expect("pool creation is infallible");
        pools.get(address).expect("just inserted above").clone()
    }

    /// Drops pools of servers that no longer appear in any routing table.
    fn drop_unknown_server_pools(&self, tables: &RoutingTables) {
        let known = tables
            .values()
            .flat_map(|table| {
                [&table.routers, &table.readers, &table.writers]
                    .into_iter()
                    .flatten()
                    .map(Arc::clone)
            })
            .collect::<HashSet<_>>();
        let _ = self.server_pools.write(|pools| {
            pools.retain(|address, _| known.contains(address));
            Ok(())
        });
    }

    fn apply_server_error(&self, address: &Arc<Address>, error: &ServerError) {
        if error.deactivates_server() {
            self.deactivate_server(address);
        } else if error.invalidates_writer() {
            debug!("deactivating writer: {address:?}");
            let _ = self.tables.write(|tables| {
                tables
                    .values_mut()
                    .for_each(|table| table.deactivate_writer(address));
                Ok(())
            });
        }
    }

    fn deactivate_in(tables: &mut RoutingTables, address: &Address) {
        debug!("deactivating address: {address:?}");
        tables
            .values_mut()
            .for_each(|table| table.deactivate(address));
    }

    fn deactivate_server(&self, address: &Address) {
        let _ = self.tables.write(|tables| {
            Self::deactivate_in(tables, address);
            Ok(())
        });
        self.drop_server_pool(address);
    }

    fn drop_server_pool(&self, address: &Address) {
        let _ = self.server_pools.write(|pools| {
            pools.retain(|known, _| **known != *address);
            Ok(())
        });
    }

    fn evict_stale(&self) {
        for pool in self.server_pools.read().values() {
            pool.evict_stale();
        }
    }

    fn drain(&self) {
        for pool in self.server_pools.read().values() {
            pool.drain();
        }
        self.returned.1.notify_all();
    }
}
