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

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::info;
use parking_lot::{Condvar, Mutex};

use super::super::bolt::message_parameters::{HelloParameters, ReauthParameters};
use super::super::bolt::{self, OnServerErrorCb, TcpBolt};
use super::PoolConfig;
use crate::address_::resolution::resolve_targets;
use crate::address_::Address;
use crate::driver::config::auth::AuthToken;
use crate::error_::{DriverError, Result};

#[derive(Debug, Copy, Clone)]
pub(crate) enum SessionAuth<'a> {
    None,
    Reauth(&'a Arc<AuthToken>),
}

/// What a caller pulled out of the pool: either a live connection, or
/// permission to open a new one (counted against the pool size while the
/// caller is connecting).
enum Slot {
    Existing(TcpBolt),
    Vacancy,
}

/// The connections towards one address.
///
/// A single mutex guards the idle deque and the open-connection counter; a
/// condition variable wakes threads waiting for a returned connection. All
/// I/O (opening, health checks, resets) happens outside the lock.
#[derive(Debug, Clone)]
pub(crate) struct SimplePool(Arc<PoolCore>);

#[derive(Debug)]
pub(crate) struct PoolCore {
    address: Arc<Address>,
    config: Arc<PoolConfig>,
    closing: Arc<AtomicBool>,
    state: Mutex<PoolState>,
    slot_freed: Condvar,
}

#[derive(Debug)]
struct PoolState {
    idle: VecDeque<TcpBolt>,
    /// Connections that exist or are being opened; never exceeds
    /// `max_connection_pool_size`.
    open: usize,
}

impl SimplePool {
    pub(crate) fn new(
        address: Arc<Address>,
        config: Arc<PoolConfig>,
        closing: Arc<AtomicBool>,
    ) -> Self {
        Self(Arc::new(PoolCore {
            address,
            config,
            closing,
            state: Mutex::new(PoolState {
                idle: VecDeque::new(),
                open: 0,
            }),
            slot_freed: Condvar::new(),
        }))
    }

    /// Acquire a healthy connection, waiting for a free slot up to
    /// `deadline` when the pool is at capacity.
    pub(crate) fn acquire(
        &self,
        deadline: Option<Instant>,
        health_check_after: Option<Duration>,
        session_auth: SessionAuth,
        on_server_error: OnServerErrorCb,
    ) -> Result<SinglePooledBolt> {
        let mut on_server_error = on_server_error;
        loop {
            let slot = {
                let mut state = self.0.state.lock();
                loop {
                    if self.0.closing.load(Ordering::Acquire) {
                        return Err(DriverError::invalid_argument(
                            "cannot acquire connection from a closed driver",
                        ));
                    }
                    if let Some(slot) = Self::free_slot(&self.0, &mut state) {
                        break slot;
                    }
                    match deadline {
                        None => self.0.slot_freed.wait(&mut state),
                        Some(deadline) => {
                            if self.0.slot_freed.wait_until(&mut state, deadline).timed_out() {
                                return Err(DriverError::connection_acquisition_timeout(
                                    "waiting for room in the connection pool",
                                ));
                            }
                        }
                    }
                }
            };
            match self.settle(slot, deadline, health_check_after, session_auth, &mut on_server_error)? {
                Some(connection) => return Ok(connection),
                // the candidate didn't survive its checks, go again
                None => continue,
            }
        }
    }

    /// Like [`SimplePool::acquire`], but gives up immediately when the pool
    /// is saturated (routing wants to try the next server instead of
    /// queueing).
    pub(crate) fn try_acquire(
        &self,
        deadline: Option<Instant>,
        health_check_after: Option<Duration>,
        session_auth: SessionAuth,
        on_server_error: OnServerErrorCb,
    ) -> Result<Option<SinglePooledBolt>> {
        let mut on_server_error = on_server_error;
        loop {
            let slot = {
                let mut state = self.0.state.lock();
                if self.0.closing.load(Ordering::Acquire) {
                    return Err(DriverError::invalid_argument(
                        "cannot acquire connection from a closed driver",
                    ));
                }
                match Self::free_slot(&self.0, &mut state) {
                    Some(slot) => slot,
                    None => return Ok(None),
                }
            };
            match self.settle(slot, deadline, health_check_after, session_auth, &mut on_server_error)? {
                Some(connection) => return Ok(Some(connection)),
                None => continue,
            }
        }
    }

    fn free_slot(core: &PoolCore, state: &mut PoolState) -> Option<Slot> {
        if let Some(connection) = state.idle.pop_front() {
            return Some(Slot::Existing(connection));
        }
        if state.open < core.config.max_connection_pool_size {
            state.open += 1;
            return Some(Slot::Vacancy);
        }
        None
    }

    /// Turn a pool slot into a usable connection: open a fresh one for a
    /// vacancy; age-check, health-check, and re-authenticate an existing
    /// one. `Ok(None)` means the candidate was discarded.
    fn settle(
        &self,
        slot: Slot,
        deadline: Option<Instant>,
        health_check_after: Option<Duration>,
        session_auth: SessionAuth,
        on_server_error: &mut OnServerErrorCb,
    ) -> Result<Option<SinglePooledBolt>> {
        let mut connection = match slot {
            Slot::Vacancy => {
                let connection = self.open_connection(deadline, session_auth);
                if connection.is_err() {
                    self.0.discard_open();
                }
                return connection.map(|connection| Some(self.lend(connection)));
            }
            Slot::Existing(connection) => connection,
        };

        let too_old = self
            .0
            .config
            .max_connection_lifetime
            .map(|max| connection.is_older_than(max))
            .unwrap_or_default();
        if too_old {
            connection.debug_log(|| String::from("connection reached max lifetime"));
            connection.close();
            self.0.discard_open();
            return Ok(None);
        }

        if let Some(idle_threshold) = health_check_after {
            if connection.is_idle_for(idle_threshold) {
                connection.debug_log(|| String::from("liveness check"));
                let alive = connection
                    .reset()
                    .and_then(|_| connection.write_all(deadline))
                    .and_then(|_| connection.read_all(deadline, on_server_error.as_deref_mut()));
                if let Err(err) = alive {
                    connection.debug_log(|| format!("liveness check failed: {err}"));
                    self.0.discard_open();
                    return Ok(None);
                }
            }
        }

        if let SessionAuth::Reauth(auth) = session_auth {
            let reauth = ReauthParameters::new(auth);
            if connection.needs_reauth(reauth) {
                if !connection.supports_reauth() {
                    connection.debug_log(|| {
                        String::from("session auth without LOGON support: purge connection")
                    });
                    connection.close();
                    self.0.discard_open();
                    return Ok(None);
                }
                if let Err(err) = connection.reauth(reauth) {
                    self.0.discard_open();
                    return Err(err);
                }
            }
        }

        Ok(Some(self.lend(connection)))
    }

    fn lend(&self, connection: TcpBolt) -> SinglePooledBolt {
        SinglePooledBolt {
            core: Arc::clone(&self.0),
            connection: Some(connection),
        }
    }

    fn open_connection(
        &self,
        deadline: Option<Instant>,
        session_auth: SessionAuth,
    ) -> Result<TcpBolt> {
        let auth = match session_auth {
            SessionAuth::None => &self.0.config.auth,
            SessionAuth::Reauth(auth) => auth,
        };
        let deadline = self.handshake_deadline(deadline);

        let mut last_err = None;
        for target in resolve_targets(&self.0.address, self.0.config.resolver.as_deref())? {
            let opened = target
                .map_err(DriverError::connect_err)
                .and_then(|target| {
                    bolt::open(
                        target,
                        bolt::ConnectParameters {
                            deadline,
                            connect_timeout: self.0.config.connection_timeout,
                            keep_alive: self.0.config.keep_alive,
                            no_delay: self.0.config.no_delay,
                            tls_config: self.0.config.tls_config.as_ref().map(Arc::clone),
                        },
                    )
                });
            match opened {
                Ok(mut connection) => {
                    connection.hello(HelloParameters::new(
                        &self.0.config.user_agent,
                        auth,
                        self.0.config.routing_context.as_ref(),
                    ))?;
                    connection.write_all(deadline)?;
                    connection.read_all(deadline, None)?;
                    return Ok(connection);
                }
                Err(err) => {
                    info!("failed to reach {}: {err}", self.0.address);
                    last_err = Some(err);
                }
            }
        }
        Err(last_err.expect("resolve_targets never returns an empty list"))
    }

    fn handshake_deadline(&self, deadline: Option<Instant>) -> Option<Instant> {
        let handshake_deadline = self
            .0
            .config
            .handshake_timeout
            .map(|timeout| Instant::now() + timeout);
        match (deadline, handshake_deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Number of connections currently checked out or being opened; routing
    /// prefers the least loaded server.
    pub(crate) fn in_use(&self) -> usize {
        let state = self.0.state.lock();
        state.open - state.idle.len()
    }

    /// Drops idle connections that exceeded their maximum lifetime or the
    /// configured idle timeout.
    pub(crate) fn evict_stale(&self) {
        let stale: Vec<TcpBolt> = {
            let mut state = self.0.state.lock();
            let config = &self.0.config;
            let (stale, keep): (Vec<_>, Vec<_>) =
                std::mem::take(&mut state.idle)
                    .into_iter()
                    .partition(|connection| {
                        config
                            .max_connection_lifetime
                            .map(|max| connection.is_older_than(max))
                            .unwrap_or_default()
                            || config
                                .idle_timeout
                                .map(|max| connection.is_idle_for(max))
                                .unwrap_or_default()
                    });
            state.idle = keep.into();
            state.open -= stale.len();
            stale
        };
        // closing involves I/O (best-effort GOODBYE), keep it out of the lock
        for mut connection in stale {
            connection.debug_log(|| String::from("evicting stale connection"));
            connection.close();
        }
        self.0.slot_freed.notify_all();
    }

    /// Closes all idle connections and wakes up waiters; the pool's closing
    /// flag (shared with the owning driver) must be set beforehand.
    pub(crate) fn drain(&self) {
        debug_assert!(self.0.closing.load(Ordering::Acquire));
        let connections = {
            let mut state = self.0.state.lock();
            let connections = std::mem::take(&mut state.idle);
            state.open -= connections.len();
            connections
        };
        for mut connection in connections {
            connection.close();
        }
        self.0.slot_freed.notify_all();
    }
}

impl PoolCore {
    /// A connection (or the vacancy reserved for it) is gone for good.
    fn discard_open(&self) {
        let mut state = self.state.lock();
        state.open -= 1;
        drop(state);
        self.slot_freed.notify_one();
    }

    fn take_back(&self, mut connection: TcpBolt) {
        if self.closing.load(Ordering::Acquire) {
            connection.close();
            self.discard_open();
            return;
        }
        if connection.needs_reset() {
            let reset = connection
                .reset()
                .and_then(|_| connection.write_all(None))
                .and_then(|_| connection.read_all(None, None));
            if reset.is_err() {
                info!("ignoring failure during reset, dropping connection");
            }
        }
        let worn_out = connection.closed()
            || self
                .config
                .max_connection_lifetime
                .map(|max| connection.is_older_than(max))
                .unwrap_or_default();
        if worn_out {
            self.discard_open();
            return;
        }
        self.state.lock().idle.push_back(connection);
        self.slot_freed.notify_one();
    }
}

/// A connection on loan from a [`SimplePool`]; going out of scope returns it.
#[derive(Debug)]
pub(crate) struct SinglePooledBolt {
    core: Arc<PoolCore>,
    connection: Option<TcpBolt>,
}

impl Drop for SinglePooledBolt {
    fn drop(&mut self) {
        let connection = self
            .connection
            .take()
            .expect("connection is present from loan to return");
        self.core.take_back(connection);
    }
}

impl Deref for SinglePooledBolt {
    type Target = TcpBolt;

    fn deref(&self) -> &Self::Target {
        self.connection
            .as_ref()
            .expect("connection is present from loan to return")
    }
}

impl DerefMut for SinglePooledBolt {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.connection
            .as_mut()
            .expect("connection is present from loan to return")
    }
}
