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

use std::fmt::Debug;

use parking_lot::{
    RwLock, RwLockReadGuard, RwLockUpgradableReadGuard, RwLockWriteGuard,
};

use crate::error_::Result;

/// A read-mostly lock for cached data that occasionally needs refreshing.
///
/// Readers share the lock freely. A refresh starts as an upgradable read
/// (serializing refreshers without blocking plain readers), re-checks the
/// staleness condition, and only then upgrades to exclusive access.
#[derive(Debug)]
pub(crate) struct RefreshLock<T: Debug> {
    inner: RwLock<T>,
}

impl<T: Debug> RefreshLock<T> {
    pub(crate) fn new(inner: T) -> Self {
        Self {
            inner: RwLock::new(inner),
        }
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, T> {
        self.inner.read()
    }

    /// Run `refresh` under the write lock, then downgrade to a read guard.
    pub(crate) fn write<R>(
        &self,
        refresh: impl FnOnce(&mut RwLockWriteGuard<'_, T>) -> Result<R>,
    ) -> Result<R> {
        let mut guard = self.inner.write();
        refresh(&mut guard)
    }

    /// Return a read guard, refreshing the data first when `is_stale` says
    /// so. `is_stale` may be evaluated more than once; `refresh` runs at
    /// most once per call and only while the data is actually stale.
    pub(crate) fn maybe_refresh(
        &self,
        mut is_stale: impl FnMut(&T) -> bool,
        refresh: impl FnOnce(&mut RwLockWriteGuard<'_, T>) -> Result<()>,
    ) -> Result<RwLockReadGuard<'_, T>> {
        {
            let guard = self.inner.read();
            if !is_stale(&guard) {
                return Ok(guard);
            }
        }
        let guard = self.inner.upgradable_read();
        if !is_stale(&guard) {
            // someone else refreshed while we waited for the upgradable lock
            return Ok(RwLockUpgradableReadGuard::downgrade(guard));
        }
        let mut guard = RwLockUpgradableReadGuard::upgrade(guard);
        refresh(&mut guard)?;
        Ok(RwLockWriteGuard::downgrade(guard))
    }
}
