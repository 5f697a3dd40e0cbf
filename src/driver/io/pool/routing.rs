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

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, warn};
use thiserror::Error;

use crate::address_::Address;
use crate::driver::RoutingControl;
use crate::value::ValueReceive;

/// Seconds, per protocol spec, when the server omits or garbles the ttl.
const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// One cached reply to a ROUTE request: which cluster members route, read,
/// and write, and for how long that knowledge may be used.
#[derive(Debug)]
pub(crate) struct RoutingTable {
    pub(crate) routers: Vec<Arc<Address>>,
    pub(crate) readers: Vec<Arc<Address>>,
    pub(crate) writers: Vec<Arc<Address>>,
    pub(crate) initialized_without_writers: bool,
    valid_until: Instant,
}

impl RoutingTable {
    /// An expired placeholder; forces a refresh on first use.
    pub(crate) fn empty() -> Self {
        Self {
            routers: Vec::new(),
            readers: Vec::new(),
            writers: Vec::new(),
            initialized_without_writers: true,
            valid_until: Instant::now(),
        }
    }

    pub(crate) fn try_parse(
        mut meta: HashMap<String, ValueReceive>,
    ) -> Result<Self, RoutingTableParseError> {
        let broken = |reason| RoutingTableParseError { reason };
        let mut rt = match meta.remove("rt") {
            Some(ValueReceive::Map(rt)) => rt,
            _ => return Err(broken("reply did not contain an \"rt\" map")),
        };
        let ttl = match rt.remove("ttl") {
            Some(ValueReceive::Integer(seconds)) if seconds >= 0 => {
                Duration::from_secs(seconds as u64)
            }
            Some(ttl) => {
                warn!("ignoring invalid \"ttl\" in routing table: {ttl:?}");
                DEFAULT_TTL
            }
            None => DEFAULT_TTL,
        };
        let servers = match rt.remove("servers") {
            Some(ValueReceive::List(servers)) => servers,
            _ => return Err(broken("\"rt\" did not contain a \"servers\" list")),
        };

        let mut table = Self {
            routers: Vec::new(),
            readers: Vec::new(),
            writers: Vec::new(),
            initialized_without_writers: false,
            valid_until: Instant::now() + ttl,
        };
        for server in servers {
            let ValueReceive::Map(mut server) = server else {
                return Err(broken("\"servers\" entry was not a map"));
            };
            let role = match server.remove("role") {
                Some(ValueReceive::String(role)) => role,
                _ => return Err(broken("\"servers\" entry had no \"role\" string")),
            };
            let target = match role.as_str() {
                "ROUTE" => &mut table.routers,
                "READ" => &mut table.readers,
                "WRITE" => &mut table.writers,
                other => {
                    warn!("ignoring unknown server role {other:?}");
                    continue;
                }
            };
            let Some(ValueReceive::List(addresses)) = server.remove("addresses") else {
                return Err(broken("\"servers\" entry had no \"addresses\" list"));
            };
            for address in addresses {
                let ValueReceive::String(address) = address else {
                    return Err(broken("\"addresses\" entry was not a string"));
                };
                let address = Arc::new(Address::from(address.as_str()));
                if !target.contains(&address) {
                    target.push(address);
                }
            }
        }
        table.initialized_without_writers = table.writers.is_empty();
        Ok(table)
    }

    pub(crate) fn servers_for_mode(&self, mode: RoutingControl) -> &[Arc<Address>] {
        match mode {
            RoutingControl::Read => &self.readers,
            RoutingControl::Write => &self.writers,
        }
    }

    /// A table is only usable while its ttl (shortened by the configured
    /// margin) lasts, it still knows a router, and it has servers for the
    /// requested mode — an empty writer list in particular forces a refresh
    /// for WRITE work.
    pub(crate) fn is_fresh(&self, mode: RoutingControl, ttl_margin: Duration) -> bool {
        let fresh = !self.routers.is_empty()
            && !self.servers_for_mode(mode).is_empty()
            && Instant::now() + ttl_margin < self.valid_until;
        if !fresh {
            debug!("routing table expired for {mode:?}: {self:?}");
        }
        fresh
    }

    /// Forget an unreachable server entirely.
    pub(crate) fn deactivate(&mut self, address: &Address) {
        self.routers.retain(|known| **known != *address);
        self.readers.retain(|known| **known != *address);
        self.writers.retain(|known| **known != *address);
    }

    /// Forget a server as a write target only (leader switch).
    pub(crate) fn deactivate_writer(&mut self, address: &Address) {
        self.writers.retain(|known| **known != *address);
    }
}

#[derive(Error, Debug)]
#[error("failed to parse routing table: {reason}")]
pub(crate) struct RoutingTableParseError {
    reason: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::macros::hash_map;

    fn server_entry(role: &str, addresses: &[&str]) -> ValueReceive {
        ValueReceive::Map(hash_map!(
            String::from("role") => ValueReceive::String(String::from(role)),
            String::from("addresses") => ValueReceive::List(
                addresses
                    .iter()
                    .map(|a| ValueReceive::String(String::from(*a)))
                    .collect()
            ),
        ))
    }

    fn routing_meta(ttl: Option<ValueReceive>, servers: Vec<ValueReceive>) -> RoutingTable {
        let mut rt = HashMap::new();
        if let Some(ttl) = ttl {
            rt.insert(String::from("ttl"), ttl);
        }
        rt.insert(String::from("servers"), ValueReceive::List(servers));
        RoutingTable::try_parse(hash_map!(String::from("rt") => ValueReceive::Map(rt))).unwrap()
    }

    #[test]
    fn parses_all_roles() {
        let rt = routing_meta(
            Some(ValueReceive::Integer(1000)),
            vec![
                server_entry("ROUTE", &["router1:7687", "router2"]),
                server_entry("READ", &["reader:7687"]),
                server_entry("WRITE", &["writer:7687"]),
            ],
        );
        assert_eq!(rt.routers.len(), 2);
        assert_eq!(rt.routers[1].port(), 7687);
        assert_eq!(rt.readers.len(), 1);
        assert_eq!(rt.writers.len(), 1);
        assert!(!rt.initialized_without_writers);
        assert!(rt.is_fresh(RoutingControl::Write, Duration::ZERO));
    }

    #[test]
    fn missing_or_invalid_ttl_defaults() {
        for ttl in [None, Some(ValueReceive::String(String::from("soon")))] {
            let rt = routing_meta(ttl, vec![server_entry("ROUTE", &["router:7687"])]);
            assert!(rt.valid_until <= Instant::now() + DEFAULT_TTL);
            assert!(rt.valid_until >= Instant::now() + DEFAULT_TTL - Duration::from_secs(60));
        }
    }

    #[test]
    fn ttl_margin_expires_tables_early() {
        let rt = routing_meta(
            Some(ValueReceive::Integer(10)),
            vec![
                server_entry("ROUTE", &["router:7687"]),
                server_entry("READ", &["reader:7687"]),
            ],
        );
        assert!(rt.is_fresh(RoutingControl::Read, Duration::ZERO));
        assert!(!rt.is_fresh(RoutingControl::Read, Duration::from_secs(11)));
    }

    #[test]
    fn duplicated_addresses_are_dropped() {
        let rt = routing_meta(
            Some(ValueReceive::Integer(300)),
            vec![server_entry("READ", &["reader:7687", "reader:7687"])],
        );
        assert_eq!(rt.readers.len(), 1);
    }

    #[test]
    fn unknown_roles_are_ignored() {
        let rt = routing_meta(
            Some(ValueReceive::Integer(300)),
            vec![server_entry("SCRIBE", &["somewhere:7687"])],
        );
        assert!(rt.routers.is_empty());
    }

    #[test]
    fn table_without_writers_is_stale_for_writes() {
        let rt = routing_meta(
            Some(ValueReceive::Integer(300)),
            vec![
                server_entry("ROUTE", &["router:7687"]),
                server_entry("READ", &["reader:7687"]),
            ],
        );
        assert!(rt.initialized_without_writers);
        assert!(rt.is_fresh(RoutingControl::Read, Duration::ZERO));
        assert!(!rt.is_fresh(RoutingControl::Write, Duration::ZERO));
    }

    #[test]
    fn deactivate_removes_address_everywhere() {
        let mut rt = routing_meta(
            Some(ValueReceive::Integer(300)),
            vec![
                server_entry("ROUTE", &["a:7687", "b:7687"]),
                server_entry("READ", &["a:7687"]),
                server_entry("WRITE", &["a:7687", "b:7687"]),
            ],
        );
        rt.deactivate(&Address::from("a:7687"));
        assert_eq!(rt.routers.len(), 1);
        assert!(rt.readers.is_empty());
        assert_eq!(rt.writers.len(), 1);
    }

    #[test]
    fn routing_table_addresses_strip_schemes() {
        let rt = routing_meta(
            Some(ValueReceive::Integer(300)),
            vec![server_entry("READ", &["bolt://reader:1234"])],
        );
        assert_eq!(rt.readers[0].host(), "reader");
        assert_eq!(rt.readers[0].port(), 1234);
    }

    #[test]
    fn empty_placeholder_is_never_fresh() {
        assert!(!RoutingTable::empty().is_fresh(RoutingControl::Read, Duration::ZERO));
    }
}
