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

//! Query summary structs (metadata) received via
//! [`RecordStream::consume()`](`super::record_stream::RecordStream::consume`).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::warn;

use crate::address_::Address;
use crate::error_::{DriverError, Result};
use crate::value::ValueReceive;

/// The summary of a query execution, produced once the result stream has been
/// fully consumed or discarded.
#[derive(Debug)]
#[non_exhaustive]
pub struct Summary {
    /// Time it took the server to have the result available.
    pub result_available_after: Option<Duration>,
    /// Time it took the server to stream the full result.
    pub result_consumed_after: Option<Duration>,
    pub counters: Counters,
    pub query_type: Option<SummaryQueryType>,
    /// The database the query was executed against.
    pub database: Option<String>,
    pub server_info: ServerInfo,
}

impl Summary {
    pub(crate) fn new(
        address: Arc<Address>,
        server_agent: Arc<String>,
        protocol_version: (u8, u8),
    ) -> Self {
        Self {
            result_available_after: None,
            result_consumed_after: None,
            counters: Default::default(),
            query_type: None,
            database: None,
            server_info: ServerInfo {
                address,
                server_agent,
                protocol_version,
            },
        }
    }

    pub(crate) fn load_run_meta(&mut self, meta: &mut HashMap<String, ValueReceive>) -> Result<()> {
        if let Some(t_first) = meta.remove("t_first") {
            self.result_available_after = load_millis("t_first", t_first)?;
        }
        Ok(())
    }

    pub(crate) fn load_pull_meta(
        &mut self,
        meta: &mut HashMap<String, ValueReceive>,
    ) -> Result<()> {
        if let Some(t_last) = meta.remove("t_last") {
            self.result_consumed_after = load_millis("t_last", t_last)?;
        }
        match meta.remove("type") {
            None => {}
            Some(ValueReceive::String(query_type)) => {
                self.query_type = match query_type.as_str() {
                    "r" => Some(SummaryQueryType::Read),
                    "w" => Some(SummaryQueryType::Write),
                    "rw" => Some(SummaryQueryType::ReadWrite),
                    "s" => Some(SummaryQueryType::Schema),
                    _ => {
                        warn!("server sent unknown query type {query_type:?}");
                        None
                    }
                };
            }
            Some(v) => {
                return Err(DriverError::protocol_error(format!(
                    "summary type was not a string: {v:?}"
                )))
            }
        }
        if let Some(ValueReceive::String(db)) = meta.remove("db") {
            self.database = Some(db);
        }
        if let Some(stats) = meta.remove("stats") {
            let stats = stats.try_into_map().map_err(|v| {
                DriverError::protocol_error(format!("summary stats was not a map: {v:?}"))
            })?;
            self.counters = Counters::load(stats);
        }
        Ok(())
    }
}

fn load_millis(name: &str, value: ValueReceive) -> Result<Option<Duration>> {
    match value {
        ValueReceive::Integer(millis) if millis >= 0 => {
            Ok(Some(Duration::from_millis(millis as u64)))
        }
        ValueReceive::Integer(_) => Ok(None),
        v => Err(DriverError::protocol_error(format!(
            "summary {name} was not an integer: {v:?}"
        ))),
    }
}

/// Update statistics of a query.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub struct Counters {
    pub nodes_created: i64,
    pub nodes_deleted: i64,
    pub relationships_created: i64,
    pub relationships_deleted: i64,
    pub properties_set: i64,
    pub labels_added: i64,
    pub labels_removed: i64,
    pub indexes_added: i64,
    pub indexes_removed: i64,
    pub constraints_added: i64,
    pub constraints_removed: i64,
    pub system_updates: i64,
    pub contains_updates: bool,
    pub contains_system_updates: bool,
}

impl Counters {
    fn load(mut stats: HashMap<String, ValueReceive>) -> Self {
        let mut int = |key: &str| match stats.remove(key) {
            Some(ValueReceive::Integer(count)) => count,
            _ => 0,
        };
        let mut counters = Self {
            nodes_created: int("nodes-created"),
            nodes_deleted: int("nodes-deleted"),
            relationships_created: int("relationships-created"),
            relationships_deleted: int("relationships-deleted"),
            properties_set: int("properties-set"),
            labels_added: int("labels-added"),
            labels_removed: int("labels-removed"),
            indexes_added: int("indexes-added"),
            indexes_removed: int("indexes-removed"),
            constraints_added: int("constraints-added"),
            constraints_removed: int("constraints-removed"),
            system_updates: int("system-updates"),
            contains_updates: false,
            contains_system_updates: false,
        };
        counters.contains_system_updates = match stats.remove("contains-system-updates") {
            Some(ValueReceive::Boolean(b)) => b,
            _ => counters.system_updates > 0,
        };
        counters.contains_updates = match stats.remove("contains-updates") {
            Some(ValueReceive::Boolean(b)) => b,
            _ => {
                counters.nodes_created > 0
                    || counters.nodes_deleted > 0
                    || counters.relationships_created > 0
                    || counters.relationships_deleted > 0
                    || counters.properties_set > 0
                    || counters.labels_added > 0
                    || counters.labels_removed > 0
                    || counters.indexes_added > 0
                    || counters.indexes_removed > 0
                    || counters.constraints_added > 0
                    || counters.constraints_removed > 0
            }
        };
        counters
    }
}

/// What kind of operations the query performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummaryQueryType {
    Read,
    Write,
    ReadWrite,
    Schema,
}

/// Information about the server a result was obtained from.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct ServerInfo {
    pub address: Arc<Address>,
    pub server_agent: Arc<String>,
    pub protocol_version: (u8, u8),
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::macros::hash_map;

    fn summary() -> Summary {
        Summary::new(
            Arc::new(Address::from(("localhost", 7687))),
            Arc::new(String::from("Neo4j/5.13.0")),
            (5, 4),
        )
    }

    #[test]
    fn loads_run_and_pull_meta() {
        let mut summary = summary();
        let mut run_meta = hash_map!(
            String::from("t_first") => ValueReceive::Integer(7),
        );
        summary.load_run_meta(&mut run_meta).unwrap();
        let mut pull_meta = hash_map!(
            String::from("t_last") => ValueReceive::Integer(13),
            String::from("type") => ValueReceive::String(String::from("rw")),
            String::from("db") => ValueReceive::String(String::from("movies")),
            String::from("stats") => ValueReceive::Map(hash_map!(
                String::from("nodes-created") => ValueReceive::Integer(2),
            )),
        );
        summary.load_pull_meta(&mut pull_meta).unwrap();

        assert_eq!(summary.result_available_after, Some(Duration::from_millis(7)));
        assert_eq!(summary.result_consumed_after, Some(Duration::from_millis(13)));
        assert_eq!(summary.query_type, Some(SummaryQueryType::ReadWrite));
        assert_eq!(summary.database.as_deref(), Some("movies"));
        assert_eq!(summary.counters.nodes_created, 2);
        assert!(summary.counters.contains_updates);
        assert!(!summary.counters.contains_system_updates);
    }

    #[test]
    fn missing_stats_mean_no_updates() {
        let mut summary = summary();
        let mut pull_meta = hash_map!();
        summary.load_pull_meta(&mut pull_meta).unwrap();
        assert!(!summary.counters.contains_updates);
        assert_eq!(summary.query_type, None);
    }
}
