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

//! # Bolt Transport
//!
//! This crate provides a client-side transport for graph databases speaking
//! the Bolt protocol.
//! Hand it a connection URI plus credentials, request sessions, and execute
//! parameterized Cypher queries; it delivers record streams and execution
//! summaries while transparently handling protocol version negotiation,
//! connection pooling, cluster routing, transaction lifecycle, and retries
//! of transient failures.
//!
//! Both a blocking API ([`driver`]) and a tokio-based async API ([`aio`])
//! are provided; they share the wire codec and the protocol state machine.
//!
//! ## Basic Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use bolt_transport::driver::auth::AuthToken;
//! use bolt_transport::driver::{ConnectionConfig, Driver, DriverConfig, RoutingControl};
//! use bolt_transport::{value_map, ValueReceive};
//!
//! let connection_config: ConnectionConfig = "neo4j://localhost:7687".parse().unwrap();
//! let driver = Driver::new(
//!     // tell the driver where to connect to
//!     connection_config,
//!     // configure how the driver works locally (e.g., authentication)
//!     DriverConfig::new().with_auth(Arc::new(AuthToken::new_basic_auth("user", "pass"))),
//! );
//!
//! let mut session = driver.session(Default::default());
//! let result = session
//!     .auto_commit("RETURN $x AS x")
//!     // Use query parameters (instead of string interpolation) to avoid
//!     // injection attacks and improve performance.
//!     .with_parameters(value_map!({"x": 123}))
//!     // Tell the driver to send the query to a read server.
//!     .with_routing_control(RoutingControl::Read)
//!     .run()
//!     .unwrap();
//!
//! assert_eq!(result.records.len(), 1);
//! for record in result.records {
//!     assert_eq!(record.value("x"), Some(&ValueReceive::Integer(123)));
//! }
//! ```
//!
//! ## Concepts
//!
//! ### The Driver
//! The fundamental type of this crate is the [`driver::Driver`]
//! (respectively [`aio::AsyncDriver`]).
//! Through it, all database interactions are performed.
//! The driver manages a connection pool, so there is no need to pool driver
//! objects; usually, each application will use one global driver.
//!
//! ### Sessions
//! Sessions are spawned from the driver, see [`driver::Driver::session()`].
//! Session creation is cheap; it's recommended to create a new session for
//! each piece of work. Sessions borrow connections from the driver's pool as
//! needed and thread bookmarks from one transaction to the next.
//!
//! ### Main Mechanisms for Query Execution
//!  - [`Session::auto_commit()`] runs a single query in a server-managed
//!    transaction.
//!  - [`Session::transaction()`] gives you full control over the
//!    transaction.
//!  - [`Session::execute_read()`] and [`Session::execute_write()`] run a
//!    transaction function with automatic retries.
//!
//! ## Logging
//! The crate logs through the [`log`] facade.
//! The `debug` level contains a full record of all Bolt messages exchanged
//! with servers (with credentials masked); `trace` additionally contains the
//! raw chunks.

mod address_;
pub mod aio;
pub mod driver;
mod error_;
mod macros;
mod sync;
pub mod value;

// imports for docs
#[allow(unused)]
use driver::Driver;
#[allow(unused)]
use session::Session;

pub use error_::{DriverError, Result, ServerError};
pub use value::ValueReceive;
pub use value::ValueSend;

pub mod address {
    pub use super::address_::resolution::*;
    pub use super::address_::*;
}
pub mod bookmarks {
    pub use super::driver::session::bookmarks::*;
}
pub mod session {
    pub use super::driver::session::*;
}
pub mod retry {
    pub use super::driver::session::retry::*;
}
pub mod transaction {
    pub use super::driver::transaction::*;
}
/// Query summary structs (metadata) received via
/// [`driver::record_stream::RecordStream::consume()`].
pub mod summary {
    pub use super::driver::summary::*;
}
