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

//! Cooperative-async twin of the blocking API, driven by [`tokio`].
//!
//! The protocol state machine and the wire codec are shared with the
//! blocking implementation; only the transport differs. The concurrency
//! contracts are identical as well:
//!  * one in-flight request per physical connection,
//!  * a session borrows exactly one connection at a time,
//!  * iteration over results suspends on network reads and may be cancelled
//!    at any suspension point. A cancelled operation closes the underlying
//!    connection instead of trying to resume protocol state.
//!
//! # Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use bolt_transport::aio::AsyncDriver;
//! use bolt_transport::driver::auth::AuthToken;
//! use bolt_transport::driver::{ConnectionConfig, DriverConfig};
//!
//! # async fn example() -> bolt_transport::Result<()> {
//! let connection_config: ConnectionConfig = "bolt://localhost:7687".parse().unwrap();
//! let driver = AsyncDriver::new(
//!     connection_config,
//!     DriverConfig::new().with_auth(Arc::new(AuthToken::new_basic_auth("user", "pass"))),
//! );
//! let mut session = driver.session(Default::default());
//! let result = session.run("RETURN 1 AS n").await?;
//! assert_eq!(result.records.len(), 1);
//! # Ok(())
//! # }
//! ```

mod chunk;
mod connection;
mod pool;
mod session;

pub use session::{AsyncDriver, AsyncRecordStream, AsyncSession, AsyncTransaction};
