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

use std::net::TcpStream;
use std::time::{Duration, Instant};

use log::warn;

use crate::error_::{DriverError, Result};

/// Turns an absolute deadline into socket read/write timeouts for the
/// duration of an I/O sequence; the socket's previous timeout is restored on
/// drop.
///
/// Timeouts already tighter than the deadline (e.g., set from a server's
/// `connection.recv_timeout_seconds` hint) are left in place.
#[derive(Debug)]
pub(crate) struct DeadlineGuard<'tcp> {
    restore: Option<(&'tcp TcpStream, Option<Duration>)>,
}

impl<'tcp> DeadlineGuard<'tcp> {
    pub(crate) fn apply(
        socket: Option<&'tcp TcpStream>,
        deadline: Option<Instant>,
    ) -> Result<Self> {
        let (Some(socket), Some(deadline)) = (socket, deadline) else {
            return Ok(Self { restore: None });
        };
        let current_timeout = socket.read_timeout().map_err(|e| {
            DriverError::invalid_argument(format!("failed to read configured timeout: {e}"))
        })?;
        let remaining = deadline
            .checked_duration_since(Instant::now())
            // an expired deadline still must not block forever; the smallest
            // non-zero timeout makes the next blocking call time out
            .unwrap_or(Duration::from_nanos(1));
        if matches!(current_timeout, Some(timeout) if timeout <= remaining) {
            return Ok(Self { restore: None });
        }
        set_timeouts(socket, Some(remaining)).map_err(|e| {
            DriverError::invalid_argument(format!("failed to configure timeout: {e}"))
        })?;
        Ok(Self {
            restore: Some((socket, current_timeout)),
        })
    }
}

impl Drop for DeadlineGuard<'_> {
    fn drop(&mut self) {
        if let Some((socket, timeout)) = self.restore.take() {
            if let Err(err) = set_timeouts(socket, timeout) {
                warn!("failed to restore socket timeout: {err}");
            }
        }
    }
}

fn set_timeouts(socket: &TcpStream, timeout: Option<Duration>) -> std::io::Result<()> {
    socket.set_read_timeout(timeout)?;
    socket.set_write_timeout(timeout)
}
