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

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::debug;
use rustls::ClientConfig;
use socket2::{Socket as Socket2, TcpKeepalive};

use super::super::deadline::DeadlineGuard;
use super::socket::{Socket, TcpIo};
use super::{Bolt, TcpBolt};
use crate::address_::Address;
use crate::error_::{DriverError, Result};

pub(crate) const BOLT_MAGIC_PREAMBLE: [u8; 4] = [0x60, 0x60, 0xB0, 0x17];
// [bolt-version-bump] search tag when changing bolt version support
pub(crate) const BOLT_VERSION_OFFER: [u8; 16] = [
    0, 4, 4, 5, // BOLT 5.4 - 5.0
    0, 0, 4, 4, // BOLT 4.4
    0, 0, 0, 0, // -
    0, 0, 0, 0, // -
];

#[derive(Debug)]
pub(crate) struct ConnectParameters {
    pub(crate) deadline: Option<Instant>,
    pub(crate) connect_timeout: Option<Duration>,
    pub(crate) keep_alive: bool,
    pub(crate) no_delay: bool,
    pub(crate) tls_config: Option<Arc<ClientConfig>>,
}

/// Establishes a TCP (and optionally TLS) connection to `address` and
/// negotiates the protocol version.
pub(crate) fn open(address: Arc<Address>, parameters: ConnectParameters) -> Result<TcpBolt> {
    let ConnectParameters {
        deadline,
        connect_timeout,
        keep_alive,
        no_delay,
        tls_config,
    } = parameters;
    debug!("C: <OPEN> {address}");

    let raw_socket =
        DriverError::wrap_connect(connect(&address, effective_timeout(connect_timeout, deadline)))?;
    configure_socket(&raw_socket, keep_alive, no_delay).map_err(|err| {
        DriverError::invalid_argument(format!("failed to configure socket: {err}"))
    })?;
    let local_port = raw_socket
        .local_addr()
        .map(|addr| addr.port())
        .unwrap_or_default();

    let mut stream = Socket::new(
        TcpIo::new(&raw_socket)?,
        address.unresolved_host(),
        tls_config,
    )?;

    let version = {
        let _guard = DeadlineGuard::apply(Some(&raw_socket), deadline)?;
        match negotiate(&mut stream, local_port) {
            Ok(version) => version,
            Err(err) => {
                debug!("[#{local_port:04X}] closing socket: {err}");
                let _ = raw_socket.shutdown(Shutdown::Both);
                return Err(err);
            }
        }
    };

    Ok(Bolt::new(
        version,
        stream,
        Arc::new(Some(raw_socket)),
        Some(local_port),
        address,
    ))
}

fn connect(address: &Address, timeout: Option<Duration>) -> io::Result<TcpStream> {
    let mut last_err = None;
    for sock_addr in address.to_socket_addrs()? {
        let attempt = match timeout {
            None => TcpStream::connect(sock_addr),
            Some(timeout) => TcpStream::connect_timeout(&sock_addr, timeout),
        };
        match attempt {
            Ok(stream) => return Ok(stream),
            Err(err) => last_err = Some(err),
        }
    }
    Err(last_err.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            "address resolved to no socket address",
        )
    }))
}

fn effective_timeout(
    connect_timeout: Option<Duration>,
    deadline: Option<Instant>,
) -> Option<Duration> {
    let until_deadline = deadline.map(|deadline| {
        deadline
            .checked_duration_since(Instant::now())
            .unwrap_or(Duration::from_nanos(1))
    });
    match (connect_timeout, until_deadline) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (timeout, remaining) => timeout.or(remaining),
    }
}

fn configure_socket(socket: &TcpStream, keep_alive: bool, no_delay: bool) -> io::Result<()> {
    socket.set_nodelay(no_delay)?;
    if keep_alive {
        let socket_ref = Socket2::from(socket.try_clone()?);
        socket_ref.set_tcp_keepalive(&TcpKeepalive::new())?;
    }
    Ok(())
}

fn negotiate(stream: &mut (impl Read + Write), local_port: u16) -> Result<(u8, u8)> {
    debug!("[#{local_port:04X}] C: <HANDSHAKE> {BOLT_MAGIC_PREAMBLE:02X?}");
    DriverError::wrap_write(stream.write_all(&BOLT_MAGIC_PREAMBLE))?;
    debug!("[#{local_port:04X}] C: <BOLT> {BOLT_VERSION_OFFER:02X?}");
    DriverError::wrap_write(stream.write_all(&BOLT_VERSION_OFFER))?;
    DriverError::wrap_write(stream.flush())?;

    let mut reply = [0u8; 4];
    DriverError::wrap_read(stream.read_exact(&mut reply))?;
    debug!("[#{local_port:04X}] S: <BOLT> {reply:02X?}");
    decode_version_offer(&reply)
}

// [bolt-version-bump] search tag when changing bolt version support
pub(crate) fn decode_version_offer(offer: &[u8; 4]) -> Result<(u8, u8)> {
    match offer {
        [0, 0, 0, 0] => Err(DriverError::UnsupportedProtocolVersion {
            message: String::from("server rejected every offered protocol version"),
        }),
        [_, _, 4, 5] => Ok((5, 4)),
        [_, _, 3, 5] => Ok((5, 3)),
        [_, _, 2, 5] => Ok((5, 2)),
        [_, _, 1, 5] => Ok((5, 1)),
        [_, _, 0, 5] => Ok((5, 0)),
        [_, _, 4, 4] => Ok((4, 4)),
        [72, 84, 84, 80] => {
            // "HTTP"
            Err(DriverError::HandshakeFailed {
                message: format!(
                    "unexpected server handshake response {:?} (looks like HTTP)",
                    offer
                ),
            })
        }
        [0, 0, minor, major] => Err(DriverError::UnsupportedProtocolVersion {
            message: format!(
                "server chose protocol version {major}.{minor} which has no local codec"
            ),
        }),
        _ => Err(DriverError::HandshakeFailed {
            message: format!("unexpected server handshake response {:?}", offer),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use rstest::*;

    // [bolt-version-bump] search tag when changing bolt version support
    #[rstest]
    #[case([0, 0, 4, 4], (4, 4))]
    #[case([0, 0, 0, 5], (5, 0))]
    #[case([0, 0, 1, 5], (5, 1))]
    #[case([0, 0, 2, 5], (5, 2))]
    #[case([0, 0, 3, 5], (5, 3))]
    #[case([0, 0, 4, 5], (5, 4))]
    fn test_decode_version_offer(
        #[case] mut offer: [u8; 4],
        #[case] expected: (u8, u8),
        #[values([0, 0], [1, 2], [255, 254])] garbage: [u8; 2],
    ) {
        offer[0..2].copy_from_slice(&garbage);
        assert_eq!(decode_version_offer(dbg!(&offer)).unwrap(), expected);
    }

    #[test]
    fn test_rejected_offer() {
        let res = decode_version_offer(&[0, 0, 0, 0]);
        let Err(DriverError::UnsupportedProtocolVersion { message }) = res else {
            panic!("Expected UnsupportedProtocolVersion error, got {:?}", res);
        };
        assert!(message.contains("rejected every offered protocol version"));
    }

    #[test]
    fn test_server_version_looks_like_http() {
        let res = decode_version_offer(&[72, 84, 84, 80]);
        let Err(DriverError::HandshakeFailed { message }) = res else {
            panic!("Expected HandshakeFailed error, got {:?}", res);
        };
        let message = message.to_lowercase();
        assert!(message.contains("unexpected server handshake response"));
        assert!(message.contains("looks like http"));
    }

    // [bolt-version-bump] search tag when changing bolt version support
    #[rstest]
    #[case([0, 0, 0, 1])] // no codec for version 1
    #[case([0, 0, 0, 2])] // no codec for version 2
    #[case([0, 0, 0, 3])] // no codec for version 3
    #[case([0, 0, 0, 4])] // no codec for version 4.0
    #[case([0, 0, 3, 4])] // no codec for version 4.3
    #[case([0, 0, 5, 5])] // no codec for version 5.5
    #[case([0, 0, 0, 6])] // no codec for version 6.0
    fn test_unimplemented_server_version(#[case] offer: [u8; 4]) {
        let res = decode_version_offer(&offer);
        let Err(DriverError::UnsupportedProtocolVersion { message }) = res else {
            panic!("Expected UnsupportedProtocolVersion error, got {:?}", res);
        };
        assert!(message.contains("no local codec"));
    }

    #[test]
    fn test_garbage_server_version() {
        let res = decode_version_offer(&[13, 37, 42, 125]);
        let Err(DriverError::HandshakeFailed { message }) = res else {
            panic!("Expected HandshakeFailed error, got {:?}", res);
        };
        assert!(message.contains("unexpected server handshake response"));
    }
}
