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

use std::io::{BufReader, Read, Result as IoResult, Write};
use std::net::TcpStream;
use std::sync::Arc;

use rustls::{ClientConfig, ClientConnection, StreamOwned};
use rustls_pki_types::ServerName;

use crate::error_::{DriverError, Result};

/// Split handles onto one TCP stream: reads are buffered (chunk headers are
/// tiny), writes go out directly since whole messages are written in one
/// piece.
#[derive(Debug)]
pub(crate) struct TcpIo {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl TcpIo {
    pub(super) fn new(socket: &TcpStream) -> Result<Self> {
        let reader = BufReader::new(DriverError::wrap_connect(socket.try_clone())?);
        let writer = DriverError::wrap_connect(socket.try_clone())?;
        Ok(Self { reader, writer })
    }
}

impl Read for TcpIo {
    #[inline]
    fn read(&mut self, buf: &mut [u8]) -> IoResult<usize> {
        self.reader.read(buf)
    }
}

impl Write for TcpIo {
    #[inline]
    fn write(&mut self, buf: &[u8]) -> IoResult<usize> {
        self.writer.write(buf)
    }

    #[inline]
    fn flush(&mut self) -> IoResult<()> {
        self.writer.flush()
    }
}

trait Stream: Read + Write {}

impl<T: Read + Write> Stream for T {}

/// Either a cleartext stream or one wrapped in TLS.
#[derive(Debug)]
pub(crate) enum Socket<T: Read + Write> {
    Cleartext(T),
    Encrypted(Box<StreamOwned<ClientConnection, T>>),
}

impl<T: Read + Write> Socket<T> {
    pub(super) fn new(
        stream: T,
        host_name: &str,
        tls_config: Option<Arc<ClientConfig>>,
    ) -> Result<Self> {
        let Some(tls_config) = tls_config else {
            return Ok(Self::Cleartext(stream));
        };
        let host_name = ServerName::try_from(host_name)
            .map_err(|e| {
                DriverError::invalid_argument(format!("tls refused hostname {host_name}: {e}"))
            })?
            .to_owned();
        let tls = ClientConnection::new(tls_config, host_name).map_err(|e| {
            DriverError::invalid_argument(format!("failed to initialize tls stream: {e}"))
        })?;
        Ok(Self::Encrypted(Box::new(StreamOwned::new(tls, stream))))
    }

    #[inline]
    fn stream(&mut self) -> &mut dyn Stream {
        match self {
            Self::Cleartext(stream) => stream,
            Self::Encrypted(stream) => stream.as_mut(),
        }
    }
}

impl<T: Read + Write> Read for Socket<T> {
    #[inline]
    fn read(&mut self, buf: &mut [u8]) -> IoResult<usize> {
        self.stream().read(buf)
    }
}

impl<T: Read + Write> Write for Socket<T> {
    #[inline]
    fn write(&mut self, buf: &[u8]) -> IoResult<usize> {
        self.stream().write(buf)
    }

    #[inline]
    fn flush(&mut self) -> IoResult<()> {
        self.stream().flush()
    }
}
