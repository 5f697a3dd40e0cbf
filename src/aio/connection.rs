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

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use log::debug;
use rustls::ClientConfig;
use rustls_pki_types::ServerName;
use socket2::{SockRef, TcpKeepalive};
use tokio::io::{
    AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadBuf, ReadHalf, WriteHalf,
};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use super::chunk::read_message;
use crate::address_::Address;
use crate::driver::io::bolt::message_parameters::{
    BeginParameters, CommitParameters, DiscardParameters, GoodbyeParameters, HelloParameters,
    PullParameters, ReauthParameters, ResetParameters, RollbackParameters, RouteParameters,
    RunParameters, TelemetryParameters,
};
use crate::driver::io::bolt::chunk::chunk_message;
use crate::driver::io::bolt::{
    decode_version_offer, new_protocol, BoltData, BoltProtocol, BoltProtocolVersion,
    ResponseCallbacks, BOLT_MAGIC_PREAMBLE, BOLT_VERSION_OFFER,
};
use crate::error_::{DriverError, Result};

/// A plaintext or TLS-wrapped TCP stream.
#[derive(Debug)]
pub(super) enum MaybeTlsStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl AsyncRead for MaybeTlsStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_read(cx, buf),
            Self::Tls(s) => Pin::new(s).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for MaybeTlsStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_write(cx, buf),
            Self::Tls(s) => Pin::new(s).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_flush(cx),
            Self::Tls(s) => Pin::new(s).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Plain(s) => Pin::new(s).poll_shutdown(cx),
            Self::Tls(s) => Pin::new(s).poll_shutdown(cx),
        }
    }
}

#[derive(Debug, Clone)]
pub(super) struct AsyncConnectParameters {
    pub(super) connect_timeout: Option<Duration>,
    pub(super) handshake_timeout: Option<Duration>,
    pub(super) keep_alive: bool,
    pub(super) no_delay: bool,
    pub(super) tls_config: Option<Arc<ClientConfig>>,
}

async fn with_timeout<T>(
    timeout: Option<Duration>,
    during: &str,
    future: impl Future<Output = Result<T>>,
) -> Result<T> {
    match timeout {
        None => future.await,
        Some(timeout) => match tokio::time::timeout(timeout, future).await {
            Ok(res) => res,
            Err(_) => Err(DriverError::disconnect(format!("{during} timed out"))),
        },
    }
}

/// The async twin of the blocking `Bolt` connection: the same I/O-free
/// protocol state ([`BoltData`] + protocol implementations), pumped through
/// tokio streams.
#[derive(Debug)]
pub(super) struct AsyncBolt {
    pub(super) data: BoltData,
    protocol: BoltProtocolVersion,
    reader: ReadHalf<MaybeTlsStream>,
    writer: WriteHalf<MaybeTlsStream>,
    /// Set while an I/O future is pending. Still being set when no future
    /// runs means the future was cancelled mid-I/O; the connection is then
    /// out of sync with the server and must not be reused.
    in_flight: bool,
}

pub(super) async fn open(
    address: Arc<Address>,
    parameters: AsyncConnectParameters,
) -> Result<AsyncBolt> {
    let AsyncConnectParameters {
        connect_timeout,
        handshake_timeout,
        keep_alive,
        no_delay,
        tls_config,
    } = parameters;
    debug!("C: <OPEN> {address}");
    let stream = with_timeout(connect_timeout, "connecting", async {
        DriverError::wrap_connect(TcpStream::connect(format!("{address}")).await)
    })
    .await?;
    configure_socket(&stream, keep_alive, no_delay).map_err(|err| {
        DriverError::invalid_argument(format!("failed to configure socket: {err}"))
    })?;

    let (stream, version) = with_timeout(handshake_timeout, "bolt handshake", async {
        let stream = match tls_config {
            None => MaybeTlsStream::Plain(stream),
            Some(tls_config) => {
                let host_name = ServerName::try_from(address.unresolved_host())
                    .map_err(|e| {
                        DriverError::invalid_argument(format!(
                            "tls refused hostname {}: {e}",
                            address.unresolved_host()
                        ))
                    })?
                    .to_owned();
                let connector = TlsConnector::from(tls_config);
                let stream =
                    DriverError::wrap_connect(connector.connect(host_name, stream).await)?;
                MaybeTlsStream::Tls(Box::new(stream))
            }
        };
        handshake(stream).await
    })
    .await?;

    let protocol = new_protocol(version)
        .unwrap_or_else(|| panic!("handshake produced unimplemented version {version:?}"));
    let data = BoltData::new(version, Arc::new(None), None, address);
    let (reader, writer) = tokio::io::split(stream);
    Ok(AsyncBolt {
        data,
        protocol,
        reader,
        writer,
        in_flight: false,
    })
}

async fn handshake(mut stream: MaybeTlsStream) -> Result<(MaybeTlsStream, (u8, u8))> {
    debug!("C: <HANDSHAKE> {:02X?}", BOLT_MAGIC_PREAMBLE);
    DriverError::wrap_write(stream.write_all(&BOLT_MAGIC_PREAMBLE).await)?;
    debug!("C: <BOLT> {:02X?}", BOLT_VERSION_OFFER);
    DriverError::wrap_write(stream.write_all(&BOLT_VERSION_OFFER).await)?;
    DriverError::wrap_write(stream.flush().await)?;

    let mut negotiated_version = [0u8; 4];
    DriverError::wrap_read(stream.read_exact(&mut negotiated_version).await.map(drop))?;
    debug!("S: <BOLT> {:02X?}", negotiated_version);
    let version = decode_version_offer(&negotiated_version)?;
    Ok((stream, version))
}

fn configure_socket(stream: &TcpStream, keep_alive: bool, no_delay: bool) -> io::Result<()> {
    stream.set_nodelay(no_delay)?;
    if keep_alive {
        let sock_ref = SockRef::from(stream);
        sock_ref.set_tcp_keepalive(&TcpKeepalive::new())?;
    }
    Ok(())
}

impl AsyncBolt {
    pub(super) fn hello(&mut self, parameters: HelloParameters) -> Result<()> {
        self.protocol.hello(&mut self.data, parameters)
    }

    pub(super) fn reauth(&mut self, parameters: ReauthParameters) -> Result<()> {
        self.protocol.reauth(&mut self.data, parameters)
    }

    pub(super) fn supports_reauth(&self) -> bool {
        self.protocol.supports_reauth()
    }

    pub(super) fn goodbye(&mut self) -> Result<()> {
        self.protocol
            .goodbye(&mut self.data, GoodbyeParameters::new())
    }

    pub(super) fn reset(&mut self) -> Result<()> {
        self.protocol.reset(&mut self.data, ResetParameters::new())
    }

    pub(super) fn run(
        &mut self,
        parameters: RunParameters,
        callbacks: ResponseCallbacks,
    ) -> Result<()> {
        self.protocol.run(&mut self.data, parameters, callbacks)
    }

    pub(super) fn discard(
        &mut self,
        parameters: DiscardParameters,
        callbacks: ResponseCallbacks,
    ) -> Result<()> {
        self.protocol.discard(&mut self.data, parameters, callbacks)
    }

    pub(super) fn pull(
        &mut self,
        parameters: PullParameters,
        callbacks: ResponseCallbacks,
    ) -> Result<()> {
        self.protocol.pull(&mut self.data, parameters, callbacks)
    }

    pub(super) fn begin(
        &mut self,
        parameters: BeginParameters,
        callbacks: ResponseCallbacks,
    ) -> Result<()> {
        self.protocol.begin(&mut self.data, parameters, callbacks)
    }

    pub(super) fn commit(&mut self, callbacks: ResponseCallbacks) -> Result<()> {
        self.protocol
            .commit(&mut self.data, CommitParameters::new(), callbacks)
    }

    pub(super) fn rollback(&mut self) -> Result<()> {
        self.protocol
            .rollback(&mut self.data, RollbackParameters::new())
    }

    pub(super) fn route(
        &mut self,
        parameters: RouteParameters,
        callbacks: ResponseCallbacks,
    ) -> Result<()> {
        self.protocol.route(&mut self.data, parameters, callbacks)
    }

    pub(super) fn telemetry(
        &mut self,
        parameters: TelemetryParameters,
        callbacks: ResponseCallbacks,
    ) -> Result<()> {
        self.protocol
            .telemetry(&mut self.data, parameters, callbacks)
    }

    pub(super) async fn write_all(&mut self) -> Result<()> {
        self.check_cancelled()?;
        self.in_flight = true;
        while let Some(message) = self.data.pop_message_buff() {
            let res = self.writer.write_all(&chunk_message(&message)).await;
            if let Err(err) = res {
                self.data.mark_broken();
                return Err(DriverError::write_err(err));
            }
        }
        if let Err(err) = self.writer.flush().await {
            self.data.mark_broken();
            return Err(DriverError::write_err(err));
        }
        self.data.touch();
        self.in_flight = false;
        Ok(())
    }

    pub(super) async fn read_one(&mut self) -> Result<()> {
        self.check_cancelled()?;
        self.in_flight = true;
        let bytes = match read_message(&mut self.reader).await {
            Ok(bytes) => bytes,
            Err(err) => {
                self.data.mark_broken();
                return Err(err);
            }
        };
        let message = match self.protocol.parse_message(&bytes) {
            Ok(message) => message,
            Err(err) => {
                self.data.mark_broken();
                return Err(err);
            }
        };
        self.data.touch();
        self.in_flight = false;
        self.protocol.handle_response(&mut self.data, message, None)
    }

    pub(super) async fn read_all(&mut self) -> Result<()> {
        while self.data.expects_reply() {
            self.read_one().await?;
        }
        Ok(())
    }

    /// Best-effort GOODBYE, then drop the streams.
    pub(super) async fn close(mut self) {
        if self.data.closed() {
            return;
        }
        if self.goodbye().is_err() {
            return;
        }
        let _ = with_timeout(
            Some(Duration::from_millis(100)),
            "goodbye",
            self.write_all(),
        )
        .await;
    }

    /// Whether an I/O operation was started but never completed, i.e., the
    /// driving future was cancelled at a suspension point.
    pub(super) fn cancelled_mid_io(&self) -> bool {
        self.in_flight
    }

    /// A connection whose previous I/O future was cancelled is out of sync
    /// with the server; any further use gets a cancellation error and the
    /// connection is marked broken.
    fn check_cancelled(&mut self) -> Result<()> {
        if self.in_flight {
            self.data.mark_broken();
            return Err(DriverError::cancelled(
                "connection was cancelled in the middle of an I/O operation",
            ));
        }
        Ok(())
    }

    pub(super) fn closed(&self) -> bool {
        self.data.closed()
    }
}
