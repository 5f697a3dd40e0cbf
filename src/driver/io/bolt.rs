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

mod bolt4x4;
mod bolt5x0;
mod bolt5x1;
mod bolt5x4;
mod bolt_common;
mod bolt_state;
pub(crate) mod chunk;
mod handshake;
mod message;
pub(crate) mod message_parameters;
mod packstream;
mod response;
mod socket;

use std::collections::{HashMap, VecDeque};
use std::fmt::{Debug, Formatter};
use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::ops::Deref;
use std::result;
use std::sync::Arc;
use std::time::{Duration, Instant};

use atomic_refcell::AtomicRefCell;
use duplicate::duplicate_item;
use enum_dispatch::enum_dispatch;

use super::deadline::DeadlineGuard;
use crate::address_::Address;
use crate::driver::config::auth::AuthToken;
use crate::error_::{DriverError, Result, ServerError};
use crate::value::{ValueReceive, ValueSend};
use bolt4x4::Bolt4x4;
use bolt5x0::{Bolt5x0, ModernCodec};
use bolt5x1::Bolt5x1;
use bolt5x4::Bolt5x4;
pub(crate) use bolt_common::ServerAwareBoltVersion;
use bolt_state::{BoltState, BoltStateTracker};
pub(crate) use handshake::{
    decode_version_offer, open, ConnectParameters, BOLT_MAGIC_PREAMBLE, BOLT_VERSION_OFFER,
};
pub(crate) use message::BoltMessage;
use message_parameters::{
    BeginParameters, CommitParameters, DiscardParameters, GoodbyeParameters, HelloParameters,
    PullParameters, ReauthParameters, ResetParameters, RollbackParameters, RouteParameters,
    RunParameters, TelemetryParameters,
};
use packstream::{PackstreamBuffer, SerializeError};
pub(crate) use response::{
    BoltMeta, BoltRecordFields, BoltResponse, ResponseCallbacks, ResponseMessage,
};
pub(crate) use socket::{Socket, TcpIo};

/// Logs on debug level with the connection's log prefix (local port and
/// server-assigned connection id) in front.
macro_rules! conn_debug {
    ($data:expr, $($args:tt)+) => {
        log::debug!("{}{}", $data.log_prefix(), format!($($args)*))
    };
}
pub(crate) use conn_debug;

pub(crate) type TcpRW = Socket<TcpIo>;
pub(crate) type TcpBolt = Bolt<TcpRW>;

pub(crate) type OnServerErrorCb<'a, 'b> =
    Option<&'a mut (dyn FnMut(&mut BoltData, &mut ServerError) -> Result<()> + 'b)>;

/// Encodes [`ValueSend`]s into PackStream and turns received structures into
/// [`ValueReceive`]s; implemented per protocol version because graph
/// entities and zoned date times changed their wire layout over time.
pub(crate) trait ValueCodec: Debug + Default {
    fn encode(
        &self,
        buf: &mut PackstreamBuffer,
        value: &ValueSend,
    ) -> result::Result<(), SerializeError>;

    fn decode_struct(&self, tag: u8, fields: Vec<ValueReceive>) -> ValueReceive;
}

impl<T: ValueCodec> ValueCodec for Arc<AtomicRefCell<T>> {
    fn encode(
        &self,
        buf: &mut PackstreamBuffer,
        value: &ValueSend,
    ) -> result::Result<(), SerializeError> {
        AtomicRefCell::borrow(self).encode(buf, value)
    }

    fn decode_struct(&self, tag: u8, fields: Vec<ValueReceive>) -> ValueReceive {
        AtomicRefCell::borrow(self).decode_struct(tag, fields)
    }
}

/// Bolt < 5.0 opts into the UTC DateTime encodings via the `patch_bolt`
/// HELLO entry; the server's confirmation flips the codec over.
pub(crate) trait ValueCodecWithUtcPatch: ValueCodec {
    fn enable_utc_patch(&mut self);
}

#[enum_dispatch]
pub(crate) trait BoltProtocol {
    fn hello(&self, data: &mut BoltData, parameters: HelloParameters) -> Result<()>;
    fn reauth(&self, data: &mut BoltData, parameters: ReauthParameters) -> Result<()>;
    fn supports_reauth(&self) -> bool;
    fn goodbye(&self, data: &mut BoltData, parameters: GoodbyeParameters) -> Result<()>;
    fn reset(&self, data: &mut BoltData, parameters: ResetParameters) -> Result<()>;
    fn run(
        &self,
        data: &mut BoltData,
        parameters: RunParameters,
        callbacks: ResponseCallbacks,
    ) -> Result<()>;
    fn discard(
        &self,
        data: &mut BoltData,
        parameters: DiscardParameters,
        callbacks: ResponseCallbacks,
    ) -> Result<()>;
    fn pull(
        &self,
        data: &mut BoltData,
        parameters: PullParameters,
        callbacks: ResponseCallbacks,
    ) -> Result<()>;
    fn begin(
        &self,
        data: &mut BoltData,
        parameters: BeginParameters,
        callbacks: ResponseCallbacks,
    ) -> Result<()>;
    fn commit(
        &self,
        data: &mut BoltData,
        parameters: CommitParameters,
        callbacks: ResponseCallbacks,
    ) -> Result<()>;
    fn rollback(&self, data: &mut BoltData, parameters: RollbackParameters) -> Result<()>;
    fn route(
        &self,
        data: &mut BoltData,
        parameters: RouteParameters,
        callbacks: ResponseCallbacks,
    ) -> Result<()>;
    fn telemetry(
        &self,
        data: &mut BoltData,
        parameters: TelemetryParameters,
        callbacks: ResponseCallbacks,
    ) -> Result<()>;

    fn parse_message(&self, bytes: &[u8]) -> Result<BoltMessage>;
    fn handle_response(
        &self,
        data: &mut BoltData,
        message: BoltMessage,
        on_server_error: OnServerErrorCb,
    ) -> Result<()>;
}

// [bolt-version-bump] search tag when changing bolt version support
#[enum_dispatch(BoltProtocol)]
#[derive(Debug)]
pub(crate) enum BoltProtocolVersion {
    V4x4(Bolt4x4),
    V5x0(Bolt5x0<ModernCodec>),
    V5x1(Bolt5x1<ModernCodec>),
    V5x4(Bolt5x4<ModernCodec>),
}

/// Returns the protocol implementation for a negotiated version, or [`None`]
/// if the version has no local codec.
// [bolt-version-bump] search tag when changing bolt version support
pub(crate) fn new_protocol(version: (u8, u8)) -> Option<BoltProtocolVersion> {
    Some(match version {
        (5, 4) => Bolt5x4::<ModernCodec>::default().into(),
        // 5.2 and 5.3 add no wire changes for the features this crate uses,
        // so they negotiate onto the 5.1 implementation
        (5, 3) => Bolt5x1::<ModernCodec>::new(ServerAwareBoltVersion::V5x3).into(),
        (5, 2) => Bolt5x1::<ModernCodec>::new(ServerAwareBoltVersion::V5x2).into(),
        (5, 1) => Bolt5x1::<ModernCodec>::default().into(),
        (5, 0) => Bolt5x0::<ModernCodec>::default().into(),
        (4, 4) => Bolt4x4::default().into(),
        _ => return None,
    })
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum ConnectionState {
    Healthy,
    Broken,
    Closed,
}

/// The transport-independent half of a physical connection: buffered
/// outgoing messages, expected responses, and the protocol state.
/// The blocking [`Bolt`] and the async twin in [`crate::aio`] both drive
/// exactly this.
pub(crate) struct BoltData {
    pub(in crate::driver::io) message_buff: VecDeque<Vec<u8>>,
    pub(in crate::driver::io) responses: VecDeque<BoltResponse>,
    socket: Arc<Option<TcpStream>>,
    local_port: Option<u16>,
    version: (u8, u8),
    connection_state: ConnectionState,
    bolt_state: BoltStateTracker,
    meta: Arc<AtomicRefCell<HashMap<String, ValueReceive>>>,
    server_agent: Arc<AtomicRefCell<Arc<String>>>,
    telemetry_enabled: Arc<AtomicRefCell<bool>>,
    address: Arc<Address>,
    last_qid: Arc<AtomicRefCell<Option<i64>>>,
    auth: Option<Arc<AuthToken>>,
    created_at: Instant,
    idle_since: Instant,
}

impl BoltData {
    pub(crate) fn new(
        version: (u8, u8),
        socket: Arc<Option<TcpStream>>,
        local_port: Option<u16>,
        address: Arc<Address>,
    ) -> Self {
        let now = Instant::now();
        Self {
            message_buff: VecDeque::new(),
            responses: VecDeque::with_capacity(4),
            socket,
            local_port,
            version,
            connection_state: ConnectionState::Healthy,
            bolt_state: BoltStateTracker::new(version),
            meta: Default::default(),
            server_agent: Default::default(),
            telemetry_enabled: Default::default(),
            address,
            last_qid: Default::default(),
            auth: None,
            created_at: now,
            idle_since: now,
        }
    }

    pub(crate) fn log_prefix(&self) -> String {
        let meta = self.meta.try_borrow();
        let id = meta
            .as_deref()
            .ok()
            .and_then(|meta| match meta.get("connection_id") {
                Some(ValueReceive::String(id)) => Some(id.as_str()),
                _ => None,
            })
            .unwrap_or("");
        format!("[#{:04X} {:<10}] ", self.local_port.unwrap_or(0), id)
    }

    pub(crate) fn address(&self) -> &Arc<Address> {
        &self.address
    }

    pub(crate) fn auth(&self) -> Option<&Arc<AuthToken>> {
        self.auth.as_ref()
    }

    pub(crate) fn protocol_version(&self) -> (u8, u8) {
        self.version
    }

    pub(crate) fn server_agent(&self) -> Arc<String> {
        Arc::clone(&self.server_agent.borrow())
    }

    pub(crate) fn closed(&self) -> bool {
        self.connection_state != ConnectionState::Healthy
    }

    pub(crate) fn unexpectedly_closed(&self) -> bool {
        self.connection_state == ConnectionState::Broken
            && self.bolt_state.state() != BoltState::Failed
    }

    pub(crate) fn mark_broken(&mut self) {
        self.connection_state = ConnectionState::Broken;
    }

    pub(crate) fn mark_closed(&mut self) {
        self.connection_state = ConnectionState::Closed;
    }

    pub(crate) fn touch(&mut self) {
        self.idle_since = Instant::now();
    }

    fn can_omit_qid(&self, qid: i64) -> bool {
        qid == -1 || *self.last_qid.borrow() == Some(qid)
    }

    pub(crate) fn pop_message_buff(&mut self) -> Option<Vec<u8>> {
        self.message_buff.pop_front()
    }

    pub(crate) fn has_buffered_message(&self) -> bool {
        !self.message_buff.is_empty()
    }

    pub(crate) fn expects_reply(&self) -> bool {
        !self.responses.is_empty()
    }

    pub(crate) fn expected_reply_len(&self) -> usize {
        self.responses.len()
    }

    /// Whether the server has to be sent a RESET before this connection can
    /// run new work.
    pub(crate) fn needs_reset(&self) -> bool {
        if self.connection_state != ConnectionState::Healthy {
            return false;
        }
        if matches!(
            self.responses.back(),
            Some(response) if response.message == ResponseMessage::Reset
        ) {
            return false;
        }
        self.bolt_state.state() != BoltState::Ready || !self.responses.is_empty()
    }

    pub(crate) fn needs_reauth(&self, parameters: ReauthParameters) -> bool {
        self.auth
            .as_ref()
            .map(|auth| !auth.eq_data(parameters.auth))
            .unwrap_or(true)
    }

    pub(crate) fn is_older_than(&self, duration: Duration) -> bool {
        self.created_at.elapsed() >= duration
    }

    pub(crate) fn is_idle_for(&self, timeout: Duration) -> bool {
        self.idle_since.elapsed() >= timeout
    }

    pub(crate) fn telemetry_enabled(&self) -> bool {
        *self.telemetry_enabled.borrow()
    }

    fn shutdown_socket(&self) {
        if let Some(socket) = self.socket.as_ref() {
            let _ = socket.shutdown(Shutdown::Both);
        }
    }
}

impl Debug for BoltData {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoltData")
            .field("address", &self.address)
            .field("version", &self.version)
            .field("connection_state", &self.connection_state)
            .field("buffered_messages", &self.message_buff.len())
            .field("expected_replies", &self.responses.len())
            .finish()
    }
}

/// A physical connection over a blocking stream.
#[derive(Debug)]
pub(crate) struct Bolt<RW: Read + Write> {
    pub(crate) data: BoltData,
    stream: RW,
    protocol: BoltProtocolVersion,
}

impl<RW: Read + Write> Bolt<RW> {
    pub(crate) fn new(
        version: (u8, u8),
        stream: RW,
        socket: Arc<Option<TcpStream>>,
        local_port: Option<u16>,
        address: Arc<Address>,
    ) -> Self {
        let protocol = new_protocol(version)
            .unwrap_or_else(|| panic!("handshake produced unimplemented version {version:?}"));
        Self {
            data: BoltData::new(version, socket, local_port, address),
            stream,
            protocol,
        }
    }

    /// Best-effort GOODBYE, then the connection counts as gone.
    pub(crate) fn close(&mut self) {
        if self.data.closed() {
            return;
        }
        self.data.mark_closed();
        self.data.message_buff.clear();
        self.data.responses.clear();
        if self.goodbye().is_ok() {
            let _ = self.write_all(Some(Instant::now() + Duration::from_millis(100)));
        }
    }

    pub(crate) fn address(&self) -> Arc<Address> {
        Arc::clone(&self.data.address)
    }

    pub(crate) fn supports_reauth(&self) -> bool {
        self.protocol.supports_reauth()
    }

    pub(crate) fn needs_reauth(&self, parameters: ReauthParameters) -> bool {
        self.data.needs_reauth(parameters)
    }

    pub(crate) fn commit(&mut self, callbacks: ResponseCallbacks) -> Result<()> {
        self.protocol
            .commit(&mut self.data, CommitParameters::new(), callbacks)
    }

    pub(crate) fn read_all(
        &mut self,
        deadline: Option<Instant>,
        mut on_server_error: OnServerErrorCb,
    ) -> Result<()> {
        let on_server_error_ref = &mut on_server_error;
        while self.expects_reply() {
            self.read_one(deadline, on_server_error_ref.as_deref_mut())?;
        }
        Ok(())
    }

    pub(crate) fn read_one(
        &mut self,
        deadline: Option<Instant>,
        on_server_error: OnServerErrorCb,
    ) -> Result<()> {
        let bytes = {
            let _guard = DeadlineGuard::apply(self.data.socket.deref().as_ref(), deadline)?;
            chunk::read_message(&mut self.stream)
        };
        let message = bytes
            .map_err(DriverError::read_err)
            .and_then(|bytes| self.protocol.parse_message(&bytes));
        let message = match message {
            Ok(message) => message,
            Err(err) => {
                conn_debug!(self.data, "read failed: {err:?}");
                self.data.mark_broken();
                self.data.shutdown_socket();
                return Err(err);
            }
        };
        self.data.touch();
        self.protocol
            .handle_response(&mut self.data, message, on_server_error)
    }

    pub(crate) fn write_all(&mut self, deadline: Option<Instant>) -> Result<()> {
        if !self.data.has_buffered_message() {
            return Ok(());
        }
        let res = {
            let socket = Arc::clone(&self.data.socket);
            let _guard = DeadlineGuard::apply(socket.deref().as_ref(), deadline)?;
            let mut res = Ok(());
            while let Some(buffers) = self.data.pop_message_buff() {
                res = self.stream.write_all(&chunk::chunk_message(&buffers));
                if res.is_err() {
                    break;
                }
            }
            res.and_then(|_| self.stream.flush())
        };
        if let Err(err) = res {
            conn_debug!(self.data, "write failed: {err}");
            self.data.mark_broken();
            self.data.shutdown_socket();
            return Err(DriverError::write_err(err));
        }
        self.data.touch();
        Ok(())
    }

    #[inline(always)]
    pub(crate) fn debug_log(&self, msg: impl FnOnce() -> String) {
        conn_debug!(self.data, "{}", msg());
    }
}

// requests enqueued with per-response callbacks
#[duplicate_item(
    request         parameters_t;
    [ run ]         [ RunParameters ];
    [ discard ]     [ DiscardParameters ];
    [ pull ]        [ PullParameters ];
    [ begin ]       [ BeginParameters ];
    [ route ]       [ RouteParameters ];
    [ telemetry ]   [ TelemetryParameters ];
)]
impl<RW: Read + Write> Bolt<RW> {
    pub(crate) fn request(
        &mut self,
        parameters: parameters_t,
        callbacks: ResponseCallbacks,
    ) -> Result<()> {
        self.protocol.request(&mut self.data, parameters, callbacks)
    }
}

// requests carrying parameters but no caller-side callbacks
#[duplicate_item(
    request       parameters_t;
    [ hello ]     [ HelloParameters ];
    [ reauth ]    [ ReauthParameters ];
)]
impl<RW: Read + Write> Bolt<RW> {
    pub(crate) fn request(&mut self, parameters: parameters_t) -> Result<()> {
        self.protocol.request(&mut self.data, parameters)
    }
}

// argument-free requests
#[duplicate_item(
    request        parameters_t;
    [ goodbye ]    [ GoodbyeParameters ];
    [ reset ]      [ ResetParameters ];
    [ rollback ]   [ RollbackParameters ];
)]
impl<RW: Read + Write> Bolt<RW> {
    pub(crate) fn request(&mut self) -> Result<()> {
        self.protocol.request(&mut self.data, parameters_t::new())
    }
}

// connection-state passthroughs
#[duplicate_item(
    accessor                   ret_t;
    [ closed ]                 [ bool ];
    [ unexpectedly_closed ]    [ bool ];
    [ needs_reset ]            [ bool ];
    [ expects_reply ]          [ bool ];
    [ expected_reply_len ]     [ usize ];
    [ protocol_version ]       [ (u8, u8) ];
    [ server_agent ]           [ Arc<String> ];
)]
impl<RW: Read + Write> Bolt<RW> {
    pub(crate) fn accessor(&self) -> ret_t {
        self.data.accessor()
    }
}

#[duplicate_item(
    check;
    [ is_older_than ];
    [ is_idle_for ];
)]
impl<RW: Read + Write> Bolt<RW> {
    pub(crate) fn check(&self, duration: Duration) -> bool {
        self.data.check(duration)
    }
}

impl<RW: Read + Write> Drop for Bolt<RW> {
    fn drop(&mut self) {
        self.close();
    }
}
