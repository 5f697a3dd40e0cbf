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
use std::mem;
use std::net::TcpStream;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use atomic_refcell::AtomicRefCell;
use log::warn;

use super::super::bolt_common::{
    render_auth, render_map, render_opt_map, unsupported_protocol_feature_error,
    ServerAwareBoltVersion, BOLT_AGENT_LANGUAGE, BOLT_AGENT_PRODUCT,
};
use super::super::message::BoltMessage;
use super::super::message_parameters::{
    BeginParameters, CommitParameters, DiscardParameters, GoodbyeParameters, HelloParameters,
    PullParameters, ReauthParameters, ResetParameters, RollbackParameters, RouteParameters,
    RunParameters, TelemetryParameters, TxContext,
};
use super::super::packstream::{PackstreamBuffer, SerializeError, TinyMapWriter};
use super::super::{
    conn_debug, BoltData, BoltMeta, BoltProtocol, BoltResponse, OnServerErrorCb,
    ResponseCallbacks, ResponseMessage, ValueCodec,
};
use crate::driver::session::bookmarks::Bookmarks;
use crate::error_::{DriverError, Result, ServerError};
use crate::value::ValueReceive;

// request message tags
const MSG_HELLO: u8 = 0x01;
const MSG_GOODBYE: u8 = 0x02;
const MSG_RESET: u8 = 0x0F;
const MSG_RUN: u8 = 0x10;
const MSG_BEGIN: u8 = 0x11;
const MSG_COMMIT: u8 = 0x12;
const MSG_ROLLBACK: u8 = 0x13;
const MSG_DISCARD: u8 = 0x2F;
const MSG_PULL: u8 = 0x3F;
const MSG_ROUTE: u8 = 0x66;

// response message tags
const MSG_SUCCESS: u8 = 0x70;
const MSG_RECORD: u8 = 0x71;
const MSG_IGNORED: u8 = 0x7E;
const MSG_FAILURE: u8 = 0x7F;

const SERVER_AGENT_KEY: &str = "server";
const HINTS_KEY: &str = "hints";
const RECV_TIMEOUT_KEY: &str = "connection.recv_timeout_seconds";
const TELEMETRY_ENABLED_KEY: &str = "telemetry.enabled";

/// The 5.0 protocol; the base every other supported version delegates to.
#[derive(Debug)]
pub(crate) struct Bolt5x0<C: ValueCodec> {
    pub(in super::super) codec: C,
    pub(in super::super) protocol_version: ServerAwareBoltVersion,
}

impl<C: ValueCodec> Default for Bolt5x0<C> {
    fn default() -> Self {
        Self::new(ServerAwareBoltVersion::V5x0)
    }
}

impl<C: ValueCodec> Bolt5x0<C> {
    pub(in super::super) fn new(protocol_version: ServerAwareBoltVersion) -> Self {
        Self {
            codec: C::default(),
            protocol_version,
        }
    }

    pub(in super::super) fn with_codec(
        codec: C,
        protocol_version: ServerAwareBoltVersion,
    ) -> Self {
        Self {
            codec,
            protocol_version,
        }
    }

    pub(in super::super) fn enqueue(
        data: &mut BoltData,
        buf: PackstreamBuffer,
        response: BoltResponse,
    ) {
        data.message_buff.push_back(buf.into_bytes());
        data.responses.push_back(response);
    }

    fn enqueue_without_response(data: &mut BoltData, buf: PackstreamBuffer) {
        data.message_buff.push_back(buf.into_bytes());
    }

    /// `HELLO`, minus the auth entries, which moved into `LOGON` in 5.1.
    pub(in super::super) fn write_hello(
        &self,
        buf: &mut PackstreamBuffer,
        user_agent: &str,
        routing_context: Option<&HashMap<String, crate::value::ValueSend>>,
        with_auth: Option<&crate::driver::config::auth::AuthToken>,
        extra_entries: impl FnOnce(&mut TinyMapWriter) -> std::result::Result<(), SerializeError>,
    ) -> Result<()> {
        buf.put_struct_header(MSG_HELLO, 1)?;
        let mut extra = buf.tiny_map();
        extra.entry_string("user_agent", user_agent)?;
        extra.entry_raw("bolt_agent", |buf| {
            buf.put_map_header(2)?;
            buf.put_string("product")?;
            buf.put_string(BOLT_AGENT_PRODUCT)?;
            buf.put_string("language")?;
            buf.put_string(BOLT_AGENT_LANGUAGE)
        })?;
        extra_entries(&mut extra)?;
        if let Some(routing_context) = routing_context {
            extra.entry_map("routing", &self.codec, routing_context)?;
        }
        if let Some(auth) = with_auth {
            for (key, value) in &auth.data {
                extra.entry_value(key, &self.codec, value)?;
            }
        }
        extra.end();
        Ok(())
    }

    /// Installs the handlers for the server metadata coming back on the
    /// HELLO SUCCESS: agent string, connection hints, and the rest of the
    /// meta for the connection to keep.
    pub(in super::super) fn enqueue_hello_response(data: &mut BoltData) {
        let connection_meta = Arc::clone(&data.meta);
        let server_agent = Arc::clone(&data.server_agent);
        let telemetry_enabled = Arc::clone(&data.telemetry_enabled);
        let socket = Arc::clone(&data.socket);

        data.responses.push_back(BoltResponse::new(
            ResponseMessage::Hello,
            ResponseCallbacks::new().with_on_success(move |mut meta| {
                extract_server_agent(&mut meta, &server_agent);
                apply_connection_hints(&meta, socket.deref().as_ref(), &telemetry_enabled);
                mem::swap(&mut *connection_meta.borrow_mut(), &mut meta);
                Ok(())
            }),
        ));
    }

    /// PULL and DISCARD are twins: same extras, different tag.
    fn flow_control(
        &self,
        data: &mut BoltData,
        tag: u8,
        response: ResponseMessage,
        n: i64,
        qid: i64,
        callbacks: ResponseCallbacks,
    ) -> Result<()> {
        let mut buf = PackstreamBuffer::new();
        buf.put_struct_header(tag, 1)?;
        let mut extra = buf.tiny_map();
        extra.entry_int("n", n)?;
        let omit_qid = data.can_omit_qid(qid);
        if !omit_qid {
            extra.entry_int("qid", qid)?;
        }
        extra.end();
        conn_debug!(
            data,
            "C: {response:?} n={n}{}",
            if omit_qid {
                String::new()
            } else {
                format!(" qid={qid}")
            }
        );
        Self::enqueue(data, buf, BoltResponse::new(response, callbacks));
        Ok(())
    }

    /// The qid announced on a RUN SUCCESS is remembered so later PULLs and
    /// DISCARDs can omit it when they target the latest query.
    pub(in super::super) fn track_qid(
        data: &BoltData,
        callbacks: ResponseCallbacks,
    ) -> ResponseCallbacks {
        let last_qid = Arc::clone(&data.last_qid);
        callbacks.with_on_success_pre_hook(move |meta| match meta.get("qid") {
            Some(ValueReceive::Integer(qid)) => {
                *last_qid.borrow_mut() = Some(*qid);
                Ok(())
            }
            None => {
                *last_qid.borrow_mut() = None;
                Ok(())
            }
            Some(v) => Err(DriverError::protocol_error(format!(
                "server sent non-int qid: {v:?}"
            ))),
        })
    }

    /// RUN differs between versions only in whether the access mode
    /// accompanies auto-commit queries (4.x) or not (5.x).
    pub(in super::super) fn run_message(
        &self,
        data: &mut BoltData,
        parameters: RunParameters,
        callbacks: ResponseCallbacks,
        mode_on_run: bool,
    ) -> Result<()> {
        let RunParameters {
            query,
            parameters,
            tx,
        } = parameters;
        let TxContext {
            bookmarks,
            tx_timeout,
            tx_metadata,
            mode,
            db,
            imp_user,
        } = tx;
        let mut buf = PackstreamBuffer::new();
        buf.put_struct_header(MSG_RUN, 3)?;
        buf.put_string(query)?;
        match parameters {
            Some(parameters) => buf.put_map(&self.codec, parameters)?,
            None => buf.put_map_header(0)?,
        }
        let mut extra = buf.tiny_map();
        write_tx_extras(&mut extra, &self.codec, bookmarks, tx_timeout, tx_metadata)?;
        if mode_on_run {
            write_mode(&mut extra, mode)?;
        }
        write_target(&mut extra, db, imp_user)?;
        extra.end();

        conn_debug!(
            data,
            "C: RUN {query:?} {} \
             (bookmarks: {}, tx_timeout: {tx_timeout:?}, tx_metadata: {}, mode: {:?}, \
             db: {db:?}, imp_user: {imp_user:?})",
            render_opt_map(parameters),
            bookmarks.map(Bookmarks::len).unwrap_or_default(),
            render_opt_map(tx_metadata),
            if mode_on_run { mode } else { None },
        );
        let callbacks = Self::track_qid(data, callbacks);
        Self::enqueue(data, buf, BoltResponse::new(ResponseMessage::Run, callbacks));
        Ok(())
    }

    /// ROUTE's third field; 5.1+ adds the impersonated user to it.
    pub(in super::super) fn route_message(
        &self,
        data: &mut BoltData,
        parameters: RouteParameters,
        callbacks: ResponseCallbacks,
        imp_user_in_extra: bool,
    ) -> Result<()> {
        let RouteParameters {
            routing_context,
            bookmarks,
            db,
            imp_user,
        } = parameters;
        let mut buf = PackstreamBuffer::new();
        buf.put_struct_header(MSG_ROUTE, 3)?;
        buf.put_map(&self.codec, routing_context)?;
        match bookmarks {
            Some(bookmarks) => buf.put_string_list(bookmarks.raw())?,
            None => buf.put_list_header(0)?,
        }
        let mut extra = buf.tiny_map();
        if let Some(db) = db {
            extra.entry_string("db", db)?;
        }
        if imp_user_in_extra {
            if let Some(imp_user) = imp_user {
                extra.entry_string("imp_user", imp_user)?;
            }
        }
        extra.end();

        conn_debug!(
            data,
            "C: ROUTE {} (bookmarks: {}, db: {db:?}, imp_user: {:?})",
            render_map(routing_context),
            bookmarks.map(Bookmarks::len).unwrap_or_default(),
            imp_user.filter(|_| imp_user_in_extra),
        );
        Self::enqueue(
            data,
            buf,
            BoltResponse::new(ResponseMessage::Route, callbacks),
        );
        Ok(())
    }

    fn parse_failure(meta: ValueReceive) -> Result<ServerError> {
        match meta {
            ValueReceive::Map(meta) => Ok(ServerError::from_meta(meta)),
            _ => Err(DriverError::protocol_error(
                "FAILURE meta was not a dictionary",
            )),
        }
    }
}

/// `bookmarks`, `tx_timeout`, and `tx_metadata` — shared between RUN and
/// BEGIN; entries with nothing to say are skipped entirely.
pub(in super::super) fn write_tx_extras(
    extra: &mut TinyMapWriter,
    codec: &impl ValueCodec,
    bookmarks: Option<&Bookmarks>,
    tx_timeout: Option<i64>,
    tx_metadata: Option<&HashMap<String, crate::value::ValueSend>>,
) -> std::result::Result<(), SerializeError> {
    if let Some(bookmarks) = bookmarks {
        if !bookmarks.is_empty() {
            extra.entry_string_list("bookmarks", bookmarks.raw())?;
        }
    }
    if let Some(tx_timeout) = tx_timeout {
        extra.entry_int("tx_timeout", tx_timeout)?;
    }
    if let Some(tx_metadata) = tx_metadata {
        if !tx_metadata.is_empty() {
            extra.entry_map("tx_metadata", codec, tx_metadata)?;
        }
    }
    Ok(())
}

/// Write mode is the server's default and is never spelled out.
pub(in super::super) fn write_mode(
    extra: &mut TinyMapWriter,
    mode: Option<&str>,
) -> std::result::Result<(), SerializeError> {
    match mode {
        Some(mode) if mode != "w" => extra.entry_string("mode", mode),
        _ => Ok(()),
    }
}

pub(in super::super) fn write_target(
    extra: &mut TinyMapWriter,
    db: Option<&str>,
    imp_user: Option<&str>,
) -> std::result::Result<(), SerializeError> {
    if let Some(db) = db {
        extra.entry_string("db", db)?;
    }
    if let Some(imp_user) = imp_user {
        extra.entry_string("imp_user", imp_user)?;
    }
    Ok(())
}

pub(in super::super) fn extract_server_agent(meta: &mut BoltMeta, server_agent: &AtomicRefCell<Arc<String>>) {
    match meta.remove_entry(SERVER_AGENT_KEY) {
        Some((_, ValueReceive::String(agent))) => {
            *server_agent.borrow_mut() = Arc::new(agent);
        }
        Some((key, value)) => {
            warn!("server sent unexpected server agent type {value:?}");
            meta.insert(key, value);
        }
        None => {}
    }
}

pub(in super::super) fn apply_connection_hints(
    meta: &BoltMeta,
    socket: Option<&TcpStream>,
    telemetry_enabled: &AtomicRefCell<bool>,
) {
    let hints = match meta.get(HINTS_KEY) {
        Some(ValueReceive::Map(hints)) => hints,
        Some(value) => {
            warn!("server sent unexpected {HINTS_KEY} type {value:?}");
            return;
        }
        None => return,
    };
    match hints.get(RECV_TIMEOUT_KEY) {
        Some(ValueReceive::Integer(timeout)) if *timeout > 0 => {
            if let Some(socket) = socket {
                let timeout = Duration::from_secs(*timeout as u64);
                if let Err(err) = socket.set_read_timeout(Some(timeout)) {
                    warn!("failed to set socket timeout as hinted by the server: {err}");
                }
            }
        }
        Some(hint) => warn!("server sent unexpected {RECV_TIMEOUT_KEY} hint {hint:?}"),
        None => {}
    }
    match hints.get(TELEMETRY_ENABLED_KEY) {
        Some(ValueReceive::Boolean(enabled)) => *telemetry_enabled.borrow_mut() = *enabled,
        Some(hint) => warn!("server sent unexpected {TELEMETRY_ENABLED_KEY} hint {hint:?}"),
        None => {}
    }
}

fn single_field(name: &str, mut fields: Vec<ValueReceive>) -> Result<ValueReceive> {
    if fields.len() != 1 {
        return Err(DriverError::protocol_error(format!(
            "{name} should carry exactly one field, found {}",
            fields.len()
        )));
    }
    Ok(fields.pop().expect("checked length above"))
}

impl<C: ValueCodec> BoltProtocol for Bolt5x0<C> {
    fn hello(&self, data: &mut BoltData, parameters: HelloParameters) -> Result<()> {
        let HelloParameters {
            user_agent,
            auth,
            routing_context,
        } = parameters;
        let mut buf = PackstreamBuffer::new();
        self.write_hello(&mut buf, user_agent, routing_context, Some(auth.as_ref()), |_| {
            Ok(())
        })?;
        data.auth = Some(Arc::clone(auth));
        conn_debug!(
            data,
            "C: HELLO user_agent={user_agent:?} routing={} auth={}",
            render_opt_map(routing_context),
            render_auth(auth),
        );
        Self::enqueue_without_response(data, buf);
        Self::enqueue_hello_response(data);
        Ok(())
    }

    #[inline]
    fn reauth(&self, _: &mut BoltData, _: ReauthParameters) -> Result<()> {
        Err(unsupported_protocol_feature_error(
            "session authentication",
            self.protocol_version,
            ServerAwareBoltVersion::V5x1,
        ))
    }

    #[inline]
    fn supports_reauth(&self) -> bool {
        false
    }

    fn goodbye(&self, data: &mut BoltData, _: GoodbyeParameters) -> Result<()> {
        let mut buf = PackstreamBuffer::new();
        buf.put_struct_header(MSG_GOODBYE, 0)?;
        conn_debug!(data, "C: GOODBYE");
        Self::enqueue_without_response(data, buf);
        data.mark_closed();
        Ok(())
    }

    fn reset(&self, data: &mut BoltData, _: ResetParameters) -> Result<()> {
        let mut buf = PackstreamBuffer::new();
        buf.put_struct_header(MSG_RESET, 0)?;
        conn_debug!(data, "C: RESET");
        Self::enqueue(data, buf, BoltResponse::from_message(ResponseMessage::Reset));
        Ok(())
    }

    fn run(
        &self,
        data: &mut BoltData,
        parameters: RunParameters,
        callbacks: ResponseCallbacks,
    ) -> Result<()> {
        // access mode lives on BEGIN for 5.x
        self.run_message(data, parameters, callbacks, false)
    }

    fn discard(
        &self,
        data: &mut BoltData,
        parameters: DiscardParameters,
        callbacks: ResponseCallbacks,
    ) -> Result<()> {
        let DiscardParameters { n, qid } = parameters;
        self.flow_control(data, MSG_DISCARD, ResponseMessage::Discard, n, qid, callbacks)
    }

    fn pull(
        &self,
        data: &mut BoltData,
        parameters: PullParameters,
        callbacks: ResponseCallbacks,
    ) -> Result<()> {
        let PullParameters { n, qid } = parameters;
        self.flow_control(data, MSG_PULL, ResponseMessage::Pull, n, qid, callbacks)
    }

    fn begin(
        &self,
        data: &mut BoltData,
        parameters: BeginParameters,
        callbacks: ResponseCallbacks,
    ) -> Result<()> {
        let TxContext {
            bookmarks,
            tx_timeout,
            tx_metadata,
            mode,
            db,
            imp_user,
        } = parameters.tx;
        let mut buf = PackstreamBuffer::new();
        buf.put_struct_header(MSG_BEGIN, 1)?;
        let mut extra = buf.tiny_map();
        write_tx_extras(&mut extra, &self.codec, bookmarks, tx_timeout, tx_metadata)?;
        write_mode(&mut extra, mode)?;
        write_target(&mut extra, db, imp_user)?;
        extra.end();

        conn_debug!(
            data,
            "C: BEGIN (bookmarks: {}, tx_timeout: {tx_timeout:?}, tx_metadata: {}, \
             mode: {mode:?}, db: {db:?}, imp_user: {imp_user:?})",
            bookmarks.map(Bookmarks::len).unwrap_or_default(),
            render_opt_map(tx_metadata),
        );
        Self::enqueue(
            data,
            buf,
            BoltResponse::new(ResponseMessage::Begin, callbacks),
        );
        Ok(())
    }

    fn commit(
        &self,
        data: &mut BoltData,
        _: CommitParameters,
        callbacks: ResponseCallbacks,
    ) -> Result<()> {
        let mut buf = PackstreamBuffer::new();
        buf.put_struct_header(MSG_COMMIT, 0)?;
        conn_debug!(data, "C: COMMIT");
        Self::enqueue(
            data,
            buf,
            BoltResponse::new(ResponseMessage::Commit, callbacks),
        );
        Ok(())
    }

    fn rollback(&self, data: &mut BoltData, _: RollbackParameters) -> Result<()> {
        let mut buf = PackstreamBuffer::new();
        buf.put_struct_header(MSG_ROLLBACK, 0)?;
        conn_debug!(data, "C: ROLLBACK");
        Self::enqueue(
            data,
            buf,
            BoltResponse::from_message(ResponseMessage::Rollback),
        );
        Ok(())
    }

    fn route(
        &self,
        data: &mut BoltData,
        parameters: RouteParameters,
        callbacks: ResponseCallbacks,
    ) -> Result<()> {
        // impersonation in ROUTE's extra requires 5.1+
        self.route_message(data, parameters, callbacks, false)
    }

    #[inline]
    fn telemetry(
        &self,
        _data: &mut BoltData,
        _parameters: TelemetryParameters,
        _callbacks: ResponseCallbacks,
    ) -> Result<()> {
        // TELEMETRY is not supported by this protocol version, so we ignore it
        Ok(())
    }

    fn parse_message(&self, bytes: &[u8]) -> Result<BoltMessage> {
        BoltMessage::parse(bytes, &self.codec)
    }

    fn handle_response(
        &self,
        data: &mut BoltData,
        message: BoltMessage,
        on_server_error: OnServerErrorCb,
    ) -> Result<()> {
        let mut response = data
            .responses
            .pop_front()
            .expect("called read_one with empty response queue");
        match message.tag {
            MSG_SUCCESS => {
                let meta = single_field("SUCCESS", message.fields)?;
                conn_debug!(data, "S: SUCCESS {}", meta.dbg_print());
                let streaming_continues = matches!(
                    &meta,
                    ValueReceive::Map(meta)
                        if matches!(meta.get("has_more"), Some(ValueReceive::Boolean(true)))
                );
                if !streaming_continues {
                    data.bolt_state.success(response.message);
                }
                response.callbacks.on_success(meta)
            }
            MSG_RECORD => {
                let record = single_field("RECORD", message.fields)?;
                conn_debug!(data, "S: RECORD [...]");
                let res = response.callbacks.on_record(record);
                // the terminating summary is still outstanding
                data.responses.push_front(response);
                res
            }
            MSG_IGNORED => {
                conn_debug!(data, "S: IGNORED");
                response.callbacks.on_ignored()
            }
            MSG_FAILURE => {
                let meta = single_field("FAILURE", message.fields)?;
                conn_debug!(data, "S: FAILURE {}", meta.dbg_print());
                let mut error = Self::parse_failure(meta)?;
                data.bolt_state.failure();
                match on_server_error {
                    None => response.callbacks.on_failure(error),
                    Some(cb) => {
                        let pool_res = cb(data, &mut error);
                        let cb_res = response.callbacks.on_failure(error);
                        match pool_res {
                            Ok(()) => cb_res,
                            Err(pool_err) => {
                                if let Err(cb_err) = cb_res {
                                    warn!(
                                        "server error swallowed because of pool callback \
                                         error: {cb_err}"
                                    );
                                }
                                Err(pool_err)
                            }
                        }
                    }
                }
            }
            tag => Err(DriverError::protocol_error(format!(
                "unknown response message tag {tag:02X?}"
            ))),
        }
    }
}
