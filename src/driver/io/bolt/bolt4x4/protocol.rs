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

//! Bolt 4.4: the last pre-5.0 version. Asks the server for the UTC DateTime
//! patch on HELLO, carries the access mode on auto-commit RUNs, and leaves
//! it off BEGIN.

use std::mem;
use std::ops::Deref;
use std::sync::Arc;

use atomic_refcell::AtomicRefCell;
use log::warn;

use super::super::bolt5x0::protocol::{apply_connection_hints, extract_server_agent};
use super::super::bolt5x0::Bolt5x0;
use super::super::bolt_common::{
    render_auth, render_opt_map, unsupported_protocol_feature_error, ServerAwareBoltVersion,
};
use super::super::message::BoltMessage;
use super::super::message_parameters::{
    BeginParameters, CommitParameters, DiscardParameters, GoodbyeParameters, HelloParameters,
    PullParameters, ReauthParameters, ResetParameters, RollbackParameters, RouteParameters,
    RunParameters, TelemetryParameters,
};
use super::super::packstream::PackstreamBuffer;
use super::super::{
    conn_debug, BoltData, BoltProtocol, BoltResponse, OnServerErrorCb, ResponseCallbacks,
    ResponseMessage, ValueCodec, ValueCodecWithUtcPatch,
};
use super::translator::LegacyCodec;
use crate::error_::Result;
use crate::value::ValueReceive;

type SharedCodec = Arc<AtomicRefCell<LegacyCodec>>;

const PATCH_BOLT_KEY: &str = "patch_bolt";

#[derive(Debug)]
pub(crate) struct Bolt4x4 {
    // shared with the response callback that flips the UTC patch on
    codec: SharedCodec,
    base: Bolt5x0<SharedCodec>,
}

impl Default for Bolt4x4 {
    fn default() -> Self {
        let codec: SharedCodec = Default::default();
        Self {
            codec: Arc::clone(&codec),
            base: Bolt5x0::with_codec(codec, ServerAwareBoltVersion::V4x4),
        }
    }
}

impl BoltProtocol for Bolt4x4 {
    fn hello(&self, data: &mut BoltData, parameters: HelloParameters) -> Result<()> {
        let HelloParameters {
            user_agent,
            auth,
            routing_context,
        } = parameters;
        let mut buf = PackstreamBuffer::new();
        self.base.write_hello(
            &mut buf,
            user_agent,
            routing_context,
            Some(auth.as_ref()),
            // opt into the UTC DateTime encodings that became default in 5.0
            |extra| extra.entry_raw(PATCH_BOLT_KEY, |buf| buf.put_string_list(["utc"].into_iter())),
        )?;
        data.auth = Some(Arc::clone(auth));
        conn_debug!(
            data,
            "C: HELLO user_agent={user_agent:?} patch_bolt=[\"utc\"] routing={} auth={}",
            render_opt_map(routing_context),
            render_auth(auth),
        );
        data.message_buff.push_back(buf.into_bytes());

        // like the 5.0 HELLO handler, plus watching for the patch grant
        let connection_meta = Arc::clone(&data.meta);
        let server_agent = Arc::clone(&data.server_agent);
        let telemetry_enabled = Arc::clone(&data.telemetry_enabled);
        let socket = Arc::clone(&data.socket);
        let codec = Arc::clone(&self.codec);
        data.responses.push_back(BoltResponse::new(
            ResponseMessage::Hello,
            ResponseCallbacks::new().with_on_success(move |mut meta| {
                extract_server_agent(&mut meta, &server_agent);
                apply_connection_hints(&meta, socket.deref().as_ref(), &telemetry_enabled);
                match meta.get(PATCH_BOLT_KEY) {
                    Some(ValueReceive::List(patches)) => {
                        if patches
                            .iter()
                            .any(|patch| matches!(patch, ValueReceive::String(p) if p == "utc"))
                        {
                            codec.borrow_mut().enable_utc_patch();
                        }
                    }
                    Some(value) => {
                        warn!("server sent unexpected {PATCH_BOLT_KEY} type {value:?}");
                    }
                    None => {}
                }
                mem::swap(&mut *connection_meta.borrow_mut(), &mut meta);
                Ok(())
            }),
        ));
        Ok(())
    }

    #[inline]
    fn reauth(&self, _: &mut BoltData, _: ReauthParameters) -> Result<()> {
        Err(unsupported_protocol_feature_error(
            "session authentication",
            ServerAwareBoltVersion::V4x4,
            ServerAwareBoltVersion::V5x1,
        ))
    }

    #[inline]
    fn supports_reauth(&self) -> bool {
        false
    }

    #[inline]
    fn goodbye(&self, data: &mut BoltData, parameters: GoodbyeParameters) -> Result<()> {
        self.base.goodbye(data, parameters)
    }

    #[inline]
    fn reset(&self, data: &mut BoltData, parameters: ResetParameters) -> Result<()> {
        self.base.reset(data, parameters)
    }

    #[inline]
    fn run(
        &self,
        data: &mut BoltData,
        parameters: RunParameters,
        callbacks: ResponseCallbacks,
    ) -> Result<()> {
        // pre-5.0, the access mode accompanies auto-commit RUNs
        self.base.run_message(data, parameters, callbacks, true)
    }

    #[inline]
    fn discard(
        &self,
        data: &mut BoltData,
        parameters: DiscardParameters,
        callbacks: ResponseCallbacks,
    ) -> Result<()> {
        self.base.discard(data, parameters, callbacks)
    }

    #[inline]
    fn pull(
        &self,
        data: &mut BoltData,
        parameters: PullParameters,
        callbacks: ResponseCallbacks,
    ) -> Result<()> {
        self.base.pull(data, parameters, callbacks)
    }

    #[inline]
    fn begin(
        &self,
        data: &mut BoltData,
        parameters: BeginParameters,
        callbacks: ResponseCallbacks,
    ) -> Result<()> {
        // the mode entry on BEGIN only exists from 5.0 on
        let parameters = BeginParameters {
            tx: parameters.tx.without_mode(),
        };
        self.base.begin(data, parameters, callbacks)
    }

    #[inline]
    fn commit(
        &self,
        data: &mut BoltData,
        parameters: CommitParameters,
        callbacks: ResponseCallbacks,
    ) -> Result<()> {
        self.base.commit(data, parameters, callbacks)
    }

    #[inline]
    fn rollback(&self, data: &mut BoltData, parameters: RollbackParameters) -> Result<()> {
        self.base.rollback(data, parameters)
    }

    #[inline]
    fn route(
        &self,
        data: &mut BoltData,
        parameters: RouteParameters,
        callbacks: ResponseCallbacks,
    ) -> Result<()> {
        self.base.route(data, parameters, callbacks)
    }

    #[inline]
    fn telemetry(
        &self,
        data: &mut BoltData,
        parameters: TelemetryParameters,
        callbacks: ResponseCallbacks,
    ) -> Result<()> {
        self.base.telemetry(data, parameters, callbacks)
    }

    #[inline]
    fn parse_message(&self, bytes: &[u8]) -> Result<BoltMessage> {
        self.base.parse_message(bytes)
    }

    #[inline]
    fn handle_response(
        &self,
        data: &mut BoltData,
        message: BoltMessage,
        on_server_error: OnServerErrorCb,
    ) -> Result<()> {
        self.base.handle_response(data, message, on_server_error)
    }
}
