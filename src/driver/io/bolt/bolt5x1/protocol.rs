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

//! Bolt 5.1: authentication moves out of HELLO into dedicated LOGON/LOGOFF
//! messages, which also makes re-authenticating a pooled connection
//! possible; ROUTE learns about impersonation.

use std::sync::Arc;

use super::super::bolt5x0::Bolt5x0;
use super::super::bolt_common::{render_auth, ServerAwareBoltVersion};
use super::super::message::BoltMessage;
use super::super::message_parameters::{
    BeginParameters, CommitParameters, DiscardParameters, GoodbyeParameters, HelloParameters,
    PullParameters, ReauthParameters, ResetParameters, RollbackParameters, RouteParameters,
    RunParameters, TelemetryParameters,
};
use super::super::packstream::PackstreamBuffer;
use super::super::{
    conn_debug, BoltData, BoltProtocol, BoltResponse, OnServerErrorCb, ResponseCallbacks,
    ResponseMessage, ValueCodec,
};
use crate::driver::config::auth::AuthToken;
use crate::error_::Result;

const MSG_LOGON: u8 = 0x6A;
const MSG_LOGOFF: u8 = 0x6B;

#[derive(Debug)]
pub(crate) struct Bolt5x1<C: ValueCodec> {
    pub(in super::super) base: Bolt5x0<C>,
}

impl<C: ValueCodec> Default for Bolt5x1<C> {
    fn default() -> Self {
        Self::new(ServerAwareBoltVersion::V5x1)
    }
}

impl<C: ValueCodec> Bolt5x1<C> {
    pub(in super::super) fn new(protocol_version: ServerAwareBoltVersion) -> Self {
        Self {
            base: Bolt5x0::new(protocol_version),
        }
    }

    pub(in super::super) fn logon(&self, data: &mut BoltData, auth: &Arc<AuthToken>) -> Result<()> {
        let mut buf = PackstreamBuffer::new();
        buf.put_struct_header(MSG_LOGON, 1)?;
        let mut entries = buf.tiny_map();
        for (key, value) in &auth.data {
            entries.entry_value(key, &self.base.codec, value)?;
        }
        entries.end();

        data.auth = Some(Arc::clone(auth));
        conn_debug!(data, "C: LOGON {}", render_auth(auth));
        Bolt5x0::<C>::enqueue(data, buf, BoltResponse::from_message(ResponseMessage::Logon));
        Ok(())
    }

    pub(in super::super) fn logoff(&self, data: &mut BoltData) -> Result<()> {
        let mut buf = PackstreamBuffer::new();
        buf.put_struct_header(MSG_LOGOFF, 0)?;
        conn_debug!(data, "C: LOGOFF");
        Bolt5x0::<C>::enqueue(
            data,
            buf,
            BoltResponse::from_message(ResponseMessage::Logoff),
        );
        Ok(())
    }
}

impl<C: ValueCodec> BoltProtocol for Bolt5x1<C> {
    fn hello(&self, data: &mut BoltData, parameters: HelloParameters) -> Result<()> {
        let HelloParameters {
            user_agent,
            auth,
            routing_context,
        } = parameters;
        let mut buf = PackstreamBuffer::new();
        self.base
            .write_hello(&mut buf, user_agent, routing_context, None, |_| Ok(()))?;
        conn_debug!(
            data,
            "C: HELLO user_agent={user_agent:?} routing={}",
            super::super::bolt_common::render_opt_map(routing_context),
        );
        data.message_buff.push_back(buf.into_bytes());
        Bolt5x0::<C>::enqueue_hello_response(data);

        // authentication is carried by a separate LOGON from 5.1 on
        self.logon(data, auth)
    }

    #[inline]
    fn reauth(&self, data: &mut BoltData, parameters: ReauthParameters) -> Result<()> {
        if data.auth().is_some() {
            self.logoff(data)?;
        }
        self.logon(data, parameters.auth)
    }

    #[inline]
    fn supports_reauth(&self) -> bool {
        true
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
        self.base.run(data, parameters, callbacks)
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
        self.base.route_message(data, parameters, callbacks, true)
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
