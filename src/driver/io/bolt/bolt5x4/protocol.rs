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

//! Bolt 5.4 adds the TELEMETRY message, sent only when the server asked for
//! it via the `telemetry.enabled` connection hint.

use super::super::bolt5x0::Bolt5x0;
use super::super::bolt5x1::Bolt5x1;
use super::super::bolt_common::ServerAwareBoltVersion;
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
use crate::error_::Result;

const MSG_TELEMETRY: u8 = 0x54;

#[derive(Debug)]
pub(crate) struct Bolt5x4<C: ValueCodec> {
    base: Bolt5x1<C>,
}

impl<C: ValueCodec> Default for Bolt5x4<C> {
    fn default() -> Self {
        Self {
            base: Bolt5x1::new(ServerAwareBoltVersion::V5x4),
        }
    }
}

impl<C: ValueCodec> BoltProtocol for Bolt5x4<C> {
    #[inline]
    fn hello(&self, data: &mut BoltData, parameters: HelloParameters) -> Result<()> {
        self.base.hello(data, parameters)
    }

    #[inline]
    fn reauth(&self, data: &mut BoltData, parameters: ReauthParameters) -> Result<()> {
        self.base.reauth(data, parameters)
    }

    #[inline]
    fn supports_reauth(&self) -> bool {
        self.base.supports_reauth()
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
        self.base.route(data, parameters, callbacks)
    }

    fn telemetry(
        &self,
        data: &mut BoltData,
        parameters: TelemetryParameters,
        callbacks: ResponseCallbacks,
    ) -> Result<()> {
        if !data.telemetry_enabled() {
            // the server hasn't asked for telemetry
            return Ok(());
        }
        let api = parameters.api;
        let mut buf = PackstreamBuffer::new();
        buf.put_struct_header(MSG_TELEMETRY, 1)?;
        buf.put_int(api.wire_value());
        conn_debug!(data, "C: TELEMETRY {}", api.wire_value());
        Bolt5x0::<C>::enqueue(
            data,
            buf,
            BoltResponse::new(ResponseMessage::Telemetry, callbacks),
        );
        Ok(())
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
