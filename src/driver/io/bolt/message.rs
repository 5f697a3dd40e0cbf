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

use super::packstream::{DeserializeError, PackstreamReader};
use super::ValueCodec;
use crate::error_::{DriverError, Result};
use crate::value::ValueReceive;

/// A message as received from the server: a structure at the top level of a
/// dechunked frame.
#[derive(Debug)]
pub(crate) struct BoltMessage {
    pub(crate) tag: u8,
    pub(crate) fields: Vec<ValueReceive>,
}

impl BoltMessage {
    pub(crate) fn parse(bytes: &[u8], codec: &impl ValueCodec) -> Result<Self> {
        let mut reader = PackstreamReader::new(bytes);
        let message = Self::parse_reader(&mut reader, codec).map_err(DriverError::from)?;
        if !reader.exhausted() {
            return Err(DriverError::protocol_error(
                "server sent trailing bytes after a message",
            ));
        }
        Ok(message)
    }

    fn parse_reader(
        reader: &mut PackstreamReader,
        codec: &impl ValueCodec,
    ) -> std::result::Result<Self, DeserializeError> {
        let (tag, field_count) = reader.read_struct_header()?;
        let fields = (0..field_count)
            .map(|_| reader.read_value(codec))
            .collect::<std::result::Result<_, _>>()?;
        Ok(Self { tag, fields })
    }
}
