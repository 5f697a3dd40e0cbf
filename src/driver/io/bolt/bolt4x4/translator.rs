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

//! Value encoding for Bolt 4.4: no element ids on graph entities (they are
//! synthesized from the numeric ids) and wall-clock-based DateTime
//! structures, unless the server granted the `utc` patch on HELLO, in which
//! case the 5.x encodings apply.

use std::str::FromStr;

use chrono::{LocalResult, Offset, TimeZone, Timelike};

use super::super::bolt5x0::translator::{
    decode_common_struct, encode_common, unbound_relationship, utc_offset, ModernCodec,
};
use super::super::bolt_common::*;
use super::super::packstream::{PackstreamBuffer, SerializeError};
use super::super::{ValueCodec, ValueCodecWithUtcPatch};
use crate::value::graph::{Node, Path, Relationship, UnboundRelationship};
use crate::value::time::{local_date_time_from_timestamp, Tz};
use crate::value::{ValueReceive, ValueSend};

const NANOS_PER_SECOND: i64 = 1_000_000_000;

#[derive(Debug, Default)]
pub(crate) struct LegacyCodec {
    utc_patch: bool,
    modern: ModernCodec,
}

impl ValueCodec for LegacyCodec {
    fn encode(
        &self,
        buf: &mut PackstreamBuffer,
        value: &ValueSend,
    ) -> Result<(), SerializeError> {
        if self.utc_patch {
            return self.modern.encode(buf, value);
        }
        match value {
            ValueSend::DateTime(dt) => {
                let offset = dt.offset().fix().local_minus_utc();
                let wall_clock = wall_clock_seconds(dt.timestamp(), offset)?;
                buf.put_struct_header(TAG_LEGACY_DATE_TIME_ZONE_ID, 3)?;
                buf.put_int(wall_clock);
                buf.put_int(sub_second_nanos(dt.nanosecond())?);
                buf.put_string(dt.timezone().name())
            }
            ValueSend::DateTimeFixed(dt) => {
                let offset = dt.offset().local_minus_utc();
                let wall_clock = wall_clock_seconds(dt.timestamp(), offset)?;
                buf.put_struct_header(TAG_LEGACY_DATE_TIME, 3)?;
                buf.put_int(wall_clock);
                buf.put_int(sub_second_nanos(dt.nanosecond())?);
                buf.put_int(offset.into());
                Ok(())
            }
            _ => encode_common(self, buf, value),
        }
    }

    fn decode_struct(&self, tag: u8, fields: Vec<ValueReceive>) -> ValueReceive {
        let decoded = match tag {
            TAG_NODE => decode_node(fields),
            TAG_RELATIONSHIP => decode_relationship(fields),
            TAG_PATH => decode_path(fields),
            TAG_LEGACY_DATE_TIME if !self.utc_patch => decode_legacy_date_time(fields),
            TAG_LEGACY_DATE_TIME_ZONE_ID if !self.utc_patch => {
                decode_legacy_date_time_zoned(fields)
            }
            TAG_DATE_TIME | TAG_DATE_TIME_ZONE_ID if self.utc_patch => {
                return self.modern.decode_struct(tag, fields)
            }
            // whichever DateTime family is not negotiated stays opaque
            _ => return decode_common_struct(tag, fields),
        };
        decoded.unwrap_or_else(StructDecodeError::into_broken_value)
    }
}

impl ValueCodecWithUtcPatch for LegacyCodec {
    fn enable_utc_patch(&mut self) {
        self.utc_patch = true;
    }
}

fn sub_second_nanos(nanoseconds: u32) -> Result<i64, SerializeError> {
    if i64::from(nanoseconds) >= NANOS_PER_SECOND {
        return Err(SerializeError::new("leap seconds are not supported"));
    }
    Ok(nanoseconds.into())
}

/// Pre-UTC-patch DateTimes put local wall-clock seconds on the wire.
fn wall_clock_seconds(utc_seconds: i64, offset: i32) -> Result<i64, SerializeError> {
    utc_seconds
        .checked_add(offset.into())
        .ok_or_else(|| SerializeError::new("date time out of representable range"))
}

fn decode_node(fields: Vec<ValueReceive>) -> Result<ValueReceive, StructDecodeError> {
    let mut fields = StructFields::new("node", 3, fields)?;
    let id = fields.int("id")?;
    Ok(ValueReceive::Node(Node {
        id,
        labels: fields.string_list("labels")?,
        properties: fields.map("properties")?,
        element_id: id.to_string(),
    }))
}

fn decode_relationship(fields: Vec<ValueReceive>) -> Result<ValueReceive, StructDecodeError> {
    let mut fields = StructFields::new("relationship", 5, fields)?;
    let id = fields.int("id")?;
    let start_node_id = fields.int("start node id")?;
    let end_node_id = fields.int("end node id")?;
    Ok(ValueReceive::Relationship(Relationship {
        id,
        start_node_id,
        end_node_id,
        type_: fields.string("type")?,
        properties: fields.map("properties")?,
        element_id: id.to_string(),
        start_node_element_id: start_node_id.to_string(),
        end_node_element_id: end_node_id.to_string(),
    }))
}

fn decode_path(fields: Vec<ValueReceive>) -> Result<ValueReceive, StructDecodeError> {
    let mut fields = StructFields::new("path", 3, fields)?;
    let nodes = fields.node_list("nodes")?;
    let relationships = fields
        .list("relationships")?
        .into_iter()
        .map(|rel| unbound_relationship(rel, decode_unbound_relationship))
        .collect::<Result<Vec<_>, _>>()?;
    let indices = fields
        .list("indices")?
        .into_iter()
        .map(|index| match index {
            ValueReceive::Integer(i) => Ok(i as isize),
            v => Err(StructDecodeError::malformed(format!(
                "path indices should be integers, found {v:?}"
            ))),
        })
        .collect::<Result<Vec<_>, _>>()?;
    Path::new(nodes, relationships, indices)
        .map(ValueReceive::Path)
        .map_err(|e| StructDecodeError::malformed(format!("path invariant violated: {e}")))
}

fn decode_unbound_relationship(
    fields: Vec<ValueReceive>,
) -> Result<UnboundRelationship, StructDecodeError> {
    let mut fields = StructFields::new("unbound relationship", 3, fields)?;
    let id = fields.int("id")?;
    Ok(UnboundRelationship {
        id,
        type_: fields.string("type")?,
        properties: fields.map("properties")?,
        element_id: id.to_string(),
    })
}

fn decode_legacy_date_time(fields: Vec<ValueReceive>) -> Result<ValueReceive, StructDecodeError> {
    let mut fields = StructFields::new("date time", 3, fields)?;
    let wall_clock_seconds = fields.int("seconds")?;
    let nanoseconds = fields.int("nanoseconds")?;
    let offset = fields.int("utc offset")?;
    if nanoseconds < 0 || nanoseconds >= NANOS_PER_SECOND {
        return Err(StructDecodeError::malformed(
            "date time nanoseconds out of bounds",
        ));
    }
    let utc_seconds = wall_clock_seconds
        .checked_sub(offset)
        .ok_or_else(|| StructDecodeError::out_of_range("date time out of range"))?;
    let offset = utc_offset("date time", offset)?;
    let utc = local_date_time_from_timestamp(utc_seconds, nanoseconds as u32)
        .ok_or_else(|| StructDecodeError::out_of_range("date time out of range"))?;
    Ok(ValueReceive::DateTimeFixed(offset.from_utc_datetime(&utc)))
}

fn decode_legacy_date_time_zoned(
    fields: Vec<ValueReceive>,
) -> Result<ValueReceive, StructDecodeError> {
    let mut fields = StructFields::new("zoned date time", 3, fields)?;
    let wall_clock_seconds = fields.int("seconds")?;
    let nanoseconds = fields.int("nanoseconds")?;
    let zone_id = fields.string("zone id")?;
    if nanoseconds < 0 || nanoseconds >= NANOS_PER_SECOND {
        return Err(StructDecodeError::malformed(
            "zoned date time nanoseconds out of bounds",
        ));
    }
    let zone = Tz::from_str(&zone_id).map_err(|e| {
        StructDecodeError::out_of_range(format!("unknown time zone {zone_id:?}: {e}"))
    })?;
    let wall_clock = local_date_time_from_timestamp(wall_clock_seconds, nanoseconds as u32)
        .ok_or_else(|| StructDecodeError::out_of_range("zoned date time out of range"))?;
    let zoned = match wall_clock.and_local_timezone(zone) {
        LocalResult::None => {
            return Err(StructDecodeError::malformed(
                "zoned date time names a wall clock time that doesn't exist in its zone",
            ))
        }
        LocalResult::Single(dt) => dt,
        // the legacy encoding is ambiguous around zone transitions; one of
        // the two possible instants is picked
        LocalResult::Ambiguous(dt, _) => dt,
    };
    Ok(ValueReceive::DateTime(zoned))
}
