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

//! Value encoding for Bolt 5.x: UTC-based DateTime structures and graph
//! entities carrying element ids.

use std::str::FromStr;

use chrono::{Datelike, TimeZone, Timelike};

use super::super::bolt_common::*;
use super::super::packstream::{PackstreamBuffer, SerializeError};
use super::super::ValueCodec;
use crate::value::graph::{Node, Path, Relationship, UnboundRelationship};
use crate::value::spatial::{
    SRID_CARTESIAN_2D, SRID_CARTESIAN_3D, SRID_WGS84_2D, SRID_WGS84_3D,
};
use crate::value::time::{local_date_time_from_timestamp, Date, FixedOffset, LocalTime, Time, Tz};
use crate::value::{spatial, BrokenValueInner, ValueReceive, ValueSend};

const NANOS_PER_SECOND: i64 = 1_000_000_000;
// Date::from_ymd_opt(1970, 1, 1).unwrap().num_days_from_ce()
const UNIX_EPOCH_DAYS: i64 = 719_163;

#[derive(Debug, Default)]
pub(crate) struct ModernCodec {}

impl ValueCodec for ModernCodec {
    fn encode(
        &self,
        buf: &mut PackstreamBuffer,
        value: &ValueSend,
    ) -> Result<(), SerializeError> {
        match value {
            ValueSend::DateTime(dt) => {
                let (seconds, nanoseconds) = utc_parts(dt.timestamp(), dt.nanosecond())?;
                buf.put_struct_header(TAG_DATE_TIME_ZONE_ID, 3)?;
                buf.put_int(seconds);
                buf.put_int(nanoseconds);
                buf.put_string(dt.timezone().name())
            }
            ValueSend::DateTimeFixed(dt) => {
                let (seconds, nanoseconds) = utc_parts(dt.timestamp(), dt.nanosecond())?;
                buf.put_struct_header(TAG_DATE_TIME, 3)?;
                buf.put_int(seconds);
                buf.put_int(nanoseconds);
                buf.put_int(dt.offset().local_minus_utc().into());
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
            TAG_DATE_TIME => decode_date_time_offset(fields),
            TAG_DATE_TIME_ZONE_ID => decode_date_time_zoned(fields),
            _ => return decode_common_struct(tag, fields),
        };
        decoded.unwrap_or_else(StructDecodeError::into_broken_value)
    }
}

/// The value variants whose wire form is identical across all supported
/// protocol versions.
pub(in super::super) fn encode_common(
    codec: &impl ValueCodec,
    buf: &mut PackstreamBuffer,
    value: &ValueSend,
) -> Result<(), SerializeError> {
    match value {
        ValueSend::Null => buf.put_null(),
        ValueSend::Boolean(b) => buf.put_bool(*b),
        ValueSend::Integer(i) => buf.put_int(*i),
        ValueSend::Float(f) => buf.put_float(*f),
        ValueSend::Bytes(b) => return buf.put_bytes(b),
        ValueSend::String(s) => return buf.put_string(s),
        ValueSend::List(l) => {
            buf.put_list_header(l.len())?;
            for v in l {
                codec.encode(buf, v)?;
            }
        }
        ValueSend::Map(m) => return buf.put_map(codec, m),
        ValueSend::Cartesian2D(spatial::Cartesian2D { srid, coordinates })
        | ValueSend::WGS84_2D(spatial::WGS84_2D { srid, coordinates }) => {
            buf.put_struct_header(TAG_2D_POINT, 3)?;
            buf.put_int(*srid);
            for coordinate in coordinates {
                buf.put_float(*coordinate);
            }
        }
        ValueSend::Cartesian3D(spatial::Cartesian3D { srid, coordinates })
        | ValueSend::WGS84_3D(spatial::WGS84_3D { srid, coordinates }) => {
            buf.put_struct_header(TAG_3D_POINT, 4)?;
            buf.put_int(*srid);
            for coordinate in coordinates {
                buf.put_float(*coordinate);
            }
        }
        ValueSend::Duration(d) => {
            buf.put_struct_header(TAG_DURATION, 4)?;
            buf.put_int(d.months());
            buf.put_int(d.days());
            buf.put_int(d.seconds());
            buf.put_int(d.nanoseconds().into());
        }
        ValueSend::LocalTime(t) => {
            buf.put_struct_header(TAG_LOCAL_TIME, 1)?;
            buf.put_int(nanos_since_midnight(t)?);
        }
        ValueSend::Time(Time { time, offset }) => {
            buf.put_struct_header(TAG_TIME, 2)?;
            buf.put_int(nanos_since_midnight(time)?);
            buf.put_int(offset.local_minus_utc().into());
        }
        ValueSend::Date(d) => {
            buf.put_struct_header(TAG_DATE, 1)?;
            buf.put_int(i64::from(d.num_days_from_ce()) - UNIX_EPOCH_DAYS);
        }
        ValueSend::LocalDateTime(dt) => {
            let (seconds, nanoseconds) = utc_parts(dt.and_utc().timestamp(), dt.nanosecond())?;
            buf.put_struct_header(TAG_LOCAL_DATE_TIME, 2)?;
            buf.put_int(seconds);
            buf.put_int(nanoseconds);
        }
        ValueSend::DateTime(_) | ValueSend::DateTimeFixed(_) => {
            unreachable!("zoned date times differ per version, the codec handles them")
        }
    }
    Ok(())
}

/// Structures whose layout never changed; unknown tags are preserved as
/// broken values so a single exotic entry doesn't tear down the stream.
pub(in super::super) fn decode_common_struct(tag: u8, fields: Vec<ValueReceive>) -> ValueReceive {
    let decoded = match tag {
        TAG_2D_POINT => decode_point_2d(fields),
        TAG_3D_POINT => decode_point_3d(fields),
        TAG_DATE => decode_date(fields),
        TAG_TIME => decode_time(fields),
        TAG_LOCAL_TIME => decode_local_time(fields),
        TAG_LOCAL_DATE_TIME => decode_local_date_time(fields),
        TAG_DURATION => decode_duration(fields),
        _ => {
            return ValueReceive::BrokenValue(
                BrokenValueInner::UnknownStruct {
                    tag,
                    fields: fields.into(),
                }
                .into(),
            )
        }
    };
    decoded.unwrap_or_else(StructDecodeError::into_broken_value)
}

fn nanos_since_midnight(time: &LocalTime) -> Result<i64, SerializeError> {
    let nanos = i64::from(time.nanosecond());
    if nanos >= NANOS_PER_SECOND {
        return Err(SerializeError::new("leap seconds are not supported"));
    }
    Ok(i64::from(time.num_seconds_from_midnight()) * NANOS_PER_SECOND + nanos)
}

fn utc_parts(seconds: i64, nanoseconds: u32) -> Result<(i64, i64), SerializeError> {
    if i64::from(nanoseconds) >= NANOS_PER_SECOND {
        return Err(SerializeError::new("leap seconds are not supported"));
    }
    Ok((seconds, nanoseconds.into()))
}

/// Splits a nanosecond total into non-negative sub-second nanos plus carry
/// seconds added onto `seconds`.
fn split_nanos(
    what: &'static str,
    seconds: i64,
    nanoseconds: i64,
) -> Result<(i64, u32), StructDecodeError> {
    let carry = nanoseconds.div_euclid(NANOS_PER_SECOND);
    let sub_second = nanoseconds.rem_euclid(NANOS_PER_SECOND) as u32;
    let seconds = seconds
        .checked_add(carry)
        .ok_or_else(|| StructDecodeError::out_of_range(format!("{what} seconds overflow")))?;
    Ok((seconds, sub_second))
}

fn decode_point_2d(fields: Vec<ValueReceive>) -> Result<ValueReceive, StructDecodeError> {
    let mut fields = StructFields::new("2D point", 3, fields)?;
    let srid = fields.int("srid")?;
    let x = fields.float("first coordinate")?;
    let y = fields.float("second coordinate")?;
    Ok(match srid {
        SRID_CARTESIAN_2D => ValueReceive::Cartesian2D(spatial::Cartesian2D::new(x, y)),
        SRID_WGS84_2D => ValueReceive::WGS84_2D(spatial::WGS84_2D::new(x, y)),
        srid => {
            return Err(StructDecodeError::malformed(format!(
                "unknown 2D point srid {srid}"
            )))
        }
    })
}

fn decode_point_3d(fields: Vec<ValueReceive>) -> Result<ValueReceive, StructDecodeError> {
    let mut fields = StructFields::new("3D point", 4, fields)?;
    let srid = fields.int("srid")?;
    let x = fields.float("first coordinate")?;
    let y = fields.float("second coordinate")?;
    let z = fields.float("third coordinate")?;
    Ok(match srid {
        SRID_CARTESIAN_3D => ValueReceive::Cartesian3D(spatial::Cartesian3D::new(x, y, z)),
        SRID_WGS84_3D => ValueReceive::WGS84_3D(spatial::WGS84_3D::new(x, y, z)),
        srid => {
            return Err(StructDecodeError::malformed(format!(
                "unknown 3D point srid {srid}"
            )))
        }
    })
}

fn decode_node(fields: Vec<ValueReceive>) -> Result<ValueReceive, StructDecodeError> {
    let mut fields = StructFields::new("node", 4, fields)?;
    Ok(ValueReceive::Node(Node {
        id: fields.int("id")?,
        labels: fields.string_list("labels")?,
        properties: fields.map("properties")?,
        element_id: fields.string("element id")?,
    }))
}

fn decode_relationship(fields: Vec<ValueReceive>) -> Result<ValueReceive, StructDecodeError> {
    let mut fields = StructFields::new("relationship", 8, fields)?;
    Ok(ValueReceive::Relationship(Relationship {
        id: fields.int("id")?,
        start_node_id: fields.int("start node id")?,
        end_node_id: fields.int("end node id")?,
        type_: fields.string("type")?,
        properties: fields.map("properties")?,
        element_id: fields.string("element id")?,
        start_node_element_id: fields.string("start node element id")?,
        end_node_element_id: fields.string("end node element id")?,
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

/// Relationships inside a path arrive as unknown structures (their tag is
/// not a stand-alone value); `decode` turns their raw fields into the entity.
pub(in super::super) fn unbound_relationship(
    value: ValueReceive,
    decode: fn(Vec<ValueReceive>) -> Result<UnboundRelationship, StructDecodeError>,
) -> Result<UnboundRelationship, StructDecodeError> {
    match value {
        ValueReceive::BrokenValue(broken) => match broken.into_inner() {
            BrokenValueInner::UnknownStruct { tag, fields } if tag == TAG_UNBOUND_RELATIONSHIP => {
                decode(fields.into())
            }
            inner => Err(StructDecodeError::malformed(format!(
                "path relationship was not an unbound relationship structure: {inner:?}"
            ))),
        },
        v => Err(StructDecodeError::malformed(format!(
            "path relationship was not a structure: {v:?}"
        ))),
    }
}

fn decode_unbound_relationship(
    fields: Vec<ValueReceive>,
) -> Result<UnboundRelationship, StructDecodeError> {
    let mut fields = StructFields::new("unbound relationship", 4, fields)?;
    Ok(UnboundRelationship {
        id: fields.int("id")?,
        type_: fields.string("type")?,
        properties: fields.map("properties")?,
        element_id: fields.string("element id")?,
    })
}

fn decode_date(fields: Vec<ValueReceive>) -> Result<ValueReceive, StructDecodeError> {
    let mut fields = StructFields::new("date", 1, fields)?;
    let days = fields.int("days since epoch")?;
    Date::from_yo_opt(1970, 1)
        .expect("epoch is a valid date")
        .checked_add_signed(chrono::Duration::days(days))
        .map(ValueReceive::Date)
        .ok_or_else(|| StructDecodeError::out_of_range("date out of representable range"))
}

fn local_time_from_nanos(
    what: &'static str,
    nanoseconds: i64,
) -> Result<LocalTime, StructDecodeError> {
    let (seconds, sub_second) = split_nanos(what, 0, nanoseconds)?;
    u32::try_from(seconds)
        .ok()
        .and_then(|seconds| LocalTime::from_num_seconds_from_midnight_opt(seconds, sub_second))
        .ok_or_else(|| StructDecodeError::out_of_range(format!("{what} out of range")))
}

fn decode_time(fields: Vec<ValueReceive>) -> Result<ValueReceive, StructDecodeError> {
    let mut fields = StructFields::new("time", 2, fields)?;
    let time = local_time_from_nanos("time", fields.int("nanoseconds")?)?;
    let offset = utc_offset("time", fields.int("utc offset")?)?;
    Ok(ValueReceive::Time(Time { time, offset }))
}

fn decode_local_time(fields: Vec<ValueReceive>) -> Result<ValueReceive, StructDecodeError> {
    let mut fields = StructFields::new("local time", 1, fields)?;
    local_time_from_nanos("local time", fields.int("nanoseconds")?).map(ValueReceive::LocalTime)
}

fn decode_local_date_time(fields: Vec<ValueReceive>) -> Result<ValueReceive, StructDecodeError> {
    let mut fields = StructFields::new("local date time", 2, fields)?;
    let seconds = fields.int("seconds")?;
    let nanoseconds = fields.int("nanoseconds")?;
    let (seconds, sub_second) = split_nanos("local date time", seconds, nanoseconds)?;
    local_date_time_from_timestamp(seconds, sub_second)
        .map(ValueReceive::LocalDateTime)
        .ok_or_else(|| StructDecodeError::out_of_range("local date time out of range"))
}

fn decode_duration(fields: Vec<ValueReceive>) -> Result<ValueReceive, StructDecodeError> {
    let mut fields = StructFields::new("duration", 4, fields)?;
    let months = fields.int("months")?;
    let days = fields.int("days")?;
    let seconds = fields.int("seconds")?;
    let nanoseconds = fields.int("nanoseconds")?;
    i32::try_from(nanoseconds)
        .ok()
        .and_then(|nanoseconds| crate::value::time::Duration::new(months, days, seconds, nanoseconds))
        .map(ValueReceive::Duration)
        .ok_or_else(|| StructDecodeError::out_of_range("duration out of range"))
}

pub(in super::super) fn utc_offset(
    what: &'static str,
    offset_seconds: i64,
) -> Result<FixedOffset, StructDecodeError> {
    i32::try_from(offset_seconds)
        .ok()
        .and_then(FixedOffset::east_opt)
        .ok_or_else(|| StructDecodeError::out_of_range(format!("{what} utc offset out of range")))
}

fn decode_date_time_offset(fields: Vec<ValueReceive>) -> Result<ValueReceive, StructDecodeError> {
    let mut fields = StructFields::new("date time", 3, fields)?;
    let seconds = fields.int("seconds")?;
    let nanoseconds = fields.int("nanoseconds")?;
    let offset = utc_offset("date time", fields.int("utc offset")?)?;
    if nanoseconds < 0 {
        return Err(StructDecodeError::malformed(
            "date time nanoseconds must not be negative",
        ));
    }
    let (seconds, sub_second) = split_nanos("date time", seconds, nanoseconds)?;
    let utc = local_date_time_from_timestamp(seconds, sub_second)
        .ok_or_else(|| StructDecodeError::out_of_range("date time out of range"))?;
    Ok(ValueReceive::DateTimeFixed(offset.from_utc_datetime(&utc)))
}

fn decode_date_time_zoned(fields: Vec<ValueReceive>) -> Result<ValueReceive, StructDecodeError> {
    let mut fields = StructFields::new("zoned date time", 3, fields)?;
    let seconds = fields.int("seconds")?;
    let nanoseconds = fields.int("nanoseconds")?;
    let zone_id = fields.string("zone id")?;
    if nanoseconds < 0 {
        return Err(StructDecodeError::malformed(
            "zoned date time nanoseconds must not be negative",
        ));
    }
    let zone = Tz::from_str(&zone_id).map_err(|e| {
        StructDecodeError::out_of_range(format!("unknown time zone {zone_id:?}: {e}"))
    })?;
    let (seconds, sub_second) = split_nanos("zoned date time", seconds, nanoseconds)?;
    let utc = local_date_time_from_timestamp(seconds, sub_second)
        .ok_or_else(|| StructDecodeError::out_of_range("zoned date time out of range"))?;
    Ok(ValueReceive::DateTime(zone.from_utc_datetime(&utc)))
}
