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

use itertools::Itertools;

use super::spatial;
use super::time;
use super::value_receive::ValueReceive;
use super::ValueConversionError;

#[cfg(doc)]
use crate::error_::DriverError;

/// A value that can be sent to the database, e.g., as a query parameter.
///
/// For all temporal types: note that leap seconds are not supported and will
/// result in a [`DriverError::Serialization`] when being sent.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum ValueSend {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Bytes(Vec<u8>),
    String(String),
    List(Vec<ValueSend>),
    Map(HashMap<String, ValueSend>),
    Cartesian2D(spatial::Cartesian2D),
    Cartesian3D(spatial::Cartesian3D),
    #[allow(non_camel_case_types)]
    WGS84_2D(spatial::WGS84_2D),
    #[allow(non_camel_case_types)]
    WGS84_3D(spatial::WGS84_3D),
    Duration(time::Duration),
    LocalTime(time::LocalTime),
    Time(time::Time),
    Date(time::Date),
    LocalDateTime(time::LocalDateTime),
    DateTime(time::DateTime),
    DateTimeFixed(time::DateTimeFixed),
}

impl ValueSend {
    /// Structural equality that, unlike `PartialEq`, treats floats by their
    /// bit pattern (`NaN == NaN`, `0.0 != -0.0`).
    pub(crate) fn eq_data(&self, other: &Self) -> bool {
        use ValueSend::*;

        match (self, other) {
            (Float(a), Float(b)) => a.to_bits() == b.to_bits(),
            (List(a), List(b)) => {
                a.len() == b.len() && a.iter().zip(b).all(|(a, b)| a.eq_data(b))
            }
            (Map(a), Map(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .all(|(k, a)| b.get(k).map(|b| a.eq_data(b)).unwrap_or_default())
            }
            (Cartesian2D(a), Cartesian2D(b)) => a.eq_data(b),
            (Cartesian3D(a), Cartesian3D(b)) => a.eq_data(b),
            (WGS84_2D(a), WGS84_2D(b)) => a.eq_data(b),
            (WGS84_3D(a), WGS84_3D(b)) => a.eq_data(b),
            // no floats hiding in the remaining variants
            _ => self == other,
        }
    }

    /// Compact single-line rendition for debug logging.
    pub(crate) fn dbg_print(&self) -> String {
        match self {
            Self::Null => String::from("null"),
            Self::Boolean(v) => format!("{v:?}"),
            Self::Integer(v) => format!("{v}"),
            Self::Float(v) => format!("{v}"),
            Self::Bytes(v) => format!("bytes{v:02X?}"),
            Self::String(v) => format!("{v:?}"),
            Self::List(v) => format!("[{}]", v.iter().map(Self::dbg_print).format(", ")),
            Self::Map(v) => format!(
                "{{{}}}",
                v.iter()
                    .map(|(k, v)| format!("{:?}: {}", k, v.dbg_print()))
                    .format(", ")
            ),
            Self::Cartesian2D(v) => format!("{v}"),
            Self::Cartesian3D(v) => format!("{v}"),
            Self::WGS84_2D(v) => format!("{v}"),
            Self::WGS84_3D(v) => format!("{v}"),
            Self::Duration(v) => format!("{v:?}"),
            Self::LocalTime(v) => format!("{v}"),
            Self::Time(v) => format!("{}{}", v.time, v.offset),
            Self::Date(v) => format!("{v}"),
            Self::LocalDateTime(v) => format!("{v}"),
            Self::DateTime(v) => format!("{v}"),
            Self::DateTimeFixed(v) => format!("{v}"),
        }
    }
}

macro_rules! from_impls {
    ( $( $variant:ident <= ($($ty:ty),+) ),+ $(,)? ) => {
        $($(
            impl From<$ty> for ValueSend {
                fn from(value: $ty) -> Self {
                    ValueSend::$variant(value.into())
                }
            }
        )+)+
    };
}

from_impls!(
    Boolean <= (bool),
    Integer <= (u8, u16, u32, i8, i16, i32, i64),
    Float <= (f32, f64),
    String <= (&str, String),
    Cartesian2D <= (spatial::Cartesian2D),
    Cartesian3D <= (spatial::Cartesian3D),
    WGS84_2D <= (spatial::WGS84_2D),
    WGS84_3D <= (spatial::WGS84_3D),
    Duration <= (time::Duration),
    LocalTime <= (time::LocalTime),
    Time <= (time::Time),
    Date <= (time::Date),
    LocalDateTime <= (time::LocalDateTime),
    DateTime <= (time::DateTime),
    DateTimeFixed <= (time::DateTimeFixed),
);

impl<T: Into<ValueSend>> From<HashMap<String, T>> for ValueSend {
    fn from(entries: HashMap<String, T>) -> Self {
        let entries = entries.into_iter().map(|(key, value)| (key, value.into()));
        ValueSend::Map(entries.collect())
    }
}

impl<T: Into<ValueSend>> From<Vec<T>> for ValueSend {
    fn from(values: Vec<T>) -> Self {
        ValueSend::List(values.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<ValueSend>> From<Option<T>> for ValueSend {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(value) => value.into(),
            None => ValueSend::Null,
        }
    }
}

impl TryFrom<ValueReceive> for ValueSend {
    type Error = ValueConversionError;

    fn try_from(value: ValueReceive) -> Result<Self, Self::Error> {
        fn refuse<T>(reason: &'static str) -> Result<T, ValueConversionError> {
            Err(reason.into())
        }
        Ok(match value {
            ValueReceive::Null => Self::Null,
            ValueReceive::Boolean(value) => Self::Boolean(value),
            ValueReceive::Integer(value) => Self::Integer(value),
            ValueReceive::Float(value) => Self::Float(value),
            ValueReceive::Bytes(value) => Self::Bytes(value),
            ValueReceive::String(value) => Self::String(value),
            ValueReceive::List(values) => {
                let values: Result<_, Self::Error> =
                    values.into_iter().map(TryInto::try_into).collect();
                Self::List(values?)
            }
            ValueReceive::Map(entries) => {
                let entries: Result<_, Self::Error> = entries
                    .into_iter()
                    .map(|(key, entry)| Ok((key, entry.try_into()?)))
                    .collect();
                Self::Map(entries?)
            }
            ValueReceive::Cartesian2D(value) => Self::Cartesian2D(value),
            ValueReceive::Cartesian3D(value) => Self::Cartesian3D(value),
            ValueReceive::WGS84_2D(value) => Self::WGS84_2D(value),
            ValueReceive::WGS84_3D(value) => Self::WGS84_3D(value),
            ValueReceive::Duration(value) => Self::Duration(value),
            ValueReceive::LocalTime(value) => Self::LocalTime(value),
            ValueReceive::Time(value) => Self::Time(value),
            ValueReceive::Date(value) => Self::Date(value),
            ValueReceive::LocalDateTime(value) => Self::LocalDateTime(value),
            ValueReceive::DateTime(value) => Self::DateTime(value),
            ValueReceive::DateTimeFixed(value) => Self::DateTimeFixed(value),
            ValueReceive::BrokenValue { .. } => return refuse("cannot convert BrokenValue"),
            ValueReceive::Node(_) => return refuse("cannot convert Node"),
            ValueReceive::Relationship(_) => return refuse("cannot convert Relationship"),
            ValueReceive::Path(_) => return refuse("cannot convert Path"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eq_data_compares_float_bits() {
        assert!(ValueSend::Float(f64::NAN).eq_data(&ValueSend::Float(f64::NAN)));
        assert!(!ValueSend::Float(0.0).eq_data(&ValueSend::Float(-0.0)));
        assert!(ValueSend::List(vec![ValueSend::Float(f64::NAN)])
            .eq_data(&ValueSend::List(vec![ValueSend::Float(f64::NAN)])));
    }

    #[test]
    fn option_converts_to_null() {
        assert_eq!(ValueSend::from(None::<i64>), ValueSend::Null);
        assert_eq!(ValueSend::from(Some(1)), ValueSend::Integer(1));
    }
}
