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

use std::collections::{HashMap, VecDeque};
use std::fmt::{Display, Formatter};

use duplicate::duplicate_item;
use itertools::Itertools;

use super::graph::{Node, Path, Relationship};
use super::spatial;
use super::time;

/// A value as received from the database.
///
/// Compared to [`ValueSend`](`super::ValueSend`), this type additionally
/// covers the receive-only graph entities and [`BrokenValue`] for data the
/// server sent but the driver could not decode.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum ValueReceive {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    Bytes(Vec<u8>),
    String(String),
    List(Vec<ValueReceive>),
    Map(HashMap<String, ValueReceive>),
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
    Node(Node),
    Relationship(Relationship),
    Path(Path),
    BrokenValue(BrokenValue),
}

impl ValueReceive {
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[duplicate_item(
        fn_name               variant           type_;
        [ as_bool ]           [ Boolean ]       [ bool ];
        [ as_int ]            [ Integer ]       [ i64 ];
        [ as_float ]          [ Float ]         [ f64 ];
    )]
    #[inline]
    pub fn fn_name(&self) -> Option<type_> {
        match self {
            Self::variant(v) => Some(*v),
            _ => None,
        }
    }

    #[duplicate_item(
        fn_name               variant           type_;
        [ as_string ]         [ String ]        [ String ];
        [ as_list ]           [ List ]          [ Vec<ValueReceive> ];
        [ as_map ]            [ Map ]           [ HashMap<String, ValueReceive> ];
        [ as_node ]           [ Node ]          [ Node ];
    )]
    #[inline]
    pub fn fn_name(&self) -> Option<&type_> {
        match self {
            Self::variant(v) => Some(v),
            _ => None,
        }
    }

    #[duplicate_item(
        fn_name                  variant           type_;
        [ try_into_bool ]        [ Boolean ]       [ bool ];
        [ try_into_int ]         [ Integer ]       [ i64 ];
        [ try_into_float ]       [ Float ]         [ f64 ];
        [ try_into_bytes ]       [ Bytes ]         [ Vec<u8> ];
        [ try_into_string ]      [ String ]        [ String ];
        [ try_into_list ]        [ List ]          [ Vec<ValueReceive> ];
        [ try_into_map ]         [ Map ]           [ HashMap<String, ValueReceive> ];
        [ try_into_node ]        [ Node ]          [ Node ];
        [ try_into_relationship ][ Relationship ]  [ Relationship ];
        [ try_into_path ]        [ Path ]          [ Path ];
    )]
    #[inline]
    pub fn fn_name(self) -> Result<type_, Self> {
        match self {
            Self::variant(v) => Ok(v),
            _ => Err(self),
        }
    }

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
            Self::Node(v) => format!("{v}"),
            Self::Relationship(v) => format!("{v}"),
            Self::Path(_) => String::from("Path(...)"),
            Self::BrokenValue(v) => format!("BrokenValue({})", v.reason()),
        }
    }
}

macro_rules! impl_try_from_value {
    ( $variant:ident, $ty:ty ) => {
        impl TryFrom<ValueReceive> for $ty {
            type Error = ValueReceive;

            fn try_from(value: ValueReceive) -> Result<Self, Self::Error> {
                match value {
                    ValueReceive::$variant(value) => Ok(value),
                    _ => Err(value),
                }
            }
        }
    };
}

impl_try_from_value!(Boolean, bool);
impl_try_from_value!(Integer, i64);
impl_try_from_value!(Float, f64);
impl_try_from_value!(String, String);
impl_try_from_value!(List, Vec<ValueReceive>);
impl_try_from_value!(Map, HashMap<String, ValueReceive>);

/// A value the driver received over the wire but could not turn into a usable
/// [`ValueReceive`] variant.
/// E.g., an unknown structure tag or a temporal value out of range.
///
/// The raw data is kept around for debugging; it cannot be converted back or
/// sent to the server.
#[derive(Debug, Clone, PartialEq)]
pub struct BrokenValue {
    pub(crate) inner: BrokenValueInner,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum BrokenValueInner {
    Reason(String),
    UnknownStruct {
        tag: u8,
        fields: VecDeque<ValueReceive>,
    },
    InvalidStruct {
        reason: String,
    },
}

impl BrokenValue {
    pub(crate) fn into_inner(self) -> BrokenValueInner {
        self.inner
    }

    pub fn reason(&self) -> String {
        match &self.inner {
            BrokenValueInner::Reason(reason) => reason.clone(),
            BrokenValueInner::UnknownStruct { tag, .. } => {
                format!("received an unknown structure tag {tag:#04X}")
            }
            BrokenValueInner::InvalidStruct { reason } => reason.clone(),
        }
    }
}

impl From<BrokenValueInner> for BrokenValue {
    fn from(inner: BrokenValueInner) -> Self {
        Self { inner }
    }
}

impl Display for BrokenValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "BrokenValue({})", self.reason())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_into_returns_self_on_mismatch() {
        let v = ValueReceive::Integer(1);
        let v = v.try_into_string().unwrap_err();
        assert_eq!(v.try_into_int().unwrap(), 1);
    }

    #[test]
    fn dbg_print_nested() {
        let v = ValueReceive::List(vec![
            ValueReceive::Null,
            ValueReceive::String(String::from("foo")),
            ValueReceive::Integer(42),
        ]);
        assert_eq!(v.dbg_print(), r#"[null, "foo", 42]"#);
    }
}
