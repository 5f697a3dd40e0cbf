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
use std::vec;

use itertools::Itertools;

use crate::driver::config::auth::AuthToken;
use crate::error_::DriverError;
use crate::value::graph::Node;
use crate::value::{BrokenValueInner, ValueReceive, ValueSend};

pub(super) const BOLT_AGENT_PRODUCT: &str =
    concat!("bolt-transport-rust/", env!("CARGO_PKG_VERSION"));
pub(super) const BOLT_AGENT_LANGUAGE: &str = "rust";

pub(super) const TAG_2D_POINT: u8 = b'X';
pub(super) const TAG_3D_POINT: u8 = b'Y';
pub(super) const TAG_NODE: u8 = b'N';
pub(super) const TAG_RELATIONSHIP: u8 = b'R';
pub(super) const TAG_UNBOUND_RELATIONSHIP: u8 = b'r';
pub(super) const TAG_PATH: u8 = b'P';
pub(super) const TAG_DATE: u8 = b'D';
pub(super) const TAG_TIME: u8 = b'T';
pub(super) const TAG_LOCAL_TIME: u8 = b't';
pub(super) const TAG_DATE_TIME: u8 = b'I';
pub(super) const TAG_LEGACY_DATE_TIME: u8 = b'F';
pub(super) const TAG_DATE_TIME_ZONE_ID: u8 = b'i';
pub(super) const TAG_LEGACY_DATE_TIME_ZONE_ID: u8 = b'f';
pub(super) const TAG_LOCAL_DATE_TIME: u8 = b'd';
pub(super) const TAG_DURATION: u8 = b'E';

/// Failure to turn a structure's fields into a value.
///
/// `Malformed` means the server sent something that doesn't match the
/// structure's schema; `OutOfRange` means the data was well-formed but
/// cannot be represented (e.g., a date outside chrono's range).
/// Either way the value surfaces as a `BrokenValue` — receiving one broken
/// value in a record must not kill the whole stream.
#[derive(Debug)]
pub(super) enum StructDecodeError {
    Malformed(String),
    OutOfRange(String),
}

impl StructDecodeError {
    pub(super) fn malformed(reason: impl Into<String>) -> Self {
        Self::Malformed(reason.into())
    }

    pub(super) fn out_of_range(reason: impl Into<String>) -> Self {
        Self::OutOfRange(reason.into())
    }

    pub(super) fn into_broken_value(self) -> ValueReceive {
        ValueReceive::BrokenValue(
            match self {
                Self::Malformed(reason) => BrokenValueInner::InvalidStruct { reason },
                Self::OutOfRange(reason) => BrokenValueInner::Reason(reason),
            }
            .into(),
        )
    }
}

/// Pulls a structure's fields out in order, with schema checks along the
/// way.
pub(super) struct StructFields {
    name: &'static str,
    fields: vec::IntoIter<ValueReceive>,
}

impl StructFields {
    pub(super) fn new(
        name: &'static str,
        expected: usize,
        fields: Vec<ValueReceive>,
    ) -> Result<Self, StructDecodeError> {
        if fields.len() != expected {
            return Err(StructDecodeError::malformed(format!(
                "{name} structure requires {expected} fields, found {}",
                fields.len()
            )));
        }
        Ok(Self {
            name,
            fields: fields.into_iter(),
        })
    }

    fn next(&mut self, what: &str) -> Result<ValueReceive, StructDecodeError> {
        self.fields.next().ok_or_else(|| {
            StructDecodeError::malformed(format!("{} is missing its {what}", self.name))
        })
    }

    pub(super) fn int(&mut self, what: &str) -> Result<i64, StructDecodeError> {
        match self.next(what)? {
            ValueReceive::Integer(i) => Ok(i),
            v => Err(self.type_error(what, "an integer", v)),
        }
    }

    pub(super) fn float(&mut self, what: &str) -> Result<f64, StructDecodeError> {
        match self.next(what)? {
            ValueReceive::Float(f) => Ok(f),
            v => Err(self.type_error(what, "a float", v)),
        }
    }

    pub(super) fn string(&mut self, what: &str) -> Result<String, StructDecodeError> {
        match self.next(what)? {
            ValueReceive::String(s) => Ok(s),
            v => Err(self.type_error(what, "a string", v)),
        }
    }

    pub(super) fn list(&mut self, what: &str) -> Result<Vec<ValueReceive>, StructDecodeError> {
        match self.next(what)? {
            ValueReceive::List(l) => Ok(l),
            v => Err(self.type_error(what, "a list", v)),
        }
    }

    pub(super) fn string_list(&mut self, what: &str) -> Result<Vec<String>, StructDecodeError> {
        self.list(what)?
            .into_iter()
            .map(|v| match v {
                ValueReceive::String(s) => Ok(s),
                v => Err(self.type_error(what, "a list of strings", v)),
            })
            .collect()
    }

    pub(super) fn map(
        &mut self,
        what: &str,
    ) -> Result<HashMap<String, ValueReceive>, StructDecodeError> {
        match self.next(what)? {
            ValueReceive::Map(m) => Ok(m),
            v => Err(self.type_error(what, "a map", v)),
        }
    }

    pub(super) fn node_list(&mut self, what: &str) -> Result<Vec<Node>, StructDecodeError> {
        self.list(what)?
            .into_iter()
            .map(|v| match v {
                ValueReceive::Node(node) => Ok(node),
                v => Err(self.type_error(what, "a list of nodes", v)),
            })
            .collect()
    }

    fn type_error(&self, what: &str, expected: &str, found: ValueReceive) -> StructDecodeError {
        StructDecodeError::malformed(format!(
            "{} {what} should be {expected}, found {found:?}",
            self.name
        ))
    }
}

pub(super) fn render_map(map: &HashMap<String, ValueSend>) -> String {
    format!(
        "{{{}}}",
        map.iter()
            .map(|(k, v)| format!("{k:?}: {}", v.dbg_print()))
            .format(", ")
    )
}

pub(super) fn render_opt_map(map: Option<&HashMap<String, ValueSend>>) -> String {
    map.map(render_map).unwrap_or_else(|| String::from("{}"))
}

/// Like [`render_map`], but with the credentials masked; auth data must
/// never end up in logs.
pub(super) fn render_auth(auth: &AuthToken) -> String {
    format!(
        "{{{}}}",
        auth.data
            .iter()
            .map(|(k, v)| match k.as_str() {
                "credentials" => format!("{k:?}: \"**********\""),
                _ => format!("{k:?}: {}", v.dbg_print()),
            })
            .format(", ")
    )
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) enum ServerAwareBoltVersion {
    V4x4,
    V5x0,
    V5x1,
    V5x2,
    V5x3,
    V5x4,
}

impl ServerAwareBoltVersion {
    #[inline]
    fn protocol_version(&self) -> &'static str {
        match self {
            Self::V4x4 => "4.4",
            Self::V5x0 => "5.0",
            Self::V5x1 => "5.1",
            Self::V5x2 => "5.2",
            Self::V5x3 => "5.3",
            Self::V5x4 => "5.4",
        }
    }

    #[inline]
    fn min_server_version(&self) -> &'static str {
        match self {
            Self::V4x4 => "4.4",
            Self::V5x0 => "5.0",
            Self::V5x1 => "5.5",
            Self::V5x2 => "5.7",
            Self::V5x3 => "5.9",
            Self::V5x4 => "5.13",
        }
    }
}

#[inline]
pub(super) fn unsupported_protocol_feature_error(
    name: &str,
    current_version: ServerAwareBoltVersion,
    needed_version: ServerAwareBoltVersion,
) -> DriverError {
    DriverError::feature_not_supported(format!(
        "{name} is not supported via bolt version {}, requires at least server version {}",
        current_version.protocol_version(),
        needed_version.min_server_version(),
    ))
}
