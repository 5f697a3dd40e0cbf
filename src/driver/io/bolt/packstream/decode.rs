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

use super::error::DeserializeError;
use crate::driver::io::bolt::ValueCodec;
use crate::value::ValueReceive;

type Result<T> = std::result::Result<T, DeserializeError>;

/// Walks a fully received message and decodes values out of it.
/// Structure payloads are handed to the connection's [`ValueCodec`], which
/// knows the version-specific structure layouts.
#[derive(Debug)]
pub(crate) struct PackstreamReader<'a> {
    bytes: &'a [u8],
}

impl<'a> PackstreamReader<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    pub(crate) fn exhausted(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Reads a structure marker plus tag; Bolt messages are structures at
    /// the top level of a frame.
    pub(crate) fn read_struct_header(&mut self) -> Result<(u8, u8)> {
        let marker = self.take_byte("message marker")?;
        if !(0xB0..=0xBF).contains(&marker) {
            return Err(DeserializeError::protocol_violation(format!(
                "expected a structure marker, found {marker:#04X}"
            )));
        }
        let tag = self.take_byte("structure tag")?;
        Ok((tag, marker & 0x0F))
    }

    pub(crate) fn read_value(&mut self, codec: &impl ValueCodec) -> Result<ValueReceive> {
        let marker = self.take_byte("value marker")?;
        Ok(match marker {
            0xC0 => ValueReceive::Null,
            0xC1 => ValueReceive::Float(f64::from_be_bytes(self.take_array("float")?)),
            0xC2 => ValueReceive::Boolean(false),
            0xC3 => ValueReceive::Boolean(true),
            // tiny ints live in the marker byte itself
            0x00..=0x7F | 0xF0..=0xFF => ValueReceive::Integer((marker as i8).into()),
            0xC8 => {
                ValueReceive::Integer(i8::from_be_bytes(self.take_array("int")?).into())
            }
            0xC9 => {
                ValueReceive::Integer(i16::from_be_bytes(self.take_array("int")?).into())
            }
            0xCA => {
                ValueReceive::Integer(i32::from_be_bytes(self.take_array("int")?).into())
            }
            0xCB => ValueReceive::Integer(i64::from_be_bytes(self.take_array("int")?)),
            0xCC..=0xCE => {
                let len = self.take_len(marker - 0xCC, "byte array")?;
                ValueReceive::Bytes(self.take(len, "byte array")?.to_vec())
            }
            0x80..=0x8F => self.read_string((marker & 0x0F).into())?,
            0xD0..=0xD2 => {
                let len = self.take_len(marker - 0xD0, "string")?;
                self.read_string(len)?
            }
            0x90..=0x9F => self.read_list((marker & 0x0F).into(), codec)?,
            0xD4..=0xD6 => {
                let len = self.take_len(marker - 0xD4, "list")?;
                self.read_list(len, codec)?
            }
            0xA0..=0xAF => self.read_map((marker & 0x0F).into(), codec)?,
            0xD8..=0xDA => {
                let len = self.take_len(marker - 0xD8, "map")?;
                self.read_map(len, codec)?
            }
            0xB0..=0xBF => {
                let tag = self.take_byte("structure tag")?;
                let mut fields = Vec::with_capacity((marker & 0x0F).into());
                for _ in 0..(marker & 0x0F) {
                    fields.push(self.read_value(codec)?);
                }
                codec.decode_struct(tag, fields)
            }
            _ => {
                return Err(DeserializeError::protocol_violation(format!(
                    "unknown marker {marker:#04X}"
                )))
            }
        })
    }

    fn read_string(&mut self, len: usize) -> Result<ValueReceive> {
        let bytes = self.take(len, "string")?;
        Ok(ValueReceive::String(
            String::from_utf8_lossy(bytes).into_owned(),
        ))
    }

    fn read_list(&mut self, len: usize, codec: &impl ValueCodec) -> Result<ValueReceive> {
        let mut list = Vec::with_capacity(len.min(self.bytes.len()));
        for _ in 0..len {
            list.push(self.read_value(codec)?);
        }
        Ok(ValueReceive::List(list))
    }

    fn read_map(&mut self, len: usize, codec: &impl ValueCodec) -> Result<ValueReceive> {
        let mut map = HashMap::with_capacity(len.min(self.bytes.len()));
        for _ in 0..len {
            let key = match self.read_value(codec)? {
                ValueReceive::String(key) => key,
                v => {
                    return Err(DeserializeError::protocol_violation(format!(
                        "expected map key to be a string, found {v:?}"
                    )))
                }
            };
            map.insert(key, self.read_value(codec)?);
        }
        Ok(ValueReceive::Map(map))
    }

    /// Reads the 1/2/4-byte big-endian length following a non-tiny marker.
    /// `width_class` is 0, 1, or 2 (the marker's offset from its 8-bit base).
    fn take_len(&mut self, width_class: u8, what: &'static str) -> Result<usize> {
        Ok(match width_class {
            0 => self.take_byte(what)?.into(),
            1 => u16::from_be_bytes(self.take_array(what)?).into(),
            _ => {
                let len = u32::from_be_bytes(self.take_array(what)?);
                usize::try_from(len).map_err(|_| {
                    DeserializeError::malformed(format!("{what} length is not addressable: {len}"))
                })?
            }
        })
    }

    fn take_byte(&mut self, what: &'static str) -> Result<u8> {
        Ok(self.take(1, what)?[0])
    }

    fn take_array<const N: usize>(&mut self, what: &'static str) -> Result<[u8; N]> {
        Ok(self
            .take(N, what)?
            .try_into()
            .expect("take returned exactly N bytes"))
    }

    fn take(&mut self, n: usize, what: &'static str) -> Result<&'a [u8]> {
        if self.bytes.len() < n {
            return Err(DeserializeError::malformed(format!(
                "message ended in the middle of a {what} ({} of {n} bytes left)",
                self.bytes.len(),
            )));
        }
        let (taken, rest) = self.bytes.split_at(n);
        self.bytes = rest;
        Ok(taken)
    }
}
