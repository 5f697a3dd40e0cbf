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

use super::error::SerializeError;
use crate::driver::io::bolt::ValueCodec;
use crate::value::ValueSend;

/// Marker bytes for the fixed-size value types.
const NULL: u8 = 0xC0;
const FLOAT: u8 = 0xC1;
const FALSE: u8 = 0xC2;
const TRUE: u8 = 0xC3;
const INT_8: u8 = 0xC8;
const INT_16: u8 = 0xC9;
const INT_32: u8 = 0xCA;
const INT_64: u8 = 0xCB;

/// Marker base bytes for the length-carrying types; tiny variants encode
/// lengths up to 15 into the marker itself, the wider variants append a
/// 1/2/4-byte big-endian length.
const TINY_STRING: u8 = 0x80;
const TINY_LIST: u8 = 0x90;
const TINY_MAP: u8 = 0xA0;
const TINY_STRUCT: u8 = 0xB0;
const BYTES_8: u8 = 0xCC;
const STRING_8: u8 = 0xD0;
const LIST_8: u8 = 0xD4;
const MAP_8: u8 = 0xD8;

/// Collections and strings larger than this cannot be expressed on the wire.
const MAX_WIRE_LEN: usize = i32::MAX as usize;

/// An in-memory PackStream message under construction.
///
/// Fixed-size values cannot fail to encode; only oversized strings,
/// byte arrays, and collections are rejected.
#[derive(Debug, Default)]
pub(crate) struct PackstreamBuffer {
    bytes: Vec<u8>,
}

impl PackstreamBuffer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub(crate) fn put_null(&mut self) {
        self.bytes.push(NULL);
    }

    pub(crate) fn put_bool(&mut self, b: bool) {
        self.bytes.push(if b { TRUE } else { FALSE });
    }

    /// Writes the narrowest encoding that can hold `i`.
    pub(crate) fn put_int(&mut self, i: i64) {
        match i {
            -16..=127 => self.bytes.push(i as u8),
            -128..=127 => {
                self.bytes.push(INT_8);
                self.bytes.push(i as u8);
            }
            -32_768..=32_767 => {
                self.bytes.push(INT_16);
                self.bytes.extend((i as i16).to_be_bytes());
            }
            -2_147_483_648..=2_147_483_647 => {
                self.bytes.push(INT_32);
                self.bytes.extend((i as i32).to_be_bytes());
            }
            _ => {
                self.bytes.push(INT_64);
                self.bytes.extend(i.to_be_bytes());
            }
        }
    }

    pub(crate) fn put_float(&mut self, f: f64) {
        self.bytes.push(FLOAT);
        self.bytes.extend(f.to_be_bytes());
    }

    pub(crate) fn put_string(&mut self, s: &str) -> Result<(), SerializeError> {
        self.put_sized_marker(TINY_STRING, STRING_8, s.len(), "string")?;
        self.bytes.extend_from_slice(s.as_bytes());
        Ok(())
    }

    pub(crate) fn put_bytes(&mut self, b: &[u8]) -> Result<(), SerializeError> {
        // byte arrays have no tiny variant
        if b.len() > MAX_WIRE_LEN {
            return Err(SerializeError::too_large("byte array", MAX_WIRE_LEN));
        }
        self.put_wide_len(BYTES_8, b.len());
        self.bytes.extend_from_slice(b);
        Ok(())
    }

    pub(crate) fn put_list_header(&mut self, len: usize) -> Result<(), SerializeError> {
        self.put_sized_marker(TINY_LIST, LIST_8, len, "list")
    }

    pub(crate) fn put_map_header(&mut self, len: usize) -> Result<(), SerializeError> {
        self.put_sized_marker(TINY_MAP, MAP_8, len, "map")
    }

    pub(crate) fn put_struct_header(&mut self, tag: u8, len: u8) -> Result<(), SerializeError> {
        if len > 15 {
            return Err(SerializeError::too_large("structure", 15));
        }
        self.bytes.push(TINY_STRUCT | len);
        self.bytes.push(tag);
        Ok(())
    }

    pub(crate) fn put_string_list<S: AsRef<str>>(
        &mut self,
        items: impl ExactSizeIterator<Item = S>,
    ) -> Result<(), SerializeError> {
        self.put_list_header(items.len())?;
        for item in items {
            self.put_string(item.as_ref())?;
        }
        Ok(())
    }

    pub(crate) fn put_map(
        &mut self,
        codec: &impl ValueCodec,
        map: &HashMap<String, ValueSend>,
    ) -> Result<(), SerializeError> {
        self.put_map_header(map.len())?;
        for (key, value) in map {
            self.put_string(key)?;
            codec.encode(self, value)?;
        }
        Ok(())
    }

    /// Starts a map whose entry count isn't known upfront.
    /// Limited to 15 entries (the message extras this is used for stay well
    /// below that); the marker is patched when the writer is finished.
    pub(crate) fn tiny_map(&mut self) -> TinyMapWriter<'_> {
        let marker_at = self.bytes.len();
        self.bytes.push(TINY_MAP);
        TinyMapWriter {
            buf: self,
            marker_at,
            entries: 0,
        }
    }

    fn put_sized_marker(
        &mut self,
        tiny_base: u8,
        wide_base: u8,
        len: usize,
        what: &str,
    ) -> Result<(), SerializeError> {
        if len <= 15 {
            self.bytes.push(tiny_base | len as u8);
        } else if len <= MAX_WIRE_LEN {
            self.put_wide_len(wide_base, len);
        } else {
            return Err(SerializeError::too_large(what, MAX_WIRE_LEN));
        }
        Ok(())
    }

    /// `base` is the 8-bit-length marker; its 16- and 32-bit siblings are
    /// the following marker values.
    fn put_wide_len(&mut self, base: u8, len: usize) {
        if len <= u8::MAX as usize {
            self.bytes.push(base);
            self.bytes.push(len as u8);
        } else if len <= u16::MAX as usize {
            self.bytes.push(base + 1);
            self.bytes.extend((len as u16).to_be_bytes());
        } else {
            self.bytes.push(base + 2);
            self.bytes.extend((len as u32).to_be_bytes());
        }
    }
}

/// Writes the entries of a map started with [`PackstreamBuffer::tiny_map()`]
/// and counts them; skipping an entry is as easy as not writing it.
pub(crate) struct TinyMapWriter<'a> {
    buf: &'a mut PackstreamBuffer,
    marker_at: usize,
    entries: u8,
}

impl TinyMapWriter<'_> {
    pub(crate) fn entry_string(&mut self, key: &str, value: &str) -> Result<(), SerializeError> {
        self.key(key)?;
        self.buf.put_string(value)
    }

    pub(crate) fn entry_int(&mut self, key: &str, value: i64) -> Result<(), SerializeError> {
        self.key(key)?;
        self.buf.put_int(value);
        Ok(())
    }

    pub(crate) fn entry_string_list<S: AsRef<str>>(
        &mut self,
        key: &str,
        values: impl ExactSizeIterator<Item = S>,
    ) -> Result<(), SerializeError> {
        self.key(key)?;
        self.buf.put_string_list(values)
    }

    pub(crate) fn entry_map(
        &mut self,
        key: &str,
        codec: &impl ValueCodec,
        map: &HashMap<String, ValueSend>,
    ) -> Result<(), SerializeError> {
        self.key(key)?;
        self.buf.put_map(codec, map)
    }

    pub(crate) fn entry_value(
        &mut self,
        key: &str,
        codec: &impl ValueCodec,
        value: &ValueSend,
    ) -> Result<(), SerializeError> {
        self.key(key)?;
        codec.encode(self.buf, value)
    }

    /// Escape hatch for entries with version-specific value layouts.
    pub(crate) fn entry_raw(
        &mut self,
        key: &str,
        write: impl FnOnce(&mut PackstreamBuffer) -> Result<(), SerializeError>,
    ) -> Result<(), SerializeError> {
        self.key(key)?;
        write(self.buf)
    }

    pub(crate) fn end(self) {
        self.buf.bytes[self.marker_at] = TINY_MAP | self.entries;
    }

    fn key(&mut self, key: &str) -> Result<(), SerializeError> {
        if self.entries >= 15 {
            return Err(SerializeError::too_large("inline map", 15));
        }
        self.entries += 1;
        self.buf.put_string(key)
    }
}
