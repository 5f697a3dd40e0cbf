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

//! The PackStream encoding: type-tagged, self-describing binary values.
//!
//! Messages are always assembled in and parsed from memory (the chunking
//! layer delivers whole messages), so the encoder writes into an owned
//! buffer and the decoder walks a byte slice. Neither side touches sockets.

mod decode;
mod encode;
mod error;
#[cfg(test)]
mod tests;

pub(crate) use decode::PackstreamReader;
pub(crate) use encode::{PackstreamBuffer, TinyMapWriter};
pub(crate) use error::{DeserializeError, SerializeError};
