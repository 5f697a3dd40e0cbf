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

//! Bolt message framing: a message travels as a sequence of chunks, each a
//! 2-byte big-endian length followed by that many payload bytes, terminated
//! by a zero-length chunk. Zero-length chunks outside a message are
//! keep-alive NOOPs.
//!
//! The sync and async transports share the outgoing framing; only reading is
//! transport-specific (see [`crate::aio`] for the async side).

use std::io::{self, Read};

use log::trace;

pub(crate) const MAX_CHUNK_SIZE: usize = u16::MAX as usize;

/// Frames a message into its wire bytes: chunks of at most
/// [`MAX_CHUNK_SIZE`] bytes plus the terminator.
pub(crate) fn chunk_message(payload: &[u8]) -> Vec<u8> {
    let overhead = 2 * (payload.len() / MAX_CHUNK_SIZE + 2);
    let mut wire = Vec::with_capacity(payload.len() + overhead);

    for chunk in payload.chunks(MAX_CHUNK_SIZE) {
        wire.extend((chunk.len() as u16).to_be_bytes());
        wire.extend_from_slice(chunk);
    }
    wire.extend([0, 0]); // terminator
    wire
}

/// Reads and reassembles one message from the stream, consuming any NOOP
/// chunks in front of it.
pub(crate) fn read_message(reader: &mut impl Read) -> io::Result<Vec<u8>> {
    let mut message = Vec::new();
    loop {
        let mut header = [0u8; 2];
        reader.read_exact(&mut header)?;
        let chunk_len = u16::from_be_bytes(header) as usize;
        if chunk_len == 0 {
            if message.is_empty() {
                trace!("S: <NOOP>");
                continue;
            }
            break;
        }
        let chunk_start = message.len();
        message.resize(chunk_start + chunk_len, 0);
        reader.read_exact(&mut message[chunk_start..])?;
        trace!("S: <RAW> {:02X?}", &message[chunk_start..]);
    }
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn dechunk(mut wire: &[u8]) -> Vec<u8> {
        read_message(&mut wire).unwrap()
    }

    #[test]
    fn single_chunk_message() {
        init_logging();
        assert_eq!(chunk_message(&[1, 2, 3]), vec![0, 3, 1, 2, 3, 0, 0]);
    }

    #[test]
    fn empty_message_is_just_the_terminator() {
        assert_eq!(chunk_message(&[]), vec![0, 0]);
    }

    #[test]
    fn oversized_message_is_split() {
        let payload = vec![0xAB; MAX_CHUNK_SIZE + 1];
        let wire = chunk_message(&payload);
        assert_eq!(&wire[..2], &u16::MAX.to_be_bytes());
        let tail = &wire[2 + MAX_CHUNK_SIZE..];
        assert_eq!(tail, &[0, 1, 0xAB, 0, 0]);

        // the sum of all chunk length fields equals the payload length
        let mut rest = &wire[..];
        let mut total = 0;
        while !rest.is_empty() {
            let chunk_len = u16::from_be_bytes([rest[0], rest[1]]) as usize;
            total += chunk_len;
            rest = &rest[2 + chunk_len..];
        }
        assert_eq!(total, payload.len());
    }

    #[test]
    fn chunking_round_trip() {
        init_logging();
        for payload in [
            vec![42],
            (0..=255).collect::<Vec<u8>>(),
            vec![7; MAX_CHUNK_SIZE * 2 + 17],
        ] {
            assert_eq!(dechunk(&chunk_message(&payload)), payload);
        }
    }

    #[test]
    fn reading_skips_noop_chunks() {
        assert_eq!(dechunk(&[0, 0, 0, 0, 0, 2, 1, 2, 0, 0]), vec![1, 2]);
    }

    #[test]
    fn reading_joins_chunks() {
        assert_eq!(dechunk(&[0, 1, 1, 0, 2, 2, 3, 0, 0]), vec![1, 2, 3]);
    }

    #[test]
    fn truncated_chunk_fails() {
        let mut wire: &[u8] = &[0, 3, 1];
        assert!(read_message(&mut wire).is_err());
    }
}
