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

//! The async side of the message framing. Writing reuses
//! [`chunk_message`](`crate::driver::io::bolt::chunk::chunk_message`) from
//! the blocking transport (a message's wire bytes don't care who sends
//! them); only reading needs an async implementation.

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error_::{DriverError, Result};

/// Reads and reassembles one message from the stream, consuming any NOOP
/// chunks in front of it.
pub(super) async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Vec<u8>> {
    let mut message = Vec::new();
    loop {
        let mut header = [0u8; 2];
        DriverError::wrap_read(reader.read_exact(&mut header).await.map(drop))?;
        let chunk_len = u16::from_be_bytes(header) as usize;
        if chunk_len == 0 {
            if message.is_empty() {
                // NOOP (keep-alive) chunk between messages
                continue;
            }
            break;
        }
        let chunk_start = message.len();
        message.resize(chunk_start + chunk_len, 0);
        DriverError::wrap_read(
            reader
                .read_exact(&mut message[chunk_start..])
                .await
                .map(drop),
        )?;
    }
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Cursor;

    use crate::driver::io::bolt::chunk::{chunk_message, MAX_CHUNK_SIZE};

    async fn read(wire: Vec<u8>) -> Result<Vec<u8>> {
        read_message(&mut Cursor::new(wire)).await
    }

    #[tokio::test]
    async fn read_single_chunk_message() {
        assert_eq!(
            read(vec![0, 3, 1, 2, 3, 0, 0]).await.unwrap(),
            vec![1, 2, 3]
        );
    }

    #[tokio::test]
    async fn read_skips_noop_chunks() {
        assert_eq!(
            read(vec![0, 0, 0, 0, 0, 2, 1, 2, 0, 0]).await.unwrap(),
            vec![1, 2]
        );
    }

    #[tokio::test]
    async fn read_joins_chunks() {
        assert_eq!(
            read(vec![0, 1, 1, 0, 2, 2, 3, 0, 0]).await.unwrap(),
            vec![1, 2, 3]
        );
    }

    #[tokio::test]
    async fn truncated_message_fails() {
        assert!(read(vec![0, 3, 1]).await.is_err());
    }

    #[tokio::test]
    async fn wire_format_matches_the_blocking_transport() {
        for payload in [
            vec![42u8],
            (0..=255).collect::<Vec<u8>>(),
            vec![7; MAX_CHUNK_SIZE * 2 + 17],
        ] {
            assert_eq!(read(chunk_message(&payload)).await.unwrap(), payload);
        }
    }
}
