//! Sentinel-delimited codec for the file-retrieval sub-protocol
//!
//! A file stream sent by an agent looks like:
//!
//! ```text
//! FILE_TRANSFER_START              (exactly one read)
//! [ raw chunk ]*                   (up to 4096 bytes each)
//! [ final chunk containing FILE_TRANSFER_END as a substring ]
//! ```
//!
//! The end sentinel is stripped from the final chunk before the chunk is
//! persisted; bytes on either side of it are kept.
//!
//! Sentinel framing is inherently ambiguous: an end sentinel that straddles
//! two chunk boundaries is not detected, and payload bytes that happen to
//! contain the sentinel terminate the stream early. Both are properties of
//! the wire format the agents speak, so this decoder reproduces them
//! exactly; see the tests for the pinned behavior.

use bytes::{Bytes, BytesMut};
use thiserror::Error;

use crate::{FILE_TRANSFER_END, FILE_TRANSFER_START};

/// Errors raised while interpreting a file stream
#[derive(Error, Debug)]
pub enum TransferError {
    /// The agent answered with an error string instead of starting a stream
    #[error("{0}")]
    Refused(String),
}

/// Validate the first read of a file stream.
///
/// The start token is expected to arrive whole in a single read; anything
/// else is the agent's error message and is surfaced verbatim.
pub fn check_start(first_read: &[u8]) -> Result<(), TransferError> {
    if first_read == FILE_TRANSFER_START {
        Ok(())
    } else {
        Err(TransferError::Refused(
            String::from_utf8_lossy(first_read).into_owned(),
        ))
    }
}

/// One decoded step of a file stream
#[derive(Debug)]
pub struct TransferChunk {
    /// Payload bytes to persist for this step
    pub data: Bytes,
    /// True once the end sentinel has been seen; no further pushes expected
    pub complete: bool,
}

/// Streaming decoder for a sentinel-delimited file stream
///
/// Feed each read to [`push`](TransferDecoder::push) and persist the
/// returned bytes until a step reports `complete`.
#[derive(Debug, Default)]
pub struct TransferDecoder {
    complete: bool,
}

impl TransferDecoder {
    /// Create a new decoder
    pub fn new() -> Self {
        Self { complete: false }
    }

    /// Decode one chunk read from the connection.
    ///
    /// A chunk containing the end sentinel terminates the stream; every
    /// occurrence of the sentinel is removed from that chunk and the
    /// remaining bytes are returned for persisting.
    pub fn push(&mut self, chunk: &[u8]) -> TransferChunk {
        if self.complete {
            return TransferChunk {
                data: Bytes::new(),
                complete: true,
            };
        }

        if find_subsequence(chunk, FILE_TRANSFER_END).is_none() {
            return TransferChunk {
                data: Bytes::copy_from_slice(chunk),
                complete: false,
            };
        }

        self.complete = true;

        let mut out = BytesMut::with_capacity(chunk.len());
        let mut rest = chunk;
        while let Some(pos) = find_subsequence(rest, FILE_TRANSFER_END) {
            out.extend_from_slice(&rest[..pos]);
            rest = &rest[pos + FILE_TRANSFER_END.len()..];
        }
        out.extend_from_slice(rest);

        TransferChunk {
            data: out.freeze(),
            complete: true,
        }
    }

    /// Whether the end sentinel has been seen
    pub fn is_complete(&self) -> bool {
        self.complete
    }
}

/// Find the first occurrence of `needle` in `haystack`
fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}
