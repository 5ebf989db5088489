// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Chunk sources for one large export file.
//!
//! This module provides:
//! - The `ChunkSource` contract consumed by the extraction pipeline
//! - Ranged sources over anything implementing `RangeReader` (memory, local files, remote storage)
//! - A stream source for data that can only be read front to back

mod file;
mod ranged;
mod stream;

use std::fmt;
use std::future::Future;

use bytes::Bytes;

pub use file::FileRangeReader;
pub use ranged::{RangeReader, RangedSource};
pub use stream::StreamSource;

/// Default chunk size: 16 MiB per fetch.
pub const DEFAULT_CHUNK_SIZE: usize = 16 * 1024 * 1024;

/// One contiguous piece of the source file, in file order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    /// Position of this chunk in the sequence, starting at 0.
    pub ordinal: u64,
    /// Byte offset of `data[0]` within the source file.
    pub offset: u64,
    pub data: Bytes,
}

impl Chunk {
    pub fn new(ordinal: u64, offset: u64, data: Bytes) -> Self {
        Chunk {
            ordinal,
            offset,
            data,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Inclusive byte range of one fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        ByteRange { start, end }
    }

    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bytes={}-{}", self.start, self.end)
    }
}

/// A failed read against the underlying storage.
///
/// Most failures are transient and worth another attempt. A source that cannot
/// re-read the failed bytes marks the error as not retryable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("fetch failed ({}): {reason}", describe_range(.range))]
pub struct FetchError {
    /// The range that was attempted, `None` for metadata lookups and stream reads.
    pub range: Option<ByteRange>,
    pub reason: String,
    pub retryable: bool,
}

impl FetchError {
    pub fn new(range: Option<ByteRange>, reason: impl Into<String>) -> Self {
        FetchError {
            range,
            reason: reason.into(),
            retryable: true,
        }
    }

    pub fn for_range(range: ByteRange, reason: impl Into<String>) -> Self {
        Self::new(Some(range), reason)
    }

    /// A failure that another attempt cannot repair, e.g. bytes lost from a stream.
    pub fn fatal(range: Option<ByteRange>, reason: impl Into<String>) -> Self {
        FetchError {
            retryable: false,
            ..Self::new(range, reason)
        }
    }
}

fn describe_range(range: &Option<ByteRange>) -> String {
    match range {
        Some(range) => range.to_string(),
        None => "no range".to_string(),
    }
}

/// An ordered, non-seekable sequence of chunks for one file.
///
/// A failed `next_chunk` must not advance the source: calling it again retries
/// the same bytes. A source that cannot do that returns a non-retryable error.
/// Returning `Ok(None)` means the file is exhausted.
pub trait ChunkSource: Send + 'static {
    /// Total length in bytes, if known. May cost one metadata round trip.
    fn size(&mut self) -> impl Future<Output = Result<Option<u64>, FetchError>> + Send;

    fn next_chunk(&mut self) -> impl Future<Output = Result<Option<Chunk>, FetchError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_error_names_the_range() {
        let err = FetchError::for_range(ByteRange::new(10, 19), "connection reset");
        assert_eq!(
            err.to_string(),
            "fetch failed (bytes=10-19): connection reset"
        );
        assert_eq!(err.range.map(|r| r.len()), Some(10));

        let err = FetchError::new(None, "head request failed");
        assert_eq!(err.to_string(), "fetch failed (no range): head request failed");
        assert!(err.retryable);
        assert!(!FetchError::fatal(None, "stream closed").retryable);
    }
}
