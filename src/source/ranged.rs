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

use std::future::Future;

use bytes::Bytes;
use tracing::trace;

use super::{ByteRange, Chunk, ChunkSource, FetchError};

/// Random-access reads against some storage: an object store, a local file, memory.
pub trait RangeReader: Send + Sync + 'static {
    /// Total object length (a HEAD / metadata call for remote storage).
    fn len(&self) -> impl Future<Output = Result<u64, FetchError>> + Send;

    /// Reads the inclusive range `[start, end]`.
    fn read_range(
        &self,
        range: ByteRange,
    ) -> impl Future<Output = Result<Bytes, FetchError>> + Send;
}

impl RangeReader for Bytes {
    async fn len(&self) -> Result<u64, FetchError> {
        Ok(Bytes::len(self) as u64)
    }

    async fn read_range(&self, range: ByteRange) -> Result<Bytes, FetchError> {
        let total = Bytes::len(self) as u64;
        if range.start > range.end || range.end >= total {
            return Err(FetchError::for_range(
                range,
                format!("range outside object of {} bytes", total),
            ));
        }
        Ok(self.slice(range.start as usize..=range.end as usize))
    }
}

/// Walks a `RangeReader` front to back in fixed-size ranges.
///
/// `next_start` only moves after a successful, complete read, so a retry after a
/// failure asks for exactly the same range again.
#[derive(Debug)]
pub struct RangedSource<R> {
    reader: R,
    chunk_size: u64,
    total: Option<u64>,
    next_start: u64,
    next_ordinal: u64,
}

impl<R: RangeReader> RangedSource<R> {
    pub fn new(reader: R, chunk_size: usize) -> Self {
        RangedSource {
            reader,
            chunk_size: chunk_size.max(1) as u64,
            total: None,
            next_start: 0,
            next_ordinal: 0,
        }
    }

    /// Skips the metadata round trip when the caller already knows the length.
    pub fn with_known_size(mut self, total: u64) -> Self {
        self.total = Some(total);
        self
    }

    pub fn position(&self) -> u64 {
        self.next_start
    }

    async fn total(&mut self) -> Result<u64, FetchError> {
        match self.total {
            Some(total) => Ok(total),
            None => {
                let total = self.reader.len().await?;
                self.total = Some(total);
                Ok(total)
            }
        }
    }
}

impl<R: RangeReader> ChunkSource for RangedSource<R> {
    async fn size(&mut self) -> Result<Option<u64>, FetchError> {
        self.total().await.map(Some)
    }

    async fn next_chunk(&mut self) -> Result<Option<Chunk>, FetchError> {
        let total = self.total().await?;
        if self.next_start >= total {
            return Ok(None);
        }
        let end = (self.next_start + self.chunk_size).min(total) - 1;
        let range = ByteRange::new(self.next_start, end);

        let data = self.reader.read_range(range).await?;
        if data.len() as u64 != range.len() {
            return Err(FetchError::for_range(
                range,
                format!("short read: got {} of {} bytes", data.len(), range.len()),
            ));
        }

        trace!(%range, ordinal = self.next_ordinal, "fetched chunk");
        let chunk = Chunk::new(self.next_ordinal, range.start, data);
        self.next_start = end + 1;
        self.next_ordinal += 1;
        Ok(Some(chunk))
    }
}
