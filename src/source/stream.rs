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

use std::io;

use bytes::Bytes;
use tokio::io::AsyncRead;
use tokio_stream::{Stream, StreamExt};
use tokio_util::io::ReaderStream;

use super::{Chunk, ChunkSource, FetchError};

/// Chunks taken from an already open byte stream (a response body, stdin).
///
/// A stream cannot re-read a failed piece. The first read error is fatal and
/// sticky: every later `next_chunk` returns it again instead of reading on, so
/// bytes on either side of the gap are never joined and a closed stream is never
/// mistaken for the end of the file.
pub struct StreamSource<St> {
    stream: St,
    failed: Option<FetchError>,
    size_hint: Option<u64>,
    offset: u64,
    next_ordinal: u64,
}

impl<St> StreamSource<St>
where
    St: Stream<Item = io::Result<Bytes>> + Send + Unpin + 'static,
{
    pub fn new(stream: St) -> Self {
        StreamSource {
            stream,
            failed: None,
            size_hint: None,
            offset: 0,
            next_ordinal: 0,
        }
    }

    pub fn with_size_hint(mut self, size: u64) -> Self {
        self.size_hint = Some(size);
        self
    }
}

impl<Rd> StreamSource<ReaderStream<Rd>>
where
    Rd: AsyncRead + Send + Unpin + 'static,
{
    /// Reads `reader` in pieces of at most `chunk_size` bytes.
    pub fn from_reader(reader: Rd, chunk_size: usize) -> Self {
        StreamSource::new(ReaderStream::with_capacity(reader, chunk_size.max(1)))
    }
}

impl<St> ChunkSource for StreamSource<St>
where
    St: Stream<Item = io::Result<Bytes>> + Send + Unpin + 'static,
{
    async fn size(&mut self) -> Result<Option<u64>, FetchError> {
        Ok(self.size_hint)
    }

    async fn next_chunk(&mut self) -> Result<Option<Chunk>, FetchError> {
        if let Some(error) = &self.failed {
            return Err(error.clone());
        }
        while let Some(item) = self.stream.next().await {
            let data = match item {
                Ok(data) => data,
                Err(e) => {
                    let error = FetchError::fatal(
                        None,
                        format!("stream read at offset {}: {}", self.offset, e),
                    );
                    self.failed = Some(error.clone());
                    return Err(error);
                }
            };
            // empty frames carry nothing for the reassembler
            if data.is_empty() {
                continue;
            }
            let chunk = Chunk::new(self.next_ordinal, self.offset, data);
            self.offset += chunk.len() as u64;
            self.next_ordinal += 1;
            return Ok(Some(chunk));
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn numbers_stream_items_in_order() {
        let items = vec![
            Ok(Bytes::from_static(b"<Rec")),
            Ok(Bytes::new()),
            Ok(Bytes::from_static(b"ord/>")),
        ];
        let mut source = StreamSource::new(tokio_stream::iter(items)).with_size_hint(9);
        assert_eq!(source.size().await.unwrap(), Some(9));

        let first = source.next_chunk().await.unwrap().unwrap();
        let second = source.next_chunk().await.unwrap().unwrap();
        assert_eq!((first.ordinal, first.offset), (0, 0));
        assert_eq!((second.ordinal, second.offset), (1, 4));
        assert!(source.next_chunk().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn read_error_is_sticky() {
        let items = vec![
            Ok(Bytes::from_static(b"<Record a=\"1")),
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
            Ok(Bytes::from_static(b"2\"/>")),
        ];
        let mut source = StreamSource::new(tokio_stream::iter(items));
        assert!(source.next_chunk().await.unwrap().is_some());

        let first = source.next_chunk().await.unwrap_err();
        assert!(!first.retryable);
        assert!(first.reason.contains("offset 12"));
        // the bytes after the gap are never handed out
        assert_eq!(source.next_chunk().await.unwrap_err(), first);
    }

    #[tokio::test]
    async fn reader_source_respects_chunk_size() {
        let data: &'static [u8] = b"0123456789";
        let mut source = StreamSource::from_reader(data, 4);
        let mut sizes = Vec::new();
        while let Some(chunk) = source.next_chunk().await.unwrap() {
            sizes.push(chunk.len());
        }
        assert_eq!(sizes.iter().sum::<usize>(), 10);
        assert!(sizes.iter().all(|size| *size <= 4));
    }
}
