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

use bytes::{Buf, BytesMut};
use tracing::{debug, trace, warn};

use super::{RawRecord, RECORD_CLOSE, RECORD_OPEN};
use crate::AppError;

/// Default cap on bytes held while waiting for a record terminator.
pub const DEFAULT_MAX_CARRY_BYTES: usize = 8 * 1024 * 1024;

/// Counters for one reassembly run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReassemblyStats {
    pub bytes_in: u64,
    pub records: u64,
    /// bytes outside any record (prolog, other elements, whitespace)
    pub bytes_skipped: u64,
    /// record starts abandoned because another record began before their end tag
    pub unterminated_skipped: u64,
    pub overflow_trims: u64,
    /// bytes of an unterminated record still pending when the input ended
    pub truncated_tail_bytes: u64,
}

/// Turns an ordered run of chunks into complete `<Record>` elements.
///
/// Chunks are appended to a carry buffer; every call to `next_record` looks for the
/// earliest complete element in it, much like a frame decoder looks for a complete
/// frame. The output only depends on the bytes, never on where chunk boundaries fell.
#[derive(Debug)]
pub struct RecordReassembler {
    carry: BytesMut,
    /// file offset of `carry[0]`
    carry_offset: u64,
    max_carry_bytes: usize,
    stats: ReassemblyStats,
}

impl Default for RecordReassembler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CARRY_BYTES)
    }
}

impl RecordReassembler {
    pub fn new(max_carry_bytes: usize) -> Self {
        RecordReassembler {
            carry: BytesMut::with_capacity(4 * 1024),
            carry_offset: 0,
            // must at least hold a split start marker
            max_carry_bytes: max_carry_bytes.max(RECORD_OPEN.len()),
            stats: ReassemblyStats::default(),
        }
    }

    /// Appends the next piece of the file.
    pub fn push(&mut self, data: &[u8]) {
        self.carry.extend_from_slice(data);
        self.stats.bytes_in += data.len() as u64;
    }

    /// Bytes currently held back for the next chunk.
    pub fn carry_len(&self) -> usize {
        self.carry.len()
    }

    pub fn stats(&self) -> ReassemblyStats {
        self.stats
    }

    /// Returns the next complete record, or `None` when more input is needed.
    pub fn next_record(&mut self) -> Option<RawRecord> {
        let mut abandoned = 0;
        let scan = scan(&self.carry, &mut abandoned);
        if abandoned > 0 {
            debug!(
                offset = self.carry_offset,
                abandoned, "skipping record start(s) without an end tag"
            );
            self.stats.unterminated_skipped += abandoned;
        }

        match scan {
            Scan::Complete { start, end } => {
                self.discard(start);
                let len = end - start;
                let record = RawRecord::new(self.carry_offset, self.carry.split_to(len).freeze());
                self.carry_offset += len as u64;
                self.stats.records += 1;
                Some(record)
            }
            Scan::Incomplete { start } => {
                self.discard(start);
                self.enforce_cap();
                None
            }
            Scan::NoRecord { keep_from } => {
                self.discard(keep_from);
                None
            }
        }
    }

    /// Ends the input. An element that never closed is incomplete data and is dropped.
    pub fn finish(&mut self) -> ReassemblyStats {
        if !self.carry.is_empty() {
            let len = self.carry.len() as u64;
            if find(&self.carry, RECORD_OPEN).is_some() {
                debug!(
                    offset = self.carry_offset,
                    len, "input ended inside a record, dropping the fragment"
                );
                self.stats.truncated_tail_bytes += len;
            } else {
                self.stats.bytes_skipped += len;
            }
            self.carry_offset += len;
            self.carry.clear();
        }
        self.stats
    }

    fn discard(&mut self, n: usize) {
        if n == 0 {
            return;
        }
        self.carry.advance(n);
        self.carry_offset += n as u64;
        self.stats.bytes_skipped += n as u64;
    }

    /// Called while `carry[0]` starts a record whose end has not arrived.
    fn enforce_cap(&mut self) {
        let len = self.carry.len();
        if len <= self.max_carry_bytes {
            return;
        }
        warn!(
            offset = self.carry_offset,
            error = %AppError::BufferOverflow { len, max: self.max_carry_bytes },
            "trimming carry buffer"
        );
        self.stats.overflow_trims += 1;

        let fallback = rfind(&self.carry[1..], RECORD_OPEN).map(|i| i + 1);
        match fallback {
            Some(start) if len - start <= self.max_carry_bytes => self.discard(start),
            _ => {
                let keep = split_marker_len(&self.carry);
                self.discard(len - keep);
            }
        }
        trace!(carry = self.carry.len(), "carry buffer after trim");
    }
}

enum Scan {
    /// a full element occupies `start..end`
    Complete { start: usize, end: usize },
    /// an element starts at `start`, its end has not arrived yet
    Incomplete { start: usize },
    /// no element starts in the buffer; bytes from `keep_from` may begin a split marker
    NoRecord { keep_from: usize },
}

enum Marker {
    At(usize),
    /// `<Record` right at the end of the buffer, the next byte decides
    Undecided(usize),
    None { searched_from: usize },
}

fn scan(buf: &[u8], abandoned: &mut u64) -> Scan {
    let mut from = 0;
    loop {
        let start = match next_marker(buf, from) {
            Marker::At(start) => start,
            Marker::Undecided(start) => return Scan::Incomplete { start },
            Marker::None { searched_from } => {
                return Scan::NoRecord {
                    keep_from: buf.len() - split_marker_len(&buf[searched_from..]),
                }
            }
        };
        let name_end = start + RECORD_OPEN.len();
        // the opening tag cannot run into the next record; a stray quote must not
        // swallow everything after it
        let next = next_marker(buf, name_end);
        let limit = match next {
            Marker::At(next) | Marker::Undecided(next) => next,
            Marker::None { .. } => buf.len(),
        };
        let Some(tag_end) = find_tag_end(&buf[name_end..limit]).map(|i| name_end + i) else {
            if let Marker::At(next) = next {
                *abandoned += 1;
                from = next;
                continue;
            }
            return Scan::Incomplete { start };
        };
        if buf[tag_end - 1] == b'/' {
            return Scan::Complete {
                start,
                end: tag_end + 1,
            };
        }

        let body = tag_end + 1;
        let close = find(&buf[body..], RECORD_CLOSE).map(|i| body + i);
        // records never nest: another record opening first means this start is broken
        if let Marker::At(_) = next_marker(&buf[..close.unwrap_or(buf.len())], body) {
            *abandoned += 1;
            from = body;
            continue;
        }
        return match close {
            Some(close) => Scan::Complete {
                start,
                end: close + RECORD_CLOSE.len(),
            },
            None => Scan::Incomplete { start },
        };
    }
}

fn next_marker(buf: &[u8], mut from: usize) -> Marker {
    loop {
        let Some(start) = find(&buf[from..], RECORD_OPEN).map(|i| from + i) else {
            return Marker::None {
                searched_from: from,
            };
        };
        let name_end = start + RECORD_OPEN.len();
        match buf.get(name_end) {
            None => return Marker::Undecided(start),
            Some(b) if is_name_end(*b) => return Marker::At(start),
            // `<RecordSomething`, a different element
            Some(_) => from = name_end,
        }
    }
}

fn is_name_end(b: u8) -> bool {
    b.is_ascii_whitespace() || b == b'>' || b == b'/'
}

/// Index of the `>` closing the opening tag, skipping quoted attribute values.
fn find_tag_end(buf: &[u8]) -> Option<usize> {
    let mut quote = None;
    for (i, &b) in buf.iter().enumerate() {
        match (quote, b) {
            (Some(q), _) if b == q => quote = None,
            (Some(_), _) => {}
            (None, b'"' | b'\'') => quote = Some(b),
            (None, b'>') => return Some(i),
            (None, _) => {}
        }
    }
    None
}

/// Length of the longest tail of `buf` that is a proper prefix of the start marker.
fn split_marker_len(buf: &[u8]) -> usize {
    (1..RECORD_OPEN.len())
        .rev()
        .find(|&k| buf.ends_with(&RECORD_OPEN[..k]))
        .unwrap_or(0)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn rfind(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).rposition(|w| w == needle)
}
