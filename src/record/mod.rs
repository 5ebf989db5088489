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

//! `<Record>` elements: reassembly from chunks and parsing into health data points.
//!
//! Boundary detection searches for literal markers. That is sound only because the
//! export format keeps `<Record>` elements flat (never nested); a nested grammar
//! would need a real streaming tokenizer.

mod parser;
mod reassembler;

use std::str::Utf8Error;

use bytes::Bytes;
use chrono::{DateTime, FixedOffset};

pub use parser::{parse_record, parse_timestamp, ParseError};
pub use reassembler::{ReassemblyStats, RecordReassembler, DEFAULT_MAX_CARRY_BYTES};

const RECORD_OPEN: &[u8] = b"<Record";
const RECORD_CLOSE: &[u8] = b"</Record>";

/// One complete, self-delimited `<Record>` element exactly as it appeared in the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecord {
    /// Byte offset of the leading `<` in the source file.
    pub offset: u64,
    pub bytes: Bytes,
}

impl RawRecord {
    pub fn new(offset: u64, bytes: Bytes) -> Self {
        RawRecord { offset, bytes }
    }

    pub fn as_str(&self) -> Result<&str, Utf8Error> {
        std::str::from_utf8(&self.bytes)
    }
}

/// A typed measurement taken from one record.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthRecord {
    /// The source `type` attribute, verbatim.
    pub record_type: String,
    pub value: f64,
    /// Normalized UTC timestamp, `YYYY-MM-DDTHH:MM:SSZ`.
    pub date: String,
    pub source_name: String,
    pub unit: Option<String>,
    pub start_time: DateTime<FixedOffset>,
    pub end_time: Option<DateTime<FixedOffset>>,
}
