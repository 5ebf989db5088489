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

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use bytes::Bytes;

use super::{ByteRange, FetchError, RangeReader};

/// Ranged reads against a local file.
///
/// Each read opens the file, seeks and reads on the blocking pool, so the reader
/// holds no descriptor between chunks.
#[derive(Debug, Clone)]
pub struct FileRangeReader {
    path: PathBuf,
}

impl FileRangeReader {
    pub fn new(path: impl AsRef<Path>) -> Self {
        FileRangeReader {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RangeReader for FileRangeReader {
    async fn len(&self) -> Result<u64, FetchError> {
        let metadata = tokio::fs::metadata(&self.path).await.map_err(|e| {
            FetchError::new(None, format!("stat {}: {}", self.path.display(), e))
        })?;
        Ok(metadata.len())
    }

    async fn read_range(&self, range: ByteRange) -> Result<Bytes, FetchError> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            let mut file = File::open(&path)?;
            file.seek(SeekFrom::Start(range.start))?;
            let mut buf = Vec::with_capacity(range.len() as usize);
            file.take(range.len()).read_to_end(&mut buf)?;
            Ok::<_, std::io::Error>(Bytes::from(buf))
        })
        .await
        .map_err(|e| FetchError::for_range(range, format!("read task failed: {}", e)))?
        .map_err(|e| FetchError::for_range(range, e.to_string()))
    }
}
