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
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use dashmap::DashMap;
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, trace};

use super::MetricSeries;
use crate::metric::MetricKind;
use crate::{AppError, AppResult};

/// Where merged series live, one document per owner and metric.
pub trait SeriesStore: Send + Sync + 'static {
    /// A missing document is an empty series.
    fn load(
        &self,
        owner_id: &str,
        metric: MetricKind,
    ) -> impl Future<Output = AppResult<MetricSeries>> + Send;

    /// Replaces the stored document.
    fn save(
        &self,
        owner_id: &str,
        metric: MetricKind,
        series: &MetricSeries,
    ) -> impl Future<Output = AppResult<()>> + Send;
}

#[derive(Debug, Default)]
pub struct MemorySeriesStore {
    series: DashMap<(String, MetricKind), MetricSeries>,
}

impl MemorySeriesStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }
}

impl SeriesStore for MemorySeriesStore {
    async fn load(&self, owner_id: &str, metric: MetricKind) -> AppResult<MetricSeries> {
        Ok(self
            .series
            .get(&(owner_id.to_string(), metric))
            .map(|entry| entry.value().clone())
            .unwrap_or_default())
    }

    async fn save(&self, owner_id: &str, metric: MetricKind, series: &MetricSeries) -> AppResult<()> {
        self.series
            .insert((owner_id.to_string(), metric), series.clone());
        Ok(())
    }
}

/// JSON documents at `<dir>/<owner>/<metric>.json`.
///
/// Saves go to a sibling temp file that is synced and then renamed over the
/// document, so a reader never sees a half-written series.
#[derive(Debug, Clone)]
pub struct FileSeriesStore {
    dir: PathBuf,
}

impl FileSeriesStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        FileSeriesStore {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn owner_dir(&self, owner_id: &str) -> AppResult<PathBuf> {
        let invalid = owner_id.is_empty()
            || owner_id == "."
            || owner_id == ".."
            || owner_id.contains(['/', '\\', '\0']);
        if invalid {
            return Err(AppError::InvalidValue(format!("owner id `{}`", owner_id)));
        }
        Ok(self.dir.join(owner_id))
    }

    pub fn series_path(&self, owner_id: &str, metric: MetricKind) -> AppResult<PathBuf> {
        Ok(self
            .owner_dir(owner_id)?
            .join(format!("{}.json", metric.as_str())))
    }
}

fn persistence(path: &Path, e: impl std::fmt::Display) -> AppError {
    AppError::Persistence(format!("{}: {}", path.display(), e))
}

impl SeriesStore for FileSeriesStore {
    async fn load(&self, owner_id: &str, metric: MetricKind) -> AppResult<MetricSeries> {
        let path = self.series_path(owner_id, metric)?;
        trace!("load series from {}", path.display());
        let contents = match fs::read(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(owner_id, %metric, "no stored series yet");
                return Ok(MetricSeries::new());
            }
            Err(e) => return Err(persistence(&path, e)),
        };
        serde_json::from_slice(&contents).map_err(|e| persistence(&path, e))
    }

    async fn save(&self, owner_id: &str, metric: MetricKind, series: &MetricSeries) -> AppResult<()> {
        let path = self.series_path(owner_id, metric)?;
        let owner_dir = self.owner_dir(owner_id)?;
        fs::create_dir_all(&owner_dir)
            .await
            .map_err(|e| persistence(&owner_dir, e))?;

        let contents = serde_json::to_vec_pretty(series).map_err(|e| persistence(&path, e))?;
        let tmp_path = path.with_extension("json.tmp");
        let write = async {
            let file = OpenOptions::new()
                .create(true)
                .truncate(true)
                .write(true)
                .open(&tmp_path)
                .await?;
            let mut buf_writer = BufWriter::new(file);
            buf_writer.write_all(&contents).await?;
            buf_writer.flush().await?;
            buf_writer.get_ref().sync_all().await?;
            fs::rename(&tmp_path, &path).await
        };
        if let Err(e) = write.await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(persistence(&path, e));
        }
        debug!(owner_id, %metric, points = series.len(), "saved series to {}", path.display());
        Ok(())
    }
}
