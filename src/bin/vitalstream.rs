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

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use dotenv::dotenv;
use tokio::{runtime, signal};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;
use vitalstream::service::TracingConfig;
use vitalstream::{
    global_config, setup_tracing, AppConfig, AppError, AppResult, FileRangeReader,
    FileSeriesStore, Ingestor, JobContext, MemoryJobTracker, MetricClassifier, MetricKind,
    RangedSource, StreamSource, GLOBAL_CONFIG,
};

#[derive(Parser)]
#[command(version, about = "Extracts health metrics from XML exports")]
pub struct CommandLine {
    /// path to config file, `./conf.toml` when present
    #[arg(short, long)]
    pub conf: Option<String>,
    #[command(subcommand)]
    pub command: Command,
    /// log level (v: debug, vv: trace); RUST_LOG wins when set
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand)]
pub enum Command {
    /// Extract an export and merge it into the owner's stored series
    Ingest(IngestArgs),
    /// Print the effective configuration as JSON
    PrintConfig,
}

#[derive(Args)]
pub struct IngestArgs {
    /// export file, or `-` for stdin
    pub input: String,
    #[arg(long)]
    pub owner: String,
    /// defaults to a random id
    #[arg(long)]
    pub job_id: Option<String>,
    /// restrict to these metrics (repeatable), e.g. `heartRate`
    #[arg(long = "metric")]
    pub metrics: Vec<String>,
    /// overrides `extract.chunk_size`
    #[arg(long)]
    pub chunk_size: Option<usize>,
}

fn main() -> AppResult<()> {
    dotenv().ok();
    let commandline = CommandLine::parse();

    let mut app_config = match &commandline.conf {
        Some(path) => AppConfig::set_up_config(PathBuf::from(path))?,
        None => AppConfig::set_up_optional_config(PathBuf::from("./conf.toml"))?,
    };
    if let Command::Ingest(IngestArgs {
        chunk_size: Some(chunk_size),
        ..
    }) = &commandline.command
    {
        app_config.extract.chunk_size = *chunk_size;
        app_config.validate()?;
    }
    GLOBAL_CONFIG
        .set(app_config)
        .map_err(|_| AppError::IllegalStateError("config already set".to_string()))?;

    let rt = runtime::Builder::new_multi_thread().enable_all().build()?;
    let tracing_config = TracingConfig {
        level: match commandline.verbose {
            0 => global_config().tracing.level.clone(),
            1 => "debug".to_string(),
            _ => "trace".to_string(),
        },
        ..global_config().tracing.clone()
    };
    let _tracing_guard = rt.block_on(setup_tracing(&tracing_config))?;

    match commandline.command {
        Command::PrintConfig => {
            println!("{}", serde_json::to_string_pretty(global_config())?);
            Ok(())
        }
        Command::Ingest(args) => rt.block_on(ingest(args)),
    }
}

async fn ingest(args: IngestArgs) -> AppResult<()> {
    let config = global_config();
    let metrics = args
        .metrics
        .iter()
        .map(|name| name.parse::<MetricKind>())
        .collect::<AppResult<Vec<_>>>()?;

    let tracker = Arc::new(MemoryJobTracker::new());
    let store = FileSeriesStore::new(&config.storage.series_dir);
    let ingestor = Ingestor::new(
        config.clone(),
        tracker,
        store,
        MetricClassifier::only(metrics),
    );
    let job = JobContext::new(
        args.job_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
        args.owner,
    );
    info!(job_id = %job.job_id, input = %args.input, "starting ingestion");

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            warn!("interrupted, cancelling the job");
            on_interrupt.cancel();
        }
    });

    let chunk_size = config.extract.chunk_size;
    let summary = if args.input == "-" {
        let source = StreamSource::from_reader(tokio::io::stdin(), chunk_size);
        ingestor.ingest(job, source, cancel).await?
    } else {
        let source = RangedSource::new(FileRangeReader::new(&args.input), chunk_size);
        ingestor.ingest(job, source, cancel).await?
    };

    println!("{}", serde_json::to_string_pretty(&summary.merged)?);
    Ok(())
}
