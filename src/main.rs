mod controller;
mod error;
mod http;
mod part;
mod partition;
mod progress;
mod rolling;
mod types;
mod units;
mod utils;
mod worker;

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use controller::{Downloader, StartResult};
use error::DownloadError;
use progress::{IndicatifSink, NullSink, ProgressSink};
use std::sync::Arc;
use types::{Args, DownloaderOptions};
use utils::{build_client, get_filename_from_url, init_tracing};

#[tokio::main]
async fn main() -> Result<(), DownloadError> {
    let args = Args::parse();

    init_tracing(args.log_level, args.debug);

    let output_path = args
        .output
        .unwrap_or_else(|| PathBuf::from(get_filename_from_url(&args.url)));

    info!(url = %args.url, output = ?output_path, "starting download");

    let client = build_client("rangedl/0.1.0")?;

    let mut options = DownloaderOptions::new(args.url.clone(), output_path.clone());
    options.chunk_size = args.chunk_size;
    options.max_retry = args.max_retry;
    options.max_thread_retry = args.max_thread_retry;
    options.timeout = args.timeout_secs.map(Duration::from_secs);
    options.continue_download = args.continue_download;
    options.show_progress_bar = !args.no_progress;
    options.transient = args.transient;
    options.thread_num = args.thread_num;
    options.max_thread_num = args.max_thread_num;
    options.desired_completion_time = Duration::from_secs(args.desired_completion_time);
    options.headers = args.headers.into_iter().collect();
    options.log = !matches!(args.log_level, types::LogLevel::Off);

    let sink: Arc<dyn ProgressSink> = if options.show_progress_bar {
        Arc::new(IndicatifSink::new(options.transient))
    } else {
        Arc::new(NullSink)
    };

    let downloader = Downloader::new(options, client, sink.clone());

    let success = match downloader.start(false) {
        StartResult::Handle(downloader) => downloader.run().await?,
        StartResult::Background(handle) => handle.await.map_err(|e| DownloadError::Other(e.to_string()))??,
    };

    sink.finish(success);

    if success {
        info!("download completed successfully");
        Ok(())
    } else {
        std::process::exit(1);
    }
}
