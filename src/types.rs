use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::error::DownloadError;

/// CLI surface for the engine, adapted to clap's derive conventions.
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "An adaptive, multi-threaded range-download engine."
)]
pub struct Args {
    /// The URL of the file to download
    pub url: String,

    /// The filename to save as (default: derived from the URL)
    #[arg(short = 'f', long = "filename")]
    pub output: Option<PathBuf>,

    /// How many threads to download with. 0 or lower means auto
    #[arg(short = 'n', long = "threadnum", default_value_t = 0)]
    pub thread_num: i64,

    /// The max number of threads to auto-derive. Ignored if --threadnum >= 1
    #[arg(short = 'm', long = "max", default_value_t = 10)]
    pub max_thread_num: i64,

    /// Max retry times for the initial probe. Negative means infinity
    #[arg(short = 'r', long = "retry", default_value_t = 5)]
    pub max_retry: i64,

    /// Max retry times for each worker. Negative means infinity
    #[arg(short = 't', long = "thread-retry", default_value_t = -1)]
    pub max_thread_retry: i64,

    /// Extra request header, repeatable, in KEY=VALUE form
    #[arg(short = 'H', long = "header", value_parser = parse_header)]
    pub headers: Vec<(String, String)>,

    /// Desired completion time in seconds; the reference value used to
    /// derive the worker count and to decide when to split a slow part
    #[arg(short = 'w', long = "wish", default_value_t = 30)]
    pub desired_completion_time: u64,

    /// Maximum bytes per streamed chunk
    #[arg(long = "chunk-size", default_value_t = 1024)]
    pub chunk_size: usize,

    /// Per-request socket timeout in seconds
    #[arg(long = "timeout")]
    pub timeout_secs: Option<u64>,

    /// Resume by appending to an existing output file
    #[arg(long = "continue")]
    pub continue_download: bool,

    /// Disable the progress bar
    #[arg(long = "no-progress")]
    pub no_progress: bool,

    /// Clear the progress display instead of leaving it on screen when done
    #[arg(long = "transient")]
    pub transient: bool,

    /// Log level (off, error, warn, info, debug, trace)
    #[arg(long, value_enum, default_value_t = LogLevel::Warn)]
    pub log_level: LogLevel,

    /// Enable debug mode (sets log level to debug and enables detailed output)
    #[arg(long, short = 'v')]
    pub debug: bool,
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("header '{raw}' is not in KEY=VALUE form"))?;
    Ok((key.to_string(), value.to_string()))
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Process-wide, immutable configuration for one download invocation.
#[derive(Clone, Debug)]
pub struct DownloaderOptions {
    pub url: String,
    pub file: PathBuf,
    pub chunk_size: usize,
    /// Retry budget for the initial probe. Negative means infinite.
    pub max_retry: i64,
    /// Retry budget per worker. Negative means infinite.
    pub max_thread_retry: i64,
    pub timeout: Option<Duration>,
    pub continue_download: bool,
    pub start_size: u64,
    pub open_append: bool,
    /// If true, a fatal error propagates to the caller; otherwise it's only
    /// logged and the download is reported as a `false`/failed result.
    pub propagate_errors: bool,
    pub log: bool,
    pub show_progress_bar: bool,
    pub transient: bool,
    /// Fixed worker count. <= 0 means auto-derive (see `partition.rs`).
    pub thread_num: i64,
    pub max_thread_num: i64,
    pub desired_completion_time: Duration,
    pub headers: HashMap<String, String>,
}

impl DownloaderOptions {
    pub fn new(url: String, file: PathBuf) -> Self {
        Self {
            url,
            file,
            chunk_size: 1024,
            max_retry: 5,
            max_thread_retry: -1,
            timeout: Some(Duration::from_secs(30)),
            continue_download: false,
            start_size: 0,
            open_append: false,
            propagate_errors: true,
            log: true,
            show_progress_bar: true,
            transient: false,
            thread_num: 0,
            max_thread_num: 10,
            desired_completion_time: Duration::from_secs(30),
            headers: HashMap::new(),
        }
    }

    pub fn header_map(&self) -> Result<HeaderMap, DownloadError> {
        let mut map = HeaderMap::new();
        for (k, v) in &self.headers {
            let name = HeaderName::from_bytes(k.as_bytes())
                .map_err(|e| DownloadError::ArgNotValid(e.to_string()))?;
            let value = HeaderValue::from_str(v).map_err(|e| DownloadError::ArgNotValid(e.to_string()))?;
            map.insert(name, value);
        }
        Ok(map)
    }
}
