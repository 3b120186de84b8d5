use std::path::PathBuf;
use std::process;
use std::time::{SystemTime, UNIX_EPOCH};

use reqwest::{
    Client,
    header::{HeaderMap, HeaderValue, USER_AGENT},
};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use crate::error::DownloadError;
use crate::types::LogLevel;

/// Initializes the tracing subscriber for logging.
///
/// This function configures `tracing_subscriber::FmtSubscriber` to output logs to stderr.
/// It supports two modes:
/// 1. **User Mode (default)**: Clean output without timestamps or module paths.
/// 2. **Debug Mode (`debug_mode = true`)**: Detailed output with timestamps, file paths, and line numbers.
///
/// `level == LogLevel::Off` never installs a subscriber at all, so logging
/// calls become no-ops without a per-call check.
pub fn init_tracing(level: LogLevel, debug_mode: bool) {
    let trace_level = if debug_mode {
        if matches!(level, LogLevel::Trace) {
            Level::TRACE
        } else {
            Level::DEBUG
        }
    } else {
        match level {
            LogLevel::Off => return,
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    };

    let builder = FmtSubscriber::builder()
        .with_max_level(trace_level)
        .with_writer(std::io::stderr);

    if debug_mode {
        builder
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .init();
    } else {
        builder
            .with_target(false)
            .without_time()
            .with_level(true)
            .init();
    }
}

/// Builds and configures the HTTP Client with a fixed User-Agent.
pub fn build_client(ua: &str) -> Result<Client, DownloadError> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_str(ua)?);

    let client = Client::builder().default_headers(headers).build()?;
    Ok(client)
}

/// Derives a filename from a URL path.
///
/// Extracts the last segment of the URL path. If the URL ends in a slash or has no
/// path segments, returns "index.html".
pub fn get_filename_from_url(url_str: &str) -> String {
    if let Ok(url) = reqwest::Url::parse(url_str)
        && let Some(mut segments) = url.path_segments()
        && let Some(last) = segments.next_back()
        && !last.is_empty()
    {
        return last.to_string();
    }
    "index.html".to_string()
}

/// Builds a per-download temp directory path:
/// `<sys_tempdir>/<basename-of-url-without-query><random-suffix>`.
///
/// Derives an unpredictable, collision-resistant suffix from the current
/// time and process id rather than pulling in a `rand` dependency.
pub fn make_temp_dir_path(url_str: &str) -> PathBuf {
    let base = get_filename_from_url(url_str);
    let base = base.split('?').next().unwrap_or(&base);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let suffix = format!("{}-{}", process::id(), nanos);
    std::env::temp_dir().join(format!("{base}{suffix}"))
}
