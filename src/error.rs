use reqwest::header::InvalidHeaderValue;
use std::fmt;
use std::path::PathBuf;

/// Unified error type for the download engine.
///
/// Wraps protocol failures, filesystem failures and transport errors into a
/// single enum so the controller and CLI can handle them uniformly.
#[derive(Debug)]
pub enum DownloadError {
    /// A response's status code fell outside classes 2xx/3xx, or a transport
    /// failure prevented receiving headers at all.
    Connect(String),
    /// The probe succeeded but reported a `Content-Length` of zero or less.
    ZeroSize(String),
    /// Resume mode was requested but the output file is missing or not
    /// writable.
    FileNotFound(PathBuf),
    /// A part's temp file was shorter than its declared range during splice.
    PartTooShort(usize),
    /// Invalid command-line arguments or configuration.
    ArgNotValid(String),
    /// Errors originating from the HTTP client (reqwest).
    Http(reqwest::Error),
    /// File system or network I/O errors.
    Io(std::io::Error),
    /// Generic or miscellaneous errors.
    Other(String),
}

impl fmt::Display for DownloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DownloadError::Connect(url) => write!(f, "Can not connect to {url}"),
            DownloadError::ZeroSize(url) => write!(f, "Can not get the size of {url}"),
            DownloadError::FileNotFound(path) => {
                write!(f, "Can not open file '{}' for download.", path.display())
            },
            DownloadError::PartTooShort(num) => {
                write!(f, "The size of part {num} is not enough")
            },
            DownloadError::ArgNotValid(msg) => write!(f, "invalid argument: {msg}"),
            DownloadError::Http(e) => write!(f, "HTTP error: {e}"),
            DownloadError::Io(e) => write!(f, "IO error: {e}"),
            DownloadError::Other(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for DownloadError {}

impl From<InvalidHeaderValue> for DownloadError {
    fn from(msg: InvalidHeaderValue) -> Self {
        DownloadError::ArgNotValid(msg.to_string())
    }
}

impl From<reqwest::Error> for DownloadError {
    fn from(err: reqwest::Error) -> Self {
        DownloadError::Http(err)
    }
}

impl From<std::io::Error> for DownloadError {
    fn from(err: std::io::Error) -> Self {
        DownloadError::Io(err)
    }
}
