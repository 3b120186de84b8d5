//! Ranged-GET HTTP client: request building, status classification, and a
//! `chunkSize`-bounded byte-chunk stream.

use std::time::Duration;

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use reqwest::{
    header::{HeaderMap, CONTENT_LENGTH, RANGE},
    Client, Response, StatusCode,
};
use tracing::{debug, instrument};

use crate::error::DownloadError;

/// Issues `GET <url>` with `Range: bytes=<start>-` plus `extra_headers`,
/// classifying the response by integer-division of the status code by 100:
/// classes 2 and 3 are acceptable, anything else fails with
/// [`DownloadError::Connect`].
#[instrument(skip(client, extra_headers), fields(url = %url, start = start))]
pub async fn request_range(
    client: &Client,
    url: &str,
    start: u64,
    extra_headers: &HeaderMap,
    timeout: Option<Duration>,
) -> Result<Response, DownloadError> {
    let mut req = client
        .get(url)
        .headers(extra_headers.clone())
        .header(RANGE, format!("bytes={start}-"));
    if let Some(timeout) = timeout {
        req = req.timeout(timeout);
    }

    let resp = req
        .send()
        .await
        .map_err(|_| DownloadError::Connect(url.to_string()))?;

    let class = resp.status().as_u16() / 100;
    if class != 2 && class != 3 {
        debug!(status = %resp.status(), "unacceptable status class");
        return Err(DownloadError::Connect(url.to_string()));
    }
    Ok(resp)
}

/// Returns `true` if `status` falls in class 2xx or 3xx.
pub fn is_acceptable(status: StatusCode) -> bool {
    let class = status.as_u16() / 100;
    class == 2 || class == 3
}

/// Reads the `Content-Length` response header, if present.
pub fn content_length(resp: &Response) -> Option<u64> {
    resp.headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok())
}

/// Re-chunks a response body into a lazy sequence of byte chunks no larger
/// than `chunk_size`.
///
/// `reqwest::Response::bytes_stream()` yields chunks at whatever boundary
/// the transport happened to deliver; this combinator splits (but never
/// merges) those chunks down to `chunk_size`.
pub fn bounded_chunks(
    resp: Response,
    chunk_size: usize,
) -> impl Stream<Item = Result<Bytes, DownloadError>> {
    let chunk_size = chunk_size.max(1);
    let inner = resp.bytes_stream();
    stream::unfold(
        (Box::pin(inner), None::<Bytes>),
        move |(mut inner, mut leftover)| async move {
            loop {
                if let Some(buf) = leftover.take() {
                    if buf.len() > chunk_size {
                        let piece = buf.slice(0..chunk_size);
                        let rest = buf.slice(chunk_size..);
                        return Some((Ok(piece), (inner, Some(rest))));
                    }
                    return Some((Ok(buf), (inner, None)));
                }
                match inner.next().await {
                    Some(Ok(bytes)) => {
                        leftover = Some(bytes);
                    },
                    Some(Err(e)) => return Some((Err(DownloadError::from(e)), (inner, None))),
                    None => return None,
                }
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classes_2_and_3_are_acceptable() {
        assert!(is_acceptable(StatusCode::OK));
        assert!(is_acceptable(StatusCode::PARTIAL_CONTENT));
        assert!(is_acceptable(StatusCode::MOVED_PERMANENTLY));
        assert!(!is_acceptable(StatusCode::NOT_FOUND));
        assert!(!is_acceptable(StatusCode::INTERNAL_SERVER_ERROR));
    }
}
