//! Drives a single [`Part`] from `init` to `finished`.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use futures::StreamExt;
use reqwest::{Client, Response, header::HeaderMap};
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};

use crate::controller::Event;
use crate::error::DownloadError;
use crate::http::{bounded_chunks, request_range};
use crate::part::{Part, PartState};

/// Sent by a worker to the controller when its Part settles, one way or
/// another. The controller is the sole consumer and the sole place that
/// mutates the Parts vector or spawns new workers, per the message-passing
/// design (no call-stack recursion between worker and rebalancer).
pub enum WorkerEvent {
    Finished(usize),
    Failed(usize, DownloadError),
}

/// Runs one Part to completion, retrying failed connect/stream attempts up
/// to `max_thread_retry` (negative means infinite), and reports the outcome
/// on `events`.
///
/// `carried_stream` is the already-open response for Part 0, reused instead
/// of issuing a second GET.
#[instrument(skip(client, headers, events, carried_stream), fields(part = part.num))]
pub async fn run_worker(
    client: Client,
    url: String,
    headers: HeaderMap,
    timeout: Option<Duration>,
    chunk_size: usize,
    part: Arc<Part>,
    max_thread_retry: i64,
    mut carried_stream: Option<Response>,
    global_fail: Arc<AtomicBool>,
    events: mpsc::UnboundedSender<Event>,
) {
    loop {
        match run_attempt(&client, &url, &headers, timeout, chunk_size, &part, carried_stream.take())
            .await
        {
            Ok(()) => {
                part.set_state(PartState::Finished);
                part.set_now(part.to() - part.start);
                part.set_speed(0);
                let _ = events.send(Event::Worker(WorkerEvent::Finished(part.num)));
                return;
            },
            Err(err) => {
                let retry = part.bump_retry();
                let exhausted = max_thread_retry >= 0 && retry as i64 > max_thread_retry;
                if exhausted {
                    global_fail.store(true, Ordering::SeqCst);
                    let _ = events.send(Event::Worker(WorkerEvent::Failed(part.num, err)));
                    return;
                }
                warn!(part = part.num, retry, %err, "part failed, retrying");
                part.set_state(PartState::Retry(retry));
            },
        }
    }
}

async fn run_attempt(
    client: &Client,
    url: &str,
    headers: &HeaderMap,
    timeout: Option<Duration>,
    chunk_size: usize,
    part: &Arc<Part>,
    carried_stream: Option<Response>,
) -> Result<(), DownloadError> {
    part.set_state(PartState::Connecting);

    let resp = match carried_stream {
        Some(resp) => resp,
        None => request_range(client, url, part.start, headers, timeout).await?,
    };

    let mut file = open_part_file(&part.file_name).await?;
    part.set_start_time(Instant::now());
    part.set_state(PartState::Downloading);
    part.set_now(0);

    let mut stream = bounded_chunks(resp, chunk_size);
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if part.start + part.now() > part.to() {
            debug!(part = part.num, "range exceeded, finalizing without surplus");
            break;
        }
        file.write_all(&chunk).await?;
        let len = chunk.len() as u64;
        part.add_now(len);

        if let Some(speed) = part.tick_history(len) {
            part.set_speed(speed);
        }
    }
    file.flush().await?;
    Ok(())
}

async fn open_part_file(path: &Path) -> Result<tokio::fs::File, DownloadError> {
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .await?;
    Ok(file)
}
