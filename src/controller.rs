//! Top-level orchestrator: probes the URL, derives worker count, drives the
//! partition/rebalance loop to quiescence, and splices temp files into the
//! final output.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use indicatif::ProgressBar;
use reqwest::Client;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

use crate::error::DownloadError;
use crate::http::{bounded_chunks, content_length, request_range};
use crate::part::{Part, PartState};
use crate::partition::{NewPart, derive_thread_count, initial_split, rebalance_on_finish};
use crate::progress::{PartSample, ProgressSink, TotalSample, run_aggregator, style_spinner};
use crate::rolling::RollingWindow;
use crate::types::DownloaderOptions;
use crate::worker::{WorkerEvent, run_worker};

const POLL_INTERVAL: Duration = Duration::from_millis(500);
const SETTLE_DELAY: Duration = Duration::from_secs(1);

pub(crate) enum Event {
    Worker(WorkerEvent),
    InitialSplit(Vec<NewPart>),
    PartitionerDone,
}

/// Shared, append-only download state. Every task holds an `Arc` clone; only
/// the controller task ever appends to `parts` or mutates `wait_set`.
struct DownloadState {
    parts: Mutex<Vec<Arc<Part>>>,
    wait_set: Mutex<HashSet<usize>>,
    file_size: AtomicI64,
    fail: Arc<AtomicBool>,
    next_num: Mutex<usize>,
    temp_dir: PathBuf,
}

/// Drives a single download from start to finish, per `DownloaderOptions`.
pub struct Downloader {
    options: DownloaderOptions,
    client: Client,
    sink: Arc<dyn ProgressSink>,
}

impl Downloader {
    pub fn new(options: DownloaderOptions, client: Client, sink: Arc<dyn ProgressSink>) -> Self {
        Self { options, client, sink }
    }

    /// Runs the download to completion on the current task, returning `true`
    /// on success. Fatal errors are either propagated (when
    /// `propagate_errors`) or swallowed into a `false` result, matching the
    /// `error` configuration option.
    pub async fn run(self) -> Result<bool, DownloadError> {
        let propagate = self.options.propagate_errors;
        match self.run_inner().await {
            Ok(ok) => Ok(ok),
            Err(err) if propagate => Err(err),
            Err(err) => {
                warn!(%err, "download failed");
                Ok(false)
            },
        }
    }

    /// Spawns the whole download on a background task when
    /// `run_in_background` is set, returning a handle instead of blocking
    /// the caller.
    pub fn start(self, run_in_background: bool) -> StartResult {
        if run_in_background {
            StartResult::Background(tokio::spawn(self.run()))
        } else {
            StartResult::Handle(self)
        }
    }

    #[instrument(skip(self), fields(url = %self.options.url))]
    async fn run_inner(&self) -> Result<bool, DownloadError> {
        let (start_size, open_append) = self.resolve_resume().await?;

        let headers = self.options.header_map()?;
        let temp_dir = crate::utils::make_temp_dir_path(&self.options.url);
        fs::create_dir_all(&temp_dir).await?;

        let probe = match self
            .probe(start_size, &headers, &temp_dir)
            .await?
        {
            ProbeOutcome::Streaming(resp) => {
                self.stream_fallback(resp, open_append).await?;
                return Ok(true);
            },
            ProbeOutcome::Ranged { part0, file_size, resp } => (part0, file_size, resp),
        };
        let (part0, file_size, resp0) = probe;

        let state = Arc::new(DownloadState {
            parts: Mutex::new(vec![part0.clone()]),
            wait_set: Mutex::new(HashSet::from([0usize])),
            file_size: AtomicI64::new(file_size as i64),
            fail: Arc::new(AtomicBool::new(false)),
            next_num: Mutex::new(1),
            temp_dir: temp_dir.clone(),
        });

        let (tx, mut rx) = mpsc::unbounded_channel::<Event>();

        self.spawn_worker(&state, part0.clone(), Some(resp0), &tx);

        self.spawn_partitioner(&state, tx.clone());

        let stop = Arc::new(AtomicBool::new(false));
        let aggregator_handle = self.spawn_aggregator(&state, stop.clone());

        let mut partitioner_done = false;
        loop {
            if state.fail.load(Ordering::SeqCst) {
                stop.store(true, Ordering::SeqCst);
                let _ = aggregator_handle.await;
                return Ok(false);
            }
            if partitioner_done && state.wait_set.lock().expect("wait set lock poisoned").is_empty() {
                break;
            }

            let event = tokio::time::timeout(POLL_INTERVAL, rx.recv()).await;
            match event {
                Ok(Some(Event::Worker(WorkerEvent::Finished(num)))) => {
                    state.wait_set.lock().expect("wait set lock poisoned").remove(&num);
                    self.maybe_rebalance(&state, &tx);
                },
                Ok(Some(Event::Worker(WorkerEvent::Failed(num, err)))) => {
                    warn!(part = num, %err, "part failed permanently");
                    state.wait_set.lock().expect("wait set lock poisoned").remove(&num);
                },
                Ok(Some(Event::InitialSplit(new_parts))) => {
                    self.enroll_new_parts(&state, new_parts, &tx);
                },
                Ok(Some(Event::PartitionerDone)) => {
                    partitioner_done = true;
                },
                Ok(None) => break,
                Err(_) => {},
            }
        }

        stop.store(true, Ordering::SeqCst);
        let _ = aggregator_handle.await;

        self.splice(&state, open_append).await?;
        info!("download completed successfully");
        Ok(true)
    }

    async fn resolve_resume(&self) -> Result<(u64, bool), DownloadError> {
        if !self.options.continue_download {
            return Ok((self.options.start_size, self.options.open_append));
        }
        match fs::metadata(&self.options.file).await {
            Ok(meta) => Ok((meta.len(), true)),
            Err(_) => Err(DownloadError::FileNotFound(self.options.file.clone())),
        }
    }

    #[instrument(skip(self, headers))]
    async fn probe(
        &self,
        start_size: u64,
        headers: &reqwest::header::HeaderMap,
        temp_dir: &std::path::Path,
    ) -> Result<ProbeOutcome, DownloadError> {
        let mut attempt: i64 = 0;
        let mut last_err = DownloadError::Connect(self.options.url.clone());

        loop {
            attempt += 1;
            match request_range(&self.client, &self.options.url, start_size, headers, self.options.timeout).await {
                Ok(resp) => {
                    match content_length(&resp) {
                        None => return Ok(ProbeOutcome::Streaming(resp)),
                        Some(len) => {
                            if len == 0 {
                                return Err(DownloadError::ZeroSize(self.options.url.clone()));
                            }
                            let part0 = Arc::new(Part::new(
                                start_size,
                                start_size + len,
                                0,
                                temp_dir.join("0.tmp"),
                            ));
                            return Ok(ProbeOutcome::Ranged { part0, file_size: len, resp });
                        },
                    }
                },
                Err(err) => {
                    last_err = err;
                    if self.options.max_retry >= 0 && attempt >= self.options.max_retry {
                        return Err(last_err);
                    }
                },
            }
        }
    }

    async fn stream_fallback(&self, resp: reqwest::Response, open_append: bool) -> Result<(), DownloadError> {
        let mut out = open_output(&self.options.file, open_append).await?;
        let mut stream = bounded_chunks(resp, self.options.chunk_size);
        let mut history = RollingWindow::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            out.write_all(&chunk).await?;
            history.add_bytes(chunk.len() as u64, crate::rolling::now_secs());
        }
        out.flush().await?;
        Ok(())
    }

    fn spawn_worker(
        &self,
        state: &Arc<DownloadState>,
        part: Arc<Part>,
        carried: Option<reqwest::Response>,
        tx: &mpsc::UnboundedSender<Event>,
    ) {
        let client = self.client.clone();
        let url = self.options.url.clone();
        let headers = self.options.header_map().unwrap_or_default();
        let timeout = self.options.timeout;
        let chunk_size = self.options.chunk_size;
        let max_thread_retry = self.options.max_thread_retry;
        let fail = state.fail.clone();
        let tx_events = tx.clone();

        tokio::spawn(async move {
            run_worker(
                client,
                url,
                headers,
                timeout,
                chunk_size,
                part,
                max_thread_retry,
                carried,
                fail,
                tx_events,
            )
            .await;
        });
    }

    fn spawn_partitioner(&self, state: &Arc<DownloadState>, tx: mpsc::UnboundedSender<Event>) {
        let state = state.clone();
        let thread_num_cfg = self.options.thread_num;
        let max_thread_num = self.options.max_thread_num;
        let desired = self.options.desired_completion_time.as_secs();

        tokio::spawn(async move {
            let part0 = state.parts.lock().expect("parts lock poisoned")[0].clone();

            loop {
                if part0.state() == PartState::Finished {
                    let _ = tx.send(Event::PartitionerDone);
                    return;
                }
                if part0.speed() > 0 {
                    break;
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            tokio::time::sleep(SETTLE_DELAY).await;

            let file_size = state.file_size.load(Ordering::SeqCst);
            if file_size < 0 {
                let _ = tx.send(Event::PartitionerDone);
                return;
            }

            let thread_num = if thread_num_cfg >= 1 {
                thread_num_cfg
            } else {
                match derive_thread_count(max_thread_num, file_size as u64, part0.speed(), desired) {
                    Some(n) => n,
                    None => {
                        let _ = tx.send(Event::PartitionerDone);
                        return;
                    },
                }
            };

            if thread_num <= 1 {
                let _ = tx.send(Event::PartitionerDone);
                return;
            }

            let mut next_num = state.next_num.lock().expect("next_num lock poisoned");
            let new_parts = initial_split(&part0, thread_num, file_size as u64, &state.temp_dir, &mut next_num);
            drop(next_num);

            let _ = tx.send(Event::InitialSplit(new_parts));
            let _ = tx.send(Event::PartitionerDone);
        });
    }

    fn spawn_aggregator(&self, state: &Arc<DownloadState>, stop: Arc<AtomicBool>) -> JoinHandle<()> {
        let state = state.clone();
        let sink = self.sink.clone();
        let file_size_label = self.options.url.clone();

        tokio::spawn(run_aggregator(
            move || {
                let parts = state.parts.lock().expect("parts lock poisoned");
                let samples: Vec<PartSample> = parts
                    .iter()
                    .map(|p| PartSample {
                        num: p.num,
                        completed: p.now(),
                        total: p.to() - p.start,
                        speed: p.speed(),
                        code: p.state_code(),
                        retry: p.retry_count(),
                    })
                    .collect();
                let total_speed: u64 = samples.iter().map(|s| s.speed).sum();
                let completed: u64 = samples.iter().map(|s| s.completed).sum();
                drop(parts);

                let file_size = state.file_size.load(Ordering::SeqCst);
                let total = if file_size >= 0 { Some(file_size as u64) } else { None };

                (
                    samples,
                    TotalSample {
                        completed,
                        total,
                        speed: total_speed,
                        label: file_size_label.clone(),
                    },
                )
            },
            sink,
            stop,
        ))
    }

    fn maybe_rebalance(&self, state: &Arc<DownloadState>, tx: &mpsc::UnboundedSender<Event>) {
        let desired = self.options.desired_completion_time.as_secs();
        let new_part = {
            let parts = state.parts.lock().expect("parts lock poisoned");
            let mut next_num = state.next_num.lock().expect("next_num lock poisoned");
            rebalance_on_finish(&parts, desired, &state.temp_dir, &mut next_num)
        };
        if let Some(new_part) = new_part {
            self.enroll_new_parts(state, vec![new_part], tx);
        }
    }

    fn enroll_new_parts(&self, state: &Arc<DownloadState>, new_parts: Vec<NewPart>, tx: &mpsc::UnboundedSender<Event>) {
        for np in new_parts {
            state.parts.lock().expect("parts lock poisoned").push(np.part.clone());
            state.wait_set.lock().expect("wait set lock poisoned").insert(np.part.num);
            self.spawn_worker(state, np.part, None, tx);
        }
    }

    async fn splice(&self, state: &Arc<DownloadState>, open_append: bool) -> Result<(), DownloadError> {
        let mut parts = state.parts.lock().expect("parts lock poisoned").clone();
        parts.sort();

        let spinner = self.options.show_progress_bar.then(|| {
            let pb = ProgressBar::new_spinner();
            pb.set_style(style_spinner());
            pb.set_message("Splicing parts...");
            pb.enable_steady_tick(Duration::from_millis(100));
            pb
        });

        let result = self.splice_inner(&parts, open_append).await;

        if let Some(pb) = spinner {
            match &result {
                Ok(()) => pb.finish_with_message("Splice completed"),
                Err(err) => pb.finish_with_message(format!("Splice failed: {err}")),
            }
        }
        result
    }

    async fn splice_inner(&self, parts: &[Arc<Part>], open_append: bool) -> Result<(), DownloadError> {
        let mut out = open_output(&self.options.file, open_append).await?;
        for part in parts {
            let expected = (part.to() - part.start) as usize;
            let mut file = File::open(&part.file_name).await?;
            let mut remaining = expected;
            let mut buf = vec![0u8; self.options.chunk_size.max(1)];
            while remaining > 0 {
                let to_read = remaining.min(buf.len());
                let read = file.read(&mut buf[..to_read]).await?;
                if read == 0 {
                    return Err(DownloadError::PartTooShort(part.num));
                }
                out.write_all(&buf[..read]).await?;
                remaining -= read;
            }
            drop(file);
            let _ = fs::remove_file(&part.file_name).await;
        }
        out.flush().await?;
        Ok(())
    }
}

enum ProbeOutcome {
    Streaming(reqwest::Response),
    Ranged { part0: Arc<Part>, file_size: u64, resp: reqwest::Response },
}

pub enum StartResult {
    Handle(Downloader),
    Background(JoinHandle<Result<bool, DownloadError>>),
}

async fn open_output(path: &std::path::Path, append: bool) -> Result<File, DownloadError> {
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .append(append)
        .truncate(!append)
        .open(path)
        .await?;
    Ok(file)
}
