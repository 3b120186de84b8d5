//! Progress aggregator: samples Part + global counters every 100ms and
//! forwards them to a display collaborator ([`ProgressSink`]).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use crate::units::{format_bytes_opt, format_speed};

/// One part's sampled progress, ready to hand to a [`ProgressSink`].
///
/// `code` is the Part's numeric state code (0=init, 1=connecting/retry,
/// 2=downloading, 3=finished) — the display reads this instead of the
/// internal `PartState` enum, per the Part record's "parallel numeric code
/// usable by the display" design.
pub struct PartSample {
    pub num: usize,
    pub completed: u64,
    pub total: u64,
    pub speed: u64,
    pub code: u8,
    pub retry: u32,
}

/// The aggregated "Total" row's sampled progress.
pub struct TotalSample {
    pub completed: u64,
    pub total: Option<u64>,
    pub speed: u64,
    pub label: String,
}

/// The display collaborator the progress aggregator reports to.
///
/// Kept as an explicit trait (per `SPEC_FULL.md` §4.5/§9) rather than a
/// concrete type, so the core engine never depends on indicatif directly.
pub trait ProgressSink: Send + Sync {
    fn update_part(&self, sample: PartSample);
    fn update_total(&self, sample: TotalSample);
    fn finish(&self, success: bool);
}

/// Samples every 100ms until `stop` is observed set, then takes one final
/// sample and returns.
///
/// `sample` is supplied by the controller (which owns the Parts collection
/// and the global counters) so this function never needs to know the
/// concrete download-state type.
pub async fn run_aggregator<F>(mut sample: F, sink: Arc<dyn ProgressSink>, stop: Arc<AtomicBool>)
where
    F: FnMut() -> (Vec<PartSample>, TotalSample),
{
    loop {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let done = stop.load(Ordering::SeqCst);
        let (parts, total) = sample();
        for part in parts {
            sink.update_part(part);
        }
        sink.update_total(total);
        if done {
            break;
        }
    }
}

/// Creates a configured progress bar style for downloads.
///
/// Format: `Spinner [Elapsed] [Bar] Bytes/Total (Speed, ETA)`
/// Uses cyan/blue colors for the bar and green for the spinner.
pub fn style_download_bar() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})")
        .unwrap()
        .progress_chars("#>-")
}

/// Creates a spinner style for indeterminate states (e.g., splicing).
pub fn style_spinner() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("{spinner:.blue} {msg}")
        .unwrap()
}

/// A [`ProgressSink`] backed by `indicatif::MultiProgress`: one bar per
/// part, plus a "Total" bar, styled the way `style_download_bar`/
/// `style_spinner` describe.
pub struct IndicatifSink {
    multi: MultiProgress,
    total_bar: ProgressBar,
    part_bars: Mutex<HashMap<usize, ProgressBar>>,
    transient: bool,
}

impl IndicatifSink {
    pub fn new(transient: bool) -> Self {
        let multi = MultiProgress::new();
        let total_bar = multi.add(ProgressBar::new(0));
        total_bar.set_style(style_download_bar());
        total_bar.set_message("Total");
        Self {
            multi,
            total_bar,
            part_bars: Mutex::new(HashMap::new()),
            transient,
        }
    }

    fn bar_for(&self, num: usize) -> ProgressBar {
        let mut bars = self.part_bars.lock().expect("progress bars lock poisoned");
        bars.entry(num)
            .or_insert_with(|| {
                let bar = self.multi.add(ProgressBar::new(0));
                bar.set_style(style_download_bar());
                bar.set_message(format!("Part {num}"));
                bar
            })
            .clone()
    }
}

impl ProgressSink for IndicatifSink {
    fn update_part(&self, sample: PartSample) {
        let bar = self.bar_for(sample.num);
        bar.set_length(sample.total);
        bar.set_position(sample.completed.min(sample.total));
        match sample.code {
            3 => bar.finish_with_message(format!("Part {}", sample.num)),
            1 if sample.retry > 0 => bar.set_message(format!(
                "Part {} (retry {}) [{}]",
                sample.num,
                sample.retry,
                format_speed(sample.speed)
            )),
            _ => bar.set_message(format!("Part {} [{}]", sample.num, format_speed(sample.speed))),
        }
    }

    fn update_total(&self, sample: TotalSample) {
        if let Some(total) = sample.total {
            self.total_bar.set_length(total);
            self.total_bar.set_position(sample.completed.min(total));
        }
        self.total_bar.set_message(format!(
            "{} of {} [{}]",
            sample.label,
            format_bytes_opt(sample.total),
            format_speed(sample.speed)
        ));
    }

    fn finish(&self, success: bool) {
        let msg = if success { "Download completed" } else { "Download failed" };
        if self.transient {
            self.total_bar.finish_and_clear();
        } else {
            self.total_bar.finish_with_message(msg.to_string());
        }
    }
}

/// A sink that discards every update, used when `showProgressBar=false`.
pub struct NullSink;

impl ProgressSink for NullSink {
    fn update_part(&self, _sample: PartSample) {}
    fn update_total(&self, _sample: TotalSample) {}
    fn finish(&self, _success: bool) {}
}
