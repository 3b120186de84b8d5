//! A contiguous byte range of the remote resource, owned by one worker.

use std::cmp::Ordering;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering as AtomicOrdering};
use std::sync::Mutex;
use std::time::Instant;

use crate::rolling::{now_secs, RollingWindow};

/// Where a [`Part`] is in its download lifecycle.
///
/// `Retry(n)` shares the numeric display code with `Connecting` (both `1`):
/// both are mid-attempt states from the display's point of view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartState {
    Init,
    Connecting,
    Downloading,
    Finished,
    Retry(u32),
}

impl PartState {
    /// The numeric code (0..3) the display layer renders instead of a string.
    pub fn code(&self) -> u8 {
        match self {
            PartState::Init => 0,
            PartState::Connecting | PartState::Retry(_) => 1,
            PartState::Downloading => 2,
            PartState::Finished => 3,
        }
    }
}

/// One contiguous byte range `[start, to)` of the remote resource.
///
/// `to`, `now`, `speed` and the retry counter are atomics so a worker can
/// update them off the hot chunk-receipt path without an async lock, while
/// the rebalancer can shrink `to` from a different task (invariant (c) in
/// `SPEC_FULL.md` §3: only the owning worker, or the rebalancer splitting a
/// non-running part, ever touches a Part's mutable fields).
pub struct Part {
    pub num: usize,
    pub start: u64,
    to: AtomicU64,
    now: AtomicU64,
    speed: AtomicU64,
    state_code: AtomicU8,
    retry: AtomicU32,
    state: Mutex<PartState>,
    history: Mutex<RollingWindow>,
    start_time: Mutex<Option<Instant>>,
    pub file_name: PathBuf,
}

impl Part {
    pub fn new(start: u64, to: u64, num: usize, file_name: PathBuf) -> Self {
        Self {
            num,
            start,
            to: AtomicU64::new(to),
            now: AtomicU64::new(0),
            speed: AtomicU64::new(0),
            state_code: AtomicU8::new(PartState::Init.code()),
            retry: AtomicU32::new(0),
            state: Mutex::new(PartState::Init),
            history: Mutex::new(RollingWindow::new()),
            start_time: Mutex::new(None),
            file_name,
        }
    }

    pub fn to(&self) -> u64 {
        self.to.load(AtomicOrdering::SeqCst)
    }

    pub fn now(&self) -> u64 {
        self.now.load(AtomicOrdering::SeqCst)
    }

    pub fn speed(&self) -> u64 {
        self.speed.load(AtomicOrdering::SeqCst)
    }

    pub fn set_speed(&self, speed: u64) {
        self.speed.store(speed, AtomicOrdering::SeqCst);
    }

    pub fn set_now(&self, now: u64) {
        self.now.store(now, AtomicOrdering::SeqCst);
    }

    pub fn add_now(&self, delta: u64) -> u64 {
        self.now.fetch_add(delta, AtomicOrdering::SeqCst) + delta
    }

    pub fn state(&self) -> PartState {
        self.state.lock().expect("part state lock poisoned").clone()
    }

    pub fn set_state(&self, state: PartState) {
        self.state_code.store(state.code(), AtomicOrdering::SeqCst);
        *self.state.lock().expect("part state lock poisoned") = state;
    }

    pub fn state_code(&self) -> u8 {
        self.state_code.load(AtomicOrdering::SeqCst)
    }

    pub fn retry_count(&self) -> u32 {
        self.retry.load(AtomicOrdering::SeqCst)
    }

    /// Increments the retry counter and returns its new value.
    pub fn bump_retry(&self) -> u32 {
        self.retry.fetch_add(1, AtomicOrdering::SeqCst) + 1
    }

    pub fn start_time(&self) -> Option<Instant> {
        *self
            .start_time
            .lock()
            .expect("part start_time lock poisoned")
    }

    pub fn set_start_time(&self, at: Instant) {
        *self
            .start_time
            .lock()
            .expect("part start_time lock poisoned") = Some(at);
    }

    /// Folds a chunk of `len` bytes into this part's rolling window and
    /// returns the newly-published speed sample, if the window rolled over.
    pub fn tick_history(&self, len: u64) -> Option<u64> {
        self.history
            .lock()
            .expect("part history lock poisoned")
            .add_bytes(len, now_secs())
    }

    /// A part is degenerate when it has zero length: the result of a
    /// `split` call whose position fell outside `(start, to)`. Callers must
    /// treat a degenerate part as "no split happened".
    pub fn is_degenerate(&self) -> bool {
        self.to() <= self.start
    }

    /// Splits this part at `position`, truncating `self.to` to `position`
    /// and returning a fresh part covering `[position, original_to)`.
    ///
    /// If `position <= start` or `position >= to`, `self` is left untouched
    /// and the returned part is degenerate (`[to, to)`) — see
    /// [`Part::is_degenerate`].
    ///
    /// The returned part has `num == 0` and an empty `file_name`; the caller
    /// is expected to assign both before publishing it.
    pub fn split(&self, position: u64) -> Part {
        let to = self.to();
        if position <= self.start || position >= to {
            return Part::new(to, to, 0, PathBuf::new());
        }
        self.to.store(position, AtomicOrdering::SeqCst);
        Part::new(position, to, 0, PathBuf::new())
    }
}

impl PartialEq for Part {
    fn eq(&self, other: &Self) -> bool {
        self.start == other.start && self.to() == other.to()
    }
}
impl Eq for Part {}

impl PartialOrd for Part {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Part {
    /// Parts are totally ordered by `(start, to)` ascending, used only for
    /// deterministic reassembly during splicing.
    fn cmp(&self, other: &Self) -> Ordering {
        self.start
            .cmp(&other.start)
            .then_with(|| self.to().cmp(&other.to()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_in_range_truncates_self_and_returns_tail() {
        let p = Part::new(0, 100, 0, PathBuf::new());
        let tail = p.split(60);
        assert_eq!(p.to(), 60);
        assert_eq!(tail.start, 60);
        assert_eq!(tail.to(), 100);
        assert!(!tail.is_degenerate());
    }

    #[test]
    fn split_at_or_before_start_is_degenerate() {
        let p = Part::new(10, 100, 0, PathBuf::new());
        let degenerate = p.split(10);
        assert!(degenerate.is_degenerate());
        assert_eq!(p.to(), 100, "self must be unchanged on a degenerate split");

        let degenerate2 = p.split(5);
        assert!(degenerate2.is_degenerate());
        assert_eq!(p.to(), 100);
    }

    #[test]
    fn split_at_or_past_to_is_degenerate() {
        let p = Part::new(10, 100, 0, PathBuf::new());
        let degenerate = p.split(100);
        assert!(degenerate.is_degenerate());
        assert_eq!(p.to(), 100);

        let degenerate2 = p.split(150);
        assert!(degenerate2.is_degenerate());
        assert_eq!(p.to(), 100);
    }

    #[test]
    fn ordering_is_by_start_then_to() {
        let a = Part::new(0, 50, 0, PathBuf::new());
        let b = Part::new(50, 100, 1, PathBuf::new());
        assert!(a < b);
    }

    #[test]
    fn retry_state_shares_code_with_connecting() {
        assert_eq!(PartState::Connecting.code(), PartState::Retry(3).code());
    }
}
