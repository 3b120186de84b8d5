//! Initial split across N workers and mid-run rebalance of the slowest part.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tracing::warn;

use crate::part::{Part, PartState};

/// Derives the worker count from a single warm-up speed measurement:
/// `min(maxThreadNum, fileSize / (speed * desiredCompletionTime))`.
///
/// Returns `None` when `maxThreadNum <= 0` (the caller should fall back to a
/// single-threaded download and logs a warning.
pub fn derive_thread_count(
    max_thread_num: i64,
    file_size: u64,
    speed: u64,
    desired_completion_time_secs: u64,
) -> Option<i64> {
    if max_thread_num <= 0 {
        warn!("maxThreadNum <= 0, falling back to a single-threaded download");
        return None;
    }
    if speed == 0 || desired_completion_time_secs == 0 {
        return Some(max_thread_num);
    }
    let by_speed = file_size / (speed * desired_completion_time_secs);
    Some(max_thread_num.min(by_speed as i64))
}

/// A freshly split-off part, paired with the temp filename and id the
/// caller should assign to it before spawning its worker.
pub struct NewPart {
    pub part: Arc<Part>,
}

/// Runs the initial split of Part 0 across `thread_num` workers.
///
/// Mirrors `spec.md` §4.6 "Initial split": computes the pivot from Part 0's
/// progress so far, splits off Part 1, then successively splits the tail at
/// even intervals of the remaining span to produce Parts `2..thread_num-1`.
///
/// Returns the empty vector if no split should happen (`thread_num <= 1`, or
/// the pivot has already been overtaken by Part 0's own progress).
pub fn initial_split(
    part0: &Arc<Part>,
    thread_num: i64,
    file_size: u64,
    temp_dir: &std::path::Path,
    next_num: &mut usize,
) -> Vec<NewPart> {
    if thread_num <= 1 {
        return Vec::new();
    }

    let now = part0.now();
    let pivot = part0.start + now + (file_size - now) / thread_num as u64;
    if pivot >= part0.to() {
        return Vec::new();
    }

    let mut out = Vec::new();

    let mut tail = part0.split(pivot);
    if tail.is_degenerate() {
        return Vec::new();
    }
    let else_size = tail.to() - tail.start;

    tail.num = *next_num;
    tail.file_name = temp_file_path(temp_dir, *next_num);
    *next_num += 1;
    let mut tail = Arc::new(tail);
    out.push(NewPart { part: tail.clone() });

    for _ in 2..thread_num {
        let split_at = tail.start + else_size / (thread_num as u64 - 1);
        let mut next = tail.split(split_at);
        if next.is_degenerate() {
            break;
        }
        next.num = *next_num;
        next.file_name = temp_file_path(temp_dir, *next_num);
        *next_num += 1;
        let next = Arc::new(next);
        out.push(NewPart { part: next.clone() });
        tail = next;
    }

    out
}

/// Picks the non-finished Part with the largest estimated remaining time and,
/// if that estimate exceeds `desired_completion_time_secs`, splits it at the
/// midpoint of its unfetched range.
///
/// Candidates are examined in `parts`' iteration order (insertion order), so
/// ties favor the first Part encountered, matching `spec.md` §4.6's
/// tie-break rule.
pub fn rebalance_on_finish(
    parts: &[Arc<Part>],
    desired_completion_time_secs: u64,
    temp_dir: &std::path::Path,
    next_num: &mut usize,
) -> Option<NewPart> {
    let mut best: Option<(&Arc<Part>, f64)> = None;

    for part in parts {
        if part.state() == PartState::Finished {
            continue;
        }
        let to = part.to();
        let now = part.now();
        let speed = part.speed();
        let remaining = if speed > 0 {
            (to - part.start - now) as f64 / speed as f64
        } else if now > 0 {
            match part.start_time() {
                Some(started) => {
                    let elapsed = Instant::now().saturating_duration_since(started).as_secs_f64();
                    if elapsed <= 0.0 {
                        continue;
                    }
                    let est_speed = now as f64 / elapsed;
                    (to - part.start - now) as f64 / est_speed
                },
                None => continue,
            }
        } else {
            continue;
        };

        match &best {
            Some((_, best_remaining)) if *best_remaining >= remaining => {},
            _ => best = Some((part, remaining)),
        }
    }

    let (slowest, remaining) = best?;
    if remaining <= desired_completion_time_secs as f64 {
        return None;
    }

    let now = slowest.now();
    let split_at = slowest.start + now + (slowest.to() - slowest.start - now) / 2;
    let mut tail = slowest.split(split_at);
    if tail.is_degenerate() {
        return None;
    }
    tail.num = *next_num;
    tail.file_name = temp_file_path(temp_dir, *next_num);
    *next_num += 1;
    Some(NewPart { part: Arc::new(tail) })
}

fn temp_file_path(temp_dir: &std::path::Path, num: usize) -> PathBuf {
    temp_dir.join(format!("{num}.tmp"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_thread_count_caps_at_max() {
        // scenario 1: 64 KiB, speed 8 KiB/s, wish 30s -> 0 -> clamp handled by caller as 1
        let n = derive_thread_count(10, 65536, 8192, 30).unwrap();
        assert_eq!(n, 0);
    }

    #[test]
    fn derive_thread_count_scenario_two() {
        // 10 MiB, 64 KiB/s, wish 30s, max 10 -> 5
        let n = derive_thread_count(10, 10_485_760, 65536, 30).unwrap();
        assert_eq!(n, 5);
    }

    #[test]
    fn derive_thread_count_none_when_max_non_positive() {
        assert!(derive_thread_count(0, 1000, 10, 30).is_none());
        assert!(derive_thread_count(-1, 1000, 10, 30).is_none());
    }

    #[test]
    fn initial_split_produces_disjoint_contiguous_parts() {
        let part0 = Arc::new(Part::new(0, 1000, 0, PathBuf::from("0.tmp")));
        let mut next_num = 1usize;
        let new_parts = initial_split(&part0, 4, 1000, std::path::Path::new("/tmp"), &mut next_num);
        assert_eq!(new_parts.len(), 3);

        let mut bounds = vec![(part0.start, part0.to())];
        for np in &new_parts {
            bounds.push((np.part.start, np.part.to()));
        }
        bounds.sort();
        assert_eq!(bounds[0].0, 0);
        for w in bounds.windows(2) {
            assert_eq!(w[0].1, w[1].0, "parts must be contiguous");
        }
        assert_eq!(bounds.last().unwrap().1, 1000);
    }

    #[test]
    fn initial_split_with_thread_num_one_is_noop() {
        let part0 = Arc::new(Part::new(0, 1000, 0, PathBuf::from("0.tmp")));
        let mut next_num = 1usize;
        let new_parts = initial_split(&part0, 1, 1000, std::path::Path::new("/tmp"), &mut next_num);
        assert!(new_parts.is_empty());
        assert_eq!(part0.to(), 1000);
    }

    #[test]
    fn rebalance_skips_finished_and_zero_progress_parts() {
        let a = Arc::new(Part::new(0, 100, 0, PathBuf::from("0.tmp")));
        a.set_state(PartState::Finished);
        let b = Arc::new(Part::new(100, 200, 1, PathBuf::from("1.tmp")));
        // no speed, no progress: should be skipped, no candidate exists
        let mut next_num = 2usize;
        let result = rebalance_on_finish(&[a, b], 30, std::path::Path::new("/tmp"), &mut next_num);
        assert!(result.is_none());
    }

    #[test]
    fn rebalance_splits_slow_part_when_over_threshold() {
        let slow = Arc::new(Part::new(0, 100_000, 0, PathBuf::from("0.tmp")));
        slow.set_now(1000);
        slow.set_speed(10); // remaining = (100000-1000)/10 = 9900s, over threshold
        let mut next_num = 1usize;
        let result = rebalance_on_finish(&[slow.clone()], 30, std::path::Path::new("/tmp"), &mut next_num);
        let new_part = result.expect("slow part should be split");
        assert!(new_part.part.start > slow.start);
        assert_eq!(new_part.part.to(), 100_000);
    }

    #[test]
    fn rebalance_does_nothing_when_under_threshold() {
        let fast = Arc::new(Part::new(0, 100_000, 0, PathBuf::from("0.tmp")));
        fast.set_now(90_000);
        fast.set_speed(10_000); // remaining = 1s, under threshold
        let mut next_num = 1usize;
        let result = rebalance_on_finish(&[fast], 30, std::path::Path::new("/tmp"), &mut next_num);
        assert!(result.is_none());
    }
}
