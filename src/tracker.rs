//! Scheduling primitives for background decoding.
//!
//! Plain values with no threads or locks of their own: the coordinator owns
//! them inside its shared state and drives them from `pump`.

use std::ops::RangeInclusive;
use std::time::{Duration, Instant};

use hashbrown::HashSet;
use smallvec::SmallVec;

/// Indices submitted to one pool and not yet completed.
#[derive(Debug, Default, Clone)]
pub struct InFlightSet {
    indices: HashSet<usize>,
}

impl InFlightSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `index` as in flight. Returns `false` when it already was, in
    /// which case the caller must not submit it again.
    pub fn try_insert(&mut self, index: usize) -> bool {
        self.indices.insert(index)
    }

    pub fn remove(&mut self, index: usize) -> bool {
        self.indices.remove(&index)
    }

    pub fn contains(&self, index: usize) -> bool {
        self.indices.contains(&index)
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    pub fn clear(&mut self) {
        self.indices.clear();
    }

    /// Sorted snapshot, for logging and tests.
    pub fn snapshot(&self) -> Vec<usize> {
        let mut v: Vec<usize> = self.indices.iter().copied().collect();
        v.sort_unstable();
        v
    }
}

/// Valid indices within `radius` of `center` in a list of `len` items, in
/// preload order: nearest first, forward before backward (+1, -1, +2, -2, ...).
pub fn neighbors(center: usize, len: usize, radius: usize) -> SmallVec<[usize; 6]> {
    let mut out = SmallVec::new();
    for dist in 1..=radius {
        if let Some(idx) = center.checked_add(dist).filter(|&i| i < len) {
            out.push(idx);
        }
        if let Some(idx) = center.checked_sub(dist).filter(|&i| i < len) {
            out.push(idx);
        }
    }
    out
}

/// `[first, last]` widened by `buffer` on both sides and clipped to `len`.
/// `None` for an empty list. Reversed bounds are accepted.
pub fn expand_range(first: usize, last: usize, buffer: usize, len: usize) -> Option<RangeInclusive<usize>> {
    if len == 0 {
        return None;
    }
    let (lo, hi) = if first <= last { (first, last) } else { (last, first) };
    let lo = lo.saturating_sub(buffer).min(len - 1);
    let hi = hi.saturating_add(buffer).min(len - 1);
    Some(lo..=hi)
}

/// Progressive wrap-around walk over the active list.
///
/// Starts at `start`, runs to the end, wraps to 0 and finishes once the cursor
/// is back at `start`, so every index is visited exactly once per sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sweep {
    start: usize,
    cursor: usize,
    len: usize,
    wrapped: bool,
    finished: bool,
}

impl Sweep {
    pub fn new(start: usize, len: usize) -> Self {
        let start = if len == 0 { 0 } else { start.min(len - 1) };
        Self {
            start,
            cursor: start,
            len,
            wrapped: false,
            finished: len == 0,
        }
    }

    pub fn start(&self) -> usize {
        self.start
    }

    /// Next index to be visited.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn wrapped(&self) -> bool {
        self.wrapped
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Advance past up to `batch` indices that `skip` does not reject.
    ///
    /// Indices for which `skip` returns `true` (already delivered or already
    /// in flight) are stepped over without counting toward the batch.
    pub fn next_batch(&mut self, batch: usize, mut skip: impl FnMut(usize) -> bool) -> SmallVec<[usize; 8]> {
        let mut out = SmallVec::new();
        while !self.finished && out.len() < batch {
            let idx = self.cursor;
            self.step();
            if !skip(idx) {
                out.push(idx);
            }
        }
        out
    }

    fn step(&mut self) {
        self.cursor += 1;
        if self.cursor >= self.len {
            self.cursor = 0;
            self.wrapped = true;
        }
        if self.cursor == self.start {
            self.finished = true;
        }
    }

    pub fn finish(&mut self) {
        self.finished = true;
    }
}

/// Sweep plus its tick cadence.
#[derive(Debug, Clone)]
pub struct SweepTimer {
    pub sweep: Sweep,
    next_tick: Instant,
}

impl SweepTimer {
    /// First tick is due immediately.
    pub fn new(sweep: Sweep, now: Instant) -> Self {
        Self { sweep, next_tick: now }
    }

    /// `true` when a tick is due at `now`; schedules the following one.
    pub fn tick_due(&mut self, now: Instant, interval: Duration) -> bool {
        if now < self.next_tick {
            return false;
        }
        self.next_tick = now + interval;
        true
    }
}

/// Trailing-edge debounce: only the latest value survives, and it is released
/// once no new value has arrived for the quiet period.
#[derive(Debug, Clone)]
pub struct Debouncer<T> {
    quiet: Duration,
    pending: Option<(T, Instant)>,
}

impl<T> Debouncer<T> {
    pub fn new(quiet: Duration) -> Self {
        Self { quiet, pending: None }
    }

    /// Replace any pending value and restart the quiet period.
    pub fn push(&mut self, value: T, now: Instant) {
        self.pending = Some((value, now + self.quiet));
    }

    /// Take the pending value if its quiet period has elapsed at `now`.
    pub fn poll(&mut self, now: Instant) -> Option<T> {
        match &self.pending {
            Some((_, due)) if now >= *due => self.pending.take().map(|(v, _)| v),
            _ => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn cancel(&mut self) {
        self.pending = None;
    }
}
