use crate::{Error, Segment};
use core::time::Duration;
use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// Outcome of one [`KeyCache::try_take`] call.
#[derive(Debug)]
pub(crate) struct Take {
    pub status: TakeStatus,
    /// The caller claimed the preload slot and must schedule a preload.
    pub preload: bool,
}

#[derive(Debug)]
pub(crate) enum TakeStatus {
    /// A value was handed out from the active segment.
    Ready { id: u64 },
    /// Both buffers are empty. When parking was requested, `wake` resolves
    /// once a preload lands a new segment.
    Pending { wake: Option<oneshot::Receiver<()>> },
}

#[derive(Debug)]
struct CacheState {
    /// Front is the active segment; at most one more sits behind it.
    buffers: VecDeque<Segment>,
    preloading: bool,
    waiters: Vec<oneshot::Sender<()>>,
    last_used: Instant,
    /// Failure of the most recent preload, cleared by the next fill.
    last_error: Option<Error>,
}

/// The double-buffered segment cache of one business key.
///
/// All state sits behind a single per-key mutex that is never held across an
/// `.await`: callers check, consume and park inside one critical section,
/// and the preload path fills and wakes inside another. A waiter therefore
/// either sees the new segment or is in the list the fill drains; no wake is
/// lost in between.
#[derive(Debug)]
pub struct KeyCache {
    key: String,
    step: u32,
    state: Mutex<CacheState>,
}

impl KeyCache {
    /// Creates a cache whose active buffer is `first`.
    pub fn new(key: impl Into<String>, step: u32, first: Segment) -> Self {
        Self {
            key: key.into(),
            step,
            state: Mutex::new(CacheState {
                buffers: VecDeque::from([first]),
                preloading: false,
                waiters: Vec::new(),
                last_used: Instant::now(),
                last_error: None,
            }),
        }
    }

    /// Takes the next value, promoting the standby buffer when the active one
    /// runs dry.
    ///
    /// Claims the preload slot once at least half of the active segment is
    /// consumed, no standby exists and no preload is already in flight. When
    /// nothing is available and `park` is set, a wake-signal is registered
    /// under the same lock.
    pub(crate) fn try_take(&self, park: bool) -> Take {
        let mut state = self.state.lock();

        loop {
            if let Some(id) = state.buffers.front_mut().and_then(Segment::take) {
                state.last_used = Instant::now();
                let preload = Self::claim_preload(&mut state);
                return Take {
                    status: TakeStatus::Ready { id },
                    preload,
                };
            }
            if state.buffers.len() < 2 {
                break;
            }
            state.buffers.pop_front();
        }

        let preload = Self::claim_preload(&mut state);
        let wake = park.then(|| {
            let (tx, rx) = oneshot::channel();
            state.waiters.push(tx);
            rx
        });

        Take {
            status: TakeStatus::Pending { wake },
            preload,
        }
    }

    fn claim_preload(state: &mut CacheState) -> bool {
        let wanted =
            state.buffers.len() < 2 && state.buffers.front().is_none_or(Segment::past_half);
        if wanted && !state.preloading {
            state.preloading = true;
            return true;
        }
        false
    }

    /// Appends a freshly reserved segment, releases the preload slot and
    /// wakes every parked waiter. Returns how many were woken.
    pub(crate) fn fill(&self, segment: Segment) -> usize {
        let mut state = self.state.lock();

        if state.buffers.front().is_some_and(Segment::is_exhausted) {
            state.buffers.pop_front();
        }
        state.buffers.push_back(segment);
        debug_assert!(state.buffers.len() <= 2);

        state.preloading = false;
        state.last_error = None;

        let woken = state.waiters.len();
        for waiter in state.waiters.drain(..) {
            let _ = waiter.send(());
        }
        woken
    }

    /// Releases the preload slot after a failed preload. Parked waiters stay
    /// parked; their own deadline surfaces the failure.
    pub(crate) fn abandon_preload(&self, err: Error) {
        let mut state = self.state.lock();
        state.preloading = false;
        state.last_error = Some(err);
    }

    /// Drops wake-signals whose receiver has gone away (timed out).
    pub(crate) fn forget_closed_waiters(&self) {
        self.state.lock().waiters.retain(|w| !w.is_closed());
    }

    /// The failure of the most recent preload, if it has not been superseded.
    pub(crate) fn last_error(&self) -> Option<Error> {
        self.state.lock().last_error.clone()
    }

    /// Whether the janitor may drop this cache: unused for at least `idle`,
    /// with no preload in flight and nobody parked.
    pub(crate) fn is_evictable(&self, now: Instant, idle: Duration) -> bool {
        let mut state = self.state.lock();
        state.waiters.retain(|w| !w.is_closed());
        !state.preloading
            && state.waiters.is_empty()
            && now.saturating_duration_since(state.last_used) >= idle
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Size of the segment the key was seeded with. Preloads use the row's
    /// current step and fall back to this one only if the row is gone.
    pub const fn step(&self) -> u32 {
        self.step
    }

    /// Number of segments held (active plus standby).
    pub fn buffered(&self) -> usize {
        self.state.lock().buffers.len()
    }

    /// A copy of the active segment.
    pub fn active(&self) -> Option<Segment> {
        self.state.lock().buffers.front().copied()
    }

    pub fn is_preloading(&self) -> bool {
        self.state.lock().preloading
    }

    /// Number of callers currently parked.
    pub fn waiters(&self) -> usize {
        self.state.lock().waiters.len()
    }

    pub fn last_used(&self) -> Instant {
        self.state.lock().last_used
    }
}
