use core::fmt;

/// One reserved, contiguous range `[min, max]` plus a cursor into it.
///
/// The bounds never change once a segment exists; only the cursor advances.
/// Values come out strictly increasing, each exactly once.
///
/// # Example
///
/// ```
/// use bizseq::Segment;
///
/// // A reservation of 3 that moved the high-water mark to 4.
/// let mut segment = Segment::from_reservation(4, 3).unwrap();
/// assert_eq!((segment.min(), segment.max()), (1, 3));
/// assert_eq!(segment.take(), Some(1));
/// assert_eq!(segment.take(), Some(2));
/// assert_eq!(segment.take(), Some(3));
/// assert_eq!(segment.take(), None);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    min: u64,
    max: u64,
    /// Next value to hand out; `max + 1` once exhausted.
    next: u64,
}

impl Segment {
    /// Creates a segment covering `[min, max]`. Returns `None` if the range is
    /// empty or `max` is `u64::MAX`.
    pub const fn new(min: u64, max: u64) -> Option<Self> {
        if min > max || max == u64::MAX {
            return None;
        }
        Some(Self { min, max, next: min })
    }

    /// Translates a reservation of `step` values that left the high-water
    /// mark at `max_id` into the range `[max_id - step, max_id - 1]`.
    pub const fn from_reservation(max_id: u64, step: u32) -> Option<Self> {
        let step = step as u64;
        if step == 0 || max_id < step {
            return None;
        }
        Self::new(max_id - step, max_id - 1)
    }

    /// Hands out the next value, or `None` once the range is used up.
    pub const fn take(&mut self) -> Option<u64> {
        if self.next > self.max {
            return None;
        }
        let id = self.next;
        self.next += 1;
        Some(id)
    }

    pub const fn min(&self) -> u64 {
        self.min
    }

    pub const fn max(&self) -> u64 {
        self.max
    }

    /// The next value [`Self::take`] would return, or `max + 1`.
    pub const fn cursor(&self) -> u64 {
        self.next
    }

    /// Total number of values in the range.
    pub const fn len(&self) -> u64 {
        self.max - self.min + 1
    }

    /// Values not yet handed out.
    pub const fn remaining(&self) -> u64 {
        self.max + 1 - self.next
    }

    pub const fn is_exhausted(&self) -> bool {
        self.next > self.max
    }

    /// Whether at least half of the range has been handed out.
    pub const fn past_half(&self) -> bool {
        self.remaining().saturating_mul(2) <= self.len()
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}] @ {}", self.min, self.max, self.next)
    }
}
