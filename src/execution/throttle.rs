use std::sync::{Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// Caps how many input files are open and being matched at once.
///
/// Rayon may run more tasks than this; the extra ones block in [`FileThrottle::admit`].
pub(crate) struct FileThrottle {
    in_flight: Mutex<usize>,
    freed: Condvar,
    limit: usize,
}

/// Admission for one file. The slot is given back when the permit drops, so a file whose
/// validation panics does not leak it.
pub(crate) struct FilePermit<'a> {
    throttle: &'a FileThrottle,
    waited: Duration,
    in_flight: usize,
}

impl FileThrottle {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            in_flight: Mutex::new(0),
            freed: Condvar::new(),
            limit: limit.max(1),
        }
    }

    /// Block until fewer than `limit` files are in flight, then take a slot.
    pub(crate) fn admit(&self) -> FilePermit<'_> {
        let start = Instant::now();
        let mut n = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        let blocked = *n >= self.limit;
        while *n >= self.limit {
            n = self.freed.wait(n).unwrap_or_else(PoisonError::into_inner);
        }
        *n += 1;
        FilePermit {
            throttle: self,
            waited: if blocked { start.elapsed() } else { Duration::ZERO },
            in_flight: *n,
        }
    }
}

impl FilePermit<'_> {
    /// Time spent blocked before admission.
    pub(crate) fn waited(&self) -> Duration {
        self.waited
    }

    /// Files in flight right after this one was admitted, itself included.
    pub(crate) fn in_flight(&self) -> usize {
        self.in_flight
    }
}

impl Drop for FilePermit<'_> {
    fn drop(&mut self) {
        let mut n = self.throttle.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        *n -= 1;
        self.throttle.freed.notify_one();
    }
}
