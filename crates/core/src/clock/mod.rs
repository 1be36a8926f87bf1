use std::sync::OnceLock;
use std::time::{Duration, Instant};

fn origin() -> Instant {
    static ORIGIN: OnceLock<Instant> = OnceLock::new();
    *ORIGIN.get_or_init(Instant::now)
}

/// Microseconds since an arbitrary process-wide origin. Never goes
/// backwards and takes no lock, so it is safe from any thread.
pub fn monotonic_time_us() -> i64 {
    i64::try_from(origin().elapsed().as_micros()).unwrap_or(i64::MAX)
}

/// Point in time at which a bounded wait gives up.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Deadline {
    Never,
    At(Instant),
}

impl Deadline {
    /// `None` waits forever.
    pub fn after(timeout: Option<Duration>) -> Self {
        match timeout.and_then(|t| Instant::now().checked_add(t)) {
            Some(at) => Deadline::At(at),
            None => Deadline::Never,
        }
    }

    pub fn expired(&self) -> bool {
        match self {
            Deadline::Never => false,
            Deadline::At(at) => Instant::now() >= *at,
        }
    }
}

/// Maps a timeout in seconds to a wait bound: negative waits forever, zero
/// polls.
pub(crate) fn timeout_from_secs(seconds: f64) -> Option<Duration> {
    if seconds.is_nan() || seconds < 0.0 {
        None
    } else {
        Some(Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX))
    }
}
