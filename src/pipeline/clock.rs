//! Session clock shared by both capture paths

use std::time::Instant;

/// Monotonic microsecond clock anchored at session start.
///
/// Both the screen source and the audio pump stamp their media against the
/// same base instant so the muxed tracks line up without any later offset
/// correction.
#[derive(Debug, Clone, Copy)]
pub struct SessionClock {
    base: Instant,
}

impl SessionClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
        }
    }

    /// Microseconds elapsed since session start.
    pub fn now_us(&self) -> i64 {
        self.base.elapsed().as_micros() as i64
    }
}

impl Default for SessionClock {
    fn default() -> Self {
        Self::new()
    }
}
