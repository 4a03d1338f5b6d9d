//! Presentation-timestamp smoothing for audio sample batches.

/// Derives monotonically non-decreasing presentation timestamps from a
/// stream of variable-latency audio reads.
///
/// The timestamp for a batch of N samples is the wall-clock time at
/// dequeue, adjusted backward by the batch's nominal duration, so it
/// approximates when the *first* sample was captured rather than when the
/// read returned. Consecutive batches chain: the next timestamp is the
/// previous one plus the previous batch's nominal duration. When the
/// wall-clock-derived value drifts ahead of the chained value by two batch
/// durations or more, the chain resets to wall-clock — this recovers from
/// scheduling hiccups without accumulating unbounded drift.
#[derive(Debug)]
pub struct FrameTimestampSmoother {
    /// Samples per second across all channels (sample_rate * channels).
    channels_sample_rate: u64,
    /// Chained timestamp for the next batch, if any batch was seen yet.
    next_pts_us: Option<i64>,
}

impl FrameTimestampSmoother {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            channels_sample_rate: sample_rate as u64 * channels.max(1) as u64,
            next_pts_us: None,
        }
    }

    /// Nominal duration of `samples` interleaved 16-bit samples.
    pub fn batch_duration_us(&self, samples: usize) -> i64 {
        (samples as i64 * 1_000_000) / self.channels_sample_rate as i64
    }

    /// Presentation timestamp for a batch of `samples` interleaved samples
    /// dequeued at wall-clock time `now_us` (microseconds on the session
    /// clock).
    pub fn pts_for_batch(&mut self, samples: usize, now_us: i64) -> i64 {
        let batch_us = self.batch_duration_us(samples);
        // account for the delay of polling the sample data
        let wall_us = now_us - batch_us;

        let pts = match self.next_pts_us {
            None => wall_us,
            Some(chained) => {
                // maybe too late to acquire sample data
                if wall_us - chained >= batch_us * 2 {
                    wall_us
                } else {
                    chained
                }
            }
        };

        self.next_pts_us = Some(pts + batch_us);
        pts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RATE: u32 = 44_100;
    const BATCH: usize = 1024;

    fn batch_us() -> i64 {
        BATCH as i64 * 1_000_000 / SAMPLE_RATE as i64
    }

    #[test]
    fn test_first_batch_backdated_by_duration() {
        let mut smoother = FrameTimestampSmoother::new(SAMPLE_RATE, 1);
        let pts = smoother.pts_for_batch(BATCH, 50_000);
        assert_eq!(pts, 50_000 - batch_us());
    }

    #[test]
    fn test_batches_chain_when_on_schedule() {
        let mut smoother = FrameTimestampSmoother::new(SAMPLE_RATE, 1);
        let first = smoother.pts_for_batch(BATCH, 25_000);
        // next read returns slightly late but within tolerance
        let second = smoother.pts_for_batch(BATCH, 25_000 + batch_us() + 5_000);
        assert_eq!(second, first + batch_us());
    }

    #[test]
    fn test_chain_resets_after_large_gap() {
        let mut smoother = FrameTimestampSmoother::new(SAMPLE_RATE, 1);
        let first = smoother.pts_for_batch(BATCH, 25_000);
        // a scheduling stall of three batch durations
        let late_now = 25_000 + batch_us() * 4;
        let second = smoother.pts_for_batch(BATCH, late_now);
        assert!(second > first + batch_us());
        assert_eq!(second, late_now - batch_us());
    }

    #[test]
    fn test_never_regresses_under_jitter() {
        // 0-40ms of simulated read jitter
        let mut smoother = FrameTimestampSmoother::new(SAMPLE_RATE, 1);
        let jitter = [0i64, 13, 40, 2, 33, 7, 40, 0, 21, 38, 5, 17];
        let mut now = 0i64;
        let mut last_pts = i64::MIN;
        for (i, j) in jitter.iter().cycle().take(200).enumerate() {
            now = (i as i64 + 1) * batch_us() + j * 1_000;
            let pts = smoother.pts_for_batch(BATCH, now);
            assert!(pts >= last_pts, "pts regressed at batch {}", i);
            // never ahead of real elapsed time by more than two durations
            assert!(pts <= now + batch_us() * 2);
            last_pts = pts;
        }
        assert!(last_pts <= now);
    }

    #[test]
    fn test_stereo_batch_duration() {
        let smoother = FrameTimestampSmoother::new(48_000, 2);
        // 960 interleaved samples = 480 per channel = 10ms at 48kHz
        assert_eq!(smoother.batch_duration_us(960), 10_000);
    }
}
