//! # Timestamp Normalizer
//!
//! One relative clock per session, shared by video and audio. Time zero is
//! the instant the container header is written; every packet is stamped
//! with whole milliseconds elapsed since then, read from a monotonic
//! [`quanta::Clock`] (mockable in tests).
//!
//! Video timestamps are forced strictly increasing: a reading that does not
//! advance past the previous video stamp becomes `previous + 1`. Audio uses
//! the raw reading. Presentation and decode time are always equal.

use std::time::Duration;

use quanta::{Clock, Instant};

/// Shared relative clock with the video monotonicity rule.
#[derive(Debug, Clone)]
pub struct TimestampNormalizer {
    clock: Clock,
    base: Option<Instant>,
    last_video_ms: Option<u64>,
}

impl TimestampNormalizer {
    pub fn new(clock: Clock) -> Self {
        TimestampNormalizer {
            clock,
            base: None,
            last_video_ms: None,
        }
    }

    /// Set time zero to now and forget any previous video stamp.
    pub fn reset_zero(&mut self) {
        self.base = Some(self.clock.now());
        self.last_video_ms = None;
    }

    /// Clear the zero point (session teardown).
    pub fn clear(&mut self) {
        self.base = None;
        self.last_video_ms = None;
    }

    /// Whether time zero has been established.
    pub fn is_started(&self) -> bool {
        self.base.is_some()
    }

    /// Last video timestamp handed out, if any.
    pub fn last_video_ms(&self) -> Option<u64> {
        self.last_video_ms
    }

    /// Milliseconds elapsed since time zero. Zero before the clock starts
    /// or if the source reads earlier than the base.
    pub fn elapsed_ms(&self) -> u64 {
        match self.base {
            Some(base) => {
                let elapsed: Duration = self.clock.now().saturating_duration_since(base);
                elapsed.as_millis() as u64
            }
            None => 0,
        }
    }

    /// Next video timestamp: current reading, bumped to stay strictly
    /// increasing.
    pub fn next_video_ms(&mut self) -> u64 {
        let now = self.elapsed_ms();
        self.video_from_reading(now)
    }

    /// Next audio timestamp: current reading, no adjustment.
    pub fn next_audio_ms(&mut self) -> u64 {
        self.elapsed_ms()
    }

    /// Apply the monotonicity rule to a raw reading and record it.
    pub fn video_from_reading(&mut self, reading_ms: u64) -> u64 {
        let ts = match self.last_video_ms {
            Some(prev) if reading_ms <= prev => prev + 1,
            _ => reading_ms,
        };
        self.last_video_ms = Some(ts);
        ts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_reading_is_taken_as_is() {
        let (clock, _mock) = Clock::mock();
        let mut ts = TimestampNormalizer::new(clock);
        assert_eq!(ts.video_from_reading(0), 0);
    }

    #[test]
    fn identical_readings_are_bumped() {
        let (clock, _mock) = Clock::mock();
        let mut ts = TimestampNormalizer::new(clock);
        assert_eq!(ts.video_from_reading(100), 100);
        assert_eq!(ts.video_from_reading(100), 101);
        assert_eq!(ts.video_from_reading(100), 102);
        assert_eq!(ts.video_from_reading(150), 150);
    }

    #[test]
    fn decreasing_readings_are_bumped() {
        let (clock, _mock) = Clock::mock();
        let mut ts = TimestampNormalizer::new(clock);
        assert_eq!(ts.video_from_reading(200), 200);
        assert_eq!(ts.video_from_reading(50), 201);
        assert_eq!(ts.last_video_ms(), Some(201));
    }

    #[test]
    fn elapsed_follows_mock_clock() {
        let (clock, mock) = Clock::mock();
        let mut ts = TimestampNormalizer::new(clock);
        assert_eq!(ts.elapsed_ms(), 0);

        ts.reset_zero();
        assert!(ts.is_started());
        mock.increment(Duration::from_millis(40));
        assert_eq!(ts.next_audio_ms(), 40);
        assert_eq!(ts.next_video_ms(), 40);
        assert_eq!(ts.next_video_ms(), 41);
        // Audio is not forced forward by video.
        assert_eq!(ts.next_audio_ms(), 40);
    }

    #[test]
    fn reset_zero_forgets_previous_video_time() {
        let (clock, mock) = Clock::mock();
        let mut ts = TimestampNormalizer::new(clock);
        ts.reset_zero();
        mock.increment(Duration::from_millis(500));
        assert_eq!(ts.next_video_ms(), 500);

        ts.reset_zero();
        assert_eq!(ts.next_video_ms(), 0);
    }

    #[test]
    fn clear_stops_the_clock() {
        let (clock, mock) = Clock::mock();
        let mut ts = TimestampNormalizer::new(clock);
        ts.reset_zero();
        mock.increment(Duration::from_millis(10));
        ts.clear();
        assert!(!ts.is_started());
        assert_eq!(ts.elapsed_ms(), 0);
    }
}
