//! Frame timing
//!
//! Monotonic timestamp sources and the one-time frame interval calibration
//! the engine uses to turn frame counts into durations.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Source of monotonic microsecond timestamps.
pub trait FrameClock: Send + Sync {
    fn now_us(&self) -> u64;
}

/// Wall clock anchored at construction.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    start: Arc<Instant>,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            start: Arc::new(Instant::now()),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameClock for MonotonicClock {
    #[inline]
    fn now_us(&self) -> u64 {
        // Offset by one so the first reading is never the "unset" zero.
        self.start.elapsed().as_micros() as u64 + 1
    }
}

/// Clock advanced by hand; clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now_us: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new(start_us: u64) -> Self {
        Self {
            now_us: Arc::new(AtomicU64::new(start_us)),
        }
    }

    pub fn advance_ms(&self, ms: u64) {
        self.now_us.fetch_add(ms * 1000, Ordering::SeqCst);
    }
}

impl FrameClock for ManualClock {
    fn now_us(&self) -> u64 {
        self.now_us.load(Ordering::SeqCst)
    }
}

/// Estimates the frame interval from the timestamps of the first two frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameIntervalCalibration {
    start_us: Option<u64>,
    end_us: Option<u64>,
    interval_ms: u32,
}

impl FrameIntervalCalibration {
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Record a frame arrival. Only the first two calls after a reset matter.
    pub fn on_frame(&mut self, now_us: u64) {
        match (self.start_us, self.end_us) {
            (None, _) => self.start_us = Some(now_us),
            (Some(start), None) => {
                self.end_us = Some(now_us);
                self.interval_ms = (now_us.saturating_sub(start) / 1000) as u32;
            }
            _ => {}
        }
    }

    /// Calibrated interval, 0 until two frames have been seen.
    pub fn interval_ms(&self) -> u32 {
        self.interval_ms
    }

    /// Calibrated interval, or `fallback_ms` while uncalibrated.
    pub fn interval_or(&self, fallback_ms: u32) -> u32 {
        if self.interval_ms == 0 {
            fallback_ms
        } else {
            self.interval_ms
        }
    }
}
