//! Shot-readiness heuristic over the recent sharpness history.

use crate::config::ShotCheckConfig;
use crate::search::relative_delta;

pub const SHARPNESS_HISTORY_LEN: usize = 10;

/// Ring of recent absolute frame-to-frame sharpness deltas.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SharpnessHistory {
    log: [f32; SHARPNESS_HISTORY_LEN],
    /// Deltas pushed since the last clear.
    pushed: u32,
}

impl SharpnessHistory {
    pub fn push(&mut self, delta: f32) {
        let slot = self.pushed as usize % SHARPNESS_HISTORY_LEN;
        self.log[slot] = delta;
        self.pushed = self.pushed.saturating_add(1);
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn pushed(&self) -> u32 {
        self.pushed
    }

    /// Up to `n` most recent deltas, newest first.
    pub fn recent(&self, n: usize) -> impl Iterator<Item = f32> + '_ {
        let available = (self.pushed as usize).min(SHARPNESS_HISTORY_LEN);
        let newest = self.pushed as usize;
        (1..=n.min(available)).map(move |back| self.log[(newest - back) % SHARPNESS_HISTORY_LEN])
    }
}

/// Which threshold table applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShotMode {
    OneShot,
    Continuous,
}

/// Decide whether the image is steady enough to take a shot.
///
/// `focused` is the sharpness recorded at focus time, `previous` the last
/// frame's sharpness and `current` this frame's.
pub fn raw_log_check(
    config: &ShotCheckConfig,
    mode: ShotMode,
    focused: f32,
    previous: f32,
    current: f32,
    history: &SharpnessHistory,
) -> bool {
    let thresholds = match mode {
        ShotMode::OneShot => config.one_shot,
        ShotMode::Continuous => config.continuous,
    };
    let drift = relative_delta(focused, current).abs();
    let step = relative_delta(previous, current).abs();

    if drift > thresholds.coarse {
        if history.pushed() < 2 {
            return true;
        }
        let limit = config.coarse_lookback_limit;
        !(step > limit || history.recent(2).any(|d| d > limit))
    } else if drift > thresholds.fine {
        if history.pushed() < 4 {
            return false;
        }
        let limit = config.fine_lookback_limit;
        !(step > limit || history.recent(4).any(|d| d > limit))
    } else {
        true
    }
}
