//! Basic Step Search Algorithm (BSSA)
//!
//! Evenly stepped scan over a closed interval of lens positions. The caller
//! feeds one sharpness sample per call together with the lens position it
//! was taken at; the scan answers with the next position to visit until the
//! stop position has been measured.

use crate::assert_invariant;

/// Approximate number of steps used to cover one scan range.
pub const ADAPTIVE_STEPS_PER_RANGE: i32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BssaState {
    Start,
    Search,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BssaStatus {
    Busy,
    Success,
}

/// Scan parameters and results. Pure value type, re-initialised per scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BssaCtx {
    pub state: BssaState,
    pub lens_start: i32,
    pub lens_stop: i32,
    /// Always positive; the direction follows from start/stop.
    pub step: i32,
    pub lens_pos_best: i32,
    pub lens_pos_worst: i32,
    pub sharpness_max: u32,
    pub sharpness_min: u32,
}

impl BssaCtx {
    /// Context ready to scan `start..=stop` in about
    /// [`ADAPTIVE_STEPS_PER_RANGE`] steps.
    pub fn new(start: i32, stop: i32) -> Self {
        let mut ctx = Self {
            state: BssaState::Start,
            lens_start: start,
            lens_stop: stop,
            step: 1,
            lens_pos_best: start,
            lens_pos_worst: start,
            sharpness_max: 0,
            sharpness_min: u32::MAX,
        };
        ctx.reinit(start, stop);
        ctx
    }

    /// Restart the scan on a new interval. The caller guarantees the interval
    /// lies inside the lens range.
    pub fn reinit(&mut self, start: i32, stop: i32) {
        self.lens_start = start;
        self.lens_stop = stop;
        self.step = ((start - stop).abs() / ADAPTIVE_STEPS_PER_RANGE).max(1);
        self.state = BssaState::Start;
        self.sharpness_max = 0;
        self.sharpness_min = u32::MAX;
    }

    fn ascending(&self) -> bool {
        self.lens_start < self.lens_stop
    }

    /// Feed the sharpness measured at `*lens_pos`.
    ///
    /// Returns [`BssaStatus::Success`] once the stop position was measured; the
    /// lens position is left untouched then. Otherwise `*lens_pos` holds the
    /// next position to measure.
    pub fn search(&mut self, sharpness: u32, lens_pos: &mut i32) -> BssaStatus {
        match self.state {
            BssaState::Start => {
                if *lens_pos != self.lens_start {
                    *lens_pos = self.lens_start;
                    return BssaStatus::Busy;
                }
                self.sharpness_max = sharpness;
                self.sharpness_min = sharpness;
                self.lens_pos_best = *lens_pos;
                self.lens_pos_worst = *lens_pos;
                self.state = BssaState::Search;
            }
            BssaState::Search => {
                if sharpness > self.sharpness_max {
                    self.sharpness_max = sharpness;
                    self.lens_pos_best = *lens_pos;
                }
                if sharpness < self.sharpness_min {
                    self.sharpness_min = sharpness;
                    self.lens_pos_worst = *lens_pos;
                }
            }
            BssaState::Done => return BssaStatus::Success,
        }

        assert_invariant!(
            self.sharpness_max >= self.sharpness_min,
            "BSSA maximum sharpness never drops below the minimum",
            "bssa"
        );

        if *lens_pos == self.lens_stop {
            self.state = BssaState::Done;
            return BssaStatus::Success;
        }

        let previous = *lens_pos;
        *lens_pos = if self.ascending() {
            (previous + self.step).min(self.lens_stop)
        } else {
            (previous - self.step).max(self.lens_stop)
        };

        assert_invariant!(
            if self.ascending() {
                *lens_pos > previous && *lens_pos <= self.lens_stop
            } else {
                *lens_pos < previous && *lens_pos >= self.lens_stop
            },
            "BSSA steps monotonically and never past the stop position",
            "bssa"
        );

        BssaStatus::Busy
    }

    /// Whether the best position sits on the border of the scanned range.
    ///
    /// Returns `+step` when the true peak is expected above the best
    /// position, `-step` when below, and 0 when the best is interior or the
    /// scan already used a step of 1.
    pub fn best_at_range_border(&self) -> i32 {
        let at_border =
            self.lens_pos_best == self.lens_start || self.lens_pos_best == self.lens_stop;

        if !at_border || self.step == 1 {
            return 0;
        }

        if self.lens_pos_best > self.lens_pos_worst {
            self.step
        } else {
            -self.step
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(ctx: &mut BssaCtx, mut pos: i32, curve: impl Fn(i32) -> u32) -> Vec<i32> {
        let mut visited = Vec::new();
        for _ in 0..1000 {
            visited.push(pos);
            if ctx.search(curve(pos), &mut pos) == BssaStatus::Success {
                return visited;
            }
        }
        panic!("scan did not finish");
    }

    #[test]
    fn test_reinit_step() {
        let ctx = BssaCtx::new(0, 800);
        assert_eq!(ctx.step, 100);
        assert_eq!(ctx.state, BssaState::Start);
        assert_eq!(ctx.sharpness_max, 0);
        assert_eq!(ctx.sharpness_min, u32::MAX);

        let narrow = BssaCtx::new(10, 13);
        assert_eq!(narrow.step, 1);
    }

    #[test]
    fn test_moves_to_start_first() {
        let mut ctx = BssaCtx::new(100, 0);
        let mut pos = 40;
        assert_eq!(ctx.search(7, &mut pos), BssaStatus::Busy);
        assert_eq!(pos, 100);
        assert_eq!(ctx.state, BssaState::Start);
    }

    #[test]
    fn test_descending_scan_lands_on_stop() {
        let mut ctx = BssaCtx::new(100, 0);
        let visited = scan(&mut ctx, 100, |p| 1000 - (p - 30).unsigned_abs());
        assert_eq!(visited, vec![100, 88, 76, 64, 52, 40, 28, 16, 4, 0]);
        assert_eq!(ctx.state, BssaState::Done);
        assert_eq!(ctx.lens_pos_best, 28);
        assert_eq!(ctx.lens_pos_worst, 100);
    }

    #[test]
    fn test_best_at_border() {
        let mut ctx = BssaCtx::new(0, 80);
        scan(&mut ctx, 0, |p| 1000 - p as u32);
        assert_eq!(ctx.lens_pos_best, 0);
        assert_eq!(ctx.lens_pos_worst, 80);
        assert_eq!(ctx.best_at_range_border(), -ctx.step);

        let mut ctx = BssaCtx::new(0, 80);
        scan(&mut ctx, 0, |p| p as u32);
        assert_eq!(ctx.best_at_range_border(), ctx.step);

        let mut ctx = BssaCtx::new(0, 80);
        scan(&mut ctx, 0, |p| 1000 - (p - 40).unsigned_abs());
        assert_eq!(ctx.best_at_range_border(), 0);
    }

    #[test]
    fn test_unit_step_scan_cannot_be_refined() {
        let mut ctx = BssaCtx::new(10, 13);
        scan(&mut ctx, 10, |p| 1000 - (p - 11).unsigned_abs());
        assert_eq!(ctx.step, 1);
        assert_eq!(ctx.lens_pos_best, 11);
        assert_eq!(ctx.best_at_range_border(), 0);

        // best on the border, but a unit step leaves nothing to re-scan
        let mut ctx = BssaCtx::new(10, 13);
        scan(&mut ctx, 10, |p| p as u32);
        assert_eq!(ctx.lens_pos_best, 13);
        assert_eq!(ctx.best_at_range_border(), 0);
    }
}
