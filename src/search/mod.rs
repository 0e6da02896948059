//! Focus search strategies
//!
//! Three strategies share one context and one per-frame contract: feed the
//! sharpness measured at the current lens position, get back either
//! [`SearchStatus::Pending`] with the next position to visit written through
//! `lens_pos`, or [`SearchStatus::Success`] once the state reached
//! [`SearchState::FocusFound`] and `lens_pos` holds the best position.
//!
//! - full range: exhaustive scan at step 1 from one extreme to the other
//! - hill climbing: coarse scan, then windows of half the step around the
//!   best position, scanning in alternating directions
//! - adaptive range: coarse candidate path with early peak detection and a
//!   single fine refinement around the best candidate

mod adaptive;
mod full_range;
mod hill_climb;
pub mod path;

pub use path::{CandidatePosition, SearchPath};

use crate::config::SearchConfig;
use crate::errors::AfError;
use crate::types::{SearchState, SearchStatus, SearchStrategy};

/// Normalised difference `(cur - prev) / (cur + prev)`, 0 when both are 0.
pub fn relative_delta(cur: f32, prev: f32) -> f32 {
    let (cur, prev) = (cur as f64, prev as f64);
    let sum = cur + prev;
    if sum == 0.0 || !sum.is_finite() {
        return 0.0;
    }
    ((cur - prev) / sum) as f32
}

/// Accumulators of the active search, owned by one autofocus session.
#[derive(Debug, Clone)]
pub struct SearchContext {
    state: SearchState,
    range_min: i32,
    range_max: i32,
    /// Scan window; narrower than the range only while hill climbing.
    window_min: i32,
    window_max: i32,
    /// Signed; the sign is the scan direction.
    step: i32,
    max_sharpness: f32,
    min_sharpness: f32,
    max_sharpness_pos: i32,
    path: SearchPath,
    /// Positions sampled by the hill climb in this cycle.
    probed: Vec<i32>,
    narrowings: u32,
    steps_per_range: i32,
    fine_search_min_span: i32,
}

impl SearchContext {
    pub fn new(config: &SearchConfig) -> Self {
        let steps = config.steps_per_range.max(1);
        Self {
            state: SearchState::Invalid,
            range_min: 0,
            range_max: 0,
            window_min: 0,
            window_max: 0,
            step: 0,
            max_sharpness: 0.0,
            min_sharpness: 0.0,
            max_sharpness_pos: 0,
            path: SearchPath::with_capacity(steps as usize + 2),
            probed: Vec::new(),
            narrowings: 0,
            steps_per_range: steps,
            fine_search_min_span: config.fine_search_min_span,
        }
    }

    /// Coarse step over `min..=max`: negative, pointing from max to min,
    /// magnitude at least 1.
    pub fn coarse_step(&self, min: i32, max: i32) -> i32 {
        ((min - max) / self.steps_per_range).min(-1)
    }

    /// Arm a new search over the lens range. The first frame after this
    /// decides the direction.
    pub fn init(&mut self, min: i32, max: i32) {
        self.state = SearchState::Init;
        self.range_min = min;
        self.range_max = max;
        self.window_min = min;
        self.window_max = max;
        self.step = self.coarse_step(min, max);
        self.max_sharpness = 0.0;
        self.min_sharpness = 0.0;
        self.max_sharpness_pos = max;
        self.path.clear();
        self.probed.clear();
        self.narrowings = 0;
    }

    /// [`init`](Self::init) plus an unmeasured coarse candidate path from
    /// the top of the range downwards, used by the adaptive strategy.
    pub fn init_with_path(&mut self, min: i32, max: i32) -> Result<(), AfError> {
        self.init(min, max);
        let grid = self.coarse_grid();
        self.path.rebuild(grid.iter().map(|&pos| (pos, 0.0)))?;
        self.path.set_cur(0);
        self.path.set_best(0);
        Ok(())
    }

    /// Restart the search from the current lens position, seeding it with
    /// the sharpness already measured there.
    ///
    /// Returns the first lens position to visit when the strategy wants the
    /// lens moved right away.
    pub fn restart(
        &mut self,
        strategy: SearchStrategy,
        cur_pos: i32,
        cur_sharpness: f32,
    ) -> Result<Option<i32>, AfError> {
        let (min, max) = (self.range_min, self.range_max);
        match strategy {
            SearchStrategy::FullRange | SearchStrategy::HillClimbing => {
                self.init(min, max);
                Ok(None)
            }
            SearchStrategy::AdaptiveRange => {
                self.init(min, max);
                let mut grid = self.coarse_grid();
                if !grid.contains(&cur_pos) {
                    let at = grid.iter().position(|&pos| pos < cur_pos).unwrap_or(grid.len());
                    grid.insert(at, cur_pos);
                }
                self.path.rebuild(grid.iter().map(|&pos| {
                    let sharpness = if pos == cur_pos { cur_sharpness } else { 0.0 };
                    (pos, sharpness)
                }))?;

                let seeded = self.path.position_of(cur_pos).unwrap_or(0);
                self.path.set_best(seeded);
                self.max_sharpness = cur_sharpness;
                self.min_sharpness = cur_sharpness;
                self.max_sharpness_pos = cur_pos;
                self.state = SearchState::SearchingFocus;

                match self.path.first_unmeasured() {
                    Some(target) => {
                        self.path.set_cur(target);
                        Ok(Some(self.path.node(target).pos))
                    }
                    None => {
                        self.path.set_cur(seeded);
                        Ok(None)
                    }
                }
            }
        }
    }

    /// Feed one sharpness sample taken at `*lens_pos` to `strategy`.
    pub fn search(
        &mut self,
        strategy: SearchStrategy,
        sharpness: f32,
        lens_pos: &mut i32,
    ) -> Result<SearchStatus, AfError> {
        match strategy {
            SearchStrategy::FullRange => Ok(full_range::search(self, sharpness, lens_pos)),
            SearchStrategy::HillClimbing => Ok(hill_climb::search(self, sharpness, lens_pos)),
            SearchStrategy::AdaptiveRange => adaptive::search(self, sharpness, lens_pos),
        }
    }

    pub fn state(&self) -> SearchState {
        self.state
    }

    pub fn range(&self) -> (i32, i32) {
        (self.range_min, self.range_max)
    }

    pub fn window(&self) -> (i32, i32) {
        (self.window_min, self.window_max)
    }

    pub fn step(&self) -> i32 {
        self.step
    }

    pub fn max_sharpness(&self) -> f32 {
        self.max_sharpness
    }

    pub fn min_sharpness(&self) -> f32 {
        self.min_sharpness
    }

    pub fn max_sharpness_pos(&self) -> i32 {
        self.max_sharpness_pos
    }

    pub fn path(&self) -> &SearchPath {
        &self.path
    }

    /// Window narrowings performed by the hill climb in this cycle.
    pub fn narrowings(&self) -> u32 {
        self.narrowings
    }

    /// Grid from the top of the range down in coarse steps, clipped at the
    /// bottom.
    fn coarse_grid(&self) -> Vec<i32> {
        let (min, max) = (self.range_min, self.range_max);
        let step = self.coarse_step(min, max);
        let mut grid: Vec<i32> = Vec::with_capacity(self.steps_per_range as usize + 2);
        for i in 0..=self.steps_per_range {
            let pos = (max + i * step).max(min);
            if grid.last() != Some(&pos) {
                grid.push(pos);
            }
        }
        grid
    }

    /// Track the running extremes of one scan sample.
    fn record(&mut self, sharpness: f32, pos: i32) {
        if sharpness > self.max_sharpness {
            self.max_sharpness = sharpness;
            self.max_sharpness_pos = pos;
        }
        if sharpness < self.min_sharpness {
            self.min_sharpness = sharpness;
        }
    }

    fn finish(&mut self, lens_pos: &mut i32) -> SearchStatus {
        self.state = SearchState::FocusFound;
        *lens_pos = self.max_sharpness_pos;
        log::debug!(
            "focus found at {} (sharpness {})",
            self.max_sharpness_pos,
            self.max_sharpness
        );
        SearchStatus::Success
    }

    fn reached_window_end(&self, pos: i32) -> bool {
        (self.step > 0 && pos >= self.window_max) || (self.step < 0 && pos <= self.window_min)
    }

    /// Shared first frame of the scanning strategies: measure at an
    /// extreme of the window and head for the other one, or move to the
    /// nearest extreme first.
    fn start_at_extreme(&mut self, sharpness: f32, lens_pos: &mut i32, step: i32) -> SearchStatus {
        let (min, max) = (self.window_min, self.window_max);
        if min == max {
            self.max_sharpness = sharpness;
            self.min_sharpness = sharpness;
            self.max_sharpness_pos = min;
            return self.finish(lens_pos);
        }

        if *lens_pos == min || *lens_pos == max {
            self.max_sharpness = sharpness;
            self.min_sharpness = sharpness;
            self.max_sharpness_pos = *lens_pos;
            self.step = if *lens_pos == min { step } else { -step };
            *lens_pos = (*lens_pos + self.step).clamp(min, max);
            self.state = SearchState::SearchingFocus;
        } else {
            self.max_sharpness = 0.0;
            *lens_pos = if *lens_pos - min <= max - *lens_pos {
                min
            } else {
                max
            };
        }
        SearchStatus::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AfConfig;

    fn context(min: i32, max: i32) -> SearchContext {
        let mut ctx = SearchContext::new(&AfConfig::default().search);
        ctx.init(min, max);
        ctx
    }

    #[test]
    fn test_relative_delta() {
        assert_eq!(relative_delta(0.0, 0.0), 0.0);
        assert_eq!(relative_delta(300.0, 100.0), 0.5);
        assert_eq!(relative_delta(100.0, 300.0), -0.5);
        assert_eq!(relative_delta(f32::MAX, f32::MAX), 0.0);
    }

    #[test]
    fn test_init_step_points_down() {
        let ctx = context(0, 1000);
        assert_eq!(ctx.state(), SearchState::Init);
        assert_eq!(ctx.step(), -125);
        assert_eq!(ctx.range(), (0, 1000));

        let narrow = context(0, 5);
        assert_eq!(narrow.step(), -1);
    }

    #[test]
    fn test_init_with_path_builds_coarse_grid() {
        let mut ctx = SearchContext::new(&AfConfig::default().search);
        ctx.init_with_path(0, 1000).unwrap();

        let positions: Vec<i32> = ctx.path().nodes().iter().map(|n| n.pos).collect();
        assert_eq!(
            positions,
            vec![1000, 875, 750, 625, 500, 375, 250, 125, 0]
        );
        assert_eq!(ctx.path().cur(), Some(0));
        assert_eq!(ctx.path().best(), Some(0));
        assert_eq!(ctx.max_sharpness_pos(), 1000);
    }

    #[test]
    fn test_grid_is_clipped_for_small_ranges() {
        let mut ctx = SearchContext::new(&AfConfig::default().search);
        ctx.init_with_path(0, 5).unwrap();
        let positions: Vec<i32> = ctx.path().nodes().iter().map(|n| n.pos).collect();
        assert_eq!(positions, vec![5, 4, 3, 2, 1, 0]);
    }

    #[test]
    fn test_restart_seeds_off_grid_position() {
        let mut ctx = context(0, 1000);
        let target = ctx
            .restart(SearchStrategy::AdaptiveRange, 300, 42.0)
            .unwrap();

        assert_eq!(target, Some(1000));
        assert_eq!(ctx.state(), SearchState::SearchingFocus);
        assert_eq!(ctx.path().len(), 10);

        let best = ctx.path().best().unwrap();
        assert_eq!(ctx.path().node(best).pos, 300);
        assert_eq!(ctx.path().node(best).sharpness, 42.0);
        // descending order is kept around the seeded node
        assert_eq!(ctx.path().node(best - 1).pos, 375);
        assert_eq!(ctx.path().node(best + 1).pos, 250);
        assert_eq!(ctx.max_sharpness_pos(), 300);
    }

    #[test]
    fn test_restart_on_grid_position_reuses_node() {
        let mut ctx = context(0, 1000);
        let target = ctx
            .restart(SearchStrategy::AdaptiveRange, 1000, 42.0)
            .unwrap();

        assert_eq!(ctx.path().len(), 9);
        assert_eq!(ctx.path().best(), Some(0));
        assert_eq!(target, Some(875));
    }

    #[test]
    fn test_restart_scanning_strategies_rearm_init() {
        let mut ctx = context(0, 1000);
        let target = ctx.restart(SearchStrategy::FullRange, 420, 9.0).unwrap();
        assert_eq!(target, None);
        assert_eq!(ctx.state(), SearchState::Init);
        assert!(ctx.path().is_empty());
    }
}
