//! Exhaustive single pass at step 1.

use super::SearchContext;
use crate::types::{SearchState, SearchStatus};

pub(super) fn search(ctx: &mut SearchContext, sharpness: f32, lens_pos: &mut i32) -> SearchStatus {
    match ctx.state {
        SearchState::Init => ctx.start_at_extreme(sharpness, lens_pos, 1),
        SearchState::SearchingFocus => {
            ctx.record(sharpness, *lens_pos);

            if ctx.reached_window_end(*lens_pos) {
                return ctx.finish(lens_pos);
            }

            *lens_pos = (*lens_pos + ctx.step).clamp(ctx.window_min, ctx.window_max);
            SearchStatus::Pending
        }
        SearchState::FocusFound | SearchState::Invalid => SearchStatus::Success,
    }
}
