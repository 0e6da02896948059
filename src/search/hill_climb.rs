//! Coarse scan followed by halving windows around the best position.
//!
//! Each time a scan reaches the end of its window, the window shrinks to
//! `best ± |step|` (kept inside the lens range), the step halves and flips
//! direction, and scanning resumes one step in from the new window edge.
//! The search ends when the step can no longer shrink or both neighbours of
//! the best position have been sampled.

use super::SearchContext;
use crate::types::{SearchState, SearchStatus};

pub(super) fn search(ctx: &mut SearchContext, sharpness: f32, lens_pos: &mut i32) -> SearchStatus {
    match ctx.state {
        SearchState::Init => {
            let magnitude = ctx.step.abs().max(1);
            let measured = *lens_pos;
            let status = ctx.start_at_extreme(sharpness, lens_pos, magnitude);
            // Off an extreme, Init only commands the move and samples nothing.
            if ctx.state != SearchState::Init {
                ctx.probed.push(measured);
            }
            status
        }
        SearchState::SearchingFocus => {
            ctx.record(sharpness, *lens_pos);
            ctx.probed.push(*lens_pos);

            if !ctx.reached_window_end(*lens_pos) {
                *lens_pos = (*lens_pos + ctx.step).clamp(ctx.window_min, ctx.window_max);
                return SearchStatus::Pending;
            }

            if ctx.step.abs() <= 1 || peak_bracketed(ctx) {
                return ctx.finish(lens_pos);
            }

            narrow(ctx, lens_pos);
            SearchStatus::Pending
        }
        SearchState::FocusFound | SearchState::Invalid => SearchStatus::Success,
    }
}

/// Both unit neighbours of the best position were sampled (or lie outside
/// the lens range), so no narrower window can improve on it.
fn peak_bracketed(ctx: &SearchContext) -> bool {
    let best = ctx.max_sharpness_pos;
    let sampled = |pos: i32| {
        pos < ctx.range_min || pos > ctx.range_max || ctx.probed.contains(&pos)
    };
    sampled(best - 1) && sampled(best + 1)
}

fn narrow(ctx: &mut SearchContext, lens_pos: &mut i32) {
    let best = ctx.max_sharpness_pos;
    let span = ctx.step.abs();

    let window_min = if best > ctx.window_min {
        (best - span).max(ctx.range_min)
    } else {
        ctx.window_min
    };
    let window_max = if best < ctx.window_max {
        (best + span).min(ctx.range_max)
    } else {
        ctx.window_max
    };

    ctx.window_min = window_min;
    ctx.window_max = window_max;
    ctx.step /= -2;
    ctx.narrowings += 1;

    *lens_pos = if ctx.step > 0 {
        (window_min + ctx.step).min(window_max)
    } else {
        (window_max + ctx.step).max(window_min)
    };

    log::debug!(
        "hill climb round {}: window [{}, {}], step {}, next {}",
        ctx.narrowings,
        window_min,
        window_max,
        ctx.step,
        *lens_pos
    );
}
