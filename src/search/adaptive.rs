//! Adaptive-range search over the candidate path with early peak detection
//! and one fine refinement around the best candidate.

use super::{relative_delta, SearchContext};
use crate::assert_invariant;
use crate::errors::AfError;
use crate::types::{SearchState, SearchStatus};

pub(super) fn search(
    ctx: &mut SearchContext,
    sharpness: f32,
    lens_pos: &mut i32,
) -> Result<SearchStatus, AfError> {
    match ctx.state {
        SearchState::Init | SearchState::SearchingFocus => {}
        SearchState::FocusFound | SearchState::Invalid => return Ok(SearchStatus::Success),
    }

    let mut cur = ctx
        .path
        .cur()
        .ok_or_else(|| AfError::WrongConfig("adaptive search has no candidate path".into()))?;

    if ctx.state == SearchState::Init {
        // the path is built without a lens move; visit its head first
        let head = ctx.path.node(cur).pos;
        if *lens_pos != head {
            *lens_pos = head;
            return Ok(SearchStatus::Pending);
        }
        ctx.state = SearchState::SearchingFocus;
    }

    loop {
        measure(ctx, cur, sharpness);

        if cur >= 2 && peak_passed(ctx, cur) {
            match fine(ctx, lens_pos) {
                SearchStatus::Success => return Ok(ctx.finish(lens_pos)),
                SearchStatus::Pending => return Ok(SearchStatus::Pending),
            }
        }

        match ctx.path.next(cur) {
            Some(next) => {
                ctx.path.set_cur(next);
                if ctx.path.node(next).is_measured() {
                    cur = next;
                    continue;
                }
                *lens_pos = ctx.path.node(next).pos;
                return Ok(SearchStatus::Pending);
            }
            None => {
                return match fine(ctx, lens_pos) {
                    SearchStatus::Success => Ok(ctx.finish(lens_pos)),
                    SearchStatus::Pending => Ok(SearchStatus::Pending),
                };
            }
        }
    }
}

/// Store the sample on node `cur` (unless already known) and update the
/// delta and the running extremes.
fn measure(ctx: &mut SearchContext, cur: usize, sharpness: f32) {
    if !ctx.path.node(cur).is_measured() {
        ctx.path.node_mut(cur).sharpness = sharpness;
    }

    let value = ctx.path.node(cur).sharpness;
    let d = match ctx.path.prev(cur) {
        Some(prev) => relative_delta(value, ctx.path.node(prev).sharpness),
        None => 0.0,
    };
    ctx.path.node_mut(cur).d_sharpness = d;

    if value > ctx.max_sharpness {
        ctx.max_sharpness = value;
        ctx.max_sharpness_pos = ctx.path.node(cur).pos;
        ctx.path.set_best(cur);
    }
    if value < ctx.min_sharpness || ctx.min_sharpness == 0.0 {
        ctx.min_sharpness = value;
    }

    let best_sharpness = ctx
        .path
        .best()
        .map(|best| ctx.path.node(best).sharpness)
        .unwrap_or(0.0);
    assert_invariant!(
        ctx.path
            .nodes()
            .iter()
            .filter(|node| node.is_measured())
            .all(|node| node.sharpness <= best_sharpness),
        "best candidate holds the highest measured sharpness",
        "adaptive search"
    );
}

/// Heuristics deciding that the sharpness peak lies behind node `cur`.
fn peak_passed(ctx: &SearchContext, cur: usize) -> bool {
    let d = ctx.path.node(cur).d_sharpness;
    if d >= 0.0 {
        return false;
    }
    if ctx.path.refinements() > 0 {
        return true;
    }

    let pre = ctx.path.node(cur - 1).d_sharpness;
    if d < -0.75 || pre - d > 1.1 {
        return true;
    }
    if pre < 0.0 {
        if d + pre < -0.5 {
            return true;
        }
        if cur >= 3 {
            let ppre = ctx.path.node(cur - 2).d_sharpness;
            if ppre < 0.0 && d + pre + ppre < -0.5 {
                return true;
            }
        }
    }
    false
}

/// Replace the path with a short sub-path around the best candidate.
///
/// Success means the search converged: already refined once, nothing to
/// refine, span too narrow, or the sub-path could not be allocated.
fn fine(ctx: &mut SearchContext, lens_pos: &mut i32) -> SearchStatus {
    if ctx.path.refinements() > 0 {
        return SearchStatus::Success;
    }
    let Some(best) = ctx.path.best() else {
        return SearchStatus::Success;
    };

    let best_node = *ctx.path.node(best);
    let prev = ctx.path.prev(best).map(|i| *ctx.path.node(i));
    let next = ctx.path.next(best).map(|i| *ctx.path.node(i));

    let (start, end) = match (prev, next) {
        (Some(prev), Some(next)) => (prev, next),
        (Some(prev), None) => (prev, best_node),
        (None, Some(next)) => (best_node, next),
        (None, None) => return SearchStatus::Success,
    };

    if (end.pos - start.pos).abs() < ctx.fine_search_min_span {
        log::debug!(
            "fine search skipped, span {}..{} is already precise",
            start.pos,
            end.pos
        );
        return SearchStatus::Success;
    }

    let mut points: Vec<i32> = match (prev, next) {
        (Some(_), Some(_)) => vec![start.pos, 0, best_node.pos, 0, end.pos],
        _ => vec![start.pos, 0, end.pos],
    };
    for i in (1..points.len()).step_by(2) {
        points[i] = (points[i - 1] + points[i + 1]) / 2;
    }

    let known = [Some(start), Some(best_node), Some(end), prev, next];
    let sharpness_at = |pos: i32| {
        known
            .iter()
            .flatten()
            .find(|node| node.pos == pos)
            .map(|node| node.sharpness)
            .unwrap_or(0.0)
    };

    if let Err(e) = ctx
        .path
        .refine(points.iter().map(|&pos| (pos, sharpness_at(pos))))
    {
        log::warn!("fine search aborted, keeping best known position: {}", e);
        return SearchStatus::Success;
    }

    if let Some(best) = ctx.path.position_of(best_node.pos) {
        ctx.path.set_best(best);
    }

    match ctx.path.first_unmeasured() {
        Some(target) => {
            ctx.path.set_cur(target);
            *lens_pos = ctx.path.node(target).pos;
            SearchStatus::Pending
        }
        None => SearchStatus::Success,
    }
}
