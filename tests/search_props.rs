//! Property-Based Tests for the focus search engines
//!
//! These tests verify invariants of the BSSA scan and the three search
//! strategies using proptest for input generation and shrinking.
//!
//! Run with: cargo test --test search_props

use isp_autofocus::bssa::{BssaCtx, BssaStatus};
use isp_autofocus::config::AfConfig;
use isp_autofocus::invariant_ppt::{clear_invariant_log, contract_test};
use isp_autofocus::search::SearchContext;
use isp_autofocus::types::{SearchState, SearchStatus, SearchStrategy};
use proptest::prelude::*;

fn parabola(peak: i32) -> impl Fn(i32) -> f32 {
    move |pos| {
        let d = (pos - peak) as f32;
        1_000_000.0 - d * d
    }
}

fn context(max: i32) -> SearchContext {
    let mut ctx = SearchContext::new(&AfConfig::default().search);
    ctx.init(0, max);
    ctx
}

/// Drive `strategy` from `pos` until it reports success; returns the final
/// position and the number of calls.
fn drive(
    ctx: &mut SearchContext,
    strategy: SearchStrategy,
    mut pos: i32,
    curve: &impl Fn(i32) -> f32,
    limit: usize,
) -> Option<(i32, usize)> {
    for calls in 1..=limit {
        let status = ctx.search(strategy, curve(pos), &mut pos).ok()?;
        if status == SearchStatus::Success {
            return Some((pos, calls));
        }
    }
    None
}

// ═══════════════════════════════════════════════════════════════════════════
// BSSA INVARIANTS
// ═══════════════════════════════════════════════════════════════════════════

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    /// INVARIANT: the scan is monotonic, ends exactly on the stop position
    /// and reports a best position inside the scanned interval
    #[test]
    fn bssa_never_overshoots(
        start in 0i32..2000,
        stop in 0i32..2000,
        peak in 0i32..2000,
    ) {
        clear_invariant_log();
        let mut ctx = BssaCtx::new(start, stop);
        let mut pos = start;
        let mut visited = vec![pos];
        let curve = |p: i32| 1_000_000u32 - ((p - peak).unsigned_abs().min(999)).pow(2);

        let mut done = false;
        for _ in 0..200 {
            if ctx.search(curve(pos), &mut pos) == BssaStatus::Success {
                done = true;
                break;
            }
            visited.push(pos);
        }

        prop_assert!(done, "scan {}..{} did not finish", start, stop);
        prop_assert_eq!(*visited.last().unwrap(), stop);
        for pair in visited.windows(2) {
            if start < stop {
                prop_assert!(pair[1] > pair[0]);
            } else {
                prop_assert!(pair[1] < pair[0]);
            }
        }
        let (lo, hi) = (start.min(stop), start.max(stop));
        prop_assert!(ctx.lens_pos_best >= lo && ctx.lens_pos_best <= hi);
        prop_assert!(ctx.sharpness_max >= ctx.sharpness_min);
        contract_test("bssa scan", &["BSSA maximum sharpness never drops below the minimum"]);
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// STRATEGY CONVERGENCE
// ═══════════════════════════════════════════════════════════════════════════

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// INVARIANT: full range visits every position once from either extreme
    /// and lands on the global maximum
    #[test]
    fn full_range_is_symmetric(max in 1i32..300, peak_frac in 0.0f64..=1.0) {
        let peak = (max as f64 * peak_frac).round() as i32;
        let curve = parabola(peak);

        let (from_min, calls_min) =
            drive(&mut context(max), SearchStrategy::FullRange, 0, &curve, 10_000).unwrap();
        let (from_max, calls_max) =
            drive(&mut context(max), SearchStrategy::FullRange, max, &curve, 10_000).unwrap();

        prop_assert_eq!(from_min, peak);
        prop_assert_eq!(from_max, peak);
        prop_assert_eq!(calls_min, calls_max);
        prop_assert_eq!(calls_min, max as usize + 1);
    }

    /// INVARIANT: hill climbing finds the peak of a unimodal curve within
    /// ceil(log2(range / 8)) narrowings
    #[test]
    fn hill_climb_converges(peak in 0i32..=1000, from_top in any::<bool>()) {
        let curve = parabola(peak);
        let mut ctx = context(1000);
        let start = if from_top { 1000 } else { 0 };

        let (pos, _) = drive(&mut ctx, SearchStrategy::HillClimbing, start, &curve, 5_000).unwrap();

        prop_assert_eq!(pos, peak);
        prop_assert_eq!(ctx.state(), SearchState::FocusFound);
        let bound = (1000.0f64 / 8.0).log2().ceil() as u32;
        prop_assert!(ctx.narrowings() <= bound, "{} narrowings", ctx.narrowings());
    }

    /// INVARIANT: the adaptive search always ends on its best measured
    /// candidate, close to the peak of a smooth curve
    #[test]
    fn adaptive_ends_on_best_candidate(peak in 0i32..=1000, start in 0i32..=1000) {
        clear_invariant_log();
        let curve = parabola(peak);
        let mut ctx = context(1000);

        let first = ctx
            .restart(SearchStrategy::AdaptiveRange, start, curve(start))
            .unwrap()
            .unwrap_or(start);
        let result = drive(&mut ctx, SearchStrategy::AdaptiveRange, first, &curve, 100);
        prop_assert!(result.is_some(), "adaptive search did not finish");
        let (pos, calls) = result.unwrap();

        prop_assert!(calls <= 20);
        prop_assert_eq!(pos, ctx.max_sharpness_pos());
        prop_assert!((pos - peak).abs() <= 125, "ended at {} for peak {}", pos, peak);
        prop_assert!(ctx.path().refinements() <= 1);
        contract_test(
            "adaptive search",
            &["best candidate holds the highest measured sharpness"],
        );
    }
}
