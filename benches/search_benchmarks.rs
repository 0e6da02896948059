//! Performance benchmarks for the focus search engines
//!
//! Run with: cargo bench
//!
//! Every strategy runs to convergence on a synthetic parabolic curve; the
//! frame path benchmark feeds whole AFM measurements through a session.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use isp_autofocus::config::AfConfig;
use isp_autofocus::lens::StaticWindows;
use isp_autofocus::search::SearchContext;
use isp_autofocus::testing::{SyntheticLens, SyntheticScene};
use isp_autofocus::types::{SearchStatus, SearchStrategy};
use isp_autofocus::AfHandle;

fn converge(strategy: SearchStrategy, peak: i32) -> i32 {
    let scene = SyntheticScene::parabola(peak);
    let mut ctx = SearchContext::new(&AfConfig::default().search);
    ctx.init(0, 1000);
    let mut pos = 0;
    loop {
        let sharpness = scene.sharpness_at(pos) as f32;
        if ctx.search(strategy, sharpness, &mut pos).unwrap() == SearchStatus::Success {
            return pos;
        }
    }
}

fn bench_strategies(c: &mut Criterion) {
    let mut group = c.benchmark_group("Search Convergence");

    for strategy in [
        SearchStrategy::FullRange,
        SearchStrategy::HillClimbing,
        SearchStrategy::AdaptiveRange,
    ] {
        group.bench_with_input(
            BenchmarkId::from_parameter(strategy.as_str()),
            &strategy,
            |b, &strategy| b.iter(|| converge(black_box(strategy), black_box(613))),
        );
    }

    group.finish();
}

fn bench_one_shot_session(c: &mut Criterion) {
    c.bench_function("one-shot session (adaptive)", |b| {
        b.iter(|| {
            let lens = SyntheticLens::new(1000, 0).with_full_travel_ms(0);
            let scene = SyntheticScene::parabola(613);
            let af = AfHandle::init(AfConfig::default()).unwrap();
            af.configure(
                Box::new(lens.clone()),
                Box::new(StaticWindows::only_a()),
                SearchStrategy::AdaptiveRange,
            )
            .unwrap();
            af.one_shot(SearchStrategy::AdaptiveRange).unwrap();
            while !af.settled().unwrap() {
                af.process_frame(black_box(&scene.measure(lens.position())))
                    .unwrap();
            }
            lens.position()
        })
    });
}

criterion_group!(search_benches, bench_strategies, bench_one_shot_session);
criterion_main!(search_benches);
