use std::sync::Arc;

use criterion::{Criterion, criterion_group, criterion_main};
use fdm_core::config::{MotionCfg, SafetyCfg};
use fdm_core::mocks::NullStepperPort;
use fdm_core::motion::planner::Planner;

/// Admission cost with the ring kept half full: every buffer_line call
/// replans the whole window (reverse + forward + trapezoid refresh), which
/// is the planner's hot path.
fn bench_admission(c: &mut Criterion) {
    c.bench_function("buffer_line_zigzag_half_full", |b| {
        b.iter_batched(
            || {
                Planner::new(
                    MotionCfg::default(),
                    SafetyCfg::default(),
                    Arc::new(NullStepperPort),
                )
                .unwrap()
            },
            |mut planner| {
                for i in 0..8 {
                    let x = (i + 1) as f32 * 3.0;
                    let y = if i % 2 == 0 { 0.0 } else { 4.0 };
                    planner
                        .buffer_line([x, y, 0.0, i as f32 * 0.2], 80.0, 0)
                        .unwrap();
                }
                planner
            },
            criterion::BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, bench_admission);
criterion_main!(benches);
