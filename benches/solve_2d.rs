/// Full gridding benchmark on a synthetic scatter

use criterion::{criterion_group, criterion_main, Criterion};

use tenspline::{Convergence, GridShape, SurfaceParams, SurfaceSolver};

fn my_benchmark(c: &mut Criterion) {
    const NUM_THREADS: usize = 4;
    // A rough topography sampled at a few hundred scattered locations
    let points: Vec<[f64; 3]> = (0..400)
        .map(|k| {
            let x = (k % 20) as f64 / 19.5 + 0.01 * ((k * 7) % 13) as f64;
            let y = (k / 20) as f64 / 19.5 + 0.01 * ((k * 11) % 17) as f64;
            [x, y, (8.0 * x).sin() * (6.0 * y).cos() + 0.3 * x * y]
        })
        .collect();
    let shape = GridShape::new([0.0, 1.2, 0.0, 1.2], [0.0125, 0.0125]).unwrap();
    let params = SurfaceParams {
        convergence: Convergence::Fraction(1.0e-4),
        threads: NUM_THREADS,
        ..SurfaceParams::default()
    };

    c.bench_function("solve_tension_spline_2d", |b| {
        b.iter(|| {
            let mut solver = SurfaceSolver::new(shape.clone(), params.clone()).unwrap();
            solver.add_points(points.iter().cloned());
            solver.solve().unwrap()
        })
    });
}

criterion_group! {
    name = benches;
    config = Criterion::default().sample_size(10);
    targets = my_benchmark
}
criterion_main!(benches);
