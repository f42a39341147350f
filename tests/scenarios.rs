// tenspline - Gridding of scattered data with continuous curvature splines in tension
// Copyright (C) 2026 The tenspline developers

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as
// published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! End-to-end gridding scenarios on small grids.

use float_cmp::assert_approx_eq;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use tenspline::{
    Convergence, GridShape, Limit, Raster, Registration, SurfaceParams, SurfaceSolver,
    SweepRecorder,
};

/// 0..1 x 0..1 at 0.25 spacing: the 5x5 playground of the basic scenarios.
fn unit_shape() -> GridShape {
    GridShape::new([0.0, 1.0, 0.0, 1.0], [0.25, 0.25]).unwrap()
}

/// Tight convergence, no region games; defaults otherwise.
fn tight() -> SurfaceParams {
    SurfaceParams {
        convergence: Convergence::Fraction(1.0e-6),
        allow_region_expansion: false,
        ..SurfaceParams::default()
    }
}

#[test]
fn single_point_at_centre() {
    let mut solver = SurfaceSolver::new(unit_shape(), tight()).unwrap();
    solver.add_points(vec![[0.5, 0.5, 1.0]]);
    let (raster, summary) = solver.solve().unwrap();
    assert!(summary.converged);
    assert_eq!(summary.n_points, 1);
    // The datum sits on a node and is honored exactly
    assert_approx_eq!(f64, raster.value(2, 2), 1.0, epsilon = 1e-12);
    // The surrounding surface stays a bounded extrapolation of the datum
    assert!(raster.values.iter().all(|v| v.is_finite() && (0.0..=2.0).contains(v)));
}

#[test]
fn planar_input_reproduces_the_plane_at_every_node() {
    let mut solver = SurfaceSolver::new(unit_shape(), tight()).unwrap();
    solver.add_points(vec![
        [0.0, 0.0, 0.0],
        [1.0, 0.0, 1.0],
        [0.0, 1.0, 1.0],
        [1.0, 1.0, 2.0],
    ]);
    let (raster, summary) = solver.solve().unwrap();
    assert!(summary.on_plane);
    assert!(summary.converged);
    for row in 0..raster.n_rows {
        for col in 0..raster.n_cols {
            let expect = col as f64 * 0.25 + (4 - row) as f64 * 0.25;
            assert_approx_eq!(f64, raster.value(row, col), expect, epsilon = 1e-10);
        }
    }
}

#[test]
fn two_points_interpolate_monotonically() {
    let mut solver = SurfaceSolver::new(unit_shape(), tight()).unwrap();
    solver.add_points(vec![[0.25, 0.5, 0.0], [0.75, 0.5, 1.0]]);
    let (raster, summary) = solver.solve().unwrap();
    assert!(summary.converged);
    assert_approx_eq!(f64, raster.value(2, 1), 0.0, epsilon = 1e-12);
    assert_approx_eq!(f64, raster.value(2, 3), 1.0, epsilon = 1e-12);
    // Along the row through both data the surface never backtracks
    for col in 0..raster.n_cols - 1 {
        assert!(raster.value(2, col) <= raster.value(2, col + 1) + 1e-9);
    }
}

#[test]
fn lower_bound_is_respected_everywhere() {
    let mut params = tight();
    params.lower = Limit::Value(0.5);
    let mut solver = SurfaceSolver::new(unit_shape(), params).unwrap();
    solver.add_points(vec![[0.5, 0.5, 1.0]]);
    let (raster, _) = solver.solve().unwrap();
    assert_approx_eq!(f64, raster.value(2, 2), 1.0, epsilon = 1e-12);
    assert!(raster.values.iter().all(|&v| v >= 0.5));
}

#[test]
fn both_bounds_box_a_random_scatter() {
    let mut rng = StdRng::seed_from_u64(0x7e5);
    let pts: Vec<[f64; 3]> = (0..40)
        .map(|_| {
            [
                rng.gen_range(0.0..1.0),
                rng.gen_range(0.0..1.0),
                rng.gen_range(-2.0..2.0),
            ]
        })
        .collect();
    let shape = GridShape::new([0.0, 1.0, 0.0, 1.0], [0.125, 0.125]).unwrap();
    let mut params = tight();
    params.lower = Limit::Value(-1.0);
    params.upper = Limit::Value(1.0);
    let mut solver = SurfaceSolver::new(shape, params).unwrap();
    solver.add_points(pts);
    let (raster, _) = solver.solve().unwrap();
    assert!(raster.values.iter().all(|&v| (-1.0..=1.0).contains(&v)));
}

#[test]
fn periodic_longitude_closes_the_seam() {
    let shape = GridShape::new([0.0, 360.0, -40.0, 40.0], [22.5, 10.0])
        .unwrap()
        .geographic();
    assert!(shape.is_periodic());
    let mut solver = SurfaceSolver::new(shape, tight()).unwrap();
    solver.add_points(vec![[0.0, 0.0, 0.0], [180.0, 0.0, 1.0]]);
    let (raster, _) = solver.solve().unwrap();
    assert_eq!((raster.n_cols, raster.n_rows), (17, 9));
    for row in 0..raster.n_rows {
        assert_eq!(raster.value(row, 0), raster.value(row, 16), "row {}", row);
    }
    // The antipodal datum sits on a node and survives the round trip
    assert_approx_eq!(f64, raster.value(4, 8), 1.0, epsilon = 1e-12);
}

#[test]
fn breakline_overrides_ordinary_data_in_its_bins() {
    let mut params = tight();
    params.breakline_z = Some(1.0);
    let mut solver = SurfaceSolver::new(unit_shape(), params).unwrap();
    solver.add_points(vec![[0.5, 0.5, 0.0]]);
    solver
        .add_breakline(&[vec![[0.5, 0.25, 0.0], [0.5, 0.75, 0.0]]])
        .unwrap();
    let (raster, _) = solver.solve().unwrap();
    // The breakline wins the centre bin over the z = 0 point
    assert_approx_eq!(f64, raster.value(2, 2), 1.0, epsilon = 1e-12);
    assert_approx_eq!(f64, raster.value(1, 2), 1.0, epsilon = 1e-12);
    assert_approx_eq!(f64, raster.value(3, 2), 1.0, epsilon = 1e-12);
}

#[test]
fn multigrid_strides_each_reach_their_limit_or_cap() {
    let pts: Vec<[f64; 3]> = (0..30)
        .map(|k| {
            let x = (k % 6) as f64 / 6.0;
            let y = (k / 6) as f64 / 5.0;
            [x, y, (6.3 * x).sin() + y * y]
        })
        .collect();
    let shape = GridShape::new([0.0, 1.0, 0.0, 1.0], [0.125, 0.125]).unwrap();
    let mut solver = SurfaceSolver::new(shape, tight()).unwrap();
    solver.add_points(pts);
    let mut recorder = SweepRecorder::default();
    let (_, summary) = solver.solve_with_log(&mut recorder).unwrap();
    assert!(summary.converged);

    // 9x9 runs strides 2 then 1; each (stride, mode) block must end below
    // its limit or at its iteration cap
    let strides: Vec<usize> = recorder.records.iter().map(|r| r.stride).collect();
    assert!(strides.contains(&2) && strides.contains(&1));
    for (i, rec) in recorder.records.iter().enumerate() {
        let last_of_block = match recorder.records.get(i + 1) {
            None => true,
            Some(next) => next.stride != rec.stride || next.mode != rec.mode,
        };
        if last_of_block {
            assert!(
                rec.max_dz <= rec.limit || rec.iteration >= 500 * rec.stride as u64,
                "stride {} mode {:?} stopped early",
                rec.stride,
                rec.mode
            );
        }
    }
}

#[test]
fn region_expansion_is_invisible_in_the_output() {
    // 11 x 7 nodes: cells 10 x 6 share only a factor of 2, so the advisor
    // will pick a larger region; the output must still match the request
    let shape = GridShape::new([0.0, 10.0, 0.0, 6.0], [1.0, 1.0]).unwrap();
    let mut params = tight();
    params.allow_region_expansion = true;
    let mut solver = SurfaceSolver::new(shape, params).unwrap();
    solver.add_points(vec![[2.0, 2.0, 1.0], [5.0, 3.0, -1.0], [8.0, 4.0, 0.5]]);
    let (raster, _) = solver.solve().unwrap();
    assert_eq!((raster.n_cols, raster.n_rows), (11, 7));
    assert_eq!(raster.wesn, [0.0, 10.0, 0.0, 6.0]);
    // Data on nodes are still honored exactly after the trim
    assert_approx_eq!(f64, raster.value(4, 2), 1.0, epsilon = 1e-12);
    assert_approx_eq!(f64, raster.value(3, 5), -1.0, epsilon = 1e-12);
    assert_approx_eq!(f64, raster.value(2, 8), 0.5, epsilon = 1e-12);
}

#[test]
fn pixel_registration_translates_at_the_boundary() {
    let shape =
        GridShape::with_registration([0.0, 1.0, 0.0, 1.0], [0.25, 0.25], Registration::Pixel)
            .unwrap();
    assert_eq!((shape.n_cols, shape.n_rows), (4, 4));
    let mut solver = SurfaceSolver::new(shape, tight()).unwrap();
    // Pixel centres are at 0.125 + 0.25 k
    solver.add_points(vec![[0.375, 0.625, 2.0]]);
    let (raster, summary) = solver.solve().unwrap();
    assert!(summary.converged);
    assert_eq!((raster.n_cols, raster.n_rows), (4, 4));
    assert_eq!(raster.wesn, [0.0, 1.0, 0.0, 1.0]);
    assert_approx_eq!(f64, raster.x_at(1), 0.375, epsilon = 1e-12);
    assert_approx_eq!(f64, raster.y_at(1), 0.625, epsilon = 1e-12);
    assert_approx_eq!(f64, raster.value(1, 1), 2.0, epsilon = 1e-12);
}

#[test]
fn gaussian_prefill_survives_a_prime_grid() {
    // 6 x 5 nodes are mutually prime in cells (5 x 4... gcd 1): the ladder
    // degenerates to a single stride and the prefill seeds the start
    let shape = GridShape::new([0.0, 5.0, 0.0, 4.0], [1.0, 1.0]).unwrap();
    let mut params = tight();
    params.search_radius = 2.0;
    let mut solver = SurfaceSolver::new(shape, params).unwrap();
    solver.add_points(vec![[1.0, 1.0, 1.0], [4.0, 3.0, -1.0]]);
    let (raster, summary) = solver.solve().unwrap();
    assert!(summary.converged);
    assert_approx_eq!(f64, raster.value(3, 1), 1.0, epsilon = 1e-12);
    assert_approx_eq!(f64, raster.value(1, 4), -1.0, epsilon = 1e-12);
}

#[test]
fn fixed_points_interpolate_through_a_taylor_report() {
    // Scatter with several points exactly on nodes: misfit there is zero by
    // construction, so the reported rms misfit stays small
    let shape = GridShape::new([0.0, 1.0, 0.0, 1.0], [0.125, 0.125]).unwrap();
    let mut solver = SurfaceSolver::new(shape, tight()).unwrap();
    let node_pts: Vec<[f64; 3]> = (0..9)
        .map(|k| {
            let x = 0.125 * k as f64;
            [x, 0.5, (3.0 * x).cos()]
        })
        .collect();
    solver.add_points(node_pts.clone());
    let (raster, summary) = solver.solve().unwrap();
    for p in &node_pts {
        let col = (p[0] / 0.125).round() as usize;
        assert_approx_eq!(f64, raster.value(4, col), p[2], epsilon = 1e-12);
    }
    assert!(summary.rms_misfit.abs() < 1e-9);
    assert!(summary.curvature.is_finite());
}

/// Bound grids are rasters of the request's geometry; NaN disables the
/// clamp per node.
#[test]
fn raster_bound_with_nan_holes() {
    let shape = unit_shape();
    let mut values = vec![f64::NAN; 25];
    // Constrain only the west column to stay at or above 0.9
    for row in 0..5 {
        values[row * 5] = 0.9;
    }
    let bound = Raster {
        wesn: shape.wesn,
        inc: shape.inc,
        n_cols: 5,
        n_rows: 5,
        registration: Registration::Node,
        values,
    };
    let mut params = tight();
    params.lower = Limit::Grid(bound);
    let mut solver = SurfaceSolver::new(shape, params).unwrap();
    solver.add_points(vec![[0.5, 0.5, 1.0]]);
    let (raster, _) = solver.solve().unwrap();
    for row in 0..5 {
        assert!(raster.value(row, 0) >= 0.9);
    }
    assert_approx_eq!(f64, raster.value(2, 2), 1.0, epsilon = 1e-12);
}
