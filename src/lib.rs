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

//! This crate grids scattered (x, y, z) observations onto a regular
//! node-registered grid by fitting a continuous surface that satisfies the
//! tensioned biharmonic equation
//!
//! ```text
//! (1 - T) del4 z - T del2 z = 0
//! ```
//!
//! after [Smith & Wessel (1990)](https://doi.org/10.1190/1.1442837). The
//! tension T dials between a minimum-curvature spline (T = 0) and a
//! harmonic surface (T = 1). The solver is iterative (Gauss-Seidel with
//! over-relaxation) and converges coarse-to-fine over a multigrid stride
//! schedule.
//!
//! Usage
//! -----
//! Basic usage follows one pattern:
//!
//! ```
//! use tenspline::{GridShape, SurfaceParams, SurfaceSolver};
//!
//! // Describe the output grid and the solver configuration
//! let shape = GridShape::new([0.0, 1.0, 0.0, 1.0], [0.25, 0.25])?;
//! let params = SurfaceParams::default().tension(0.25);
//! // Feed the data and solve
//! let mut solver = SurfaceSolver::new(shape, params)?;
//! solver.add_points(vec![[0.2, 0.4, 1.5], [0.8, 0.5, -0.5], [0.5, 0.9, 0.7]]);
//! let (raster, summary) = solver.solve()?;
//! // Retrieve node values, row-major from the northwest corner
//! let _z = raster.value(0, 0);
//! assert!(summary.converged);
//! # Ok::<(), tenspline::SurfaceError>(())
//! ```
//!
//! Optional features: lower/upper clamping surfaces ([`Limit`]), breakline
//! polylines that override ordinary data in the bins they cross
//! ([`SurfaceSolver::add_breakline`]), a Gaussian prefill for grids with
//! poor multigrid ladders, periodic east-west boundaries for full
//! 360-degree geographic grids, and an optimal-region advisor
//! ([`suggest_region`]) that trades a slightly larger domain for a faster
//! multigrid progression.

mod bounds;
mod breakline;
mod data;
mod error;
mod grid;
mod multigrid;
mod params;
mod region;
mod solver;
mod stencil;
mod trend;

pub use error::{Result, SurfaceError};
pub use grid::{GridShape, Raster, Registration};
pub use params::{
    Aspect, Convergence, Limit, SurfaceParams, DEFAULT_CONVERGENCE_FRACTION,
    DEFAULT_MAX_ITERATIONS, DEFAULT_OVER_RELAXATION,
};
pub use region::{suggest_region, RegionSuggestion};
pub use solver::{
    NoopLog, SolveSummary, SurfaceSolver, SweepLog, SweepMode, SweepRecord, SweepRecorder,
};
