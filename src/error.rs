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

//! Error types for grid setup and solving

use thiserror::Error;

/// Errors reported by the gridding engine.
///
/// Configuration errors are raised before any data is read; input errors are
/// raised before the first relaxation sweep. Numerical conditions (data on a
/// plane, mutually prime grid dimensions, iteration cap reached) are not
/// errors: the solver emits its best estimate and flags the condition in the
/// [`SolveSummary`](crate::SolveSummary) or via warnings.
#[derive(Debug, Error)]
pub enum SurfaceError {
    /// Grid increments must be strictly positive
    #[error("grid increments must be positive, got ({0}, {1})")]
    InvalidIncrement(f64, f64),
    /// The region is empty or does not contain a whole number of increments
    #[error("region ({w}, {e}, {s}, {n}) is inconsistent with increments ({dx}, {dy})")]
    InconsistentRegion {
        w: f64,
        e: f64,
        s: f64,
        n: f64,
        dx: f64,
        dy: f64,
    },
    /// The solver needs at least 4 nodes in each grid direction
    #[error("grid must have at least 4 nodes in each direction, got {0} by {1}")]
    GridTooSmall(usize, usize),
    /// Tension factors must lie in [0, 1]
    #[error("tension factor {0} is outside [0, 1]")]
    InvalidTension(f64),
    /// The over-relaxation factor must lie in [1, 2]
    #[error("over-relaxation factor {0} is outside [1, 2]")]
    InvalidRelaxation(f64),
    /// The iteration cap must be nonzero
    #[error("maximum iteration count must be nonzero")]
    InvalidIterations,
    /// A user-supplied convergence limit must be positive
    #[error("convergence limit {0} is not positive")]
    InvalidConvergence(f64),
    /// The aspect ratio must be strictly positive
    #[error("aspect ratio {0} is not positive")]
    InvalidAspect(f64),
    /// The mid-latitude aspect ratio is only defined for geographic grids
    #[error("mid-latitude aspect ratio requires a geographic grid")]
    AspectRequiresGeographic,
    /// No data survived NaN and domain filtering
    #[error("no usable data points inside the grid region")]
    NoUsablePoints,
    /// A bounding surface does not share the output grid geometry
    #[error("bound grid is {got_cols} by {got_rows} but the output grid is {want_cols} by {want_rows}")]
    BoundShapeMismatch {
        want_cols: usize,
        want_rows: usize,
        got_cols: usize,
        got_rows: usize,
    },
    /// Breakline segments need at least two vertices
    #[error("breakline segment {0} has fewer than 2 vertices")]
    BreaklineTooShort(usize),
}

/// Shorthand for results carrying a [`SurfaceError`].
pub type Result<T> = std::result::Result<T, SurfaceError>;
