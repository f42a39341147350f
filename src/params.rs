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

//! Solver configuration

use crate::error::{Result, SurfaceError};
use crate::grid::{GridShape, Raster};

/// Default iteration cap at the final grid size.
pub const DEFAULT_MAX_ITERATIONS: u32 = 500;

/// Default over-relaxation factor.
pub const DEFAULT_OVER_RELAXATION: f64 = 1.4;

/// Default convergence limit as a fraction of the detrended data rms
/// (100 ppm).
pub const DEFAULT_CONVERGENCE_FRACTION: f64 = 1.0e-4;

/// Anisotropy weighting of the stencil, alpha = dy/dx.
#[derive(Clone, Copy, Debug)]
pub enum Aspect {
    /// Fixed ratio; 1 treats dx and dy as equal distances
    Ratio(f64),
    /// cos(mid-latitude) of the region; geographic grids only
    MidLatitude,
}

/// Convergence criterion for the relaxation sweeps.
#[derive(Clone, Copy, Debug)]
pub enum Convergence {
    /// 100 ppm of the detrended data rms
    Default,
    /// Absolute limit on max |change in z| per sweep, in data units
    Absolute(f64),
    /// Limit as a fraction of the detrended data rms
    Fraction(f64),
}

/// One side of an optional clamp on the solution.
#[derive(Clone, Debug)]
pub enum Limit {
    /// No constraint on this side
    None,
    /// Use the extreme data value (minimum for the lower side, maximum for
    /// the upper side)
    Data,
    /// A constant level
    Value(f64),
    /// A bounding surface with the output grid's geometry. NaN nodes are
    /// unconstrained.
    Grid(Raster),
}

impl Limit {
    pub(crate) fn is_none(&self) -> bool {
        matches!(self, Limit::None)
    }
}

/// All knobs recognized by the gridding engine.
///
/// The defaults reproduce the classic minimum-curvature solution: zero
/// tension, isotropic stencil, over-relaxation 1.4 and a convergence limit
/// of 100 ppm of the data rms.
#[derive(Clone, Debug)]
pub struct SurfaceParams {
    /// Tension in the interior equations, in [0, 1]
    pub interior_tension: f64,
    /// Tension in the boundary conditions, in [0, 1]
    pub boundary_tension: f64,
    /// Stencil anisotropy
    pub aspect: Aspect,
    /// Over-relaxation factor, in [1, 2]
    pub over_relaxation: f64,
    /// Iteration cap at the final grid size (scaled by the stride on
    /// coarser grids)
    pub max_iterations: u32,
    /// Convergence criterion
    pub convergence: Convergence,
    /// Radius for the optional Gaussian moving-average prefill of the
    /// coarsest grid; 0 skips the prefill
    pub search_radius: f64,
    /// Optional clamp from below
    pub lower: Limit,
    /// Optional clamp from above
    pub upper: Limit,
    /// Override breakline z values with a fixed level
    pub breakline_z: Option<f64>,
    /// Allow the optimal-region advisor to enlarge the domain for a better
    /// multigrid ladder (the output is trimmed back to the request)
    pub allow_region_expansion: bool,
    /// Worker threads for the row-partitioned relaxation sweep; 1 keeps the
    /// strict Gauss-Seidel ordering
    pub threads: usize,
}

impl Default for SurfaceParams {
    fn default() -> Self {
        SurfaceParams {
            interior_tension: 0.0,
            boundary_tension: 0.0,
            aspect: Aspect::Ratio(1.0),
            over_relaxation: DEFAULT_OVER_RELAXATION,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            convergence: Convergence::Default,
            search_radius: 0.0,
            lower: Limit::None,
            upper: Limit::None,
            breakline_z: None,
            allow_region_expansion: true,
            threads: 1,
        }
    }
}

impl SurfaceParams {
    /// Set both interior and boundary tension at once.
    pub fn tension(mut self, t: f64) -> Self {
        self.interior_tension = t;
        self.boundary_tension = t;
        self
    }

    /// Check every knob against its allowed range, before any data is read.
    pub(crate) fn validate(&self, shape: &GridShape) -> Result<()> {
        for &t in &[self.interior_tension, self.boundary_tension] {
            if !(0.0..=1.0).contains(&t) {
                return Err(SurfaceError::InvalidTension(t));
            }
        }
        if !(1.0..=2.0).contains(&self.over_relaxation) {
            return Err(SurfaceError::InvalidRelaxation(self.over_relaxation));
        }
        if self.max_iterations == 0 {
            return Err(SurfaceError::InvalidIterations);
        }
        match self.aspect {
            Aspect::Ratio(a) if !(a > 0.0) => return Err(SurfaceError::InvalidAspect(a)),
            Aspect::MidLatitude if !shape.geographic => {
                return Err(SurfaceError::AspectRequiresGeographic)
            }
            _ => {}
        }
        match self.convergence {
            Convergence::Absolute(v) | Convergence::Fraction(v) if !(v > 0.0) => {
                return Err(SurfaceError::InvalidConvergence(v))
            }
            _ => {}
        }
        Ok(())
    }

    /// Resolve the aspect ratio for a given region.
    pub(crate) fn alpha(&self, shape: &GridShape) -> f64 {
        match self.aspect {
            Aspect::Ratio(a) => a,
            Aspect::MidLatitude => (0.5 * (shape.wesn[2] + shape.wesn[3])).to_radians().cos(),
        }
    }
}
