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

//! Finite-difference stencils of the tensioned biharmonic equation and the
//! coupling of off-node data constraints into them, after Briggs (1974) and
//! Smith & Wessel (1990).

use crate::grid::nbr::{E1, E2, N1, N2, NE, NW, S1, S2, SE, SW, W1, W2};

/// Node states kept per active node during a solve.
///
/// Values 1 to 4 are quadrant codes telling which quadrant the node's
/// nearest off-node datum lies in; they double as the first index into
/// [`QUAD_NODES`].
pub(crate) mod status {
    /// No data constraint in this node's bin
    pub const UNCONSTRAINED: u8 = 0;
    pub const QUAD1: u8 = 1;
    pub const QUAD2: u8 = 2;
    pub const QUAD3: u8 = 3;
    pub const QUAD4: u8 = 4;
    /// Node value is fixed: a datum within 5% of the spacing, or a coarse
    /// node preserved across a grid expansion
    pub const CONSTRAINED: u8 = 5;
}

/// Coefficient-set selector for unconstrained nodes.
pub(crate) const SET_UNCONSTRAINED: usize = 0;
/// Coefficient-set selector for nodes with an off-node data constraint.
pub(crate) const SET_CONSTRAINED: usize = 1;

/// A datum within this fraction of the node spacing, in both axes, fixes
/// the node value outright instead of entering through Briggs coupling.
pub(crate) const CLOSENESS_FACTOR: f64 = 0.05;

/// The four stencil neighbours paired with the Briggs coefficients
/// b0..b3, per quadrant of the off-node datum. Row 0 is unused padding so
/// the quadrant code can index directly.
pub(crate) const QUAD_NODES: [[usize; 4]; 5] = [
    [0, 0, 0, 0],
    [NW, W1, S1, SE],
    [SW, S1, E1, NE],
    [SE, E1, N1, NW],
    [NE, N1, W1, SW],
];

/// Precomputed stencil weights and constants for one (aspect, tension)
/// pair. Rebuilt only when those change, never per stride.
#[derive(Clone, Debug)]
pub(crate) struct StencilCoefficients {
    /// Weights of the 12 neighbours, by selector then compass code. The
    /// unconstrained set is normalized by the central coefficient a0; the
    /// constrained set is a partial sum completed by the Briggs terms and a
    /// single division by the cached reciprocal b\[5\].
    pub coeff: [[f64; 12]; 2],
    /// 2 (1 - T)(1 + alpha^4)
    pub a0_const_1: f64,
    /// 2 - T + 2 (1 - T) alpha^2
    pub a0_const_2: f64,
    /// alpha^2
    pub eps_p2: f64,
    /// 1 / alpha^2
    pub eps_m2: f64,
    /// 2 + 2 alpha^2
    pub two_plus_ep2: f64,
    /// 2 + 2 / alpha^2
    pub two_plus_em2: f64,
}

impl StencilCoefficients {
    /// Coefficients of equations (A-4) and (A-7) of Smith & Wessel (1990)
    /// for aspect ratio `alpha` = dy/dx and interior tension `t`.
    pub fn new(alpha: f64, t: f64) -> Self {
        let loose = 1.0 - t;
        let alpha2 = alpha * alpha;
        let alpha4 = alpha2 * alpha2;
        let eps_p2 = alpha2;
        let eps_m2 = 1.0 / alpha2;
        let one_plus_e2 = 1.0 + alpha2;

        let a0 = 1.0
            / (6.0 * alpha4 * loose + 10.0 * alpha2 * loose + 8.0 * loose - 2.0 * one_plus_e2
                + 4.0 * t * one_plus_e2);

        let mut coeff = [[0.0f64; 12]; 2];
        let con = &mut coeff[SET_CONSTRAINED];
        con[W2] = -loose;
        con[E2] = -loose;
        con[N2] = -loose * alpha4;
        con[S2] = -loose * alpha4;
        con[W1] = 2.0 * loose * one_plus_e2;
        con[E1] = con[W1];
        con[N1] = con[W1] * alpha2;
        con[S1] = con[N1];
        con[NW] = -2.0 * loose * alpha2;
        con[NE] = con[NW];
        con[SW] = con[NW];
        con[SE] = con[NW];
        let w1_unc = (2.0 * con[W1] + t) * a0;
        let nw_unc = con[NW] * a0;
        let unc = &mut coeff[SET_UNCONSTRAINED];
        unc[W2] = -loose * a0;
        unc[E2] = unc[W2];
        unc[N2] = -loose * alpha4 * a0;
        unc[S2] = unc[N2];
        unc[W1] = w1_unc;
        unc[E1] = w1_unc;
        unc[N1] = w1_unc * alpha2;
        unc[S1] = unc[N1];
        unc[NW] = nw_unc;
        unc[NE] = nw_unc;
        unc[SW] = nw_unc;
        unc[SE] = nw_unc;

        StencilCoefficients {
            coeff,
            a0_const_1: 2.0 * loose * (1.0 + alpha4),
            a0_const_2: 2.0 - t + 2.0 * loose * alpha2,
            eps_p2,
            eps_m2,
            two_plus_ep2: 2.0 + 2.0 * eps_p2,
            two_plus_em2: 2.0 + 2.0 * eps_m2,
        }
    }
}

/// Ghost-row update constants of the first-order boundary condition
/// (1 - T_b) d2u/dn2 + T_b du/dn = 0 on the four sides.
#[derive(Clone, Copy, Debug)]
pub(crate) struct BoundaryConstants {
    /// West/east: ghost = x0 * edge + x1 * opposite interior
    pub x0: f64,
    pub x1: f64,
    /// North/south: ghost = y0 * edge + y1 * opposite interior
    pub y0: f64,
    pub y1: f64,
}

impl BoundaryConstants {
    pub fn new(alpha: f64, t_b: f64) -> Self {
        let loose = 1.0 - t_b;
        let y_denom = 2.0 * alpha * loose + t_b;
        BoundaryConstants {
            x0: 4.0 * loose / (2.0 - t_b),
            x1: (3.0 * t_b - 2.0) / (2.0 - t_b),
            y0: 4.0 * alpha * loose / y_denom,
            y1: (t_b - 2.0 * alpha * loose) / y_denom,
        }
    }
}

/// The six Briggs values of one off-node constraint: four stencil weights,
/// the pre-multiplied data term, and the cached reciprocal normalization.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct Briggs {
    pub b: [f64; 6],
}

/// Fold a datum at fractional offset (xx, yy) from its node, with detrended
/// and normalized value `z`, into Briggs coefficients.
///
/// (xx, yy) must already be reflected into the first quadrant (both
/// non-negative); the quadrant code selects the matching neighbour nodes at
/// application time.
pub(crate) fn solve_briggs(co: &StencilCoefficients, xx: f64, yy: f64, z: f64) -> Briggs {
    let xx_plus_yy = xx + yy;
    let xx_plus_yy_plus_one = 1.0 + xx_plus_yy;
    let inv_xx_plus_yy_plus_one = 1.0 / xx_plus_yy_plus_one;
    let inv_delta = inv_xx_plus_yy_plus_one / xx_plus_yy;
    let xx2 = xx * xx;
    let yy2 = yy * yy;

    let mut b = [0.0f64; 6];
    b[0] = (xx2 + 2.0 * xx * yy + xx - yy2 - yy) * inv_delta;
    b[1] = 2.0 * (yy - xx + 1.0) * inv_xx_plus_yy_plus_one;
    b[2] = 2.0 * (xx - yy + 1.0) * inv_xx_plus_yy_plus_one;
    b[3] = (-xx2 + 2.0 * xx * yy - xx + yy2 + yy) * inv_delta;
    let b_4 = 4.0 * inv_delta;
    // The sum of the five weights normalizes the constrained update; cache
    // its combination with the a0 constants as a reciprocal so the sweep
    // multiplies instead of divides.
    let sum = b[0] + b[1] + b[2] + b[3] + b_4;
    b[4] = b_4 * z;
    b[5] = 1.0 / (co.a0_const_1 + co.a0_const_2 * sum);
    Briggs { b }
}
