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

//! Multigrid stride schedule and coarse-to-fine prolongation
//!
//! The stride starts at the greatest common divisor of (n_cols - 1,
//! n_rows - 1) and shrinks by one prime factor at a time. Each refinement
//! copies the coarse solution onto its fine nodes and forecasts the nodes
//! in between by bilinear interpolation.

use log::debug;

use crate::grid::GridGeometry;
use crate::stencil::status;

pub(crate) fn gcd_euclid(mut a: usize, mut b: usize) -> usize {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

/// Prime factors of n in ascending order, with multiplicity. Empty for
/// n < 2.
pub(crate) fn prime_factors(mut n: usize) -> Vec<usize> {
    let mut factors = Vec::new();
    let mut p = 2usize;
    while p * p <= n {
        while n % p == 0 {
            factors.push(p);
            n /= p;
        }
        p += if p == 2 { 1 } else { 2 };
    }
    if n > 1 {
        factors.push(n);
    }
    factors
}

/// The descending stride schedule of the multigrid progression.
pub(crate) struct StrideLadder {
    factors: Vec<usize>,
    pub current: usize,
}

impl StrideLadder {
    /// Start at the largest stride dividing both cell counts.
    pub fn new(n_cols: usize, n_rows: usize) -> Self {
        let current = gcd_euclid(n_cols - 1, n_rows - 1);
        StrideLadder {
            factors: prime_factors(current),
            current,
        }
    }

    /// Divide the stride by its largest remaining prime factor.
    pub fn divide(&mut self) {
        let f = self.factors.pop().expect("stride schedule exhausted");
        self.current /= f;
    }
}

/// Expand the active grid after a stride refinement.
///
/// The coarse solution (geometry `prev`) is first copied onto its matching
/// fine nodes, walking from the last node to the first so no source is
/// overwritten before it is consumed. Every in-between node is then filled
/// by bilinear interpolation over its four surrounding coarse nodes and
/// flagged unconstrained; the coarse nodes keep their values and are
/// flagged constrained so the forecast is smoothed around them before data
/// coupling is re-established. The missing north and east edges get linear
/// interpolation along the edge.
pub(crate) fn fill_in_forecast(u: &mut [f64], node_status: &mut [u8], prev: &GridGeometry, cur: &GridGeometry) {
    let expand = prev.stride / cur.stride;
    debug!(
        "expand grid by factor {} going from stride {} to {}",
        expand, prev.stride, cur.stride
    );

    for prev_row in (0..prev.ny).rev() {
        let row = prev_row * expand;
        for prev_col in (0..prev.nx).rev() {
            let col = prev_col * expand;
            u[cur.node(row, col)] = u[prev.node(prev_row, prev_col)];
        }
    }

    // Fractions 0, 1/expand, ..., (expand-1)/expand of a coarse cell
    let fraction: Vec<f64> = (0..expand).map(|i| i as f64 / expand as f64).collect();

    // Bilinear fill of each coarse bin square, anchored at its southwest
    // corner; the north and east grid edges are not interior to any square
    // and are handled after.
    for prev_row in 1..prev.ny {
        let row = prev_row * expand;
        for prev_col in 0..prev.nx - 1 {
            let col = prev_col * expand;
            let index_00 = cur.node(row, col);
            let index_01 = index_00 - expand * cur.mx;
            let index_10 = index_00 + expand;
            let index_11 = index_01 + expand;
            // z = c + sx dx + sy dy + sxy dx dy, evaluated as
            // (c + sy dy) + dx (sx + sxy dy)
            let c = u[index_00];
            let sx = u[index_10] - c;
            let sy = u[index_01] - c;
            let sxy = u[index_11] - u[index_10] - sy;
            let mut first = 1usize;
            for j in 0..expand {
                let c_plus_sy_dy = c + sy * fraction[j];
                let sx_plus_sxy_dy = sx + sxy * fraction[j];
                let mut index_new = index_00 - j * cur.mx + first;
                for i in first..expand {
                    u[index_new] = c_plus_sy_dy + fraction[i] * sx_plus_sxy_dy;
                    node_status[index_new] = status::UNCONSTRAINED;
                    index_new += 1;
                }
                first = 0;
            }
            node_status[index_00] = status::CONSTRAINED;
        }
    }

    // Linear interpolation up the east edge
    let mut index_00 = cur.node_ne;
    for _ in 1..prev.ny {
        let index_01 = index_00;
        index_00 += expand * cur.mx;
        let sy = u[index_01] - u[index_00];
        let mut index_new = index_00 - cur.mx;
        for j in 1..expand {
            u[index_new] = u[index_00] + fraction[j] * sy;
            node_status[index_new] = status::UNCONSTRAINED;
            index_new -= cur.mx;
        }
        node_status[index_00] = status::CONSTRAINED;
    }
    // Linear interpolation along the north edge
    let mut index_10 = cur.node_nw;
    for _ in 0..prev.nx - 1 {
        let index_00 = index_10;
        index_10 = index_00 + expand;
        let sx = u[index_10] - u[index_00];
        for i in 1..expand {
            u[index_00 + i] = u[index_00] + fraction[i] * sx;
            node_status[index_00 + i] = status::UNCONSTRAINED;
        }
        node_status[index_00] = status::CONSTRAINED;
    }
    node_status[cur.node_ne] = status::CONSTRAINED;
}
