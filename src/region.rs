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

//! Optimal-region advisor
//!
//! Convergence of the multigrid progression depends on how many
//! intermediate strides exist, which in turn depends on the prime
//! factorization of the common cell count divisor. Region dimensions that
//! are mutually prime allow no intermediate grids at all. This module
//! searches a small ladder of symmetric region expansions for cell counts
//! whose greatest common divisor factors into many small primes; the
//! solver grids the expanded region and trims the output back to the
//! request by widening the halo pad, never by resampling.

use log::info;

use crate::grid::GridShape;
use crate::multigrid::{gcd_euclid, prime_factors};

/// Largest number of cells added per axis while searching.
const MAX_EXPAND: usize = 32;

/// An expanded region with a better multigrid ladder.
#[derive(Clone, Debug)]
pub struct RegionSuggestion {
    /// Expanded domain as (west, east, south, north)
    pub wesn: [f64; 4],
    /// Cells added on each side (west, east, south, north)
    pub added: [usize; 4],
    /// Prime-factor count of the expanded common divisor
    pub factor_count: usize,
}

/// Rank of a candidate pair of cell counts: many prime factors first, then
/// the least growth, then the larger common divisor.
fn score(cx: usize, cy: usize) -> (usize, usize) {
    let g = gcd_euclid(cx, cy);
    (prime_factors(g).len(), g)
}

/// Search for a region expansion whose cell counts offer a deeper
/// multigrid ladder than the request. Returns `None` when the request
/// cannot be improved, and never expands across the periodic seam or past
/// the poles of a geographic grid.
pub fn suggest_region(shape: &GridShape) -> Option<RegionSuggestion> {
    let cx = ((shape.wesn[1] - shape.wesn[0]) / shape.inc[0]).round() as usize;
    let cy = ((shape.wesn[3] - shape.wesn[2]) / shape.inc[1]).round() as usize;
    let (current_count, _) = score(cx, cy);

    let max_dx = if shape.is_periodic() { 0 } else { MAX_EXPAND.min(cx) };
    let max_dy = MAX_EXPAND.min(cy);

    let mut best: Option<(usize, usize, (usize, usize))> = None;
    for dc in 0..=max_dx {
        for dr in 0..=max_dy {
            if dc == 0 && dr == 0 {
                continue;
            }
            if shape.geographic {
                let s = shape.wesn[2] - (dr / 2) as f64 * shape.inc[1];
                let n = shape.wesn[3] + (dr - dr / 2) as f64 * shape.inc[1];
                if s < -90.0 || n > 90.0 {
                    continue;
                }
            }
            let sc = score(cx + dc, cy + dr);
            let better = match &best {
                None => true,
                Some((bdc, bdr, bsc)) => {
                    sc.0 > bsc.0
                        || (sc.0 == bsc.0 && dc + dr < bdc + bdr)
                        || (sc.0 == bsc.0 && dc + dr == bdc + bdr && sc.1 > bsc.1)
                }
            };
            if better {
                best = Some((dc, dr, sc));
            }
        }
    }

    let (dc, dr, sc) = best?;
    if sc.0 <= current_count {
        info!("no region expansion improves on the current grid dimensions");
        return None;
    }
    // Grow symmetrically; an odd count puts the extra cell east/north
    let added = [dc / 2, dc - dc / 2, dr / 2, dr - dr / 2];
    let wesn = [
        shape.wesn[0] - added[0] as f64 * shape.inc[0],
        shape.wesn[1] + added[1] as f64 * shape.inc[0],
        shape.wesn[2] - added[2] as f64 * shape.inc[1],
        shape.wesn[3] + added[3] as f64 * shape.inc[1],
    ];
    info!(
        "expand region to ({}, {}, {}, {}) for a {}-step factor ladder; the output is trimmed back",
        wesn[0], wesn[1], wesn[2], wesn[3], sc.0
    );
    Some(RegionSuggestion {
        wesn,
        added,
        factor_count: sc.0,
    })
}
