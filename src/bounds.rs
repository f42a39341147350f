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

//! Materialization of the optional lower/upper bounding surfaces
//!
//! Because a best-fitting plane is removed from the data, even a constant
//! bound becomes a plane in solver space and must be represented on a full
//! grid.

use log::{debug, info};

use crate::data::ZStats;
use crate::error::{Result, SurfaceError};
use crate::grid::GridGeometry;
use crate::params::Limit;
use crate::trend::Plane;

/// Index of the lower bound in two-element bound arrays.
pub(crate) const LO: usize = 0;
/// Index of the upper bound in two-element bound arrays.
pub(crate) const HI: usize = 1;

/// Build one bounding surface as a halo-padded buffer in solver layout.
///
/// `expected` is the grid shape the caller promised to a raster bound (the
/// originally requested node dimensions); `extra` holds the cells the
/// optimal-region advisor added on each side (w, e, s, n). Added nodes carry
/// NaN, meaning unconstrained. With `transform` present the bound values are
/// moved into solver space: plane removed, residual scaled by 1/z_rms.
pub(crate) fn materialize(
    limit: &Limit,
    end: usize,
    geom: &GridGeometry,
    stats: &ZStats,
    expected: (usize, usize),
    extra: [usize; 4],
    transform: Option<(&Plane, f64)>,
) -> Result<Option<Vec<f64>>> {
    let name = if end == LO { "lower" } else { "upper" };
    let mut buf = match limit {
        Limit::None => return Ok(None),
        Limit::Value(v) => {
            if end == LO && *v > stats.min {
                info!("{} bound {} exceeds the minimum data value {}", name, v, stats.min);
            }
            if end == HI && *v < stats.max {
                info!("{} bound {} is below the maximum data value {}", name, v, stats.max);
            }
            vec![*v; geom.mxmy]
        }
        Limit::Data => {
            let v = if end == LO { stats.min } else { stats.max };
            vec![v; geom.mxmy]
        }
        Limit::Grid(raster) => {
            if (raster.n_cols, raster.n_rows) != expected {
                return Err(SurfaceError::BoundShapeMismatch {
                    want_cols: expected.0,
                    want_rows: expected.1,
                    got_cols: raster.n_cols,
                    got_rows: raster.n_rows,
                });
            }
            // Nodes added by the region expansion stay NaN (unconstrained)
            let mut buf = vec![f64::NAN; geom.mxmy];
            for row in 0..raster.n_rows {
                for col in 0..raster.n_cols {
                    buf[geom.node(row + extra[3], col + extra[0])] = raster.value(row, col);
                }
            }
            buf
        }
    };

    if let Some((plane, r_z_rms)) = transform {
        debug!("move {} bound into detrended, normalized solver space", name);
        for row in 0..geom.ny {
            let y_up = (geom.ny - row - 1) as f64;
            for col in 0..geom.nx {
                let node = geom.node(row, col);
                if buf[node].is_nan() {
                    continue;
                }
                buf[node] = (buf[node] - plane.evaluate(col as f64, y_up)) * r_z_rms;
            }
        }
    }
    Ok(Some(buf))
}
