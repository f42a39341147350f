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

//! Breakline constraints: densify polylines to the grid resolution and
//! reduce them to one representative sample per crossed node bin.
//!
//! The reduced samples are appended with breakline rank, so they outsort
//! ordinary data sharing a bin and become the retained constraint there.

use log::debug;

use crate::data::{DataPoint, PointKind};
use crate::error::{Result, SurfaceError};
use crate::grid::GridGeometry;

/// Two line endpoints are treated as sharing an ordinate below this.
const COLINEAR_EPS: f64 = 1.0e-12;

/// Node centre of a possibly out-of-range column.
fn col_center(geom: &GridGeometry, col: i64) -> f64 {
    if col == geom.nx as i64 - 1 {
        geom.wesn[1]
    } else {
        geom.wesn[0] + col as f64 * geom.inc[0]
    }
}

/// Node centre of a possibly out-of-range row.
fn row_center(geom: &GridGeometry, row: i64) -> f64 {
    if row == geom.ny as i64 - 1 {
        geom.wesn[2]
    } else {
        geom.wesn[3] - row as f64 * geom.inc[1]
    }
}

/// Foot of the perpendicular from the node centre (x0, y0) onto the edge
/// from `p` to `q`, if it lands between the endpoints and inside the bin.
///
/// Returns the foot with z linearly interpolated along the edge, and its
/// distance from the node centre.
fn closest_point_on_edge(
    p: [f64; 3],
    q: [f64; 3],
    x0: f64,
    y0: f64,
    half_dx: f64,
    half_dy: f64,
) -> Option<([f64; 3], f64)> {
    let dx = q[0] - p[0];
    let dy = q[1] - p[1];
    if dx.abs() < COLINEAR_EPS {
        // Vertical edge: the foot is at the node's y
        if (q[1] <= y0 && p[1] > y0) || (p[1] <= y0 && q[1] > y0) {
            let zz = p[2] + (q[2] - p[2]) * (y0 - p[1]) / dy;
            return Some(([q[0], y0, zz], (q[0] - x0).abs()));
        }
    } else if dy.abs() < COLINEAR_EPS {
        // Horizontal edge: the foot is at the node's x
        if (q[0] <= x0 && p[0] > x0) || (p[0] <= x0 && q[0] > x0) {
            let zz = p[2] + (q[2] - p[2]) * (x0 - p[0]) / dx;
            return Some(([x0, q[1], zz], (q[1] - y0).abs()));
        }
    } else {
        let a = dy / dx;
        let xx = (y0 - p[1] + a * p[0] + x0 / a) / (a + 1.0 / a);
        let yy = a * (xx - q[0]) + q[1];
        if (q[0] <= xx && p[0] > xx) || (p[0] <= xx && q[0] > xx) {
            if (xx - x0).abs() < half_dx && (yy - y0).abs() < half_dy {
                let zz = p[2] + (q[2] - p[2]) * (xx - p[0]) / dx;
                return Some(([xx, yy, zz], (xx - x0).hypot(yy - y0)));
            }
        }
    }
    None
}

/// Densify the polyline segments and append one nearest sample per crossed
/// bin to the data constraints.
///
/// With `fixed_z` set, the supplied z values (if any) are overridden by the
/// fixed level.
pub(crate) fn append_breakline(
    data: &mut Vec<DataPoint>,
    segments: &[Vec<[f64; 3]>],
    fixed_z: Option<f64>,
    geom: &GridGeometry,
) -> Result<()> {
    let half_dx = 0.5 * geom.inc[0];
    let half_dy = 0.5 * geom.inc[1];
    let max_r_inc = geom.r_inc[0].max(geom.r_inc[1]);
    let mut n_raw = 0usize;
    let mut n_dense = 0usize;
    let mut n_reduced = 0usize;

    for (seg_no, seg) in segments.iter().enumerate() {
        if seg.len() < 2 {
            return Err(SurfaceError::BreaklineTooShort(seg_no));
        }
        n_raw += seg.len();

        // 1. Resample every edge so no crossed cell is skipped
        let mut line: Vec<[f64; 3]> = Vec::with_capacity(seg.len());
        for win in seg.windows(2) {
            let (p, q) = (win[0], win[1]);
            let dx = q[0] - p[0];
            let dy = q[1] - p[1];
            let n_int = (dx.hypot(dy) * max_r_inc).ceil() as usize + 1;
            let (step_x, step_y) = (dx / n_int as f64, dy / n_int as f64);
            let (z_p, step_z) = match fixed_z {
                Some(level) => (level, 0.0),
                None => (p[2], (q[2] - p[2]) / n_int as f64),
            };
            for j in 0..n_int {
                line.push([p[0] + j as f64 * step_x, p[1] + j as f64 * step_y, z_p + j as f64 * step_z]);
            }
        }
        let last = seg[seg.len() - 1];
        line.push([last[0], last[1], fixed_z.unwrap_or(last[2])]);
        n_dense += line.len();

        // 2. Walk the densified line, keeping the sample nearest to each
        // bin's node; the perpendicular foot onto the node is considered as
        // a candidate for both the bin being left and the bin being entered.
        let mut reduced: Vec<[f64; 3]> = Vec::new();
        let mut bin_this = (geom.y_to_row(line[0][1]), geom.x_to_col(line[0][0]));
        let mut x0_this = col_center(geom, bin_this.1);
        let mut y0_this = row_center(geom, bin_this.0);
        let mut best = line[0];
        let mut r_min = (line[0][0] - x0_this).hypot(line[0][1] - y0_this);

        for k in 1..line.len() {
            let bin_prev = bin_this;
            let (x0_prev, y0_prev) = (x0_this, y0_this);
            bin_this = (geom.y_to_row(line[k][1]), geom.x_to_col(line[k][0]));
            x0_this = col_center(geom, bin_this.1);
            y0_this = row_center(geom, bin_this.0);
            let r_this = (line[k][0] - x0_this).hypot(line[k][1] - y0_this);

            if bin_this == bin_prev && r_this < r_min {
                best = line[k];
                r_min = r_this;
            }
            if let Some((foot, r)) = closest_point_on_edge(line[k - 1], line[k], x0_prev, y0_prev, half_dx, half_dy) {
                if r < r_min {
                    best = foot;
                    r_min = r;
                }
            }
            if bin_this != bin_prev {
                reduced.push(best);
                best = line[k];
                r_min = r_this;
                if let Some((foot, r)) = closest_point_on_edge(line[k - 1], line[k], x0_this, y0_this, half_dx, half_dy) {
                    if r < r_min {
                        best = foot;
                        r_min = r;
                    }
                }
            }
        }
        reduced.push(best);
        n_reduced += reduced.len();

        // 3. Append in-domain samples as breakline constraints
        for s in reduced {
            if s[2].is_nan() {
                continue;
            }
            let col = geom.x_to_col(s[0]);
            let row = geom.y_to_row(s[1]);
            if col < 0 || col >= geom.nx as i64 || row < 0 || row >= geom.ny as i64 {
                continue;
            }
            data.push(DataPoint {
                x: s[0],
                y: s[1],
                z: s[2],
                index: geom.index(row as usize, col as usize),
                kind: PointKind::Breakline,
            });
        }
    }

    debug!(
        "breakline: {} vertices, resampled to {} points, reduced to {} bin constraints",
        n_raw, n_dense, n_reduced
    );
    Ok(())
}
