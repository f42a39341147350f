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

//! Data constraints: ingest, bin indexing, sorting and deduplication

use std::cmp::Ordering;

use log::{debug, warn};

use crate::grid::GridGeometry;

/// Bin id marking a record that cannot constrain any node.
pub(crate) const OUTSIDE: u64 = u64::MAX;

/// Origin of a data constraint. Breakline samples outrank ordinary data in
/// the same bin.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum PointKind {
    Ordinary,
    Breakline,
}

/// One (x, y, z) constraint together with the bin it currently belongs to.
#[derive(Clone, Copy, Debug)]
pub(crate) struct DataPoint {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    /// Bin id on the active grid (row * nx + col, no halo), or [`OUTSIDE`]
    pub index: u64,
    pub kind: PointKind,
}

/// Summary statistics of the constraint z values.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct ZStats {
    pub mean: f64,
    pub min: f64,
    pub max: f64,
}

pub(crate) fn z_stats(data: &[DataPoint]) -> ZStats {
    let mut sum = 0.0;
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for d in data {
        sum += d.z;
        min = min.min(d.z);
        max = max.max(d.z);
    }
    ZStats {
        mean: if data.is_empty() { 0.0 } else { sum / data.len() as f64 },
        min,
        max,
    }
}

/// Filter raw records into indexed constraints on the final grid.
///
/// Records with NaN z or more than half a cell outside the domain are
/// dropped. On periodic grids longitudes are first wrapped into the domain;
/// a record that binds the shared west/east column is stored twice, once per
/// side, so both columns see the constraint.
pub(crate) fn ingest<I>(points: I, geom: &GridGeometry, periodic: bool) -> Vec<DataPoint>
where
    I: IntoIterator<Item = [f64; 3]>,
{
    let mut data = Vec::new();
    let (w, e, s, n) = (geom.wesn[0], geom.wesn[1], geom.wesn[2], geom.wesn[3]);
    let half_dx = 0.5 * geom.inc[0];
    let mut n_dup: u64 = 0;
    for rec in points {
        let (mut x, y, z) = (rec[0], rec[1], rec[2]);
        if z.is_nan() {
            continue;
        }
        // Allow points up to one cell outside; the nearest-column test below
        // culls anything beyond half a cell.
        if y < s - geom.inc[1] || y > n + geom.inc[1] {
            continue;
        }
        if periodic {
            x = w + (x - w).rem_euclid(360.0);
        } else if x < w - geom.inc[0] || x > e + geom.inc[0] {
            continue;
        }
        let row = geom.y_to_row(y);
        if row < 0 || row >= geom.ny as i64 {
            continue;
        }
        let col = if periodic && (e - x) < half_dx {
            // Wraps onto the shared boundary: constrain the western node
            x -= 360.0;
            0
        } else {
            geom.x_to_col(x)
        };
        if col < 0 || col >= geom.nx as i64 {
            continue;
        }
        data.push(DataPoint {
            x,
            y,
            z,
            index: geom.index(row as usize, col as usize),
            kind: PointKind::Ordinary,
        });
        if periodic && col == 0 {
            // Replicate onto the eastern boundary column
            data.push(DataPoint {
                x: x + 360.0,
                y,
                z,
                index: geom.index(row as usize, geom.nx - 1),
                kind: PointKind::Ordinary,
            });
            n_dup += 1;
        }
    }
    if n_dup > 0 {
        debug!("{} input values shared between the repeating west and east columns", n_dup);
    }
    data
}

/// Ordering used throughout: bin id ascending, breaklines ahead of ordinary
/// data within a bin, then squared distance to the bin's node ascending.
fn compare_points(a: &DataPoint, b: &DataPoint, geom: &GridGeometry) -> Ordering {
    match a.index.cmp(&b.index) {
        Ordering::Equal => {}
        ord => return ord,
    }
    if a.index == OUTSIDE {
        return Ordering::Equal;
    }
    match (a.kind, b.kind) {
        (PointKind::Breakline, PointKind::Ordinary) => return Ordering::Less,
        (PointKind::Ordinary, PointKind::Breakline) => return Ordering::Greater,
        _ => {}
    }
    let row = geom.index_to_row(a.index);
    let col = geom.index_to_col(a.index);
    let x0 = geom.col_to_x(col);
    let y0 = geom.row_to_y(row);
    let da = (a.x - x0) * (a.x - x0) + (a.y - y0) * (a.y - y0);
    let db = (b.x - x0) * (b.x - x0) + (b.y - y0) * (b.y - y0);
    da.partial_cmp(&db).unwrap_or(Ordering::Equal)
}

pub(crate) fn sort_by_bin(data: &mut [DataPoint], geom: &GridGeometry) {
    data.sort_unstable_by(|a, b| compare_points(a, b, geom));
}

/// Recompute every record's bin id for the active stride, resort, and drop
/// records that fell outside the active grid.
pub(crate) fn reindex(data: &mut Vec<DataPoint>, geom: &GridGeometry) {
    debug!("recompute data bin ids [stride = {}]", geom.stride);
    let mut n_skipped = 0usize;
    for d in data.iter_mut() {
        let col = geom.x_to_col(d.x);
        let row = geom.y_to_row(d.y);
        if col < 0 || col >= geom.nx as i64 || row < 0 || row >= geom.ny as i64 {
            d.index = OUTSIDE;
            n_skipped += 1;
        } else {
            d.index = geom.index(row as usize, col as usize);
        }
    }
    sort_by_bin(data, geom);
    data.truncate(data.len() - n_skipped);
}

/// Keep only the best record per bin.
///
/// Sort; mark every record that shares a bin with a better one as
/// [`OUTSIDE`]; sort again so the marked records collect at the tail, and
/// cut them off. Returns the number of discarded records.
pub(crate) fn discard_duplicates(data: &mut Vec<DataPoint>, geom: &GridGeometry) -> usize {
    sort_by_bin(data, geom);
    let mut last_index = OUTSIDE;
    let mut n_outside = 0usize;
    for d in data.iter_mut() {
        if d.index == last_index {
            d.index = OUTSIDE;
            n_outside += 1;
        } else {
            last_index = d.index;
        }
    }
    if n_outside > 0 {
        sort_by_bin(data, geom);
        data.truncate(data.len() - n_outside);
        warn!(
            "{} data points share a node bin with a closer point and will be ignored; \
             consider pre-averaging the data per block",
            n_outside
        );
    }
    n_outside
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_grid() -> GridGeometry {
        GridGeometry::at_stride([0.0, 1.0, 0.0, 1.0], [0.25, 0.25], 5, 5, 1)
    }

    fn pt(x: f64, y: f64, z: f64) -> [f64; 3] {
        [x, y, z]
    }

    #[test]
    fn ingest_filters_nan_and_far_points() {
        let geom = unit_grid();
        let data = ingest(
            vec![
                pt(0.5, 0.5, 1.0),
                pt(0.5, 0.5, f64::NAN),
                pt(3.0, 0.5, 1.0),
                pt(0.5, -2.0, 1.0),
                // within half a cell outside: kept in the edge bin
                pt(-0.1, 0.5, 2.0),
            ],
            &geom,
            false,
        );
        assert_eq!(data.len(), 2);
        assert_eq!(data[0].index, geom.index(2, 2));
        assert_eq!(data[1].index, geom.index(2, 0));
    }

    #[test]
    fn ingest_duplicates_periodic_boundary_points() {
        let geom = GridGeometry::at_stride([0.0, 360.0, -40.0, 40.0], [22.5, 10.0], 17, 9, 1);
        let data = ingest(vec![pt(359.0, 0.0, 5.0), pt(180.0, 0.0, 1.0)], &geom, true);
        // The point near 360 binds column 0 and is replicated to column 16
        assert_eq!(data.len(), 3);
        assert_eq!(data[0].index, geom.index(4, 0));
        assert!((data[0].x - (-1.0)).abs() < 1e-12);
        assert_eq!(data[1].index, geom.index(4, 16));
        assert!((data[1].x - 359.0).abs() < 1e-12);
    }

    #[test]
    fn duplicates_keep_the_nearest_with_breaklines_first() {
        let geom = unit_grid();
        let mut data = vec![
            DataPoint { x: 0.52, y: 0.5, z: 1.0, index: geom.index(2, 2), kind: PointKind::Ordinary },
            DataPoint { x: 0.50, y: 0.5, z: 2.0, index: geom.index(2, 2), kind: PointKind::Ordinary },
            DataPoint { x: 0.26, y: 0.26, z: 3.0, index: geom.index(2, 1), kind: PointKind::Ordinary },
        ];
        let dropped = discard_duplicates(&mut data, &geom);
        assert_eq!(dropped, 1);
        assert_eq!(data.len(), 2);
        // Bin (2,2) kept the closer z = 2 record
        assert_eq!(data[1].z, 2.0);

        // A farther breakline sample still wins its bin
        data.push(DataPoint { x: 0.6, y: 0.55, z: 9.0, index: geom.index(2, 2), kind: PointKind::Breakline });
        let dropped = discard_duplicates(&mut data, &geom);
        assert_eq!(dropped, 1);
        let bin22: Vec<_> = data.iter().filter(|d| d.index == geom.index(2, 2)).collect();
        assert_eq!(bin22.len(), 1);
        assert_eq!(bin22[0].z, 9.0);
    }

    #[test]
    fn reindex_rebins_for_a_coarser_stride() {
        let base = unit_grid();
        let mut data = ingest(vec![pt(0.25, 0.5, 1.0), pt(0.75, 0.5, 2.0)], &base, false);
        let coarse = GridGeometry::at_stride([0.0, 1.0, 0.0, 1.0], [0.25, 0.25], 5, 5, 2);
        reindex(&mut data, &coarse);
        assert_eq!(data.len(), 2);
        // Both points snap to the nearest coarse node column (ties round up)
        assert_eq!(data[0].index, coarse.index(1, 1));
        assert_eq!(data[1].index, coarse.index(1, 2));
    }
}
