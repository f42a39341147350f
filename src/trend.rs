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

//! Planar detrending and rms normalization of the data constraints

use log::{info, warn};

use crate::data::DataPoint;
use crate::grid::GridGeometry;

/// Residual rms below which the data are taken to lie exactly on a plane.
pub(crate) const FLAT_DATA_LIMIT: f64 = 1.0e-8;

/// Least-squares plane through the data, in fractional grid coordinates:
/// column distance from the west edge and row distance up from the south
/// edge, both in units of the final grid spacing.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct Plane {
    pub intercept: f64,
    pub slope_x: f64,
    pub slope_y: f64,
}

impl Plane {
    /// Change of the plane from (0, 0) to (xx, y_up); no intercept.
    #[inline(always)]
    pub fn trend(&self, xx: f64, y_up: f64) -> f64 {
        self.slope_x * xx + self.slope_y * y_up
    }

    /// Plane value at (xx, y_up), intercept included.
    #[inline(always)]
    pub fn evaluate(&self, xx: f64, y_up: f64) -> f64 {
        self.intercept + self.trend(xx, y_up)
    }
}

/// Fit the least-squares plane and subtract it from every constraint.
///
/// On periodic grids the x-slope is forced to zero; a longitude trend would
/// be discontinuous at the seam. The fit uses the original z values, before
/// any rms normalization.
pub(crate) fn remove_planar_trend(data: &mut [DataPoint], geom: &GridGeometry, periodic: bool) -> Plane {
    let (mut sx, mut sy, mut sz) = (0.0f64, 0.0f64, 0.0f64);
    let (mut sxx, mut sxy, mut sxz, mut syy, mut syz) = (0.0f64, 0.0f64, 0.0f64, 0.0f64, 0.0f64);

    for d in data.iter() {
        let xx = geom.fcol_of(d.x, geom.wesn[0]);
        let y_up = geom.frow_of(d.y, geom.wesn[2]);
        sx += xx;
        sy += y_up;
        sz += d.z;
        sxx += xx * xx;
        sxy += xx * y_up;
        sxz += xx * d.z;
        syy += y_up * y_up;
        syz += y_up * d.z;
    }

    let npoints = data.len() as f64;
    let d = npoints * sxx * syy + 2.0 * sx * sy * sxy - npoints * sxy * sxy - sx * sx * syy - sy * sy * sxx;

    let mut plane = Plane::default();
    if d != 0.0 {
        let a = sz * sxx * syy + sx * sxy * syz + sy * sxy * sxz - sz * sxy * sxy - sx * sxz * syy - sy * syz * sxx;
        let b = npoints * sxz * syy + sz * sy * sxy + sy * sx * syz - npoints * sxy * syz - sz * sx * syy - sy * sy * sxz;
        let c = npoints * sxx * syz + sx * sy * sxz + sz * sx * sxy - npoints * sxy * sxz - sx * sx * syz - sz * sy * sxx;
        plane = Plane {
            intercept: a / d,
            slope_x: b / d,
            slope_y: c / d,
        };
    }
    if periodic {
        plane.slope_x = 0.0;
    }

    for d in data.iter_mut() {
        let xx = geom.fcol_of(d.x, geom.wesn[0]);
        let y_up = geom.frow_of(d.y, geom.wesn[2]);
        d.z -= plane.evaluate(xx, y_up);
    }

    info!(
        "plane fit z = {} + {} * col + {} * row_up",
        plane.intercept, plane.slope_x, plane.slope_y
    );
    plane
}

/// Divide the detrended residuals by their rms value.
///
/// Returns `(z_rms, on_plane)`. When the residual rms vanishes the data lie
/// on the fitted plane; the caller should skip the solve and emit the plane
/// itself (z_rms is reported as 1 in that case so later scaling is a no-op).
pub(crate) fn normalize_by_rms(data: &mut [DataPoint]) -> (f64, bool) {
    let ssz: f64 = data.iter().map(|d| d.z * d.z).sum();
    let z_rms = (ssz / data.len() as f64).sqrt();
    if z_rms < FLAT_DATA_LIMIT {
        warn!("input data lie exactly on a plane");
        return (1.0, true);
    }
    info!("normalize detrended data constraints by z rms = {}", z_rms);
    let r_z_rms = 1.0 / z_rms;
    for d in data.iter_mut() {
        d.z *= r_z_rms;
    }
    (z_rms, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::PointKind;
    use float_cmp::assert_approx_eq;

    fn unit_grid() -> GridGeometry {
        GridGeometry::at_stride([0.0, 1.0, 0.0, 1.0], [0.25, 0.25], 5, 5, 1)
    }

    fn on_plane(x: f64, y: f64) -> DataPoint {
        DataPoint { x, y, z: 2.0 + 3.0 * x - y, index: 0, kind: PointKind::Ordinary }
    }

    #[test]
    fn plane_fit_recovers_planar_data() {
        let geom = unit_grid();
        let mut data = vec![
            on_plane(0.0, 0.0),
            on_plane(1.0, 0.0),
            on_plane(0.0, 1.0),
            on_plane(1.0, 1.0),
            on_plane(0.5, 0.25),
        ];
        let plane = remove_planar_trend(&mut data, &geom, false);
        // Slopes are per grid cell: 3 * 0.25 in x, -1 * 0.25 in y
        assert_approx_eq!(f64, plane.intercept, 2.0, epsilon = 1e-12);
        assert_approx_eq!(f64, plane.slope_x, 0.75, epsilon = 1e-12);
        assert_approx_eq!(f64, plane.slope_y, -0.25, epsilon = 1e-12);
        for d in &data {
            assert!(d.z.abs() < 1e-12);
        }
        let (z_rms, on_plane) = normalize_by_rms(&mut data);
        assert!(on_plane);
        assert_eq!(z_rms, 1.0);
    }

    #[test]
    fn detrend_then_restore_is_identity() {
        let geom = unit_grid();
        let mut data = vec![
            DataPoint { x: 0.25, y: 0.5, z: 4.0, index: 0, kind: PointKind::Ordinary },
            DataPoint { x: 0.5, y: 0.25, z: -1.0, index: 0, kind: PointKind::Ordinary },
            DataPoint { x: 0.75, y: 0.75, z: 2.5, index: 0, kind: PointKind::Ordinary },
            DataPoint { x: 0.0, y: 1.0, z: 0.5, index: 0, kind: PointKind::Ordinary },
        ];
        let original: Vec<f64> = data.iter().map(|d| d.z).collect();
        let plane = remove_planar_trend(&mut data, &geom, false);
        let (z_rms, flat) = normalize_by_rms(&mut data);
        assert!(!flat);
        for (d, &z0) in data.iter().zip(&original) {
            let xx = geom.fcol_of(d.x, geom.wesn[0]);
            let y_up = geom.frow_of(d.y, geom.wesn[2]);
            let restored = d.z * z_rms + plane.evaluate(xx, y_up);
            assert_approx_eq!(f64, restored, z0, epsilon = 1e-12);
        }
    }

    #[test]
    fn periodic_fit_has_no_longitude_slope() {
        let geom = GridGeometry::at_stride([0.0, 360.0, -40.0, 40.0], [22.5, 10.0], 17, 9, 1);
        let mut data = vec![
            DataPoint { x: 0.0, y: -40.0, z: 0.0, index: 0, kind: PointKind::Ordinary },
            DataPoint { x: 90.0, y: 0.0, z: 1.0, index: 0, kind: PointKind::Ordinary },
            DataPoint { x: 180.0, y: 40.0, z: 2.0, index: 0, kind: PointKind::Ordinary },
        ];
        let plane = remove_planar_trend(&mut data, &geom, true);
        assert_eq!(plane.slope_x, 0.0);
    }
}
