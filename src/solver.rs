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

//! The gridding solver: Gauss-Seidel relaxation with over-relaxation of
//! the tensioned biharmonic equation, driven coarse-to-fine by the
//! multigrid stride schedule.

use std::mem;

use itertools::izip;
use log::{debug, info, warn};

use crate::bounds::{self, HI, LO};
use crate::breakline;
use crate::data::{self, DataPoint};
use crate::error::{Result, SurfaceError};
use crate::grid::{nbr, GridGeometry, GridShape, Raster, Registration};
use crate::multigrid::{fill_in_forecast, StrideLadder};
use crate::params::{Convergence, SurfaceParams, DEFAULT_CONVERGENCE_FRACTION};
use crate::region;
use crate::stencil::{
    solve_briggs, status, BoundaryConstants, Briggs, StencilCoefficients, CLOSENESS_FACTOR,
    QUAD_NODES, SET_CONSTRAINED, SET_UNCONSTRAINED,
};
use crate::trend::{self, Plane};

// Calculates ceil(x/y) for x > 0
fn ceil_div(x: usize, y: usize) -> usize {
    1 + (x - 1) / y
}

/// Which nodes a relaxation pass works for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SweepMode {
    /// Smooth the bilinear forecast right after a grid expansion, before
    /// data coupling is re-established
    Nodes,
    /// Regular pass with data constraints active
    Data,
}

impl SweepMode {
    /// Single-letter tag used in log lines.
    pub fn code(self) -> char {
        match self {
            SweepMode::Nodes => 'I',
            SweepMode::Data => 'D',
        }
    }
}

/// One line of convergence history: a single relaxation sweep.
#[derive(Clone, Debug)]
pub struct SweepRecord {
    pub stride: usize,
    pub mode: SweepMode,
    /// Sweep number within the current stride and mode
    pub iteration: u64,
    /// Largest |change in z| of this sweep, in data units
    pub max_dz: f64,
    /// Convergence limit in effect at this stride
    pub limit: f64,
    /// Sweeps so far over the whole solve
    pub total_iterations: u64,
}

/// Receiver of per-sweep convergence records.
pub trait SweepLog {
    /// A new stride/mode block is starting.
    fn stride_begin(&mut self, stride: usize, mode: SweepMode, limit: f64) {
        let _ = (stride, mode, limit);
    }
    /// One relaxation sweep has completed.
    fn sweep(&mut self, record: &SweepRecord) {
        let _ = record;
    }
}

/// Discards all records.
pub struct NoopLog;

impl SweepLog for NoopLog {}

/// Collects every record in memory.
#[derive(Default)]
pub struct SweepRecorder {
    pub records: Vec<SweepRecord>,
}

impl SweepLog for SweepRecorder {
    fn sweep(&mut self, record: &SweepRecord) {
        self.records.push(record.clone());
    }
}

/// Outcome of a solve.
#[derive(Clone, Debug)]
pub struct SolveSummary {
    /// Relaxation sweeps over all strides and modes
    pub total_iterations: u64,
    /// Largest |change in z| of the final sweep, in data units
    pub final_max_dz: f64,
    /// Convergence limit at the final grid size, in data units
    pub convergence_limit: f64,
    /// False when the iteration cap ended the final stride instead of the
    /// convergence limit
    pub converged: bool,
    /// Data constraints retained after deduplication
    pub n_points: usize,
    /// Mean misfit of the surface at the data constraints
    pub mean_misfit: f64,
    /// Rms misfit of the surface at the data constraints
    pub rms_misfit: f64,
    /// Sum of squared discrete Laplacians over the grid interior
    pub curvature: f64,
    /// True when the input data lay on a plane and that plane was emitted
    /// without iterating
    pub on_plane: bool,
}

/// Scattered-data gridding with continuous curvature splines in tension.
///
/// The solver fits a surface satisfying (1 - T) del4 z - T del2 z = 0 to
/// (x, y, z) constraints on a node-registered grid, per Smith & Wessel
/// (1990). Usage follows one pattern:
///
/// ```
/// use tenspline::{GridShape, SurfaceParams, SurfaceSolver};
///
/// let shape = GridShape::new([0.0, 1.0, 0.0, 1.0], [0.25, 0.25])?;
/// let mut solver = SurfaceSolver::new(shape, SurfaceParams::default())?;
/// solver.add_points(vec![[0.5, 0.5, 1.0]]);
/// let (raster, summary) = solver.solve()?;
/// assert!(summary.converged);
/// # assert_eq!(raster.n_cols, 5);
/// # Ok::<(), tenspline::SurfaceError>(())
/// ```
pub struct SurfaceSolver {
    shape: GridShape,
    params: SurfaceParams,
    alpha: f64,
    periodic: bool,
    /// Node dimensions of the internal solve grid
    n_cols: usize,
    n_rows: usize,
    /// Cells the advisor added on each side (w, e, s, n)
    extra: [usize; 4],
    /// Stride-1 geometry of the internal solve grid
    final_geom: GridGeometry,
    data: Vec<DataPoint>,
}

impl SurfaceSolver {
    /// Validate the configuration and set up the internal solve geometry.
    ///
    /// All configuration errors surface here, before any data is read. A
    /// pixel-registered request is translated to the half-cell-shifted node
    /// grid it is solved on; when allowed, the optimal-region advisor may
    /// enlarge the domain (the output is trimmed back to the request).
    pub fn new(shape: GridShape, params: SurfaceParams) -> Result<Self> {
        params.validate(&shape)?;
        let alpha = params.alpha(&shape);
        let periodic = shape.is_periodic();
        if periodic && shape.is_global_latitude() {
            warn!(
                "gridding a global geographic data set: the solve is Cartesian, which \
                 distorts nodes near the poles"
            );
        }

        let cells = [
            ((shape.wesn[1] - shape.wesn[0]) / shape.inc[0]).round() as usize,
            ((shape.wesn[3] - shape.wesn[2]) / shape.inc[1]).round() as usize,
        ];
        let (mut wesn, mut extra) = (shape.wesn, [0usize; 4]);
        if params.allow_region_expansion && !periodic {
            if let Some(s) = region::suggest_region(&shape) {
                wesn = s.wesn;
                extra = s.added;
            }
        }
        if shape.registration == Registration::Pixel {
            // Solve on nodes at the pixel centres, plus one throwaway
            // column east and row north that the output assembly drops
            wesn = [
                wesn[0] + 0.5 * shape.inc[0],
                wesn[1] + 0.5 * shape.inc[0],
                wesn[2] + 0.5 * shape.inc[1],
                wesn[3] + 0.5 * shape.inc[1],
            ];
        }
        let n_cols = cells[0] + extra[0] + extra[1] + 1;
        let n_rows = cells[1] + extra[2] + extra[3] + 1;
        if n_cols < 4 || n_rows < 4 {
            return Err(SurfaceError::GridTooSmall(n_cols, n_rows));
        }
        let final_geom = GridGeometry::at_stride(wesn, shape.inc, n_cols, n_rows, 1);

        Ok(SurfaceSolver {
            shape,
            params,
            alpha,
            periodic,
            n_cols,
            n_rows,
            extra,
            final_geom,
            data: Vec::new(),
        })
    }

    /// Stream (x, y, z) records into the solver. NaN z means skip; records
    /// more than half a cell outside the domain are dropped.
    pub fn add_points<I>(&mut self, points: I)
    where
        I: IntoIterator<Item = [f64; 3]>,
    {
        let mut ingested = data::ingest(points, &self.final_geom, self.periodic);
        self.data.append(&mut ingested);
    }

    /// Add polyline constraints. Each segment is densified to the grid
    /// resolution and reduced to one sample per crossed bin; those samples
    /// override ordinary data sharing a bin.
    pub fn add_breakline(&mut self, segments: &[Vec<[f64; 3]>]) -> Result<()> {
        breakline::append_breakline(
            &mut self.data,
            segments,
            self.params.breakline_z,
            &self.final_geom,
        )
    }

    /// Solve and return the output raster with a convergence summary.
    pub fn solve(self) -> Result<(Raster, SolveSummary)> {
        self.solve_with_log(&mut NoopLog)
    }

    /// Like [`solve`](Self::solve), but reporting every relaxation sweep to
    /// the given log sink.
    pub fn solve_with_log(mut self, log: &mut dyn SweepLog) -> Result<(Raster, SolveSummary)> {
        if self.data.is_empty() {
            return Err(SurfaceError::NoUsablePoints);
        }
        let stats = data::z_stats(&self.data);
        debug!(
            "{} input constraints, z mean {}, range [{}, {}]",
            self.data.len(),
            stats.mean,
            stats.min,
            stats.max
        );

        // Eliminate data that cannot constrain the final grid, fit and
        // remove the least-squares plane, and normalize by the residual rms
        data::discard_duplicates(&mut self.data, &self.final_geom);
        let plane = trend::remove_planar_trend(&mut self.data, &self.final_geom, self.periodic);
        let (z_rms, on_plane) = trend::normalize_by_rms(&mut self.data);

        let converge_limit = match self.params.convergence {
            Convergence::Default => DEFAULT_CONVERGENCE_FRACTION * z_rms,
            Convergence::Fraction(f) => f * z_rms,
            Convergence::Absolute(v) => v,
        };
        let n_points = self.data.len();

        let mut engine = Engine {
            co: StencilCoefficients::new(self.alpha, self.params.interior_tension),
            bc: BoundaryConstants::new(self.alpha, self.params.boundary_tension),
            periodic: self.periodic,
            geom: self.final_geom.clone(),
            final_geom: self.final_geom.clone(),
            data: mem::take(&mut self.data),
            u: vec![0.0; self.final_geom.mxmy],
            node_status: vec![status::UNCONSTRAINED; self.final_geom.mxmy],
            briggs: Vec::new(),
            briggs_starts: Vec::new(),
            bound: [None, None],
            plane,
            z_rms,
            converge_limit,
            relax_new: self.params.over_relaxation,
            relax_old: 1.0 - self.params.over_relaxation,
            max_iterations: self.params.max_iterations,
            total_iterations: 0,
            #[cfg(not(target_arch = "wasm32"))]
            pool: if self.params.threads > 1 {
                Some(scoped_threadpool::Pool::new(self.params.threads as u32))
            } else {
                None
            },
        };
        #[cfg(target_arch = "wasm32")]
        {
            if self.params.threads > 1 {
                warn!("thread parallelism is unavailable on wasm; sweeping serially");
            }
        }

        if on_plane {
            // The data are the plane: emit it exactly, with no sweeps
            engine.restore_planar_trend();
            let raster = self.assemble(&engine)?;
            return Ok((
                raster,
                SolveSummary {
                    total_iterations: 0,
                    final_max_dz: 0.0,
                    convergence_limit: converge_limit,
                    converged: true,
                    n_points,
                    mean_misfit: 0.0,
                    rms_misfit: 0.0,
                    curvature: 0.0,
                    on_plane: true,
                },
            ));
        }

        // Bound surfaces join the solve in detrended, normalized space
        for end in LO..=HI {
            let limit = if end == LO { &self.params.lower } else { &self.params.upper };
            engine.bound[end] = bounds::materialize(
                limit,
                end,
                &self.final_geom,
                &stats,
                self.requested_node_dims(),
                self.extra,
                Some((&plane, 1.0 / z_rms)),
            )?;
        }

        // The stride schedule: start at the coarsest feasible grid
        let mut ladder = StrideLadder::new(self.n_cols, self.n_rows);
        if ladder.current == 1 {
            warn!("grid dimensions are mutually prime; convergence will be slow");
        }
        let mut geom = self.stride_geom(ladder.current);
        while geom.nx < 4 || geom.ny < 4 {
            ladder.divide();
            geom = self.stride_geom(ladder.current);
        }
        engine.geom = geom;
        engine.briggs = vec![Briggs::default(); n_points];
        self.report_memory_use(n_points);

        data::reindex(&mut engine.data, &engine.geom);
        if self.params.search_radius > 0.0 {
            engine.initialize_grid(self.params.search_radius, stats.mean);
        }

        // Coarse-to-fine: converge, refine, smooth the forecast, couple the
        // data back in, converge again
        engine.find_nearest_constraint();
        let (_, mut final_max_dz, mut converged) = engine.iterate(SweepMode::Data, log);
        while engine.geom.stride > 1 {
            ladder.divide();
            let prev = mem::replace(&mut engine.geom, self.stride_geom(ladder.current));
            data::reindex(&mut engine.data, &engine.geom);
            fill_in_forecast(&mut engine.u, &mut engine.node_status, &prev, &engine.geom);
            // The forecast leaves no off-node couplings, but the sweep still
            // reads per-row table positions for the refined row count
            engine.briggs_starts = vec![0; engine.geom.ny + 1];
            engine.iterate(SweepMode::Nodes, log);
            engine.find_nearest_constraint();
            let (_, dz, conv) = engine.iterate(SweepMode::Data, log);
            final_max_dz = dz;
            converged = conv;
        }
        if !converged {
            warn!(
                "iteration cap reached before the convergence limit; emitting the best estimate"
            );
        }

        let (mean_misfit, rms_misfit, curvature) = engine.check_errors();
        engine.restore_planar_trend();

        // Clamp the restored surface against the untransformed bounds
        for end in LO..=HI {
            let limit = if end == LO { &self.params.lower } else { &self.params.upper };
            engine.bound[end] = bounds::materialize(
                limit,
                end,
                &self.final_geom,
                &stats,
                self.requested_node_dims(),
                self.extra,
                None,
            )?;
        }
        engine.clip_to_bounds();

        let raster = self.assemble(&engine)?;
        Ok((
            raster,
            SolveSummary {
                total_iterations: engine.total_iterations,
                final_max_dz,
                convergence_limit: converge_limit,
                converged,
                n_points,
                mean_misfit,
                rms_misfit,
                curvature,
                on_plane: false,
            },
        ))
    }

    /// Node dimensions the user's bound rasters must match (the request,
    /// before any region expansion).
    fn requested_node_dims(&self) -> (usize, usize) {
        (
            self.n_cols - self.extra[0] - self.extra[1],
            self.n_rows - self.extra[2] - self.extra[3],
        )
    }

    fn stride_geom(&self, stride: usize) -> GridGeometry {
        GridGeometry::at_stride(
            self.final_geom.wesn,
            self.shape.inc,
            self.n_cols,
            self.n_rows,
            stride,
        )
    }

    fn report_memory_use(&self, n_points: usize) {
        let data = n_points * mem::size_of::<DataPoint>();
        let grid = self.final_geom.mxmy * mem::size_of::<f64>();
        let briggs = n_points * mem::size_of::<Briggs>();
        let status_bytes = self.final_geom.mxmy;
        debug!(
            "memory: data {} B, grid {} B, briggs {} B, status {} B",
            data, grid, briggs, status_bytes
        );
    }

    /// Assemble the output raster: trim any advisor expansion and the pixel
    /// throwaway row/column, enforce exact periodicity, and strip the halo.
    fn assemble(&self, engine: &Engine) -> Result<Raster> {
        let g = &self.final_geom;
        let mut row0 = self.extra[3];
        let col0 = self.extra[0];
        let mut out_rows = self.n_rows - self.extra[2] - self.extra[3];
        let mut out_cols = self.n_cols - self.extra[0] - self.extra[1];
        if self.shape.registration == Registration::Pixel {
            // Drop the throwaway northernmost row and easternmost column
            row0 += 1;
            out_rows -= 1;
            out_cols -= 1;
        }
        debug_assert_eq!((out_cols, out_rows), (self.shape.n_cols, self.shape.n_rows));

        let mut values = vec![0.0f64; out_cols * out_rows];
        for (chunk, row) in izip!(values.chunks_mut(out_cols), row0..row0 + out_rows) {
            let start = g.node(row, col0);
            chunk.copy_from_slice(&engine.u[start..start + out_cols]);
        }

        if self.periodic {
            // The west and east columns are the same node: write their mean
            for chunk in values.chunks_mut(out_cols) {
                let mean = 0.5 * (chunk[0] + chunk[out_cols - 1]);
                chunk[0] = mean;
                chunk[out_cols - 1] = mean;
            }
        }

        Ok(Raster {
            wesn: self.shape.wesn,
            inc: self.shape.inc,
            n_cols: out_cols,
            n_rows: out_rows,
            registration: self.shape.registration,
            values,
        })
    }
}

/// Everything the relaxation owns while a solve runs.
struct Engine {
    co: StencilCoefficients,
    bc: BoundaryConstants,
    periodic: bool,
    /// Active-stride geometry
    geom: GridGeometry,
    /// Stride-1 geometry; bound grids are stored at this layout
    final_geom: GridGeometry,
    data: Vec<DataPoint>,
    /// Solution buffer with halo, final-grid sized; coarser strides use a
    /// leading portion under their own row width
    u: Vec<f64>,
    node_status: Vec<u8>,
    briggs: Vec<Briggs>,
    /// First Briggs table position of each active row, plus a final total
    briggs_starts: Vec<usize>,
    bound: [Option<Vec<f64>>; 2],
    plane: Plane,
    z_rms: f64,
    converge_limit: f64,
    relax_new: f64,
    relax_old: f64,
    max_iterations: u32,
    total_iterations: u64,
    #[cfg(not(target_arch = "wasm32"))]
    pool: Option<scoped_threadpool::Pool>,
}

/// Read-only context one relaxation sweep needs, shared across row chunks.
struct SweepCtx<'a> {
    geom: &'a GridGeometry,
    coeff: &'a [[f64; 12]; 2],
    a0_const_2: f64,
    node_status: &'a [u8],
    briggs: &'a [Briggs],
    briggs_starts: &'a [usize],
    bound_lo: Option<&'a [f64]>,
    bound_hi: Option<&'a [f64]>,
    final_mx: usize,
    relax_old: f64,
    relax_new: f64,
}

/// Raw grid pointer handed to worker threads.
///
/// Safety contract: every thread writes only nodes of its own row range;
/// reads may touch the two adjacent rows of a neighbouring chunk while that
/// chunk is being updated, turning strict Gauss-Seidel into a hybrid
/// Gauss-Seidel/Jacobi relaxation. That is an accepted numerical trade-off
/// of the row-partitioned sweep; run with one thread for strict ordering.
#[derive(Clone, Copy)]
struct SharedGrid(*mut f64);

unsafe impl Send for SharedGrid {}
unsafe impl Sync for SharedGrid {}

/// Relax rows `row0..row1` in place and return the largest |change|.
unsafe fn relax_rows(ctx: &SweepCtx, u: SharedGrid, row0: usize, row1: usize) -> f64 {
    let g = ctx.geom;
    let d = &g.offset;
    let stride = g.stride;
    let mut max_u_change = 0.0f64;
    for row in row0..row1 {
        let row_node = g.node(row, 0);
        let mut node_final = (stride * row + 2) * ctx.final_mx + 2;
        let mut briggs_index = ctx.briggs_starts[row];
        for col in 0..g.nx {
            let node = row_node + col;
            let st = ctx.node_status[node];
            if st == status::CONSTRAINED {
                node_final += stride;
                continue;
            }
            let set = if st == status::UNCONSTRAINED {
                SET_UNCONSTRAINED
            } else {
                SET_CONSTRAINED
            };
            let mut u_00 = 0.0;
            for k in 0..12 {
                u_00 += *u.0.add((node as isize + d[k]) as usize) * ctx.coeff[set][k];
            }
            if set == SET_CONSTRAINED {
                // Complete the partial sum with the Briggs terms of this
                // node's off-node datum, then normalize once
                let b = &ctx.briggs[briggs_index].b;
                let quadrant = st as usize;
                let mut sum_bk_uk = 0.0;
                for k in 0..4 {
                    let off = d[QUAD_NODES[quadrant][k]];
                    sum_bk_uk += b[k] * *u.0.add((node as isize + off) as usize);
                }
                u_00 = (u_00 + ctx.a0_const_2 * (sum_bk_uk + b[4])) * b[5];
                briggs_index += 1;
            }
            let u_old = *u.0.add(node);
            let mut u_new = u_old * ctx.relax_old + u_00 * ctx.relax_new;
            if let Some(lo) = ctx.bound_lo {
                let limit = lo[node_final];
                if !limit.is_nan() && u_new < limit {
                    u_new = limit;
                }
            }
            if let Some(hi) = ctx.bound_hi {
                let limit = hi[node_final];
                if !limit.is_nan() && u_new > limit {
                    u_new = limit;
                }
            }
            let u_change = (u_new - u_old).abs();
            *u.0.add(node) = u_new;
            if u_change > max_u_change {
                max_u_change = u_change;
            }
            node_final += stride;
        }
    }
    max_u_change
}

impl Engine {
    /// Fill the ghost rows and columns before a sweep; equations (A-8) to
    /// (A-10) of Smith & Wessel (1990).
    fn set_bcs(&mut self) {
        let g = &self.geom;
        let d = &g.offset;
        let u = &mut self.u;
        let at = |node: usize, off: isize| (node as isize + off) as usize;

        // First-order condition along south and north edges
        for col in 0..g.nx {
            let n_s = g.node_sw + col;
            let n_n = g.node_nw + col;
            u[at(n_s, d[nbr::S1])] = self.bc.y0 * u[n_s] + self.bc.y1 * u[at(n_s, d[nbr::N1])];
            u[at(n_n, d[nbr::N1])] = self.bc.y0 * u[n_n] + self.bc.y1 * u[at(n_n, d[nbr::S1])];
        }
        if self.periodic {
            // West and east are the same meridian: exchange ghosts and keep
            // the shared edge columns identical
            for row in 0..g.ny {
                let n_w = g.node_nw + row * g.mx;
                let n_e = g.node_ne + row * g.mx;
                u[at(n_w, d[nbr::W1])] = u[at(n_e, d[nbr::W1])];
                u[at(n_e, d[nbr::E1])] = u[at(n_w, d[nbr::E1])];
                let mean = 0.5 * (u[n_e] + u[n_w]);
                u[n_e] = mean;
                u[n_w] = mean;
            }
        } else {
            for row in 0..g.ny {
                let n_w = g.node_nw + row * g.mx;
                let n_e = g.node_ne + row * g.mx;
                u[at(n_w, d[nbr::W1])] = self.bc.x1 * u[at(n_w, d[nbr::E1])] + self.bc.x0 * u[n_w];
                u[at(n_e, d[nbr::E1])] = self.bc.x1 * u[at(n_e, d[nbr::W1])] + self.bc.x0 * u[n_e];
            }
        }

        // Zero mixed second derivative at the four corners
        let n = g.node_sw;
        u[at(n, d[nbr::SW])] = u[at(n, d[nbr::SE])] + u[at(n, d[nbr::NW])] - u[at(n, d[nbr::NE])];
        let n = g.node_nw;
        u[at(n, d[nbr::NW])] = u[at(n, d[nbr::NE])] + u[at(n, d[nbr::SW])] - u[at(n, d[nbr::SE])];
        let n = g.node_se;
        u[at(n, d[nbr::SE])] = u[at(n, d[nbr::SW])] + u[at(n, d[nbr::NE])] - u[at(n, d[nbr::NW])];
        let n = g.node_ne;
        u[at(n, d[nbr::NE])] = u[at(n, d[nbr::NW])] + u[at(n, d[nbr::SE])] - u[at(n, d[nbr::SW])];

        // Second-order condition, d(curvature)/dn = 0, along each edge
        let (eps_m2, two_plus_em2) = (self.co.eps_m2, self.co.two_plus_em2);
        for col in 0..g.nx {
            let n_s = g.node_sw + col;
            let n_n = g.node_nw + col;
            u[at(n_s, d[nbr::S2])] = u[at(n_s, d[nbr::N2])]
                + eps_m2
                    * (u[at(n_s, d[nbr::NW])] + u[at(n_s, d[nbr::NE])]
                        - u[at(n_s, d[nbr::SW])]
                        - u[at(n_s, d[nbr::SE])])
                + two_plus_em2 * (u[at(n_s, d[nbr::S1])] - u[at(n_s, d[nbr::N1])]);
            u[at(n_n, d[nbr::N2])] = u[at(n_n, d[nbr::S2])]
                + eps_m2
                    * (u[at(n_n, d[nbr::SW])] + u[at(n_n, d[nbr::SE])]
                        - u[at(n_n, d[nbr::NW])]
                        - u[at(n_n, d[nbr::NE])])
                + two_plus_em2 * (u[at(n_n, d[nbr::N1])] - u[at(n_n, d[nbr::S1])]);
        }
        let (eps_p2, two_plus_ep2) = (self.co.eps_p2, self.co.two_plus_ep2);
        for row in 0..g.ny {
            let n_w = g.node_nw + row * g.mx;
            let n_e = g.node_ne + row * g.mx;
            if self.periodic {
                u[at(n_w, d[nbr::W2])] = u[at(n_e, d[nbr::W2])];
                u[at(n_e, d[nbr::E2])] = u[at(n_w, d[nbr::E2])];
            } else {
                u[at(n_w, d[nbr::W2])] = u[at(n_w, d[nbr::E2])]
                    + eps_p2
                        * (u[at(n_w, d[nbr::NE])] + u[at(n_w, d[nbr::SE])]
                            - u[at(n_w, d[nbr::NW])]
                            - u[at(n_w, d[nbr::SW])])
                    + two_plus_ep2 * (u[at(n_w, d[nbr::W1])] - u[at(n_w, d[nbr::E1])]);
                u[at(n_e, d[nbr::E2])] = u[at(n_e, d[nbr::W2])]
                    + eps_p2
                        * (u[at(n_e, d[nbr::NW])] + u[at(n_e, d[nbr::SW])]
                            - u[at(n_e, d[nbr::NE])]
                            - u[at(n_e, d[nbr::SE])])
                    + two_plus_ep2 * (u[at(n_e, d[nbr::E1])] - u[at(n_e, d[nbr::W1])]);
            }
        }
    }

    /// One Gauss-Seidel pass over the interior; returns max |change| in
    /// normalized units.
    fn sweep_once(&mut self) -> f64 {
        let u = SharedGrid(self.u.as_mut_ptr());
        let ctx = SweepCtx {
            geom: &self.geom,
            coeff: &self.co.coeff,
            a0_const_2: self.co.a0_const_2,
            node_status: &self.node_status,
            briggs: &self.briggs,
            briggs_starts: &self.briggs_starts,
            bound_lo: self.bound[LO].as_deref(),
            bound_hi: self.bound[HI].as_deref(),
            final_mx: self.final_geom.mx,
            relax_old: self.relax_old,
            relax_new: self.relax_new,
        };
        #[cfg(not(target_arch = "wasm32"))]
        {
            if let Some(pool) = self.pool.as_mut() {
                let num_threads = (pool.thread_count() as usize).min(ctx.geom.ny);
                if num_threads > 1 {
                    let chunk_rows = ceil_div(ctx.geom.ny, num_threads);
                    let n_chunks = ceil_div(ctx.geom.ny, chunk_rows);
                    let mut changes = vec![0.0f64; n_chunks];
                    let ctx_ref = &ctx;
                    let ny = ctx.geom.ny;
                    pool.scoped(|s| {
                        for (t, out) in changes.iter_mut().enumerate() {
                            s.execute(move || {
                                let row0 = t * chunk_rows;
                                let row1 = ((t + 1) * chunk_rows).min(ny);
                                *out = unsafe { relax_rows(ctx_ref, u, row0, row1) };
                            });
                        }
                    });
                    return changes.into_iter().fold(0.0, f64::max);
                }
            }
        }
        unsafe { relax_rows(&ctx, u, 0, self.geom.ny) }
    }

    /// Run relaxation sweeps at the current stride until max |change in z|
    /// drops under the stride's limit or the iteration cap is hit. Returns
    /// (sweeps, final max |change in z|, reached the limit).
    fn iterate(&mut self, mode: SweepMode, log: &mut dyn SweepLog) -> (u64, f64, bool) {
        let stride = self.geom.stride;
        let current_limit = self.converge_limit / stride as f64;
        let current_max_iterations = self.max_iterations as u64 * stride as u64;
        log.stride_begin(stride, mode, current_limit);
        debug!(
            "start iterating, mode = {} max iterations = {} [stride = {}]",
            mode.code(),
            current_max_iterations,
            stride
        );

        let mut iteration_count = 0u64;
        let mut max_z_change;
        loop {
            self.set_bcs();
            let max_u_change = self.sweep_once();
            iteration_count += 1;
            self.total_iterations += 1;
            // Scale back into original data units
            max_z_change = max_u_change * self.z_rms;
            log.sweep(&SweepRecord {
                stride,
                mode,
                iteration: iteration_count,
                max_dz: max_z_change,
                limit: current_limit,
                total_iterations: self.total_iterations,
            });
            debug!(
                "{}\t{}\t{}\t{:.8e}\t{:.8e}\t{}",
                stride,
                mode.code(),
                iteration_count,
                max_z_change,
                current_limit,
                self.total_iterations
            );
            if max_z_change <= current_limit || iteration_count >= current_max_iterations {
                break;
            }
        }
        info!(
            "stride {} mode {} finished after {} sweeps, max |dz| = {:.8e} (limit {:.8e})",
            stride,
            mode.code(),
            iteration_count,
            max_z_change,
            current_limit
        );
        (iteration_count, max_z_change, max_z_change <= current_limit)
    }

    /// Find the nearest data constraint of every bin and couple it in:
    /// either fix the node outright (datum within 5% of the spacing) or
    /// compute its Briggs coefficients.
    fn find_nearest_constraint(&mut self) {
        debug!(
            "determine nearest constraints and Briggs coefficients [stride = {}]",
            self.geom.stride
        );
        let g = &self.geom;
        for row in 0..g.ny {
            let start = g.node(row, 0);
            for st in &mut self.node_status[start..start + g.nx] {
                *st = status::UNCONSTRAINED;
            }
        }

        let stride = g.stride;
        let r_z_rms = 1.0 / self.z_rms;
        let mut briggs_index = 0usize;
        let mut last_index = data::OUTSIDE;
        for point in &self.data {
            if point.index == last_index {
                continue;
            }
            last_index = point.index;
            let row = g.index_to_row(point.index);
            let col = g.index_to_col(point.index);
            let node = g.node(row, col);
            let x0 = g.col_to_x(col);
            let y0 = g.row_to_y(row);
            // Offsets in fractions of the current spacing, dy positive up
            let dx = g.fcol_of(point.x, x0);
            let dy = g.frow_of(point.y, y0);

            if dx.abs() < CLOSENESS_FACTOR && dy.abs() < CLOSENESS_FACTOR {
                self.node_status[node] = status::CONSTRAINED;
                // The constraint moves from (dx, dy) to the node itself, so
                // adjust for the planar trend between the two locations; the
                // trend is in final-grid cells, hence the stride factor
                let mut z_at_node =
                    point.z + r_z_rms * stride as f64 * self.plane.trend(dx, dy);
                let node_final = self.final_geom.node(stride * row, stride * col);
                if let Some(lo) = self.bound[LO].as_deref() {
                    if !lo[node_final].is_nan() && z_at_node < lo[node_final] {
                        z_at_node = lo[node_final];
                    }
                }
                if let Some(hi) = self.bound[HI].as_deref() {
                    if !hi[node_final].is_nan() && z_at_node > hi[node_final] {
                        z_at_node = hi[node_final];
                    }
                }
                self.u[node] = z_at_node;
            } else {
                // Reflect quadrants 2-4 into the first so one formula serves
                let (quadrant, xx, yy) = if dy >= 0.0 {
                    if dx >= 0.0 {
                        (status::QUAD1, dx, dy)
                    } else {
                        (status::QUAD2, dy, -dx)
                    }
                } else if dx >= 0.0 {
                    (status::QUAD4, -dy, dx)
                } else {
                    (status::QUAD3, -dx, -dy)
                };
                self.node_status[node] = quadrant;
                self.briggs[briggs_index] = solve_briggs(&self.co, xx, yy, point.z);
                briggs_index += 1;
            }
        }

        // Per-row table positions so the sweep can start mid-grid; the
        // table was filled in bin order, which is row-major
        self.briggs_starts.clear();
        self.briggs_starts.resize(g.ny + 1, 0);
        let mut count = 0usize;
        for row in 0..g.ny {
            self.briggs_starts[row] = count;
            let start = g.node(row, 0);
            count += self.node_status[start..start + g.nx]
                .iter()
                .filter(|&&s| s >= status::QUAD1 && s <= status::QUAD4)
                .count();
        }
        self.briggs_starts[g.ny] = count;
        debug_assert_eq!(count, briggs_index);
    }

    /// Gaussian moving-average prefill of the coarsest grid: every node
    /// gets the weighted mean of the data within `radius`, with weight
    /// e^-4.5 at the radius; nodes with no data in range fall back to the
    /// data mean.
    fn initialize_grid(&mut self, radius: f64, z_mean: f64) {
        debug!("initialize grid by Gaussian averaging [stride = {}]", self.geom.stride);
        let g = &self.geom;
        let del_col = (radius * g.r_inc[0]).ceil() as i64;
        let del_row = (radius * g.r_inc[1]).ceil() as i64;
        let radius2 = radius * radius;
        let rfact = -4.5 / radius2;
        for row in 0..g.ny {
            let y0 = g.row_to_y(row);
            for col in 0..g.nx {
                let x0 = g.col_to_x(col);
                let col_min = (col as i64 - del_col).max(0) as usize;
                let col_max = ((col as i64 + del_col) as usize).min(g.nx - 1);
                let row_min = (row as i64 - del_row).max(0) as usize;
                let row_max = ((row as i64 + del_row) as usize).min(g.ny - 1);
                let mut sum_w = 0.0;
                let mut sum_zw = 0.0;
                for kj in row_min..=row_max {
                    let first = g.index(kj, col_min);
                    let last = g.index(kj, col_max);
                    let a = self.data.partition_point(|d| d.index < first);
                    for point in &self.data[a..] {
                        if point.index > last {
                            break;
                        }
                        let r2 = (point.x - x0) * (point.x - x0) + (point.y - y0) * (point.y - y0);
                        if r2 > radius2 {
                            continue;
                        }
                        let weight = (rfact * r2).exp();
                        sum_w += weight;
                        sum_zw += weight * point.z;
                    }
                }
                let node = g.node(row, col);
                if sum_w == 0.0 {
                    warn!(
                        "no data inside search radius at ({}, {}); node set to the data mean",
                        x0, y0
                    );
                    self.u[node] = z_mean;
                } else {
                    self.u[node] = sum_zw / sum_w;
                }
            }
        }
    }

    /// Misfit and curvature report at the final resolution: a 3rd-order
    /// Taylor estimate of the surface at every data location, and the sum
    /// of squared discrete Laplacians over the interior.
    fn check_errors(&mut self) -> (f64, f64, f64) {
        self.set_bcs();
        let g = &self.geom;
        let d = &g.offset;
        let u = &self.u;
        let at = |node: usize, k: usize| u[(node as isize + d[k]) as usize];

        let mut mean_error = 0.0;
        let mut mean_squared_error = 0.0;
        for point in &self.data {
            let row = g.index_to_row(point.index);
            let col = g.index_to_col(point.index);
            let node = g.node(row, col);
            if self.node_status[node] == status::CONSTRAINED {
                // The surface passes through the datum; zero misfit
                continue;
            }
            let x0 = g.col_to_x(col);
            let y0 = g.row_to_y(row);
            let dx = g.fcol_of(point.x, x0);
            let dy = g.frow_of(point.y, y0);

            let du_dx = 0.5 * (at(node, nbr::E1) - at(node, nbr::W1));
            let du_dy = 0.5 * (at(node, nbr::N1) - at(node, nbr::S1));
            let d2u_dx2 = at(node, nbr::E1) + at(node, nbr::W1) - 2.0 * u[node];
            let d2u_dy2 = at(node, nbr::N1) + at(node, nbr::S1) - 2.0 * u[node];
            let d2u_dxdy = 0.25
                * (at(node, nbr::NE) - at(node, nbr::NW) - at(node, nbr::SE) + at(node, nbr::SW));
            let d3u_dx3 = 0.5
                * (at(node, nbr::E2) - 2.0 * at(node, nbr::E1) + 2.0 * at(node, nbr::W1)
                    - at(node, nbr::W2));
            let d3u_dy3 = 0.5
                * (at(node, nbr::N2) - 2.0 * at(node, nbr::N1) + 2.0 * at(node, nbr::S1)
                    - at(node, nbr::S2));
            let d3u_dx2dy = 0.5
                * ((at(node, nbr::NE) + at(node, nbr::NW) - 2.0 * at(node, nbr::N1))
                    - (at(node, nbr::SE) + at(node, nbr::SW) - 2.0 * at(node, nbr::S1)));
            let d3u_dxdy2 = 0.5
                * ((at(node, nbr::NE) + at(node, nbr::SE) - 2.0 * at(node, nbr::E1))
                    - (at(node, nbr::NW) + at(node, nbr::SW) - 2.0 * at(node, nbr::W1)));

            let z_est = u[node]
                + dx * (du_dx + dx * (0.5 * d2u_dx2 + dx * (d3u_dx3 / 6.0)))
                + dy * (du_dy + dy * (0.5 * d2u_dy2 + dy * (d3u_dy3 / 6.0)))
                + dx * dy * d2u_dxdy
                + 0.5 * dx * d3u_dx2dy
                + 0.5 * dy * d3u_dxdy2;
            let z_err = z_est - point.z;
            mean_error += z_err;
            mean_squared_error += z_err * z_err;
        }
        let n = self.data.len() as f64;
        mean_error /= n;
        mean_squared_error = (mean_squared_error / n).sqrt();

        let mut curvature = 0.0;
        for row in 0..g.ny {
            for col in 0..g.nx {
                let node = g.node(row, col);
                let c = at(node, nbr::E1) + at(node, nbr::W1) + at(node, nbr::N1)
                    + at(node, nbr::S1)
                    - 4.0 * u[node];
                curvature += c * c;
            }
        }
        info!(
            "fit: {} points, mean error {:.8e}, rms error {:.8e}, curvature {:.8e}",
            self.data.len(),
            mean_error,
            mean_squared_error,
            curvature
        );
        (mean_error, mean_squared_error, curvature)
    }

    /// Undo the normalization and detrending on the way out: scale by the
    /// data rms and add the least-squares plane back at every node.
    fn restore_planar_trend(&mut self) {
        let g = &self.final_geom;
        for row in 0..g.ny {
            let y_up = (g.ny - row - 1) as f64;
            let node = g.node(row, 0);
            for (col, value) in self.u[node..node + g.nx].iter_mut().enumerate() {
                *value = *value * self.z_rms + self.plane.evaluate(col as f64, y_up);
            }
        }
    }

    /// Clamp the restored surface against the untransformed bounds.
    fn clip_to_bounds(&mut self) {
        if self.bound.iter().all(Option::is_none) {
            return;
        }
        let g = &self.final_geom;
        for row in 0..g.ny {
            for col in 0..g.nx {
                let node = g.node(row, col);
                if let Some(lo) = self.bound[LO].as_deref() {
                    if !lo[node].is_nan() && self.u[node] < lo[node] {
                        self.u[node] = lo[node];
                    }
                }
                if let Some(hi) = self.bound[HI].as_deref() {
                    if !hi[node].is_nan() && self.u[node] > hi[node] {
                        self.u[node] = hi[node];
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::Limit;
    use float_cmp::assert_approx_eq;

    fn five_by_five() -> GridShape {
        GridShape::new([0.0, 1.0, 0.0, 1.0], [0.25, 0.25]).unwrap()
    }

    fn params() -> SurfaceParams {
        SurfaceParams {
            convergence: Convergence::Fraction(1.0e-6),
            allow_region_expansion: false,
            ..SurfaceParams::default()
        }
    }

    #[test]
    fn empty_input_is_rejected() {
        let solver = SurfaceSolver::new(five_by_five(), params()).unwrap();
        assert!(matches!(solver.solve(), Err(SurfaceError::NoUsablePoints)));
    }

    #[test]
    fn single_centre_point_is_honored_exactly() {
        let mut solver = SurfaceSolver::new(five_by_five(), params()).unwrap();
        solver.add_points(vec![[0.5, 0.5, 1.0]]);
        let (raster, summary) = solver.solve().unwrap();
        assert!(summary.converged);
        assert!(!summary.on_plane);
        assert_approx_eq!(f64, raster.value(2, 2), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn planar_input_short_circuits_to_the_plane() {
        let mut solver = SurfaceSolver::new(five_by_five(), params()).unwrap();
        solver.add_points(vec![
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 1.0],
            [0.0, 1.0, 1.0],
            [1.0, 1.0, 2.0],
        ]);
        let (raster, summary) = solver.solve().unwrap();
        assert!(summary.on_plane);
        assert_eq!(summary.total_iterations, 0);
        for row in 0..5 {
            for col in 0..5 {
                let expect = col as f64 * 0.25 + (4 - row) as f64 * 0.25;
                assert_approx_eq!(f64, raster.value(row, col), expect, epsilon = 1e-10);
            }
        }
    }

    #[test]
    fn lower_bound_clamps_the_skirt() {
        let mut p = params();
        p.lower = Limit::Value(0.9);
        let mut solver = SurfaceSolver::new(five_by_five(), p).unwrap();
        solver.add_points(vec![[0.5, 0.5, 1.0]]);
        let (raster, _) = solver.solve().unwrap();
        let min = raster.values.iter().cloned().fold(f64::INFINITY, f64::min);
        assert_eq!(min, 0.9);
        assert_approx_eq!(f64, raster.value(2, 2), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn sweep_log_sees_every_iteration() {
        let mut solver = SurfaceSolver::new(five_by_five(), params()).unwrap();
        solver.add_points(vec![[0.5, 0.5, 1.0], [0.25, 0.25, -0.5]]);
        let mut recorder = SweepRecorder::default();
        let (_, summary) = solver.solve_with_log(&mut recorder).unwrap();
        assert_eq!(recorder.records.len() as u64, summary.total_iterations);
        let last = recorder.records.last().unwrap();
        assert_eq!(last.total_iterations, summary.total_iterations);
        assert_approx_eq!(f64, last.max_dz, summary.final_max_dz, epsilon = 1e-15);
        assert!(recorder.records.iter().all(|r| r.stride >= 1));
    }

    #[test]
    fn parallel_sweep_matches_serial_within_tolerance() {
        let pts: Vec<[f64; 3]> = (0..30)
            .map(|k| {
                let x = (k % 6) as f64 / 6.0;
                let y = (k / 6) as f64 / 5.0;
                [x, y, (6.3 * x).sin() + y * y]
            })
            .collect();
        let shape = GridShape::new([0.0, 1.0, 0.0, 1.0], [0.125, 0.125]).unwrap();
        let mut serial = SurfaceSolver::new(shape.clone(), params()).unwrap();
        serial.add_points(pts.clone());
        let (ra, sa) = serial.solve().unwrap();

        let mut p = params();
        p.threads = 3;
        let mut parallel = SurfaceSolver::new(shape, p).unwrap();
        parallel.add_points(pts);
        let (rb, sb) = parallel.solve().unwrap();

        assert!(sa.converged && sb.converged);
        let tol = 10.0 * sa.convergence_limit;
        for (a, b) in ra.values.iter().zip(rb.values.iter()) {
            assert!((a - b).abs() <= tol, "serial {} vs parallel {}", a, b);
        }
    }
}
