// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Dense photometric alignment of consecutive RGB-D frames.
//!
//! The tracker keeps the previously ingested frame as reference and aligns
//! each new frame against it, coarse to fine over the image pyramid, by
//! Gauss-Newton iterations on the se3 twist minimizing the weighted
//! photometric reprojection residual. See Kerl et al., "Robust odometry
//! estimation for RGB-D cameras", for the method.
//!
//! A tracker is built from its first frame by [`Config::init`] and then fed
//! one frame at a time through [`Tracker::align`], which returns the
//! accumulated pose. The tracker is not reentrant: aligning concurrently
//! from several threads on one instance requires external exclusion.

use thiserror::Error;
use tracing::{debug, trace};

use crate::core::camera::Intrinsics;
use crate::core::multires;
use crate::core::track::weights;
use crate::device::assembly::{self, Assembly};
use crate::device::buffers::{ConstantBank, FramePyramid, Scratch};
use crate::device::kernels::{self, WarpGeometry};
use crate::math::se3;
use crate::misc::type_aliases::{Float, Mat3, Vec6};

/// A level ends early once the error decays by less than this ratio.
const ERROR_RATIO_STOP: Float = 0.995;

/// Method used to solve for the twist increment.
///
/// Only Gauss-Newton is implemented; configurations selecting another
/// method are rejected at initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolvingMethod {
    GaussNewton,
    LevenbergMarquardt,
    GradientDescent,
}

/// How the inter-frame motion folds into the accumulated pose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accumulation {
    /// `xi_total <- log(exp(xi_total) * exp(xi)^-1)`,
    /// the historical convention of this tracker family.
    InverseIncremental,
    /// `xi_total <- log(exp(xi) * exp(xi_total))`.
    ForwardIncremental,
}

/// Errors of tracker configuration and frame ingestion.
#[derive(Debug, Error)]
pub enum TrackError {
    #[error("image dimensions must be positive, got {width}x{height}")]
    EmptyImage { width: usize, height: usize },
    #[error("a {width}x{height} image cannot hold {levels} pyramid levels")]
    PyramidTooDeep {
        width: usize,
        height: usize,
        levels: usize,
    },
    #[error("min level {min} exceeds max level {max}")]
    LevelRange { min: usize, max: usize },
    #[error("camera intrinsics matrix is not invertible")]
    SingularIntrinsics,
    #[error("solving method {0:?} is not implemented, only Gauss-Newton is")]
    UnsupportedSolver(SolvingMethod),
    #[error("{name} raster holds {got} values, expected {expected}")]
    RasterSize {
        name: &'static str,
        expected: usize,
        got: usize,
    },
}

/// Configuration of the tracker.
#[derive(Debug, Clone)]
pub struct Config {
    /// Width of every ingested frame.
    pub width: usize,
    /// Height of every ingested frame.
    pub height: usize,
    /// 3x3 pinhole camera matrix of the full-resolution image.
    pub intrinsics: Mat3,
    /// Finest pyramid level used for alignment; 0 is full resolution.
    pub min_level: usize,
    /// Coarsest pyramid level index; the pyramid has `max_level + 1` levels.
    pub max_level: usize,
    /// Weight the residuals with the Student-t model instead of uniformly.
    pub use_tdist_weights: bool,
    /// Cap on Gauss-Newton iterations per pyramid level.
    pub max_iterations_per_level: usize,
    pub solving_method: SolvingMethod,
    pub assembly: Assembly,
    pub accumulation: Accumulation,
}

impl Config {
    /// Default configuration for a camera of the given geometry.
    pub fn new(width: usize, height: usize, intrinsics: Mat3) -> Config {
        Config {
            width,
            height,
            intrinsics,
            min_level: 0,
            max_level: 4,
            use_tdist_weights: true,
            max_iterations_per_level: 20,
            solving_method: SolvingMethod::GaussNewton,
            assembly: Assembly::Blocked,
            accumulation: Accumulation::InverseIncremental,
        }
    }

    /// Initialize a tracker with the first RGB-D frame.
    ///
    /// All buffers are allocated here, sized by the configured geometry,
    /// and live until the tracker is dropped.
    pub fn init(self, gray: &[Float], depth: &[Float]) -> Result<Tracker, TrackError> {
        if self.width == 0 || self.height == 0 {
            return Err(TrackError::EmptyImage {
                width: self.width,
                height: self.height,
            });
        }
        if self.min_level > self.max_level {
            return Err(TrackError::LevelRange {
                min: self.min_level,
                max: self.max_level,
            });
        }
        let coarsest = 1usize << self.max_level;
        if self.width < coarsest || self.height < coarsest {
            return Err(TrackError::PyramidTooDeep {
                width: self.width,
                height: self.height,
                levels: self.max_level + 1,
            });
        }
        if self.solving_method != SolvingMethod::GaussNewton {
            return Err(TrackError::UnsupportedSolver(self.solving_method));
        }
        let expected = self.width * self.height;
        check_raster("gray", gray.len(), expected)?;
        check_raster("depth", depth.len(), expected)?;

        let nb_levels = self.max_level + 1;
        let intrinsics_multires = Intrinsics::from_matrix(self.intrinsics)
            .ok_or(TrackError::SingularIntrinsics)?
            .multi_res(nb_levels);
        let consts = ConstantBank::load(&intrinsics_multires);
        let mut prev = FramePyramid::allocate(self.width, self.height, nb_levels);
        let cur = FramePyramid::allocate(self.width, self.height, nb_levels);
        let scratch = Scratch::allocate(self.width, self.height);

        // The first frame goes straight into the previous slot: align fills
        // the current one and only swaps afterwards.
        prev.fill(gray, depth);

        Ok(Tracker {
            config: self,
            consts,
            prev,
            cur,
            scratch,
            xi: Vec6::zeros(),
            xi_total: Vec6::zeros(),
            stats: AlignStats::default(),
        })
    }
}

fn check_raster(name: &'static str, got: usize, expected: usize) -> Result<(), TrackError> {
    if got == expected {
        Ok(())
    } else {
        Err(TrackError::RasterSize {
            name,
            expected,
            got,
        })
    }
}

/// Iteration record of one pyramid level of the last alignment.
#[derive(Debug, Clone, Default)]
pub struct LevelStats {
    pub level: usize,
    pub iterations: usize,
    /// Sum of squared residuals read back at each iteration.
    pub errors: Vec<Float>,
}

/// Iteration records of the last alignment, coarsest level first.
#[derive(Debug, Clone, Default)]
pub struct AlignStats {
    pub levels: Vec<LevelStats>,
}

impl AlignStats {
    /// Total Gauss-Newton iterations spent over all levels.
    pub fn total_iterations(&self) -> usize {
        self.levels.iter().map(|l| l.iterations).sum()
    }
}

/// Struct used for tracking the camera at each frame.
/// Can only be constructed by initialization from a `Config`.
pub struct Tracker {
    config: Config,
    consts: ConstantBank,
    prev: FramePyramid,
    cur: FramePyramid,
    scratch: Scratch,
    xi: Vec6,
    xi_total: Vec6,
    stats: AlignStats,
}

impl Tracker {
    /// Align a new frame against the previous one, make it the new
    /// reference, and return the accumulated pose in twist coordinates.
    ///
    /// Numerical trouble never surfaces here: a level whose normal
    /// equations cannot be solved (including the degenerate case of a
    /// reference without any usable depth) simply leaves the motion
    /// estimate untouched, and a frame where that happens at every level
    /// returns the accumulated pose unchanged.
    pub fn align(&mut self, gray: &[Float], depth: &[Float]) -> Result<Vec6, TrackError> {
        let expected = self.config.width * self.config.height;
        check_raster("gray", gray.len(), expected)?;
        check_raster("depth", depth.len(), expected)?;
        self.cur.fill(gray, depth);
        self.stats = AlignStats::default();

        // The inter-frame estimate of the previous call warm-starts this one.
        let mut updated = false;
        for level in (self.config.min_level..=self.config.max_level).rev() {
            updated |= self.align_level(level);
        }

        // The pointer swap is the only cross-frame handoff: the freshly
        // ingested frame becomes the reference of the next call.
        std::mem::swap(&mut self.prev, &mut self.cur);

        // A frame that never produced a solvable system carries no motion
        // information. Folding the unchanged warm-start twist into the pose
        // would still move it, so the accumulation only runs after at least
        // one successful step.
        if updated {
            self.xi_total = match self.config.accumulation {
                Accumulation::InverseIncremental => {
                    se3::log(se3::exp(self.xi_total) * se3::exp(self.xi).inverse())
                }
                Accumulation::ForwardIncremental => {
                    se3::log(se3::exp(self.xi) * se3::exp(self.xi_total))
                }
            };
        }
        Ok(self.xi_total)
    }

    /// Gauss-Newton iterations of one pyramid level.
    /// Returns whether at least one step was applied to the twist.
    fn align_level(&mut self, level: usize) -> bool {
        let (width, height) =
            multires::level_dimensions(self.config.width, self.config.height, level);
        let n = width * height;
        let prev = &self.prev.levels[level];
        let cur = &self.cur.levels[level];
        let use_tdist = self.config.use_tdist_weights;
        let mut error_prev = Float::INFINITY;
        let mut variance = weights::VARIANCE_INITIAL;
        let mut updated = false;
        let mut stats = LevelStats {
            level,
            ..Default::default()
        };

        let Scratch {
            x_prime,
            y_prime,
            z_prime,
            u_warped,
            v_warped,
            residuals,
            weights: weight_buf,
            jacobian,
            jtw,
        } = &mut self.scratch;

        for iteration in 0..self.config.max_iterations_per_level {
            // Derive R and t from the current twist and publish the
            // per-iteration constants.
            let motion = se3::exp(self.xi);
            self.consts
                .publish_pose(&motion.rotation, &motion.translation, level);

            kernels::transform_points(
                &self.consts,
                level,
                width,
                &prev.depth[..n],
                &mut x_prime[..n],
                &mut y_prime[..n],
                &mut z_prime[..n],
                &mut u_warped[..n],
                &mut v_warped[..n],
            );

            let geom = WarpGeometry {
                width,
                height,
                depth_prev: &prev.depth[..n],
                z_prime: &z_prime[..n],
                u_warped: &u_warped[..n],
                v_warped: &v_warped[..n],
            };

            // The Jacobian only depends on the warp, so it runs against the
            // residual/error/weight chain, like the two device streams of a
            // GPU backend. Both joining is the barrier before assembly.
            let consts = &self.consts;
            let jacobian_slice = &mut jacobian[..6 * n];
            let residual_slice = &mut residuals[..n];
            let weight_slice = &mut weight_buf[..n];
            let variance_ref = &mut variance;
            let (_, error) = rayon::join(
                || {
                    kernels::jacobian(
                        consts,
                        level,
                        &geom,
                        cur.dx_tex(),
                        cur.dy_tex(),
                        &x_prime[..n],
                        &y_prime[..n],
                        jacobian_slice,
                    )
                },
                || {
                    kernels::residuals(&geom, &prev.gray[..n], cur.gray_tex(), residual_slice);
                    let error = kernels::squared_error(residual_slice);
                    weights::calculate(use_tdist, &geom, residual_slice, weight_slice, variance_ref);
                    error
                },
            );

            let (a, b) = assembly::normal_equations(
                self.config.assembly,
                !use_tdist,
                &jacobian[..6 * n],
                &weight_buf[..n],
                &residuals[..n],
                &mut jtw[..6 * n],
            );

            stats.iterations += 1;
            stats.errors.push(error);

            // Gauss-Newton step. A system that is not positive definite
            // (degenerate or diverging) ends the level with xi untouched.
            let delta = match a.cholesky() {
                Some(cholesky) => cholesky.solve(&b),
                None => {
                    debug!(level, iteration, "normal equations not SPD, level ended");
                    break;
                }
            };
            self.xi = se3::log(se3::exp(-delta) * se3::exp(self.xi));
            updated = true;

            trace!(level, iteration, error, "gauss-newton step");
            if error / error_prev > ERROR_RATIO_STOP || error == 0.0 {
                break;
            }
            error_prev = error;
        }

        debug!(
            level,
            iterations = stats.iterations,
            error = stats.errors.last().copied().unwrap_or(0.0),
            "pyramid level aligned"
        );
        self.stats.levels.push(stats);
        updated
    }

    /// Accumulated pose of the last aligned frame, in twist coordinates.
    pub fn pose(&self) -> Vec6 {
        self.xi_total
    }

    /// Inter-frame twist kept as warm start for the next alignment.
    pub fn relative_twist(&self) -> Vec6 {
        self.xi
    }

    /// Iteration records of the last `align` call.
    pub fn last_stats(&self) -> &AlignStats {
        &self.stats
    }
}

// TESTS #############################################################
