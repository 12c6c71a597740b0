// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Per-pixel kernels and reductions of the alignment inner loop.
//!
//! Every kernel writes each position of the level prefix it is given, so
//! scratch buffers never need zeroing between iterations. Pixels that fail
//! the visibility test (no depth measurement, warped point behind the
//! camera, or warp landing outside the image) produce zero residual, zero
//! Jacobian row and zero weight, and therefore contribute nothing to any
//! reduction.

use rayon::prelude::*;

use crate::core::multires::is_depth_valid;
use crate::device::buffers::{ConstantBank, Tex};
use crate::misc::type_aliases::{Float, Vec3};

/// Degrees of freedom of the Student-t model used for weighting.
pub const TDIST_DOF: Float = 5.0;

/// Pixels per partial sum of the tree reductions.
const REDUCTION_BLOCK: usize = 1024;

/// Per-level warp rasters shared by the residual and weighting kernels,
/// holding everything the per-pixel visibility test needs.
pub struct WarpGeometry<'a> {
    pub width: usize,
    pub height: usize,
    pub depth_prev: &'a [Float],
    pub z_prime: &'a [Float],
    pub u_warped: &'a [Float],
    pub v_warped: &'a [Float],
}

impl WarpGeometry<'_> {
    /// Visibility of one warped pixel: measured depth, positive depth in
    /// the new frame, and a warp inside the image.
    pub fn is_valid(&self, idx: usize) -> bool {
        is_depth_valid(self.depth_prev[idx])
            && self.z_prime[idx] > 0.0
            && self.u_warped[idx] >= 0.0
            && self.u_warped[idx] <= (self.width - 1) as Float
            && self.v_warped[idx] >= 0.0
            && self.v_warped[idx] <= (self.height - 1) as Float
    }

    /// Number of pixels passing the visibility test.
    pub fn count_valid(&self) -> usize {
        (0..self.height)
            .into_par_iter()
            .map(|v| {
                let row = v * self.width;
                (0..self.width).filter(|u| self.is_valid(row + u)).count()
            })
            .sum()
    }
}

/// Back-project every pixel of the previous depth raster, transform it by
/// the published pose and reproject it into the current frame.
///
/// Pixels without a depth measurement write a zero point and an
/// out-of-image warp so that downstream kernels reject them.
#[allow(clippy::too_many_arguments)]
pub fn transform_points(
    consts: &ConstantBank,
    level: usize,
    width: usize,
    depth_prev: &[Float],
    x_prime: &mut [Float],
    y_prime: &mut [Float],
    z_prime: &mut [Float],
    u_warped: &mut [Float],
    v_warped: &mut [Float],
) {
    let k = consts.k(level);
    let (fx, fy, cx, cy) = (k[(0, 0)], k[(1, 1)], k[(0, 2)], k[(1, 2)]);
    let rk_inv = *consts.rk_inv();
    let t = *consts.translation();
    x_prime
        .par_chunks_mut(width)
        .zip(y_prime.par_chunks_mut(width))
        .zip(z_prime.par_chunks_mut(width))
        .zip(u_warped.par_chunks_mut(width))
        .zip(v_warped.par_chunks_mut(width))
        .zip(depth_prev.par_chunks(width))
        .enumerate()
        .for_each(|(v, (((((xs, ys), zs), us), vs), depths))| {
            let v_f = v as Float;
            for u in 0..width {
                let d = depths[u];
                if is_depth_valid(d) {
                    let p = d * (rk_inv * Vec3::new(u as Float, v_f, 1.0)) + t;
                    xs[u] = p.x;
                    ys[u] = p.y;
                    zs[u] = p.z;
                    us[u] = fx * p.x / p.z + cx;
                    vs[u] = fy * p.y / p.z + cy;
                } else {
                    xs[u] = 0.0;
                    ys[u] = 0.0;
                    zs[u] = 0.0;
                    us[u] = -1.0;
                    vs[u] = -1.0;
                }
            }
        });
}

/// Photometric residual of every pixel: interpolated current intensity at
/// the warped position minus the previous intensity.
pub fn residuals(geom: &WarpGeometry, gray_prev: &[Float], gray_cur: Tex, out: &mut [Float]) {
    let width = geom.width;
    out.par_chunks_mut(width).enumerate().for_each(|(v, row_out)| {
        let row = v * width;
        for u in 0..width {
            let idx = row + u;
            row_out[u] = if geom.is_valid(idx) {
                gray_cur.sample(geom.u_warped[idx], geom.v_warped[idx]) - gray_prev[idx]
            } else {
                0.0
            };
        }
    });
}

/// Analytic photometric Jacobian row (1x6) of every pixel, translational
/// columns first, from the gradients of the current frame sampled at the
/// warped position and the transformed 3D point.
pub fn jacobian(
    consts: &ConstantBank,
    level: usize,
    geom: &WarpGeometry,
    dx_cur: Tex,
    dy_cur: Tex,
    x_prime: &[Float],
    y_prime: &[Float],
    out: &mut [Float],
) {
    let k = consts.k(level);
    let (fx, fy) = (k[(0, 0)], k[(1, 1)]);
    let width = geom.width;
    out.par_chunks_mut(6 * width)
        .enumerate()
        .for_each(|(v, row_out)| {
            let row = v * width;
            for u in 0..width {
                let idx = row + u;
                let j = &mut row_out[6 * u..6 * u + 6];
                if geom.is_valid(idx) {
                    let (uw, vw) = (geom.u_warped[idx], geom.v_warped[idx]);
                    let gx = fx * dx_cur.sample(uw, vw);
                    let gy = fy * dy_cur.sample(uw, vw);
                    let (x, y, z) = (x_prime[idx], y_prime[idx], geom.z_prime[idx]);
                    let z_2 = z * z;
                    j[0] = gx / z;
                    j[1] = gy / z;
                    j[2] = -(gx * x + gy * y) / z_2;
                    j[3] = -(gx * x * y + gy * (z_2 + y * y)) / z_2;
                    j[4] = (gx * (z_2 + x * x) + gy * x * y) / z_2;
                    j[5] = (-gx * y + gy * x) / z;
                } else {
                    j.fill(0.0);
                }
            }
        });
}

/// Uniform weights: one for visible pixels, zero otherwise.
pub fn uniform_weights(geom: &WarpGeometry, out: &mut [Float]) {
    let width = geom.width;
    out.par_chunks_mut(width).enumerate().for_each(|(v, row_out)| {
        let row = v * width;
        for u in 0..width {
            row_out[u] = if geom.is_valid(row + u) { 1.0 } else { 0.0 };
        }
    });
}

/// One scale-estimation pass of the Student-t model: store the weighted
/// squared residual of every visible pixel in `out` (reused as scratch) and
/// return its total together with the visible pixel count.
pub fn tdist_scale_pass(
    geom: &WarpGeometry,
    residuals: &[Float],
    variance: Float,
    out: &mut [Float],
) -> (Float, usize) {
    let width = geom.width;
    out.par_chunks_mut(width)
        .enumerate()
        .map(|(v, row_out)| {
            let row = v * width;
            let mut sum = 0.0;
            let mut count = 0;
            for u in 0..width {
                let idx = row + u;
                if geom.is_valid(idx) {
                    let r_2 = residuals[idx] * residuals[idx];
                    let w = (TDIST_DOF + 1.0) / (TDIST_DOF + r_2 / variance);
                    row_out[u] = w * r_2;
                    sum += row_out[u];
                    count += 1;
                } else {
                    row_out[u] = 0.0;
                }
            }
            (sum, count)
        })
        .reduce(|| (0.0, 0), |a, b| (a.0 + b.0, a.1 + b.1))
}

/// Final Student-t weights for the estimated scale.
pub fn tdist_weights(geom: &WarpGeometry, residuals: &[Float], variance: Float, out: &mut [Float]) {
    let width = geom.width;
    out.par_chunks_mut(width).enumerate().for_each(|(v, row_out)| {
        let row = v * width;
        for u in 0..width {
            let idx = row + u;
            row_out[u] = if geom.is_valid(idx) {
                let r_2 = residuals[idx] * residuals[idx];
                (TDIST_DOF + 1.0) / (TDIST_DOF + r_2 / variance)
            } else {
                0.0
            };
        }
    });
}

/// Scale each Jacobian row by its pixel weight, producing the explicit
/// JᵀW operand of the dense assembly path.
pub fn weight_jacobian(jacobian: &[Float], weights: &[Float], out: &mut [Float]) {
    out.par_chunks_mut(6)
        .zip(jacobian.par_chunks(6))
        .zip(weights.par_iter())
        .for_each(|((row_out, row), &w)| {
            for k in 0..6 {
                row_out[k] = w * row[k];
            }
        });
}

/// Sum of squared residuals, as a blocked tree reduction.
pub fn squared_error(residuals: &[Float]) -> Float {
    residuals
        .par_chunks(REDUCTION_BLOCK)
        .map(|block| block.iter().map(|r| r * r).sum::<Float>())
        .sum()
}

// TESTS #############################################################
