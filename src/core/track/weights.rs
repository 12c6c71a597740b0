// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Estimation of the per-pixel residual weights.
//!
//! Two modes: uniform weights over the visible pixels, or weights derived
//! from a zero-mean Student-t model of the residuals whose scale is
//! re-estimated by a short fixed-point loop, the standard EM update for
//! the t distribution. Heavy-tailed residuals caused by occlusions,
//! specularities and depth holes are strongly downweighted by the latter.

use tracing::trace;

use crate::device::kernels::{self, WarpGeometry};
use crate::misc::type_aliases::Float;

/// Initial residual variance of the scale estimation.
/// The caller resets the scale to this value when entering a pyramid level.
pub const VARIANCE_INITIAL: Float = 0.000625;

/// Fixed-point stop threshold on the precision (1/variance) change.
const PRECISION_TOLERANCE: Float = 1e-3;

/// Cap on scale-estimation passes per call.
const MAX_SCALE_ITERATIONS: usize = 5;

/// Compute the residual weights into `out`.
///
/// In Student-t mode, `variance` is both the starting scale of this call
/// and the estimate handed to the next one: it carries over between the
/// iterations of one pyramid level.
pub fn calculate(
    use_tdist: bool,
    geom: &WarpGeometry,
    residuals: &[Float],
    out: &mut [Float],
    variance: &mut Float,
) {
    if !use_tdist {
        kernels::uniform_weights(geom, out);
        return;
    }

    let mut var = *variance;
    let mut iterations = 0;
    loop {
        let var_prev = var;
        let (weighted_sum, nb_valid) = kernels::tdist_scale_pass(geom, residuals, var_prev, out);
        iterations += 1;
        if nb_valid == 0 {
            break;
        }
        var = weighted_sum / nb_valid as Float;
        if !(var > 0.0) {
            // All residuals are zero: the fixed point degenerates.
            // Keep the last usable scale so the weights stay finite.
            var = var_prev;
            break;
        }
        if (1.0 / var - 1.0 / var_prev).abs() <= PRECISION_TOLERANCE
            || iterations >= MAX_SCALE_ITERATIONS
        {
            break;
        }
    }
    *variance = var;
    trace!(variance = var, iterations, "student-t scale estimated");
    kernels::tdist_weights(geom, residuals, var, out);
}

// TESTS #############################################################
