// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Assembly of the 6x6 normal equations `A = JᵀWJ`, `b = JᵀWr` from the
//! per-pixel Jacobian rows, weights and residuals.
//!
//! Two interchangeable implementations are kept: a dense path that forms
//! the weighted Jacobian explicitly and takes single matrix products, and
//! a blocked path that folds fixed-size pixel blocks into partial sums and
//! tree-reduces them. Their results agree to float roundoff scaled by the
//! pixel count; A is symmetric up to roundoff and the solver only relies
//! on its lower triangle.

use itertools::izip;
use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;

use crate::device::kernels;
use crate::misc::type_aliases::{Float, Mat6, Vec6};

/// Which assembly implementation to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Assembly {
    /// Explicit JᵀW then dense matrix products.
    Dense,
    /// Blocked partial sums with a tree reduction.
    Blocked,
}

/// Pixels per partial sum of the blocked path.
const BLOCK: usize = 1024;

/// Assemble A and b over the level prefix held by the input slices.
///
/// `uniform_weights` lets the dense path skip the explicit JᵀW product:
/// rows of invalid pixels are zero, so JᵀJ already equals JᵀWJ there.
pub fn normal_equations(
    path: Assembly,
    uniform_weights: bool,
    jacobian: &[Float],
    weights: &[Float],
    residuals: &[Float],
    jtw: &mut [Float],
) -> (Mat6, Vec6) {
    match path {
        Assembly::Dense => dense(uniform_weights, jacobian, weights, residuals, jtw),
        Assembly::Blocked => blocked(jacobian, weights, residuals),
    }
}

fn dense(
    uniform_weights: bool,
    jacobian: &[Float],
    weights: &[Float],
    residuals: &[Float],
    jtw: &mut [Float],
) -> (Mat6, Vec6) {
    let n = residuals.len();
    let j_mat = DMatrix::from_row_slice(n, 6, jacobian);
    let r_vec = DVector::from_column_slice(residuals);
    let (a, b) = if uniform_weights {
        (j_mat.tr_mul(&j_mat), j_mat.tr_mul(&r_vec))
    } else {
        kernels::weight_jacobian(jacobian, weights, jtw);
        let jtw_mat = DMatrix::from_row_slice(n, 6, jtw);
        (jtw_mat.tr_mul(&j_mat), jtw_mat.tr_mul(&r_vec))
    };
    (Mat6::from_fn(|i, j| a[(i, j)]), Vec6::from_fn(|i, _| b[(i, 0)]))
}

fn blocked(jacobian: &[Float], weights: &[Float], residuals: &[Float]) -> (Mat6, Vec6) {
    jacobian
        .par_chunks(6 * BLOCK)
        .zip(weights.par_chunks(BLOCK))
        .zip(residuals.par_chunks(BLOCK))
        .map(|((j_block, w_block), r_block)| {
            let mut a = Mat6::zeros();
            let mut b = Vec6::zeros();
            for (row, &w, &r) in izip!(j_block.chunks_exact(6), w_block, r_block) {
                if w == 0.0 {
                    continue;
                }
                for i in 0..6 {
                    let w_j_i = w * row[i];
                    b[i] += w_j_i * r;
                    for j in i..6 {
                        a[(i, j)] += w_j_i * row[j];
                    }
                }
            }
            for i in 1..6 {
                for j in 0..i {
                    a[(i, j)] = a[(j, i)];
                }
            }
            (a, b)
        })
        .reduce(
            || (Mat6::zeros(), Vec6::zeros()),
            |x, y| (x.0 + y.0, x.1 + y.1),
        )
}

// TESTS #############################################################
