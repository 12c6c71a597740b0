// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Lie algebra/group functions for 3D rotations.
//!
//! Rotations are kept in matrix form since the warping kernels consume the
//! rotation matrix directly.
//!
//! Interesting reads:
//! - Sophus c++ library: <https://github.com/strasdat/Sophus>
//! - Ethan Eade course on Lie Groups for 2D and 3D transformations:
//!     - details: <http://ethaneade.com/lie.pdf>
//!     - summary: <http://ethaneade.com/lie_groups.pdf>

use std::f32::consts::PI;

use crate::misc::type_aliases::{Float, Mat3, Vec3};

/// Threshold for using Taylor series in computations.
const EPSILON_TAYLOR_SERIES: Float = 1e-2;
const EPSILON_TAYLOR_SERIES_2: Float = EPSILON_TAYLOR_SERIES * EPSILON_TAYLOR_SERIES;
const _1_6: Float = 1.0 / 6.0;
const _1_12: Float = 1.0 / 12.0;
const _1_24: Float = 1.0 / 24.0;

/// Hat operator.
/// Goes from so3 parameterization to so3 element (skew-symmetric matrix).
#[rustfmt::skip]
pub fn hat(w: Vec3) -> Mat3 {
    Mat3::new(
         0.0,  -w.z,   w.y,
         w.z,   0.0,  -w.x,
        -w.y,   w.x,   0.0,
    )
}

/// Squared hat operator (`hat_2(w) == hat(w) * hat(w)`).
/// Result is a symmetric matrix.
#[rustfmt::skip]
pub fn hat_2(w: Vec3) -> Mat3 {
    let w11 = w.x * w.x;
    let w12 = w.x * w.y;
    let w13 = w.x * w.z;
    let w22 = w.y * w.y;
    let w23 = w.y * w.z;
    let w33 = w.z * w.z;
    Mat3::new(
        -w22 - w33,     w12,           w13,
         w12,          -w11 - w33,     w23,
         w13,           w23,          -w11 - w22,
    )
}

/// Vee operator. Inverse of hat operator.
/// Warning! does not check that the given matrix is skew-symmetric.
pub fn vee(mat: Mat3) -> Vec3 {
    Vec3::new(mat.m32, mat.m13, mat.m21)
}

/// Compute the exponential map from Lie algebra so3 to Lie group SO3.
/// Closed-form Rodrigues rotation matrix.
pub fn exp(w: Vec3) -> Mat3 {
    let theta_2 = w.norm_squared();
    let (omega, omega_2) = (hat(w), hat_2(w));
    let (coef_omega, coef_omega_2) = if theta_2 < EPSILON_TAYLOR_SERIES_2 {
        (1.0 - _1_6 * theta_2, 0.5 - _1_24 * theta_2) // TAYLOR
    } else {
        let theta = theta_2.sqrt();
        (theta.sin() / theta, (1.0 - theta.cos()) / theta_2)
    };
    Mat3::identity() + coef_omega * omega + coef_omega_2 * omega_2
}

/// Compute the logarithm map from the Lie group SO3 to the Lie algebra so3.
/// Inverse of the exponential map.
pub fn log(rotation: &Mat3) -> Vec3 {
    let cos_theta = (0.5 * (rotation.trace() - 1.0)).clamp(-1.0, 1.0);
    let theta = cos_theta.acos();
    if theta < EPSILON_TAYLOR_SERIES {
        // theta / (2 sin(theta)) ~ 0.5 + theta^2 / 12
        (0.5 + theta * theta * _1_12) * vee(rotation - rotation.transpose()) // TAYLOR
    } else if PI - theta < EPSILON_TAYLOR_SERIES {
        // Near pi the anti-symmetric part degenerates.
        // Recover the axis from the symmetric part, R + I ~ 2 u u^T.
        let q = 0.5 * (rotation + rotation.transpose());
        let diag = Vec3::new(q.m11, q.m22, q.m33);
        let k = diag.imax();
        let u_k = (0.5 * (diag[k] + 1.0)).max(0.0).sqrt();
        let mut u = Vec3::zeros();
        u[k] = u_k;
        for j in 0..3 {
            if j != k {
                u[j] = 0.5 * q[(k, j)] / u_k;
            }
        }
        // Either sign of the axis is a valid logarithm at exactly pi.
        // Away from it, stay consistent with the anti-symmetric residue.
        let residue = vee(rotation - rotation.transpose());
        if u.dot(&residue) < 0.0 {
            u = -u;
        }
        theta * u.normalize()
    } else {
        (0.5 * theta / theta.sin()) * vee(rotation - rotation.transpose())
    }
}

// TESTS #############################################################
