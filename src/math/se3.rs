// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Lie algebra/group functions for 3D rigid body motion.
//!
//! The twist parameterization stores the translational part first,
//! matching the column layout of the photometric Jacobian.
//!
//! Interesting reads:
//! - Sophus c++ library: <https://github.com/strasdat/Sophus>
//! - Ethan Eade course on Lie Groups for 2D and 3D transformations:
//!     - details: <http://ethaneade.com/lie.pdf>
//!     - summary: <http://ethaneade.com/lie_groups.pdf>

use std::ops::Mul;

use crate::math::so3;
use crate::misc::type_aliases::{Float, Mat3, Vec3, Vec6};

const EPSILON_TAYLOR_SERIES: Float = 1e-2;
const EPSILON_TAYLOR_SERIES_2: Float = EPSILON_TAYLOR_SERIES * EPSILON_TAYLOR_SERIES;
const _1_6: Float = 1.0 / 6.0;
const _1_12: Float = 1.0 / 12.0;
const _1_24: Float = 1.0 / 24.0;
const _1_120: Float = 1.0 / 120.0;
const _1_720: Float = 1.0 / 720.0;

/// Parameterization of a twist (element of se3).
pub type Twist = Vec6;

/// A rigid body motion, as a rotation matrix and a translation vector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RigidMotion {
    pub rotation: Mat3,
    pub translation: Vec3,
}

impl RigidMotion {
    /// The identity motion.
    pub fn identity() -> RigidMotion {
        RigidMotion {
            rotation: Mat3::identity(),
            translation: Vec3::zeros(),
        }
    }

    /// Inverse motion, using the orthonormality of the rotation.
    pub fn inverse(&self) -> RigidMotion {
        let rotation_t = self.rotation.transpose();
        RigidMotion {
            rotation: rotation_t,
            translation: -(rotation_t * self.translation),
        }
    }
}

impl Mul for RigidMotion {
    type Output = RigidMotion;
    fn mul(self, rhs: RigidMotion) -> RigidMotion {
        RigidMotion {
            rotation: self.rotation * rhs.rotation,
            translation: self.rotation * rhs.translation + self.translation,
        }
    }
}

/// Retrieve the linear velocity part of the twist parameterization.
pub fn linear_velocity(xi: Twist) -> Vec3 {
    Vec3::new(xi[0], xi[1], xi[2])
}

/// Retrieve the angular velocity part of the twist parameterization.
pub fn angular_velocity(xi: Twist) -> Vec3 {
    Vec3::new(xi[3], xi[4], xi[5])
}

/// Compute the exponential map from Lie algebra se3 to Lie group SE3.
/// The translation goes through the left Jacobian V of SO3.
pub fn exp(xi: Twist) -> RigidMotion {
    let xi_v = linear_velocity(xi);
    let xi_w = angular_velocity(xi);
    let theta_2 = xi_w.norm_squared();
    let (omega, omega_2) = (so3::hat(xi_w), so3::hat_2(xi_w));
    let (coef_omega, coef_omega_2) = if theta_2 < EPSILON_TAYLOR_SERIES_2 {
        (0.5 - _1_24 * theta_2, _1_6 - _1_120 * theta_2) // TAYLOR
    } else {
        let theta = theta_2.sqrt();
        (
            (1.0 - theta.cos()) / theta_2,
            (theta - theta.sin()) / (theta * theta_2),
        )
    };
    let v = Mat3::identity() + coef_omega * omega + coef_omega_2 * omega_2;
    RigidMotion {
        rotation: so3::exp(xi_w),
        translation: v * xi_v,
    }
}

/// Compute the logarithm map from the Lie group SE3 to the Lie algebra se3.
/// Inverse of the exponential map.
pub fn log(motion: RigidMotion) -> Twist {
    let w = so3::log(&motion.rotation);
    let theta_2 = w.norm_squared();
    let (omega, omega_2) = (so3::hat(w), so3::hat_2(w));
    let coef_omega_2 = if theta_2 < EPSILON_TAYLOR_SERIES_2 {
        _1_12 + _1_720 * theta_2 // TAYLOR
    } else {
        let theta = theta_2.sqrt();
        (1.0 - 0.5 * theta * theta.sin() / (1.0 - theta.cos())) / theta_2
    };
    let v_inv = Mat3::identity() - 0.5 * omega + coef_omega_2 * omega_2;
    let xi_v = v_inv * motion.translation;
    Vec6::new(xi_v[0], xi_v[1], xi_v[2], w[0], w[1], w[2])
}

// TESTS #############################################################
