//! Type aliases for common types used all over the code base.

use nalgebra as na;

pub type Float = f32;

pub type Vec3 = na::Vector3<Float>;
pub type Vec6 = na::Vector6<Float>;

pub type Mat3 = na::Matrix3<Float>;
pub type Mat6 = na::Matrix6<Float>;
