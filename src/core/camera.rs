// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Pinhole camera intrinsics and their multi-resolution bank.

use crate::misc::type_aliases::{Float, Mat3};

/// Pinhole intrinsics of one pyramid level, with the inverse camera matrix
/// cached since the warping kernels read it at every pixel.
#[derive(Debug, Clone, PartialEq)]
pub struct Intrinsics {
    k: Mat3,
    k_inv: Mat3,
}

impl Intrinsics {
    /// Build intrinsics from a 3x3 camera matrix.
    /// Returns None when the matrix is not invertible.
    pub fn from_matrix(k: Mat3) -> Option<Intrinsics> {
        k.try_inverse().map(|k_inv| Intrinsics { k, k_inv })
    }

    /// Scaled intrinsics for every pyramid level, finest first.
    pub fn multi_res(self, nb_levels: usize) -> Vec<Intrinsics> {
        let mut intrinsics_multires = Vec::with_capacity(nb_levels);
        intrinsics_multires.push(self);
        for _ in 1..nb_levels {
            let halved = intrinsics_multires.last().unwrap().halve();
            intrinsics_multires.push(halved);
        }
        intrinsics_multires
    }

    /// Intrinsics of the next coarser level: focal lengths halved, and the
    /// principal point moved onto the downsampled pixel grid.
    fn halve(&self) -> Intrinsics {
        let mut k = self.k;
        k[(0, 0)] = 0.5 * k[(0, 0)];
        k[(1, 1)] = 0.5 * k[(1, 1)];
        k[(0, 1)] = 0.5 * k[(0, 1)];
        k[(0, 2)] = 0.5 * (k[(0, 2)] + 0.5) - 0.5;
        k[(1, 2)] = 0.5 * (k[(1, 2)] + 0.5) - 0.5;
        // Halving keeps the matrix upper triangular with non-zero focals.
        let k_inv = k.try_inverse().expect("halved intrinsics stay invertible");
        Intrinsics { k, k_inv }
    }

    /// The 3x3 camera matrix of this level.
    pub fn matrix(&self) -> &Mat3 {
        &self.k
    }

    /// The cached inverse camera matrix of this level.
    pub fn inverse(&self) -> &Mat3 {
        &self.k_inv
    }
}

// TESTS #############################################################
