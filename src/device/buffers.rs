// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Buffers backing the alignment: the two frame pyramids, the per-iteration
//! scratch rasters and the constant bank read by every kernel.
//!
//! All storage is allocated once when the tracker is built. Scratch rasters
//! are sized for the finest level and coarser levels index a prefix of the
//! same storage. The previous/current frame exchange at the end of each
//! alignment swaps the owning handles, never the raster contents.

use crate::core::camera::Intrinsics;
use crate::core::gradient;
use crate::core::multires;
use crate::misc::type_aliases::{Float, Mat3, Vec3};

/// Gray, depth and gray-gradient rasters of one pyramid level.
pub struct PyramidLevel {
    pub width: usize,
    pub height: usize,
    pub gray: Vec<Float>,
    pub depth: Vec<Float>,
    pub gray_dx: Vec<Float>,
    pub gray_dy: Vec<Float>,
}

impl PyramidLevel {
    fn allocate(width: usize, height: usize) -> PyramidLevel {
        let size = width * height;
        PyramidLevel {
            width,
            height,
            gray: vec![0.0; size],
            depth: vec![0.0; size],
            gray_dx: vec![0.0; size],
            gray_dy: vec![0.0; size],
        }
    }

    /// Interpolated view of the gray raster.
    pub fn gray_tex(&self) -> Tex {
        Tex {
            data: &self.gray,
            width: self.width,
            height: self.height,
        }
    }

    /// Interpolated view of the x gradient raster.
    pub fn dx_tex(&self) -> Tex {
        Tex {
            data: &self.gray_dx,
            width: self.width,
            height: self.height,
        }
    }

    /// Interpolated view of the y gradient raster.
    pub fn dy_tex(&self) -> Tex {
        Tex {
            data: &self.gray_dy,
            width: self.width,
            height: self.height,
        }
    }
}

/// All pyramid levels of one frame, finest first.
pub struct FramePyramid {
    pub levels: Vec<PyramidLevel>,
}

impl FramePyramid {
    /// Allocate every level of the pyramid for the given full resolution.
    pub fn allocate(width: usize, height: usize, nb_levels: usize) -> FramePyramid {
        let levels = (0..nb_levels)
            .map(|level| {
                let (w, h) = multires::level_dimensions(width, height, level);
                PyramidLevel::allocate(w, h)
            })
            .collect();
        FramePyramid { levels }
    }

    /// Ingest a full-resolution frame: copy level 0, downsample the coarser
    /// levels, then recompute the gradients of every level so they always
    /// match the intensity raster they belong to.
    pub fn fill(&mut self, gray: &[Float], depth: &[Float]) {
        self.levels[0].gray.copy_from_slice(gray);
        self.levels[0].depth.copy_from_slice(depth);
        for level in 1..self.levels.len() {
            let (finer, coarser) = self.levels.split_at_mut(level);
            let src = &finer[level - 1];
            let dst = &mut coarser[0];
            multires::halve(&src.gray, src.width, src.height, &mut dst.gray, multires::bloc_mean);
            multires::halve(
                &src.depth,
                src.width,
                src.height,
                &mut dst.depth,
                multires::bloc_depth_mean,
            );
        }
        for level in self.levels.iter_mut() {
            gradient::central_x(&level.gray, level.width, level.height, &mut level.gray_dx);
            gradient::central_y(&level.gray, level.width, level.height, &mut level.gray_dy);
        }
    }
}

/// Borrowed view of a level raster for interpolated reads, standing in for
/// a bound texture reference with clamped bilinear filtering.
#[derive(Clone, Copy)]
pub struct Tex<'a> {
    data: &'a [Float],
    width: usize,
    height: usize,
}

impl<'a> Tex<'a> {
    pub fn new(data: &'a [Float], width: usize, height: usize) -> Tex<'a> {
        Tex {
            data,
            width,
            height,
        }
    }

    pub fn sample(&self, x: Float, y: Float) -> Float {
        gradient::bilinear(self.data, self.width, self.height, x, y)
    }
}

/// Per-iteration scratch rasters, sized once for the finest level.
/// Kernels overwrite the level prefix they are given; nothing is zeroed
/// between iterations.
pub struct Scratch {
    pub x_prime: Vec<Float>,
    pub y_prime: Vec<Float>,
    pub z_prime: Vec<Float>,
    pub u_warped: Vec<Float>,
    pub v_warped: Vec<Float>,
    pub residuals: Vec<Float>,
    pub weights: Vec<Float>,
    /// n x 6 row-major Jacobian.
    pub jacobian: Vec<Float>,
    /// n x 6 row-major weighted Jacobian of the dense assembly path.
    pub jtw: Vec<Float>,
}

impl Scratch {
    pub fn allocate(width: usize, height: usize) -> Scratch {
        let size = width * height;
        Scratch {
            x_prime: vec![0.0; size],
            y_prime: vec![0.0; size],
            z_prime: vec![0.0; size],
            u_warped: vec![0.0; size],
            v_warped: vec![0.0; size],
            residuals: vec![0.0; size],
            weights: vec![0.0; size],
            jacobian: vec![0.0; 6 * size],
            jtw: vec![0.0; 6 * size],
        }
    }
}

/// The constant bank: camera matrices of every level, plus the pose terms
/// republished before each warp dispatch. Kernels only ever read it.
///
/// This is the reification of device constant memory: one bank per tracker,
/// and a process sharing one bank between trackers would have to serialize
/// their alignments externally.
pub struct ConstantBank {
    k_pyr: Vec<Mat3>,
    k_inv_pyr: Vec<Mat3>,
    rk_inv: Mat3,
    translation: Vec3,
}

impl ConstantBank {
    /// Load the camera matrices of every level into the bank.
    pub fn load(intrinsics_multires: &[Intrinsics]) -> ConstantBank {
        ConstantBank {
            k_pyr: intrinsics_multires.iter().map(|i| *i.matrix()).collect(),
            k_inv_pyr: intrinsics_multires.iter().map(|i| *i.inverse()).collect(),
            rk_inv: Mat3::identity(),
            translation: Vec3::zeros(),
        }
    }

    /// Publish the pose terms of the next kernel dispatches:
    /// `R * K_inv` of the given level, and the translation.
    pub fn publish_pose(&mut self, rotation: &Mat3, translation: &Vec3, level: usize) {
        self.rk_inv = rotation * self.k_inv_pyr[level];
        self.translation = *translation;
    }

    pub fn k(&self, level: usize) -> &Mat3 {
        &self.k_pyr[level]
    }

    pub fn rk_inv(&self) -> &Mat3 {
        &self.rk_inv
    }

    pub fn translation(&self) -> &Vec3 {
        &self.translation
    }
}

// TESTS #############################################################

#[cfg(test)]
mod tests {

    use super::*;

    #[test]
    fn pyramid_levels_have_halved_dimensions() {
        let pyramid = FramePyramid::allocate(64, 48, 4);
        let dims: Vec<_> = pyramid.levels.iter().map(|l| (l.width, l.height)).collect();
        assert_eq!(vec![(64, 48), (32, 24), (16, 12), (8, 6)], dims);
    }

    #[test]
    fn fill_downsamples_gray_and_depth_with_their_own_rules() {
        let mut pyramid = FramePyramid::allocate(4, 2, 2);
        #[rustfmt::skip]
        let gray = [
            1.0, 3.0, 5.0, 7.0,
            1.0, 3.0, 5.0, 7.0,
        ];
        #[rustfmt::skip]
        let depth = [
            2.0, 0.0, 0.0, 0.0,
            4.0, 0.0, 0.0, 0.0,
        ];
        pyramid.fill(&gray, &depth);
        assert_eq!(vec![2.0, 6.0], pyramid.levels[1].gray);
        // Only the two valid samples of the first block contribute.
        assert_eq!(vec![3.0, 0.0], pyramid.levels[1].depth);
    }

    #[test]
    fn fill_recomputes_gradients_at_every_level() {
        let mut pyramid = FramePyramid::allocate(4, 4, 2);
        let gray: Vec<Float> = (0..16).map(|i| (i % 4) as Float).collect();
        let depth = vec![1.0; 16];
        pyramid.fill(&gray, &depth);
        // Unit slope inside the level 0 ramp, flat rows everywhere.
        assert_eq!(1.0, pyramid.levels[0].gray_dx[1]);
        assert_eq!(0.0, pyramid.levels[0].gray_dy[5]);
        assert_eq!(2, pyramid.levels[1].width);
        assert_eq!(1.0, pyramid.levels[1].gray_dx[0]);
    }
}
