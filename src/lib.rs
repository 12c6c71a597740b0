// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Dense RGB-D visual odometry.
//!
//! Estimates the rigid body motion of a calibrated RGB-D camera between
//! consecutive frames by direct photometric alignment: a coarse-to-fine
//! Gauss-Newton minimization of the reprojection intensity residual over
//! all pixels with depth data, robustified by Student-t reweighting.
//! The inter-frame motion is accumulated into a running pose.
//!
//! The entry point is [`core::track::photometric::Config`], which is
//! initialized with the first frame and produces a
//! [`core::track::photometric::Tracker`] whose `align` method ingests each
//! subsequent frame.

pub mod core;
pub mod device;
pub mod math;
pub mod misc;
