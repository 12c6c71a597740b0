// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Execution backend of the tracker: one-shot buffer allocation, per-pixel
//! kernels and the assembly of the 6x6 normal equations.

pub mod assembly;
pub mod buffers;
pub mod kernels;
