// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! A from-scratch writer for the UV-FITS "random groups" visibility format:
//! 80-byte header cards in 2880-byte blocks, big-endian random-groups
//! records, and the AIPS FQ/AN table extensions consumed by downstream
//! imaging tools.

#[allow(non_camel_case_types)]
pub type c32 = num_complex::Complex<f32>;
#[allow(non_camel_case_types)]
pub type c64 = num_complex::Complex<f64>;

pub mod constants;
pub mod io;
pub mod math;

// Re-exports.
pub use io::{
    error::UvfWriteError,
    uvfits::{fits_date_string, ObsParams, UvfWriter, VisStats},
    Antenna, MemVisSource, VisSource,
};

pub use hifitime;
pub use ndarray;
pub use num_complex;
pub use num_complex::Complex;
