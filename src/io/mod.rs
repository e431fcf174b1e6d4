// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

pub mod error;
pub mod uvfits;

use ndarray::{Array3, Array4};

use crate::c32;
use error::UvfWriteError;

pub use uvfits::{ObsParams, UvfWriter, VisStats};

/// One telescope of the array: its station name and geocentric position.
#[derive(Debug, Clone, PartialEq)]
pub struct Antenna {
    /// Station name, at most 8 ASCII characters end up on disk.
    pub name: String,
    /// X coordinate \[metres\]
    pub x: f64,
    /// Y coordinate \[metres\]
    pub y: f64,
    /// Z coordinate \[metres\]
    pub z: f64,
}

/// A source of visibility data for [`UvfWriter`]. One "group" is written per
/// (frame, baseline) pair, frame-major.
pub trait VisSource {
    /// The number of timestamps.
    fn num_frames(&self) -> usize;

    /// The number of baselines per frame.
    fn num_baselines(&self) -> usize;

    /// The number of intermediate-frequency bands.
    fn num_ifs(&self) -> usize;

    /// The number of Stokes parameters per IF.
    fn num_stokes(&self) -> usize;

    /// The number of telescopes in the array.
    fn num_telescopes(&self) -> usize;

    /// The projected baseline as light travel time \[seconds\].
    fn uvw(&self, frame: usize, baseline: usize) -> (f32, f32, f32);

    /// The full Julian date of a frame's timestamp \[days\].
    fn julian_date(&self, frame: usize) -> f64;

    /// The complex visibility and its weight for one (frame, baseline, IF,
    /// Stokes) cell.
    fn visibility(&self, frame: usize, baseline: usize, i_if: usize, i_stokes: usize)
        -> (c32, f32);

    /// The station name of a telescope.
    fn antenna_name(&self, telescope: usize) -> String;

    /// The geocentric position of a telescope \[metres\].
    fn antenna_position(&self, telescope: usize) -> (f64, f64, f64);
}

/// An in-memory [`VisSource`] backed by ndarray containers.
///
/// Visibility and weight arrays are indexed `[frame][baseline][IF][Stokes]`;
/// the UVW array is indexed `[frame][baseline][u v w]`.
pub struct MemVisSource {
    vis: Array4<c32>,
    weights: Array4<f32>,
    uvws: Array3<f32>,
    julian_dates: Vec<f64>,
    antennas: Vec<Antenna>,
}

impl MemVisSource {
    pub fn new(
        vis: Array4<c32>,
        weights: Array4<f32>,
        uvws: Array3<f32>,
        julian_dates: Vec<f64>,
        antennas: Vec<Antenna>,
    ) -> Result<MemVisSource, UvfWriteError> {
        let dim = vis.dim();
        if weights.dim() != dim {
            return Err(UvfWriteError::BadArrayShape {
                argument: "weights",
                expected: format!("{dim:?}"),
                received: format!("{:?}", weights.dim()),
            });
        }
        if uvws.dim() != (dim.0, dim.1, 3) {
            return Err(UvfWriteError::BadArrayShape {
                argument: "uvws",
                expected: format!("{:?}", (dim.0, dim.1, 3)),
                received: format!("{:?}", uvws.dim()),
            });
        }
        if julian_dates.len() != dim.0 {
            return Err(UvfWriteError::BadArrayShape {
                argument: "julian_dates",
                expected: format!("{}", dim.0),
                received: format!("{}", julian_dates.len()),
            });
        }
        Ok(MemVisSource {
            vis,
            weights,
            uvws,
            julian_dates,
            antennas,
        })
    }
}

impl VisSource for MemVisSource {
    fn num_frames(&self) -> usize {
        self.vis.dim().0
    }

    fn num_baselines(&self) -> usize {
        self.vis.dim().1
    }

    fn num_ifs(&self) -> usize {
        self.vis.dim().2
    }

    fn num_stokes(&self) -> usize {
        self.vis.dim().3
    }

    fn num_telescopes(&self) -> usize {
        self.antennas.len()
    }

    fn uvw(&self, frame: usize, baseline: usize) -> (f32, f32, f32) {
        (
            self.uvws[[frame, baseline, 0]],
            self.uvws[[frame, baseline, 1]],
            self.uvws[[frame, baseline, 2]],
        )
    }

    fn julian_date(&self, frame: usize) -> f64 {
        self.julian_dates[frame]
    }

    fn visibility(
        &self,
        frame: usize,
        baseline: usize,
        i_if: usize,
        i_stokes: usize,
    ) -> (c32, f32) {
        (
            self.vis[[frame, baseline, i_if, i_stokes]],
            self.weights[[frame, baseline, i_if, i_stokes]],
        )
    }

    fn antenna_name(&self, telescope: usize) -> String {
        self.antennas[telescope].name.clone()
    }

    fn antenna_position(&self, telescope: usize) -> (f64, f64, f64) {
        let ant = &self.antennas[telescope];
        (ant.x, ant.y, ant.z)
    }
}
