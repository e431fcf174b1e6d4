// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Baseline combinatorics.

/// Convert a _cross-correlation_ baseline index into its constituent
/// telescope indices. Baseline 0 _is not_ between telescope 0 and telescope
/// 0; it is between telescope 0 and telescope 1.
#[inline]
pub fn cross_baseline_to_telescopes(
    total_num_telescopes: usize,
    baseline: usize,
) -> (usize, usize) {
    let n = (total_num_telescopes - 1) as f64;
    let bl = baseline as f64;
    let tel1 = (-0.5 * (4.0 * n * (n + 1.0) - 8.0 * bl + 1.0).sqrt() + n + 0.5).floor();
    let tel2 = bl - tel1 * (n - (tel1 + 1.0) / 2.0) + 1.0;
    (tel1 as usize, tel2 as usize)
}

/// From the number of cross-correlation baselines, get the number of
/// telescopes.
// From the definition of how many baselines there are in an array of N
// telescopes, this is just the solved quadratic.
#[inline]
pub fn num_telescopes_from_num_cross_baselines(num_baselines: usize) -> usize {
    (((1 + 8 * num_baselines) as f64).sqrt() as usize + 1) / 2
}

/// Encode a baseline into the uvfits format. Use the miriad convention to
/// handle more than 255 antennas (up to 2048). This is backwards compatible
/// with the standard UVFITS convention. Antenna indices start at 1.
#[inline]
pub const fn encode_uvfits_baseline(ant1: usize, ant2: usize) -> usize {
    if ant2 > 255 {
        ant1 * 2048 + ant2 + 65_536
    } else {
        ant1 * 256 + ant2
    }
}

/// Decode a uvfits baseline into the antennas that formed it. Antenna
/// indices start at 1.
#[inline]
pub const fn decode_uvfits_baseline(bl: usize) -> (usize, usize) {
    if bl < 65_535 {
        let ant2 = bl % 256;
        let ant1 = (bl - ant2) / 256;
        (ant1, ant2)
    } else {
        let ant2 = (bl - 65_536) % 2048;
        let ant1 = (bl - ant2 - 65_536) / 2048;
        (ant1, ant2)
    }
}
