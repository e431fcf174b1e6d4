// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Useful constants.

/// Bytes in one header card.
pub const BYTES_PER_CARD: usize = 80;

/// Header cards per FITS logical record.
pub const CARDS_PER_BLOCK: usize = 36;

/// Bytes in one FITS logical record (2880). Every header and data segment
/// must be padded to a multiple of this.
pub const BYTES_PER_BLOCK: usize = BYTES_PER_CARD * CARDS_PER_BLOCK;

/// Bytes per IF in the FQ table: one 32-bit id, three 64-bit frequencies,
/// one 32-bit sideband flag.
pub const BYTES_PER_FQ_ENTRY: usize = 32;

/// Seconds per day (86400)
pub const DAYSEC: f64 = 86400.0;
