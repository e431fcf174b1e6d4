// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use thiserror::Error;

/// All the errors that can occur while writing a uvfits file.
#[derive(Error, Debug)]
pub enum UvfWriteError {
    /// The keyword is not in the header-keyword catalog.
    #[error("unrecognized header keyword {0:?}")]
    UnrecognizedKeyword(String),

    /// The value text could not be parsed as the keyword's value kind.
    #[error("value {value:?} for keyword {keyword} is not a valid {expected} value")]
    BadCardValue {
        keyword: String,
        value: String,
        expected: &'static str,
    },

    /// The formatted value or comment does not fit the 80-byte card.
    #[error("{what} for keyword {keyword} is too long to fit an 80-byte card")]
    CardOverflow {
        keyword: String,
        what: &'static str,
    },

    /// Card text must be ASCII with no NUL bytes.
    #[error("card text for keyword {keyword} contains a NUL or non-ASCII byte")]
    BadCardText { keyword: String },

    /// An antenna-table row did not format to exactly 80 bytes.
    #[error("antenna table row {row} formatted to {len} bytes, expected 80")]
    TableRowOverflow { row: usize, len: usize },

    /// The explicit baseline-code list does not cover every baseline.
    #[error("expected {expected} baseline codes in the override list, got {got}")]
    BadBaselineList { expected: usize, got: usize },

    /// There are no groups to write.
    #[error("no visibility groups to write (frames = {frames}, baselines = {baselines})")]
    NoGroups { frames: usize, baselines: usize },

    #[error("bad array shape supplied to argument {argument}. expected {expected}, received {received}")]
    BadArrayShape {
        argument: &'static str,
        expected: String,
        received: String,
    },

    /// A write was attempted after the file was closed.
    #[error("the uvfits file has already been closed")]
    Closed,

    /// An IO error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
