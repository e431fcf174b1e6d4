// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Module for writing the uvfits "random groups" file format.
//!
//! The file is a sequence of 2880-byte logical records: a primary header of
//! 80-byte cards, one visibility group per (frame, baseline) pair, then the
//! AIPS FQ and AIPS AN table extensions. All binary values are big-endian on
//! the wire regardless of host byte order.

use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use byteorder::{BigEndian, WriteBytesExt};
use hifitime::Epoch;
use itertools::iproduct;
use log::{info, trace};

use super::{error::UvfWriteError, VisSource};
use crate::{
    constants::{BYTES_PER_BLOCK, BYTES_PER_CARD, BYTES_PER_FQ_ENTRY, CARDS_PER_BLOCK, DAYSEC},
    math::{cross_baseline_to_telescopes, encode_uvfits_baseline},
};

/// The value kinds a header card can carry. Each kind knows how to render a
/// value into the fixed card layout and how to read one back out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardKind {
    Float,
    Int,
    Logical,
    Str,
    /// Structural keywords (`END`, blank padding) carry no value at all.
    Null,
}

/// A typed header-card value, as read back by [`parse_card`].
#[derive(Debug, Clone, PartialEq)]
pub enum CardValue {
    Float(f64),
    Int(i64),
    Logical(bool),
    Str(String),
    Null,
}

/// One entry of the header-keyword catalog.
#[derive(Debug, Clone, Copy)]
pub struct KeywordSpec {
    pub name: &'static str,
    pub kind: CardKind,
    /// Whether the keyword may carry a numeric suffix (`CRVAL1`..`CRVALn`).
    pub indexed: bool,
}

const fn kw(name: &'static str, kind: CardKind, indexed: bool) -> KeywordSpec {
    KeywordSpec {
        name,
        kind,
        indexed,
    }
}

/// Every keyword the writer is allowed to emit. Lookup is an exact match on
/// the base keyword; entries flagged `indexed` also match with a trailing
/// decimal suffix. The blank entry is the padding card.
const KEYWORD_CATALOG: &[KeywordSpec] = &[
    kw("EPOCH", CardKind::Float, false),
    kw("TIMSYS", CardKind::Str, false),
    kw("DATUTC", CardKind::Float, false),
    kw("IATUTC", CardKind::Float, false),
    kw("ALTRVAL", CardKind::Float, false),
    kw("ALTRPIX", CardKind::Float, false),
    kw("AUTHOR", CardKind::Str, false),
    kw("BITPIX", CardKind::Int, false),
    kw("BLOCKED", CardKind::Logical, false),
    kw("BSCALE", CardKind::Float, false),
    kw("BZERO", CardKind::Float, false),
    kw("BUNIT", CardKind::Str, false),
    kw("CDELT", CardKind::Float, true),
    kw("COMMENT", CardKind::Str, false),
    kw("CROTA", CardKind::Float, true),
    kw("CRPIX", CardKind::Float, true),
    kw("CRVAL", CardKind::Float, true),
    kw("CTYPE", CardKind::Str, true),
    kw("DATAMAX", CardKind::Float, false),
    kw("DATAMIN", CardKind::Float, false),
    kw("EXTEND", CardKind::Logical, false),
    kw("END", CardKind::Null, false),
    kw("EXTNAME", CardKind::Str, false),
    kw("EXTVER", CardKind::Int, false),
    kw("EXTLEVEL", CardKind::Int, false),
    kw("INSTRUME", CardKind::Str, false),
    kw("GCOUNT", CardKind::Int, false),
    kw("GROUPS", CardKind::Logical, false),
    kw("DATE", CardKind::Str, false),
    kw("DATE-MAP", CardKind::Str, false),
    kw("DATE-OBS", CardKind::Str, false),
    kw("EQUINOX", CardKind::Float, false),
    kw("NAXIS", CardKind::Int, true),
    kw("OBJECT", CardKind::Str, false),
    kw("OBSRA", CardKind::Float, false),
    kw("OBSDEC", CardKind::Float, false),
    kw("ORIGIN", CardKind::Str, false),
    kw("PCOUNT", CardKind::Int, false),
    kw("PSCAL", CardKind::Float, true),
    kw("PTYPE", CardKind::Str, true),
    kw("PZERO", CardKind::Float, true),
    kw("RESTFREQ", CardKind::Float, false),
    kw("SIMPLE", CardKind::Logical, false),
    kw("TBCOL", CardKind::Int, true),
    kw("TELESCOP", CardKind::Str, false),
    kw("TFIELDS", CardKind::Int, false),
    kw("TFORM", CardKind::Str, true),
    kw("TSCAL", CardKind::Float, true),
    kw("TTYPE", CardKind::Str, true),
    kw("TUNIT", CardKind::Str, true),
    kw("TZERO", CardKind::Float, true),
    kw("VELREF", CardKind::Float, false),
    kw("XTENSION", CardKind::Str, false),
    kw("NO_IF", CardKind::Int, false),
    kw("", CardKind::Null, false),
];

/// Resolve a keyword against the catalog.
pub fn lookup_keyword(name: &str) -> Result<&'static KeywordSpec, UvfWriteError> {
    let trimmed = name.trim_end();
    let base = trimmed.trim_end_matches(|c: char| c.is_ascii_digit());
    for spec in KEYWORD_CATALOG {
        if spec.name == trimmed || (spec.indexed && spec.name == base && trimmed.len() > base.len())
        {
            return Ok(spec);
        }
    }
    Err(UvfWriteError::UnrecognizedKeyword(name.to_string()))
}

/// Axis classes recognised in `CTYPE` values. Matching is a substring scan in
/// table order; anything unrecognised classifies as `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisType {
    Degrees,
    Radians,
    UV,
    Unknown,
}

const AXIS_TYPES: [(&str, AxisType); 6] = [
    ("RA", AxisType::Degrees),
    ("DEC", AxisType::Degrees),
    ("RA_R", AxisType::Radians),
    ("DEC_R", AxisType::Radians),
    ("U", AxisType::UV),
    ("V", AxisType::UV),
];

pub fn classify_axis(label: &str) -> AxisType {
    AXIS_TYPES
        .iter()
        .find(|&&(pat, _)| label.contains(pat))
        .map(|&(_, axis)| axis)
        .unwrap_or(AxisType::Unknown)
}

/// Brightness-unit classes recognised in `BUNIT` values, with the same
/// substring semantics as [`classify_axis`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrightnessUnit {
    MJyPerSr,
    JyPerBeam,
    MicroK,
    Unknown,
}

const BRIGHTNESS_UNITS: [(&str, BrightnessUnit); 3] = [
    ("MJY/SR", BrightnessUnit::MJyPerSr),
    ("JY/BEAM", BrightnessUnit::JyPerBeam),
    ("MUK", BrightnessUnit::MicroK),
];

pub fn classify_brightness_unit(label: &str) -> BrightnessUnit {
    BRIGHTNESS_UNITS
        .iter()
        .find(|&&(pat, _)| label.contains(pat))
        .map(|&(_, unit)| unit)
        .unwrap_or(BrightnessUnit::Unknown)
}

/// Render a float the way FORTRAN's `%20.10E` does: ten decimals, a signed
/// two-digit exponent, right-justified in 20 columns.
fn format_exponent(value: f64) -> String {
    if !value.is_finite() {
        return format!("{value:>20}");
    }
    let formatted = format!("{value:.10E}");
    let (mantissa, exponent) = match formatted.split_once('E') {
        Some(parts) => parts,
        None => (formatted.as_str(), "0"),
    };
    let exponent: i32 = exponent.parse().unwrap_or(0);
    let sign = if exponent < 0 { '-' } else { '+' };
    let text = format!("{mantissa}E{sign}{mag:02}", mag = exponent.abs());
    format!("{text:>20}")
}

impl CardKind {
    /// Format a value into the card's value field, comment delimiter
    /// included. The value arrives as text and is parsed here so that a
    /// malformed value fails instead of silently becoming zero.
    fn format(self, keyword: &str, value: &str) -> Result<String, UvfWriteError> {
        let bad = |expected: &'static str| UvfWriteError::BadCardValue {
            keyword: keyword.to_string(),
            value: value.to_string(),
            expected,
        };
        Ok(match self {
            CardKind::Float => {
                let v: f64 = value.trim().parse().map_err(|_| bad("float"))?;
                if !v.is_finite() {
                    return Err(bad("finite float"));
                }
                format!("= {} / ", format_exponent(v))
            }
            CardKind::Int => {
                let v: i64 = value.trim().parse().map_err(|_| bad("integer"))?;
                format!("= {v:>20} / ")
            }
            CardKind::Logical => {
                let v = value.trim();
                if v != "T" && v != "F" {
                    return Err(bad("logical (T/F)"));
                }
                format!("= {v:>20} / ")
            }
            CardKind::Str => {
                // The quoted value field is padded to 23 columns so the
                // comment always starts at the same place.
                let mut text = format!("= '{value:<8}'");
                while text.len() < 23 {
                    text.push(' ');
                }
                text.push_str("/ ");
                text
            }
            CardKind::Null => String::new(),
        })
    }
}

/// Compose one 80-byte header card: keyword left-justified in 8 bytes, the
/// kind-specific value field, the comment, space padding. The 80-byte budget
/// is hard; overflowing it is an error, not a truncation.
pub fn format_card(
    name: &str,
    value: &str,
    comment: &str,
) -> Result<[u8; BYTES_PER_CARD], UvfWriteError> {
    let spec = lookup_keyword(name)?;
    if name.len() > 8 {
        return Err(UvfWriteError::CardOverflow {
            keyword: name.to_string(),
            what: "keyword",
        });
    }
    let mut text = format!("{name:<8}");
    let value_text = spec.kind.format(name, value)?;
    if text.len() + value_text.len() > BYTES_PER_CARD {
        return Err(UvfWriteError::CardOverflow {
            keyword: name.to_string(),
            what: "value",
        });
    }
    text.push_str(&value_text);
    if text.len() + comment.len() > BYTES_PER_CARD {
        return Err(UvfWriteError::CardOverflow {
            keyword: name.to_string(),
            what: "comment",
        });
    }
    text.push_str(comment);
    if !text.is_ascii() || text.bytes().any(|b| b == 0) {
        return Err(UvfWriteError::BadCardText {
            keyword: name.to_string(),
        });
    }
    let mut card = [b' '; BYTES_PER_CARD];
    card[..text.len()].copy_from_slice(text.as_bytes());
    Ok(card)
}

/// Read a typed value back out of an 80-byte card, using the catalog entry's
/// value kind. This is the inverse of [`format_card`] (floats round-trip to
/// the ten decimals the card carries).
pub fn parse_card(card: &[u8]) -> Result<(String, CardValue), UvfWriteError> {
    let text = std::str::from_utf8(card).map_err(|_| UvfWriteError::BadCardText {
        keyword: String::new(),
    })?;
    let keyword = text.get(..8).unwrap_or(text).trim_end().to_string();
    let spec = lookup_keyword(&keyword)?;
    let rest = text.get(8..).unwrap_or("");
    let bad = |expected: &'static str| UvfWriteError::BadCardValue {
        keyword: keyword.clone(),
        value: rest.trim().to_string(),
        expected,
    };
    let value = match spec.kind {
        CardKind::Null => CardValue::Null,
        CardKind::Str => {
            let open = rest.find('\'').ok_or_else(|| bad("string"))?;
            let close = rest[open + 1..].find('\'').ok_or_else(|| bad("string"))?;
            CardValue::Str(rest[open + 1..open + 1 + close].trim_end().to_string())
        }
        kind => {
            let body = rest.strip_prefix("= ").ok_or_else(|| bad("value field"))?;
            let field = body.get(..20).ok_or_else(|| bad("value field"))?.trim();
            match kind {
                CardKind::Float => CardValue::Float(field.parse().map_err(|_| bad("float"))?),
                CardKind::Int => CardValue::Int(field.parse().map_err(|_| bad("integer"))?),
                CardKind::Logical => match field {
                    "T" => CardValue::Logical(true),
                    "F" => CardValue::Logical(false),
                    _ => return Err(bad("logical (T/F)")),
                },
                _ => unreachable!("string and null kinds handled above"),
            }
        }
    };
    Ok((keyword, value))
}

// FITS mandates big-endian on the wire; these cover the 4- and 8-byte scalar
// runs the format needs. Short writes surface as io errors and are never
// retried.
fn write_be_f32<W: Write>(stream: &mut W, values: &[f32]) -> std::io::Result<()> {
    for &v in values {
        stream.write_f32::<BigEndian>(v)?;
    }
    Ok(())
}

fn write_be_i32<W: Write>(stream: &mut W, values: &[i32]) -> std::io::Result<()> {
    for &v in values {
        stream.write_i32::<BigEndian>(v)?;
    }
    Ok(())
}

fn write_be_f64<W: Write>(stream: &mut W, values: &[f64]) -> std::io::Result<()> {
    for &v in values {
        stream.write_f64::<BigEndian>(v)?;
    }
    Ok(())
}

/// Format an [`Epoch`] the way the `DATE-OBS` and `DATE-MAP` cards expect:
/// `MM/DD/YY`.
pub fn fits_date_string(epoch: Epoch) -> String {
    let (year, month, day, _, _, _, _) = epoch.to_gregorian_utc();
    format!("{month:02}/{day:02}/{:02}", year.rem_euclid(100))
}

/// Observation metadata for the primary header and the table extensions.
///
/// Frequencies describe the IF axis: `start_if_freq_hz` is the reference IF
/// frequency and `delta_if_freq_hz` the increment between IFs. When the IFs
/// are not evenly spaced, supply `if_freqs_hz` (and set `start_if_freq_hz`
/// to the first IF's frequency so the FQ-table offsets come out right).
#[derive(Debug, Clone)]
pub struct ObsParams {
    /// Source name (`OBJECT`).
    pub source_name: String,
    /// Telescope name (`TELESCOP`).
    pub telescope: String,
    /// Instrument name (`INSTRUME`).
    pub instrument: String,
    /// `DATE-OBS` string, `MM/DD/YY`. See [`fits_date_string`].
    pub date_obs: String,
    /// Observation right ascension \[degrees\]
    pub obs_ra_deg: f64,
    /// Observation declination \[degrees\]
    pub obs_dec_deg: f64,
    pub equinox: f64,
    /// Reference IF sky frequency \[Hz\]
    pub start_if_freq_hz: f64,
    /// Frequency increment between IFs \[Hz\]
    pub delta_if_freq_hz: f64,
    /// Channel width within an IF \[Hz\]. Defaults to `delta_if_freq_hz`.
    pub delta_channel_freq_hz: Option<f64>,
    /// Per-IF sky frequencies \[Hz\]. When empty, IFs increment from
    /// `start_if_freq_hz` by `delta_if_freq_hz`.
    pub if_freqs_hz: Vec<f64>,
    /// Per-IF channel widths \[Hz\]. When empty, all are `delta_if_freq_hz`.
    pub if_widths_hz: Vec<f64>,
    /// Per-IF sideband indicators. When empty, all IFs are upper sideband (1).
    pub sidebands: Vec<i32>,
    /// Channels per IF (`NAXIS5`).
    pub num_chans_per_if: usize,
    /// The antenna number given to the first telescope in the AN table.
    pub first_telescope_num: usize,
    /// Explicit per-baseline codes. When `None`, codes are derived from the
    /// baseline index by triangular unranking over the telescope count.
    pub baselines: Option<Vec<f32>>,
}

impl Default for ObsParams {
    fn default() -> ObsParams {
        ObsParams {
            source_name: String::new(),
            telescope: String::new(),
            instrument: String::new(),
            date_obs: String::new(),
            obs_ra_deg: 0.0,
            obs_dec_deg: 0.0,
            equinox: 2000.0,
            start_if_freq_hz: 0.0,
            delta_if_freq_hz: 0.0,
            delta_channel_freq_hz: None,
            if_freqs_hz: vec![],
            if_widths_hz: vec![],
            sidebands: vec![],
            num_chans_per_if: 1,
            first_telescope_num: 1,
            baselines: None,
        }
    }
}

impl ObsParams {
    fn if_offset_hz(&self, i_if: usize) -> f64 {
        match self.if_freqs_hz.get(i_if) {
            Some(&f) => f - self.start_if_freq_hz,
            None => self.delta_if_freq_hz * i_if as f64,
        }
    }

    fn if_width_hz(&self, i_if: usize) -> f64 {
        self.if_widths_hz
            .get(i_if)
            .copied()
            .unwrap_or(self.delta_if_freq_hz)
    }

    fn sideband(&self, i_if: usize) -> i32 {
        self.sidebands.get(i_if).copied().unwrap_or(1)
    }
}

/// Counters accumulated while writing the visibility segment.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct VisStats {
    /// Visibility triples written.
    pub num_vis: usize,
    /// Triples flagged because the real or imaginary part was non-finite.
    pub bad_data: usize,
    /// Triples flagged because the weight was non-finite.
    pub bad_weight: usize,
    /// Triples written unflagged.
    pub good: usize,
}

/// A helper struct to write out a uvfits file.
///
/// The write sequence is strictly `primary header -> visibility data -> FQ
/// table -> AN table`, which [`UvfWriter::write_uvf_file`] drives in one
/// call. Any error aborts the sequence; a partial file is left on disk for
/// the caller to discard.
pub struct UvfWriter {
    /// The path to the uvfits file.
    path: PathBuf,

    /// The output stream. `None` once the file has been closed.
    file: Option<BufWriter<File>>,

    params: ObsParams,

    /// Cards written in the current header section.
    num_cards: usize,

    /// Bytes written in the current data section.
    num_data_bytes: usize,
}

impl UvfWriter {
    /// Create a new uvfits file at the specified path, truncating any
    /// existing file there.
    pub fn create<T: AsRef<Path>>(path: T, params: ObsParams) -> Result<UvfWriter, UvfWriteError> {
        let path = path.as_ref();
        trace!("creating uvfits file {}", path.display());
        let file = BufWriter::new(File::create(path)?);
        Ok(UvfWriter {
            path: path.to_path_buf(),
            file: Some(file),
            params,
            num_cards: 0,
            num_data_bytes: 0,
        })
    }

    /// Write the whole file from `src`: primary header, one group per
    /// (frame, baseline) pair in frame-major order, the FQ table, then the
    /// AN table.
    pub fn write_uvf_file<S: VisSource>(&mut self, src: &S) -> Result<VisStats, UvfWriteError> {
        let num_frames = src.num_frames();
        let num_baselines = src.num_baselines();
        if num_frames == 0 || num_baselines == 0 {
            return Err(UvfWriteError::NoGroups {
                frames: num_frames,
                baselines: num_baselines,
            });
        }

        self.write_file_header(src)?;
        let stats = self.write_visibility_data(src)?;
        self.write_frequency_table(src)?;
        self.write_antenna_table(src)?;
        self.stream()?.flush()?;
        Ok(stats)
    }

    /// Convenience entry point: create, write and close in one call.
    pub fn write_to_path<T: AsRef<Path>, S: VisSource>(
        path: T,
        params: ObsParams,
        src: &S,
    ) -> Result<VisStats, UvfWriteError> {
        let mut writer = UvfWriter::create(path, params)?;
        let stats = writer.write_uvf_file(src)?;
        writer.close()?;
        Ok(stats)
    }

    /// Flush and release the file handle. Safe to call more than once.
    pub fn close(&mut self) -> Result<(), UvfWriteError> {
        if let Some(mut file) = self.file.take() {
            trace!("closing uvfits file {}", self.path.display());
            file.flush()?;
        }
        Ok(())
    }

    fn stream(&mut self) -> Result<&mut BufWriter<File>, UvfWriteError> {
        self.file.as_mut().ok_or(UvfWriteError::Closed)
    }

    #[cfg(test)]
    fn position(&mut self) -> Result<u64, UvfWriteError> {
        use std::io::Seek;
        Ok(self.stream()?.stream_position()?)
    }

    // ------------------------------------------------------------------
    // Header cards
    // ------------------------------------------------------------------

    /// Write one header card and bump the section card counter.
    fn put_card(&mut self, name: &str, value: &str, comment: &str) -> Result<(), UvfWriteError> {
        let card = format_card(name, value, comment)?;
        self.stream()?.write_all(&card)?;
        self.num_cards += 1;
        Ok(())
    }

    fn init_header(&mut self) {
        self.num_cards = 0;
    }

    /// Terminate the header with `END` and pad with blank cards to the next
    /// logical-record boundary, so the following section starts on a block.
    fn finish_header(&mut self) -> Result<(), UvfWriteError> {
        self.put_card("END", "", "")?;
        while self.num_cards % CARDS_PER_BLOCK != 0 {
            self.put_card("", "", "")?;
        }
        Ok(())
    }

    /// All the cards of the primary header.
    fn write_file_header<S: VisSource>(&mut self, src: &S) -> Result<(), UvfWriteError> {
        self.init_header();
        trace!("writing primary header ({})", self.path.display());

        let num_stokes = src.num_stokes();
        let num_ifs = src.num_ifs();
        let num_groups = src.num_frames() * src.num_baselines();
        let params = self.params.clone();
        let delta_chan = params
            .delta_channel_freq_hz
            .unwrap_or(params.delta_if_freq_hz);

        self.put_card("SIMPLE", "T", "")?;
        self.put_card("BITPIX", "-32", "")?;
        self.put_card("NAXIS", "7", "")?;
        self.put_card("NAXIS1", "0", "No standard image, just groups")?;
        self.put_card("NAXIS2", "3", "Complex visibilities: real, imag, wt")?;
        self.put_card("NAXIS3", &num_stokes.to_string(), "Stokes")?;
        self.put_card("NAXIS4", &num_ifs.to_string(), "Number of IFs")?;
        self.put_card(
            "NAXIS5",
            &params.num_chans_per_if.to_string(),
            "Number of channels per IF",
        )?;
        self.put_card("NAXIS6", "1", "RA")?;
        self.put_card("NAXIS7", "1", "DEC")?;

        // EXTEND must appear immediately after the last NAXISn keyword.
        self.put_card("EXTEND", "T", "Antenna/Frequency tables")?;
        self.put_card("BLOCKED", "T", "Tape may be blocked.")?;
        self.put_card("OBJECT", &params.source_name, "Source name")?;
        self.put_card("TELESCOP", &params.telescope, "Telescope name")?;
        self.put_card("INSTRUME", &params.instrument, "Instrument name")?;
        self.put_card("DATE-OBS", &params.date_obs, "")?;
        self.put_card("DATE-MAP", &params.date_obs, "")?;
        self.put_card("BSCALE", "1.0", "")?;
        self.put_card("BZERO", "0.0", "")?;
        self.put_card("BUNIT", "UNCALIB", "")?;
        self.put_card("EQUINOX", &params.equinox.to_string(), "")?;
        self.put_card("TIMSYS", "UTC", "")?;
        self.put_card("DATUTC", "0.0", "")?;
        self.put_card("IATUTC", "0.0", "")?;
        self.put_card("EPOCH", &params.equinox.to_string(), "")?;
        self.put_card("OBSRA", &params.obs_ra_deg.to_string(), "")?;
        self.put_card("OBSDEC", &params.obs_dec_deg.to_string(), "")?;

        self.put_card("CTYPE2", "COMPLEX", "")?;
        self.put_card("CRVAL2", "1.0", "")?;
        self.put_card("CDELT2", "1.0", "")?;
        self.put_card("CRPIX2", "1.0", "")?;
        self.put_card("CROTA2", "0.0", "")?;

        // All Stokes parameters are written for every baseline, even when
        // the data only carry one.
        let (stokes_val, stokes_comment) = if num_stokes == 1 {
            ("1", "1=I")
        } else {
            ("-1", "-1=RR, -2=LL, -3=RL, -4=LR")
        };
        self.put_card("CTYPE3", "STOKES", stokes_comment)?;
        self.put_card("CRVAL3", stokes_val, "")?;
        self.put_card("CDELT3", stokes_val, "")?;
        self.put_card("CRPIX3", "1", "")?;
        self.put_card("CROTA3", "0.0", "")?;

        self.put_card("CTYPE4", "IF", "")?;
        self.put_card("CRVAL4", &format!("{:e}", params.start_if_freq_hz), "")?;
        self.put_card("CDELT4", &format!("{:e}", params.delta_if_freq_hz), "")?;
        self.put_card("CRPIX4", "1.0", "")?;
        self.put_card("CROTA4", "0.0", "")?;

        self.put_card("CTYPE5", "FREQ", "")?;
        self.put_card("CRVAL5", &format!("{:e}", params.start_if_freq_hz), "")?;
        self.put_card("CDELT5", &format!("{:e}", delta_chan), "")?;
        self.put_card("CRPIX5", "1.0", "")?;
        self.put_card("CROTA5", "0.0", "")?;

        self.put_card("CTYPE6", "RA", "")?;
        self.put_card("CRVAL6", &params.obs_ra_deg.to_string(), "")?;
        self.put_card("CDELT6", "0.0", "")?;
        self.put_card("CRPIX6", "1.0", "")?;
        self.put_card("CROTA6", "0.0", "")?;

        self.put_card("CTYPE7", "DEC", "")?;
        self.put_card("CRVAL7", &params.obs_dec_deg.to_string(), "")?;
        self.put_card("CDELT7", "0.0", "")?;
        self.put_card("CRPIX7", "1.0", "")?;
        self.put_card("CROTA7", "0.0", "")?;

        // Random-groups bookkeeping. GCOUNT is the number of groups, not
        // the number of visibilities.
        self.put_card("GROUPS", "T", "")?;
        self.put_card("GCOUNT", &num_groups.to_string(), "Total no. of groups")?;
        self.put_card("PCOUNT", "6", "Random parameters for each group")?;

        self.put_card("PTYPE1", "UU---SIN", "Baseline u projection")?;
        self.put_card("PSCAL1", "1.0", "")?;
        self.put_card("PZERO1", "0.0", "")?;

        self.put_card("PTYPE2", "VV---SIN", "Baseline v projection")?;
        self.put_card("PSCAL2", "1.0", "")?;
        self.put_card("PZERO2", "0.0", "")?;

        self.put_card("PTYPE3", "WW---SIN", "Baseline w projection")?;
        self.put_card("PSCAL3", "1.0", "")?;
        self.put_card("PZERO3", "0.0", "")?;

        self.put_card("PTYPE4", "BASELINE", "A VLA-style baseline index")?;
        self.put_card("PSCAL4", "1.0", "")?;
        self.put_card("PZERO4", "0.0", "")?;

        self.put_card("PTYPE5", "DATE", "Julian Date 1")?;
        self.put_card("PSCAL5", "1.0", "days")?;
        self.put_card("PZERO5", "0.0", "")?;

        self.put_card("PTYPE6", "DATE", "Julian Date 2")?;
        self.put_card("PSCAL6", &format!("{:e}", 1.0 / DAYSEC), "seconds")?;
        self.put_card("PZERO6", "0.0", "")?;

        self.finish_header()
    }

    // ------------------------------------------------------------------
    // Visibility data
    // ------------------------------------------------------------------

    fn init_visibility_data(&mut self) {
        self.num_data_bytes = 0;
    }

    fn write_visibility_data<S: VisSource>(&mut self, src: &S) -> Result<VisStats, UvfWriteError> {
        self.init_visibility_data();
        let stats = self.write_visibility_data_body(src)?;
        self.finish_visibility_data()?;
        Ok(stats)
    }

    /// Encode one group per (frame, baseline) pair: the six random
    /// parameters, then a (re, im, weight) triple for every IF and Stokes
    /// parameter.
    fn write_visibility_data_body<S: VisSource>(
        &mut self,
        src: &S,
    ) -> Result<VisStats, UvfWriteError> {
        let num_frames = src.num_frames();
        let num_baselines = src.num_baselines();
        let num_ifs = src.num_ifs();
        let num_stokes = src.num_stokes();
        let num_telescopes = src.num_telescopes();
        let baselines = self.params.baselines.clone();
        if let Some(codes) = &baselines {
            if codes.len() != num_baselines {
                return Err(UvfWriteError::BadBaselineList {
                    expected: num_baselines,
                    got: codes.len(),
                });
            }
        }

        let mut stats = VisStats::default();
        let stream = self.file.as_mut().ok_or(UvfWriteError::Closed)?;

        for (i_frame, i_baseline) in iproduct!(0..num_frames, 0..num_baselines) {
            let base = match baselines.as_deref() {
                Some(codes) => codes[i_baseline],
                None => {
                    let (t1, t2) = cross_baseline_to_telescopes(num_telescopes, i_baseline);
                    encode_uvfits_baseline(t1 + 1, t2 + 1) as f32
                }
            };

            // UVW is light travel time in seconds across the projected
            // baseline. The Julian date is split into an integer day and a
            // fractional day scaled to seconds.
            let (u, v, w) = src.uvw(i_frame, i_baseline);
            let jd = src.julian_date(i_frame);
            let day = jd.floor();
            let frac_seconds = ((jd - day) * DAYSEC) as f32;

            let group = [u, v, w, base, day as f32, frac_seconds];
            write_be_f32(stream, &group)?;
            self.num_data_bytes += group.len() * 4;

            for (i_if, i_stokes) in iproduct!(0..num_ifs, 0..num_stokes) {
                let (vis, weight) = src.visibility(i_frame, i_baseline, i_if, i_stokes);
                let (mut re, mut im) = (vis.re, vis.im);

                // Non-finite samples happen when a bad channel went through
                // amplitude calibration; such visibilities are flagged and
                // still written, never rejected.
                let mut flagged = false;
                if !re.is_finite() || !im.is_finite() {
                    re = 0.0;
                    im = 0.0;
                    stats.bad_data += 1;
                    flagged = true;
                }
                if !weight.is_finite() {
                    stats.bad_weight += 1;
                    flagged = true;
                }
                if !flagged {
                    stats.good += 1;
                }

                // The sign of the weight carries the flag; its magnitude is
                // left alone.
                let weight_out = weight.abs() * if flagged { -1.0 } else { 1.0 };

                write_be_f32(stream, &[re, im, weight_out])?;
                stats.num_vis += 1;
                self.num_data_bytes += 3 * 4;
            }
        }

        info!(
            "wrote {} visibilities: {} flagged for non-finite data, {} flagged for non-finite weights, {} unflagged",
            stats.num_vis, stats.bad_data, stats.bad_weight, stats.good
        );
        Ok(stats)
    }

    /// Zero-pad the data segment to the next logical-record boundary.
    fn finish_visibility_data(&mut self) -> Result<(), UvfWriteError> {
        let residual = self.num_data_bytes % BYTES_PER_BLOCK;
        if residual > 0 {
            let pad = vec![0_u8; BYTES_PER_BLOCK - residual];
            self.stream()?.write_all(&pad)?;
            self.num_data_bytes += pad.len();
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // AIPS FQ table
    // ------------------------------------------------------------------

    fn write_frequency_table<S: VisSource>(&mut self, src: &S) -> Result<(), UvfWriteError> {
        self.write_frequency_table_header(src)?;
        self.write_frequency_table_data(src)
    }

    fn write_frequency_table_header<S: VisSource>(&mut self, src: &S) -> Result<(), UvfWriteError> {
        self.init_header();
        trace!("writing FQ table header ({})", self.path.display());

        let num_ifs = src.num_ifs();

        self.put_card("XTENSION", "A3DTABLE", "EXTENSION TYPE")?;
        self.put_card("BITPIX", "8", "PRINTABLE ASCII CODES")?;
        self.put_card("NAXIS", "2", "TABLE IS A MATRIX")?;

        // Per IF: 4 bytes of id, 8 each for the frequency offset, channel
        // width and total bandwidth, then 4 bytes of sideband flag.
        self.put_card(
            "NAXIS1",
            &(num_ifs * BYTES_PER_FQ_ENTRY).to_string(),
            "Width of table row in bytes",
        )?;
        self.put_card("NAXIS2", "1", "NUMBER OF ROWS")?;
        self.put_card("PCOUNT", "0", "NO RANDOM PARAMETERS")?;
        self.put_card("GCOUNT", "1", "GROUP COUNT")?;
        self.put_card("TFIELDS", "5", "NUMBER OF FIELDS PER ROW")?;
        self.put_card("EXTNAME", "AIPS FQ", "AIPS FQ TABLE")?;
        self.put_card("EXTVER", "1", "VERSION NUMBER OF TABLE")?;

        let int_form = format!("{num_ifs}J");
        let dbl_form = format!("{num_ifs}D");

        self.put_card("TFORM1", &int_form, "FORTRAN FORMAT")?;
        self.put_card("TTYPE1", "FRQSEL", "IF NUMBER")?;

        self.put_card("TFORM2", &dbl_form, "FORTRAN FORMAT")?;
        self.put_card("TTYPE2", "IF FREQ", "IF Frequency")?;
        self.put_card("TUNIT2", "HZ", "PHYSICAL UNITS")?;

        self.put_card("TFORM3", &dbl_form, "FORTRAN FORMAT")?;
        self.put_card("TTYPE3", "CH WIDTH", "BANDWIDTH")?;
        self.put_card("TUNIT3", "HZ", "PHYSICAL UNITS")?;

        self.put_card("TFORM4", &dbl_form, "FORTRAN FORMAT")?;
        self.put_card("TTYPE4", "TOTAL BANDWIDTH", "BANDWIDTH")?;
        self.put_card("TUNIT4", "HZ", "PHYSICAL UNITS")?;

        self.put_card("TFORM5", &int_form, "FORTRAN FORMAT")?;
        self.put_card("TTYPE5", "SIDEBAND", "Sideband indicator")?;
        self.put_card("TUNIT5", "", "PHYSICAL UNITS")?;

        self.put_card("NO_IF", &num_ifs.to_string(), "")?;

        self.finish_header()
    }

    /// The single FQ row, column-major: all ids, then all frequency offsets,
    /// channel widths, total bandwidths and sideband flags.
    fn write_frequency_table_data<S: VisSource>(&mut self, src: &S) -> Result<(), UvfWriteError> {
        let num_ifs = src.num_ifs();
        let ids: Vec<i32> = (0..num_ifs as i32).collect();
        let offsets: Vec<f64> = (0..num_ifs).map(|i| self.params.if_offset_hz(i)).collect();
        let widths: Vec<f64> = (0..num_ifs).map(|i| self.params.if_width_hz(i)).collect();
        let sidebands: Vec<i32> = (0..num_ifs).map(|i| self.params.sideband(i)).collect();

        let stream = self.file.as_mut().ok_or(UvfWriteError::Closed)?;
        write_be_i32(stream, &ids)?;
        write_be_f64(stream, &offsets)?;
        write_be_f64(stream, &widths)?;
        // No separate total bandwidth is tracked; it equals the channel
        // width.
        write_be_f64(stream, &widths)?;
        write_be_i32(stream, &sidebands)?;

        let payload = num_ifs * BYTES_PER_FQ_ENTRY;
        let residual = payload % BYTES_PER_BLOCK;
        if residual > 0 {
            let pad = vec![0_u8; BYTES_PER_BLOCK - residual];
            stream.write_all(&pad)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // AIPS AN table
    // ------------------------------------------------------------------

    fn write_antenna_table<S: VisSource>(&mut self, src: &S) -> Result<(), UvfWriteError> {
        self.write_antenna_table_header(src)?;
        self.write_antenna_table_data(src)
    }

    /// The AN extension is a fixed-column ASCII matrix; the TBCOL/TFORM
    /// cards are format metadata consumed by downstream readers and must
    /// match the row layout of [`format_antenna_row`].
    fn write_antenna_table_header<S: VisSource>(&mut self, src: &S) -> Result<(), UvfWriteError> {
        self.init_header();
        trace!("writing AN table header ({})", self.path.display());

        self.put_card("XTENSION", "TABLE", "EXTENSION TYPE")?;
        self.put_card("BITPIX", "8", "PRINTABLE ASCII CODES")?;
        self.put_card("NAXIS", "2", "TABLE IS A MATRIX")?;
        self.put_card("NAXIS1", "80", "WIDTH OF TABLE IN CHARACTERS")?;
        self.put_card(
            "NAXIS2",
            &src.num_telescopes().to_string(),
            "NUMBER OF ENTRIES IN TABLE",
        )?;
        self.put_card("PCOUNT", "0", "NO RANDOM PARAMETERS")?;
        self.put_card("GCOUNT", "1", "GROUP COUNT")?;
        self.put_card("TFIELDS", "5", "NUMBER OF FIELDS PER ROW")?;
        self.put_card("EXTNAME", "AIPS AN", "AIPS ANTENNA TABLE")?;
        self.put_card("EXTVER", "1", "VERSION NUMBER OF TABLE")?;

        self.put_card("TBCOL1", "1", "STARTING COLUMN")?;
        self.put_card("TFORM1", "I3", "FORTRAN FORMAT")?;
        self.put_card("TTYPE1", "ANT NO.", "ANTENNA NUMBER")?;

        self.put_card("TBCOL2", "7", "STARTING COLUMN")?;
        self.put_card("TFORM2", "A8", "FORTRAN FORMAT")?;
        self.put_card("TTYPE2", "STATION", "ANTENNA NAME")?;

        self.put_card("TBCOL3", "15", "STARTING COLUMN")?;
        self.put_card("TFORM3", "D20.10", "FORTRAN FORMAT")?;
        self.put_card("TTYPE3", "LX", "ANTENNA X COORDINATE")?;
        self.put_card("TUNIT3", "METERS", "PHYSICAL UNITS")?;
        self.put_card("TSCAL3", "1.0", "")?;
        self.put_card("TZERO3", "0.0", "")?;

        self.put_card("TBCOL4", "35", "STARTING COLUMN")?;
        self.put_card("TFORM4", "D20.10", "FORTRAN FORMAT")?;
        self.put_card("TTYPE4", "LY", "ANTENNA Y COORDINATE")?;
        self.put_card("TUNIT4", "METERS", "PHYSICAL UNITS")?;
        self.put_card("TSCAL4", "1.0", "")?;
        self.put_card("TZERO4", "0.0", "")?;

        self.put_card("TBCOL5", "55", "STARTING COLUMN")?;
        self.put_card("TFORM5", "D20.10", "FORTRAN FORMAT")?;
        self.put_card("TTYPE5", "LZ", "ANTENNA Z COORDINATE")?;
        self.put_card("TUNIT5", "METERS", "PHYSICAL UNITS")?;
        self.put_card("TSCAL5", "1.0", "")?;
        self.put_card("TZERO5", "0.0", "")?;

        self.finish_header()
    }

    fn write_antenna_table_data<S: VisSource>(&mut self, src: &S) -> Result<(), UvfWriteError> {
        let num_telescopes = src.num_telescopes();
        let first = self.params.first_telescope_num;

        let mut num_rows = 0;
        for i_tel in 0..num_telescopes {
            let name = src.antenna_name(i_tel);
            let (x, y, z) = src.antenna_position(i_tel);
            let row = format_antenna_row(i_tel + first, &name, x, y, z, i_tel)?;
            self.stream()?.write_all(&row)?;
            num_rows += 1;
        }

        // The ASCII table pads with blanks, not zeros.
        let written = num_rows * BYTES_PER_CARD;
        let residual = written % BYTES_PER_BLOCK;
        if residual > 0 {
            let pad = vec![b' '; BYTES_PER_BLOCK - residual];
            self.stream()?.write_all(&pad)?;
        }
        Ok(())
    }
}

/// One AN-table row: antenna number, 8-character station name, geocentric
/// X/Y/Z in metres. The layout must agree with the TBCOL/TFORM header cards.
fn format_antenna_row(
    number: usize,
    name: &str,
    x: f64,
    y: f64,
    z: f64,
    row: usize,
) -> Result<[u8; BYTES_PER_CARD], UvfWriteError> {
    if !name.is_ascii() {
        return Err(UvfWriteError::BadCardText {
            keyword: "STATION".to_string(),
        });
    }
    let name = &name[..name.len().min(8)];
    let text = format!(
        "{number:>3}  {name:>8} {}{}{}      ",
        format_exponent(x),
        format_exponent(y),
        format_exponent(z)
    );
    if text.len() != BYTES_PER_CARD {
        return Err(UvfWriteError::TableRowOverflow {
            row,
            len: text.len(),
        });
    }
    let mut bytes = [b' '; BYTES_PER_CARD];
    bytes.copy_from_slice(text.as_bytes());
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use ndarray::{Array3, Array4};
    use tempfile::NamedTempFile;

    use super::*;
    use crate::{
        c32,
        io::{Antenna, MemVisSource},
        math::decode_uvfits_baseline,
    };

    fn test_params() -> ObsParams {
        ObsParams {
            source_name: "J0528+2200".to_string(),
            telescope: "SZA".to_string(),
            instrument: "SZA".to_string(),
            date_obs: "05/02/05".to_string(),
            obs_ra_deg: 82.0,
            obs_dec_deg: 22.0,
            start_if_freq_hz: 30.938e9,
            delta_if_freq_hz: 0.5e9,
            ..Default::default()
        }
    }

    fn test_antennas() -> Vec<Antenna> {
        vec![
            Antenna {
                name: "SZA1".to_string(),
                x: -2409150.4,
                y: -4478573.1,
                z: 3838617.3,
            },
            Antenna {
                name: "SZA2".to_string(),
                x: -2409175.9,
                y: -4478565.3,
                z: 3838603.0,
            },
        ]
    }

    /// One frame, one baseline, one IF, one Stokes parameter, two antennas.
    fn single_vis_source(re: f32, im: f32, weight: f32) -> MemVisSource {
        let vis = Array4::from_elem((1, 1, 1, 1), c32::new(re, im));
        let weights = Array4::from_elem((1, 1, 1, 1), weight);
        let mut uvws = Array3::zeros((1, 1, 3));
        uvws[[0, 0, 0]] = 1.5e-7;
        uvws[[0, 0, 1]] = -2.5e-7;
        uvws[[0, 0, 2]] = 3.5e-8;
        MemVisSource::new(vis, weights, uvws, vec![2453492.75], test_antennas()).unwrap()
    }

    fn read_f32_be(bytes: &[u8], index: usize) -> f32 {
        let start = index * 4;
        f32::from_be_bytes([
            bytes[start],
            bytes[start + 1],
            bytes[start + 2],
            bytes[start + 3],
        ])
    }

    fn read_f64_be(bytes: &[u8], offset: usize) -> f64 {
        let mut buf = [0_u8; 8];
        buf.copy_from_slice(&bytes[offset..offset + 8]);
        f64::from_be_bytes(buf)
    }

    fn read_i32_be(bytes: &[u8], offset: usize) -> i32 {
        let mut buf = [0_u8; 4];
        buf.copy_from_slice(&bytes[offset..offset + 4]);
        i32::from_be_bytes(buf)
    }

    #[test]
    fn exponent_format_matches_fortran_style() {
        assert_eq!(format_exponent(1.0), "   1.0000000000E+00");
        assert_eq!(format_exponent(0.0), "   0.0000000000E+00");
        assert_eq!(format_exponent(-2.5e-3), "  -2.5000000000E-03");
        assert_eq!(format_exponent(1.2345678901e10).trim_start(), "1.2345678901E+10");
        assert_eq!(format_exponent(1.0).len(), 20);
        assert_eq!(format_exponent(-1.0e-100).len(), 20);
    }

    #[test]
    fn int_card_layout() {
        let card = format_card("BITPIX", "-32", "").unwrap();
        assert_eq!(card.len(), BYTES_PER_CARD);
        let text = std::str::from_utf8(&card).unwrap();
        assert_eq!(&text[..10], "BITPIX  = ");
        assert_eq!(&text[10..30], "                 -32");
        assert_eq!(&text[30..33], " / ");
        assert!(text[33..].bytes().all(|b| b == b' '));
    }

    #[test]
    fn string_card_layout() {
        let card = format_card("OBJECT", "M87", "Source name").unwrap();
        let text = std::str::from_utf8(&card).unwrap();
        assert_eq!(&text[..8], "OBJECT  ");
        assert_eq!(&text[8..31], "= 'M87     '           ");
        assert_eq!(&text[31..33], "/ ");
        assert_eq!(&text[33..44], "Source name");
    }

    #[test]
    fn logical_card_layout() {
        let card = format_card("SIMPLE", "T", "").unwrap();
        let text = std::str::from_utf8(&card).unwrap();
        assert_eq!(&text[..10], "SIMPLE  = ");
        assert_eq!(text.as_bytes()[29], b'T');
        assert_eq!(&text[30..33], " / ");
    }

    #[test]
    fn end_and_blank_cards() {
        let end = format_card("END", "", "").unwrap();
        assert_eq!(&end[..3], b"END");
        assert!(end[3..].iter().all(|&b| b == b' '));

        let blank = format_card("", "", "").unwrap();
        assert!(blank.iter().all(|&b| b == b' '));
    }

    #[test]
    fn unrecognized_keyword_is_fatal() {
        assert!(matches!(
            format_card("FOOBAR", "1", ""),
            Err(UvfWriteError::UnrecognizedKeyword(_))
        ));
        // BITPIX does not take an index.
        assert!(matches!(
            lookup_keyword("BITPIX2"),
            Err(UvfWriteError::UnrecognizedKeyword(_))
        ));
    }

    #[test]
    fn indexed_keyword_lookup() {
        assert_eq!(lookup_keyword("CRVAL4").unwrap().kind, CardKind::Float);
        assert_eq!(lookup_keyword("NAXIS2").unwrap().kind, CardKind::Int);
        assert_eq!(lookup_keyword("TFORM1").unwrap().kind, CardKind::Str);
        assert_eq!(lookup_keyword("NAXIS").unwrap().kind, CardKind::Int);
        assert_eq!(lookup_keyword("END").unwrap().kind, CardKind::Null);
        assert_eq!(lookup_keyword(" ").unwrap().kind, CardKind::Null);
    }

    #[test]
    fn card_overflow_is_fatal() {
        let long_comment = "x".repeat(60);
        assert!(matches!(
            format_card("BITPIX", "-32", &long_comment),
            Err(UvfWriteError::CardOverflow { what: "comment", .. })
        ));

        let long_value = "x".repeat(70);
        assert!(matches!(
            format_card("OBJECT", &long_value, "too much"),
            Err(UvfWriteError::CardOverflow { what: "value", .. })
        ));
    }

    #[test]
    fn malformed_value_is_fatal() {
        assert!(matches!(
            format_card("BITPIX", "abc", ""),
            Err(UvfWriteError::BadCardValue { .. })
        ));
        assert!(matches!(
            format_card("SIMPLE", "yes", ""),
            Err(UvfWriteError::BadCardValue { .. })
        ));
        assert!(matches!(
            format_card("BSCALE", "NaN", ""),
            Err(UvfWriteError::BadCardValue { .. })
        ));
    }

    #[test]
    fn cards_round_trip() {
        let card = format_card("CRVAL4", "30938000000.0", "").unwrap();
        let (keyword, value) = parse_card(&card).unwrap();
        assert_eq!(keyword, "CRVAL4");
        match value {
            CardValue::Float(f) => assert_abs_diff_eq!(f, 30.938e9, epsilon = 1.0),
            other => panic!("expected float, got {other:?}"),
        }

        let card = format_card("GCOUNT", "528", "Total no. of groups").unwrap();
        assert_eq!(parse_card(&card).unwrap().1, CardValue::Int(528));

        let card = format_card("GROUPS", "T", "").unwrap();
        assert_eq!(parse_card(&card).unwrap().1, CardValue::Logical(true));

        let card = format_card("EXTEND", "F", "").unwrap();
        assert_eq!(parse_card(&card).unwrap().1, CardValue::Logical(false));

        let card = format_card("TELESCOP", "SZA", "Telescope name").unwrap();
        assert_eq!(
            parse_card(&card).unwrap().1,
            CardValue::Str("SZA".to_string())
        );

        let card = format_card("END", "", "").unwrap();
        assert_eq!(parse_card(&card).unwrap().1, CardValue::Null);
    }

    #[test]
    fn axis_classification() {
        assert_eq!(classify_axis("RA"), AxisType::Degrees);
        assert_eq!(classify_axis("DEC"), AxisType::Degrees);
        assert_eq!(classify_axis("V"), AxisType::UV);
        assert_eq!(classify_axis("FOO"), AxisType::Unknown);
    }

    #[test]
    fn brightness_unit_classification() {
        assert_eq!(classify_brightness_unit("MJY/SR"), BrightnessUnit::MJyPerSr);
        assert_eq!(
            classify_brightness_unit("JY/BEAM"),
            BrightnessUnit::JyPerBeam
        );
        assert_eq!(classify_brightness_unit("MUK"), BrightnessUnit::MicroK);
        assert_eq!(classify_brightness_unit("W/M^2"), BrightnessUnit::Unknown);
    }

    #[test]
    fn date_string_format() {
        let epoch = Epoch::from_gregorian_utc(2005, 5, 2, 12, 0, 0, 0);
        assert_eq!(fits_date_string(epoch), "05/02/05");
    }

    /// Every header section is END-terminated and blank-padded to a block.
    fn assert_header_section(bytes: &[u8]) {
        assert_eq!(bytes.len() % BYTES_PER_BLOCK, 0);
        let cards: Vec<&[u8]> = bytes.chunks_exact(BYTES_PER_CARD).collect();
        let end_index = cards
            .iter()
            .position(|card| card.starts_with(b"END     "))
            .expect("header section has no END card");
        for card in &cards[end_index + 1..] {
            assert!(
                card.iter().all(|&b| b == b' '),
                "non-blank card after END"
            );
        }
    }

    #[test]
    fn minimal_file_layout() {
        let tmp = NamedTempFile::new().unwrap();
        let src = single_vis_source(1.0, 0.0, 4.0);
        let mut writer = UvfWriter::create(tmp.path(), test_params()).unwrap();

        writer.write_file_header(&src).unwrap();
        let header_end = writer.position().unwrap() as usize;
        assert_eq!(header_end % BYTES_PER_BLOCK, 0);

        let stats = writer.write_visibility_data(&src).unwrap();
        let data_end = writer.position().unwrap() as usize;
        // One group (36 bytes) pads to exactly one block.
        assert_eq!(data_end - header_end, BYTES_PER_BLOCK);
        assert_eq!(stats.num_vis, 1);
        assert_eq!(stats.good, 1);

        writer.write_frequency_table(&src).unwrap();
        let fq_end = writer.position().unwrap() as usize;
        assert_eq!((fq_end - data_end) % BYTES_PER_BLOCK, 0);

        writer.write_antenna_table(&src).unwrap();
        let an_end = writer.position().unwrap() as usize;
        assert_eq!((an_end - fq_end) % BYTES_PER_BLOCK, 0);

        writer.close().unwrap();

        let bytes = std::fs::read(tmp.path()).unwrap();
        assert_eq!(bytes.len(), an_end);
        assert_header_section(&bytes[..header_end]);

        // The six random parameters.
        let data = &bytes[header_end..data_end];
        assert_eq!(read_f32_be(data, 0), 1.5e-7);
        assert_eq!(read_f32_be(data, 1), -2.5e-7);
        assert_eq!(read_f32_be(data, 2), 3.5e-8);
        assert_eq!(read_f32_be(data, 3), 258.0);
        assert_eq!(read_f32_be(data, 4), 2453492.0);
        assert_eq!(read_f32_be(data, 5), 64800.0);

        // The baseline code decodes back to the pair it came from.
        assert_eq!(decode_uvfits_baseline(read_f32_be(data, 3) as usize), (1, 2));

        // One visibility triple, then zero padding to the block boundary.
        assert_eq!(read_f32_be(data, 6), 1.0);
        assert_eq!(read_f32_be(data, 7), 0.0);
        assert_eq!(read_f32_be(data, 8), 4.0);
        assert!(data[36..].iter().all(|&b| b == 0));
    }

    #[test]
    fn non_finite_data_is_flagged_and_zeroed() {
        let tmp = NamedTempFile::new().unwrap();
        let src = single_vis_source(f32::NAN, 0.5, 4.0);
        let mut writer = UvfWriter::create(tmp.path(), test_params()).unwrap();

        let stats = writer.write_visibility_data(&src).unwrap();
        assert_eq!(stats.num_vis, 1);
        assert_eq!(stats.bad_data, 1);
        assert_eq!(stats.bad_weight, 0);
        assert_eq!(stats.good, 0);

        writer.close().unwrap();
        let bytes = std::fs::read(tmp.path()).unwrap();
        assert_eq!(read_f32_be(&bytes, 6), 0.0);
        assert_eq!(read_f32_be(&bytes, 7), 0.0);
        assert_eq!(read_f32_be(&bytes, 8), -4.0);
    }

    #[test]
    fn non_finite_weight_is_flagged_independently() {
        let tmp = NamedTempFile::new().unwrap();
        let src = single_vis_source(1.0, -1.0, f32::INFINITY);
        let mut writer = UvfWriter::create(tmp.path(), test_params()).unwrap();

        let stats = writer.write_visibility_data(&src).unwrap();
        assert_eq!(stats.bad_data, 0);
        assert_eq!(stats.bad_weight, 1);
        assert_eq!(stats.good, 0);

        writer.close().unwrap();
        let bytes = std::fs::read(tmp.path()).unwrap();
        // The data are untouched when only the weight is bad.
        assert_eq!(read_f32_be(&bytes, 6), 1.0);
        assert_eq!(read_f32_be(&bytes, 7), -1.0);
        assert!(read_f32_be(&bytes, 8).is_infinite());
    }

    #[test]
    fn negative_weight_input_is_not_a_flag() {
        let tmp = NamedTempFile::new().unwrap();
        let src = single_vis_source(1.0, 0.0, -4.0);
        let mut writer = UvfWriter::create(tmp.path(), test_params()).unwrap();

        let stats = writer.write_visibility_data(&src).unwrap();
        assert_eq!(stats.good, 1);

        writer.close().unwrap();
        let bytes = std::fs::read(tmp.path()).unwrap();
        // Only the writer's flagging controls the sign on disk.
        assert_eq!(read_f32_be(&bytes, 8), 4.0);
    }

    #[test]
    fn baseline_override_is_used_verbatim() {
        let tmp = NamedTempFile::new().unwrap();
        let src = single_vis_source(1.0, 0.0, 4.0);
        let mut params = test_params();
        params.baselines = Some(vec![999.0]);
        let mut writer = UvfWriter::create(tmp.path(), params).unwrap();

        writer.write_visibility_data(&src).unwrap();
        writer.close().unwrap();
        let bytes = std::fs::read(tmp.path()).unwrap();
        assert_eq!(read_f32_be(&bytes, 3), 999.0);
    }

    #[test]
    fn baseline_override_must_cover_every_baseline() {
        let tmp = NamedTempFile::new().unwrap();
        let src = single_vis_source(1.0, 0.0, 4.0);
        let mut params = test_params();
        params.baselines = Some(vec![999.0, 1000.0]);
        let mut writer = UvfWriter::create(tmp.path(), params).unwrap();

        assert!(matches!(
            writer.write_visibility_data(&src),
            Err(UvfWriteError::BadBaselineList {
                expected: 1,
                got: 2
            })
        ));
    }

    #[test]
    fn frequency_table_payload() {
        let tmp = NamedTempFile::new().unwrap();
        let vis = Array4::from_elem((1, 1, 3, 1), c32::new(1.0, 0.0));
        let weights = Array4::from_elem((1, 1, 3, 1), 1.0);
        let uvws = Array3::zeros((1, 1, 3));
        let src =
            MemVisSource::new(vis, weights, uvws, vec![2453492.75], test_antennas()).unwrap();

        let mut writer = UvfWriter::create(tmp.path(), test_params()).unwrap();
        writer.write_frequency_table(&src).unwrap();
        let end = writer.position().unwrap() as usize;
        writer.close().unwrap();

        let bytes = std::fs::read(tmp.path()).unwrap();
        assert_eq!(bytes.len(), end);
        assert_header_section(&bytes[..BYTES_PER_BLOCK]);

        // 3 IFs make a 96-byte row, zero-padded to one block.
        let row = &bytes[BYTES_PER_BLOCK..];
        assert_eq!(row.len(), BYTES_PER_BLOCK);
        assert_eq!(read_i32_be(row, 0), 0);
        assert_eq!(read_i32_be(row, 4), 1);
        assert_eq!(read_i32_be(row, 8), 2);
        assert_abs_diff_eq!(read_f64_be(row, 12), 0.0);
        assert_abs_diff_eq!(read_f64_be(row, 20), 0.5e9);
        assert_abs_diff_eq!(read_f64_be(row, 28), 1.0e9);
        for i in 0..3 {
            assert_abs_diff_eq!(read_f64_be(row, 36 + i * 8), 0.5e9);
            assert_abs_diff_eq!(read_f64_be(row, 60 + i * 8), 0.5e9);
            assert_eq!(read_i32_be(row, 84 + i * 4), 1);
        }
        assert!(row[96..].iter().all(|&b| b == 0));
    }

    #[test]
    fn antenna_table_rows() {
        let tmp = NamedTempFile::new().unwrap();
        let src = single_vis_source(1.0, 0.0, 4.0);
        let mut writer = UvfWriter::create(tmp.path(), test_params()).unwrap();

        writer.write_antenna_table(&src).unwrap();
        let end = writer.position().unwrap() as usize;
        writer.close().unwrap();

        let bytes = std::fs::read(tmp.path()).unwrap();
        assert_eq!(bytes.len(), end);
        assert_eq!(end % BYTES_PER_BLOCK, 0);
        assert_header_section(&bytes[..BYTES_PER_BLOCK]);

        let data = &bytes[BYTES_PER_BLOCK..];
        let row0 = std::str::from_utf8(&data[..80]).unwrap();
        let expected = format!(
            "  1      SZA1 {}{}{}      ",
            format_exponent(-2409150.4),
            format_exponent(-4478573.1),
            format_exponent(3838617.3)
        );
        assert_eq!(row0, expected);

        let row1 = std::str::from_utf8(&data[80..160]).unwrap();
        assert!(row1.starts_with("  2      SZA2 "));

        // Two 80-byte rows, blank-padded to the block boundary.
        assert!(data[160..].iter().all(|&b| b == b' '));
    }

    #[test]
    fn antenna_row_respects_first_telescope_number() {
        let row = format_antenna_row(30, "CARMA30", 1.0, -2.0, 3.0, 0).unwrap();
        let text = std::str::from_utf8(&row).unwrap();
        assert!(text.starts_with(" 30   CARMA30 "));
    }

    #[test]
    fn antenna_row_number_overflow() {
        assert!(matches!(
            format_antenna_row(1000, "X", 0.0, 0.0, 0.0, 0),
            Err(UvfWriteError::TableRowOverflow { .. })
        ));
    }

    #[test]
    fn whole_file_is_deterministic() {
        let src = single_vis_source(1.0, 0.5, 4.0);
        let tmp_a = NamedTempFile::new().unwrap();
        let tmp_b = NamedTempFile::new().unwrap();

        UvfWriter::write_to_path(tmp_a.path(), test_params(), &src).unwrap();
        UvfWriter::write_to_path(tmp_b.path(), test_params(), &src).unwrap();

        let bytes_a = std::fs::read(tmp_a.path()).unwrap();
        let bytes_b = std::fs::read(tmp_b.path()).unwrap();
        assert!(!bytes_a.is_empty());
        assert_eq!(bytes_a, bytes_b);
    }

    #[test]
    fn close_is_idempotent_and_fences_writes() {
        let tmp = NamedTempFile::new().unwrap();
        let src = single_vis_source(1.0, 0.0, 4.0);
        let mut writer = UvfWriter::create(tmp.path(), test_params()).unwrap();

        writer.write_uvf_file(&src).unwrap();
        writer.close().unwrap();
        writer.close().unwrap();
        assert!(matches!(
            writer.write_uvf_file(&src),
            Err(UvfWriteError::Closed)
        ));
    }

    #[test]
    fn empty_source_is_rejected() {
        let tmp = NamedTempFile::new().unwrap();
        let vis = Array4::from_elem((0, 0, 1, 1), c32::new(0.0, 0.0));
        let weights = Array4::from_elem((0, 0, 1, 1), 0.0);
        let uvws = Array3::zeros((0, 0, 3));
        let src = MemVisSource::new(vis, weights, uvws, vec![], test_antennas()).unwrap();

        let mut writer = UvfWriter::create(tmp.path(), test_params()).unwrap();
        assert!(matches!(
            writer.write_uvf_file(&src),
            Err(UvfWriteError::NoGroups { .. })
        ));
    }

    #[test]
    fn multi_if_stokes_group_ordering() {
        // 2 IFs x 2 Stokes: triples must be IF-major, Stokes-minor.
        let tmp = NamedTempFile::new().unwrap();
        let mut vis = Array4::from_elem((1, 1, 2, 2), c32::new(0.0, 0.0));
        let weights = Array4::from_elem((1, 1, 2, 2), 1.0);
        for i_if in 0..2 {
            for i_stokes in 0..2 {
                vis[[0, 0, i_if, i_stokes]] = c32::new((i_if * 10 + i_stokes) as f32, 0.0);
            }
        }
        let uvws = Array3::zeros((1, 1, 3));
        let src =
            MemVisSource::new(vis, weights, uvws, vec![2453492.75], test_antennas()).unwrap();

        let mut writer = UvfWriter::create(tmp.path(), test_params()).unwrap();
        writer.write_visibility_data(&src).unwrap();
        writer.close().unwrap();

        let bytes = std::fs::read(tmp.path()).unwrap();
        let res: Vec<f32> = (0..4).map(|i| read_f32_be(&bytes, 6 + i * 3)).collect();
        assert_eq!(res, vec![0.0, 1.0, 10.0, 11.0]);
    }
}
