//! Location: a structured address into a score document
//!
//! A `Location` identifies a point in a document by measure index, tick
//! position within the measure, track (staff x voice), note index and
//! grace-note index. Locations are either absolute or relative; connector
//! endpoints are persisted relative to the fragment that declares them and
//! resolved back to absolute during reconciliation.

use num_rational::Rational32;
use thiserror::Error;

/// Rational type used for tick positions within a measure.
pub type Rational = Rational32;

/// Measure deltas dominate the position term of the distance metric.
pub const MEASURE_WEIGHT: i64 = 10_000;
/// Common denominator used to scale fractional tick deltas to integers.
pub const FRAC_SCALE: i64 = 1_000;
/// Weight of the combined position term.
pub const POS_WEIGHT: i64 = 1_000;
/// Weight of the track delta.
pub const TRACK_WEIGHT: i64 = 100;
/// Weight of the note-index delta.
pub const NOTE_WEIGHT: i64 = 10;

/// Whether a location is an absolute document address or an offset from
/// some reference location.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LocationMode {
    Absolute,
    Relative,
}

/// Errors from absolute/relative conversion.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LocationError {
    /// The reference location must be absolute.
    #[error("reference location is not absolute")]
    RelativeReference,
    /// `to_absolute` requires a relative receiver.
    #[error("location is already absolute")]
    AlreadyAbsolute,
}

/// An immutable address value identifying a point in the document.
///
/// `track`, `note` and `grace` use -1 for "unknown / not applicable".
/// Equality is exact structural equality; tick positions are exact
/// rationals, so no epsilon is involved.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Location {
    mode: LocationMode,
    measure: i32,
    frac: Rational,
    track: i32,
    note: i32,
    grace: i32,
}

impl Location {
    /// An absolute location at the start of the document, with track, note
    /// and grace index unknown.
    pub fn absolute() -> Self {
        Location {
            mode: LocationMode::Absolute,
            measure: 0,
            frac: Rational::new(0, 1),
            track: -1,
            note: -1,
            grace: -1,
        }
    }

    /// A relative location with zero offset in every field.
    pub fn relative() -> Self {
        Location {
            mode: LocationMode::Relative,
            measure: 0,
            frac: Rational::new(0, 1),
            track: 0,
            note: 0,
            grace: 0,
        }
    }

    pub fn mode(&self) -> LocationMode {
        self.mode
    }

    pub fn is_absolute(&self) -> bool {
        self.mode == LocationMode::Absolute
    }

    pub fn is_relative(&self) -> bool {
        self.mode == LocationMode::Relative
    }

    pub fn measure(&self) -> i32 {
        self.measure
    }

    pub fn frac(&self) -> Rational {
        self.frac
    }

    pub fn track(&self) -> i32 {
        self.track
    }

    pub fn note(&self) -> i32 {
        self.note
    }

    pub fn grace(&self) -> i32 {
        self.grace
    }

    pub fn with_measure(mut self, measure: i32) -> Self {
        self.measure = measure;
        self
    }

    pub fn with_frac(mut self, frac: Rational) -> Self {
        self.frac = frac;
        self
    }

    pub fn with_track(mut self, track: i32) -> Self {
        self.track = track;
        self
    }

    pub fn with_note(mut self, note: i32) -> Self {
        self.note = note;
        self
    }

    pub fn with_grace(mut self, grace: i32) -> Self {
        self.grace = grace;
        self
    }

    /// Rewrites this location as an offset from `reference`.
    ///
    /// A location that is already relative is returned unchanged. The
    /// reference must be absolute. All five address fields are offset, so
    /// the relative default is all-zero.
    pub fn to_relative(&self, reference: &Location) -> Result<Location, LocationError> {
        if self.is_relative() {
            return Ok(*self);
        }
        if !reference.is_absolute() {
            return Err(LocationError::RelativeReference);
        }
        Ok(Location {
            mode: LocationMode::Relative,
            measure: self.measure - reference.measure,
            frac: self.frac - reference.frac,
            track: self.track - reference.track,
            note: self.note - reference.note,
            grace: self.grace - reference.grace,
        })
    }

    /// Inverse of [`to_relative`](Self::to_relative): resolves a relative
    /// location against an absolute reference.
    pub fn to_absolute(&self, reference: &Location) -> Result<Location, LocationError> {
        if self.is_absolute() {
            return Err(LocationError::AlreadyAbsolute);
        }
        if !reference.is_absolute() {
            return Err(LocationError::RelativeReference);
        }
        Ok(Location {
            mode: LocationMode::Absolute,
            measure: self.measure + reference.measure,
            frac: self.frac + reference.frac,
            track: self.track + reference.track,
            note: self.note + reference.note,
            grace: self.grace + reference.grace,
        })
    }
}

/// Weighted lexicographic distance between two locations.
///
/// The position term (measure delta weighted far above the intra-measure
/// tick delta) dominates, then track, then note index, then grace index.
/// The weights are empirically-chosen policy, kept from the original
/// design; a distance of 0 means the two locations are identical.
pub fn distance(a: &Location, b: &Location) -> i64 {
    let dfrac = b.frac - a.frac;
    let num = i64::from(dfrac.numer().abs());
    let den = i64::from(*dfrac.denom());
    let mut dpos = num * FRAC_SCALE / den;
    dpos += MEASURE_WEIGHT * i64::from((b.measure - a.measure).abs());
    POS_WEIGHT * dpos
        + TRACK_WEIGHT * i64::from((b.track - a.track).abs())
        + NOTE_WEIGHT * i64::from((b.note - a.note).abs())
        + i64::from((b.grace - a.grace).abs())
}
