//! Deterministic ordering of specification records.
//!
//! Records are ordered by entity type, then identity key, then location.
//! Identity keys and locations compare "naturally": digit runs compare by
//! numeric value, so DICOM UIDs sort in series order.
//!
//! # Examples of natural order
//!
//! - `1.2.9` < `1.2.10` (plain lexicographic order would flip these)
//! - `run-2` < `run-10`
//! - `anat` < `func` (text segments compare as text)

use std::cmp::Ordering;

/// One segment of a natural sort key.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    /// Digit run with leading zeros stripped.
    Num(String),
    Text(String),
}

impl Ord for Segment {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Self::Num(a), Self::Num(b)) => a.len().cmp(&b.len()).then_with(|| a.cmp(b)),
            (Self::Num(_), Self::Text(_)) => Ordering::Less,
            (Self::Text(_), Self::Num(_)) => Ordering::Greater,
            (Self::Text(a), Self::Text(b)) => a.cmp(b),
        }
    }
}

impl PartialOrd for Segment {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Natural sort key of a string. Ties between spellings such as `1.02` and
/// `1.2` are broken by the raw string, so the order stays total.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct NaturalKey {
    segments: Vec<Segment>,
    raw: String,
}

impl NaturalKey {
    pub fn new(s: &str) -> Self {
        let mut segments = Vec::new();
        let mut chars = s.chars().peekable();
        while let Some(&c) = chars.peek() {
            let numeric = c.is_ascii_digit();
            let mut run = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_ascii_digit() != numeric {
                    break;
                }
                run.push(c);
                chars.next();
            }
            segments.push(if numeric {
                let stripped = run.trim_start_matches('0');
                Segment::Num(if stripped.is_empty() { "0" } else { stripped }.to_string())
            } else {
                Segment::Text(run)
            });
        }
        Self {
            segments,
            raw: s.to_string(),
        }
    }
}

/// Canonical position of a record within a specification.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct OrderKey {
    entity_type: &'static str,
    identity: NaturalKey,
    location: NaturalKey,
}

impl OrderKey {
    pub fn new(entity_type: &'static str, identity: &str, location: &str) -> Self {
        Self {
            entity_type,
            identity: NaturalKey::new(identity),
            location: NaturalKey::new(location),
        }
    }
}

/// Normalise a BIDS run label to at least two digits.
///
/// Input: `"1"`, `"01"`, `"001"`, `"12"`, `"123"`, `"a"`
/// Output: `"01"`, `"01"`, `"01"`, `"12"`, `"123"`, `"a"`
///
/// Non-numeric labels are returned trimmed but otherwise unchanged.
pub fn normalize_run(s: &str) -> String {
    let s = s.trim();
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return s.to_string();
    }
    let stripped = s.trim_start_matches('0');
    let n = if stripped.is_empty() { "0" } else { stripped };
    format!("{n:0>2}")
}
