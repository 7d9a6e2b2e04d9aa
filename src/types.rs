//! Core value types shared by the schema model, the tokenizer and the matching engine.
//!
//! - [`Coordinate`]: an immutable `(row, col)` cell address, used as a map key throughout.
//! - [`Repeat`]: how many times a row or column pattern may occur.
//! - [`CellRange`] / [`IndexSelector`]: selectors used by schema sources to address several rows
//!   or columns with one statement.
//! - [`Value`]: a typed cell value produced by validation.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

/// A `(row, col)` cell address.
///
/// Ordering is by row first, then column. Hashing uses [`Coordinate::spread_hash`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Coordinate {
    /// Zero-based row index.
    pub row: usize,
    /// Zero-based column index.
    pub col: usize,
}

impl Coordinate {
    /// Create a new coordinate.
    pub const fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }

    /// Hash code mixing row and column.
    ///
    /// Rows vastly outnumber columns in real files, so the high byte of the row is folded into
    /// the low half-word (rotated by its own leading-zero count) before the column is mixed in.
    pub fn spread_hash(&self) -> u32 {
        let row = self.row as u32;
        let high = row >> 24;
        let lz = (high as u8).leading_zeros();
        let folded = u32::from((high as u16).rotate_right(lz));
        ((row << 16) | folded) ^ self.col as u32
    }
}

impl Hash for Coordinate {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u32(self.spread_hash());
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.row, self.col)
    }
}

impl From<(usize, usize)> for Coordinate {
    fn from((row, col): (usize, usize)) -> Self {
        Self::new(row, col)
    }
}

/// Repetition descriptor for a row or column pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Repeat {
    /// Matches exactly one physical row/column.
    #[default]
    None,
    /// Matches between one and `n` consecutive physical rows/columns.
    Fixed(usize),
    /// Matches one or more consecutive physical rows/columns.
    Unbounded,
}

impl Repeat {
    /// Maximum number of physical occurrences, or `None` when unbounded.
    pub fn max_occurrences(&self) -> Option<usize> {
        match self {
            Repeat::None => Some(1),
            Repeat::Fixed(n) => Some(*n),
            Repeat::Unbounded => None,
        }
    }

    /// Whether this pattern may consume more than one physical row/column.
    pub fn is_repeating(&self) -> bool {
        !matches!(self, Repeat::None | Repeat::Fixed(1))
    }
}

/// An inclusive rectangle of coordinates, `start` to `end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellRange {
    pub start: Coordinate,
    pub end: Coordinate,
}

impl CellRange {
    /// Create a range; endpoints are normalised so `start <= end` on both axes.
    pub fn new(a: Coordinate, b: Coordinate) -> Self {
        Self {
            start: Coordinate::new(a.row.min(b.row), a.col.min(b.col)),
            end: Coordinate::new(a.row.max(b.row), a.col.max(b.col)),
        }
    }

    pub fn contains(&self, c: Coordinate) -> bool {
        (self.start.row..=self.end.row).contains(&c.row)
            && (self.start.col..=self.end.col).contains(&c.col)
    }

    /// Iterate every coordinate in row-major order.
    pub fn iter(&self) -> impl Iterator<Item = Coordinate> + '_ {
        (self.start.row..=self.end.row)
            .flat_map(move |r| (self.start.col..=self.end.col).map(move |c| Coordinate::new(r, c)))
    }
}

/// A set of row or column indexes written as `"3"`, `"1-4"` or `"0,2,5"` (or any mix).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSelector {
    indexes: Vec<usize>,
}

impl IndexSelector {
    /// Selected indexes, ascending and de-duplicated.
    pub fn indexes(&self) -> &[usize] {
        &self.indexes
    }
}

impl FromStr for IndexSelector {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut indexes = Vec::new();
        for part in s.split(',') {
            let part = part.trim();
            if part.is_empty() {
                return Err(format!("empty index in selector '{s}'"));
            }
            match part.split_once('-') {
                Some((lo, hi)) => {
                    let lo = parse_index(lo, s)?;
                    let hi = parse_index(hi, s)?;
                    if lo > hi {
                        return Err(format!("descending range '{part}' in selector '{s}'"));
                    }
                    indexes.extend(lo..=hi);
                }
                None => indexes.push(parse_index(part, s)?),
            }
        }
        indexes.sort_unstable();
        indexes.dedup();
        Ok(Self { indexes })
    }
}

fn parse_index(raw: &str, selector: &str) -> Result<usize, String> {
    raw.trim()
        .parse::<usize>()
        .map_err(|e| format!("invalid index '{raw}' in selector '{selector}': {e}"))
}

/// A single typed value in a validated cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Missing/empty value.
    Null,
    /// 64-bit signed integer.
    Int64(i64),
    /// 64-bit float.
    Float64(f64),
    /// Boolean.
    Bool(bool),
    /// UTF-8 string (also used for lexically checked types without a native representation).
    Utf8(String),
    /// Calendar date.
    Date(NaiveDate),
    /// Date and time, without time zone.
    DateTime(NaiveDateTime),
    /// Time of day, without time zone.
    Time(NaiveTime),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Int64(v) => write!(f, "{v}"),
            Value::Float64(v) => write!(f, "{v}"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Utf8(v) => f.write_str(v),
            Value::Date(v) => write!(f, "{}", v.format("%Y-%m-%d")),
            Value::DateTime(v) => write!(f, "{}", v.format("%Y-%m-%dT%H:%M:%S%.f")),
            Value::Time(v) => write!(f, "{}", v.format("%H:%M:%S%.f")),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::{CellRange, Coordinate, IndexSelector, Repeat};

    #[test]
    fn coordinates_order_by_row_then_column() {
        let mut cs = vec![
            Coordinate::new(2, 0),
            Coordinate::new(0, 5),
            Coordinate::new(0, 1),
        ];
        cs.sort();
        assert_eq!(
            cs,
            vec![Coordinate::new(0, 1), Coordinate::new(0, 5), Coordinate::new(2, 0)]
        );
    }

    #[test]
    fn equal_coordinates_hash_equal_and_work_as_keys() {
        let a = Coordinate::new(70_000_000, 3);
        let b = Coordinate::new(70_000_000, 3);
        assert_eq!(a.spread_hash(), b.spread_hash());

        let mut m = HashMap::new();
        m.insert(a, "x");
        assert_eq!(m.get(&b), Some(&"x"));
        assert_eq!(m.get(&Coordinate::new(3, 70_000_000)), None);
    }

    #[test]
    fn spread_hash_mixes_column_into_low_bits() {
        let a = Coordinate::new(1, 0).spread_hash();
        let b = Coordinate::new(1, 1).spread_hash();
        assert_eq!(a ^ b, 1);
        assert_eq!(Coordinate::new(1, 0).spread_hash(), 1 << 16);
    }

    #[test]
    fn selector_parses_ranges_and_lists() {
        let s: IndexSelector = "5, 1-3,2".parse().unwrap();
        assert_eq!(s.indexes(), &[1, 2, 3, 5]);
        assert!("3-1".parse::<IndexSelector>().is_err());
        assert!("a".parse::<IndexSelector>().is_err());
        assert!("1,,2".parse::<IndexSelector>().is_err());
    }

    #[test]
    fn range_normalises_and_iterates_row_major() {
        let r = CellRange::new(Coordinate::new(1, 1), Coordinate::new(0, 0));
        assert!(r.contains(Coordinate::new(1, 0)));
        assert!(!r.contains(Coordinate::new(2, 0)));
        let all: Vec<_> = r.iter().collect();
        assert_eq!(all.len(), 4);
        assert_eq!(all[1], Coordinate::new(0, 1));
    }

    #[test]
    fn repeat_bounds() {
        assert_eq!(Repeat::None.max_occurrences(), Some(1));
        assert_eq!(Repeat::Fixed(4).max_occurrences(), Some(4));
        assert_eq!(Repeat::Unbounded.max_occurrences(), None);
        assert!(!Repeat::Fixed(1).is_repeating());
        assert!(Repeat::Unbounded.is_repeating());
    }
}
