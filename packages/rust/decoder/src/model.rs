//! In-memory model of one query response.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Number;

// ---------------------------------------------------------------------------
// CellValue
// ---------------------------------------------------------------------------

/// A single cell, raw or decoded.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum CellValue {
    #[default]
    Null,
    /// JSON number; integers stay integers so they can index dictionaries.
    Number(Number),
    Text(String),
}

impl CellValue {
    /// Borrow the text of a `Text` cell.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for CellValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for CellValue {
    fn from(n: i64) -> Self {
        Self::Number(Number::from(n))
    }
}

impl<T: Into<CellValue>> From<Option<T>> for CellValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// CSV rendering: null is an empty field, numbers use JSON notation.
impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

// ---------------------------------------------------------------------------
// Selectors and row schema
// ---------------------------------------------------------------------------

/// Classification of an output column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorKind {
    /// Grouping column, resolved against the row schema by name.
    GroupKey,
    /// Computed measure, laid out after the grouping columns.
    Measure,
    /// Any other kind code the endpoint may send.
    Unsupported(i64),
}

impl SelectorKind {
    /// Map the endpoint's numeric `Kind` code.
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => Self::GroupKey,
            2 => Self::Measure,
            other => Self::Unsupported(other),
        }
    }
}

/// One output column descriptor.
#[derive(Debug, Clone, PartialEq)]
pub struct Selector {
    pub kind: SelectorKind,
    /// Public column label.
    pub name: String,
    /// For group keys: the row-schema column name this selector reads from.
    pub schema_ref: Option<String>,
}

impl Selector {
    pub fn group_key(name: impl Into<String>, schema_ref: impl Into<String>) -> Self {
        Self {
            kind: SelectorKind::GroupKey,
            name: name.into(),
            schema_ref: Some(schema_ref.into()),
        }
    }

    pub fn measure(name: impl Into<String>) -> Self {
        Self {
            kind: SelectorKind::Measure,
            name: name.into(),
            schema_ref: None,
        }
    }
}

/// Type descriptor of one logical column of the raw rows.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnType {
    pub name: String,
    pub type_code: Option<i64>,
    /// Dictionary whose entries integer cells of this column index into.
    pub dictionary_ref: Option<String>,
}

impl ColumnType {
    pub fn plain(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_code: None,
            dictionary_ref: None,
        }
    }

    pub fn with_dictionary(name: impl Into<String>, dictionary_ref: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_code: None,
            dictionary_ref: Some(dictionary_ref.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Raw rows
// ---------------------------------------------------------------------------

/// Widest row schema the `u64` row masks can describe.
pub const MAX_COLUMNS: usize = u64::BITS as usize;

/// One delta-encoded row.
///
/// `cells` holds only the explicitly present values, in ascending column
/// order. Bit `i` of `copy_mask` means column `i` repeats the previous row;
/// bit `i` of `null_mask` means column `i` is null. Responses wider than
/// [`MAX_COLUMNS`] are rejected by [`crate::decode`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRow {
    pub cells: Vec<CellValue>,
    pub copy_mask: u64,
    pub null_mask: u64,
}

impl RawRow {
    pub fn new(cells: Vec<CellValue>) -> Self {
        Self {
            cells,
            copy_mask: 0,
            null_mask: 0,
        }
    }

    pub fn with_copy_mask(mut self, mask: u64) -> Self {
        self.copy_mask = mask;
        self
    }

    pub fn with_null_mask(mut self, mask: u64) -> Self {
        self.null_mask = mask;
        self
    }
}

// ---------------------------------------------------------------------------
// QueryResponse
// ---------------------------------------------------------------------------

/// Everything [`crate::decode`] needs from one query API response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResponse {
    pub selectors: Vec<Selector>,
    pub row_schema: Vec<ColumnType>,
    pub dictionaries: BTreeMap<String, Vec<Option<String>>>,
    pub raw_rows: Vec<RawRow>,
}
