//! Decoder for the dashboard query API's columnar response format.
//!
//! The query endpoint avoids repeating data in two ways: per-row bitsets mark
//! cells that are copied from the previous row or are null, and categorical
//! columns carry small integers into per-response value dictionaries. This
//! crate rebuilds a flat [`Table`] from that encoding.
//!
//! - [`model`]: the in-memory [`QueryResponse`] consumed by [`decode`]
//! - [`wire`]: parsing of the endpoint's JSON envelope into a [`QueryResponse`]
//! - [`table`]: the decoded [`Table`] and its CSV form

pub mod decode;
pub mod model;
pub mod table;
pub mod wire;

pub use decode::{decode, is_bit_set};
pub use model::{
    CellValue, ColumnType, MAX_COLUMNS, QueryResponse, RawRow, Selector, SelectorKind,
};
pub use table::Table;
pub use wire::{parse_response, parse_response_str};
