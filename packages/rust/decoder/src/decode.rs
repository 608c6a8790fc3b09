//! Reconstruction of a flat table from a delta/dictionary-encoded response.
//!
//! [`decode`] runs in fixed passes over one [`QueryResponse`]:
//!
//! 1. column naming from the selectors (group keys, then measures)
//! 2. delta reconstruction of copied and null cells
//! 3. dictionary expansion of integer indices
//! 4. projection of the logical columns onto the selectors
//! 5. newline stripping of every text cell
//!
//! Any failure aborts the whole decode; no partial table is produced.

use std::collections::BTreeMap;

use dashscrape_shared::{DashscrapeError, Result};

use crate::model::{
    CellValue, ColumnType, MAX_COLUMNS, QueryResponse, RawRow, Selector, SelectorKind,
};
use crate::table::Table;

/// Decode one response into a flat table with one row per raw row.
pub fn decode(response: &QueryResponse) -> Result<Table> {
    let columns = column_names(&response.selectors)?;

    // A query that matched nothing carries neither rows nor a row schema.
    if response.raw_rows.is_empty() && response.row_schema.is_empty() {
        return Table::try_new(columns, Vec::new());
    }

    if response.row_schema.len() > MAX_COLUMNS {
        return Err(DashscrapeError::schema(format!(
            "{} logical columns but row masks cover at most {MAX_COLUMNS}",
            response.row_schema.len()
        )));
    }

    let positions = projection(&response.selectors, &response.row_schema)?;
    let mut rows = reconstruct_rows(&response.row_schema, &response.raw_rows)?;
    expand_dictionaries(&response.row_schema, &response.dictionaries, &mut rows)?;

    let mut projected: Vec<Vec<CellValue>> = rows
        .iter()
        .map(|row| positions.iter().map(|&i| row[i].clone()).collect())
        .collect();
    strip_newlines(&mut projected);

    Table::try_new(columns, projected)
}

/// Whether bit `index` of `value` is set, bit 0 being the least significant.
pub fn is_bit_set(value: u64, index: usize) -> bool {
    u32::try_from(index)
        .ok()
        .and_then(|shift| value.checked_shr(shift))
        .is_some_and(|shifted| shifted & 1 == 1)
}

/// Group-key names in selector order, followed by measure names.
fn column_names(selectors: &[Selector]) -> Result<Vec<String>> {
    let mut group_keys = Vec::new();
    let mut measures = Vec::new();

    for selector in selectors {
        match selector.kind {
            SelectorKind::GroupKey => group_keys.push(selector.name.clone()),
            SelectorKind::Measure => measures.push(selector.name.clone()),
            SelectorKind::Unsupported(code) => {
                return Err(DashscrapeError::schema(format!(
                    "selector '{}' has unsupported kind {code}",
                    selector.name
                )));
            }
        }
    }

    group_keys.extend(measures);
    Ok(group_keys)
}

/// Logical column index feeding each output column, in output order.
fn projection(selectors: &[Selector], schema: &[ColumnType]) -> Result<Vec<usize>> {
    let width = schema.len();
    if selectors.len() > width {
        return Err(DashscrapeError::schema(format!(
            "{} selectors but only {width} logical columns",
            selectors.len()
        )));
    }

    let mut positions = Vec::with_capacity(selectors.len());

    for selector in selectors.iter().filter(|s| s.kind == SelectorKind::GroupKey) {
        let reference = selector.schema_ref.as_deref().ok_or_else(|| {
            DashscrapeError::schema(format!(
                "group key '{}' has no row-schema reference",
                selector.name
            ))
        })?;
        let position = schema
            .iter()
            .position(|column| column.name == reference)
            .ok_or_else(|| {
                DashscrapeError::schema(format!(
                    "group key '{}' references unknown column '{reference}'",
                    selector.name
                ))
            })?;
        positions.push(position);
    }

    // Measures follow the grouping columns in the raw layout. The selector
    // count check above keeps every measure position inside the schema.
    let group_count = positions.len();
    let measure_count = selectors
        .iter()
        .filter(|s| s.kind == SelectorKind::Measure)
        .count();
    positions.extend(group_count..group_count + measure_count);

    Ok(positions)
}

/// Fill copied and null cells so every row has one value per logical column.
///
/// The previous reconstructed row is always the last one pushed to the
/// output. Null takes precedence when both mask bits are set for a column.
fn reconstruct_rows(schema: &[ColumnType], raw_rows: &[RawRow]) -> Result<Vec<Vec<CellValue>>> {
    let width = schema.len();
    let mut rows: Vec<Vec<CellValue>> = Vec::with_capacity(raw_rows.len());

    for (row_index, raw) in raw_rows.iter().enumerate() {
        if row_index == 0 && raw.copy_mask != 0 {
            return Err(DashscrapeError::data_integrity(format!(
                "first row copies columns (mask {:#b}) but has no previous row",
                raw.copy_mask
            )));
        }

        let previous = rows.last();
        let mut cells = raw.cells.iter();
        let mut row = Vec::with_capacity(width);

        for column in 0..width {
            let value = if is_bit_set(raw.null_mask, column) {
                CellValue::Null
            } else if is_bit_set(raw.copy_mask, column) {
                previous
                    .and_then(|prev| prev.get(column))
                    .cloned()
                    .ok_or_else(|| {
                        DashscrapeError::data_integrity(format!(
                            "row {row_index} copies column {column} from a missing row"
                        ))
                    })?
            } else {
                cells.next().cloned().ok_or_else(|| {
                    DashscrapeError::data_integrity(format!(
                        "row {row_index} ran out of cells at column {column} of {width}"
                    ))
                })?
            };
            row.push(value);
        }

        let leftover = cells.count();
        if leftover > 0 {
            return Err(DashscrapeError::data_integrity(format!(
                "row {row_index} has {leftover} cells beyond its {width} logical columns"
            )));
        }

        rows.push(row);
    }

    Ok(rows)
}

/// Replace integer cells of dictionary columns with their literal values.
fn expand_dictionaries(
    schema: &[ColumnType],
    dictionaries: &BTreeMap<String, Vec<Option<String>>>,
    rows: &mut [Vec<CellValue>],
) -> Result<()> {
    for (column, column_type) in schema.iter().enumerate() {
        let Some(dictionary_ref) = column_type.dictionary_ref.as_deref() else {
            continue;
        };

        for (row_index, row) in rows.iter_mut().enumerate() {
            let slot = &mut row[column];
            let raw_index = match slot {
                CellValue::Number(n) if !n.is_f64() => n.clone(),
                _ => continue,
            };

            let dictionary = dictionaries.get(dictionary_ref).ok_or_else(|| {
                DashscrapeError::data_integrity(format!(
                    "column {column} references missing dictionary '{dictionary_ref}'"
                ))
            })?;

            let literal = raw_index
                .as_u64()
                .and_then(|i| usize::try_from(i).ok())
                .and_then(|i| dictionary.get(i))
                .ok_or_else(|| {
                    DashscrapeError::data_integrity(format!(
                        "row {row_index}, column {column}: index {raw_index} out of range \
                         for dictionary '{dictionary_ref}' of {} entries",
                        dictionary.len()
                    ))
                })?;

            *slot = CellValue::from(literal.clone());
        }
    }

    Ok(())
}

/// Remove every `\n` from text cells so rows serialize onto one CSV line.
fn strip_newlines(rows: &mut [Vec<CellValue>]) {
    for cell in rows.iter_mut().flatten() {
        if let CellValue::Text(text) = cell {
            if text.contains('\n') {
                *text = text.replace('\n', "");
            }
        }
    }
}
