//! The decoded flat table and its CSV form.

use std::io::{Read, Write};

use dashscrape_shared::{DashscrapeError, Result};

use crate::model::CellValue;

/// Named columns plus rows of equal width, in query row order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Vec<CellValue>>,
}

impl Table {
    /// Build a table, checking every row has one cell per column.
    pub fn try_new(columns: Vec<String>, rows: Vec<Vec<CellValue>>) -> Result<Self> {
        if let Some((index, row)) = rows
            .iter()
            .enumerate()
            .find(|(_, row)| row.len() != columns.len())
        {
            return Err(DashscrapeError::validation(format!(
                "row {index} has {} cells, expected {}",
                row.len(),
                columns.len()
            )));
        }
        Ok(Self { columns, rows })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<CellValue>] {
        &self.rows
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Position of the first column named `name`.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// All values of column `name`, top to bottom.
    pub fn column(&self, name: &str) -> Option<impl Iterator<Item = &CellValue> + '_> {
        let index = self.column_index(name)?;
        Some(self.rows.iter().map(move |row| &row[index]))
    }

    // -----------------------------------------------------------------------
    // CSV
    // -----------------------------------------------------------------------

    /// Write a header line followed by one line per row.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        csv_writer.write_record(&self.columns).map_err(csv_error)?;

        for row in &self.rows {
            csv_writer
                .write_record(row.iter().map(|cell| cell.to_string()))
                .map_err(csv_error)?;
        }

        csv_writer
            .flush()
            .map_err(|e| DashscrapeError::Csv(e.to_string()))
    }

    pub fn to_csv_string(&self) -> Result<String> {
        let mut buf = Vec::new();
        self.write_csv(&mut buf)?;
        String::from_utf8(buf).map_err(|e| DashscrapeError::Csv(e.to_string()))
    }

    /// Read a table written by [`Table::write_csv`].
    ///
    /// Every non-empty field comes back as text; empty fields are null.
    pub fn read_csv<R: Read>(reader: R) -> Result<Self> {
        let mut csv_reader = csv::Reader::from_reader(reader);
        let columns: Vec<String> = csv_reader
            .headers()
            .map_err(csv_error)?
            .iter()
            .map(String::from)
            .collect();

        let mut rows = Vec::new();
        for record in csv_reader.records() {
            let record = record.map_err(csv_error)?;
            rows.push(
                record
                    .iter()
                    .map(|field| {
                        if field.is_empty() {
                            CellValue::Null
                        } else {
                            CellValue::from(field)
                        }
                    })
                    .collect(),
            );
        }

        Self::try_new(columns, rows)
    }
}

fn csv_error(e: csv::Error) -> DashscrapeError {
    DashscrapeError::Csv(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Table {
        Table::try_new(
            vec!["Record ID".into(), "Type".into(), "Score".into()],
            vec![
                vec!["17".into(), "Government".into(), CellValue::from(3)],
                vec!["18".into(), CellValue::Null, CellValue::from(-2)],
            ],
        )
        .expect("valid table")
    }

    #[test]
    fn ragged_rows_rejected() {
        let err = Table::try_new(vec!["a".into(), "b".into()], vec![vec!["x".into()]])
            .unwrap_err();
        assert!(err.to_string().contains("row 0 has 1 cells, expected 2"));
    }

    #[test]
    fn column_lookup() {
        let table = sample();
        assert_eq!(table.column_index("Type"), Some(1));
        assert_eq!(table.column_index("Missing"), None);

        let ids: Vec<_> = table
            .column("Record ID")
            .expect("column")
            .filter_map(CellValue::as_text)
            .collect();
        assert_eq!(ids, ["17", "18"]);
    }

    #[test]
    fn csv_renders_nulls_empty_and_quotes_commas() {
        let table = Table::try_new(
            vec!["Commitments, pledges or actions".into(), "n".into()],
            vec![vec![CellValue::Null, CellValue::from(1)]],
        )
        .expect("valid table");

        let csv = table.to_csv_string().expect("csv");
        assert_eq!(csv, "\"Commitments, pledges or actions\",n\n,1\n");
    }

    #[test]
    fn csv_read_back_keeps_shape_and_nulls() {
        let csv = sample().to_csv_string().expect("csv");
        let table = Table::read_csv(csv.as_bytes()).expect("read");

        assert_eq!(table.columns(), ["Record ID", "Type", "Score"]);
        assert_eq!(table.len(), 2);
        assert!(table.rows()[1][1].is_null());
        assert_eq!(table.rows()[1][2], CellValue::from("-2"));
    }
}
