//! Left joins of per-topic tables onto the page-one table.
//!
//! Rows are matched on the rendered record id, so a numeric id in one table
//! matches the same id stored as text in another.

use std::collections::{BTreeMap, HashMap};
use std::sync::LazyLock;

use regex::Regex;

use dashscrape_decoder::{CellValue, Table};
use dashscrape_shared::{DashscrapeError, Result};

/// Topic name as used in column suffixes: spaces and slashes become `_`.
pub fn clean_topic(topic: &str) -> String {
    static SEPARATOR_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"[ /]").expect("valid regex"));
    SEPARATOR_RE.replace_all(topic, "_").into_owned()
}

/// Name of a topic column after the join, e.g.
/// `Commitments, pledges or actions` + `Digital Commons` →
/// `Commitments_pledges_or_actions__Digital_Commons`.
pub fn topic_column_name(column: &str, topic: &str) -> String {
    static WHITESPACE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));
    let stripped = column.replace(',', "");
    let slug = WHITESPACE_RE.replace_all(&stripped, "_");
    format!("{slug}__{}", clean_topic(topic))
}

/// Join `columns` of `topic_table` onto `master`, suffixed with the topic.
///
/// A column listed in `aliases` is named after its alias instead, so
/// `Core Principles` can land as `Core_Principle__<topic>`.
pub fn join_topic(
    master: &Table,
    topic_table: &Table,
    key: &str,
    columns: &[String],
    aliases: &BTreeMap<String, String>,
    topic: &str,
) -> Result<Table> {
    let renames: Vec<(&str, String)> = columns
        .iter()
        .map(|c| {
            let stem = aliases.get(c).unwrap_or(c);
            (c.as_str(), topic_column_name(stem, topic))
        })
        .collect();
    left_join(master, topic_table, key, &renames)
}

/// Join `columns` of `table` onto `master` under their own names.
pub fn join_trailing(master: &Table, table: &Table, key: &str, columns: &[String]) -> Result<Table> {
    let renames: Vec<(&str, String)> = columns.iter().map(|c| (c.as_str(), c.clone())).collect();
    left_join(master, table, key, &renames)
}

/// Master rows keep their order and count. Unmatched rows get nulls and
/// the first right row wins for a duplicated key.
fn left_join(master: &Table, right: &Table, key: &str, renames: &[(&str, String)]) -> Result<Table> {
    let master_key = master.column_index(key).ok_or_else(|| {
        DashscrapeError::validation(format!("master table has no '{key}' column"))
    })?;
    let right_key = right.column_index(key).ok_or_else(|| {
        DashscrapeError::validation(format!("joined table has no '{key}' column"))
    })?;

    let mut picks = Vec::with_capacity(renames.len());
    let mut columns = master.columns().to_vec();
    for (source, target) in renames {
        let index = right.column_index(source).ok_or_else(|| {
            DashscrapeError::validation(format!("joined table has no '{source}' column"))
        })?;
        if columns.iter().any(|c| c == target) {
            return Err(DashscrapeError::validation(format!(
                "joined column '{target}' already exists"
            )));
        }
        picks.push(index);
        columns.push(target.clone());
    }

    let mut lookup: HashMap<String, usize> = HashMap::new();
    for (position, row) in right.rows().iter().enumerate() {
        if !row[right_key].is_null() {
            lookup.entry(row[right_key].to_string()).or_insert(position);
        }
    }

    let rows = master
        .rows()
        .iter()
        .map(|row| {
            let matched = (!row[master_key].is_null())
                .then(|| lookup.get(&row[master_key].to_string()))
                .flatten()
                .map(|&position| &right.rows()[position]);

            let mut joined = row.clone();
            joined.extend(picks.iter().map(|&index| match matched {
                Some(right_row) => right_row[index].clone(),
                None => CellValue::Null,
            }));
            joined
        })
        .collect();

    Table::try_new(columns, rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(columns: &[&str], rows: Vec<Vec<CellValue>>) -> Table {
        Table::try_new(columns.iter().map(|c| c.to_string()).collect(), rows).expect("table")
    }

    fn master() -> Table {
        table(
            &["Record ID", "Type"],
            vec![
                vec!["17".into(), "Government".into()],
                vec!["18".into(), "Company".into()],
                vec!["19".into(), "Individual".into()],
            ],
        )
    }

    fn topic_columns() -> Vec<String> {
        vec!["Core Principles".into(), "Commitments, pledges or actions".into()]
    }

    fn aliases() -> BTreeMap<String, String> {
        BTreeMap::from([("Core Principles".to_string(), "Core Principle".to_string())])
    }

    #[test]
    fn topic_names_are_cleaned() {
        assert_eq!(
            clean_topic("Accountability for Discrimination/Misleading Content"),
            "Accountability_for_Discrimination_Misleading_Content"
        );
        assert_eq!(
            topic_column_name("Commitments, pledges or actions", "Regulation of AI"),
            "Commitments_pledges_or_actions__Regulation_of_AI"
        );
        assert_eq!(
            topic_column_name("Core Principles", "Protect Data"),
            "Core_Principles__Protect_Data"
        );
        assert_eq!(
            topic_column_name("Open,  shared   data", "Other Area"),
            "Open_shared_data__Other_Area"
        );
    }

    #[test]
    fn join_keeps_master_rows_and_fills_nulls() {
        let right = table(
            &["Record ID", "Core Principles", "Commitments, pledges or actions", "Extra"],
            vec![
                // Numeric id still matches the textual master id.
                vec![CellValue::from(19), "Inclusive".into(), "Pledge".into(), "x".into()],
                vec!["17".into(), "Open".into(), CellValue::Null, "y".into()],
                vec!["42".into(), "Unmatched".into(), "z".into(), "z".into()],
            ],
        );

        let joined =
            join_topic(&master(), &right, "Record ID", &topic_columns(), &aliases(), "Digital Commons")
                .unwrap();

        assert_eq!(
            joined.columns(),
            [
                "Record ID",
                "Type",
                "Core_Principle__Digital_Commons",
                "Commitments_pledges_or_actions__Digital_Commons"
            ]
        );
        assert_eq!(joined.len(), 3);
        assert_eq!(joined.rows()[0][2], CellValue::from("Open"));
        assert!(joined.rows()[0][3].is_null());
        assert!(joined.rows()[1][2].is_null());
        assert_eq!(joined.rows()[2][3], CellValue::from("Pledge"));
    }

    #[test]
    fn duplicate_right_keys_keep_first() {
        let right = table(
            &["Record ID", "Process description"],
            vec![
                vec!["18".into(), "first".into()],
                vec!["18".into(), "second".into()],
            ],
        );
        let joined =
            join_trailing(&master(), &right, "Record ID", &["Process description".into()]).unwrap();

        assert_eq!(joined.columns().last().map(String::as_str), Some("Process description"));
        assert_eq!(joined.rows()[1][2], CellValue::from("first"));
        assert_eq!(joined.len(), 3);
    }

    #[test]
    fn missing_columns_are_validation_errors() {
        let right = table(&["Record ID"], vec![]);
        let err = join_topic(&master(), &right, "Record ID", &topic_columns(), &aliases(), "x")
            .unwrap_err();
        assert!(matches!(err, DashscrapeError::Validation { .. }));

        let keyless = table(&["Id"], vec![]);
        let err = join_trailing(&master(), &keyless, "Record ID", &[]).unwrap_err();
        assert!(err.to_string().contains("no 'Record ID' column"));
    }

    #[test]
    fn columns_without_alias_keep_their_own_stem() {
        let right = table(
            &["Record ID", "Core Principles"],
            vec![vec!["18".into(), "Fair".into()]],
        );
        let columns = vec!["Core Principles".to_string()];
        let joined =
            join_topic(&master(), &right, "Record ID", &columns, &BTreeMap::new(), "Other Area")
                .unwrap();

        assert_eq!(joined.columns()[2], "Core_Principles__Other_Area");
        assert_eq!(joined.rows()[1][2], CellValue::from("Fair"));
    }

    #[test]
    fn trailing_name_collision_rejected() {
        let right = table(&["Record ID", "Type"], vec![vec!["17".into(), "Other".into()]]);
        let err = join_trailing(&master(), &right, "Record ID", &["Type".into()]).unwrap_err();
        assert!(err.to_string().contains("'Type' already exists"));
    }
}
