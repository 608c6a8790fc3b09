//! Parsing of the query endpoint's JSON envelope.
//!
//! Only the fields the decoder consumes are modelled:
//!
//! ```text
//! results[0].result.data
//!   descriptor.Select[]      Kind, Value, GroupKeys[0].Source.Property
//!   dsr.DS[0]
//!     ValueDicts             { "D0": ["literal", null, ...] }
//!     PH[0].DM0[]            S (first row only), C, R (copy), Ø (null)
//! ```
//!
//! `R` and `Ø` are read as `u64`, so a mask naming a column past the 64th
//! fails here as a `Schema` error.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

use dashscrape_shared::{DashscrapeError, Result};

use crate::model::{CellValue, ColumnType, QueryResponse, RawRow, Selector, SelectorKind};

#[derive(Deserialize)]
struct Envelope {
    results: Vec<ResultEntry>,
}

#[derive(Deserialize)]
struct ResultEntry {
    result: ResultBody,
}

#[derive(Deserialize)]
struct ResultBody {
    data: ResultData,
}

#[derive(Deserialize)]
struct ResultData {
    descriptor: Descriptor,
    dsr: Dsr,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Descriptor {
    select: Vec<WireSelect>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireSelect {
    kind: i64,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    group_keys: Vec<WireGroupKey>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireGroupKey {
    source: WireSource,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct WireSource {
    property: String,
}

#[derive(Deserialize)]
struct Dsr {
    #[serde(rename = "DS")]
    data_sets: Vec<WireDataSet>,
}

#[derive(Deserialize)]
struct WireDataSet {
    #[serde(rename = "PH")]
    hierarchies: Vec<WireHierarchy>,
    #[serde(rename = "ValueDicts", default)]
    value_dicts: BTreeMap<String, Vec<Option<String>>>,
}

#[derive(Deserialize)]
struct WireHierarchy {
    #[serde(rename = "DM0", default)]
    rows: Vec<WireRow>,
}

#[derive(Deserialize)]
struct WireRow {
    #[serde(rename = "S", default)]
    schema: Option<Vec<WireColumn>>,
    #[serde(rename = "C", default)]
    cells: Vec<Value>,
    #[serde(rename = "R", default)]
    copy_mask: u64,
    #[serde(rename = "Ø", default)]
    null_mask: u64,
}

#[derive(Deserialize)]
struct WireColumn {
    #[serde(rename = "N")]
    name: String,
    #[serde(rename = "T", default)]
    type_code: Option<i64>,
    #[serde(rename = "DN", default)]
    dictionary: Option<String>,
}

/// Parse a response body held as text.
pub fn parse_response_str(body: &str) -> Result<QueryResponse> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| DashscrapeError::schema(format!("response is not valid JSON: {e}")))?;
    parse_response(&value)
}

/// Extract the selectors, row schema, dictionaries and rows of the first result.
pub fn parse_response(body: &Value) -> Result<QueryResponse> {
    let envelope = Envelope::deserialize(body)
        .map_err(|e| DashscrapeError::schema(format!("unexpected response shape: {e}")))?;

    let data = envelope
        .results
        .into_iter()
        .next()
        .ok_or_else(|| DashscrapeError::schema("response has no results"))?
        .result
        .data;

    let selectors = data
        .descriptor
        .select
        .into_iter()
        .map(selector_from_wire)
        .collect::<Result<Vec<_>>>()?;

    let data_set = data
        .dsr
        .data_sets
        .into_iter()
        .next()
        .ok_or_else(|| DashscrapeError::schema("response has no data set"))?;
    let dictionaries = data_set.value_dicts;
    let wire_rows = data_set
        .hierarchies
        .into_iter()
        .next()
        .map(|hierarchy| hierarchy.rows)
        .unwrap_or_default();

    let row_schema = match wire_rows.first() {
        None => Vec::new(),
        Some(first) => first
            .schema
            .as_ref()
            .ok_or_else(|| DashscrapeError::schema("first row carries no column schema"))?
            .iter()
            .map(|column| ColumnType {
                name: column.name.clone(),
                type_code: column.type_code,
                dictionary_ref: column.dictionary.clone(),
            })
            .collect(),
    };

    let raw_rows = wire_rows
        .into_iter()
        .enumerate()
        .map(|(index, row)| row_from_wire(index, row))
        .collect::<Result<Vec<_>>>()?;

    Ok(QueryResponse {
        selectors,
        row_schema,
        dictionaries,
        raw_rows,
    })
}

fn selector_from_wire(select: WireSelect) -> Result<Selector> {
    let kind = SelectorKind::from_code(select.kind);
    match kind {
        SelectorKind::GroupKey => {
            let name = select
                .group_keys
                .into_iter()
                .next()
                .map(|key| key.source.property)
                .ok_or_else(|| {
                    DashscrapeError::schema(format!(
                        "group key {:?} has no source property",
                        select.value
                    ))
                })?;
            Ok(Selector {
                kind,
                name,
                schema_ref: select.value,
            })
        }
        // Measures are labelled by their positional value name.
        SelectorKind::Measure => {
            let name = select.value.ok_or_else(|| {
                DashscrapeError::schema(format!("measure {:?} has no value name", select.name))
            })?;
            Ok(Selector {
                kind,
                name,
                schema_ref: None,
            })
        }
        SelectorKind::Unsupported(_) => Ok(Selector {
            kind,
            name: select.value.or(select.name).unwrap_or_default(),
            schema_ref: None,
        }),
    }
}

fn row_from_wire(index: usize, row: WireRow) -> Result<RawRow> {
    let cells = row
        .cells
        .into_iter()
        .map(|cell| match cell {
            Value::Null => Ok(CellValue::Null),
            Value::Number(n) => Ok(CellValue::Number(n)),
            Value::String(s) => Ok(CellValue::Text(s)),
            other => Err(DashscrapeError::data_integrity(format!(
                "row {index} has unsupported cell value {other}"
            ))),
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(RawRow {
        cells,
        copy_mask: row.copy_mask,
        null_mask: row.null_mask,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode;

    /// Trimmed response of a three-column group-by query with one measure.
    const SAMPLE: &str = r#"{
        "jobIds": ["8c6c5e4b"],
        "results": [{
            "jobId": "8c6c5e4b",
            "result": {
                "data": {
                    "descriptor": {
                        "Select": [
                            {"Kind": 1, "Depth": 0, "Value": "G0", "Name": "Demographics.Type",
                             "GroupKeys": [{"Source": {"Entity": "Demographics", "Property": "Type"}, "Calc": "G0", "IsSameAsSelect": true}]},
                            {"Kind": 1, "Depth": 0, "Value": "G1", "Name": "Demographics.Entity Name",
                             "GroupKeys": [{"Source": {"Entity": "Demographics", "Property": "Entity Name"}, "Calc": "G1", "IsSameAsSelect": true}]},
                            {"Kind": 1, "Depth": 0, "Value": "G2", "Name": "All Areas combined.Record ID",
                             "GroupKeys": [{"Source": {"Entity": "All Areas combined", "Property": "Record ID"}, "Calc": "G2", "IsSameAsSelect": true}]},
                            {"Kind": 2, "Value": "M0", "Name": "Count(All Areas combined.Core Principles)"}
                        ]
                    },
                    "dsr": {
                        "Version": 2,
                        "DS": [{
                            "N": "DS0",
                            "PH": [{
                                "DM0": [
                                    {"S": [{"N": "G0", "T": 1, "DN": "D0"}, {"N": "G1", "T": 1, "DN": "D1"}, {"N": "G2", "T": 1}, {"N": "M0", "T": 4}],
                                     "C": [0, 0, "638159590404564717", 2]},
                                    {"C": [1, "638183478316757857", 1], "R": 1},
                                    {"C": ["Civil\nSociety", "638183478316757999"], "R": 2, "Ø": 8}
                                ]
                            }],
                            "IC": true,
                            "ValueDicts": {
                                "D0": ["Government", "Private sector"],
                                "D1": ["Ministry of\nDigital Affairs", "Example Corp"]
                            }
                        }]
                    }
                }
            }
        }]
    }"#;

    #[test]
    fn parses_selectors_schema_and_masks() {
        let response = parse_response_str(SAMPLE).expect("parse");

        assert_eq!(response.selectors.len(), 4);
        assert_eq!(response.selectors[0], Selector::group_key("Type", "G0"));
        assert_eq!(response.selectors[3], Selector::measure("M0"));

        assert_eq!(response.row_schema.len(), 4);
        assert_eq!(response.row_schema[0].dictionary_ref.as_deref(), Some("D0"));
        assert_eq!(response.row_schema[3].type_code, Some(4));

        assert_eq!(response.raw_rows[1].copy_mask, 1);
        assert_eq!(response.raw_rows[2].null_mask, 8);
        assert_eq!(response.dictionaries["D1"].len(), 2);
    }

    #[test]
    fn sample_decodes_end_to_end() {
        let response = parse_response_str(SAMPLE).expect("parse");
        let table = decode(&response).expect("decode");

        assert_eq!(table.columns(), ["Type", "Entity Name", "Record ID", "M0"]);
        assert_eq!(table.len(), 3);
        assert_eq!(
            table.rows()[0],
            vec![
                CellValue::from("Government"),
                CellValue::from("Ministry ofDigital Affairs"),
                CellValue::from("638159590404564717"),
                CellValue::from(2),
            ]
        );
        assert_eq!(
            table.rows()[1],
            vec![
                CellValue::from("Government"),
                CellValue::from("Example Corp"),
                CellValue::from("638183478316757857"),
                CellValue::from(1),
            ]
        );
        assert_eq!(
            table.rows()[2],
            vec![
                CellValue::from("CivilSociety"),
                CellValue::from("Example Corp"),
                CellValue::from("638183478316757999"),
                CellValue::Null,
            ]
        );
    }

    #[test]
    fn empty_result_set_parses() {
        let body = r#"{"results":[{"result":{"data":{
            "descriptor":{"Select":[{"Kind":1,"Value":"G0","GroupKeys":[{"Source":{"Property":"Record ID"}}]}]},
            "dsr":{"DS":[{"PH":[{"DM0":[]}]}]}}}}]}"#;

        let response = parse_response_str(body).expect("parse");
        assert!(response.raw_rows.is_empty());
        assert!(response.row_schema.is_empty());

        let table = decode(&response).expect("decode");
        assert_eq!(table.columns(), ["Record ID"]);
        assert!(table.is_empty());
    }

    #[test]
    fn unknown_kind_survives_parsing_and_fails_decode() {
        let body = r#"{"results":[{"result":{"data":{
            "descriptor":{"Select":[{"Kind":5,"Value":"X0"}]},
            "dsr":{"DS":[{"PH":[{"DM0":[{"S":[{"N":"X0"}],"C":["v"]}]}]}]}}}}]}"#;

        let response = parse_response_str(body).expect("parse");
        assert_eq!(response.selectors[0].kind, SelectorKind::Unsupported(5));
        assert!(matches!(
            decode(&response).unwrap_err(),
            DashscrapeError::Schema { .. }
        ));
    }

    #[test]
    fn missing_envelope_is_schema_error() {
        let err = parse_response_str(r#"{"error": {"code": "QueryUserError"}}"#).unwrap_err();
        assert!(matches!(err, DashscrapeError::Schema { .. }));

        let err = parse_response_str("not json").unwrap_err();
        assert!(matches!(err, DashscrapeError::Schema { .. }));
    }

    #[test]
    fn first_row_without_schema_is_schema_error() {
        let body = r#"{"results":[{"result":{"data":{
            "descriptor":{"Select":[]},
            "dsr":{"DS":[{"PH":[{"DM0":[{"C":["v"]}]}]}]}}}}]}"#;
        let err = parse_response_str(body).unwrap_err();
        assert!(err.to_string().contains("no column schema"));
    }

    #[test]
    fn mask_beyond_64_bits_is_schema_error() {
        let body = r#"{"results":[{"result":{"data":{
            "descriptor":{"Select":[]},
            "dsr":{"DS":[{"PH":[{"DM0":[
                {"S":[{"N":"G0"}],"C":["v"]},
                {"C":[],"Ø":18446744073709551616}
            ]}]}]}}}}]}"#;
        let err = parse_response_str(body).unwrap_err();
        assert!(matches!(err, DashscrapeError::Schema { .. }));
    }

    #[test]
    fn boolean_cell_is_data_integrity_error() {
        let body = r#"{"results":[{"result":{"data":{
            "descriptor":{"Select":[]},
            "dsr":{"DS":[{"PH":[{"DM0":[{"S":[{"N":"G0"}],"C":[true]}]}]}]}}}}]}"#;
        let err = parse_response_str(body).unwrap_err();
        assert!(matches!(err, DashscrapeError::DataIntegrity { .. }));
    }
}
