//! Page-shape parsing.
//!
//! The Service Layer answers collection reads with `{"value": [...]}`, a
//! bare array, or (for single-entity reads and some views) a lone object.
//! The inline total count shows up under several spellings, sometimes as a
//! string. Everything that is not one of those shapes is a malformed
//! response and fails the page rather than silently losing rows.

use serde_json::Value;

use super::Row;
use crate::error::{InsightError, Result};

/// Count-hint spellings observed in the wild, in probe order.
const COUNT_FIELDS: [&str; 3] = ["@odata.count", "odata.count", "__count"];

#[derive(Debug)]
pub enum ParsedPage {
    Collection {
        rows: Vec<Row>,
        total_hint: Option<u64>,
    },
    /// The body was a single object rather than a collection; treated as the
    /// one row of the final page.
    Single(Row),
}

pub fn parse_page(body: &str) -> Result<ParsedPage> {
    let value: Value = serde_json::from_str(body).map_err(|e| {
        InsightError::MalformedResponse(format!("response is not valid JSON: {}", e))
    })?;

    match value {
        Value::Array(items) => Ok(ParsedPage::Collection {
            rows: rows_from(items)?,
            total_hint: None,
        }),
        Value::Object(map) => {
            if let Some(rows_value) = map.get("value") {
                let items = rows_value.as_array().cloned().ok_or_else(|| {
                    InsightError::MalformedResponse("\"value\" field is not an array".to_string())
                })?;
                let total_hint = extract_count(&map);
                Ok(ParsedPage::Collection {
                    rows: rows_from(items)?,
                    total_hint,
                })
            } else {
                Ok(ParsedPage::Single(map))
            }
        }
        other => Err(InsightError::MalformedResponse(format!(
            "unexpected response shape: {}",
            other
        ))),
    }
}

fn rows_from(items: Vec<Value>) -> Result<Vec<Row>> {
    items
        .into_iter()
        .map(|item| match item {
            Value::Object(map) => Ok(map),
            other => Err(InsightError::MalformedResponse(format!(
                "row is not an object: {}",
                other
            ))),
        })
        .collect()
}

/// The hint is trusted only when present and numeric; a count the upstream
/// did not send is simply unknown, never guessed.
fn extract_count(map: &serde_json::Map<String, Value>) -> Option<u64> {
    for field in COUNT_FIELDS {
        match map.get(field) {
            Some(Value::Number(n)) => {
                if let Some(count) = n.as_u64() {
                    return Some(count);
                }
            }
            // OData v2 serializes __count as a string
            Some(Value::String(s)) => {
                if let Ok(count) = s.parse::<u64>() {
                    return Some(count);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_value_array_with_count() {
        let body = r#"{"@odata.count": 237, "value": [{"DocEntry": 1}, {"DocEntry": 2}]}"#;
        match parse_page(body).unwrap() {
            ParsedPage::Collection { rows, total_hint } => {
                assert_eq!(rows.len(), 2);
                assert_eq!(total_hint, Some(237));
            }
            other => panic!("unexpected shape: {:?}", other),
        }
    }

    #[test]
    fn parses_bare_array_without_count() {
        let body = r#"[{"DocEntry": 1}]"#;
        match parse_page(body).unwrap() {
            ParsedPage::Collection { rows, total_hint } => {
                assert_eq!(rows.len(), 1);
                assert_eq!(total_hint, None);
            }
            other => panic!("unexpected shape: {:?}", other),
        }
    }

    #[test]
    fn reads_string_encoded_count() {
        let body = r#"{"__count": "42", "value": []}"#;
        match parse_page(body).unwrap() {
            ParsedPage::Collection { total_hint, .. } => assert_eq!(total_hint, Some(42)),
            other => panic!("unexpected shape: {:?}", other),
        }
    }

    #[test]
    fn single_object_is_the_final_page() {
        let body = r#"{"DocEntry": 7, "CardCode": "C0001"}"#;
        match parse_page(body).unwrap() {
            ParsedPage::Single(row) => assert_eq!(row.get("DocEntry"), Some(&serde_json::json!(7))),
            other => panic!("unexpected shape: {:?}", other),
        }
    }

    #[test]
    fn invalid_json_is_malformed() {
        assert!(matches!(
            parse_page("<html>504</html>"),
            Err(InsightError::MalformedResponse(_))
        ));
    }

    #[test]
    fn non_object_row_is_malformed() {
        assert!(matches!(
            parse_page(r#"{"value": [1, 2, 3]}"#),
            Err(InsightError::MalformedResponse(_))
        ));
    }

    #[test]
    fn value_that_is_not_an_array_is_malformed() {
        assert!(matches!(
            parse_page(r#"{"value": "oops"}"#),
            Err(InsightError::MalformedResponse(_))
        ));
    }
}
