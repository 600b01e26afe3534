//! Local row predicates.
//!
//! Some query intents cannot be expressed as a Service Layer `$filter`
//! (field-to-field comparisons, most notably). Those are applied here,
//! declaratively, after the fetch completes; applying them never re-issues
//! network calls.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::service_layer::Row;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RowPredicate {
    /// numeric(left) < numeric(right)
    FieldLtField { left: String, right: String },
    /// numeric(left) > numeric(right)
    FieldGtField { left: String, right: String },
}

impl RowPredicate {
    /// Rows missing either field, or carrying non-numeric values, never
    /// match.
    pub fn matches(&self, row: &Row) -> bool {
        match self {
            RowPredicate::FieldLtField { left, right } => {
                compare(row, left, right) == Some(Ordering::Less)
            }
            RowPredicate::FieldGtField { left, right } => {
                compare(row, left, right) == Some(Ordering::Greater)
            }
        }
    }
}

fn numeric(row: &Row, field: &str) -> Option<f64> {
    match row.get(field)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn compare(row: &Row, left: &str, right: &str) -> Option<Ordering> {
    let left = numeric(row, left)?;
    let right = numeric(row, right)?;
    left.partial_cmp(&right)
}

pub fn apply(rows: Vec<Row>, predicates: &[RowPredicate]) -> Vec<Row> {
    if predicates.is_empty() {
        return rows;
    }
    let before = rows.len();
    let kept: Vec<Row> = rows
        .into_iter()
        .filter(|row| predicates.iter().all(|predicate| predicate.matches(row)))
        .collect();
    debug!(before, after = kept.len(), "applied local post-filters");
    kept
}

/// Question-driven derivation of predicates the upstream cannot express,
/// keyed per resource.
pub fn derive(resource: &str, question: &str) -> Vec<RowPredicate> {
    let question = question.to_lowercase();
    let mut predicates = Vec::new();

    if resource == "Items"
        && ["below minimum", "under minimum", "below reorder", "need reorder", "understocked"]
            .iter()
            .any(|marker| question.contains(marker))
    {
        predicates.push(RowPredicate::FieldLtField {
            left: "QuantityOnStock".to_string(),
            right: "MinInventory".to_string(),
        });
    }

    predicates
}
