//! Chart recommendation types and the local, rule-based fallback.

use chrono::NaiveDate;
use itertools::Itertools;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::service_layer::Row;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartKind {
    Bar,
    Line,
    Pie,
    Table,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartRecommendation {
    pub chart: ChartKind,
    pub x_field: Option<String>,
    pub y_field: Option<String>,
    pub reason: String,
}

lazy_static! {
    static ref DATE_FIELD_NAME: Regex = Regex::new(r"(?i)(date|time|created|updated)").unwrap();
}

/// Proportional charts stop being readable outside this category range.
const PIE_CATEGORY_MIN: usize = 2;
const PIE_CATEGORY_MAX: usize = 8;

/// Pure, non-network fallback used whenever the LLM advisor is unavailable.
pub fn recommend_local(rows: &[Row], _question: &str) -> ChartRecommendation {
    let first = match rows.first() {
        Some(first) => first,
        None => {
            return ChartRecommendation {
                chart: ChartKind::Table,
                x_field: None,
                y_field: None,
                reason: "no rows to plot".to_string(),
            }
        }
    };

    let date_field = first
        .iter()
        .find(|(name, value)| looks_like_date(name, value))
        .map(|(name, _)| name.clone());
    let numeric_field = first
        .iter()
        .find(|(_, value)| value.is_number())
        .map(|(name, _)| name.clone());
    let category_field = first
        .iter()
        .find(|(name, value)| value.is_string() && !looks_like_date(name, value))
        .map(|(name, _)| name.clone());

    if let (Some(date), Some(numeric)) = (&date_field, &numeric_field) {
        return ChartRecommendation {
            chart: ChartKind::Line,
            x_field: Some(date.clone()),
            y_field: Some(numeric.clone()),
            reason: format!("{} over {} reads as a time series", numeric, date),
        };
    }

    if let (Some(category), Some(numeric)) = (&category_field, &numeric_field) {
        let distinct = rows
            .iter()
            .filter_map(|row| row.get(category))
            .map(|value| value.to_string())
            .unique()
            .count();
        if (PIE_CATEGORY_MIN..=PIE_CATEGORY_MAX).contains(&distinct) {
            return ChartRecommendation {
                chart: ChartKind::Pie,
                x_field: Some(category.clone()),
                y_field: Some(numeric.clone()),
                reason: format!("{} distinct {} values suit a proportional view", distinct, category),
            };
        }
        return ChartRecommendation {
            chart: ChartKind::Bar,
            x_field: Some(category.clone()),
            y_field: Some(numeric.clone()),
            reason: format!("{} by {}", numeric, category),
        };
    }

    ChartRecommendation {
        chart: ChartKind::Table,
        x_field: None,
        y_field: None,
        reason: "no plottable field combination found".to_string(),
    }
}

fn looks_like_date(name: &str, value: &Value) -> bool {
    if DATE_FIELD_NAME.is_match(name) {
        return true;
    }
    match value {
        Value::String(s) => {
            let head = s.get(..10).unwrap_or(s);
            NaiveDate::parse_from_str(head, "%Y-%m-%d").is_ok()
        }
        _ => false,
    }
}
