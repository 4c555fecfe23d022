use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;

use crate::model::Assessment;
use crate::scale;

/// Percentages are compared with this slack so that 70.0 computed as
/// 69.99999999999999 still reaches the 70 bracket.
const PERCENT_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdEntry {
    pub points: u8,
    pub percent_from: f64,
}

/// Global Notenschlüssel per grading-scale id.
pub type ThresholdMap = BTreeMap<String, Vec<ThresholdEntry>>;

const STANDARD_BRACKETS: [(u8, f64); 16] = [
    (15, 95.0),
    (14, 90.0),
    (13, 85.0),
    (12, 80.0),
    (11, 75.0),
    (10, 70.0),
    (9, 65.0),
    (8, 60.0),
    (7, 55.0),
    (6, 50.0),
    (5, 45.0),
    (4, 40.0),
    (3, 33.0),
    (2, 27.0),
    (1, 20.0),
    (0, 0.0),
];

/// Both built-in scales live on the 0..15 point domain and share one
/// default table. Unknown scale ids get the same brackets.
pub fn default_table(_scale_id: &str) -> Vec<ThresholdEntry> {
    STANDARD_BRACKETS
        .iter()
        .map(|&(points, percent_from)| ThresholdEntry {
            points,
            percent_from,
        })
        .collect()
}

pub fn default_map() -> ThresholdMap {
    scale::builtin_scales()
        .iter()
        .map(|s| (s.id.to_string(), default_table(s.id)))
        .collect()
}

/// Table for one scale from the global map, or its defaults.
pub fn global_table<'a>(map: &'a ThresholdMap, scale_id: &str) -> Cow<'a, [ThresholdEntry]> {
    match map.get(scale_id) {
        Some(t) if !t.is_empty() => Cow::Borrowed(t.as_slice()),
        _ => Cow::Owned(default_table(scale_id)),
    }
}

/// Assessment override wins over the global table of the group's scale.
pub fn effective_table<'a>(
    assessment: &'a Assessment,
    map: &'a ThresholdMap,
    scale_id: &str,
) -> Cow<'a, [ThresholdEntry]> {
    match assessment.threshold_override.as_deref() {
        Some(t) if !t.is_empty() => Cow::Borrowed(t),
        _ => global_table(map, scale_id),
    }
}

/// Point value for a percentage: the highest bracket whose threshold is
/// reached. Below every bracket yields 0.
pub fn lookup_points(table: &[ThresholdEntry], percent: f64) -> u8 {
    let mut sorted: Vec<&ThresholdEntry> = table.iter().collect();
    sorted.sort_by(|a, b| b.percent_from.total_cmp(&a.percent_from));
    sorted
        .into_iter()
        .find(|e| e.percent_from <= percent + PERCENT_EPSILON)
        .map(|e| e.points)
        .unwrap_or(0)
}

/// One editor row. `percent_from` is `None` while the field is empty.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThresholdRowInput {
    pub points: u8,
    pub percent_from: Option<f64>,
}

/// Rows that are safe to persist. Partially edited rows are dropped.
pub fn complete_rows(rows: &[ThresholdRowInput]) -> Vec<ThresholdEntry> {
    rows.iter()
        .filter_map(|r| {
            r.percent_from.map(|percent_from| ThresholdEntry {
                points: r.points,
                percent_from,
            })
        })
        .collect()
}
