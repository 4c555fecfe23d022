use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::threshold::ThresholdEntry;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl Student {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: None,
        }
    }
}

/// A learning group as handed over by the roster collaborator. Read-only here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningGroup {
    pub id: String,
    pub scale_id: String,
    #[serde(default = "default_weight")]
    pub half_year_1_weight: f64,
    #[serde(default = "default_weight")]
    pub half_year_2_weight: f64,
}

fn default_weight() -> f64 {
    1.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum HalfYear {
    First,
    Second,
}

impl HalfYear {
    pub const ALL: [HalfYear; 2] = [HalfYear::First, HalfYear::Second];

    pub fn number(self) -> u8 {
        match self {
            HalfYear::First => 1,
            HalfYear::Second => 2,
        }
    }

    pub fn override_target(self) -> OverrideTarget {
        match self {
            HalfYear::First => OverrideTarget::HalfYear1,
            HalfYear::Second => OverrideTarget::HalfYear2,
        }
    }
}

impl TryFrom<u8> for HalfYear {
    type Error = String;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            1 => Ok(HalfYear::First),
            2 => Ok(HalfYear::Second),
            other => Err(format!("half year must be 1 or 2, got {}", other)),
        }
    }
}

impl From<HalfYear> for u8 {
    fn from(h: HalfYear) -> u8 {
        h.number()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CategoryKind {
    Oral,
    Written,
}

impl CategoryKind {
    pub const ALL: [CategoryKind; 2] = [CategoryKind::Oral, CategoryKind::Written];

    pub fn as_str(self) -> &'static str {
        match self {
            CategoryKind::Oral => "oral",
            CategoryKind::Written => "written",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "oral" => Some(CategoryKind::Oral),
            "written" => Some(CategoryKind::Written),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    pub id: String,
    pub group_id: String,
    pub half_year: HalfYear,
    pub kind: CategoryKind,
    pub weight: f64,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssessmentKind {
    Collection,
    Exam,
}

impl AssessmentKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "collection" => Some(AssessmentKind::Collection),
            "exam" => Some(AssessmentKind::Exam),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assessment {
    pub id: String,
    pub category_id: String,
    pub name: String,
    pub weight: f64,
    pub kind: AssessmentKind,
    /// Exam only: replaces the group scale's global threshold table.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold_override: Option<Vec<ThresholdEntry>>,
}

/// Einzelleistung of a collection assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubItem {
    pub id: String,
    pub assessment_id: String,
    pub name: String,
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeEntry {
    pub sub_item_id: String,
    pub student_id: String,
    pub grade: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remark: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Klausuraufgabe of an exam assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub assessment_id: String,
    pub name: String,
    pub max_points: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointsEntry {
    pub task_id: String,
    pub student_id: String,
    pub points: Option<f64>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OverrideTarget {
    #[serde(rename = "half-year-1")]
    HalfYear1,
    #[serde(rename = "half-year-2")]
    HalfYear2,
    #[serde(rename = "overall")]
    Overall,
}

impl OverrideTarget {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "half-year-1" => Some(OverrideTarget::HalfYear1),
            "half-year-2" => Some(OverrideTarget::HalfYear2),
            "overall" => Some(OverrideTarget::Overall),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManualOverride {
    pub student_id: String,
    pub group_id: String,
    pub target: OverrideTarget,
    pub grade: String,
}

/// Free-text feedback for one student on one assessment. Never graded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feedback {
    pub id: String,
    pub assessment_id: String,
    pub student_id: String,
    pub text: String,
    pub updated_at: DateTime<Utc>,
}
