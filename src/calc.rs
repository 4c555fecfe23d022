use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::model::{Assessment, GradeEntry, LearningGroup, PointsEntry, Student, SubItem, Task};
use crate::scale::{self, GradingScale};
use crate::threshold::{self, ThresholdMap};

pub const UNKNOWN_LABEL: &str = "?";

/// Running `Σ(value·weight) / Σ(weight)`.
///
/// Zero-weight contributions leave both sums untouched, so they are
/// indistinguishable from absent ones. `average()` is `None` until some
/// positive weight has been added.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WeightedAccumulator {
    weighted_sum: f64,
    total_weight: f64,
}

impl WeightedAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, value: f64, weight: f64) {
        self.weighted_sum += value * weight;
        self.total_weight += weight;
    }

    pub fn total_weight(&self) -> f64 {
        self.total_weight
    }

    pub fn average(&self) -> Option<f64> {
        if self.total_weight > 0.0 {
            Some(self.weighted_sum / self.total_weight)
        } else {
            None
        }
    }
}

/// Label lookup rounding: `floor(x + 0.5)`, ties go up.
pub fn round_half_up(x: f64) -> i64 {
    (x + 0.5).floor() as i64
}

/// `floor(100 * x + 0.5) / 100`
pub fn round_off_2_decimals(x: f64) -> f64 {
    ((100.0 * x) + 0.5).floor() / 100.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayStyle {
    pub decimal_separator: char,
}

impl Default for DisplayStyle {
    fn default() -> Self {
        Self {
            decimal_separator: ',',
        }
    }
}

impl DisplayStyle {
    pub fn format_2(&self, x: f64) -> String {
        let s = format!("{:.2}", round_off_2_decimals(x));
        if self.decimal_separator == '.' {
            s
        } else {
            s.replace('.', &self.decimal_separator.to_string())
        }
    }
}

/// Decimal rendering of a point value. The tendency scale shows the
/// classic 1.0..6.0 style grade `(17 - p) / 3`; every other scale shows
/// the points themselves.
pub fn display_decimal(scale_id: &str, points: f64, style: &DisplayStyle) -> String {
    if scale_id == scale::TENDENCY_SCALE_ID {
        style.format_2((17.0 - points) / 3.0)
    } else {
        format!("{} P.", style.format_2(points))
    }
}

pub fn label_or_unknown(scale: &GradingScale, points: i64) -> String {
    match scale.label_for(points) {
        Some(label) => label.to_string(),
        None => {
            tracing::warn!(
                scale_id = scale.id,
                points,
                "point value has no label in grading scale"
            );
            UNKNOWN_LABEL.to_string()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExamFigures {
    pub total_points: f64,
    pub max_points: f64,
    pub percent: f64,
}

/// Derived value for one student in one column.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteEntry {
    pub final_grade: String,
    pub display_decimal: String,
    pub average_points: f64,
    pub is_manual: bool,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub exam: Option<ExamFigures>,
}

impl NoteEntry {
    /// Entry for a fractional average: the label rounds, `average_points`
    /// keeps the exact value for the next level up.
    pub fn from_average(
        scale: &GradingScale,
        group: &LearningGroup,
        average: f64,
        style: &DisplayStyle,
    ) -> Self {
        Self {
            final_grade: label_or_unknown(scale, round_half_up(average)),
            display_decimal: display_decimal(&group.scale_id, average, style),
            average_points: average,
            is_manual: false,
            exam: None,
        }
    }

    pub fn manual(
        scale: &GradingScale,
        group: &LearningGroup,
        label: &str,
        style: &DisplayStyle,
    ) -> Option<Self> {
        let points = f64::from(scale.points_for(label)?);
        Some(Self {
            final_grade: label.trim().to_string(),
            display_decimal: display_decimal(&group.scale_id, points, style),
            average_points: points,
            is_manual: true,
            exam: None,
        })
    }
}

/// Sammelnote: weighted mean of the graded sub-items per student.
pub fn aggregate_collection<'a>(
    students: &[Student],
    sub_items: &[&SubItem],
    grade_entries: impl IntoIterator<Item = &'a GradeEntry>,
    scale: &GradingScale,
    group: &LearningGroup,
    style: &DisplayStyle,
) -> HashMap<String, NoteEntry> {
    let mut grades: HashMap<(&str, &str), &GradeEntry> = HashMap::new();
    for e in grade_entries {
        grades.insert((e.sub_item_id.as_str(), e.student_id.as_str()), e);
    }

    let mut out = HashMap::new();
    for student in students {
        let mut acc = WeightedAccumulator::new();
        for item in sub_items {
            let Some(entry) = grades.get(&(item.id.as_str(), student.id.as_str())) else {
                continue;
            };
            let Some(points) = scale.points_for(&entry.grade) else {
                tracing::warn!(
                    student_id = %student.id,
                    sub_item_id = %item.id,
                    grade = %entry.grade,
                    "grade label not in scale, entry ignored"
                );
                continue;
            };
            acc.add(f64::from(points), item.weight);
        }
        let Some(average) = acc.average() else {
            continue;
        };
        out.insert(
            student.id.clone(),
            NoteEntry::from_average(scale, group, average, style),
        );
    }
    out
}

/// Klausur: summed task points resolved through the threshold table.
///
/// A student takes part once any entry carries a value (a recorded 0
/// counts). Tasks without an entry then add 0 to the total.
#[allow(clippy::too_many_arguments)]
pub fn aggregate_exam<'a>(
    students: &[Student],
    tasks: &[&Task],
    points_entries: impl IntoIterator<Item = &'a PointsEntry>,
    assessment: &Assessment,
    scale: &GradingScale,
    group: &LearningGroup,
    thresholds: &ThresholdMap,
    style: &DisplayStyle,
) -> HashMap<String, NoteEntry> {
    let mut points: HashMap<(&str, &str), Option<f64>> = HashMap::new();
    let mut participating: HashSet<&str> = HashSet::new();
    for e in points_entries {
        if e.points.is_some() {
            participating.insert(e.student_id.as_str());
        }
        points.insert((e.task_id.as_str(), e.student_id.as_str()), e.points);
    }

    let mut out = HashMap::new();
    if participating.is_empty() {
        return out;
    }

    let max_points: f64 = tasks.iter().map(|t| t.max_points).sum();
    let table = threshold::effective_table(assessment, thresholds, &group.scale_id);

    for student in students {
        if !participating.contains(student.id.as_str()) {
            continue;
        }
        let total_points: f64 = tasks
            .iter()
            .map(|t| {
                points
                    .get(&(t.id.as_str(), student.id.as_str()))
                    .copied()
                    .flatten()
                    .unwrap_or(0.0)
            })
            .sum();

        let (percent, point_value) = if max_points > 0.0 {
            let percent = total_points * 100.0 / max_points;
            (percent, threshold::lookup_points(&table, percent))
        } else {
            (0.0, 0)
        };

        let point_value_f = f64::from(point_value);
        out.insert(
            student.id.clone(),
            NoteEntry {
                final_grade: label_or_unknown(scale, i64::from(point_value)),
                display_decimal: display_decimal(&group.scale_id, point_value_f, style),
                average_points: point_value_f,
                is_manual: false,
                exam: Some(ExamFigures {
                    total_points,
                    max_points,
                    percent,
                }),
            },
        );
    }
    out
}

/// Scores above the task maximum are kept and flagged.
pub fn is_bonus(points: Option<f64>, max_points: f64) -> bool {
    points.map(|p| p > max_points).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AssessmentKind;
    use crate::scale::{find_scale, POINTS_SCALE_ID, TENDENCY_SCALE_ID};
    use crate::threshold::ThresholdEntry;
    use chrono::Utc;

    fn group(scale_id: &str) -> LearningGroup {
        LearningGroup {
            id: "g1".into(),
            scale_id: scale_id.into(),
            half_year_1_weight: 1.0,
            half_year_2_weight: 1.0,
        }
    }

    fn sub(id: &str, weight: f64) -> SubItem {
        SubItem {
            id: id.into(),
            assessment_id: "a1".into(),
            name: id.into(),
            weight,
        }
    }

    fn grade(sub_item: &str, student: &str, label: &str) -> GradeEntry {
        GradeEntry {
            sub_item_id: sub_item.into(),
            student_id: student.into(),
            grade: label.into(),
            remark: None,
            updated_at: Utc::now(),
        }
    }

    fn task(id: &str, max_points: f64) -> Task {
        Task {
            id: id.into(),
            assessment_id: "a1".into(),
            name: id.into(),
            max_points,
        }
    }

    fn pts(task_id: &str, student: &str, points: Option<f64>) -> PointsEntry {
        PointsEntry {
            task_id: task_id.into(),
            student_id: student.into(),
            points,
            updated_at: Utc::now(),
        }
    }

    fn exam() -> Assessment {
        Assessment {
            id: "a1".into(),
            category_id: "c1".into(),
            name: "Klausur".into(),
            weight: 1.0,
            kind: AssessmentKind::Exam,
            threshold_override: None,
        }
    }

    #[test]
    fn accumulator_distinguishes_no_data_from_zero() {
        let mut acc = WeightedAccumulator::new();
        assert_eq!(acc.average(), None);
        acc.add(12.0, 0.0);
        assert_eq!(acc.average(), None);
        acc.add(0.0, 2.0);
        assert_eq!(acc.average(), Some(0.0));
    }

    #[test]
    fn round_half_up_ties() {
        assert_eq!(round_half_up(8.5), 9);
        assert_eq!(round_half_up(8.4999), 8);
        assert_eq!(round_half_up(0.0), 0);
    }

    #[test]
    fn display_decimal_conventions() {
        let style = DisplayStyle::default();
        assert_eq!(display_decimal(TENDENCY_SCALE_ID, 15.0, &style), "0,67");
        assert_eq!(display_decimal(TENDENCY_SCALE_ID, 0.0, &style), "5,67");
        assert_eq!(display_decimal(POINTS_SCALE_ID, 13.0, &style), "13,00 P.");
        let dot = DisplayStyle {
            decimal_separator: '.',
        };
        assert_eq!(display_decimal(POINTS_SCALE_ID, 9.0 + 1.0 / 3.0, &dot), "9.33 P.");
    }

    #[test]
    fn collection_weighted_tendency_average() {
        let scale = find_scale(TENDENCY_SCALE_ID).unwrap();
        let g = group(TENDENCY_SCALE_ID);
        let s1 = sub("s1", 1.0);
        let s2 = sub("s2", 2.0);
        let entries = vec![grade("s1", "st1", "2+"), grade("s2", "st1", "3")];
        let res = aggregate_collection(
            &[Student::new("st1")],
            &[&s1, &s2],
            &entries,
            scale,
            &g,
            &DisplayStyle::default(),
        );
        let e = res.get("st1").expect("entry");
        assert!((e.average_points - 28.0 / 3.0).abs() < 1e-9);
        assert_eq!(e.final_grade, "3+");
        assert_eq!(e.display_decimal, "2,56");
        assert!(!e.is_manual);
    }

    #[test]
    fn collection_all_zero_weight_has_no_entry() {
        let scale = find_scale(POINTS_SCALE_ID).unwrap();
        let g = group(POINTS_SCALE_ID);
        let s1 = sub("s1", 0.0);
        let entries = vec![grade("s1", "st1", "12")];
        let res = aggregate_collection(
            &[Student::new("st1")],
            &[&s1],
            &entries,
            scale,
            &g,
            &DisplayStyle::default(),
        );
        assert!(res.is_empty());
    }

    #[test]
    fn exam_round_trip_points_scale() {
        let scale = find_scale(POINTS_SCALE_ID).unwrap();
        let g = group(POINTS_SCALE_ID);
        let t1 = task("t1", 10.0);
        let t2 = task("t2", 20.0);
        let entries = vec![pts("t1", "st1", Some(8.5)), pts("t2", "st1", Some(17.0))];
        let res = aggregate_exam(
            &[Student::new("st1")],
            &[&t1, &t2],
            &entries,
            &exam(),
            scale,
            &g,
            &threshold::default_map(),
            &DisplayStyle::default(),
        );
        let e = res.get("st1").expect("entry");
        assert_eq!(e.final_grade, "13");
        let fig = e.exam.expect("exam figures");
        assert!((fig.total_points - 25.5).abs() < 1e-9);
        assert!((fig.percent - 85.0).abs() < 1e-9);
        assert_eq!(e.average_points, 13.0);
    }

    #[test]
    fn exam_null_points_count_as_zero_for_participants() {
        let scale = find_scale(POINTS_SCALE_ID).unwrap();
        let g = group(POINTS_SCALE_ID);
        let t1 = task("t1", 10.0);
        let t2 = task("t2", 10.0);
        let entries = vec![pts("t1", "st1", Some(10.0)), pts("t2", "st1", None)];
        let res = aggregate_exam(
            &[Student::new("st1"), Student::new("st2")],
            &[&t1, &t2],
            &entries,
            &exam(),
            scale,
            &g,
            &threshold::default_map(),
            &DisplayStyle::default(),
        );
        assert_eq!(res.len(), 1);
        let fig = res["st1"].exam.unwrap();
        assert_eq!(fig.total_points, 10.0);
        assert_eq!(fig.percent, 50.0);
        assert_eq!(res["st1"].final_grade, "6");
    }

    #[test]
    fn exam_without_tasks_is_a_defined_zero() {
        let scale = find_scale(TENDENCY_SCALE_ID).unwrap();
        let g = group(TENDENCY_SCALE_ID);
        let entries = vec![pts("gone", "st1", Some(0.0))];
        let res = aggregate_exam(
            &[Student::new("st1")],
            &[],
            &entries,
            &exam(),
            scale,
            &g,
            &threshold::default_map(),
            &DisplayStyle::default(),
        );
        let e = &res["st1"];
        assert_eq!(e.final_grade, "6");
        assert_eq!(e.exam.unwrap().percent, 0.0);
    }

    #[test]
    fn exam_without_entries_is_empty() {
        let scale = find_scale(POINTS_SCALE_ID).unwrap();
        let t1 = task("t1", 10.0);
        let res = aggregate_exam(
            &[Student::new("st1"), Student::new("st2")],
            &[&t1],
            &Vec::<PointsEntry>::new(),
            &exam(),
            scale,
            &group(POINTS_SCALE_ID),
            &threshold::default_map(),
            &DisplayStyle::default(),
        );
        assert_eq!(res.len(), 0);
    }

    #[test]
    fn bonus_is_flagged_not_rejected() {
        assert!(is_bonus(Some(11.0), 10.0));
        assert!(!is_bonus(Some(10.0), 10.0));
        assert!(!is_bonus(None, 10.0));
    }

    #[test]
    fn point_value_outside_scale_gets_question_mark() {
        let scale = find_scale(POINTS_SCALE_ID).unwrap();
        assert_eq!(label_or_unknown(scale, 16), UNKNOWN_LABEL);
        assert_eq!(label_or_unknown(scale, -1), "?");
        assert_eq!(label_or_unknown(scale, 15), "15");
    }

    #[test]
    fn exam_table_beyond_scale_yields_question_mark() {
        let scale = find_scale(TENDENCY_SCALE_ID).unwrap();
        let g = group(TENDENCY_SCALE_ID);
        let mut a = exam();
        a.threshold_override = Some(vec![
            ThresholdEntry {
                points: 16,
                percent_from: 90.0,
            },
            ThresholdEntry {
                points: 0,
                percent_from: 0.0,
            },
        ]);
        let t1 = task("t1", 10.0);
        let entries = vec![pts("t1", "st1", Some(10.0)), pts("t1", "st2", Some(2.0))];
        let res = aggregate_exam(
            &[Student::new("st1"), Student::new("st2")],
            &[&t1],
            &entries,
            &a,
            scale,
            &g,
            &threshold::default_map(),
            &DisplayStyle::default(),
        );
        assert_eq!(res["st1"].final_grade, "?");
        assert_eq!(res["st1"].average_points, 16.0);
        assert_eq!(res["st2"].final_grade, "6");
    }
}
