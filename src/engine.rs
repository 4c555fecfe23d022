//! Hierarchy recalculation: assessment -> category -> half year -> overall.
//!
//! Every level lives on the 0..15 point domain, so each parent is a plain
//! weighted mean of its children's unrounded `average_points`.

use serde::Serialize;
use std::collections::{HashMap, HashSet};

use crate::calc::{self, DisplayStyle, NoteEntry, WeightedAccumulator};
use crate::error::{GradebookError, GradebookResult};
use crate::model::{AssessmentKind, CategoryKind, HalfYear, LearningGroup, OverrideTarget, Student};
use crate::scale::{self, GradingScale};
use crate::state::GradebookState;

pub const OVERALL_COLUMN_ID: &str = "overall";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteKey {
    pub student_id: String,
    pub column_id: String,
}

impl NoteKey {
    pub fn new(student_id: impl Into<String>, column_id: impl Into<String>) -> Self {
        Self {
            student_id: student_id.into(),
            column_id: column_id.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ColumnKind {
    OverallAvg,
    #[serde(rename_all = "camelCase")]
    HalfYearAvg { half_year: HalfYear },
    /// `category_id` is `None` while the category does not exist yet.
    #[serde(rename_all = "camelCase")]
    CategoryAvg {
        half_year: HalfYear,
        kind: CategoryKind,
        category_id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Assessment {
        half_year: HalfYear,
        kind: CategoryKind,
        assessment_id: String,
        assessment_kind: AssessmentKind,
        weight: f64,
    },
    #[serde(rename_all = "camelCase")]
    Placeholder { half_year: HalfYear, kind: CategoryKind },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    pub id: String,
    pub title: String,
    #[serde(flatten)]
    pub kind: ColumnKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NoteLevel {
    Assessment,
    Category,
    HalfYear,
    Overall,
}

impl NoteLevel {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "assessment" => Some(Self::Assessment),
            "category" => Some(Self::Category),
            "halfYear" => Some(Self::HalfYear),
            "overall" => Some(Self::Overall),
            _ => None,
        }
    }
}

pub type NoteMap = HashMap<NoteKey, NoteEntry>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecalcMode {
    Full,
    Targeted,
    Cleared,
    /// Raw data changed without touching the derived maps.
    Unchanged,
}

/// What the last recalculation touched. Handed to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct RecalcSummary {
    pub mode: RecalcMode,
    pub group_id: Option<String>,
    pub student_ids: Vec<String>,
}

fn half_year_column_id(half_year: HalfYear) -> String {
    format!("hy{}-avg", half_year.number())
}

fn category_column_id(half_year: HalfYear, kind: CategoryKind) -> String {
    format!("hy{}-{}-avg", half_year.number(), kind.as_str())
}

fn placeholder_column_id(half_year: HalfYear, kind: CategoryKind) -> String {
    format!("hy{}-{}-empty", half_year.number(), kind.as_str())
}

fn default_category_title(half_year: HalfYear, kind: CategoryKind) -> String {
    let k = match kind {
        CategoryKind::Oral => "Mündlich",
        CategoryKind::Written => "Schriftlich",
    };
    format!("{} HJ{}", k, half_year.number())
}

/// Ordered column list for a group.
pub fn build_columns(state: &GradebookState, group: &LearningGroup) -> Vec<Column> {
    let mut columns = vec![Column {
        id: OVERALL_COLUMN_ID.to_string(),
        title: "Gesamt".to_string(),
        kind: ColumnKind::OverallAvg,
    }];

    for half_year in HalfYear::ALL {
        columns.push(Column {
            id: half_year_column_id(half_year),
            title: format!("HJ{}", half_year.number()),
            kind: ColumnKind::HalfYearAvg { half_year },
        });

        for kind in CategoryKind::ALL {
            let category = state.category_for(&group.id, half_year, kind);
            columns.push(Column {
                id: category_column_id(half_year, kind),
                title: category
                    .map(|c| c.name.clone())
                    .unwrap_or_else(|| default_category_title(half_year, kind)),
                kind: ColumnKind::CategoryAvg {
                    half_year,
                    kind,
                    category_id: category.map(|c| c.id.clone()),
                },
            });

            let before = columns.len();
            if let Some(category) = category {
                for a in state.assessments_of(&category.id) {
                    columns.push(Column {
                        id: a.id.clone(),
                        title: a.name.clone(),
                        kind: ColumnKind::Assessment {
                            half_year,
                            kind,
                            assessment_id: a.id.clone(),
                            assessment_kind: a.kind,
                            weight: a.weight,
                        },
                    });
                }
            }
            if columns.len() == before {
                columns.push(Column {
                    id: placeholder_column_id(half_year, kind),
                    title: String::new(),
                    kind: ColumnKind::Placeholder { half_year, kind },
                });
            }
        }
    }
    columns
}

/// Owns the column layout and the four derived note maps of one group context.
#[derive(Debug, Default)]
pub struct RecalcEngine {
    style: DisplayStyle,
    layout_group: Option<String>,
    columns: Vec<Column>,
    assessment_notes: NoteMap,
    category_notes: NoteMap,
    half_year_notes: NoteMap,
    overall_notes: NoteMap,
}

impl RecalcEngine {
    pub fn new(style: DisplayStyle) -> Self {
        Self {
            style,
            ..Self::default()
        }
    }

    pub fn style(&self) -> &DisplayStyle {
        &self.style
    }

    /// Takes effect with the next recalculation.
    pub fn set_style(&mut self, style: DisplayStyle) {
        self.style = style;
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn layout_group(&self) -> Option<&str> {
        self.layout_group.as_deref()
    }

    pub fn notes(&self, level: NoteLevel) -> &NoteMap {
        match level {
            NoteLevel::Assessment => &self.assessment_notes,
            NoteLevel::Category => &self.category_notes,
            NoteLevel::HalfYear => &self.half_year_notes,
            NoteLevel::Overall => &self.overall_notes,
        }
    }

    pub fn note(&self, level: NoteLevel, student_id: &str, column_id: &str) -> Option<&NoteEntry> {
        self.notes(level).get(&NoteKey::new(student_id, column_id))
    }

    pub fn assessment_notes(&self) -> &NoteMap {
        &self.assessment_notes
    }

    pub fn category_notes(&self) -> &NoteMap {
        &self.category_notes
    }

    pub fn half_year_notes(&self) -> &NoteMap {
        &self.half_year_notes
    }

    pub fn overall_notes(&self) -> &NoteMap {
        &self.overall_notes
    }

    pub fn clear(&mut self) -> RecalcSummary {
        self.layout_group = None;
        self.columns.clear();
        self.assessment_notes.clear();
        self.category_notes.clear();
        self.half_year_notes.clear();
        self.overall_notes.clear();
        RecalcSummary {
            mode: RecalcMode::Cleared,
            group_id: None,
            student_ids: Vec::new(),
        }
    }

    /// `None` clears everything, otherwise a full recalculation.
    pub fn recalculate(
        &mut self,
        state: &GradebookState,
        group: Option<&LearningGroup>,
        students: &[Student],
    ) -> RecalcSummary {
        match group {
            Some(g) => self.recalculate_all(state, g, students),
            None => self.clear(),
        }
    }

    /// Rebuild the column layout and recompute every student.
    pub fn recalculate_all(
        &mut self,
        state: &GradebookState,
        group: &LearningGroup,
        students: &[Student],
    ) -> RecalcSummary {
        self.columns = build_columns(state, group);
        self.layout_group = Some(group.id.clone());
        self.assessment_notes.clear();
        self.category_notes.clear();
        self.half_year_notes.clear();
        self.overall_notes.clear();

        tracing::debug!(
            group_id = %group.id,
            students = students.len(),
            columns = self.columns.len(),
            "full recalculation"
        );
        self.compute(state, group, students);

        RecalcSummary {
            mode: RecalcMode::Full,
            group_id: Some(group.id.clone()),
            student_ids: students.iter().map(|s| s.id.clone()).collect(),
        }
    }

    /// Recompute only the named students on the existing layout. Falls back
    /// to a full run when no layout exists for this group yet.
    pub fn recalculate_for(
        &mut self,
        state: &GradebookState,
        group: &LearningGroup,
        students: &[Student],
        student_ids: &[String],
    ) -> GradebookResult<RecalcSummary> {
        let mut scoped: Vec<Student> = Vec::with_capacity(student_ids.len());
        for id in student_ids {
            let Some(s) = students.iter().find(|s| &s.id == id) else {
                return Err(GradebookError::UnknownStudent {
                    student_id: id.clone(),
                });
            };
            if !scoped.iter().any(|x| x.id == s.id) {
                scoped.push(s.clone());
            }
        }

        if self.layout_group.as_deref() != Some(group.id.as_str()) {
            tracing::debug!(
                group_id = %group.id,
                "no layout for group, running full recalculation"
            );
            return Ok(self.recalculate_all(state, group, students));
        }

        let ids: HashSet<&str> = scoped.iter().map(|s| s.id.as_str()).collect();
        for map in [
            &mut self.assessment_notes,
            &mut self.category_notes,
            &mut self.half_year_notes,
            &mut self.overall_notes,
        ] {
            map.retain(|k, _| !ids.contains(k.student_id.as_str()));
        }

        tracing::debug!(
            group_id = %group.id,
            students = scoped.len(),
            "targeted recalculation"
        );
        self.compute(state, group, &scoped);

        Ok(RecalcSummary {
            mode: RecalcMode::Targeted,
            group_id: Some(group.id.clone()),
            student_ids: scoped.into_iter().map(|s| s.id).collect(),
        })
    }

    fn compute(&mut self, state: &GradebookState, group: &LearningGroup, students: &[Student]) {
        let scale = scale::resolve_scale(&group.scale_id);
        self.compute_assessments(state, group, scale, students);
        self.compute_categories(state, group, scale, students);
        self.compute_half_years(state, group, scale, students);
        self.compute_overall(state, group, scale, students);
    }

    fn compute_assessments(
        &mut self,
        state: &GradebookState,
        group: &LearningGroup,
        scale: &GradingScale,
        students: &[Student],
    ) {
        for col in &self.columns {
            let ColumnKind::Assessment { assessment_id, .. } = &col.kind else {
                continue;
            };
            let Some(assessment) = state.assessment(assessment_id) else {
                continue;
            };
            let results = match assessment.kind {
                AssessmentKind::Collection => {
                    let items = state.sub_items_of(&assessment.id);
                    let ids: HashSet<&str> = items.iter().map(|s| s.id.as_str()).collect();
                    calc::aggregate_collection(
                        students,
                        &items,
                        state
                            .grade_entries
                            .iter()
                            .filter(|e| ids.contains(e.sub_item_id.as_str())),
                        scale,
                        group,
                        &self.style,
                    )
                }
                AssessmentKind::Exam => {
                    let tasks = state.tasks_of(&assessment.id);
                    let ids: HashSet<&str> = tasks.iter().map(|t| t.id.as_str()).collect();
                    calc::aggregate_exam(
                        students,
                        &tasks,
                        state
                            .points_entries
                            .iter()
                            .filter(|e| ids.contains(e.task_id.as_str())),
                        assessment,
                        scale,
                        group,
                        &state.thresholds,
                        &self.style,
                    )
                }
            };
            for (student_id, note) in results {
                self.assessment_notes
                    .insert(NoteKey::new(student_id, col.id.clone()), note);
            }
        }
    }

    fn compute_categories(
        &mut self,
        _state: &GradebookState,
        group: &LearningGroup,
        scale: &GradingScale,
        students: &[Student],
    ) {
        for col in &self.columns {
            let ColumnKind::CategoryAvg { half_year, kind, .. } = &col.kind else {
                continue;
            };
            let children: Vec<(&str, f64)> = self
                .columns
                .iter()
                .filter_map(|c| match &c.kind {
                    ColumnKind::Assessment {
                        half_year: h,
                        kind: k,
                        weight,
                        ..
                    } if h == half_year && k == kind => Some((c.id.as_str(), *weight)),
                    _ => None,
                })
                .collect();

            for student in students {
                let mut acc = WeightedAccumulator::new();
                for (column_id, weight) in &children {
                    if let Some(n) = self
                        .assessment_notes
                        .get(&NoteKey::new(student.id.as_str(), *column_id))
                    {
                        acc.add(n.average_points, *weight);
                    }
                }
                if let Some(avg) = acc.average() {
                    self.category_notes.insert(
                        NoteKey::new(student.id.as_str(), col.id.as_str()),
                        NoteEntry::from_average(scale, group, avg, &self.style),
                    );
                }
            }
        }
    }

    fn compute_half_years(
        &mut self,
        state: &GradebookState,
        group: &LearningGroup,
        scale: &GradingScale,
        students: &[Student],
    ) {
        for half_year in HalfYear::ALL {
            let column_id = half_year_column_id(half_year);
            let children: Vec<(String, f64)> = CategoryKind::ALL
                .iter()
                .map(|&kind| {
                    let weight = state
                        .category_for(&group.id, half_year, kind)
                        .map(|c| c.weight)
                        .unwrap_or(1.0);
                    (category_column_id(half_year, kind), weight)
                })
                .collect();

            for student in students {
                let key = NoteKey::new(student.id.as_str(), column_id.as_str());
                let target = half_year.override_target();
                if let Some(n) = self.manual_note(state, group, scale, &student.id, target) {
                    self.half_year_notes.insert(key, n);
                    continue;
                }
                let mut acc = WeightedAccumulator::new();
                for (child_id, weight) in &children {
                    if let Some(n) = self
                        .category_notes
                        .get(&NoteKey::new(student.id.as_str(), child_id.as_str()))
                    {
                        acc.add(n.average_points, *weight);
                    }
                }
                if let Some(avg) = acc.average() {
                    self.half_year_notes
                        .insert(key, NoteEntry::from_average(scale, group, avg, &self.style));
                }
            }
        }
    }

    fn compute_overall(
        &mut self,
        state: &GradebookState,
        group: &LearningGroup,
        scale: &GradingScale,
        students: &[Student],
    ) {
        let children = [
            (half_year_column_id(HalfYear::First), group.half_year_1_weight),
            (half_year_column_id(HalfYear::Second), group.half_year_2_weight),
        ];
        for student in students {
            let key = NoteKey::new(student.id.as_str(), OVERALL_COLUMN_ID);
            let target = OverrideTarget::Overall;
            if let Some(n) = self.manual_note(state, group, scale, &student.id, target) {
                self.overall_notes.insert(key, n);
                continue;
            }
            let mut acc = WeightedAccumulator::new();
            for (child_id, weight) in &children {
                if let Some(n) = self
                    .half_year_notes
                    .get(&NoteKey::new(student.id.as_str(), child_id.as_str()))
                {
                    acc.add(n.average_points, *weight);
                }
            }
            if let Some(avg) = acc.average() {
                self.overall_notes
                    .insert(key, NoteEntry::from_average(scale, group, avg, &self.style));
            }
        }
    }

    fn manual_note(
        &self,
        state: &GradebookState,
        group: &LearningGroup,
        scale: &GradingScale,
        student_id: &str,
        target: OverrideTarget,
    ) -> Option<NoteEntry> {
        let record = state.overrides.get(student_id, &group.id, target)?;
        let note = NoteEntry::manual(scale, group, &record.grade, &self.style);
        if note.is_none() {
            tracing::warn!(
                student_id,
                group_id = %group.id,
                grade = %record.grade,
                "manual grade not in scale, using computed value"
            );
        }
        note
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        Assessment, Category, GradeEntry, ManualOverride, PointsEntry, SubItem, Task,
    };
    use crate::scale::{POINTS_SCALE_ID, TENDENCY_SCALE_ID};
    use chrono::Utc;

    fn group(scale_id: &str) -> LearningGroup {
        LearningGroup {
            id: "g1".into(),
            scale_id: scale_id.into(),
            half_year_1_weight: 1.0,
            half_year_2_weight: 1.0,
        }
    }

    fn category(id: &str, half_year: HalfYear, kind: CategoryKind, weight: f64) -> Category {
        Category {
            id: id.into(),
            group_id: "g1".into(),
            half_year,
            kind,
            weight,
            name: id.into(),
        }
    }

    fn collection(id: &str, category_id: &str, weight: f64) -> Assessment {
        Assessment {
            id: id.into(),
            category_id: category_id.into(),
            name: id.into(),
            weight,
            kind: AssessmentKind::Collection,
            threshold_override: None,
        }
    }

    fn sub(id: &str, assessment_id: &str, weight: f64) -> SubItem {
        SubItem {
            id: id.into(),
            assessment_id: assessment_id.into(),
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

    fn roster() -> Vec<Student> {
        vec![Student::new("s1"), Student::new("s2")]
    }

    /// HJ1: oral (weight 1) with one collection, written (weight 2) with one exam.
    fn sample_state() -> GradebookState {
        let mut st = GradebookState::default();
        st.categories = vec![
            category("c-oral", HalfYear::First, CategoryKind::Oral, 1.0),
            category("c-written", HalfYear::First, CategoryKind::Written, 2.0),
        ];
        st.assessments = vec![
            collection("a-oral", "c-oral", 1.0),
            Assessment {
                id: "a-exam".into(),
                category_id: "c-written".into(),
                name: "Klausur".into(),
                weight: 1.0,
                kind: AssessmentKind::Exam,
                threshold_override: None,
            },
        ];
        st.sub_items = vec![sub("i1", "a-oral", 1.0)];
        st.grade_entries = vec![grade("i1", "s1", "9"), grade("i1", "s2", "12")];
        st.tasks = vec![Task {
            id: "t1".into(),
            assessment_id: "a-exam".into(),
            name: "A1".into(),
            max_points: 20.0,
        }];
        st.points_entries = vec![PointsEntry {
            task_id: "t1".into(),
            student_id: "s1".into(),
            points: Some(17.0),
            updated_at: Utc::now(),
        }];
        st
    }

    #[test]
    fn column_layout_with_placeholders() {
        let st = sample_state();
        let cols = build_columns(&st, &group(POINTS_SCALE_ID));
        let ids: Vec<&str> = cols.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "overall",
                "hy1-avg",
                "hy1-oral-avg",
                "a-oral",
                "hy1-written-avg",
                "a-exam",
                "hy2-avg",
                "hy2-oral-avg",
                "hy2-oral-empty",
                "hy2-written-avg",
                "hy2-written-empty",
            ]
        );
        assert!(matches!(
            cols[7].kind,
            ColumnKind::CategoryAvg { category_id: None, .. }
        ));
    }

    #[test]
    fn full_recalculation_walks_the_hierarchy() {
        let st = sample_state();
        let g = group(POINTS_SCALE_ID);
        let mut engine = RecalcEngine::default();
        engine.recalculate_all(&st, &g, &roster());

        // s1: oral 9, exam 85% -> 13; hy1 = (9*1 + 13*2) / 3
        let hy1 = engine.note(NoteLevel::HalfYear, "s1", "hy1-avg").expect("hy1");
        assert!((hy1.average_points - 35.0 / 3.0).abs() < 1e-9);
        assert_eq!(hy1.final_grade, "12");
        let overall = engine.note(NoteLevel::Overall, "s1", OVERALL_COLUMN_ID).expect("overall");
        assert!((overall.average_points - 35.0 / 3.0).abs() < 1e-9);

        // s2 has no exam entry: written category absent, hy1 = oral only.
        assert!(engine.note(NoteLevel::Assessment, "s2", "a-exam").is_none());
        assert!(engine.note(NoteLevel::Category, "s2", "hy1-written-avg").is_none());
        let hy1 = engine.note(NoteLevel::HalfYear, "s2", "hy1-avg").expect("hy1");
        assert_eq!(hy1.average_points, 12.0);
        assert!(engine.note(NoteLevel::HalfYear, "s2", "hy2-avg").is_none());
    }

    #[test]
    fn zero_weight_assessment_is_invisible_to_category() {
        let mut st = sample_state();
        st.assessments.push(collection("a-zero", "c-oral", 0.0));
        st.sub_items.push(sub("i2", "a-zero", 1.0));
        st.grade_entries.push(grade("i2", "s1", "0"));
        let g = group(POINTS_SCALE_ID);
        let mut engine = RecalcEngine::default();
        engine.recalculate_all(&st, &g, &roster());

        assert!(engine.note(NoteLevel::Assessment, "s1", "a-zero").is_some());
        let cat = engine.note(NoteLevel::Category, "s1", "hy1-oral-avg").unwrap();
        assert_eq!(cat.average_points, 9.0);
    }

    #[test]
    fn manual_override_short_circuits_and_reverts() {
        let mut st = sample_state();
        let g = group(TENDENCY_SCALE_ID);
        st.grade_entries = vec![grade("i1", "s1", "3"), grade("i1", "s2", "2")];
        st.overrides.set(ManualOverride {
            student_id: "s1".into(),
            group_id: "g1".into(),
            target: OverrideTarget::HalfYear1,
            grade: "1".into(),
        });
        let mut engine = RecalcEngine::default();
        engine.recalculate_all(&st, &g, &roster());

        let hy1 = engine.note(NoteLevel::HalfYear, "s1", "hy1-avg").unwrap();
        assert!(hy1.is_manual);
        assert_eq!(hy1.final_grade, "1");
        assert_eq!(hy1.average_points, 14.0);
        // Category level is untouched by the override.
        assert!(!engine.note(NoteLevel::Category, "s1", "hy1-oral-avg").unwrap().is_manual);
        // Overall consumes the overridden half year.
        assert_eq!(
            engine
                .note(NoteLevel::Overall, "s1", OVERALL_COLUMN_ID)
                .unwrap()
                .average_points,
            14.0
        );

        st.overrides.delete("s1", "g1", OverrideTarget::HalfYear1);
        engine
            .recalculate_for(&st, &g, &roster(), &["s1".to_string()])
            .unwrap();
        let hy1 = engine.note(NoteLevel::HalfYear, "s1", "hy1-avg").unwrap();
        assert!(!hy1.is_manual);
    }

    #[test]
    fn targeted_matches_full() {
        let mut st = sample_state();
        let g = group(POINTS_SCALE_ID);
        let mut engine = RecalcEngine::default();
        engine.recalculate_all(&st, &g, &roster());

        st.grade_entries[0].grade = "3".into();
        engine
            .recalculate_for(&st, &g, &roster(), &["s1".to_string()])
            .unwrap();

        let mut full = RecalcEngine::default();
        full.recalculate_all(&st, &g, &roster());
        for level in [
            NoteLevel::Assessment,
            NoteLevel::Category,
            NoteLevel::HalfYear,
            NoteLevel::Overall,
        ] {
            assert_eq!(engine.notes(level), full.notes(level));
        }
    }

    #[test]
    fn targeted_rejects_unknown_student() {
        let st = sample_state();
        let g = group(POINTS_SCALE_ID);
        let mut engine = RecalcEngine::default();
        engine.recalculate_all(&st, &g, &roster());
        let err = engine
            .recalculate_for(&st, &g, &roster(), &["nobody".to_string()])
            .unwrap_err();
        assert_eq!(err.code(), "unknown_student");
    }

    #[test]
    fn null_group_clears_everything() {
        let st = sample_state();
        let g = group(POINTS_SCALE_ID);
        let mut engine = RecalcEngine::default();
        engine.recalculate(&st, Some(&g), &roster());
        assert!(!engine.overall_notes().is_empty());
        let summary = engine.recalculate(&st, None, &roster());
        assert_eq!(summary.mode, RecalcMode::Cleared);
        assert!(engine.columns().is_empty());
        assert!(engine.assessment_notes().is_empty());
        assert!(engine.overall_notes().is_empty());
    }
}
