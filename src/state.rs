use crate::model::{
    Assessment, Category, CategoryKind, Feedback, GradeEntry, HalfYear, PointsEntry, SubItem, Task,
};
use crate::overrides::OverrideStore;
use crate::threshold::ThresholdMap;

/// Raw gradebook data. The in-memory copy is authoritative; the store only
/// mirrors it.
#[derive(Debug, Clone, Default)]
pub struct GradebookState {
    pub categories: Vec<Category>,
    pub assessments: Vec<Assessment>,
    pub sub_items: Vec<SubItem>,
    pub grade_entries: Vec<GradeEntry>,
    pub tasks: Vec<Task>,
    pub points_entries: Vec<PointsEntry>,
    pub thresholds: ThresholdMap,
    pub overrides: OverrideStore,
    pub feedback: Vec<Feedback>,
}

impl GradebookState {
    /// First category matching {group, half year, kind}. Duplicates are
    /// tolerated and shadowed.
    pub fn category_for(
        &self,
        group_id: &str,
        half_year: HalfYear,
        kind: CategoryKind,
    ) -> Option<&Category> {
        self.categories
            .iter()
            .find(|c| c.group_id == group_id && c.half_year == half_year && c.kind == kind)
    }

    pub fn category(&self, id: &str) -> Option<&Category> {
        self.categories.iter().find(|c| c.id == id)
    }

    pub fn assessment(&self, id: &str) -> Option<&Assessment> {
        self.assessments.iter().find(|a| a.id == id)
    }

    pub fn sub_item(&self, id: &str) -> Option<&SubItem> {
        self.sub_items.iter().find(|s| s.id == id)
    }

    pub fn task(&self, id: &str) -> Option<&Task> {
        self.tasks.iter().find(|t| t.id == id)
    }

    pub fn assessments_of<'a>(
        &'a self,
        category_id: &'a str,
    ) -> impl Iterator<Item = &'a Assessment> {
        self.assessments
            .iter()
            .filter(move |a| a.category_id == category_id)
    }

    pub fn sub_items_of(&self, assessment_id: &str) -> Vec<&SubItem> {
        self.sub_items
            .iter()
            .filter(|s| s.assessment_id == assessment_id)
            .collect()
    }

    pub fn tasks_of(&self, assessment_id: &str) -> Vec<&Task> {
        self.tasks
            .iter()
            .filter(|t| t.assessment_id == assessment_id)
            .collect()
    }

    /// Group that owns an assessment, through its category.
    pub fn group_of_assessment(&self, assessment_id: &str) -> Option<&str> {
        let a = self.assessment(assessment_id)?;
        self.category(&a.category_id).map(|c| c.group_id.as_str())
    }
}
