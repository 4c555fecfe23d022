//! Action layer: mutate raw entries, persist, recalculate, notify.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::calc::DisplayStyle;
use crate::engine::{Column, NoteLevel, NoteMap, RecalcEngine, RecalcMode, RecalcSummary};
use crate::error::{GradebookError, GradebookResult};
use crate::model::{
    Assessment, AssessmentKind, Category, CategoryKind, Feedback, GradeEntry, HalfYear,
    LearningGroup, ManualOverride, OverrideTarget, PointsEntry, Student, SubItem, Task,
};
use crate::overrides::OverrideStore;
use crate::scale;
use crate::state::GradebookState;
use crate::store::{self, KeyValueStore};
use crate::threshold::{self, ThresholdEntry, ThresholdRowInput};

pub type Listener = Box<dyn FnMut(&RecalcSummary)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// Group and resolved roster supplied by the host.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupContext {
    pub group: LearningGroup,
    pub students: Vec<Student>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineSettings {
    pub decimal_separator: char,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            decimal_separator: DisplayStyle::default().decimal_separator,
        }
    }
}

impl EngineSettings {
    pub fn display_style(&self) -> DisplayStyle {
        DisplayStyle {
            decimal_separator: self.decimal_separator,
        }
    }
}

fn default_weight() -> f64 {
    1.0
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCategory {
    pub group_id: String,
    pub half_year: HalfYear,
    pub kind: CategoryKind,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CategoryPatch {
    pub name: Option<String>,
    pub weight: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAssessment {
    pub category_id: String,
    pub name: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
    pub kind: AssessmentKind,
}

/// `category_id` moves the assessment to another category.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentPatch {
    pub name: Option<String>,
    pub weight: Option<f64>,
    pub category_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewSubItem {
    pub assessment_id: String,
    pub name: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubItemPatch {
    pub name: Option<String>,
    pub weight: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    pub assessment_id: String,
    pub name: String,
    pub max_points: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPatch {
    pub name: Option<String>,
    pub max_points: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope<'a> {
    /// Raw data changed, derived maps did not (other group, no group
    /// selected, feedback).
    Nothing,
    All,
    Student(&'a str),
}

pub struct GradebookService {
    store: Box<dyn KeyValueStore>,
    state: GradebookState,
    engine: RecalcEngine,
    settings: EngineSettings,
    context: Option<GroupContext>,
    listeners: Vec<(ListenerId, Listener)>,
    next_listener: u64,
}

impl GradebookService {
    /// Load every persisted list from `store`. Missing keys start empty.
    pub fn open(store: Box<dyn KeyValueStore>) -> GradebookResult<Self> {
        let s: &dyn KeyValueStore = store.as_ref();
        let state = GradebookState {
            categories: store::load(s, store::KEY_CATEGORIES)?.unwrap_or_default(),
            assessments: store::load(s, store::KEY_ASSESSMENTS)?.unwrap_or_default(),
            sub_items: store::load(s, store::KEY_SUB_ITEMS)?.unwrap_or_default(),
            grade_entries: store::load(s, store::KEY_GRADE_ENTRIES)?.unwrap_or_default(),
            tasks: store::load(s, store::KEY_TASKS)?.unwrap_or_default(),
            points_entries: store::load(s, store::KEY_POINTS_ENTRIES)?.unwrap_or_default(),
            thresholds: store::load(s, store::KEY_THRESHOLDS)?
                .unwrap_or_else(threshold::default_map),
            overrides: OverrideStore::from_records(
                store::load(s, store::KEY_MANUAL_OVERRIDES)?.unwrap_or_default(),
            ),
            feedback: store::load(s, store::KEY_FEEDBACK)?.unwrap_or_default(),
        };
        let settings: EngineSettings =
            store::load(s, store::KEY_ENGINE_SETTINGS)?.unwrap_or_default();
        tracing::debug!(
            categories = state.categories.len(),
            assessments = state.assessments.len(),
            "gradebook state loaded"
        );
        Ok(Self {
            store,
            engine: RecalcEngine::new(settings.display_style()),
            state,
            settings,
            context: None,
            listeners: Vec::new(),
            next_listener: 1,
        })
    }

    pub fn state(&self) -> &GradebookState {
        &self.state
    }

    pub fn engine(&self) -> &RecalcEngine {
        &self.engine
    }

    pub fn context(&self) -> Option<&GroupContext> {
        self.context.as_ref()
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn columns(&self) -> &[Column] {
        self.engine.columns()
    }

    pub fn notes(&self, level: NoteLevel) -> &NoteMap {
        self.engine.notes(level)
    }

    // ---- subscriptions -------------------------------------------------

    /// Listeners hear about every state change. Changes that leave the
    /// derived maps alone arrive as `RecalcMode::Unchanged`.
    pub fn subscribe(&mut self, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_listener);
        self.next_listener += 1;
        self.listeners.push((id, listener));
        id
    }

    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(l, _)| *l != id);
        self.listeners.len() != before
    }

    fn notify(&mut self, summary: &RecalcSummary) {
        for (_, listener) in self.listeners.iter_mut() {
            listener(summary);
        }
    }

    // ---- group context -------------------------------------------------

    /// Switch the group context. `None` clears all derived maps.
    pub fn select_group(&mut self, context: Option<GroupContext>) {
        self.context = context;
        let summary = match &self.context {
            Some(ctx) => self
                .engine
                .recalculate(&self.state, Some(&ctx.group), &ctx.students),
            None => self.engine.recalculate(&self.state, None, &[]),
        };
        self.notify(&summary);
    }

    /// Full recalculation of the current context.
    pub fn recalculate_all(&mut self) -> GradebookResult<()> {
        if self.context.is_none() {
            return Err(GradebookError::NoGroup);
        }
        self.recalculate(Scope::All)
    }

    fn recalculate(&mut self, scope: Scope<'_>) -> GradebookResult<()> {
        let summary = match (self.context.as_ref(), scope) {
            (Some(ctx), Scope::All) => {
                self.engine
                    .recalculate_all(&self.state, &ctx.group, &ctx.students)
            }
            (Some(ctx), Scope::Student(id)) => self.engine.recalculate_for(
                &self.state,
                &ctx.group,
                &ctx.students,
                &[id.to_string()],
            )?,
            (ctx, _) => RecalcSummary {
                mode: RecalcMode::Unchanged,
                group_id: ctx.map(|c| c.group.id.clone()),
                student_ids: Vec::new(),
            },
        };
        self.notify(&summary);
        Ok(())
    }

    /// Recalculate, then surface a failed store write. The in-memory state
    /// stays authoritative either way.
    fn finish(&mut self, persisted: anyhow::Result<()>, scope: Scope<'_>) -> GradebookResult<()> {
        if let Err(e) = &persisted {
            tracing::warn!(error = %e, "store write failed");
        }
        self.recalculate(scope)?;
        persisted.map_err(GradebookError::Store)
    }

    fn is_current_group(&self, group_id: &str) -> bool {
        self.context
            .as_ref()
            .map(|c| c.group.id == group_id)
            .unwrap_or(false)
    }

    fn scope_all_for(&self, group_id: Option<&str>) -> Scope<'static> {
        match group_id {
            Some(g) if self.is_current_group(g) => Scope::All,
            _ => Scope::Nothing,
        }
    }

    fn scope_student_for<'a>(&self, group_id: Option<&str>, student_id: &'a str) -> Scope<'a> {
        match group_id {
            Some(g) if self.is_current_group(g) => Scope::Student(student_id),
            _ => Scope::Nothing,
        }
    }

    fn ensure_student(&self, group_id: Option<&str>, student_id: &str) -> GradebookResult<()> {
        let Some(ctx) = self.context.as_ref() else {
            return Ok(());
        };
        if group_id != Some(ctx.group.id.as_str()) {
            return Ok(());
        }
        if ctx.students.iter().any(|s| s.id == student_id) {
            Ok(())
        } else {
            Err(GradebookError::UnknownStudent {
                student_id: student_id.to_string(),
            })
        }
    }

    /// Scale used to validate labels for a group; the current context's
    /// group is the only one whose scale is known here.
    fn scale_for_group(&self, group_id: Option<&str>) -> Option<&'static scale::GradingScale> {
        let ctx = self.context.as_ref()?;
        if group_id == Some(ctx.group.id.as_str()) {
            scale::find_scale(&ctx.group.scale_id)
        } else {
            None
        }
    }

    fn persist<T: Serialize + ?Sized>(&mut self, key: &str, value: &T) -> anyhow::Result<()> {
        store::save(self.store.as_mut(), key, value)
    }

    fn persist_many(&mut self, keys: &[&str]) -> anyhow::Result<()> {
        for key in keys {
            let value = match *key {
                store::KEY_CATEGORIES => serde_json::to_value(&self.state.categories)?,
                store::KEY_ASSESSMENTS => serde_json::to_value(&self.state.assessments)?,
                store::KEY_SUB_ITEMS => serde_json::to_value(&self.state.sub_items)?,
                store::KEY_GRADE_ENTRIES => serde_json::to_value(&self.state.grade_entries)?,
                store::KEY_TASKS => serde_json::to_value(&self.state.tasks)?,
                store::KEY_POINTS_ENTRIES => serde_json::to_value(&self.state.points_entries)?,
                store::KEY_THRESHOLDS => serde_json::to_value(&self.state.thresholds)?,
                store::KEY_MANUAL_OVERRIDES => {
                    serde_json::to_value(self.state.overrides.records())?
                }
                store::KEY_FEEDBACK => serde_json::to_value(&self.state.feedback)?,
                other => anyhow::bail!("unknown store key {}", other),
            };
            self.store.set(key, value)?;
        }
        Ok(())
    }

    // ---- categories ----------------------------------------------------

    pub fn create_category(&mut self, input: NewCategory) -> GradebookResult<Category> {
        check_weight(input.weight)?;
        let name = input
            .name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| match input.kind {
                CategoryKind::Oral => "Mündlich".to_string(),
                CategoryKind::Written => "Schriftlich".to_string(),
            });
        let category = Category {
            id: Uuid::new_v4().to_string(),
            group_id: input.group_id,
            half_year: input.half_year,
            kind: input.kind,
            weight: input.weight,
            name,
        };
        tracing::info!(
            category_id = %category.id,
            group_id = %category.group_id,
            "category created"
        );
        self.state.categories.push(category.clone());
        let persisted = self.persist_many(&[store::KEY_CATEGORIES]);
        let scope = self.scope_all_for(Some(&category.group_id));
        self.finish(persisted, scope)?;
        Ok(category)
    }

    pub fn update_category(&mut self, id: &str, patch: CategoryPatch) -> GradebookResult<Category> {
        if let Some(w) = patch.weight {
            check_weight(w)?;
        }
        let Some(category) = self.state.categories.iter_mut().find(|c| c.id == id) else {
            return Err(GradebookError::not_found("category", id));
        };
        if let Some(name) = patch.name {
            let t = name.trim();
            if t.is_empty() {
                return Err(GradebookError::invalid("name must not be empty"));
            }
            category.name = t.to_string();
        }
        if let Some(w) = patch.weight {
            category.weight = w;
        }
        let updated = category.clone();
        let persisted = self.persist_many(&[store::KEY_CATEGORIES]);
        let scope = self.scope_all_for(Some(&updated.group_id));
        self.finish(persisted, scope)?;
        Ok(updated)
    }

    /// Removes the category with all its assessments.
    pub fn delete_category(&mut self, id: &str) -> GradebookResult<()> {
        let Some(pos) = self.state.categories.iter().position(|c| c.id == id) else {
            return Err(GradebookError::not_found("category", id));
        };
        let category = self.state.categories.remove(pos);
        let assessment_ids: Vec<String> = self
            .state
            .assessments_of(&category.id)
            .map(|a| a.id.clone())
            .collect();
        for aid in &assessment_ids {
            self.remove_assessment_tree(aid);
        }
        tracing::info!(
            category_id = %category.id,
            assessments = assessment_ids.len(),
            "category deleted"
        );
        let persisted = self.persist_many(&[
            store::KEY_CATEGORIES,
            store::KEY_ASSESSMENTS,
            store::KEY_SUB_ITEMS,
            store::KEY_GRADE_ENTRIES,
            store::KEY_TASKS,
            store::KEY_POINTS_ENTRIES,
            store::KEY_FEEDBACK,
        ]);
        let scope = self.scope_all_for(Some(&category.group_id));
        self.finish(persisted, scope)
    }

    // ---- assessments ---------------------------------------------------

    pub fn create_assessment(&mut self, input: NewAssessment) -> GradebookResult<Assessment> {
        check_weight(input.weight)?;
        let name = non_empty(&input.name)?;
        let Some(category) = self.state.category(&input.category_id) else {
            return Err(GradebookError::not_found("category", &input.category_id));
        };
        let group_id = category.group_id.clone();
        let assessment = Assessment {
            id: Uuid::new_v4().to_string(),
            category_id: input.category_id,
            name,
            weight: input.weight,
            kind: input.kind,
            threshold_override: None,
        };
        tracing::info!(
            assessment_id = %assessment.id,
            kind = ?assessment.kind,
            "assessment created"
        );
        self.state.assessments.push(assessment.clone());
        let persisted = self.persist_many(&[store::KEY_ASSESSMENTS]);
        let scope = self.scope_all_for(Some(&group_id));
        self.finish(persisted, scope)?;
        Ok(assessment)
    }

    pub fn update_assessment(
        &mut self,
        id: &str,
        patch: AssessmentPatch,
    ) -> GradebookResult<Assessment> {
        if let Some(w) = patch.weight {
            check_weight(w)?;
        }
        let name = patch.name.as_deref().map(non_empty).transpose()?;
        let old_group = self.state.group_of_assessment(id).map(str::to_string);
        let new_group = match &patch.category_id {
            Some(cid) => match self.state.category(cid) {
                Some(c) => Some(c.group_id.clone()),
                None => return Err(GradebookError::not_found("category", cid)),
            },
            None => None,
        };
        let Some(assessment) = self.state.assessments.iter_mut().find(|a| a.id == id) else {
            return Err(GradebookError::not_found("assessment", id));
        };
        if let Some(n) = name {
            assessment.name = n;
        }
        if let Some(w) = patch.weight {
            assessment.weight = w;
        }
        if let Some(cid) = patch.category_id {
            if cid != assessment.category_id {
                tracing::info!(
                    assessment_id = %assessment.id,
                    category_id = %cid,
                    "assessment moved"
                );
            }
            assessment.category_id = cid;
        }
        let updated = assessment.clone();
        let persisted = self.persist_many(&[store::KEY_ASSESSMENTS]);
        let touches_current = [old_group.as_deref(), new_group.as_deref()]
            .into_iter()
            .flatten()
            .any(|g| self.is_current_group(g));
        let scope = if touches_current { Scope::All } else { Scope::Nothing };
        self.finish(persisted, scope)?;
        Ok(updated)
    }

    pub fn delete_assessment(&mut self, id: &str) -> GradebookResult<()> {
        if self.state.assessment(id).is_none() {
            return Err(GradebookError::not_found("assessment", id));
        }
        let group_id = self.state.group_of_assessment(id).map(str::to_string);
        self.remove_assessment_tree(id);
        tracing::info!(assessment_id = id, "assessment deleted");
        let persisted = self.persist_many(&[
            store::KEY_ASSESSMENTS,
            store::KEY_SUB_ITEMS,
            store::KEY_GRADE_ENTRIES,
            store::KEY_TASKS,
            store::KEY_POINTS_ENTRIES,
            store::KEY_FEEDBACK,
        ]);
        let scope = self.scope_all_for(group_id.as_deref());
        self.finish(persisted, scope)
    }

    fn remove_assessment_tree(&mut self, assessment_id: &str) {
        let st = &mut self.state;
        let sub_ids: Vec<String> = st
            .sub_items
            .iter()
            .filter(|s| s.assessment_id == assessment_id)
            .map(|s| s.id.clone())
            .collect();
        let task_ids: Vec<String> = st
            .tasks
            .iter()
            .filter(|t| t.assessment_id == assessment_id)
            .map(|t| t.id.clone())
            .collect();
        st.grade_entries.retain(|e| !sub_ids.contains(&e.sub_item_id));
        st.points_entries.retain(|e| !task_ids.contains(&e.task_id));
        st.sub_items.retain(|s| s.assessment_id != assessment_id);
        st.tasks.retain(|t| t.assessment_id != assessment_id);
        st.feedback.retain(|f| f.assessment_id != assessment_id);
        st.assessments.retain(|a| a.id != assessment_id);
    }

    /// Exam-specific Notenschlüssel. `None` returns to the global table.
    pub fn set_assessment_thresholds(
        &mut self,
        assessment_id: &str,
        rows: Option<&[ThresholdRowInput]>,
    ) -> GradebookResult<Assessment> {
        let group_id = self.state.group_of_assessment(assessment_id).map(str::to_string);
        let Some(assessment) = self
            .state
            .assessments
            .iter_mut()
            .find(|a| a.id == assessment_id)
        else {
            return Err(GradebookError::not_found("assessment", assessment_id));
        };
        if assessment.kind != AssessmentKind::Exam {
            return Err(GradebookError::invalid(
                "threshold tables only apply to exam assessments",
            ));
        }
        assessment.threshold_override = match rows {
            Some(rows) => {
                let table = threshold::complete_rows(rows);
                check_threshold_table(&table)?;
                Some(table)
            }
            None => None,
        };
        let updated = assessment.clone();
        let persisted = self.persist_many(&[store::KEY_ASSESSMENTS]);
        let scope = self.scope_all_for(group_id.as_deref());
        self.finish(persisted, scope)?;
        Ok(updated)
    }

    // ---- sub-items -----------------------------------------------------

    pub fn create_sub_item(&mut self, input: NewSubItem) -> GradebookResult<SubItem> {
        check_weight(input.weight)?;
        let name = non_empty(&input.name)?;
        self.expect_assessment_kind(&input.assessment_id, AssessmentKind::Collection)?;
        let group_id = self
            .state
            .group_of_assessment(&input.assessment_id)
            .map(str::to_string);
        let item = SubItem {
            id: Uuid::new_v4().to_string(),
            assessment_id: input.assessment_id,
            name,
            weight: input.weight,
        };
        self.state.sub_items.push(item.clone());
        let persisted = self.persist_many(&[store::KEY_SUB_ITEMS]);
        let scope = self.scope_all_for(group_id.as_deref());
        self.finish(persisted, scope)?;
        Ok(item)
    }

    pub fn update_sub_item(&mut self, id: &str, patch: SubItemPatch) -> GradebookResult<SubItem> {
        if let Some(w) = patch.weight {
            check_weight(w)?;
        }
        let name = patch.name.as_deref().map(non_empty).transpose()?;
        let Some(item) = self.state.sub_items.iter_mut().find(|s| s.id == id) else {
            return Err(GradebookError::not_found("sub item", id));
        };
        if let Some(n) = name {
            item.name = n;
        }
        if let Some(w) = patch.weight {
            item.weight = w;
        }
        let updated = item.clone();
        let group_id = self
            .state
            .group_of_assessment(&updated.assessment_id)
            .map(str::to_string);
        let persisted = self.persist_many(&[store::KEY_SUB_ITEMS]);
        let scope = self.scope_all_for(group_id.as_deref());
        self.finish(persisted, scope)?;
        Ok(updated)
    }

    pub fn delete_sub_item(&mut self, id: &str) -> GradebookResult<()> {
        let Some(pos) = self.state.sub_items.iter().position(|s| s.id == id) else {
            return Err(GradebookError::not_found("sub item", id));
        };
        let item = self.state.sub_items.remove(pos);
        self.state.grade_entries.retain(|e| e.sub_item_id != item.id);
        let group_id = self
            .state
            .group_of_assessment(&item.assessment_id)
            .map(str::to_string);
        let persisted = self.persist_many(&[store::KEY_SUB_ITEMS, store::KEY_GRADE_ENTRIES]);
        let scope = self.scope_all_for(group_id.as_deref());
        self.finish(persisted, scope)
    }

    // ---- tasks ---------------------------------------------------------

    pub fn create_task(&mut self, input: NewTask) -> GradebookResult<Task> {
        check_max_points(input.max_points)?;
        let name = non_empty(&input.name)?;
        self.expect_assessment_kind(&input.assessment_id, AssessmentKind::Exam)?;
        let group_id = self
            .state
            .group_of_assessment(&input.assessment_id)
            .map(str::to_string);
        let task = Task {
            id: Uuid::new_v4().to_string(),
            assessment_id: input.assessment_id,
            name,
            max_points: input.max_points,
        };
        self.state.tasks.push(task.clone());
        let persisted = self.persist_many(&[store::KEY_TASKS]);
        let scope = self.scope_all_for(group_id.as_deref());
        self.finish(persisted, scope)?;
        Ok(task)
    }

    pub fn update_task(&mut self, id: &str, patch: TaskPatch) -> GradebookResult<Task> {
        if let Some(m) = patch.max_points {
            check_max_points(m)?;
        }
        let name = patch.name.as_deref().map(non_empty).transpose()?;
        let Some(task) = self.state.tasks.iter_mut().find(|t| t.id == id) else {
            return Err(GradebookError::not_found("task", id));
        };
        if let Some(n) = name {
            task.name = n;
        }
        if let Some(m) = patch.max_points {
            task.max_points = m;
        }
        let updated = task.clone();
        let group_id = self
            .state
            .group_of_assessment(&updated.assessment_id)
            .map(str::to_string);
        let persisted = self.persist_many(&[store::KEY_TASKS]);
        let scope = self.scope_all_for(group_id.as_deref());
        self.finish(persisted, scope)?;
        Ok(updated)
    }

    pub fn delete_task(&mut self, id: &str) -> GradebookResult<()> {
        let Some(pos) = self.state.tasks.iter().position(|t| t.id == id) else {
            return Err(GradebookError::not_found("task", id));
        };
        let task = self.state.tasks.remove(pos);
        self.state.points_entries.retain(|e| e.task_id != task.id);
        let group_id = self
            .state
            .group_of_assessment(&task.assessment_id)
            .map(str::to_string);
        let persisted = self.persist_many(&[store::KEY_TASKS, store::KEY_POINTS_ENTRIES]);
        let scope = self.scope_all_for(group_id.as_deref());
        self.finish(persisted, scope)
    }

    fn expect_assessment_kind(
        &self,
        assessment_id: &str,
        kind: AssessmentKind,
    ) -> GradebookResult<()> {
        let Some(a) = self.state.assessment(assessment_id) else {
            return Err(GradebookError::not_found("assessment", assessment_id));
        };
        if a.kind != kind {
            return Err(GradebookError::invalid(format!(
                "assessment {} is not of kind {:?}",
                assessment_id, kind
            )));
        }
        Ok(())
    }

    // ---- grade and points entries --------------------------------------

    /// Upsert one grade cell; `None` clears it. Targeted recalculation.
    pub fn save_grade(
        &mut self,
        sub_item_id: &str,
        student_id: &str,
        grade: Option<&str>,
        remark: Option<String>,
    ) -> GradebookResult<()> {
        let group_id = self.group_of_sub_item(sub_item_id)?;
        self.ensure_student(group_id.as_deref(), student_id)?;
        let grade = self.check_grade_label(group_id.as_deref(), grade)?;
        self.apply_grade(sub_item_id, student_id, grade, remark);
        let persisted = self.persist_many(&[store::KEY_GRADE_ENTRIES]);
        let scope = self.scope_student_for(group_id.as_deref(), student_id);
        self.finish(persisted, scope)
    }

    /// Several cells of one sub-item in one write and one full recalculation.
    pub fn bulk_save_grades(
        &mut self,
        sub_item_id: &str,
        entries: &[(String, Option<String>)],
    ) -> GradebookResult<usize> {
        let group_id = self.group_of_sub_item(sub_item_id)?;
        let mut checked = Vec::with_capacity(entries.len());
        for (student_id, grade) in entries {
            self.ensure_student(group_id.as_deref(), student_id)?;
            let g = self.check_grade_label(group_id.as_deref(), grade.as_deref())?;
            checked.push((student_id.clone(), g));
        }
        for (student_id, grade) in checked {
            self.apply_grade(sub_item_id, &student_id, grade, None);
        }
        let persisted = self.persist_many(&[store::KEY_GRADE_ENTRIES]);
        let scope = self.scope_all_for(group_id.as_deref());
        self.finish(persisted, scope)?;
        Ok(entries.len())
    }

    fn apply_grade(
        &mut self,
        sub_item_id: &str,
        student_id: &str,
        grade: Option<String>,
        remark: Option<String>,
    ) {
        let pos = self
            .state
            .grade_entries
            .iter()
            .position(|e| e.sub_item_id == sub_item_id && e.student_id == student_id);
        match (grade, pos) {
            (Some(grade), Some(i)) => {
                let e = &mut self.state.grade_entries[i];
                e.grade = grade;
                if remark.is_some() {
                    e.remark = remark;
                }
                e.updated_at = Utc::now();
            }
            (Some(grade), None) => self.state.grade_entries.push(GradeEntry {
                sub_item_id: sub_item_id.to_string(),
                student_id: student_id.to_string(),
                grade,
                remark,
                updated_at: Utc::now(),
            }),
            (None, Some(i)) => {
                self.state.grade_entries.remove(i);
            }
            (None, None) => {}
        }
    }

    fn group_of_sub_item(&self, sub_item_id: &str) -> GradebookResult<Option<String>> {
        let Some(item) = self.state.sub_item(sub_item_id) else {
            return Err(GradebookError::not_found("sub item", sub_item_id));
        };
        Ok(self
            .state
            .group_of_assessment(&item.assessment_id)
            .map(str::to_string))
    }

    fn group_of_task(&self, task_id: &str) -> GradebookResult<Option<String>> {
        let Some(task) = self.state.task(task_id) else {
            return Err(GradebookError::not_found("task", task_id));
        };
        Ok(self
            .state
            .group_of_assessment(&task.assessment_id)
            .map(str::to_string))
    }

    fn check_grade_label(
        &self,
        group_id: Option<&str>,
        grade: Option<&str>,
    ) -> GradebookResult<Option<String>> {
        let Some(grade) = grade.map(str::trim).filter(|g| !g.is_empty()) else {
            return Ok(None);
        };
        if let Some(scale) = self.scale_for_group(group_id) {
            if scale.points_for(grade).is_none() {
                return Err(GradebookError::invalid(format!(
                    "grade {} is not part of scale {}",
                    grade, scale.id
                )));
            }
        }
        Ok(Some(grade.to_string()))
    }

    /// Upsert one points cell. `None` keeps an empty entry. Targeted.
    pub fn save_points(
        &mut self,
        task_id: &str,
        student_id: &str,
        points: Option<f64>,
    ) -> GradebookResult<()> {
        let group_id = self.group_of_task(task_id)?;
        self.ensure_student(group_id.as_deref(), student_id)?;
        check_points(points)?;
        self.apply_points(task_id, student_id, points);
        let persisted = self.persist_many(&[store::KEY_POINTS_ENTRIES]);
        let scope = self.scope_student_for(group_id.as_deref(), student_id);
        self.finish(persisted, scope)
    }

    pub fn bulk_save_points(
        &mut self,
        task_id: &str,
        entries: &[(String, Option<f64>)],
    ) -> GradebookResult<usize> {
        let group_id = self.group_of_task(task_id)?;
        for (student_id, points) in entries {
            self.ensure_student(group_id.as_deref(), student_id)?;
            check_points(*points)?;
        }
        for (student_id, points) in entries {
            self.apply_points(task_id, student_id, *points);
        }
        let persisted = self.persist_many(&[store::KEY_POINTS_ENTRIES]);
        let scope = self.scope_all_for(group_id.as_deref());
        self.finish(persisted, scope)?;
        Ok(entries.len())
    }

    fn apply_points(&mut self, task_id: &str, student_id: &str, points: Option<f64>) {
        match self
            .state
            .points_entries
            .iter_mut()
            .find(|e| e.task_id == task_id && e.student_id == student_id)
        {
            Some(e) => {
                e.points = points;
                e.updated_at = Utc::now();
            }
            None => self.state.points_entries.push(PointsEntry {
                task_id: task_id.to_string(),
                student_id: student_id.to_string(),
                points,
                updated_at: Utc::now(),
            }),
        }
    }

    // ---- manual overrides ----------------------------------------------

    pub fn set_manual_override(
        &mut self,
        student_id: &str,
        target: OverrideTarget,
        grade: &str,
    ) -> GradebookResult<()> {
        let Some(ctx) = self.context.as_ref() else {
            return Err(GradebookError::NoGroup);
        };
        let group_id = ctx.group.id.clone();
        self.ensure_student(Some(&group_id), student_id)?;
        let Some(grade) = self.check_grade_label(Some(&group_id), Some(grade))? else {
            return Err(GradebookError::invalid("grade must not be empty"));
        };
        self.state.overrides.set(ManualOverride {
            student_id: student_id.to_string(),
            group_id,
            target,
            grade,
        });
        let persisted = self.persist_many(&[store::KEY_MANUAL_OVERRIDES]);
        self.finish(persisted, Scope::Student(student_id))
    }

    /// Returns whether a record existed.
    pub fn delete_manual_override(
        &mut self,
        student_id: &str,
        target: OverrideTarget,
    ) -> GradebookResult<bool> {
        let Some(ctx) = self.context.as_ref() else {
            return Err(GradebookError::NoGroup);
        };
        let group_id = ctx.group.id.clone();
        self.ensure_student(Some(&group_id), student_id)?;
        let removed = self.state.overrides.delete(student_id, &group_id, target);
        if !removed {
            return Ok(false);
        }
        let persisted = self.persist_many(&[store::KEY_MANUAL_OVERRIDES]);
        self.finish(persisted, Scope::Student(student_id))?;
        Ok(true)
    }

    // ---- threshold tables ----------------------------------------------

    pub fn update_threshold_table(
        &mut self,
        scale_id: &str,
        rows: &[ThresholdRowInput],
    ) -> GradebookResult<Vec<ThresholdEntry>> {
        let table = threshold::complete_rows(rows);
        check_threshold_table(&table)?;
        self.state
            .thresholds
            .insert(scale_id.to_string(), table.clone());
        tracing::info!(scale_id, rows = table.len(), "threshold table updated");
        let persisted = self.persist_many(&[store::KEY_THRESHOLDS]);
        self.finish(persisted, Scope::All)?;
        Ok(table)
    }

    pub fn reset_threshold_table(
        &mut self,
        scale_id: &str,
    ) -> GradebookResult<Vec<ThresholdEntry>> {
        let table = threshold::default_table(scale_id);
        self.state
            .thresholds
            .insert(scale_id.to_string(), table.clone());
        tracing::info!(scale_id, "threshold table reset to defaults");
        let persisted = self.persist_many(&[store::KEY_THRESHOLDS]);
        self.finish(persisted, Scope::All)?;
        Ok(table)
    }

    // ---- feedback ------------------------------------------------------

    /// Empty text removes the record. Grades are not affected.
    pub fn set_feedback(
        &mut self,
        assessment_id: &str,
        student_id: &str,
        text: &str,
    ) -> GradebookResult<Option<Feedback>> {
        if self.state.assessment(assessment_id).is_none() {
            return Err(GradebookError::not_found("assessment", assessment_id));
        }
        let text = text.trim();
        let pos = self
            .state
            .feedback
            .iter()
            .position(|f| f.assessment_id == assessment_id && f.student_id == student_id);
        let result = match (text.is_empty(), pos) {
            (true, Some(i)) => {
                self.state.feedback.remove(i);
                None
            }
            (true, None) => None,
            (false, Some(i)) => {
                let f = &mut self.state.feedback[i];
                f.text = text.to_string();
                f.updated_at = Utc::now();
                Some(f.clone())
            }
            (false, None) => {
                let f = Feedback {
                    id: Uuid::new_v4().to_string(),
                    assessment_id: assessment_id.to_string(),
                    student_id: student_id.to_string(),
                    text: text.to_string(),
                    updated_at: Utc::now(),
                };
                self.state.feedback.push(f.clone());
                Some(f)
            }
        };
        let persisted = self.persist_many(&[store::KEY_FEEDBACK]);
        self.finish(persisted, Scope::Nothing)?;
        Ok(result)
    }

    pub fn feedback_for(&self, assessment_id: &str) -> Vec<&Feedback> {
        self.state
            .feedback
            .iter()
            .filter(|f| f.assessment_id == assessment_id)
            .collect()
    }

    // ---- settings ------------------------------------------------------

    pub fn update_settings(&mut self, settings: EngineSettings) -> GradebookResult<()> {
        self.engine.set_style(settings.display_style());
        self.settings = settings;
        let settings = self.settings.clone();
        let persisted = self.persist(store::KEY_ENGINE_SETTINGS, &settings);
        self.finish(persisted, Scope::All)
    }
}

fn non_empty(s: &str) -> GradebookResult<String> {
    let t = s.trim();
    if t.is_empty() {
        return Err(GradebookError::invalid("name must not be empty"));
    }
    Ok(t.to_string())
}

fn check_weight(w: f64) -> GradebookResult<()> {
    if !w.is_finite() || w < 0.0 {
        return Err(GradebookError::invalid("weight must be a finite number >= 0"));
    }
    Ok(())
}

fn check_max_points(m: f64) -> GradebookResult<()> {
    if !m.is_finite() || m < 0.0 {
        return Err(GradebookError::invalid(
            "maxPoints must be a finite number >= 0",
        ));
    }
    Ok(())
}

fn check_points(points: Option<f64>) -> GradebookResult<()> {
    if let Some(p) = points {
        if !p.is_finite() || p < 0.0 {
            return Err(GradebookError::invalid("points must be a finite number >= 0"));
        }
    }
    Ok(())
}

fn check_threshold_table(table: &[ThresholdEntry]) -> GradebookResult<()> {
    for e in table {
        if e.points > scale::MAX_POINT_VALUE {
            return Err(GradebookError::invalid(format!(
                "threshold point value {} is out of range",
                e.points
            )));
        }
        if !e.percent_from.is_finite() || !(0.0..=100.0).contains(&e.percent_from) {
            return Err(GradebookError::invalid(format!(
                "threshold percentage for {} points must be within 0..=100",
                e.points
            )));
        }
    }
    Ok(())
}
