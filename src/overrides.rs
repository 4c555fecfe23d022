use crate::model::{ManualOverride, OverrideTarget};

/// Manuelle Noten keyed by {student, group, target}. At most one record per key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverrideStore {
    records: Vec<ManualOverride>,
}

impl OverrideStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Later duplicates of a key replace earlier ones.
    pub fn from_records(records: Vec<ManualOverride>) -> Self {
        let mut store = Self::new();
        for r in records {
            store.set(r);
        }
        store
    }

    pub fn records(&self) -> &[ManualOverride] {
        &self.records
    }

    pub fn get(
        &self,
        student_id: &str,
        group_id: &str,
        target: OverrideTarget,
    ) -> Option<&ManualOverride> {
        self.records
            .iter()
            .find(|r| r.student_id == student_id && r.group_id == group_id && r.target == target)
    }

    /// Insert or replace. Returns the replaced record.
    pub fn set(&mut self, record: ManualOverride) -> Option<ManualOverride> {
        let pos = self.records.iter().position(|r| {
            r.student_id == record.student_id
                && r.group_id == record.group_id
                && r.target == record.target
        });
        match pos {
            Some(i) => Some(std::mem::replace(&mut self.records[i], record)),
            None => {
                self.records.push(record);
                None
            }
        }
    }

    pub fn delete(&mut self, student_id: &str, group_id: &str, target: OverrideTarget) -> bool {
        let before = self.records.len();
        self.records.retain(|r| {
            !(r.student_id == student_id && r.group_id == group_id && r.target == target)
        });
        self.records.len() != before
    }

    pub fn for_group<'a>(&'a self, group_id: &'a str) -> impl Iterator<Item = &'a ManualOverride> {
        self.records.iter().filter(move |r| r.group_id == group_id)
    }
}
