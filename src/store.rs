use anyhow::Context;
use rusqlite::Connection;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;

use crate::db;

pub const KEY_CATEGORIES: &str = "categories";
pub const KEY_ASSESSMENTS: &str = "assessments";
pub const KEY_SUB_ITEMS: &str = "sub_items";
pub const KEY_GRADE_ENTRIES: &str = "grade_entries";
pub const KEY_TASKS: &str = "tasks";
pub const KEY_POINTS_ENTRIES: &str = "points_entries";
pub const KEY_THRESHOLDS: &str = "thresholds";
pub const KEY_MANUAL_OVERRIDES: &str = "manual_overrides";
pub const KEY_FEEDBACK: &str = "feedback";
pub const KEY_ENGINE_SETTINGS: &str = "settings.engine";

/// Persistence collaborator. Values are whole JSON documents per key.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<serde_json::Value>>;
    fn set(&mut self, key: &str, value: serde_json::Value) -> anyhow::Result<()>;
}

pub fn load<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> anyhow::Result<Option<T>> {
    match store.get(key)? {
        Some(v) => {
            let parsed = serde_json::from_value(v)
                .with_context(|| format!("stored value for {} has unexpected shape", key))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

pub fn save<T: Serialize + ?Sized>(
    store: &mut dyn KeyValueStore,
    key: &str,
    value: &T,
) -> anyhow::Result<()> {
    let v = serde_json::to_value(value)?;
    store.set(key, v)
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    values: HashMap<String, serde_json::Value>,
    writes: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_count(&self) -> usize {
        self.writes
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
        Ok(self.values.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: serde_json::Value) -> anyhow::Result<()> {
        self.writes += 1;
        self.values.insert(key.to_string(), value);
        Ok(())
    }
}

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(workspace: &Path) -> anyhow::Result<Self> {
        Ok(Self {
            conn: db::open_db(workspace)?,
        })
    }

    pub fn in_memory() -> anyhow::Result<Self> {
        Ok(Self {
            conn: db::open_in_memory()?,
        })
    }
}

impl KeyValueStore for SqliteStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
        db::kv_get_json(&self.conn, key)
    }

    fn set(&mut self, key: &str, value: serde_json::Value) -> anyhow::Result<()> {
        db::kv_set_json(&self.conn, key, &value)
    }
}
