//! Grade aggregation and incremental recalculation for a German-school
//! gradebook (Notenbuch).

pub mod calc;
pub mod db;
pub mod engine;
pub mod error;
pub mod ipc;
pub mod model;
pub mod overrides;
pub mod scale;
pub mod service;
pub mod state;
pub mod store;
pub mod threshold;

pub use engine::{
    Column, ColumnKind, NoteKey, NoteLevel, NoteMap, RecalcEngine, RecalcMode, RecalcSummary,
};
pub use error::{GradebookError, GradebookResult};
pub use service::{GradebookService, GroupContext};
pub use store::{KeyValueStore, MemoryStore, SqliteStore};
