use std::cell::RefCell;
use std::path::PathBuf;
use std::rc::Rc;

use serde::Deserialize;

use crate::engine::{RecalcMode, RecalcSummary};
use crate::service::GradebookService;
use crate::store::MemoryStore;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub service: GradebookService,
    pending: Rc<RefCell<Vec<RecalcSummary>>>,
}

impl AppState {
    /// In-memory store until a workspace is selected.
    pub fn new() -> anyhow::Result<Self> {
        let service = GradebookService::open(Box::new(MemoryStore::new()))?;
        Ok(Self::with_service(None, service))
    }

    pub fn with_service(workspace: Option<PathBuf>, service: GradebookService) -> Self {
        let mut state = Self {
            workspace,
            service,
            pending: Rc::new(RefCell::new(Vec::new())),
        };
        state.attach_listener();
        state
    }

    /// Swap in the service of a freshly opened workspace.
    pub fn replace_service(&mut self, workspace: PathBuf, service: GradebookService) {
        self.workspace = Some(workspace);
        self.service = service;
        self.attach_listener();
    }

    fn attach_listener(&mut self) {
        let sink = Rc::clone(&self.pending);
        self.service.subscribe(Box::new(move |summary: &RecalcSummary| {
            sink.borrow_mut().push(summary.clone());
        }));
    }

    /// Notification lines raised since the last call.
    pub fn drain_events(&mut self) -> Vec<serde_json::Value> {
        self.pending
            .borrow_mut()
            .drain(..)
            .map(|s| {
                let mode = match s.mode {
                    RecalcMode::Full => "full",
                    RecalcMode::Targeted => "targeted",
                    RecalcMode::Cleared => "cleared",
                    RecalcMode::Unchanged => "unchanged",
                };
                serde_json::json!({
                    "event": "notes.changed",
                    "mode": mode,
                    "groupId": s.group_id,
                    "studentIds": s.student_ids,
                })
            })
            .collect()
    }
}
