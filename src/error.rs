use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum GradebookError {
    #[error("no learning group selected")]
    NoGroup,

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("student {student_id} is not in the supplied roster")]
    UnknownStudent { student_id: String },

    #[error("{message}")]
    InvalidInput { message: String },

    #[error("store failed: {0}")]
    Store(#[from] anyhow::Error),
}

pub type GradebookResult<T> = Result<T, GradebookError>;

impl GradebookError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Stable code for the IPC error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoGroup => "no_group",
            Self::NotFound { .. } => "not_found",
            Self::UnknownStudent { .. } => "unknown_student",
            Self::InvalidInput { .. } => "bad_params",
            Self::Store(_) => "store_failed",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::NotFound { kind, id } => Some(json!({ "kind": kind, "id": id })),
            Self::UnknownStudent { student_id } => Some(json!({ "studentId": student_id })),
            _ => None,
        }
    }
}
