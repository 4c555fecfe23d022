use crate::engine::{NoteLevel, NoteMap};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{missing, str_param};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

const LEVELS: [(&str, NoteLevel); 4] = [
    ("assessment", NoteLevel::Assessment),
    ("category", NoteLevel::Category),
    ("halfYear", NoteLevel::HalfYear),
    ("overall", NoteLevel::Overall),
];

/// Sorted by student, then column, so responses are stable.
fn rows(map: &NoteMap, student_id: Option<&str>) -> Vec<serde_json::Value> {
    let mut keys: Vec<_> = map
        .keys()
        .filter(|k| student_id.map(|s| k.student_id == s).unwrap_or(true))
        .collect();
    keys.sort();
    keys.into_iter()
        .filter_map(|k| {
            let entry = map.get(k)?;
            let mut v = serde_json::to_value(entry).ok()?;
            v["studentId"] = json!(k.student_id);
            v["columnId"] = json!(k.column_id);
            Some(v)
        })
        .collect()
}

fn handle_columns(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "groupId": state.service.engine().layout_group(),
            "columns": state.service.columns(),
        }),
    )
}

fn handle_notes_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(raw_level) = str_param(req, "level") else {
        return missing(req, "level");
    };
    let Some(level) = NoteLevel::parse(raw_level) else {
        return err(
            &req.id,
            "bad_params",
            "level must be one of: assessment, category, halfYear, overall",
            Some(json!({ "level": raw_level })),
        );
    };
    let student_id = str_param(req, "studentId");
    let notes = rows(state.service.notes(level), student_id);
    ok(&req.id, json!({ "level": raw_level, "notes": notes }))
}

/// Every derived value of one student, grouped by level.
fn handle_notes_student(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(student_id) = str_param(req, "studentId") else {
        return missing(req, "studentId");
    };
    let mut out = serde_json::Map::new();
    for (name, level) in LEVELS {
        out.insert(
            name.to_string(),
            json!(rows(state.service.notes(level), Some(student_id))),
        );
    }
    ok(&req.id, json!({ "studentId": student_id, "notes": out }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "notes.columns" => Some(handle_columns(state, req)),
        "notes.get" => Some(handle_notes_get(state, req)),
        "notes.student" => Some(handle_notes_student(state, req)),
        _ => None,
    }
}
