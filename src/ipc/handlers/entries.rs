use crate::calc::is_bonus;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{missing, parse_grade, parse_points, respond, str_param};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

const BULK_MAX_ENTRIES: usize = 2000;

fn handle_grades_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(sub_item_id) = str_param(req, "subItemId") else {
        return missing(req, "subItemId");
    };
    let entries: Vec<_> = state
        .service
        .state()
        .grade_entries
        .iter()
        .filter(|e| e.sub_item_id == sub_item_id)
        .collect();
    ok(&req.id, json!({ "entries": entries }))
}

fn handle_grades_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(sub_item_id) = str_param(req, "subItemId") else {
        return missing(req, "subItemId");
    };
    let Some(student_id) = str_param(req, "studentId") else {
        return missing(req, "studentId");
    };
    let grade = match parse_grade(req.params.get("grade")) {
        Ok(g) => g,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };
    let remark = str_param(req, "remark").map(str::to_string);
    let result = state
        .service
        .save_grade(sub_item_id, student_id, grade.as_deref(), remark);
    respond(req, result, |_| json!({ "ok": true }))
}

fn handle_grades_bulk_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(sub_item_id) = str_param(req, "subItemId") else {
        return missing(req, "subItemId");
    };
    let Some(raw) = req.params.get("entries").and_then(|v| v.as_array()) else {
        return missing(req, "entries");
    };
    if raw.len() > BULK_MAX_ENTRIES {
        return err(
            &req.id,
            "bad_params",
            "too many entries",
            Some(json!({ "max": BULK_MAX_ENTRIES, "count": raw.len() })),
        );
    }
    let mut entries = Vec::with_capacity(raw.len());
    for (i, e) in raw.iter().enumerate() {
        let Some(student_id) = e.get("studentId").and_then(|v| v.as_str()) else {
            return err(
                &req.id,
                "bad_params",
                "entry without studentId",
                Some(json!({ "index": i })),
            );
        };
        let grade = match parse_grade(e.get("grade")) {
            Ok(g) => g,
            Err(m) => return err(&req.id, "bad_params", m, Some(json!({ "index": i }))),
        };
        entries.push((student_id.to_string(), grade));
    }
    let result = state.service.bulk_save_grades(sub_item_id, &entries);
    respond(req, result, |n| json!({ "saved": n }))
}

fn handle_points_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(task_id) = str_param(req, "taskId") else {
        return missing(req, "taskId");
    };
    let st = state.service.state();
    let Some(task) = st.task(task_id) else {
        return err(&req.id, "not_found", "task not found", Some(json!({ "id": task_id })));
    };
    let entries: Vec<_> = st
        .points_entries
        .iter()
        .filter(|e| e.task_id == task_id)
        .map(|e| {
            json!({
                "studentId": e.student_id,
                "points": e.points,
                "bonus": is_bonus(e.points, task.max_points),
                "updatedAt": e.updated_at,
            })
        })
        .collect();
    ok(&req.id, json!({ "maxPoints": task.max_points, "entries": entries }))
}

fn handle_points_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(task_id) = str_param(req, "taskId") else {
        return missing(req, "taskId");
    };
    let Some(student_id) = str_param(req, "studentId") else {
        return missing(req, "studentId");
    };
    let points = match parse_points(req.params.get("points").unwrap_or(&serde_json::Value::Null)) {
        Ok(p) => p,
        Err(m) => return err(&req.id, "bad_params", m, None),
    };
    let result = state.service.save_points(task_id, student_id, points);
    let bonus = state
        .service
        .state()
        .task(task_id)
        .map(|t| is_bonus(points, t.max_points))
        .unwrap_or(false);
    respond(req, result, |_| json!({ "ok": true, "bonus": bonus }))
}

fn handle_points_bulk_save(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(task_id) = str_param(req, "taskId") else {
        return missing(req, "taskId");
    };
    let Some(raw) = req.params.get("entries").and_then(|v| v.as_array()) else {
        return missing(req, "entries");
    };
    if raw.len() > BULK_MAX_ENTRIES {
        return err(
            &req.id,
            "bad_params",
            "too many entries",
            Some(json!({ "max": BULK_MAX_ENTRIES, "count": raw.len() })),
        );
    }
    let mut entries = Vec::with_capacity(raw.len());
    for (i, e) in raw.iter().enumerate() {
        let Some(student_id) = e.get("studentId").and_then(|v| v.as_str()) else {
            return err(
                &req.id,
                "bad_params",
                "entry without studentId",
                Some(json!({ "index": i })),
            );
        };
        let points = match parse_points(e.get("points").unwrap_or(&serde_json::Value::Null)) {
            Ok(p) => p,
            Err(m) => return err(&req.id, "bad_params", m, Some(json!({ "index": i }))),
        };
        entries.push((student_id.to_string(), points));
    }
    let result = state.service.bulk_save_points(task_id, &entries);
    respond(req, result, |n| json!({ "saved": n }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "grades.list" => Some(handle_grades_list(state, req)),
        "grades.save" => Some(handle_grades_save(state, req)),
        "grades.bulkSave" => Some(handle_grades_bulk_save(state, req)),
        "points.list" => Some(handle_points_list(state, req)),
        "points.save" => Some(handle_points_save(state, req)),
        "points.bulkSave" => Some(handle_points_bulk_save(state, req)),
        _ => None,
    }
}
