use crate::ipc::error::ok;
use crate::ipc::helpers::{missing, respond, str_param};
use crate::ipc::types::{AppState, Request};
use serde_json::json;

fn handle_feedback_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(assessment_id) = str_param(req, "assessmentId") else {
        return missing(req, "assessmentId");
    };
    let items = state.service.feedback_for(assessment_id);
    ok(&req.id, json!({ "feedback": items }))
}

fn handle_feedback_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(assessment_id) = str_param(req, "assessmentId") else {
        return missing(req, "assessmentId");
    };
    let Some(student_id) = str_param(req, "studentId") else {
        return missing(req, "studentId");
    };
    let text = str_param(req, "text").unwrap_or("");
    let result = state.service.set_feedback(assessment_id, student_id, text);
    respond(req, result, |f| json!({ "feedback": f }))
}

fn handle_feedback_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(assessment_id) = str_param(req, "assessmentId") else {
        return missing(req, "assessmentId");
    };
    let Some(student_id) = str_param(req, "studentId") else {
        return missing(req, "studentId");
    };
    let result = state.service.set_feedback(assessment_id, student_id, "");
    respond(req, result, |_| json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "feedback.list" => Some(handle_feedback_list(state, req)),
        "feedback.set" => Some(handle_feedback_set(state, req)),
        "feedback.delete" => Some(handle_feedback_delete(state, req)),
        _ => None,
    }
}
