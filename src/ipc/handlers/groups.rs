use crate::ipc::error::ok;
use crate::ipc::helpers::{respond, typed_param};
use crate::ipc::types::{AppState, Request};
use crate::model::{LearningGroup, Student};
use crate::service::GroupContext;
use serde_json::json;

fn context_json(state: &AppState) -> serde_json::Value {
    match state.service.context() {
        Some(ctx) => json!({
            "group": ctx.group,
            "studentCount": ctx.students.len(),
            "columnCount": state.service.columns().len(),
        }),
        None => json!({ "group": null }),
    }
}

fn handle_group_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let group: LearningGroup = match typed_param(req, Some("group")) {
        Ok(g) => g,
        Err(resp) => return resp,
    };
    let students: Vec<Student> = match typed_param(req, Some("students")) {
        Ok(s) => s,
        Err(resp) => return resp,
    };
    state
        .service
        .select_group(Some(GroupContext { group, students }));
    ok(&req.id, context_json(state))
}

fn handle_group_clear(state: &mut AppState, req: &Request) -> serde_json::Value {
    state.service.select_group(None);
    ok(&req.id, context_json(state))
}

fn handle_group_recalculate(state: &mut AppState, req: &Request) -> serde_json::Value {
    let result = state.service.recalculate_all();
    respond(req, result, |_| json!({ "columnCount": state.service.columns().len() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "group.select" => Some(handle_group_select(state, req)),
        "group.clear" => Some(handle_group_clear(state, req)),
        "group.get" => Some(ok(&req.id, context_json(state))),
        "group.recalculate" => Some(handle_group_recalculate(state, req)),
        _ => None,
    }
}
