use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{missing, respond, str_param};
use crate::ipc::types::{AppState, Request};
use crate::model::OverrideTarget;
use serde_json::json;

fn target_param(req: &Request) -> Result<OverrideTarget, serde_json::Value> {
    let Some(raw) = str_param(req, "target") else {
        return Err(missing(req, "target"));
    };
    OverrideTarget::parse(raw).ok_or_else(|| {
        err(
            &req.id,
            "bad_params",
            "target must be one of: half-year-1, half-year-2, overall",
            Some(json!({ "target": raw })),
        )
    })
}

fn handle_overrides_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(ctx) = state.service.context() else {
        return err(&req.id, "no_group", "no learning group selected", None);
    };
    let records: Vec<_> = state
        .service
        .state()
        .overrides
        .for_group(&ctx.group.id)
        .collect();
    ok(&req.id, json!({ "overrides": records }))
}

fn handle_overrides_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(student_id) = str_param(req, "studentId") else {
        return missing(req, "studentId");
    };
    let target = match target_param(req) {
        Ok(t) => t,
        Err(resp) => return resp,
    };
    let Some(grade) = str_param(req, "grade") else {
        return missing(req, "grade");
    };
    let result = state.service.set_manual_override(student_id, target, grade);
    respond(req, result, |_| json!({ "ok": true }))
}

fn handle_overrides_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(student_id) = str_param(req, "studentId") else {
        return missing(req, "studentId");
    };
    let target = match target_param(req) {
        Ok(t) => t,
        Err(resp) => return resp,
    };
    let result = state.service.delete_manual_override(student_id, target);
    respond(req, result, |removed| json!({ "removed": removed }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "overrides.list" => Some(handle_overrides_list(state, req)),
        "overrides.set" => Some(handle_overrides_set(state, req)),
        "overrides.delete" => Some(handle_overrides_delete(state, req)),
        _ => None,
    }
}
