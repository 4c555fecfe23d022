use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{missing, respond, str_param, typed_param};
use crate::ipc::types::{AppState, Request};
use crate::scale;
use crate::threshold::{self, ThresholdRowInput};
use serde_json::json;

fn handle_scales_list(_state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(&req.id, json!({ "scales": scale::builtin_scales() }))
}

/// Global table of a scale, or the effective table of an exam when
/// `assessmentId` is given.
fn handle_thresholds_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let st = state.service.state();
    if let Some(assessment_id) = str_param(req, "assessmentId") {
        let Some(assessment) = st.assessment(assessment_id) else {
            return err(
                &req.id,
                "not_found",
                "assessment not found",
                Some(json!({ "id": assessment_id })),
            );
        };
        let scale_id = str_param(req, "scaleId")
            .map(str::to_string)
            .or_else(|| state.service.context().map(|c| c.group.scale_id.clone()))
            .unwrap_or_else(|| scale::fallback_scale().id.to_string());
        let table = threshold::effective_table(assessment, &st.thresholds, &scale_id);
        let overridden = assessment
            .threshold_override
            .as_ref()
            .map(|t| !t.is_empty())
            .unwrap_or(false);
        return ok(
            &req.id,
            json!({
                "scaleId": scale_id,
                "overridden": overridden,
                "rows": &*table,
            }),
        );
    }
    let Some(scale_id) = str_param(req, "scaleId") else {
        return missing(req, "scaleId");
    };
    let table = threshold::global_table(&st.thresholds, scale_id);
    ok(&req.id, json!({ "scaleId": scale_id, "rows": &*table }))
}

fn handle_thresholds_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(scale_id) = str_param(req, "scaleId") else {
        return missing(req, "scaleId");
    };
    let rows: Vec<ThresholdRowInput> = match typed_param(req, Some("rows")) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let result = state.service.update_threshold_table(scale_id, &rows);
    respond(req, result, |table| json!({ "rows": table }))
}

fn handle_thresholds_reset(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(scale_id) = str_param(req, "scaleId") else {
        return missing(req, "scaleId");
    };
    let result = state.service.reset_threshold_table(scale_id);
    respond(req, result, |table| json!({ "rows": table }))
}

/// `rows: null` drops the exam's own table.
fn handle_assessment_thresholds_set(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(assessment_id) = str_param(req, "assessmentId") else {
        return missing(req, "assessmentId");
    };
    let rows: Option<Vec<ThresholdRowInput>> = match typed_param(req, Some("rows")) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let result = state
        .service
        .set_assessment_thresholds(assessment_id, rows.as_deref());
    respond(req, result, |a| json!({ "assessment": a }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "scales.list" => Some(handle_scales_list(state, req)),
        "thresholds.get" => Some(handle_thresholds_get(state, req)),
        "thresholds.update" => Some(handle_thresholds_update(state, req)),
        "thresholds.reset" => Some(handle_thresholds_reset(state, req)),
        "assessments.setThresholds" => Some(handle_assessment_thresholds_set(state, req)),
        _ => None,
    }
}
