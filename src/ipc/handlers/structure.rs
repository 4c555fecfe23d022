use crate::ipc::error::ok;
use crate::ipc::helpers::{missing, respond, str_param, typed_param};
use crate::ipc::types::{AppState, Request};
use crate::service::{
    AssessmentPatch, CategoryPatch, NewAssessment, NewCategory, NewSubItem, NewTask, SubItemPatch,
    TaskPatch,
};
use serde_json::json;

fn handle_categories_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(group_id) = str_param(req, "groupId") else {
        return missing(req, "groupId");
    };
    let categories: Vec<_> = state
        .service
        .state()
        .categories
        .iter()
        .filter(|c| c.group_id == group_id)
        .collect();
    ok(&req.id, json!({ "categories": categories }))
}

fn handle_categories_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let input: NewCategory = match typed_param(req, None) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let result = state.service.create_category(input);
    respond(req, result, |c| json!({ "category": c }))
}

fn handle_categories_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(category_id) = str_param(req, "categoryId") else {
        return missing(req, "categoryId");
    };
    let patch: CategoryPatch = match typed_param(req, Some("patch")) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let result = state.service.update_category(category_id, patch);
    respond(req, result, |c| json!({ "category": c }))
}

fn handle_categories_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(category_id) = str_param(req, "categoryId") else {
        return missing(req, "categoryId");
    };
    let result = state.service.delete_category(category_id);
    respond(req, result, |_| json!({ "ok": true }))
}

fn handle_assessments_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(category_id) = str_param(req, "categoryId") else {
        return missing(req, "categoryId");
    };
    let assessments: Vec<_> = state.service.state().assessments_of(category_id).collect();
    ok(&req.id, json!({ "assessments": assessments }))
}

fn handle_assessments_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let input: NewAssessment = match typed_param(req, None) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let result = state.service.create_assessment(input);
    respond(req, result, |a| json!({ "assessment": a }))
}

fn handle_assessments_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(assessment_id) = str_param(req, "assessmentId") else {
        return missing(req, "assessmentId");
    };
    let patch: AssessmentPatch = match typed_param(req, Some("patch")) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let result = state.service.update_assessment(assessment_id, patch);
    respond(req, result, |a| json!({ "assessment": a }))
}

fn handle_assessments_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(assessment_id) = str_param(req, "assessmentId") else {
        return missing(req, "assessmentId");
    };
    let result = state.service.delete_assessment(assessment_id);
    respond(req, result, |_| json!({ "ok": true }))
}

fn handle_sub_items_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(assessment_id) = str_param(req, "assessmentId") else {
        return missing(req, "assessmentId");
    };
    let items = state.service.state().sub_items_of(assessment_id);
    ok(&req.id, json!({ "subItems": items }))
}

fn handle_sub_items_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let input: NewSubItem = match typed_param(req, None) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let result = state.service.create_sub_item(input);
    respond(req, result, |s| json!({ "subItem": s }))
}

fn handle_sub_items_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(sub_item_id) = str_param(req, "subItemId") else {
        return missing(req, "subItemId");
    };
    let patch: SubItemPatch = match typed_param(req, Some("patch")) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let result = state.service.update_sub_item(sub_item_id, patch);
    respond(req, result, |s| json!({ "subItem": s }))
}

fn handle_sub_items_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(sub_item_id) = str_param(req, "subItemId") else {
        return missing(req, "subItemId");
    };
    let result = state.service.delete_sub_item(sub_item_id);
    respond(req, result, |_| json!({ "ok": true }))
}

fn handle_tasks_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(assessment_id) = str_param(req, "assessmentId") else {
        return missing(req, "assessmentId");
    };
    let tasks = state.service.state().tasks_of(assessment_id);
    let max_total: f64 = tasks.iter().map(|t| t.max_points).sum();
    ok(&req.id, json!({ "tasks": tasks, "maxPoints": max_total }))
}

fn handle_tasks_create(state: &mut AppState, req: &Request) -> serde_json::Value {
    let input: NewTask = match typed_param(req, None) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let result = state.service.create_task(input);
    respond(req, result, |t| json!({ "task": t }))
}

fn handle_tasks_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(task_id) = str_param(req, "taskId") else {
        return missing(req, "taskId");
    };
    let patch: TaskPatch = match typed_param(req, Some("patch")) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let result = state.service.update_task(task_id, patch);
    respond(req, result, |t| json!({ "task": t }))
}

fn handle_tasks_delete(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(task_id) = str_param(req, "taskId") else {
        return missing(req, "taskId");
    };
    let result = state.service.delete_task(task_id);
    respond(req, result, |_| json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "categories.list" => Some(handle_categories_list(state, req)),
        "categories.create" => Some(handle_categories_create(state, req)),
        "categories.update" => Some(handle_categories_update(state, req)),
        "categories.delete" => Some(handle_categories_delete(state, req)),
        "assessments.list" => Some(handle_assessments_list(state, req)),
        "assessments.create" => Some(handle_assessments_create(state, req)),
        "assessments.update" => Some(handle_assessments_update(state, req)),
        "assessments.delete" => Some(handle_assessments_delete(state, req)),
        "subItems.list" => Some(handle_sub_items_list(state, req)),
        "subItems.create" => Some(handle_sub_items_create(state, req)),
        "subItems.update" => Some(handle_sub_items_update(state, req)),
        "subItems.delete" => Some(handle_sub_items_delete(state, req)),
        "tasks.list" => Some(handle_tasks_list(state, req)),
        "tasks.create" => Some(handle_tasks_create(state, req)),
        "tasks.update" => Some(handle_tasks_update(state, req)),
        "tasks.delete" => Some(handle_tasks_delete(state, req)),
        _ => None,
    }
}
