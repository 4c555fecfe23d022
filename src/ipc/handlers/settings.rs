use crate::ipc::error::{err, ok};
use crate::ipc::helpers::respond;
use crate::ipc::types::{AppState, Request};
use serde_json::json;

const ALLOWED_SEPARATORS: [char; 2] = [',', '.'];

fn handle_settings_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(&req.id, json!({ "engine": state.service.settings() }))
}

fn handle_settings_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(patch) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "missing patch", None);
    };
    let mut next = state.service.settings().clone();
    for (key, value) in patch {
        match key.as_str() {
            "decimalSeparator" => {
                let sep = value.as_str().and_then(|s| {
                    let mut chars = s.chars();
                    match (chars.next(), chars.next()) {
                        (Some(c), None) => Some(c),
                        _ => None,
                    }
                });
                match sep {
                    Some(c) if ALLOWED_SEPARATORS.contains(&c) => next.decimal_separator = c,
                    _ => {
                        return err(
                            &req.id,
                            "bad_params",
                            "decimalSeparator must be \",\" or \".\"",
                            Some(json!({ "value": value })),
                        )
                    }
                }
            }
            other => {
                return err(
                    &req.id,
                    "bad_params",
                    format!("unknown setting: {}", other),
                    None,
                )
            }
        }
    }
    let result = state.service.update_settings(next);
    respond(req, result, |_| json!({ "engine": state.service.settings() }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "settings.get" => Some(handle_settings_get(state, req)),
        "settings.update" => Some(handle_settings_update(state, req)),
        _ => None,
    }
}
