use serde::de::DeserializeOwned;
use serde_json::json;

use crate::error::GradebookError;
use crate::ipc::error::{err, from_gradebook, ok};
use crate::ipc::types::Request;

pub fn str_param<'a>(req: &'a Request, key: &str) -> Option<&'a str> {
    req.params.get(key).and_then(|v| v.as_str())
}

pub fn missing(req: &Request, key: &str) -> serde_json::Value {
    err(&req.id, "bad_params", format!("missing {}", key), None)
}

/// Deserialize `params[key]` (or the whole params object when `key` is
/// `None`) into `T`.
pub fn typed_param<T: DeserializeOwned>(
    req: &Request,
    key: Option<&str>,
) -> Result<T, serde_json::Value> {
    let raw = match key {
        Some(k) => match req.params.get(k) {
            Some(v) => v.clone(),
            None => return Err(missing(req, k)),
        },
        None => req.params.clone(),
    };
    serde_json::from_value(raw).map_err(|e| {
        err(
            &req.id,
            "bad_params",
            format!("invalid params: {}", e),
            key.map(|k| json!({ "field": k })),
        )
    })
}

/// Map a service result onto the response envelope.
pub fn respond<T>(
    req: &Request,
    result: Result<T, GradebookError>,
    render: impl FnOnce(T) -> serde_json::Value,
) -> serde_json::Value {
    match result {
        Ok(v) => ok(&req.id, render(v)),
        Err(e) => from_gradebook(&req.id, &e),
    }
}

/// Points accepted over the wire: `null`, or a finite number >= 0 in
/// half-point steps.
pub fn parse_points(v: &serde_json::Value) -> Result<Option<f64>, String> {
    if v.is_null() {
        return Ok(None);
    }
    let Some(p) = v.as_f64() else {
        return Err("points must be a number or null".to_string());
    };
    if !p.is_finite() || p < 0.0 {
        return Err("points must be a finite number >= 0".to_string());
    }
    if (p * 2.0).fract() != 0.0 {
        return Err("points must be a multiple of 0.5".to_string());
    }
    Ok(Some(p))
}

/// `null`, empty or a label string.
pub fn parse_grade(v: Option<&serde_json::Value>) -> Result<Option<String>, String> {
    match v {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(serde_json::Value::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err("grade must be a string or null".to_string()),
    }
}
