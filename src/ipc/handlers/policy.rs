use crate::calc::AttendancePolicy;
use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::HandlerErr;
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;

const POLICY_KEY: &str = "policy.attendance";

/// Compiled-in defaults overlaid with whatever the workspace has stored.
pub fn load_policy(conn: &Connection) -> AttendancePolicy {
    let mut policy = AttendancePolicy::default();
    if let Ok(Some(stored)) = db::settings_get_json(conn, POLICY_KEY) {
        if let Some(v) = stored.get("fineRatePerDay").and_then(|v| v.as_f64()) {
            policy.fine_rate_per_day = v;
        }
        if let Some(v) = stored.get("safeThreshold").and_then(|v| v.as_f64()) {
            policy.safe_threshold = v;
        }
        if let Some(v) = stored.get("warningThreshold").and_then(|v| v.as_f64()) {
            policy.warning_threshold = v;
        }
        if let Some(v) = stored.get("requiredFraction").and_then(|v| v.as_f64()) {
            policy.required_fraction = v;
        }
    }
    policy
}

fn policy_json(p: &AttendancePolicy) -> serde_json::Value {
    json!({
        "fineRatePerDay": p.fine_rate_per_day,
        "safeThreshold": p.safe_threshold,
        "warningThreshold": p.warning_threshold,
        "requiredFraction": p.required_fraction
    })
}

fn policy_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let mut policy = load_policy(conn);

    if let Some(v) = params.get("fineRatePerDay").and_then(|v| v.as_f64()) {
        if v < 0.0 {
            return Err(HandlerErr::bad_params("fineRatePerDay must not be negative"));
        }
        policy.fine_rate_per_day = v;
    }
    if let Some(v) = params.get("safeThreshold").and_then(|v| v.as_f64()) {
        if !(0.0..=100.0).contains(&v) {
            return Err(HandlerErr::bad_params("safeThreshold must be 0..=100"));
        }
        policy.safe_threshold = v;
    }
    if let Some(v) = params.get("warningThreshold").and_then(|v| v.as_f64()) {
        if !(0.0..=100.0).contains(&v) {
            return Err(HandlerErr::bad_params("warningThreshold must be 0..=100"));
        }
        policy.warning_threshold = v;
    }
    if let Some(v) = params.get("requiredFraction").and_then(|v| v.as_f64()) {
        if !(0.0..=1.0).contains(&v) {
            return Err(HandlerErr::bad_params("requiredFraction must be 0..=1"));
        }
        policy.required_fraction = v;
    }
    if policy.warning_threshold > policy.safe_threshold {
        return Err(HandlerErr::bad_params(
            "warningThreshold must not exceed safeThreshold",
        ));
    }

    db::settings_set_json(conn, POLICY_KEY, &policy_json(&policy)).map_err(|e| HandlerErr {
        code: "db_update_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "settings" })),
    })?;
    Ok(policy_json(&policy))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "policy.get" => {
            let Some(conn) = state.db.as_ref() else {
                return Some(err(&req.id, "no_workspace", "select a workspace first", None));
            };
            Some(ok(&req.id, policy_json(&load_policy(conn))))
        }
        "policy.update" => {
            let Some(conn) = state.db.as_ref() else {
                return Some(err(&req.id, "no_workspace", "select a workspace first", None));
            };
            Some(match policy_update(conn, &req.params) {
                Ok(result) => ok(&req.id, result),
                Err(error) => error.response(&req.id),
            })
        }
        _ => None,
    }
}
