use crate::enroll::{enroll_student, EnrolledStudent};
use crate::intake::{parse_student_rows, RowOutcome};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_optional_str, get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

enum OnError {
    Continue,
    Stop,
}

fn parse_on_error(params: &serde_json::Value) -> Result<OnError, HandlerErr> {
    match get_optional_str(params, "onError").as_deref() {
        None | Some("continue") => Ok(OnError::Continue),
        Some("stop") => Ok(OnError::Stop),
        Some(other) => Err(HandlerErr::bad_params(format!(
            "onError must be continue or stop, got {}",
            other
        ))),
    }
}

fn load_batch_text(params: &serde_json::Value) -> Result<String, HandlerErr> {
    if let Some(text) = params.get("csvText").and_then(|v| v.as_str()) {
        return Ok(text.to_string());
    }
    let in_path = get_required_str(params, "inPath")
        .map_err(|_| HandlerErr::bad_params("missing csvText or inPath"))?;
    std::fs::read_to_string(&in_path).map_err(|e| HandlerErr {
        code: "parse_failed",
        message: e.to_string(),
        details: Some(json!({ "path": in_path })),
    })
}

fn upload_batch(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let on_error = parse_on_error(params)?;
    let text = load_batch_text(params)?;

    let class_code: Option<String> = conn
        .query_row("SELECT code FROM classes WHERE id = ?", [&class_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(HandlerErr::db_query)?;
    let Some(class_code) = class_code else {
        return Err(HandlerErr::not_found("class not found"));
    };

    let outcomes = parse_student_rows(&text).map_err(|m| HandlerErr {
        code: "bad_csv",
        message: m,
        details: None,
    })?;

    // Rows run strictly in file order: the username collision loop must see
    // every earlier row of this batch already committed.
    let total = outcomes.len();
    let mut created: Vec<EnrolledStudent> = Vec::new();
    let mut errors: Vec<String> = Vec::new();
    for outcome in outcomes {
        let failed = match outcome {
            RowOutcome::Invalid(reason) => {
                errors.push(reason);
                true
            }
            RowOutcome::Valid(row) => match enroll_student(conn, &class_id, &class_code, &row) {
                Ok(student) => {
                    created.push(student);
                    false
                }
                Err(e) => {
                    errors.push(e.into_message());
                    true
                }
            },
        };
        if failed && matches!(on_error, OnError::Stop) {
            break;
        }
    }

    let students: Vec<serde_json::Value> = created
        .iter()
        .map(|s| {
            json!({
                "name": s.name,
                "rollNumber": s.roll_number,
                "username": s.username,
                "password": s.password
            })
        })
        .collect();

    Ok(json!({
        "message": format!("{} of {} students enrolled", created.len(), total),
        "studentsUploaded": created.len(),
        "totalProcessed": total,
        "students": students,
        "errors": errors
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "students.uploadBatch" => {
            let Some(conn) = state.db.as_ref() else {
                return Some(err(&req.id, "no_workspace", "select a workspace first", None));
            };
            Some(match upload_batch(conn, &req.params) {
                Ok(result) => ok(&req.id, result),
                Err(error) => error.response(&req.id),
            })
        }
        _ => None,
    }
}
