use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_required_f64, get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn student_exists(conn: &Connection, student_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM students WHERE id = ?", [student_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(HandlerErr::db_query)
}

fn marks_add(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let subject = get_required_str(params, "subject")?.trim().to_string();
    if subject.is_empty() {
        return Err(HandlerErr::bad_params("subject must not be empty"));
    }
    let score = get_required_f64(params, "score")?;
    let max_score = get_required_f64(params, "maxScore")?;
    let exam_type = get_required_str(params, "examType")?.to_ascii_lowercase();

    if max_score <= 0.0 {
        return Err(HandlerErr::bad_params("maxScore must be positive"));
    }
    if score < 0.0 || score > max_score {
        return Err(HandlerErr::bad_params("score must be within 0..=maxScore"));
    }
    if exam_type != "internal" && exam_type != "semester" {
        return Err(HandlerErr::bad_params(
            "examType must be internal or semester",
        ));
    }
    if !student_exists(conn, &student_id)? {
        return Err(HandlerErr::not_found("student not found"));
    }

    let mark_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO marks(id, student_id, subject, score, max_score, exam_type, created_at)
         VALUES(?, ?, ?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (&mark_id, &student_id, &subject, score, max_score, &exam_type),
    )
    .map_err(|e| HandlerErr::db_insert(e, "marks"))?;

    Ok(json!({ "markId": mark_id, "studentId": student_id }))
}

fn marks_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    if !student_exists(conn, &student_id)? {
        return Err(HandlerErr::not_found("student not found"));
    }

    let mut stmt = conn
        .prepare(
            "SELECT id, subject, score, max_score, exam_type
             FROM marks WHERE student_id = ? ORDER BY rowid",
        )
        .map_err(HandlerErr::db_query)?;
    let marks = stmt
        .query_map([&student_id], |row| {
            Ok(json!({
                "markId": row.get::<_, String>(0)?,
                "subject": row.get::<_, String>(1)?,
                "score": row.get::<_, f64>(2)?,
                "maxScore": row.get::<_, f64>(3)?,
                "examType": row.get::<_, String>(4)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;
    Ok(json!({ "studentId": student_id, "marks": marks }))
}

fn with_db(
    state: &AppState,
    req: &Request,
    f: impl FnOnce(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "marks.add" => Some(with_db(state, req, marks_add)),
        "marks.list" => Some(with_db(state, req, marks_list)),
        _ => None,
    }
}
