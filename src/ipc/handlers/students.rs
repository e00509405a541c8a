use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

fn students_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM classes WHERE id = ?", [&class_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(HandlerErr::db_query)?;
    if exists.is_none() {
        return Err(HandlerErr::not_found("class not found"));
    }

    let mut stmt = conn
        .prepare(
            "SELECT id, name, roll_number, username, dob, parent_name, parent_phone, address
             FROM students
             WHERE class_id = ?
             ORDER BY roll_number",
        )
        .map_err(HandlerErr::db_query)?;
    let students = stmt
        .query_map([&class_id], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "name": row.get::<_, String>(1)?,
                "rollNumber": row.get::<_, String>(2)?,
                "username": row.get::<_, String>(3)?,
                "dob": row.get::<_, String>(4)?,
                "parentName": row.get::<_, String>(5)?,
                "parentPhone": row.get::<_, Option<String>>(6)?,
                "address": row.get::<_, String>(7)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;
    Ok(json!({ "classId": class_id, "students": students }))
}

fn students_get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;

    let student = conn
        .query_row(
            "SELECT id, class_id, name, roll_number, username, dob, parent_name,
                    parent_phone, address
             FROM students WHERE id = ?",
            [&student_id],
            |row| {
                Ok(json!({
                    "id": row.get::<_, String>(0)?,
                    "classId": row.get::<_, String>(1)?,
                    "name": row.get::<_, String>(2)?,
                    "rollNumber": row.get::<_, String>(3)?,
                    "username": row.get::<_, String>(4)?,
                    "dob": row.get::<_, String>(5)?,
                    "parentName": row.get::<_, String>(6)?,
                    "parentPhone": row.get::<_, Option<String>>(7)?,
                    "address": row.get::<_, String>(8)?
                }))
            },
        )
        .optional()
        .map_err(HandlerErr::db_query)?;
    let Some(mut student) = student else {
        return Err(HandlerErr::not_found("student not found"));
    };

    let mut stmt = conn
        .prepare(
            "SELECT subject, date, present, session_id
             FROM attendance_records
             WHERE student_id = ?
             ORDER BY date, rowid",
        )
        .map_err(HandlerErr::db_query)?;
    let attendance = stmt
        .query_map([&student_id], |row| {
            Ok(json!({
                "subject": row.get::<_, String>(0)?,
                "date": row.get::<_, String>(1)?,
                "present": row.get::<_, i64>(2)? != 0,
                "sessionId": row.get::<_, Option<String>>(3)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;
    student["attendance"] = json!(attendance);

    Ok(student)
}

fn students_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let exists: Option<i64> = conn
        .query_row("SELECT 1 FROM students WHERE id = ?", [&student_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(HandlerErr::db_query)?;
    if exists.is_none() {
        return Err(HandlerErr::not_found("student not found"));
    }

    let tx = conn.unchecked_transaction().map_err(HandlerErr::db_tx)?;
    tx.execute(
        "DELETE FROM attendance_records WHERE student_id = ?",
        [&student_id],
    )
    .map_err(|e| HandlerErr::db_delete(e, "attendance_records"))?;
    tx.execute("DELETE FROM marks WHERE student_id = ?", [&student_id])
        .map_err(|e| HandlerErr::db_delete(e, "marks"))?;
    tx.execute(
        "DELETE FROM session_entries WHERE student_id = ?",
        [&student_id],
    )
    .map_err(|e| HandlerErr::db_delete(e, "session_entries"))?;
    tx.execute("DELETE FROM students WHERE id = ?", [&student_id])
        .map_err(|e| HandlerErr::db_delete(e, "students"))?;
    tx.commit().map_err(HandlerErr::db_commit)?;

    Ok(json!({ "ok": true }))
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
        "students.list" => Some(with_db(state, req, students_list)),
        "students.get" => Some(with_db(state, req, students_get)),
        "students.delete" => Some(with_db(state, req, students_delete)),
        _ => None,
    }
}
