use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_optional_bool, get_required_i64, get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, Some(_))
            if f.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

fn code_part(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    let raw = get_required_str(params, key)?;
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_uppercase)
        .collect();
    if cleaned.is_empty() {
        return Err(HandlerErr::bad_params(format!("{} must not be empty", key)));
    }
    Ok(cleaned)
}

fn classes_create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let university = code_part(params, "university")?;
    let course = code_part(params, "course")?;
    let year = get_required_i64(params, "year")?;
    let semester = get_required_i64(params, "semester")?;
    if year < 1 || semester < 1 {
        return Err(HandlerErr::bad_params("year and semester must be positive"));
    }

    // The class code is derived, and the unique index on it is what makes
    // "one class per cohort" hold.
    let code = format!("{}-{}-{}-{}", university, course, year, semester);
    let class_id = Uuid::new_v4().to_string();

    let tx = conn.unchecked_transaction().map_err(HandlerErr::db_tx)?;
    if let Err(e) = tx.execute(
        "INSERT INTO classes(id, code, university, course, year, semester, created_at)
         VALUES(?, ?, ?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (&class_id, &code, &university, &course, year, semester),
    ) {
        if is_unique_violation(&e) {
            return Err(HandlerErr::conflict(
                "class_code_exists",
                format!("class {} already exists", code),
            ));
        }
        return Err(HandlerErr::db_insert(e, "classes"));
    }

    if let Some(subjects) = params.get("subjects").and_then(|v| v.as_array()) {
        for (i, subject) in subjects.iter().enumerate() {
            let name = subject
                .get("name")
                .and_then(|v| v.as_str())
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| HandlerErr::bad_params("subject name must not be empty"))?;
            let teacher = subject.get("teacher").and_then(|v| v.as_str());
            tx.execute(
                "INSERT INTO class_subjects(class_id, name, teacher, sort_order)
                 VALUES(?, ?, ?, ?)
                 ON CONFLICT(class_id, name) DO NOTHING",
                (&class_id, name, teacher, i as i64),
            )
            .map_err(|e| HandlerErr::db_insert(e, "class_subjects"))?;
        }
    }
    tx.commit().map_err(HandlerErr::db_commit)?;

    Ok(json!({ "classId": class_id, "code": code }))
}

fn classes_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    // Student counts are derived; the roster is never stored.
    let mut stmt = conn
        .prepare(
            "SELECT
               c.id,
               c.code,
               c.university,
               c.course,
               c.year,
               c.semester,
               c.total_working_days,
               c.working_days_locked,
               c.active,
               (SELECT COUNT(*) FROM students s WHERE s.class_id = c.id) AS student_count
             FROM classes c
             ORDER BY c.code",
        )
        .map_err(HandlerErr::db_query)?;
    let classes = stmt
        .query_map([], |row| {
            Ok(json!({
                "id": row.get::<_, String>(0)?,
                "code": row.get::<_, String>(1)?,
                "university": row.get::<_, String>(2)?,
                "course": row.get::<_, String>(3)?,
                "year": row.get::<_, i64>(4)?,
                "semester": row.get::<_, i64>(5)?,
                "totalWorkingDays": row.get::<_, Option<i64>>(6)?,
                "workingDaysLocked": row.get::<_, i64>(7)? != 0,
                "active": row.get::<_, i64>(8)? != 0,
                "studentCount": row.get::<_, i64>(9)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;
    Ok(json!({ "classes": classes }))
}

fn class_exists(conn: &Connection, class_id: &str) -> Result<bool, HandlerErr> {
    conn.query_row("SELECT 1 FROM classes WHERE id = ?", [class_id], |r| {
        r.get::<_, i64>(0)
    })
    .optional()
    .map(|v| v.is_some())
    .map_err(HandlerErr::db_query)
}

fn classes_roster(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    if !class_exists(conn, &class_id)? {
        return Err(HandlerErr::not_found("class not found"));
    }
    let mut stmt = conn
        .prepare(
            "SELECT id, name, roll_number, username
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
                "username": row.get::<_, String>(3)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;
    Ok(json!({ "classId": class_id, "students": students }))
}

fn classes_set_working_days(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let total = get_required_i64(params, "totalWorkingDays")?;
    let lock = get_optional_bool(params, "lock").unwrap_or(false);
    if total < 1 {
        return Err(HandlerErr::bad_params("totalWorkingDays must be positive"));
    }

    let locked: Option<i64> = conn
        .query_row(
            "SELECT working_days_locked FROM classes WHERE id = ?",
            [&class_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db_query)?;
    let Some(locked) = locked else {
        return Err(HandlerErr::not_found("class not found"));
    };
    if locked != 0 {
        return Err(HandlerErr::conflict(
            "working_days_locked",
            "working days are locked for this class",
        ));
    }

    conn.execute(
        "UPDATE classes SET total_working_days = ?, working_days_locked = ? WHERE id = ?",
        (total, if lock { 1 } else { 0 }, &class_id),
    )
    .map_err(|e| HandlerErr::db_update(e, "classes"))?;

    Ok(json!({ "classId": class_id, "totalWorkingDays": total, "locked": lock }))
}

fn classes_add_subject(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let name = get_required_str(params, "name")?.trim().to_string();
    if name.is_empty() {
        return Err(HandlerErr::bad_params("name must not be empty"));
    }
    let teacher = params.get("teacher").and_then(|v| v.as_str());
    if !class_exists(conn, &class_id)? {
        return Err(HandlerErr::not_found("class not found"));
    }

    let sort_order: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM class_subjects WHERE class_id = ?",
            [&class_id],
            |r| r.get(0),
        )
        .map_err(HandlerErr::db_query)?;

    if let Err(e) = conn.execute(
        "INSERT INTO class_subjects(class_id, name, teacher, sort_order) VALUES(?, ?, ?, ?)",
        (&class_id, &name, teacher, sort_order),
    ) {
        if is_unique_violation(&e) {
            return Err(HandlerErr::conflict(
                "subject_exists",
                format!("subject {} already exists for this class", name),
            ));
        }
        return Err(HandlerErr::db_insert(e, "class_subjects"));
    }
    Ok(json!({ "classId": class_id, "name": name }))
}

fn classes_subjects(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    if !class_exists(conn, &class_id)? {
        return Err(HandlerErr::not_found("class not found"));
    }
    let mut stmt = conn
        .prepare(
            "SELECT name, teacher FROM class_subjects WHERE class_id = ? ORDER BY sort_order",
        )
        .map_err(HandlerErr::db_query)?;
    let subjects = stmt
        .query_map([&class_id], |row| {
            Ok(json!({
                "name": row.get::<_, String>(0)?,
                "teacher": row.get::<_, Option<String>>(1)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;
    Ok(json!({ "classId": class_id, "subjects": subjects }))
}

fn classes_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    if !class_exists(conn, &class_id)? {
        return Err(HandlerErr::not_found("class not found"));
    }

    let tx = conn.unchecked_transaction().map_err(HandlerErr::db_tx)?;

    // Explicitly delete in dependency order (no ON DELETE CASCADE).
    tx.execute(
        "DELETE FROM attendance_records
         WHERE student_id IN (SELECT id FROM students WHERE class_id = ?)",
        [&class_id],
    )
    .map_err(|e| HandlerErr::db_delete(e, "attendance_records"))?;
    tx.execute(
        "DELETE FROM session_entries
         WHERE session_id IN (SELECT id FROM attendance_sessions WHERE class_id = ?)",
        [&class_id],
    )
    .map_err(|e| HandlerErr::db_delete(e, "session_entries"))?;
    tx.execute(
        "DELETE FROM attendance_sessions WHERE class_id = ?",
        [&class_id],
    )
    .map_err(|e| HandlerErr::db_delete(e, "attendance_sessions"))?;
    tx.execute(
        "DELETE FROM marks
         WHERE student_id IN (SELECT id FROM students WHERE class_id = ?)",
        [&class_id],
    )
    .map_err(|e| HandlerErr::db_delete(e, "marks"))?;
    tx.execute("DELETE FROM students WHERE class_id = ?", [&class_id])
        .map_err(|e| HandlerErr::db_delete(e, "students"))?;
    tx.execute("DELETE FROM class_subjects WHERE class_id = ?", [&class_id])
        .map_err(|e| HandlerErr::db_delete(e, "class_subjects"))?;
    tx.execute("DELETE FROM classes WHERE id = ?", [&class_id])
        .map_err(|e| HandlerErr::db_delete(e, "classes"))?;

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
        "classes.create" => Some(with_db(state, req, classes_create)),
        "classes.list" => Some(with_db(state, req, |c, _| classes_list(c))),
        "classes.roster" => Some(with_db(state, req, classes_roster)),
        "classes.setWorkingDays" => Some(with_db(state, req, classes_set_working_days)),
        "classes.addSubject" => Some(with_db(state, req, classes_add_subject)),
        "classes.subjects" => Some(with_db(state, req, classes_subjects)),
        "classes.delete" => Some(with_db(state, req, classes_delete)),
        _ => None,
    }
}
