use crate::calc;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{get_optional_str, get_required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use uuid::Uuid;

use super::policy::load_policy;

#[derive(Debug, Clone)]
struct ResolvedMark {
    student_id: String,
    roll_number: String,
    name: String,
    present: bool,
}

/// Truncates an incoming ISO date (with or without a time component) to the
/// calendar day. One roll call per day is keyed on this.
fn normalize_day(raw: &str) -> Result<String, HandlerErr> {
    let t = raw.trim();
    if let Ok(d) = chrono::NaiveDate::parse_from_str(t, "%Y-%m-%d") {
        return Ok(d.to_string());
    }
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(t) {
        return Ok(dt.date_naive().to_string());
    }
    Err(HandlerErr::bad_params(
        "date must be YYYY-MM-DD or an RFC 3339 timestamp",
    ))
}

fn class_students(
    conn: &Connection,
    class_id: &str,
) -> Result<HashMap<String, (String, String)>, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT id, roll_number, name FROM students WHERE class_id = ?")
        .map_err(HandlerErr::db_query)?;
    let rows = stmt
        .query_map([class_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                (r.get::<_, String>(1)?, r.get::<_, String>(2)?),
            ))
        })
        .and_then(|it| it.collect::<Result<HashMap<_, _>, _>>())
        .map_err(HandlerErr::db_query)?;
    Ok(rows)
}

/// Resolves raw presence marks against the class roster. Marks for unknown
/// or foreign students are skipped with a reason, not fatal; the caller
/// decides what an empty result means.
fn resolve_marks(
    conn: &Connection,
    class_id: &str,
    data: &[serde_json::Value],
) -> Result<(Vec<ResolvedMark>, Vec<String>), HandlerErr> {
    let roster = class_students(conn, class_id)?;
    let mut resolved = Vec::new();
    let mut skipped = Vec::new();
    let mut seen = HashSet::<String>::new();

    for entry in data {
        let Some(student_id) = entry.get("studentId").and_then(|v| v.as_str()) else {
            skipped.push("entry missing studentId".to_string());
            continue;
        };
        let Some(present) = entry.get("present").and_then(|v| v.as_bool()) else {
            skipped.push(format!("entry for {} missing present flag", student_id));
            continue;
        };
        let Some((roll_number, name)) = roster.get(student_id) else {
            skipped.push(format!("student {} is not in this class", student_id));
            continue;
        };
        if !seen.insert(student_id.to_string()) {
            skipped.push(format!("duplicate mark for student {}", student_id));
            continue;
        }
        resolved.push(ResolvedMark {
            student_id: student_id.to_string(),
            roll_number: roll_number.clone(),
            name: name.clone(),
            present,
        });
    }
    Ok((resolved, skipped))
}

fn attendance_take(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let class_code = get_required_str(params, "classCode")?;
    let subject = get_required_str(params, "subject")?.trim().to_string();
    if subject.is_empty() {
        return Err(HandlerErr::bad_params("subject must not be empty"));
    }
    let day = normalize_day(&get_required_str(params, "date")?)?;
    let taken_by = get_optional_str(params, "takenBy");
    let Some(data) = params.get("attendanceData").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing attendanceData"));
    };

    let class_id: Option<String> = conn
        .query_row("SELECT id FROM classes WHERE code = ?", [&class_code], |r| {
            r.get(0)
        })
        .optional()
        .map_err(HandlerErr::db_query)?;
    let Some(class_id) = class_id else {
        return Err(HandlerErr::not_found("class not found"));
    };

    // Idempotency guard: one session per class, subject and day.
    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM attendance_sessions WHERE class_id = ? AND subject = ? AND date = ?",
            (&class_id, &subject, &day),
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db_query)?;
    if let Some(session_id) = existing {
        return Err(HandlerErr {
            code: "attendance_already_taken",
            message: format!("attendance already recorded for {} on {}", subject, day),
            details: Some(json!({ "attendanceId": session_id })),
        });
    }

    let (resolved, skipped) = resolve_marks(conn, &class_id, data)?;
    if resolved.is_empty() {
        return Err(HandlerErr::conflict(
            "no_valid_students",
            "no valid students in attendance data",
        ));
    }

    let total = resolved.len() as i64;
    let present_count = resolved.iter().filter(|m| m.present).count() as i64;
    let absent_count = total - present_count;
    let session_id = Uuid::new_v4().to_string();

    let tx = conn.unchecked_transaction().map_err(HandlerErr::db_tx)?;
    tx.execute(
        "INSERT INTO attendance_sessions(
           id, class_id, subject, date, taken_by,
           total_count, present_count, absent_count, created_at
         ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
        (
            &session_id,
            &class_id,
            &subject,
            &day,
            taken_by.as_deref(),
            total,
            present_count,
            absent_count,
        ),
    )
    .map_err(|e| HandlerErr::db_insert(e, "attendance_sessions"))?;
    for m in &resolved {
        tx.execute(
            "INSERT INTO session_entries(session_id, student_id, roll_number, name, present)
             VALUES(?, ?, ?, ?, ?)",
            (
                &session_id,
                &m.student_id,
                &m.roll_number,
                &m.name,
                if m.present { 1 } else { 0 },
            ),
        )
        .map_err(|e| HandlerErr::db_insert(e, "session_entries"))?;
    }
    tx.commit().map_err(HandlerErr::db_commit)?;

    // Student-side records are appended after the session commit. A failure
    // in this loop leaves drift that repair.run reconciles from the entries.
    for m in &resolved {
        conn.execute(
            "INSERT INTO attendance_records(id, student_id, subject, date, present, session_id)
             VALUES(?, ?, ?, ?, ?, ?)",
            (
                Uuid::new_v4().to_string(),
                &m.student_id,
                &subject,
                &day,
                if m.present { 1 } else { 0 },
                &session_id,
            ),
        )
        .map_err(|e| HandlerErr::db_insert(e, "attendance_records"))?;
    }

    Ok(json!({
        "attendanceId": session_id,
        "subject": subject,
        "date": day,
        "totalStudents": total,
        "presentCount": present_count,
        "absentCount": absent_count,
        "skipped": skipped
    }))
}

fn attendance_update(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let session_id = get_required_str(params, "attendanceId")?;
    let Some(data) = params.get("attendanceData").and_then(|v| v.as_array()) else {
        return Err(HandlerErr::bad_params("missing attendanceData"));
    };

    let session: Option<(String, String, String)> = conn
        .query_row(
            "SELECT class_id, subject, date FROM attendance_sessions WHERE id = ?",
            [&session_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
        .map_err(HandlerErr::db_query)?;
    let Some((class_id, subject, day)) = session else {
        return Err(HandlerErr::not_found("attendance session not found"));
    };

    let (resolved, skipped) = resolve_marks(conn, &class_id, data)?;
    if resolved.is_empty() {
        return Err(HandlerErr::conflict(
            "no_valid_students",
            "no valid students in attendance data",
        ));
    }

    let total = resolved.len() as i64;
    let present_count = resolved.iter().filter(|m| m.present).count() as i64;
    let absent_count = total - present_count;

    // Wholesale replacement: entries, totals, and the student-side records
    // found by session back-reference all move together.
    let tx = conn.unchecked_transaction().map_err(HandlerErr::db_tx)?;
    tx.execute("DELETE FROM session_entries WHERE session_id = ?", [&session_id])
        .map_err(|e| HandlerErr::db_delete(e, "session_entries"))?;
    for m in &resolved {
        tx.execute(
            "INSERT INTO session_entries(session_id, student_id, roll_number, name, present)
             VALUES(?, ?, ?, ?, ?)",
            (
                &session_id,
                &m.student_id,
                &m.roll_number,
                &m.name,
                if m.present { 1 } else { 0 },
            ),
        )
        .map_err(|e| HandlerErr::db_insert(e, "session_entries"))?;
    }
    tx.execute(
        "UPDATE attendance_sessions SET total_count = ?, present_count = ?, absent_count = ?
         WHERE id = ?",
        (total, present_count, absent_count, &session_id),
    )
    .map_err(|e| HandlerErr::db_update(e, "attendance_sessions"))?;

    let covered: HashSet<&str> = resolved.iter().map(|m| m.student_id.as_str()).collect();
    for m in &resolved {
        let updated = tx
            .execute(
                "UPDATE attendance_records SET present = ? WHERE session_id = ? AND student_id = ?",
                (if m.present { 1 } else { 0 }, &session_id, &m.student_id),
            )
            .map_err(|e| HandlerErr::db_update(e, "attendance_records"))?;
        if updated == 0 {
            tx.execute(
                "INSERT INTO attendance_records(id, student_id, subject, date, present, session_id)
                 VALUES(?, ?, ?, ?, ?, ?)",
                (
                    Uuid::new_v4().to_string(),
                    &m.student_id,
                    &subject,
                    &day,
                    if m.present { 1 } else { 0 },
                    &session_id,
                ),
            )
            .map_err(|e| HandlerErr::db_insert(e, "attendance_records"))?;
        }
    }
    let linked: Vec<String> = {
        let mut stmt = tx
            .prepare("SELECT student_id FROM attendance_records WHERE session_id = ?")
            .map_err(HandlerErr::db_query)?;
        stmt.query_map([&session_id], |r| r.get::<_, String>(0))
            .and_then(|it| it.collect())
            .map_err(HandlerErr::db_query)?
    };
    for student_id in linked {
        if !covered.contains(student_id.as_str()) {
            tx.execute(
                "DELETE FROM attendance_records WHERE session_id = ? AND student_id = ?",
                (&session_id, &student_id),
            )
            .map_err(|e| HandlerErr::db_delete(e, "attendance_records"))?;
        }
    }
    tx.commit().map_err(HandlerErr::db_commit)?;

    Ok(json!({
        "attendanceId": session_id,
        "subject": subject,
        "date": day,
        "totalStudents": total,
        "presentCount": present_count,
        "absentCount": absent_count,
        "skipped": skipped
    }))
}

fn attendance_get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let session_id = get_required_str(params, "attendanceId")?;
    let session = conn
        .query_row(
            "SELECT id, class_id, subject, date, taken_by, total_count, present_count, absent_count
             FROM attendance_sessions WHERE id = ?",
            [&session_id],
            |row| {
                Ok(json!({
                    "attendanceId": row.get::<_, String>(0)?,
                    "classId": row.get::<_, String>(1)?,
                    "subject": row.get::<_, String>(2)?,
                    "date": row.get::<_, String>(3)?,
                    "takenBy": row.get::<_, Option<String>>(4)?,
                    "totalStudents": row.get::<_, i64>(5)?,
                    "presentCount": row.get::<_, i64>(6)?,
                    "absentCount": row.get::<_, i64>(7)?
                }))
            },
        )
        .optional()
        .map_err(HandlerErr::db_query)?;
    let Some(mut session) = session else {
        return Err(HandlerErr::not_found("attendance session not found"));
    };

    let mut stmt = conn
        .prepare(
            "SELECT student_id, roll_number, name, present
             FROM session_entries WHERE session_id = ? ORDER BY roll_number",
        )
        .map_err(HandlerErr::db_query)?;
    let entries = stmt
        .query_map([&session_id], |row| {
            Ok(json!({
                "studentId": row.get::<_, String>(0)?,
                "rollNumber": row.get::<_, String>(1)?,
                "name": row.get::<_, String>(2)?,
                "present": row.get::<_, i64>(3)? != 0
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;
    session["entries"] = json!(entries);
    Ok(session)
}

fn attendance_list_for_class(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let class_id = get_required_str(params, "classId")?;
    let subject = get_optional_str(params, "subject");

    let mut stmt = conn
        .prepare(
            "SELECT id, subject, date, total_count, present_count, absent_count
             FROM attendance_sessions
             WHERE class_id = ?1 AND (?2 IS NULL OR subject = ?2)
             ORDER BY date, subject",
        )
        .map_err(HandlerErr::db_query)?;
    let sessions = stmt
        .query_map((&class_id, subject.as_deref()), |row| {
            Ok(json!({
                "attendanceId": row.get::<_, String>(0)?,
                "subject": row.get::<_, String>(1)?,
                "date": row.get::<_, String>(2)?,
                "totalStudents": row.get::<_, i64>(3)?,
                "presentCount": row.get::<_, i64>(4)?,
                "absentCount": row.get::<_, i64>(5)?
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    Ok(json!({ "classId": class_id, "sessions": sessions }))
}

fn attendance_summary(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;

    let student: Option<(String, String, String)> = conn
        .query_row(
            "SELECT class_id, name, roll_number FROM students WHERE id = ?",
            [&student_id],
            |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
        )
        .optional()
        .map_err(HandlerErr::db_query)?;
    let Some((class_id, name, roll_number)) = student else {
        return Err(HandlerErr::not_found("student not found"));
    };

    let working_days: Option<i64> = conn
        .query_row(
            "SELECT total_working_days FROM classes WHERE id = ?",
            [&class_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(HandlerErr::db_query)?
        .flatten();

    let (total_days, present_days): (i64, i64) = conn
        .query_row(
            "SELECT COUNT(*), COALESCE(SUM(present), 0) FROM attendance_records WHERE student_id = ?",
            [&student_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .map_err(HandlerErr::db_query)?;

    let policy = load_policy(conn);
    let s = calc::attendance_summary(present_days, total_days, working_days, &policy);

    Ok(json!({
        "studentId": student_id,
        "name": name,
        "rollNumber": roll_number,
        "percentage": s.percentage,
        "status": s.status,
        "message": s.message,
        "fine": s.fine,
        "needsAction": s.needs_action,
        "presentDays": s.present_days,
        "totalDays": s.total_days,
        "workingDays": s.working_days,
        "workingDaysPercentage": s.working_days_percentage
    }))
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
        "attendance.take" => Some(with_db(state, req, attendance_take)),
        "attendance.update" => Some(with_db(state, req, attendance_update)),
        "attendance.get" => Some(with_db(state, req, attendance_get)),
        "attendance.listForClass" => Some(with_db(state, req, attendance_list_for_class)),
        "students.attendanceSummary" => Some(with_db(state, req, attendance_summary)),
        _ => None,
    }
}
