use crate::ipc::error::{err, ok};
use crate::ipc::helpers::HandlerErr;
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

/// Compensating repair for the two drift classes the normal flow can leave
/// behind: records whose owning side vanished out-of-band, and attendance
/// records that never got (or lost) their session back-reference. Every
/// step only removes entries already proven invalid or fills in values
/// derivable from the session entries, so the pass is idempotent.
fn repair_run(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let tx = conn.unchecked_transaction().map_err(HandlerErr::db_tx)?;

    // Students whose class no longer resolves, with their dependent rows.
    let orphan_students: Vec<String> = {
        let mut stmt = tx
            .prepare(
                "SELECT s.id FROM students s
                 LEFT JOIN classes c ON c.id = s.class_id
                 WHERE c.id IS NULL",
            )
            .map_err(HandlerErr::db_query)?;
        stmt.query_map([], |r| r.get::<_, String>(0))
            .and_then(|it| it.collect())
            .map_err(HandlerErr::db_query)?
    };
    for student_id in &orphan_students {
        tx.execute(
            "DELETE FROM attendance_records WHERE student_id = ?",
            [student_id],
        )
        .map_err(|e| HandlerErr::db_delete(e, "attendance_records"))?;
        tx.execute("DELETE FROM marks WHERE student_id = ?", [student_id])
            .map_err(|e| HandlerErr::db_delete(e, "marks"))?;
        tx.execute(
            "DELETE FROM session_entries WHERE student_id = ?",
            [student_id],
        )
        .map_err(|e| HandlerErr::db_delete(e, "session_entries"))?;
        tx.execute("DELETE FROM students WHERE id = ?", [student_id])
            .map_err(|e| HandlerErr::db_delete(e, "students"))?;
    }

    // Sessions whose class no longer resolves.
    let orphan_sessions: Vec<String> = {
        let mut stmt = tx
            .prepare(
                "SELECT a.id FROM attendance_sessions a
                 LEFT JOIN classes c ON c.id = a.class_id
                 WHERE c.id IS NULL",
            )
            .map_err(HandlerErr::db_query)?;
        stmt.query_map([], |r| r.get::<_, String>(0))
            .and_then(|it| it.collect())
            .map_err(HandlerErr::db_query)?
    };
    for session_id in &orphan_sessions {
        tx.execute(
            "DELETE FROM session_entries WHERE session_id = ?",
            [session_id],
        )
        .map_err(|e| HandlerErr::db_delete(e, "session_entries"))?;
        tx.execute(
            "DELETE FROM attendance_sessions WHERE id = ?",
            [session_id],
        )
        .map_err(|e| HandlerErr::db_delete(e, "attendance_sessions"))?;
    }

    // Roster-side leftovers: entries and records for students deleted
    // out-of-band.
    let entries_removed = tx
        .execute(
            "DELETE FROM session_entries
             WHERE student_id NOT IN (SELECT id FROM students)",
            [],
        )
        .map_err(|e| HandlerErr::db_delete(e, "session_entries"))?;
    let records_removed = tx
        .execute(
            "DELETE FROM attendance_records
             WHERE student_id NOT IN (SELECT id FROM students)",
            [],
        )
        .map_err(|e| HandlerErr::db_delete(e, "attendance_records"))?;

    // Unlinked student records: re-attach by (student, subject, day,
    // present) against the surviving session entries.
    let to_link: Vec<(String, String)> = {
        let mut stmt = tx
            .prepare(
                "SELECT DISTINCT r.id, se.session_id
                 FROM attendance_records r
                 JOIN attendance_sessions a
                   ON a.subject = r.subject AND a.date = r.date
                 JOIN session_entries se
                   ON se.session_id = a.id
                  AND se.student_id = r.student_id
                  AND se.present = r.present
                 WHERE r.session_id IS NULL",
            )
            .map_err(HandlerErr::db_query)?;
        stmt.query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))
            .and_then(|it| it.collect())
            .map_err(HandlerErr::db_query)?
    };
    for (record_id, session_id) in &to_link {
        tx.execute(
            "UPDATE attendance_records SET session_id = ? WHERE id = ?",
            (session_id, record_id),
        )
        .map_err(|e| HandlerErr::db_update(e, "attendance_records"))?;
    }

    // Session entries whose student never got the parallel record at all
    // (the recorder failed between the session write and the appends).
    let to_insert: Vec<(String, String, String, String, i64)> = {
        let mut stmt = tx
            .prepare(
                "SELECT se.session_id, se.student_id, a.subject, a.date, se.present
                 FROM session_entries se
                 JOIN attendance_sessions a ON a.id = se.session_id
                 WHERE NOT EXISTS (
                   SELECT 1 FROM attendance_records r
                   WHERE r.session_id = se.session_id AND r.student_id = se.student_id
                 )",
            )
            .map_err(HandlerErr::db_query)?;
        stmt.query_map([], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, i64>(4)?,
            ))
        })
        .and_then(|it| it.collect())
        .map_err(HandlerErr::db_query)?
    };
    for (session_id, student_id, subject, date, present) in &to_insert {
        tx.execute(
            "INSERT INTO attendance_records(id, student_id, subject, date, present, session_id)
             VALUES(?, ?, ?, ?, ?, ?)",
            (
                Uuid::new_v4().to_string(),
                student_id,
                subject,
                date,
                present,
                session_id,
            ),
        )
        .map_err(|e| HandlerErr::db_insert(e, "attendance_records"))?;
    }

    tx.commit().map_err(HandlerErr::db_commit)?;

    Ok(json!({
        "orphanStudentsRemoved": orphan_students.len(),
        "orphanSessionsRemoved": orphan_sessions.len(),
        "entriesRemoved": entries_removed,
        "recordsRemoved": records_removed,
        "recordsLinked": to_link.len(),
        "recordsInserted": to_insert.len()
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "repair.run" => {
            let Some(conn) = state.db.as_ref() else {
                return Some(err(&req.id, "no_workspace", "select a workspace first", None));
            };
            Some(match repair_run(conn) {
                Ok(result) => ok(&req.id, result),
                Err(error) => error.response(&req.id),
            })
        }
        _ => None,
    }
}
