mod test_support;

use serde_json::json;
use test_support::{
    create_class, request_err, request_ok, select_workspace, spawn_sidecar, student_ids_by_name,
    temp_dir, upload_csv,
};

const ROSTER_CSV: &str = "name,dob,parentName,address\n\
                          Ann Lee,01/01/2001,Parent A,Addr 1\n\
                          Bob Ray,02/02/2002,Parent B,Addr 2\n\
                          Cat Day,03/03/2003,Parent C,Addr 3\n";

#[test]
fn one_session_per_class_subject_and_day() {
    let workspace = temp_dir("colleged-att-idem");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);
    let (class_id, code) = create_class(&mut stdin, &mut reader, "1", "BCU", "MCA", 1, 1);
    let _ = upload_csv(&mut stdin, &mut reader, "2", &class_id, ROSTER_CSV);
    let ids = student_ids_by_name(&mut stdin, &mut reader, "3", &class_id);

    let marks = json!([
        { "studentId": ids["Ann Lee"], "present": true },
        { "studentId": ids["Bob Ray"], "present": true },
        { "studentId": ids["Cat Day"], "present": false }
    ]);
    let taken = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "attendance.take",
        json!({
            "classCode": code,
            "subject": "Maths",
            "date": "2025-03-10",
            "attendanceData": marks
        }),
    );
    assert_eq!(taken.get("totalStudents").and_then(|v| v.as_i64()), Some(3));
    assert_eq!(taken.get("presentCount").and_then(|v| v.as_i64()), Some(2));
    assert_eq!(taken.get("absentCount").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(taken.get("date").and_then(|v| v.as_str()), Some("2025-03-10"));

    // Second submission for the same triple is a conflict even with
    // different marks, and even when the date carries a time component.
    let code_err = request_err(
        &mut stdin,
        &mut reader,
        "5",
        "attendance.take",
        json!({
            "classCode": code,
            "subject": "Maths",
            "date": "2025-03-10T09:30:00Z",
            "attendanceData": [ { "studentId": ids["Ann Lee"], "present": false } ]
        }),
    );
    assert_eq!(code_err, "attendance_already_taken");

    // Another subject or another day is a fresh session.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "attendance.take",
        json!({
            "classCode": code,
            "subject": "Physics",
            "date": "2025-03-10",
            "attendanceData": [ { "studentId": ids["Ann Lee"], "present": true } ]
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "attendance.take",
        json!({
            "classCode": code,
            "subject": "Maths",
            "date": "2025-03-11",
            "attendanceData": [ { "studentId": ids["Ann Lee"], "present": true } ]
        }),
    );

    let sessions = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "attendance.listForClass",
        json!({ "classId": class_id }),
    );
    assert_eq!(
        sessions
            .get("sessions")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(3)
    );
}

#[test]
fn foreign_marks_are_skipped_and_empty_rosters_rejected() {
    let workspace = temp_dir("colleged-att-foreign");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);
    let (class_a, code_a) = create_class(&mut stdin, &mut reader, "1", "BCU", "MCA", 1, 1);
    let (class_b, _code_b) = create_class(&mut stdin, &mut reader, "2", "BCU", "MCA", 1, 2);
    let _ = upload_csv(&mut stdin, &mut reader, "3", &class_a, ROSTER_CSV);
    let _ = upload_csv(
        &mut stdin,
        &mut reader,
        "4",
        &class_b,
        "name,dob,parentName,address\nEve Fox,04/04/2004,Parent D,Addr 4\n",
    );
    let ids_a = student_ids_by_name(&mut stdin, &mut reader, "5", &class_a);
    let ids_b = student_ids_by_name(&mut stdin, &mut reader, "6", &class_b);

    // A mark for a student of another class is dropped, not fatal.
    let taken = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "attendance.take",
        json!({
            "classCode": code_a,
            "subject": "Maths",
            "date": "2025-03-10",
            "attendanceData": [
                { "studentId": ids_a["Ann Lee"], "present": true },
                { "studentId": ids_b["Eve Fox"], "present": true }
            ]
        }),
    );
    assert_eq!(taken.get("totalStudents").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(
        taken
            .get("skipped")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(1)
    );

    // Nothing resolvable at all refuses to persist an empty session.
    let code_err = request_err(
        &mut stdin,
        &mut reader,
        "8",
        "attendance.take",
        json!({
            "classCode": code_a,
            "subject": "Physics",
            "date": "2025-03-10",
            "attendanceData": [ { "studentId": ids_b["Eve Fox"], "present": true } ]
        }),
    );
    assert_eq!(code_err, "no_valid_students");

    let code_err = request_err(
        &mut stdin,
        &mut reader,
        "9",
        "attendance.take",
        json!({
            "classCode": "NOPE-X-9-9",
            "subject": "Maths",
            "date": "2025-03-10",
            "attendanceData": [ { "studentId": ids_a["Ann Lee"], "present": true } ]
        }),
    );
    assert_eq!(code_err, "not_found");
}
