mod test_support;

use serde_json::json;
use test_support::{
    create_class, request_ok, select_workspace, spawn_sidecar, student_ids_by_name, temp_dir,
    upload_csv,
};

#[test]
fn update_replaces_the_presence_list_and_student_records_follow() {
    let workspace = temp_dir("colleged-att-update");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);
    let (class_id, code) = create_class(&mut stdin, &mut reader, "1", "BCU", "MCA", 1, 1);
    let _ = upload_csv(
        &mut stdin,
        &mut reader,
        "2",
        &class_id,
        "name,dob,parentName,address\n\
         Ann Lee,01/01/2001,Parent A,Addr 1\n\
         Bob Ray,02/02/2002,Parent B,Addr 2\n",
    );
    let ids = student_ids_by_name(&mut stdin, &mut reader, "3", &class_id);

    let taken = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "attendance.take",
        json!({
            "classCode": code,
            "subject": "Maths",
            "date": "2025-03-10",
            "attendanceData": [
                { "studentId": ids["Ann Lee"], "present": true },
                { "studentId": ids["Bob Ray"], "present": false }
            ]
        }),
    );
    let attendance_id = taken
        .get("attendanceId")
        .and_then(|v| v.as_str())
        .expect("attendanceId")
        .to_string();

    // Flip both marks wholesale.
    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "attendance.update",
        json!({
            "attendanceId": attendance_id,
            "attendanceData": [
                { "studentId": ids["Ann Lee"], "present": false },
                { "studentId": ids["Bob Ray"], "present": true }
            ]
        }),
    );
    assert_eq!(updated.get("presentCount").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(updated.get("absentCount").and_then(|v| v.as_i64()), Some(1));

    let bob = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "students.get",
        json!({ "studentId": ids["Bob Ray"] }),
    );
    let bob_attendance = bob
        .get("attendance")
        .and_then(|v| v.as_array())
        .expect("attendance");
    assert_eq!(bob_attendance.len(), 1);
    assert_eq!(
        bob_attendance[0].get("present").and_then(|v| v.as_bool()),
        Some(true)
    );
    assert_eq!(
        bob_attendance[0].get("sessionId").and_then(|v| v.as_str()),
        Some(attendance_id.as_str())
    );

    // Dropping a student from the corrected list removes the parallel
    // record found by session back-reference.
    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "attendance.update",
        json!({
            "attendanceId": attendance_id,
            "attendanceData": [ { "studentId": ids["Ann Lee"], "present": true } ]
        }),
    );
    assert_eq!(updated.get("totalStudents").and_then(|v| v.as_i64()), Some(1));

    let bob = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "students.get",
        json!({ "studentId": ids["Bob Ray"] }),
    );
    assert_eq!(
        bob.get("attendance")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(0)
    );

    let session = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "attendance.get",
        json!({ "attendanceId": attendance_id }),
    );
    assert_eq!(session.get("totalStudents").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(
        session
            .get("entries")
            .and_then(|v| v.as_array())
            .map(|a| a.len()),
        Some(1)
    );
}
