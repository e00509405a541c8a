mod test_support;

use serde_json::json;
use test_support::{
    create_class, request_err, request_ok, select_workspace, spawn_sidecar, student_ids_by_name,
    temp_dir, upload_csv,
};

#[test]
fn marks_append_in_order_and_reject_out_of_range_scores() {
    let workspace = temp_dir("colleged-marks");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);
    let (class_id, _code) = create_class(&mut stdin, &mut reader, "1", "BCU", "MCA", 1, 1);
    let _ = upload_csv(
        &mut stdin,
        &mut reader,
        "2",
        &class_id,
        "name,dob,parentName,address\nAnn Lee,01/01/2001,Parent A,Addr 1\n",
    );
    let ids = student_ids_by_name(&mut stdin, &mut reader, "3", &class_id);
    let ann = ids["Ann Lee"].clone();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "marks.add",
        json!({
            "studentId": ann,
            "subject": "Maths",
            "score": 42.0,
            "maxScore": 50.0,
            "examType": "internal"
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "marks.add",
        json!({
            "studentId": ann,
            "subject": "Maths",
            "score": 71.0,
            "maxScore": 100.0,
            "examType": "semester"
        }),
    );

    let err_code = request_err(
        &mut stdin,
        &mut reader,
        "6",
        "marks.add",
        json!({
            "studentId": ann,
            "subject": "Maths",
            "score": 60.0,
            "maxScore": 50.0,
            "examType": "internal"
        }),
    );
    assert_eq!(err_code, "bad_params");
    let err_code = request_err(
        &mut stdin,
        &mut reader,
        "7",
        "marks.add",
        json!({
            "studentId": ann,
            "subject": "Maths",
            "score": 10.0,
            "maxScore": 50.0,
            "examType": "midterm"
        }),
    );
    assert_eq!(err_code, "bad_params");
    let err_code = request_err(
        &mut stdin,
        &mut reader,
        "8",
        "marks.add",
        json!({
            "studentId": "missing",
            "subject": "Maths",
            "score": 10.0,
            "maxScore": 50.0,
            "examType": "internal"
        }),
    );
    assert_eq!(err_code, "not_found");

    let listed = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "marks.list",
        json!({ "studentId": ann }),
    );
    let marks = listed.get("marks").and_then(|v| v.as_array()).expect("marks");
    assert_eq!(marks.len(), 2);
    assert_eq!(
        marks[0].get("examType").and_then(|v| v.as_str()),
        Some("internal")
    );
    assert_eq!(marks[1].get("score").and_then(|v| v.as_f64()), Some(71.0));
}
