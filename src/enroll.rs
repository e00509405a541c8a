use rusqlite::Connection;
use uuid::Uuid;

use crate::intake::StudentRow;

/// Credentials handed back to the caller once, for distribution.
#[derive(Debug, Clone)]
pub struct EnrolledStudent {
    pub student_id: String,
    pub name: String,
    pub roll_number: String,
    pub username: String,
    pub password: String,
}

/// Row-level enrollment failure. Both variants carry the full message,
/// already naming the offending student; the batch reports it and moves on.
#[derive(Debug)]
pub enum EnrollError {
    DuplicateStudent(String),
    Storage(String),
}

impl EnrollError {
    pub fn into_message(self) -> String {
        match self {
            EnrollError::DuplicateStudent(m) | EnrollError::Storage(m) => m,
        }
    }
}

// Suffix ceiling for username allocation. A batch hitting this many
// collisions on one base name is misuse, not load.
const USERNAME_SUFFIX_LIMIT: usize = 1000;

/// Login name base: the student's name lower-cased with whitespace removed.
pub fn username_base(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

fn username_candidate(base: &str, attempt: usize) -> String {
    if attempt == 0 {
        base.to_string()
    } else {
        format!("{}{}", base, attempt)
    }
}

fn is_unique_violation(e: &rusqlite::Error, column: &str) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, Some(msg))
            if f.code == rusqlite::ErrorCode::ConstraintViolation && msg.contains(column)
    )
}

/// Enrolls one validated row: reserves the next roll number from the class
/// counter, then inserts with ascending username suffixes until the unique
/// index accepts the row. The login secret is the date of birth as uploaded.
///
/// The reservation and the insert share one transaction, so an abandoned
/// attempt does not burn a roll number. Callers process rows sequentially;
/// earlier rows of the same batch are already committed and therefore
/// visible to the username collision loop.
pub fn enroll_student(
    conn: &Connection,
    class_id: &str,
    class_code: &str,
    row: &StudentRow,
) -> Result<EnrolledStudent, EnrollError> {
    let storage = |e: rusqlite::Error| EnrollError::Storage(format!("{}: {}", row.name, e));

    let tx = conn.unchecked_transaction().map_err(storage)?;
    tx.execute(
        "UPDATE classes SET roll_counter = roll_counter + 1 WHERE id = ?",
        [class_id],
    )
    .map_err(storage)?;
    let counter: i64 = tx
        .query_row(
            "SELECT roll_counter FROM classes WHERE id = ?",
            [class_id],
            |r| r.get(0),
        )
        .map_err(storage)?;
    let roll_number = format!("{}-{:04}", class_code, counter);

    let student_id = Uuid::new_v4().to_string();
    let base = username_base(&row.name);
    let mut attempt = 0usize;
    loop {
        let username = username_candidate(&base, attempt);
        let inserted = tx.execute(
            "INSERT INTO students(
               id,
               class_id,
               name,
               roll_number,
               username,
               password,
               dob,
               parent_name,
               parent_phone,
               address,
               created_at
             ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, strftime('%Y-%m-%dT%H:%M:%SZ','now'))",
            (
                &student_id,
                class_id,
                &row.name,
                &roll_number,
                &username,
                &row.dob,
                &row.dob,
                &row.parent_name,
                row.parent_phone.as_deref(),
                &row.address,
            ),
        );
        match inserted {
            Ok(_) => {
                tx.commit().map_err(storage)?;
                return Ok(EnrolledStudent {
                    student_id,
                    name: row.name.clone(),
                    roll_number,
                    username,
                    password: row.dob.clone(),
                });
            }
            Err(e) if is_unique_violation(&e, "students.username") => {
                attempt += 1;
                if attempt >= USERNAME_SUFFIX_LIMIT {
                    return Err(EnrollError::DuplicateStudent(format!(
                        "{}: could not allocate a unique username for {}",
                        row.name, base
                    )));
                }
            }
            Err(e) if is_unique_violation(&e, "students.roll_number") => {
                return Err(EnrollError::DuplicateStudent(format!(
                    "{}: duplicate student, roll number {} already exists",
                    row.name, roll_number
                )));
            }
            Err(e) => return Err(storage(e)),
        }
    }
}
