use std::collections::HashMap;

/// One validated roster row, ready for enrollment.
#[derive(Debug, Clone, PartialEq)]
pub struct StudentRow {
    pub line_no: usize,
    pub name: String,
    pub dob: String,
    pub parent_name: String,
    pub parent_phone: Option<String>,
    pub address: String,
}

/// Per-row outcome, in file order. Invalid rows carry the rejection reason
/// so a batch can keep going or stop at the first failure.
#[derive(Debug, Clone, PartialEq)]
pub enum RowOutcome {
    Valid(StudentRow),
    Invalid(String),
}

fn split_csv_record(line: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    let mut buf = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '"' => {
                if in_quotes && chars.peek() == Some(&'"') {
                    buf.push('"');
                    chars.next();
                } else {
                    in_quotes = !in_quotes;
                }
            }
            ',' if !in_quotes => {
                out.push(std::mem::take(&mut buf));
            }
            _ => buf.push(ch),
        }
    }
    out.push(buf);
    out
}

fn non_empty_trimmed(s: &str) -> Option<String> {
    let t = s.trim();
    if t.is_empty() {
        None
    } else {
        Some(t.to_string())
    }
}

/// Literal DD/MM/YYYY shape check. No calendar validity beyond the shape.
pub fn is_dob_shape(s: &str) -> bool {
    let chars: Vec<char> = s.chars().collect();
    if chars.len() != 10 {
        return false;
    }
    chars.iter().enumerate().all(|(i, c)| match i {
        2 | 5 => *c == '/',
        _ => c.is_ascii_digit(),
    })
}

fn header_column(idx: &HashMap<String, usize>, names: &[&str]) -> Option<usize> {
    names.iter().find_map(|n| idx.get(*n).copied())
}

/// Parses an uploaded roster CSV into per-row outcomes, preserving file
/// order. The first line must be a header naming at least `name`, `dob`,
/// `parentName` (or `parent_name`) and `address`; `parentPhone` is optional.
/// Returns an error only for an unusable header; malformed data rows become
/// `RowOutcome::Invalid` with a reason naming the student.
pub fn parse_student_rows(text: &str) -> Result<Vec<RowOutcome>, String> {
    let mut lines = text.lines();
    let Some(header_line) = lines.next() else {
        return Err("file is empty".to_string());
    };

    let mut idx = HashMap::<String, usize>::new();
    for (i, field) in split_csv_record(header_line).iter().enumerate() {
        idx.insert(field.trim().to_ascii_lowercase(), i);
    }

    let name_col =
        header_column(&idx, &["name"]).ok_or_else(|| "missing column name".to_string())?;
    let dob_col = header_column(&idx, &["dob"]).ok_or_else(|| "missing column dob".to_string())?;
    let parent_col = header_column(&idx, &["parentname", "parent_name"])
        .ok_or_else(|| "missing column parentName".to_string())?;
    let address_col =
        header_column(&idx, &["address"]).ok_or_else(|| "missing column address".to_string())?;
    let phone_col = header_column(&idx, &["parentphone", "parent_phone"]);

    let mut out = Vec::new();
    for (line_idx, raw_line) in lines.enumerate() {
        if raw_line.trim().is_empty() {
            continue;
        }
        let line_no = line_idx + 2;
        let fields = split_csv_record(raw_line);
        let field = |col: usize| fields.get(col).map(String::as_str).unwrap_or("");

        let name = non_empty_trimmed(field(name_col));
        let label = name.as_deref().unwrap_or("Unknown").to_string();

        let Some(name) = name else {
            out.push(RowOutcome::Invalid(format!("{}: name is required", label)));
            continue;
        };
        let Some(dob) = non_empty_trimmed(field(dob_col)) else {
            out.push(RowOutcome::Invalid(format!(
                "{}: date of birth is required",
                label
            )));
            continue;
        };
        if !is_dob_shape(&dob) {
            out.push(RowOutcome::Invalid(format!(
                "{}: date of birth must be DD/MM/YYYY",
                label
            )));
            continue;
        }
        let Some(parent_name) = non_empty_trimmed(field(parent_col)) else {
            out.push(RowOutcome::Invalid(format!(
                "{}: parent name is required",
                label
            )));
            continue;
        };
        let Some(address) = non_empty_trimmed(field(address_col)) else {
            out.push(RowOutcome::Invalid(format!("{}: address is required", label)));
            continue;
        };
        let parent_phone = phone_col.and_then(|c| non_empty_trimmed(field(c)));

        out.push(RowOutcome::Valid(StudentRow {
            line_no,
            name,
            dob,
            parent_name,
            parent_phone,
            address,
        }));
    }

    Ok(out)
}
