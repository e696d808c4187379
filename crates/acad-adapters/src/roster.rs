//! Map decoded roster sheets onto the shared student row shape.

use acad_core::{ExtractedStudentRow, RawRow};
use serde::{Deserialize, Serialize};

/// Header aliases tried (case-insensitively, in order) for each student field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StudentColumns {
    pub sl: Vec<String>,
    pub pid: Vec<String>,
    pub student_id: Vec<String>,
    pub student_name: Vec<String>,
    pub sex: Vec<String>,
    pub mobile: Vec<String>,
    pub email: Vec<String>,
}

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(ToString::to_string).collect()
}

impl Default for StudentColumns {
    fn default() -> Self {
        Self {
            sl: names(&["SL", "Sl.", "SL No", "Serial"]),
            pid: names(&["PID", "Program ID", "Program"]),
            student_id: names(&["StudentID", "Student ID", "ID"]),
            student_name: names(&["StudentName", "Student Name", "Name"]),
            sex: names(&["Sex", "Gender"]),
            mobile: names(&["Mobile", "Mobile No", "Phone", "Contact"]),
            email: names(&["Email", "E-mail", "Email Address"]),
        }
    }
}

impl StudentColumns {
    pub fn student_from_row(&self, row: &RawRow) -> ExtractedStudentRow {
        ExtractedStudentRow {
            sl: row.first_of(&self.sl).to_string(),
            pid: row.first_of(&self.pid).to_string(),
            student_id: row.first_of(&self.student_id).to_string(),
            student_name: row.first_of(&self.student_name).to_string(),
            sex: normalize_sex(row.first_of(&self.sex)),
            mobile: row.first_of(&self.mobile).to_string(),
            email: row.first_of(&self.email).replace(char::is_whitespace, ""),
        }
    }
}

/// Student rows from a decoded sheet; rows without a student id are dropped.
pub fn students_from_rows(rows: &[RawRow], columns: &StudentColumns) -> Vec<ExtractedStudentRow> {
    rows.iter()
        .map(|row| columns.student_from_row(row))
        .filter(|s| !s.student_id.is_empty())
        .collect()
}

pub(crate) fn normalize_sex(raw: &str) -> String {
    let compact: String = raw
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect::<String>()
        .to_ascii_lowercase();
    match compact.as_str() {
        "f" | "female" => "Female".to_string(),
        "m" | "male" => "Male".to_string(),
        _ => raw.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::csv::decode;

    #[test]
    fn maps_aliased_headers_to_student_fields() {
        let rows = decode(
            "Sl.,Student ID,Name,Gender,Phone,E-mail\n\
             1,221-15-4567,Rahim Uddin,M,01712345678,rahim4567@diu.edu.bd\n\
             2,,Nobody,F,,\n",
        );
        let students = students_from_rows(&rows, &StudentColumns::default());
        assert_eq!(students.len(), 1);
        let s = &students[0];
        assert_eq!(s.sl, "1");
        assert_eq!(s.student_id, "221-15-4567");
        assert_eq!(s.student_name, "Rahim Uddin");
        assert_eq!(s.sex, "Male");
        assert_eq!(s.mobile, "01712345678");
        assert_eq!(s.email, "rahim4567@diu.edu.bd");
        assert_eq!(s.pid, "");
    }

    #[test]
    fn sex_normalization_handles_split_artifacts() {
        assert_eq!(normalize_sex("FEMAL E"), "Female");
        assert_eq!(normalize_sex("mal e"), "Male");
        assert_eq!(normalize_sex(" Other "), "Other");
    }
}
