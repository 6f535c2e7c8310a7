use async_trait::async_trait;
use log::debug;

use super::{ImportRow, RowError, RowImporter};
use crate::api::CollegeApi;
use crate::models::{AttendanceRecord, SubjectAttendance};

const FIXED_COLUMNS: [&str; 4] = ["Name", "USN", "Sem", "Month"];
const REQUIRED_COLUMNS: [&str; 3] = ["USN", "Sem", "Month"];
const TOTAL_SUFFIX: &str = " Total";

/// Monthly attendance, one row per student.
///
/// Every column after `Name, USN, Sem, Month` comes in pairs: the attended
/// count under the subject name, then the class total under
/// `"<Subject> Total"`.
#[derive(Debug, Default, Clone, Copy)]
pub struct AttendanceImporter;

impl AttendanceImporter {
    pub fn record(row: &ImportRow) -> Result<AttendanceRecord, RowError> {
        Ok(AttendanceRecord {
            semester: parse_int(row, "Sem")?,
            month: parse_int(row, "Month")?,
            subjects: subjects(row)?,
        })
    }
}

fn parse_int(row: &ImportRow, column: &str) -> Result<i64, RowError> {
    row.value(column)
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| RowError::InvalidNumber(column.to_string()))
}

fn subjects(row: &ImportRow) -> Result<Vec<SubjectAttendance>, RowError> {
    let columns: Vec<&str> = row
        .columns()
        .filter(|c| !FIXED_COLUMNS.contains(c))
        .collect();

    columns
        .chunks(2)
        .map(|pair| {
            let subject = pair[0];
            let total_column = match pair.get(1) {
                Some(&total) if total.strip_suffix(TOTAL_SUFFIX) == Some(subject) => total,
                _ => return Err(RowError::InvalidSubjectColumns(subject.to_string())),
            };

            let attended = row.value(subject).and_then(|v| v.parse::<i64>().ok());
            let total = row.value(total_column).and_then(|v| v.parse::<i64>().ok());
            match (attended, total) {
                (Some(attended_classes), Some(total_classes)) => Ok(SubjectAttendance {
                    subject_name: subject.to_string(),
                    attended_classes,
                    total_classes,
                }),
                _ => Err(RowError::InvalidNumbers(subject.to_string())),
            }
        })
        .collect()
}

#[async_trait]
impl RowImporter for AttendanceImporter {
    fn name(&self) -> &str {
        "attendance"
    }

    fn required_columns(&self) -> &[&'static str] {
        &REQUIRED_COLUMNS
    }

    async fn submit(&self, api: &dyn CollegeApi, row: &ImportRow) -> Result<(), RowError> {
        let record = Self::record(row)?;

        let usn = row.value("USN").unwrap_or_default();
        let user_id = api
            .resolve_usn(usn)
            .await?
            .ok_or_else(|| RowError::UserNotFound(usn.to_string()))?;
        debug!("USN {} resolved to {}", usn, user_id);

        api.record_attendance(&user_id, &record).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(fields: &[(&str, &str)]) -> ImportRow {
        ImportRow::new(
            1,
            fields
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        )
    }

    #[test]
    fn subjects_are_paired_with_totals() {
        let record = AttendanceImporter::record(&row(&[
            ("Name", "John"),
            ("USN", "USN1"),
            ("Sem", "1"),
            ("Month", "1"),
            ("Mathematics", "15"),
            ("Mathematics Total", "20"),
            ("Science", "18"),
            ("Science Total", "20"),
        ]))
        .unwrap();

        assert_eq!(record.semester, 1);
        assert_eq!(record.subjects.len(), 2);
        assert_eq!(record.subjects[1].subject_name, "Science");
        assert_eq!(record.subjects[1].attended_classes, 18);
    }

    #[test]
    fn total_column_must_follow_its_subject() {
        let err = AttendanceImporter::record(&row(&[
            ("USN", "USN1"),
            ("Sem", "1"),
            ("Month", "1"),
            ("Mathematics", "15"),
            ("Science Total", "20"),
        ]))
        .unwrap_err();
        assert_eq!(err.to_string(), "Invalid subject columns at Mathematics");

        let err = AttendanceImporter::record(&row(&[
            ("USN", "USN1"),
            ("Sem", "1"),
            ("Month", "1"),
            ("Mathematics", "15"),
        ]))
        .unwrap_err();
        assert!(matches!(err, RowError::InvalidSubjectColumns(_)));
    }

    #[test]
    fn counts_must_be_integers() {
        let err = AttendanceImporter::record(&row(&[
            ("USN", "USN1"),
            ("Sem", "1"),
            ("Month", "1"),
            ("Mathematics", "fifteen"),
            ("Mathematics Total", "20"),
        ]))
        .unwrap_err();
        assert_eq!(err.to_string(), "Invalid numbers for Mathematics");

        let err = AttendanceImporter::record(&row(&[("USN", "USN1"), ("Sem", "I"), ("Month", "1")]))
            .unwrap_err();
        assert_eq!(err.to_string(), "Invalid number for Sem");
    }
}
