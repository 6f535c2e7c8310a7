use async_trait::async_trait;

use super::{ImportRow, RowError, RowImporter};
use crate::api::CollegeApi;
use crate::models::{
    AdminRegistration, FacultyRegistration, Registration, Role, StudentRegistration,
};

const STUDENT_REQUIRED: [&str; 4] = ["Name", "USN", "Email", "Password"];
const STAFF_REQUIRED: [&str; 3] = ["Name", "Email", "Password"];

/// Account creation for one role, one `register` call per row.
#[derive(Debug, Clone, Copy)]
pub struct UserImporter {
    role: Role,
}

impl UserImporter {
    pub fn new(role: Role) -> Self {
        UserImporter { role }
    }

    pub fn registration(&self, row: &ImportRow) -> Result<Registration, RowError> {
        let text = |column: &str| row.value(column).map(String::from);
        let required = |column: &str| text(column).unwrap_or_default();

        let registration = match self.role {
            Role::Student => Registration::Student(StudentRegistration {
                name: required("Name"),
                usn: required("USN"),
                email: required("Email"),
                password: required("Password"),
                phone: text("Phone"),
                branch: text("Branch"),
                semester: optional_number(row, "Semester")?,
                section: text("Section"),
                puc_percentage: optional_number(row, "PUC Percentage")?,
                dob: text("DOB"),
            }),
            Role::Faculty => Registration::Faculty(FacultyRegistration {
                name: required("Name"),
                email: required("Email"),
                password: required("Password"),
                phone: text("Phone"),
                department: text("Department"),
                designation: text("Designation"),
                dob: text("DOB"),
            }),
            Role::Admin => Registration::Admin(AdminRegistration {
                name: required("Name"),
                email: required("Email"),
                password: required("Password"),
                phone: text("Phone"),
                department: text("Department"),
                dob: text("DOB"),
            }),
        };
        Ok(registration)
    }
}

fn optional_number<T: std::str::FromStr>(
    row: &ImportRow,
    column: &str,
) -> Result<Option<T>, RowError> {
    row.value(column)
        .map(|v| {
            v.parse()
                .map_err(|_| RowError::InvalidNumber(column.to_string()))
        })
        .transpose()
}

#[async_trait]
impl RowImporter for UserImporter {
    fn name(&self) -> &str {
        self.role.path_segment()
    }

    fn required_columns(&self) -> &[&'static str] {
        match self.role {
            Role::Student => &STUDENT_REQUIRED,
            Role::Faculty | Role::Admin => &STAFF_REQUIRED,
        }
    }

    async fn submit(&self, api: &dyn CollegeApi, row: &ImportRow) -> Result<(), RowError> {
        let registration = self.registration(row)?;
        api.register_user(&registration).await?;
        Ok(())
    }
}
