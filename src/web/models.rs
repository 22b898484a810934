use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use crate::utils::encryption::decrypt_or_placeholder;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    Student,
    Teacher,
    Admin,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Student, Role::Teacher, Role::Admin];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Student => "student",
            Role::Teacher => "teacher",
            Role::Admin => "admin",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Role::Student => "Student",
            Role::Teacher => "Teacher",
            Role::Admin => "Admin",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "student" => Some(Role::Student),
            "teacher" => Some(Role::Teacher),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EnrollmentStatus {
    Pending,
    Approved,
    Denied,
}

impl EnrollmentStatus {
    pub const ALL: [EnrollmentStatus; 3] = [
        EnrollmentStatus::Pending,
        EnrollmentStatus::Approved,
        EnrollmentStatus::Denied,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EnrollmentStatus::Pending => "pending",
            EnrollmentStatus::Approved => "approved",
            EnrollmentStatus::Denied => "denied",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            EnrollmentStatus::Pending => "Pending",
            EnrollmentStatus::Approved => "Approved",
            EnrollmentStatus::Denied => "Denied",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(EnrollmentStatus::Pending),
            "approved" => Some(EnrollmentStatus::Approved),
            "denied" => Some(EnrollmentStatus::Denied),
            _ => None,
        }
    }
}

#[derive(Clone, FromRow)]
pub struct UserRow {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub role: String,
    pub is_active: bool,
    pub date_joined: DateTime<Utc>,
}

impl UserRow {
    pub fn role(&self) -> Option<Role> {
        Role::parse(&self.role)
    }
}

#[derive(Clone, FromRow)]
pub struct StudentProfileRow {
    pub user_id: Uuid,
    pub full_name: String,
    pub age: i32,
    pub contact_number: String,
    pub address_encrypted: String,
    pub guardian_email: String,
    pub transcript: Option<String>,
    pub id_proof: Option<String>,
    pub profile_picture: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StudentProfileRow {
    pub fn decrypted_address(&self) -> String {
        decrypt_or_placeholder(&self.address_encrypted)
    }
}

#[derive(Clone, FromRow)]
pub struct TeacherProfileRow {
    pub user_id: Uuid,
    pub full_name: String,
    pub department: String,
    pub contact_email: String,
    pub office_location: String,
    pub bio: String,
    pub profile_picture: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, FromRow)]
pub struct StudentProfileListing {
    pub username: String,
    #[sqlx(flatten)]
    pub profile: StudentProfileRow,
}

#[derive(Clone, FromRow)]
pub struct TeacherProfileListing {
    pub username: String,
    #[sqlx(flatten)]
    pub profile: TeacherProfileRow,
}

#[derive(Clone, FromRow)]
pub struct CourseRow {
    pub id: Uuid,
    pub name: String,
    pub code: String,
    pub description: String,
    pub teacher_id: Option<Uuid>,
    pub teacher_username: Option<String>,
    pub schedule: String,
    pub capacity: i32,
    pub approved_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CourseRow {
    pub fn seats_left(&self) -> i64 {
        (i64::from(self.capacity) - self.approved_count).max(0)
    }

    pub fn display_name(&self) -> String {
        format!("{} - {}", self.code, self.name)
    }
}

#[derive(Clone, FromRow)]
pub struct EnrollmentRow {
    pub id: Uuid,
    pub student_id: Uuid,
    pub course_id: Uuid,
    pub status: String,
    pub requested_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub reviewed_by: Option<Uuid>,
    pub note: String,
}

impl EnrollmentRow {
    pub fn status(&self) -> Option<EnrollmentStatus> {
        EnrollmentStatus::parse(&self.status)
    }
}

/// Enrollment joined with the student and course it refers to.
#[derive(Clone, FromRow)]
pub struct EnrollmentListingRow {
    pub id: Uuid,
    pub status: String,
    pub requested_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub reviewer_username: Option<String>,
    pub note: String,
    pub student_id: Uuid,
    pub student_username: String,
    pub student_email: String,
    pub course_id: Uuid,
    pub course_code: String,
    pub course_name: String,
    pub course_schedule: String,
}

impl EnrollmentListingRow {
    pub fn status(&self) -> Option<EnrollmentStatus> {
        EnrollmentStatus::parse(&self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parsing_is_case_insensitive() {
        assert_eq!(Role::parse("Teacher"), Some(Role::Teacher));
        assert_eq!(Role::parse(" admin "), Some(Role::Admin));
        assert_eq!(Role::parse("janitor"), None);
        for role in Role::ALL {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
    }

    #[test]
    fn status_round_trips_through_text() {
        for status in EnrollmentStatus::ALL {
            assert_eq!(EnrollmentStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(EnrollmentStatus::parse("cancelled"), None);
    }

    #[test]
    fn seats_left_never_negative() {
        let now = Utc::now();
        let mut course = CourseRow {
            id: Uuid::new_v4(),
            name: "Algebra".into(),
            code: "MATH101".into(),
            description: String::new(),
            teacher_id: None,
            teacher_username: None,
            schedule: String::new(),
            capacity: 2,
            approved_count: 1,
            created_at: now,
            updated_at: now,
        };
        assert_eq!(course.seats_left(), 1);
        course.approved_count = 5;
        assert_eq!(course.seats_left(), 0);
        assert_eq!(course.display_name(), "MATH101 - Algebra");
    }
}
