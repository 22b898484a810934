use sqlx::{PgExecutor, PgPool};
use uuid::Uuid;

use super::models::{
    CourseRow, EnrollmentListingRow, EnrollmentRow, EnrollmentStatus, Role, StudentProfileListing,
    StudentProfileRow, TeacherProfileListing, TeacherProfileRow, UserRow,
};

const COURSE_SELECT: &str = "SELECT c.id, c.name, c.code, c.description, c.teacher_id, t.username AS teacher_username, c.schedule, c.capacity, (SELECT COUNT(*) FROM enrollments e WHERE e.course_id = c.id AND e.status = 'approved') AS approved_count, c.created_at, c.updated_at FROM courses c LEFT JOIN users t ON t.id = c.teacher_id";

const ENROLLMENT_LISTING_SELECT: &str = "SELECT e.id, e.status, e.requested_at, e.reviewed_at, r.username AS reviewer_username, e.note, s.id AS student_id, s.username AS student_username, s.email AS student_email, c.id AS course_id, c.code AS course_code, c.name AS course_name, c.schedule AS course_schedule FROM enrollments e JOIN users s ON s.id = e.student_id JOIN courses c ON c.id = e.course_id LEFT JOIN users r ON r.id = e.reviewed_by";

const STUDENT_PROFILE_COLUMNS: &str = "user_id, full_name, age, contact_number, address_encrypted, guardian_email, transcript, id_proof, profile_picture, created_at, updated_at";

const TEACHER_PROFILE_COLUMNS: &str =
    "user_id, full_name, department, contact_email, office_location, bio, profile_picture, created_at";

/// Filters applied to enrollment listings. Every `None` means "no constraint".
#[derive(Default, Clone)]
pub struct EnrollmentQuery {
    pub status: Option<EnrollmentStatus>,
    pub student_username_contains: Option<String>,
    pub course_name_contains: Option<String>,
    pub course_code_contains: Option<String>,
    pub course_id: Option<Uuid>,
    pub student_id: Option<Uuid>,
    pub teacher_id: Option<Uuid>,
}

/// Wraps a user search term for `ILIKE`, escaping the pattern metacharacters.
pub fn like_pattern(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len() + 2);
    escaped.push('%');
    for ch in term.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped.push('%');
    escaped
}

fn optional_pattern(term: Option<&str>) -> Option<String> {
    term.map(str::trim)
        .filter(|value| !value.is_empty())
        .map(like_pattern)
}

pub async fn fetch_courses(pool: &PgPool) -> sqlx::Result<Vec<CourseRow>> {
    sqlx::query_as::<_, CourseRow>(&format!("{COURSE_SELECT} ORDER BY c.code"))
        .fetch_all(pool)
        .await
}

pub async fn fetch_courses_for_teacher(
    pool: &PgPool,
    teacher_id: Uuid,
) -> sqlx::Result<Vec<CourseRow>> {
    sqlx::query_as::<_, CourseRow>(&format!(
        "{COURSE_SELECT} WHERE c.teacher_id = $1 ORDER BY c.code"
    ))
    .bind(teacher_id)
    .fetch_all(pool)
    .await
}

pub async fn fetch_course<'e>(
    executor: impl PgExecutor<'e>,
    course_id: Uuid,
) -> sqlx::Result<Option<CourseRow>> {
    sqlx::query_as::<_, CourseRow>(&format!("{COURSE_SELECT} WHERE c.id = $1"))
        .bind(course_id)
        .fetch_optional(executor)
        .await
}

pub async fn fetch_prerequisites<'e>(
    executor: impl PgExecutor<'e>,
    course_id: Uuid,
) -> sqlx::Result<Vec<CourseRow>> {
    sqlx::query_as::<_, CourseRow>(&format!(
        "{COURSE_SELECT} JOIN course_prerequisites p ON p.prerequisite_id = c.id WHERE p.course_id = $1 ORDER BY c.code"
    ))
    .bind(course_id)
    .fetch_all(executor)
    .await
}

pub async fn fetch_enrollment_for<'e>(
    executor: impl PgExecutor<'e>,
    student_id: Uuid,
    course_id: Uuid,
) -> sqlx::Result<Option<EnrollmentRow>> {
    sqlx::query_as::<_, EnrollmentRow>(
        "SELECT id, student_id, course_id, status, requested_at, reviewed_at, reviewed_by, note FROM enrollments WHERE student_id = $1 AND course_id = $2",
    )
    .bind(student_id)
    .bind(course_id)
    .fetch_optional(executor)
    .await
}

pub async fn fetch_enrollment_listings(
    pool: &PgPool,
    query: &EnrollmentQuery,
) -> sqlx::Result<Vec<EnrollmentListingRow>> {
    let sql = format!(
        "{ENROLLMENT_LISTING_SELECT}
         WHERE ($1::TEXT IS NULL OR e.status = $1)
           AND ($2::TEXT IS NULL OR s.username ILIKE $2)
           AND ($3::TEXT IS NULL OR c.name ILIKE $3)
           AND ($4::TEXT IS NULL OR c.code ILIKE $4)
           AND ($5::UUID IS NULL OR e.course_id = $5)
           AND ($6::UUID IS NULL OR e.student_id = $6)
           AND ($7::UUID IS NULL OR c.teacher_id = $7)
         ORDER BY e.requested_at"
    );

    sqlx::query_as::<_, EnrollmentListingRow>(&sql)
        .bind(query.status.map(EnrollmentStatus::as_str))
        .bind(optional_pattern(query.student_username_contains.as_deref()))
        .bind(optional_pattern(query.course_name_contains.as_deref()))
        .bind(optional_pattern(query.course_code_contains.as_deref()))
        .bind(query.course_id)
        .bind(query.student_id)
        .bind(query.teacher_id)
        .fetch_all(pool)
        .await
}

pub async fn fetch_student_profile(
    pool: &PgPool,
    user_id: Uuid,
) -> sqlx::Result<Option<StudentProfileRow>> {
    sqlx::query_as::<_, StudentProfileRow>(&format!(
        "SELECT {STUDENT_PROFILE_COLUMNS} FROM student_profiles WHERE user_id = $1"
    ))
    .bind(user_id)
    .fetch_optional(pool)
    .await
}

pub async fn fetch_student_profiles(pool: &PgPool) -> sqlx::Result<Vec<StudentProfileListing>> {
    sqlx::query_as::<_, StudentProfileListing>(
        "SELECT u.username, p.user_id, p.full_name, p.age, p.contact_number, p.address_encrypted, p.guardian_email, p.transcript, p.id_proof, p.profile_picture, p.created_at, p.updated_at
         FROM student_profiles p JOIN users u ON u.id = p.user_id
         ORDER BY p.full_name",
    )
    .fetch_all(pool)
    .await
}

pub async fn fetch_teacher_profile(
    pool: &PgPool,
    user_id: Uuid,
) -> sqlx::Result<Option<TeacherProfileRow>> {
    sqlx::query_as::<_, TeacherProfileRow>(&format!(
        "SELECT {TEACHER_PROFILE_COLUMNS} FROM teacher_profiles WHERE user_id = $1"
    ))
    .bind(user_id)
    .fetch_optional(pool)
    .await
}

pub async fn fetch_teacher_profiles(
    pool: &PgPool,
    department: Option<&str>,
    search: Option<&str>,
) -> sqlx::Result<Vec<TeacherProfileListing>> {
    sqlx::query_as::<_, TeacherProfileListing>(
        "SELECT u.username, p.user_id, p.full_name, p.department, p.contact_email, p.office_location, p.bio, p.profile_picture, p.created_at
         FROM teacher_profiles p JOIN users u ON u.id = p.user_id
         WHERE ($1::TEXT IS NULL OR p.department = $1)
           AND ($2::TEXT IS NULL OR p.full_name ILIKE $2 OR u.username ILIKE $2 OR p.department ILIKE $2)
         ORDER BY p.full_name",
    )
    .bind(department.map(str::trim).filter(|value| !value.is_empty()))
    .bind(optional_pattern(search))
    .fetch_all(pool)
    .await
}

pub async fn fetch_departments(pool: &PgPool) -> sqlx::Result<Vec<String>> {
    sqlx::query_scalar(
        "SELECT DISTINCT department FROM teacher_profiles WHERE department <> '' ORDER BY department",
    )
    .fetch_all(pool)
    .await
}

pub async fn fetch_user(pool: &PgPool, user_id: Uuid) -> sqlx::Result<Option<UserRow>> {
    sqlx::query_as::<_, UserRow>(
        "SELECT id, username, email, role, is_active, date_joined FROM users WHERE id = $1",
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await
}

pub async fn fetch_users(
    pool: &PgPool,
    role: Option<Role>,
    active: Option<bool>,
    search: Option<&str>,
) -> sqlx::Result<Vec<UserRow>> {
    sqlx::query_as::<_, UserRow>(
        "SELECT id, username, email, role, is_active, date_joined FROM users
         WHERE ($1::TEXT IS NULL OR role = $1)
           AND ($2::BOOLEAN IS NULL OR is_active = $2)
           AND ($3::TEXT IS NULL OR username ILIKE $3 OR email ILIKE $3)
         ORDER BY username",
    )
    .bind(role.map(Role::as_str))
    .bind(active)
    .bind(optional_pattern(search))
    .fetch_all(pool)
    .await
}

pub async fn fetch_teachers(pool: &PgPool) -> sqlx::Result<Vec<UserRow>> {
    fetch_users(pool, Some(Role::Teacher), Some(true), None).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_pattern_wraps_and_escapes() {
        assert_eq!(like_pattern("ali"), "%ali%");
        assert_eq!(like_pattern("50%_off"), "%50\\%\\_off%");
        assert_eq!(like_pattern("a\\b"), "%a\\\\b%");
    }

    #[test]
    fn blank_search_terms_are_ignored() {
        assert_eq!(optional_pattern(Some("   ")), None);
        assert_eq!(optional_pattern(None), None);
        assert_eq!(optional_pattern(Some(" bob ")), Some("%bob%".to_string()));
    }
}
