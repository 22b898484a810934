use std::collections::HashSet;

use sqlx::{PgPool, Postgres, Transaction};
use tracing::{error, info};
use uuid::Uuid;

use crate::{
    mailer::OutgoingMail,
    web::{
        data,
        models::{CourseRow, EnrollmentStatus},
    },
};

/// A reviewer's decision on a pending enrollment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewAction {
    Approve,
    Deny,
}

impl ReviewAction {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "approve" => Some(ReviewAction::Approve),
            "deny" => Some(ReviewAction::Deny),
            _ => None,
        }
    }

    pub fn resulting_status(self) -> EnrollmentStatus {
        match self {
            ReviewAction::Approve => EnrollmentStatus::Approved,
            ReviewAction::Deny => EnrollmentStatus::Denied,
        }
    }
}

/// Who is allowed to review which enrollments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewScope {
    /// Administrators review requests for every course.
    AnyCourse,
    /// Teachers review requests for courses they teach.
    TaughtBy(Uuid),
}

impl ReviewScope {
    fn teacher_id(self) -> Option<Uuid> {
        match self {
            ReviewScope::AnyCourse => None,
            ReviewScope::TaughtBy(teacher_id) => Some(teacher_id),
        }
    }

    fn note_label(self) -> &'static str {
        match self {
            ReviewScope::AnyCourse => "admin",
            ReviewScope::TaughtBy(_) => "teacher",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnrollmentErrorKind {
    CourseNotFound,
    InvalidCourseOrStudent,
    AlreadyEnrolled { username: Option<String> },
    CourseFull,
    MissingPrerequisites(Vec<String>),
    NotPending,
    Backend,
}

#[derive(Debug)]
pub struct EnrollmentError {
    pub kind: EnrollmentErrorKind,
}

impl EnrollmentError {
    fn new(kind: EnrollmentErrorKind) -> Self {
        Self { kind }
    }

    pub fn message(&self) -> String {
        match &self.kind {
            EnrollmentErrorKind::CourseNotFound => "Course not found.".to_string(),
            EnrollmentErrorKind::InvalidCourseOrStudent => "Invalid course or student.".to_string(),
            EnrollmentErrorKind::AlreadyEnrolled {
                username: Some(username),
            } => format!("{username} is already enrolled or has a pending request."),
            EnrollmentErrorKind::AlreadyEnrolled { username: None } => {
                "You are already enrolled or have a pending request for this course.".to_string()
            }
            EnrollmentErrorKind::CourseFull => "No seats available in this course.".to_string(),
            EnrollmentErrorKind::MissingPrerequisites(names) => {
                format!("Missing prerequisites: {}", names.join(", "))
            }
            EnrollmentErrorKind::NotPending => {
                "That enrollment request is no longer pending.".to_string()
            }
            EnrollmentErrorKind::Backend => {
                "Something went wrong while saving the enrollment. Please try again.".to_string()
            }
        }
    }

    /// Short code used in redirect query strings.
    pub fn code(&self) -> &'static str {
        match &self.kind {
            EnrollmentErrorKind::CourseNotFound => "course_not_found",
            EnrollmentErrorKind::InvalidCourseOrStudent => "invalid_course_or_student",
            EnrollmentErrorKind::AlreadyEnrolled { .. } => "already_enrolled",
            EnrollmentErrorKind::CourseFull => "course_full",
            EnrollmentErrorKind::MissingPrerequisites(_) => "missing_prerequisites",
            EnrollmentErrorKind::NotPending => "enrollment_missing",
            EnrollmentErrorKind::Backend => "unknown",
        }
    }
}

impl From<sqlx::Error> for EnrollmentError {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err {
            if db_err.code().as_deref() == Some("23505") {
                return EnrollmentError::new(EnrollmentErrorKind::AlreadyEnrolled { username: None });
            }
        }
        error!(?err, "enrollment query failed");
        EnrollmentError::new(EnrollmentErrorKind::Backend)
    }
}

pub fn has_capacity(capacity: i32, approved_count: i64) -> bool {
    approved_count < i64::from(capacity)
}

/// Prerequisites of a course the student has not completed (no approved enrollment).
pub fn missing_prerequisites<'a>(
    prerequisites: &'a [CourseRow],
    approved_course_ids: &HashSet<Uuid>,
) -> Vec<&'a CourseRow> {
    prerequisites
        .iter()
        .filter(|course| !approved_course_ids.contains(&course.id))
        .collect()
}

/// The notification sent to a student once their request has been decided.
pub fn decision_mail(
    student_username: &str,
    student_email: &str,
    course_name: &str,
    action: ReviewAction,
    note: &str,
    scope: ReviewScope,
) -> OutgoingMail {
    let status = action.resulting_status();
    let decision = status.as_str();

    let subject = format!("Enrollment {} for {course_name}", status.label());
    let mut body = format!(
        "Dear {student_username},\n\nYour enrollment request for {course_name} has been {decision}."
    );
    if !note.is_empty() {
        body.push_str(&format!("\n\nNote from {}: {note}", scope.note_label()));
    }
    body.push_str("\n\nThank you.");

    OutgoingMail {
        to: student_email.to_string(),
        subject,
        body,
    }
}

#[derive(sqlx::FromRow)]
struct LockedCourse {
    id: Uuid,
    name: String,
    capacity: i32,
}

async fn lock_course(
    tx: &mut Transaction<'_, Postgres>,
    course_id: Uuid,
    teacher_id: Option<Uuid>,
) -> sqlx::Result<Option<LockedCourse>> {
    sqlx::query_as::<_, LockedCourse>(
        "SELECT id, name, capacity FROM courses WHERE id = $1 AND ($2::UUID IS NULL OR teacher_id = $2) FOR UPDATE",
    )
    .bind(course_id)
    .bind(teacher_id)
    .fetch_optional(&mut **tx)
    .await
}

async fn approved_count(tx: &mut Transaction<'_, Postgres>, course_id: Uuid) -> sqlx::Result<i64> {
    sqlx::query_scalar(
        "SELECT COUNT(*) FROM enrollments WHERE course_id = $1 AND status = 'approved'",
    )
    .bind(course_id)
    .fetch_one(&mut **tx)
    .await
}

/// Files a pending enrollment request for `student_id` after checking seats and
/// prerequisites.
pub async fn request_enrollment(
    pool: &PgPool,
    student_id: Uuid,
    course_id: Uuid,
) -> Result<Uuid, EnrollmentError> {
    let mut tx = pool.begin().await?;

    let course = lock_course(&mut tx, course_id, None)
        .await?
        .ok_or_else(|| EnrollmentError::new(EnrollmentErrorKind::CourseNotFound))?;

    if data::fetch_enrollment_for(&mut *tx, student_id, course.id)
        .await?
        .is_some()
    {
        return Err(EnrollmentError::new(EnrollmentErrorKind::AlreadyEnrolled {
            username: None,
        }));
    }

    if !has_capacity(course.capacity, approved_count(&mut tx, course.id).await?) {
        return Err(EnrollmentError::new(EnrollmentErrorKind::CourseFull));
    }

    let prerequisites = data::fetch_prerequisites(&mut *tx, course.id).await?;
    if !prerequisites.is_empty() {
        let approved: Vec<Uuid> = sqlx::query_scalar(
            "SELECT course_id FROM enrollments WHERE student_id = $1 AND status = 'approved'",
        )
        .bind(student_id)
        .fetch_all(&mut *tx)
        .await?;
        let approved: HashSet<Uuid> = approved.into_iter().collect();

        let missing = missing_prerequisites(&prerequisites, &approved);
        if !missing.is_empty() {
            return Err(EnrollmentError::new(
                EnrollmentErrorKind::MissingPrerequisites(
                    missing.iter().map(|course| course.name.clone()).collect(),
                ),
            ));
        }
    }

    let enrollment_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO enrollments (id, student_id, course_id, status) VALUES ($1, $2, $3, 'pending')",
    )
    .bind(enrollment_id)
    .bind(student_id)
    .bind(course.id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    info!(%student_id, course = %course.name, "enrollment requested");
    Ok(enrollment_id)
}

#[derive(Debug, Clone)]
pub struct ReviewOutcome {
    pub status: EnrollmentStatus,
    pub student_username: String,
    pub student_email: String,
    pub course_name: String,
}

#[derive(sqlx::FromRow)]
struct PendingForReview {
    id: Uuid,
    student_username: String,
    student_email: String,
}

/// Moves a pending enrollment within `scope` to approved or denied.
pub async fn review_enrollment(
    pool: &PgPool,
    reviewer_id: Uuid,
    scope: ReviewScope,
    enrollment_id: Uuid,
    action: ReviewAction,
    note: &str,
) -> Result<ReviewOutcome, EnrollmentError> {
    let mut tx = pool.begin().await?;

    // Course row first, enrollment row second: the same order a course delete takes.
    let course_id: Uuid = sqlx::query_scalar(
        "SELECT e.course_id FROM enrollments e JOIN courses c ON c.id = e.course_id
         WHERE e.id = $1 AND ($2::UUID IS NULL OR c.teacher_id = $2)",
    )
    .bind(enrollment_id)
    .bind(scope.teacher_id())
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| EnrollmentError::new(EnrollmentErrorKind::NotPending))?;

    let course = lock_course(&mut tx, course_id, scope.teacher_id())
        .await?
        .ok_or_else(|| EnrollmentError::new(EnrollmentErrorKind::NotPending))?;

    let pending = sqlx::query_as::<_, PendingForReview>(
        "SELECT e.id, s.username AS student_username, s.email AS student_email
         FROM enrollments e
         JOIN users s ON s.id = e.student_id
         WHERE e.id = $1 AND e.course_id = $2 AND e.status = 'pending'
         FOR UPDATE OF e",
    )
    .bind(enrollment_id)
    .bind(course.id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| EnrollmentError::new(EnrollmentErrorKind::NotPending))?;

    if action == ReviewAction::Approve
        && !has_capacity(course.capacity, approved_count(&mut tx, course.id).await?)
    {
        return Err(EnrollmentError::new(EnrollmentErrorKind::CourseFull));
    }

    let status = action.resulting_status();
    sqlx::query(
        "UPDATE enrollments SET status = $2, reviewed_by = $3, reviewed_at = NOW(), note = $4 WHERE id = $1",
    )
    .bind(pending.id)
    .bind(status.as_str())
    .bind(reviewer_id)
    .bind(note)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    info!(
        enrollment_id = %pending.id,
        status = status.as_str(),
        %reviewer_id,
        "enrollment reviewed"
    );

    Ok(ReviewOutcome {
        status,
        student_username: pending.student_username,
        student_email: pending.student_email,
        course_name: course.name,
    })
}

#[derive(Debug, Clone)]
pub struct DirectEnrollment {
    pub student_username: String,
    pub course_name: String,
}

/// Enrolls a student straight into one of the teacher's courses as approved.
pub async fn direct_enroll(
    pool: &PgPool,
    teacher_id: Uuid,
    course_id: Uuid,
    student_username: &str,
) -> Result<DirectEnrollment, EnrollmentError> {
    let mut tx = pool.begin().await?;

    let course = lock_course(&mut tx, course_id, Some(teacher_id))
        .await?
        .ok_or_else(|| EnrollmentError::new(EnrollmentErrorKind::InvalidCourseOrStudent))?;

    let student: (Uuid, String) = sqlx::query_as(
        "SELECT id, username FROM users WHERE LOWER(username) = LOWER($1) AND role = 'student'",
    )
    .bind(student_username.trim())
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| EnrollmentError::new(EnrollmentErrorKind::InvalidCourseOrStudent))?;
    let (student_id, username) = student;

    if data::fetch_enrollment_for(&mut *tx, student_id, course.id)
        .await?
        .is_some()
    {
        return Err(EnrollmentError::new(EnrollmentErrorKind::AlreadyEnrolled {
            username: Some(username),
        }));
    }

    if !has_capacity(course.capacity, approved_count(&mut tx, course.id).await?) {
        return Err(EnrollmentError::new(EnrollmentErrorKind::CourseFull));
    }

    sqlx::query(
        "INSERT INTO enrollments (id, student_id, course_id, status, reviewed_by, reviewed_at)
         VALUES ($1, $2, $3, 'approved', $4, NOW())",
    )
    .bind(Uuid::new_v4())
    .bind(student_id)
    .bind(course.id)
    .bind(teacher_id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    info!(%teacher_id, student = %username, course = %course.name, "student enrolled directly");

    Ok(DirectEnrollment {
        student_username: username,
        course_name: course.name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn course(name: &str) -> CourseRow {
        let now = Utc::now();
        CourseRow {
            id: Uuid::new_v4(),
            name: name.to_string(),
            code: name.to_uppercase(),
            description: String::new(),
            teacher_id: None,
            teacher_username: None,
            schedule: String::new(),
            capacity: 30,
            approved_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn parses_review_actions() {
        assert_eq!(ReviewAction::parse("approve"), Some(ReviewAction::Approve));
        assert_eq!(ReviewAction::parse(" deny "), Some(ReviewAction::Deny));
        assert_eq!(ReviewAction::parse("maybe"), None);
        assert_eq!(
            ReviewAction::Deny.resulting_status(),
            EnrollmentStatus::Denied
        );
    }

    #[test]
    fn capacity_counts_only_approved_seats() {
        assert!(has_capacity(30, 29));
        assert!(!has_capacity(30, 30));
        assert!(!has_capacity(0, 0));
    }

    #[test]
    fn reports_unmet_prerequisites_in_order() {
        let algebra = course("Algebra");
        let geometry = course("Geometry");
        let prerequisites = vec![algebra.clone(), geometry.clone()];

        let approved: HashSet<Uuid> = [algebra.id].into_iter().collect();
        let missing = missing_prerequisites(&prerequisites, &approved);
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].name, "Geometry");

        let all: HashSet<Uuid> = [algebra.id, geometry.id].into_iter().collect();
        assert!(missing_prerequisites(&prerequisites, &all).is_empty());
    }

    #[test]
    fn missing_prerequisite_message_lists_names() {
        let err = EnrollmentError::new(EnrollmentErrorKind::MissingPrerequisites(vec![
            "Algebra".into(),
            "Geometry".into(),
        ]));
        assert_eq!(err.message(), "Missing prerequisites: Algebra, Geometry");
    }

    #[test]
    fn duplicate_direct_enrollment_names_student() {
        let err = EnrollmentError::new(EnrollmentErrorKind::AlreadyEnrolled {
            username: Some("sam".into()),
        });
        assert_eq!(err.message(), "sam is already enrolled or has a pending request.");
        assert_eq!(err.code(), "already_enrolled");
    }

    #[test]
    fn approval_mail_with_teacher_note() {
        let mail = decision_mail(
            "sam",
            "sam@example.com",
            "Algebra",
            ReviewAction::Approve,
            "Welcome aboard",
            ReviewScope::TaughtBy(Uuid::new_v4()),
        );
        assert_eq!(mail.to, "sam@example.com");
        assert_eq!(mail.subject, "Enrollment Approved for Algebra");
        assert_eq!(
            mail.body,
            "Dear sam,\n\nYour enrollment request for Algebra has been approved.\n\nNote from teacher: Welcome aboard\n\nThank you."
        );
    }

    #[test]
    fn denial_mail_without_note() {
        let mail = decision_mail(
            "sam",
            "sam@example.com",
            "Algebra",
            ReviewAction::Deny,
            "",
            ReviewScope::AnyCourse,
        );
        assert_eq!(mail.subject, "Enrollment Denied for Algebra");
        assert_eq!(
            mail.body,
            "Dear sam,\n\nYour enrollment request for Algebra has been denied.\n\nThank you."
        );
    }

    mod database {
        use super::*;
        use crate::test_support;

        #[tokio::test]
        async fn review_is_final() {
            let Some(pool) = test_support::pool().await else { return };
            let (teacher, _) = test_support::user(&pool, "teacher").await;
            let (student, _) = test_support::user(&pool, "student").await;
            let course = test_support::course(&pool, Some(teacher), 5).await;
            let enrollment = test_support::enrollment(&pool, student, course, "pending").await;

            let scope = ReviewScope::TaughtBy(teacher);
            let outcome =
                review_enrollment(&pool, teacher, scope, enrollment, ReviewAction::Approve, "")
                    .await
                    .unwrap();
            assert_eq!(outcome.status, EnrollmentStatus::Approved);

            let again =
                review_enrollment(&pool, teacher, scope, enrollment, ReviewAction::Deny, "late")
                    .await
                    .unwrap_err();
            assert_eq!(again.kind, EnrollmentErrorKind::NotPending);
            assert_eq!(test_support::enrollment_status(&pool, enrollment).await, "approved");
        }

        #[tokio::test]
        async fn teachers_review_only_their_courses() {
            let Some(pool) = test_support::pool().await else { return };
            let (owner, _) = test_support::user(&pool, "teacher").await;
            let (other, _) = test_support::user(&pool, "teacher").await;
            let (student, _) = test_support::user(&pool, "student").await;
            let course = test_support::course(&pool, Some(owner), 5).await;
            let enrollment = test_support::enrollment(&pool, student, course, "pending").await;

            let err = review_enrollment(
                &pool,
                other,
                ReviewScope::TaughtBy(other),
                enrollment,
                ReviewAction::Approve,
                "",
            )
            .await
            .unwrap_err();
            assert_eq!(err.kind, EnrollmentErrorKind::NotPending);
            assert_eq!(test_support::enrollment_status(&pool, enrollment).await, "pending");
        }

        #[tokio::test]
        async fn review_after_course_delete_is_not_pending() {
            let Some(pool) = test_support::pool().await else { return };
            let (admin, _) = test_support::user(&pool, "admin").await;
            let (student, _) = test_support::user(&pool, "student").await;
            let course = test_support::course(&pool, None, 5).await;
            let enrollment = test_support::enrollment(&pool, student, course, "pending").await;

            let mut tx = pool.begin().await.unwrap();
            assert!(lock_course(&mut tx, course, None).await.unwrap().is_some());
            let review = tokio::spawn({
                let pool = pool.clone();
                async move {
                    review_enrollment(
                        &pool,
                        admin,
                        ReviewScope::AnyCourse,
                        enrollment,
                        ReviewAction::Approve,
                        "",
                    )
                    .await
                }
            });
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            sqlx::query("DELETE FROM courses WHERE id = $1")
                .bind(course)
                .execute(&mut *tx)
                .await
                .unwrap();
            tx.commit().await.unwrap();

            let err = review.await.unwrap().unwrap_err();
            assert_eq!(err.kind, EnrollmentErrorKind::NotPending);
        }

        #[tokio::test]
        async fn full_course_blocks_approval_but_not_denial() {
            let Some(pool) = test_support::pool().await else { return };
            let (admin, _) = test_support::user(&pool, "admin").await;
            let (seated, _) = test_support::user(&pool, "student").await;
            let (waiting, _) = test_support::user(&pool, "student").await;
            let course = test_support::course(&pool, None, 1).await;
            test_support::enrollment(&pool, seated, course, "approved").await;
            let enrollment = test_support::enrollment(&pool, waiting, course, "pending").await;

            let err = review_enrollment(
                &pool,
                admin,
                ReviewScope::AnyCourse,
                enrollment,
                ReviewAction::Approve,
                "",
            )
            .await
            .unwrap_err();
            assert_eq!(err.kind, EnrollmentErrorKind::CourseFull);
            assert_eq!(test_support::enrollment_status(&pool, enrollment).await, "pending");

            let outcome = review_enrollment(
                &pool,
                admin,
                ReviewScope::AnyCourse,
                enrollment,
                ReviewAction::Deny,
                "Course is full",
            )
            .await
            .unwrap();
            assert_eq!(outcome.status, EnrollmentStatus::Denied);
        }

        #[tokio::test]
        async fn concurrent_approvals_respect_capacity() {
            let Some(pool) = test_support::pool().await else { return };
            let (admin, _) = test_support::user(&pool, "admin").await;
            let course = test_support::course(&pool, None, 1).await;
            let mut pending = Vec::new();
            for _ in 0..2 {
                let (student, _) = test_support::user(&pool, "student").await;
                pending.push(test_support::enrollment(&pool, student, course, "pending").await);
            }

            let approvals = pending.iter().map(|&enrollment| {
                let pool = pool.clone();
                tokio::spawn(async move {
                    review_enrollment(
                        &pool,
                        admin,
                        ReviewScope::AnyCourse,
                        enrollment,
                        ReviewAction::Approve,
                        "",
                    )
                    .await
                    .is_ok()
                })
            });
            let mut approved = 0;
            for handle in approvals.collect::<Vec<_>>() {
                if handle.await.unwrap() {
                    approved += 1;
                }
            }
            assert_eq!(approved, 1);

            let seats: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM enrollments WHERE course_id = $1 AND status = 'approved'",
            )
            .bind(course)
            .fetch_one(&pool)
            .await
            .unwrap();
            assert_eq!(seats, 1);
        }

        #[tokio::test]
        async fn direct_enroll_rejects_existing_enrollment() {
            let Some(pool) = test_support::pool().await else { return };
            let (teacher, _) = test_support::user(&pool, "teacher").await;
            let (student, username) = test_support::user(&pool, "student").await;
            let course = test_support::course(&pool, Some(teacher), 5).await;

            let enrolled = direct_enroll(&pool, teacher, course, &username.to_uppercase())
                .await
                .unwrap();
            assert_eq!(enrolled.student_username, username);

            let err = direct_enroll(&pool, teacher, course, &username).await.unwrap_err();
            assert_eq!(
                err.kind,
                EnrollmentErrorKind::AlreadyEnrolled {
                    username: Some(username.clone())
                }
            );

            let rows: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM enrollments WHERE student_id = $1 AND course_id = $2",
            )
            .bind(student)
            .bind(course)
            .fetch_one(&pool)
            .await
            .unwrap();
            assert_eq!(rows, 1);
        }

        #[tokio::test]
        async fn direct_enroll_checks_course_owner_and_seats() {
            let Some(pool) = test_support::pool().await else { return };
            let (teacher, _) = test_support::user(&pool, "teacher").await;
            let (other, _) = test_support::user(&pool, "teacher").await;
            let (seated, _) = test_support::user(&pool, "student").await;
            let (_, username) = test_support::user(&pool, "student").await;
            let course = test_support::course(&pool, Some(teacher), 1).await;

            let err = direct_enroll(&pool, other, course, &username).await.unwrap_err();
            assert_eq!(err.kind, EnrollmentErrorKind::InvalidCourseOrStudent);

            test_support::enrollment(&pool, seated, course, "approved").await;
            let err = direct_enroll(&pool, teacher, course, &username).await.unwrap_err();
            assert_eq!(err.kind, EnrollmentErrorKind::CourseFull);
        }

        #[tokio::test]
        async fn request_enrollment_once_per_course() {
            let Some(pool) = test_support::pool().await else { return };
            let (student, _) = test_support::user(&pool, "student").await;
            let course = test_support::course(&pool, None, 5).await;

            request_enrollment(&pool, student, course).await.unwrap();
            let err = request_enrollment(&pool, student, course).await.unwrap_err();
            assert_eq!(err.kind, EnrollmentErrorKind::AlreadyEnrolled { username: None });
        }
    }
}
