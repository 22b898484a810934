use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::CookieJar;
use tracing::error;
use uuid::Uuid;

use crate::{
    enrollment::{self, EnrollmentError},
    web::{
        AppState, AuthUser,
        auth::require_user,
        data, escape_html,
        flash::FlashQuery,
        models::{CourseRow, EnrollmentRow, Role},
        templates::{PageLayout, render_message_page, render_page, status_tag},
    },
};

pub async fn course_list(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(flash): Query<FlashQuery>,
) -> Result<Html<String>, Redirect> {
    let user = require_user(&state, &jar).await?;

    let courses = data::fetch_courses(state.pool_ref()).await.map_err(|err| {
        error!(?err, "failed to load courses");
        Redirect::to("/dashboard?error=unknown")
    })?;

    let body = render_course_list(&courses);
    let flash_html = flash.render(None);
    Ok(Html(render_page(PageLayout {
        title: "Courses",
        user: Some(&user),
        flash_html: &flash_html,
        body_html: &body,
    })))
}

fn render_course_list(courses: &[CourseRow]) -> String {
    if courses.is_empty() {
        return r#"<section class="panel"><h1>Courses</h1><p class="note">No courses are available yet.</p></section>"#.to_string();
    }

    let rows = courses
        .iter()
        .map(|course| {
            format!(
                r#"<tr><td>{code}</td><td><a href="/courses/{id}">{name}</a></td><td>{teacher}</td><td>{schedule}</td><td>{approved} / {capacity}</td></tr>"#,
                id = course.id,
                code = escape_html(&course.code),
                name = escape_html(&course.name),
                teacher = escape_html(course.teacher_username.as_deref().unwrap_or("Unassigned")),
                schedule = escape_html(&course.schedule),
                approved = course.approved_count,
                capacity = course.capacity,
            )
        })
        .collect::<String>();

    format!(
        r#"<section class="panel"><h1>Courses</h1><table><thead><tr><th>Code</th><th>Course</th><th>Teacher</th><th>Schedule</th><th>Seats taken</th></tr></thead><tbody>{rows}</tbody></table></section>"#
    )
}

/// Whether a student without an enrollment may still ask for a seat.
pub fn can_enroll(course: &CourseRow, existing: Option<&EnrollmentRow>) -> bool {
    existing.is_none() && enrollment::has_capacity(course.capacity, course.approved_count)
}

struct CourseDetail {
    course: CourseRow,
    prerequisites: Vec<CourseRow>,
    existing: Option<EnrollmentRow>,
}

async fn load_detail(
    state: &AppState,
    user: &AuthUser,
    course_id: Uuid,
) -> Result<Option<CourseDetail>, sqlx::Error> {
    let pool = state.pool_ref();
    let Some(course) = data::fetch_course(pool, course_id).await? else {
        return Ok(None);
    };
    let prerequisites = data::fetch_prerequisites(pool, course.id).await?;
    let existing = data::fetch_enrollment_for(pool, user.id, course.id).await?;
    Ok(Some(CourseDetail {
        course,
        prerequisites,
        existing,
    }))
}

pub async fn course_detail(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(course_id): Path<Uuid>,
    Query(flash): Query<FlashQuery>,
) -> Result<Html<String>, Response> {
    let user = require_user(&state, &jar)
        .await
        .map_err(IntoResponse::into_response)?;

    let detail = fetch_detail_or_respond(&state, &user, course_id).await?;
    let flash_html = flash.render(None);
    Ok(Html(render_detail_page(&user, &detail, &flash_html)))
}

/// `POST /courses/:id`: files a pending request for the logged-in student.
pub async fn request_enrollment(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(course_id): Path<Uuid>,
) -> Result<Redirect, Response> {
    let user = require_user(&state, &jar)
        .await
        .map_err(IntoResponse::into_response)?;

    if !user.is(Role::Student) {
        return Ok(Redirect::to(&format!("/courses/{course_id}?error=not_authorized")));
    }

    match enrollment::request_enrollment(state.pool_ref(), user.id, course_id).await {
        Ok(_) => Ok(Redirect::to(&format!(
            "/courses/{course_id}?status=enrollment_requested"
        ))),
        Err(err) => {
            let detail = fetch_detail_or_respond(&state, &user, course_id).await?;
            Err(rejected_request(&user, &detail, &err))
        }
    }
}

async fn fetch_detail_or_respond(
    state: &AppState,
    user: &AuthUser,
    course_id: Uuid,
) -> Result<CourseDetail, Response> {
    match load_detail(state, user, course_id).await {
        Ok(Some(detail)) => Ok(detail),
        Ok(None) => Err((
            StatusCode::NOT_FOUND,
            Html(render_message_page(
                Some(user),
                "Course not found",
                "The requested course does not exist.",
            )),
        )
            .into_response()),
        Err(err) => {
            error!(?err, %course_id, "failed to load course detail");
            Err(Redirect::to("/courses?error=unknown").into_response())
        }
    }
}

fn rejected_request(user: &AuthUser, detail: &CourseDetail, err: &EnrollmentError) -> Response {
    let flash_html = format!(
        r#"<div class="flash error">{}</div>"#,
        escape_html(&err.message())
    );
    (
        StatusCode::CONFLICT,
        Html(render_detail_page(user, detail, &flash_html)),
    )
        .into_response()
}

fn render_detail_page(user: &AuthUser, detail: &CourseDetail, flash_html: &str) -> String {
    let course = &detail.course;

    let prerequisites = if detail.prerequisites.is_empty() {
        "None".to_string()
    } else {
        detail
            .prerequisites
            .iter()
            .map(|prerequisite| {
                format!(
                    r#"<a href="/courses/{}">{}</a>"#,
                    prerequisite.id,
                    escape_html(&prerequisite.display_name())
                )
            })
            .collect::<Vec<_>>()
            .join(", ")
    };

    let enrollment_html = match (&detail.existing, user.role()) {
        (Some(existing), _) => {
            let note = if existing.note.is_empty() {
                String::new()
            } else {
                format!(r#"<p class="note">Note: {}</p>"#, escape_html(&existing.note))
            };
            format!(
                r#"<p>Your enrollment status: {}</p>{note}"#,
                status_tag(&existing.status)
            )
        }
        (None, Some(Role::Student)) if can_enroll(course, None) => format!(
            r#"<form method="post" action="/courses/{id}"><button type="submit">Request enrollment</button></form>"#,
            id = course.id
        ),
        (None, Some(Role::Student)) => {
            r#"<p class="note">This course is full.</p>"#.to_string()
        }
        (None, _) => String::new(),
    };

    let body = format!(
        r#"<section class="panel">
    <h1>{name}</h1>
    <dl class="profile">
        <dt>Code</dt><dd>{code}</dd>
        <dt>Teacher</dt><dd>{teacher}</dd>
        <dt>Schedule</dt><dd>{schedule}</dd>
        <dt>Seats</dt><dd>{approved} of {capacity} taken ({left} left)</dd>
        <dt>Prerequisites</dt><dd>{prerequisites}</dd>
    </dl>
    <p class="note">{description}</p>
    {enrollment_html}
    <p><a href="/courses">Back to courses</a></p>
</section>"#,
        name = escape_html(&course.name),
        code = escape_html(&course.code),
        teacher = escape_html(course.teacher_username.as_deref().unwrap_or("Unassigned")),
        schedule = escape_html(&course.schedule),
        approved = course.approved_count,
        capacity = course.capacity,
        left = course.seats_left(),
        description = escape_html(&course.description),
    );

    render_page(PageLayout {
        title: &course.name,
        user: Some(user),
        flash_html,
        body_html: &body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn course(capacity: i32, approved_count: i64) -> CourseRow {
        let now = Utc::now();
        CourseRow {
            id: Uuid::new_v4(),
            name: "Algebra".into(),
            code: "MATH101".into(),
            description: "Linear equations".into(),
            teacher_id: None,
            teacher_username: None,
            schedule: "Mon 9:00".into(),
            capacity,
            approved_count,
            created_at: now,
            updated_at: now,
        }
    }

    fn student() -> AuthUser {
        AuthUser {
            id: Uuid::new_v4(),
            username: "sam".into(),
            email: "sam@example.com".into(),
            role: "student".into(),
        }
    }

    fn enrollment(course: &CourseRow, status: &str) -> EnrollmentRow {
        EnrollmentRow {
            id: Uuid::new_v4(),
            student_id: Uuid::new_v4(),
            course_id: course.id,
            status: status.into(),
            requested_at: Utc::now(),
            reviewed_at: None,
            reviewed_by: None,
            note: String::new(),
        }
    }

    #[test]
    fn can_enroll_requires_seat_and_no_request() {
        let open = course(2, 1);
        assert!(can_enroll(&open, None));
        assert!(!can_enroll(&course(2, 2), None));
        assert!(!can_enroll(&open, Some(&enrollment(&open, "denied"))));
    }

    #[test]
    fn detail_offers_request_button_to_students() {
        let detail = CourseDetail {
            course: course(30, 0),
            prerequisites: vec![],
            existing: None,
        };
        let html = render_detail_page(&student(), &detail, "");
        assert!(html.contains("Request enrollment"));
        assert!(html.contains("Prerequisites</dt><dd>None"));
    }

    #[test]
    fn detail_shows_existing_status() {
        let c = course(30, 0);
        let detail = CourseDetail {
            existing: Some(enrollment(&c, "pending")),
            course: c,
            prerequisites: vec![course(10, 0)],
        };
        let html = render_detail_page(&student(), &detail, "");
        assert!(html.contains("status-tag pending"));
        assert!(!html.contains("Request enrollment"));
        assert!(html.contains("MATH101 - Algebra"));
    }

    #[test]
    fn list_marks_unassigned_courses() {
        let html = render_course_list(&[course(30, 3)]);
        assert!(html.contains("Unassigned"));
        assert!(html.contains("3 / 30"));
    }
}
