use axum::{
    extract::{Form, Path, Query, State},
    response::{Html, Redirect},
};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;
use tracing::error;
use uuid::Uuid;

use crate::{
    enrollment::{self, ReviewScope},
    web::{
        AppState, AuthUser,
        auth::require_role,
        data::{self, EnrollmentQuery},
        escape_html,
        flash::FlashQuery,
        models::{CourseRow, EnrollmentListingRow, EnrollmentStatus, Role},
        review::{ReviewForm, apply_review, render_pending_table},
        templates::{PageLayout, format_optional_timestamp, render_option, render_page},
    },
};

#[derive(Deserialize)]
pub struct DirectEnrollForm {
    #[serde(default)]
    pub course_id: String,
    #[serde(default)]
    pub student_username: String,
}

fn load_failed(err: sqlx::Error) -> Redirect {
    error!(?err, "failed to load teacher data");
    Redirect::to("/dashboard?error=unknown")
}

async fn approved_roster(state: &AppState, course_id: Uuid) -> sqlx::Result<Vec<EnrollmentListingRow>> {
    data::fetch_enrollment_listings(
        state.pool_ref(),
        &EnrollmentQuery {
            course_id: Some(course_id),
            status: Some(EnrollmentStatus::Approved),
            ..Default::default()
        },
    )
    .await
}

pub async fn teacher_dashboard(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<Html<String>, Redirect> {
    let user = require_role(&state, &jar, Role::Teacher).await?;
    let courses = data::fetch_courses_for_teacher(state.pool_ref(), user.id)
        .await
        .map_err(load_failed)?;

    Ok(Html(render_console(&user, &courses, None, None, None)))
}

/// `POST /teacher/dashboard`: enrolls a student directly into one of the teacher's courses.
pub async fn direct_enroll(
    State(state): State<AppState>,
    jar: CookieJar,
    Form(form): Form<DirectEnrollForm>,
) -> Result<Html<String>, Redirect> {
    let user = require_role(&state, &jar, Role::Teacher).await?;

    let course_id = Uuid::parse_str(form.course_id.trim()).ok();
    let (message, is_error) = match course_id {
        Some(course_id) => {
            match enrollment::direct_enroll(
                state.pool_ref(),
                user.id,
                course_id,
                &form.student_username,
            )
            .await
            {
                Ok(done) => (
                    format!(
                        "{} has been enrolled in {}.",
                        done.student_username, done.course_name
                    ),
                    false,
                ),
                Err(err) => (err.message(), true),
            }
        }
        None => ("Invalid course or student.".to_string(), true),
    };

    let courses = data::fetch_courses_for_teacher(state.pool_ref(), user.id)
        .await
        .map_err(load_failed)?;

    let selected = course_id.and_then(|id| courses.iter().find(|course| course.id == id));
    let roster = match selected {
        Some(course) => Some(approved_roster(&state, course.id).await.map_err(load_failed)?),
        None => None,
    };

    let flash = format!(
        r#"<div class="flash {class}">{message}</div>"#,
        class = if is_error { "error" } else { "success" },
        message = escape_html(&message),
    );

    Ok(Html(render_console(
        &user,
        &courses,
        selected,
        roster.as_deref(),
        Some(&flash),
    )))
}

fn render_console(
    user: &AuthUser,
    courses: &[CourseRow],
    selected: Option<&CourseRow>,
    roster: Option<&[EnrollmentListingRow]>,
    flash_html: Option<&str>,
) -> String {
    let options = courses
        .iter()
        .map(|course| {
            render_option(
                &course.id.to_string(),
                &course.display_name(),
                selected.is_some_and(|selected| selected.id == course.id),
            )
        })
        .collect::<String>();

    let enroll_form = if courses.is_empty() {
        r#"<p class="note">No courses are assigned to you yet.</p>"#.to_string()
    } else {
        format!(
            r#"<form class="inline-form" method="post" action="/teacher/dashboard">
    <select name="course_id" required>{options}</select>
    <input type="text" name="student_username" placeholder="Student username" required>
    <button type="submit">Enroll student</button>
</form>"#
        )
    };

    let roster_html = match (selected, roster) {
        (Some(course), Some(roster)) => format!(
            r#"<section class="panel"><h2>Enrolled in {name}</h2>{table}</section>"#,
            name = escape_html(&course.name),
            table = render_roster(roster),
        ),
        _ => String::new(),
    };

    let body = format!(
        r#"<section class="panel">
    <h1>Teacher console</h1>
    <p class="note">Enroll a student directly into one of your courses. The enrollment is approved immediately.</p>
    {enroll_form}
</section>
{roster_html}
<section class="panel"><h2>My courses</h2>{courses}</section>"#,
        courses = render_course_table(courses),
    );

    render_page(PageLayout {
        title: "Teacher console",
        user: Some(user),
        flash_html: flash_html.unwrap_or(""),
        body_html: &body,
    })
}

fn render_course_table(courses: &[CourseRow]) -> String {
    if courses.is_empty() {
        return r#"<p class="note">No courses are assigned to you yet.</p>"#.to_string();
    }
    let rows = courses
        .iter()
        .map(|course| {
            format!(
                r#"<tr><td>{code}</td><td>{name}</td><td>{schedule}</td><td>{approved} / {capacity}</td><td><a href="/teacher/courses/{id}/students">Students</a></td></tr>"#,
                id = course.id,
                code = escape_html(&course.code),
                name = escape_html(&course.name),
                schedule = escape_html(&course.schedule),
                approved = course.approved_count,
                capacity = course.capacity,
            )
        })
        .collect::<String>();
    format!(
        "<table><thead><tr><th>Code</th><th>Course</th><th>Schedule</th><th>Enrolled</th><th></th></tr></thead><tbody>{rows}</tbody></table>"
    )
}

fn render_roster(roster: &[EnrollmentListingRow]) -> String {
    if roster.is_empty() {
        return r#"<p class="note">No students are enrolled yet.</p>"#.to_string();
    }
    let rows = roster
        .iter()
        .map(|enrollment| {
            format!(
                "<tr><td>{}</td><td>{}</td><td>{}</td></tr>",
                escape_html(&enrollment.student_username),
                escape_html(&enrollment.student_email),
                format_optional_timestamp(enrollment.reviewed_at.as_ref()),
            )
        })
        .collect::<String>();
    format!(
        "<table><thead><tr><th>Student</th><th>Email</th><th>Approved</th></tr></thead><tbody>{rows}</tbody></table>"
    )
}

pub async fn teacher_courses(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<Html<String>, Redirect> {
    let user = require_role(&state, &jar, Role::Teacher).await?;
    let courses = data::fetch_courses_for_teacher(state.pool_ref(), user.id)
        .await
        .map_err(load_failed)?;

    let body = format!(
        r#"<section class="panel"><h1>My courses</h1>{}</section>"#,
        render_course_table(&courses)
    );
    Ok(Html(render_page(PageLayout {
        title: "My courses",
        user: Some(&user),
        flash_html: "",
        body_html: &body,
    })))
}

pub async fn teacher_course_students(
    State(state): State<AppState>,
    jar: CookieJar,
    Path(course_id): Path<Uuid>,
) -> Result<Html<String>, Redirect> {
    let user = require_role(&state, &jar, Role::Teacher).await?;

    let course = data::fetch_course(state.pool_ref(), course_id)
        .await
        .map_err(load_failed)?
        .filter(|course| course.teacher_id == Some(user.id))
        .ok_or_else(|| Redirect::to("/teacher/courses"))?;
    let roster = approved_roster(&state, course.id).await.map_err(load_failed)?;

    let body = format!(
        r#"<section class="panel"><h1>{name}</h1><p class="note">{code} · {schedule} · {approved} of {capacity} seats taken</p>{table}<p><a href="/teacher/courses">Back to my courses</a></p></section>"#,
        name = escape_html(&course.name),
        code = escape_html(&course.code),
        schedule = escape_html(&course.schedule),
        approved = course.approved_count,
        capacity = course.capacity,
        table = render_roster(&roster),
    );
    Ok(Html(render_page(PageLayout {
        title: &course.name,
        user: Some(&user),
        flash_html: "",
        body_html: &body,
    })))
}

pub async fn pending_enrollments(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(flash): Query<FlashQuery>,
) -> Result<Html<String>, Redirect> {
    let user = require_role(&state, &jar, Role::Teacher).await?;

    let pending = data::fetch_enrollment_listings(
        state.pool_ref(),
        &EnrollmentQuery {
            teacher_id: Some(user.id),
            status: Some(EnrollmentStatus::Pending),
            ..Default::default()
        },
    )
    .await
    .map_err(load_failed)?;

    let body = format!(
        r#"<section class="panel"><h1>Pending enrollment requests</h1>{}</section>"#,
        render_pending_table(&pending, "/teacher/courses/pending")
    );
    let flash_html = flash.render(None);
    Ok(Html(render_page(PageLayout {
        title: "Pending requests",
        user: Some(&user),
        flash_html: &flash_html,
        body_html: &body,
    })))
}

pub async fn review_pending(
    State(state): State<AppState>,
    jar: CookieJar,
    Form(form): Form<ReviewForm>,
) -> Result<Redirect, Redirect> {
    let user = require_role(&state, &jar, Role::Teacher).await?;
    let query = apply_review(&state, &user, ReviewScope::TaughtBy(user.id), &form).await;
    Ok(Redirect::to(&format!("/teacher/courses/pending?{query}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn teacher() -> AuthUser {
        AuthUser {
            id: Uuid::new_v4(),
            username: "ada".into(),
            email: "ada@example.com".into(),
            role: "teacher".into(),
        }
    }

    fn course(name: &str) -> CourseRow {
        let now = Utc::now();
        CourseRow {
            id: Uuid::new_v4(),
            name: name.into(),
            code: "C1".into(),
            description: String::new(),
            teacher_id: None,
            teacher_username: Some("ada".into()),
            schedule: "Tue".into(),
            capacity: 2,
            approved_count: 1,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn console_preselects_course_and_shows_roster() {
        let courses = vec![course("Algebra"), course("Geometry")];
        let html = render_console(
            &teacher(),
            &courses,
            Some(&courses[1]),
            Some(&[]),
            Some(r#"<div class="flash error">No seats available in this course.</div>"#),
        );
        assert!(html.contains(&format!(r#"value="{}" selected"#, courses[1].id)));
        assert!(html.contains("Enrolled in Geometry"));
        assert!(html.contains("No students are enrolled yet."));
        assert!(html.contains("No seats available in this course."));
    }

    #[test]
    fn console_without_courses_hides_form() {
        let html = render_console(&teacher(), &[], None, None, None);
        assert!(!html.contains("student_username"));
    }
}
