use axum::{
    extract::{Form, Query, State},
    response::{Html, Redirect},
};
use axum_extra::extract::cookie::CookieJar;
use tracing::error;

use crate::{
    enrollment::ReviewScope,
    web::{
        AppState,
        data::{self, EnrollmentQuery},
        escape_html,
        models::EnrollmentStatus,
        review::{ReviewForm, apply_review, render_pending_table},
        templates::{PageLayout, render_page},
    },
};

use super::{auth::require_admin_user, types::EnrollmentFilterQuery};

fn pending_query(filter: &EnrollmentFilterQuery) -> EnrollmentQuery {
    EnrollmentQuery {
        status: Some(EnrollmentStatus::Pending),
        student_username_contains: filter.student.clone(),
        course_name_contains: filter.course.clone(),
        ..Default::default()
    }
}

/// `GET /admin/enrollments`: the pending queue across all courses.
pub async fn enrollment_requests(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(filter): Query<EnrollmentFilterQuery>,
) -> Result<Html<String>, Redirect> {
    let admin = require_admin_user(&state, &jar).await?;

    let pending = data::fetch_enrollment_listings(state.pool_ref(), &pending_query(&filter))
        .await
        .map_err(|err| {
            error!(?err, "failed to load pending enrollments");
            Redirect::to("/admin?error=unknown")
        })?;

    let body = format!(
        r#"<section class="panel">
    <h1>Enrollment requests</h1>
    <form method="get" action="/admin/enrollments" class="inline-form">
        <input type="search" name="student" value="{student}" placeholder="Student username">
        <input type="search" name="course" value="{course}" placeholder="Course name">
        <button type="submit">Filter</button>
    </form>
    {table}
</section>"#,
        student = escape_html(filter.student.as_deref().unwrap_or("")),
        course = escape_html(filter.course.as_deref().unwrap_or("")),
        table = render_pending_table(&pending, "/admin/enrollments"),
    );

    let flash_html = filter.flash().render(None);
    Ok(Html(render_page(PageLayout {
        title: "Enrollment requests",
        user: Some(&admin),
        flash_html: &flash_html,
        body_html: &body,
    })))
}

pub async fn review_enrollment_request(
    State(state): State<AppState>,
    jar: CookieJar,
    Form(form): Form<ReviewForm>,
) -> Result<Redirect, Redirect> {
    let admin = require_admin_user(&state, &jar).await?;
    let query = apply_review(&state, &admin, ReviewScope::AnyCourse, &form).await;
    Ok(Redirect::to(&format!("/admin/enrollments?{query}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_filters_only_pending() {
        let query = pending_query(&EnrollmentFilterQuery {
            student: Some("sam".into()),
            course: Some("alg".into()),
            ..Default::default()
        });
        assert_eq!(query.status, Some(EnrollmentStatus::Pending));
        assert_eq!(query.student_username_contains.as_deref(), Some("sam"));
        assert_eq!(query.course_name_contains.as_deref(), Some("alg"));
        assert!(query.teacher_id.is_none());
    }
}
