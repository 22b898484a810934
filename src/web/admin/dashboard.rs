use axum::{
    extract::{Query, State},
    response::{Html, Redirect},
};
use axum_extra::extract::cookie::CookieJar;
use tracing::error;
use uuid::Uuid;

use crate::web::{
    AppState, AuthUser,
    data::{self, EnrollmentQuery},
    escape_html,
    models::{CourseRow, EnrollmentListingRow, EnrollmentStatus, Role, UserRow},
    templates::{
        PageLayout, format_optional_timestamp, format_timestamp, render_option, render_page,
        status_tag,
    },
};

use super::{auth::require_admin_user, courses::render_course_form, types::ConsoleQuery};

struct ConsoleData {
    users: Vec<UserRow>,
    courses: Vec<CourseRow>,
    enrollments: Vec<EnrollmentListingRow>,
    teachers: Vec<UserRow>,
}

fn enrollment_query(params: &ConsoleQuery) -> EnrollmentQuery {
    EnrollmentQuery {
        status: params.enrollment_status_filter(),
        course_id: params
            .course_id
            .as_deref()
            .and_then(|raw| Uuid::parse_str(raw.trim()).ok()),
        student_username_contains: params.enrollment_q.clone(),
        ..Default::default()
    }
}

async fn load_console(state: &AppState, params: &ConsoleQuery) -> sqlx::Result<ConsoleData> {
    let pool = state.pool_ref();
    let users = data::fetch_users(
        pool,
        params.role_filter(),
        params.active_filter(),
        params.q.as_deref(),
    )
    .await?;
    let courses = data::fetch_courses(pool).await?;
    let teachers = data::fetch_teachers(pool).await?;

    let mut enrollments =
        data::fetch_enrollment_listings(pool, &enrollment_query(params)).await?;
    // The search box matches student username or course code.
    if let Some(term) = params.enrollment_q.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        let by_code = data::fetch_enrollment_listings(
            pool,
            &EnrollmentQuery {
                student_username_contains: None,
                course_code_contains: Some(term.to_string()),
                ..enrollment_query(params)
            },
        )
        .await?;
        for listing in by_code {
            if !enrollments.iter().any(|existing| existing.id == listing.id) {
                enrollments.push(listing);
            }
        }
        enrollments.sort_by_key(|listing| listing.requested_at);
    }

    Ok(ConsoleData {
        users,
        courses,
        enrollments,
        teachers,
    })
}

/// `GET /admin`
pub async fn dashboard(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(params): Query<ConsoleQuery>,
) -> Result<Html<String>, Redirect> {
    let auth_user = require_admin_user(&state, &jar).await?;

    let console = load_console(&state, &params).await.map_err(|err| {
        error!(?err, "failed to load admin console");
        Redirect::to("/dashboard?error=unknown")
    })?;

    let flash_html = params.flash().render(None);
    let body = format!(
        "{nav}{users}{user_forms}{courses}{enrollments}",
        nav = render_console_links(),
        users = render_users_section(&auth_user, &console.users, &params),
        user_forms = render_user_forms(),
        courses = render_courses_section(&console.courses, &console.teachers),
        enrollments = render_enrollments_section(&console.enrollments, &console.courses, &params),
    );

    Ok(Html(render_page(PageLayout {
        title: "Admin console",
        user: Some(&auth_user),
        flash_html: &flash_html,
        body_html: &body,
    })))
}

fn render_console_links() -> String {
    r#"<section class="panel">
    <h1>Admin console</h1>
    <p><a href="/admin/enrollments">Pending enrollment requests</a> · <a href="/admin/students">Student profiles</a> · <a href="/admin/teachers">Teacher profiles</a></p>
</section>"#
        .to_string()
}

fn render_users_section(admin: &AuthUser, users: &[UserRow], params: &ConsoleQuery) -> String {
    let role = params.role_filter();
    let mut role_options = render_option("", "All roles", role.is_none());
    for candidate in Role::ALL {
        role_options.push_str(&render_option(
            candidate.as_str(),
            candidate.label(),
            role == Some(candidate),
        ));
    }

    let active = params.active_filter();
    let active_options = [
        render_option("", "Any state", active.is_none()),
        render_option("yes", "Active", active == Some(true)),
        render_option("no", "Inactive", active == Some(false)),
    ]
    .concat();

    let rows = if users.is_empty() {
        r#"<tr><td colspan="6">No users match.</td></tr>"#.to_string()
    } else {
        users
            .iter()
            .map(|user| render_user_row(admin, user))
            .collect::<String>()
    };

    format!(
        r#"<section class="panel">
    <h2>Users</h2>
    <form method="get" action="/admin" class="inline-form">
        <select name="role">{role_options}</select>
        <select name="active">{active_options}</select>
        <input type="search" name="q" value="{q}" placeholder="Username or email">
        <button type="submit">Filter</button>
    </form>
    <table>
        <thead><tr><th>Username</th><th>Email</th><th>Role</th><th>Active</th><th>Joined</th><th></th></tr></thead>
        <tbody>{rows}</tbody>
    </table>
</section>"#,
        q = escape_html(params.q.as_deref().unwrap_or("")),
    )
}

fn render_user_row(admin: &AuthUser, user: &UserRow) -> String {
    let toggle = if user.id == admin.id {
        r#"<span class="note">You</span>"#.to_string()
    } else {
        let (value, label) = if user.is_active {
            ("false", "Deactivate")
        } else {
            ("true", "Activate")
        };
        format!(
            r#"<form method="post" action="/admin/users/active" class="inline-form"><input type="hidden" name="user_id" value="{id}"><input type="hidden" name="active" value="{value}"><button type="submit" class="btn-sm">{label}</button></form>"#,
            id = user.id,
        )
    };

    format!(
        r#"<tr class="{class}"><td>{username}</td><td>{email}</td><td>{role}</td><td>{active}</td><td>{joined}</td><td>{toggle}</td></tr>"#,
        class = if user.id == admin.id { "current-user" } else { "" },
        username = escape_html(&user.username),
        email = escape_html(&user.email),
        role = user.role().map_or("Unknown", Role::label),
        active = if user.is_active { "Yes" } else { "No" },
        joined = format_timestamp(&user.date_joined),
    )
}

fn render_user_forms() -> String {
    let mut role_options = String::new();
    for role in Role::ALL {
        role_options.push_str(&render_option(role.as_str(), role.label(), role == Role::Student));
    }

    format!(
        r#"<section class="panel">
    <h2>Create user</h2>
    <form method="post" action="/admin/users" class="stacked">
        <label>Username <input type="text" name="username" required></label>
        <label>Email <input type="email" name="email" required></label>
        <label>Role <select name="role">{role_options}</select></label>
        <label>Password <input type="password" name="password1" required></label>
        <label>Confirm password <input type="password" name="password2" required></label>
        <button type="submit">Create user</button>
    </form>
    <h2>Reset password</h2>
    <form method="post" action="/admin/users/password" class="stacked">
        <label>Username <input type="text" name="username" required></label>
        <label>New password <input type="password" name="password1" required></label>
        <label>Confirm password <input type="password" name="password2" required></label>
        <button type="submit" class="btn-warning">Reset password</button>
    </form>
</section>"#
    )
}

fn render_courses_section(courses: &[CourseRow], teachers: &[UserRow]) -> String {
    let rows = if courses.is_empty() {
        r#"<tr><td colspan="5">No courses yet.</td></tr>"#.to_string()
    } else {
        courses
            .iter()
            .map(|course| {
                format!(
                    r#"<tr><td>{code}</td><td>{name}</td><td>{teacher}</td><td>{approved} / {capacity}</td><td><a href="/admin/courses/{id}">Edit</a></td></tr>"#,
                    id = course.id,
                    code = escape_html(&course.code),
                    name = escape_html(&course.name),
                    teacher = escape_html(course.teacher_username.as_deref().unwrap_or("Unassigned")),
                    approved = course.approved_count,
                    capacity = course.capacity,
                )
            })
            .collect::<String>()
    };

    format!(
        r#"<section class="panel" id="courses">
    <h2>Courses</h2>
    <table>
        <thead><tr><th>Code</th><th>Name</th><th>Teacher</th><th>Capacity</th><th></th></tr></thead>
        <tbody>{rows}</tbody>
    </table>
    <h3>New course</h3>
    {form}
</section>"#,
        form = render_course_form(None, teachers),
    )
}

fn render_enrollments_section(
    enrollments: &[EnrollmentListingRow],
    courses: &[CourseRow],
    params: &ConsoleQuery,
) -> String {
    let status = params.enrollment_status_filter();
    let mut status_options = render_option("", "Any status", status.is_none());
    for candidate in EnrollmentStatus::ALL {
        status_options.push_str(&render_option(
            candidate.as_str(),
            candidate.label(),
            status == Some(candidate),
        ));
    }

    let selected_course = params.course_id.as_deref().unwrap_or("").trim();
    let mut course_options = render_option("", "Any course", selected_course.is_empty());
    for course in courses {
        let id = course.id.to_string();
        course_options.push_str(&render_option(
            &id,
            &course.display_name(),
            id == selected_course,
        ));
    }

    let rows = if enrollments.is_empty() {
        r#"<tr><td colspan="6">No enrollments match.</td></tr>"#.to_string()
    } else {
        enrollments
            .iter()
            .map(|listing| {
                format!(
                    "<tr><td>{student}</td><td>{course}</td><td>{status}</td><td>{requested}</td><td>{reviewed}</td><td>{reviewer}</td></tr>",
                    student = escape_html(&listing.student_username),
                    course = escape_html(&format!("{} - {}", listing.course_code, listing.course_name)),
                    status = status_tag(&listing.status),
                    requested = format_timestamp(&listing.requested_at),
                    reviewed = format_optional_timestamp(listing.reviewed_at.as_ref()),
                    reviewer = escape_html(listing.reviewer_username.as_deref().unwrap_or("")),
                )
            })
            .collect::<String>()
    };

    format!(
        r#"<section class="panel">
    <h2>Enrollments</h2>
    <form method="get" action="/admin" class="inline-form">
        <select name="enrollment_status">{status_options}</select>
        <select name="course_id">{course_options}</select>
        <input type="search" name="enrollment_q" value="{q}" placeholder="Student username or course code">
        <button type="submit">Filter</button>
    </form>
    <table>
        <thead><tr><th>Student</th><th>Course</th><th>Status</th><th>Requested</th><th>Reviewed</th><th>Reviewer</th></tr></thead>
        <tbody>{rows}</tbody>
    </table>
</section>"#,
        q = escape_html(params.enrollment_q.as_deref().unwrap_or("")),
    )
}
