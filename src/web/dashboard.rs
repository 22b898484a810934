use axum::{
    extract::{Query, State},
    response::{Html, Redirect},
};
use axum_extra::extract::cookie::CookieJar;
use sqlx::PgPool;
use tracing::{error, info, warn};

use crate::web::{
    AppState, AuthUser,
    auth::{require_role, require_user},
    data::{self, EnrollmentQuery},
    escape_html,
    flash::FlashQuery,
    models::{CourseRow, EnrollmentListingRow, EnrollmentStatus, Role, StudentProfileRow, TeacherProfileRow},
    storage::media_url,
    templates::{PageLayout, format_timestamp, render_page, status_tag},
};

pub const DEFAULT_STUDENT_AGE: i32 = 18;

/// Loads the student's profile, creating a default one when it is missing.
pub async fn ensure_student_profile(
    pool: &PgPool,
    user: &AuthUser,
) -> sqlx::Result<StudentProfileRow> {
    if let Some(profile) = data::fetch_student_profile(pool, user.id).await? {
        return Ok(profile);
    }

    warn!(username = %user.username, "no student profile found, creating one");
    sqlx::query(
        "INSERT INTO student_profiles (user_id, full_name, age, guardian_email) VALUES ($1, $2, $3, $4)
         ON CONFLICT (user_id) DO NOTHING",
    )
    .bind(user.id)
    .bind(&user.username)
    .bind(DEFAULT_STUDENT_AGE)
    .bind(&user.email)
    .execute(pool)
    .await?;

    data::fetch_student_profile(pool, user.id)
        .await?
        .ok_or(sqlx::Error::RowNotFound)
}

/// Loads the teacher's profile, creating a default one when it is missing.
pub async fn ensure_teacher_profile(
    pool: &PgPool,
    user: &AuthUser,
) -> sqlx::Result<TeacherProfileRow> {
    if let Some(profile) = data::fetch_teacher_profile(pool, user.id).await? {
        return Ok(profile);
    }

    warn!(username = %user.username, "no teacher profile found, creating one");
    sqlx::query(
        "INSERT INTO teacher_profiles (user_id, full_name, contact_email) VALUES ($1, $2, $3)
         ON CONFLICT (user_id) DO NOTHING",
    )
    .bind(user.id)
    .bind(&user.username)
    .bind(&user.email)
    .execute(pool)
    .await?;

    data::fetch_teacher_profile(pool, user.id)
        .await?
        .ok_or(sqlx::Error::RowNotFound)
}

pub async fn dashboard(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(flash): Query<FlashQuery>,
) -> Result<Html<String>, Redirect> {
    let user = require_user(&state, &jar).await?;
    info!(username = %user.username, role = %user.role, "dashboard accessed");

    let pool = state.pool_ref();
    let body = match user.role() {
        Some(Role::Student) => student_dashboard(pool, &user).await,
        Some(Role::Teacher) => teacher_dashboard(pool, &user).await,
        Some(Role::Admin) => admin_dashboard(pool).await,
        None => return Err(Redirect::to("/login?error=unauthorized_role")),
    }
    .map_err(|err| {
        error!(?err, username = %user.username, "failed to load dashboard");
        Redirect::to("/?error=unknown")
    })?;

    let flash_html = flash.render(Some(&user.username));
    Ok(Html(render_page(PageLayout {
        title: "Dashboard",
        user: Some(&user),
        flash_html: &flash_html,
        body_html: &body,
    })))
}

async fn student_dashboard(pool: &PgPool, user: &AuthUser) -> sqlx::Result<String> {
    let profile = ensure_student_profile(pool, user).await?;
    let enrollments = data::fetch_enrollment_listings(
        pool,
        &EnrollmentQuery {
            student_id: Some(user.id),
            ..Default::default()
        },
    )
    .await?;

    Ok(format!(
        "{}{}",
        render_student_profile(&profile),
        render_student_enrollments(&enrollments)
    ))
}

async fn teacher_dashboard(pool: &PgPool, user: &AuthUser) -> sqlx::Result<String> {
    let profile = ensure_teacher_profile(pool, user).await?;
    let courses = data::fetch_courses_for_teacher(pool, user.id).await?;
    Ok(format!(
        "{}{}",
        render_teacher_profile(&profile),
        render_taught_courses(&courses)
    ))
}

#[derive(sqlx::FromRow)]
struct AdminCounts {
    users: i64,
    courses: i64,
    pending: i64,
}

async fn admin_dashboard(pool: &PgPool) -> sqlx::Result<String> {
    let counts = sqlx::query_as::<_, AdminCounts>(
        "SELECT (SELECT COUNT(*) FROM users) AS users,
                (SELECT COUNT(*) FROM courses) AS courses,
                (SELECT COUNT(*) FROM enrollments WHERE status = 'pending') AS pending",
    )
    .fetch_one(pool)
    .await?;

    Ok(format!(
        r#"<section class="panel"><h1>Administrator dashboard</h1></section>
<section class="grid">
    <a class="card" href="/admin"><h3>Users</h3><div class="stat">{users}</div><p class="note">Manage accounts and roles.</p></a>
    <a class="card" href="/admin#courses"><h3>Courses</h3><div class="stat">{courses}</div><p class="note">Create courses and prerequisites.</p></a>
    <a class="card" href="/admin/enrollments"><h3>Pending requests</h3><div class="stat">{pending}</div><p class="note">Approve or deny enrollment requests.</p></a>
    <a class="card" href="/admin/students"><h3>Student profiles</h3><p class="note">Profiles, addresses and documents.</p></a>
    <a class="card" href="/admin/teachers"><h3>Teacher profiles</h3><p class="note">Departments and contact details.</p></a>
</section>"#,
        users = counts.users,
        courses = counts.courses,
        pending = counts.pending,
    ))
}

/// Link to a stored document, or a placeholder when nothing was uploaded.
pub fn render_file_link(path: Option<&str>, label: &str) -> String {
    match path {
        Some(path) if !path.is_empty() => format!(
            r#"<a href="{href}" target="_blank" rel="noopener">{label}</a>"#,
            href = escape_html(&media_url(path)),
            label = escape_html(label),
        ),
        _ => r#"<span class="note">No file</span>"#.to_string(),
    }
}

fn render_avatar(path: Option<&str>) -> String {
    match path {
        Some(path) if !path.is_empty() => format!(
            r#"<img class="avatar" src="{}" alt="Profile picture">"#,
            escape_html(&media_url(path))
        ),
        _ => String::new(),
    }
}

fn render_student_profile(profile: &StudentProfileRow) -> String {
    let transcript = if profile.transcript.is_some() {
        r#"<a href="/view-transcript">View transcript</a>"#.to_string()
    } else {
        r#"<span class="note">No file</span>"#.to_string()
    };

    format!(
        r#"<section class="panel">
    <h1>Student dashboard</h1>
    {avatar}
    <dl class="profile">
        <dt>Full name</dt><dd>{full_name}</dd>
        <dt>Age</dt><dd>{age}</dd>
        <dt>Contact number</dt><dd>{contact}</dd>
        <dt>Address</dt><dd>{address}</dd>
        <dt>Guardian email</dt><dd>{guardian}</dd>
        <dt>Transcript</dt><dd>{transcript}</dd>
        <dt>ID proof</dt><dd>{id_proof}</dd>
    </dl>
    <p><a href="/edit-profile">Edit profile</a></p>
</section>"#,
        avatar = render_avatar(profile.profile_picture.as_deref()),
        full_name = escape_html(&profile.full_name),
        age = profile.age,
        contact = escape_html(&profile.contact_number),
        address = escape_html(&profile.decrypted_address()),
        guardian = escape_html(&profile.guardian_email),
        id_proof = render_file_link(profile.id_proof.as_deref(), "View ID proof"),
    )
}

fn render_student_enrollments(enrollments: &[EnrollmentListingRow]) -> String {
    if enrollments.is_empty() {
        return r#"<section class="panel"><h2>My enrollments</h2><p class="note">You have not requested any courses yet. <a href="/courses">Browse courses</a>.</p></section>"#.to_string();
    }

    let rows = enrollments
        .iter()
        .map(|enrollment| {
            let note = if enrollment.note.is_empty() {
                String::new()
            } else {
                escape_html(&enrollment.note)
            };
            format!(
                r#"<tr><td><a href="/courses/{id}">{code}</a></td><td>{name}</td><td>{status}</td><td>{requested}</td><td>{note}</td></tr>"#,
                id = enrollment.course_id,
                code = escape_html(&enrollment.course_code),
                name = escape_html(&enrollment.course_name),
                status = status_tag(&enrollment.status),
                requested = format_timestamp(&enrollment.requested_at),
            )
        })
        .collect::<String>();

    format!(
        r#"<section class="panel"><h2>My enrollments</h2><table><thead><tr><th>Code</th><th>Course</th><th>Status</th><th>Requested</th><th>Note</th></tr></thead><tbody>{rows}</tbody></table></section>"#
    )
}

fn render_teacher_profile(profile: &TeacherProfileRow) -> String {
    format!(
        r#"<section class="panel">
    <h1>Teacher dashboard</h1>
    {avatar}
    <dl class="profile">
        <dt>Full name</dt><dd>{full_name}</dd>
        <dt>Department</dt><dd>{department}</dd>
        <dt>Contact email</dt><dd>{contact}</dd>
        <dt>Office</dt><dd>{office}</dd>
        <dt>Bio</dt><dd>{bio}</dd>
    </dl>
    <p><a href="/edit-profile">Edit profile</a> · <a href="/teacher/dashboard">Teacher console</a></p>
</section>"#,
        avatar = render_avatar(profile.profile_picture.as_deref()),
        full_name = escape_html(&profile.full_name),
        department = escape_html(&profile.department),
        contact = escape_html(&profile.contact_email),
        office = escape_html(&profile.office_location),
        bio = escape_html(&profile.bio),
    )
}

fn render_taught_courses(courses: &[CourseRow]) -> String {
    if courses.is_empty() {
        return r#"<section class="panel"><h2>My courses</h2><p class="note">No courses are assigned to you yet.</p></section>"#.to_string();
    }
    let rows = courses
        .iter()
        .map(|course| {
            format!(
                r#"<tr><td>{code}</td><td><a href="/teacher/courses/{id}/students">{name}</a></td><td>{schedule}</td><td>{approved} / {capacity}</td></tr>"#,
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
        r#"<section class="panel"><h2>My courses</h2><table><thead><tr><th>Code</th><th>Course</th><th>Schedule</th><th>Enrolled</th></tr></thead><tbody>{rows}</tbody></table></section>"#
    )
}

/// `GET /my-schedule`: the student's approved courses.
pub async fn student_schedule(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<Html<String>, Redirect> {
    let user = require_role(&state, &jar, Role::Student).await?;

    let enrollments = data::fetch_enrollment_listings(
        state.pool_ref(),
        &EnrollmentQuery {
            student_id: Some(user.id),
            status: Some(EnrollmentStatus::Approved),
            ..Default::default()
        },
    )
    .await
    .map_err(|err| {
        error!(?err, "failed to load student schedule");
        Redirect::to("/dashboard?error=unknown")
    })?;

    let body = render_schedule(&enrollments);
    Ok(Html(render_page(PageLayout {
        title: "My schedule",
        user: Some(&user),
        flash_html: "",
        body_html: &body,
    })))
}

fn render_schedule(enrollments: &[EnrollmentListingRow]) -> String {
    let content = if enrollments.is_empty() {
        r#"<p class="note">You are not enrolled in any course yet.</p>"#.to_string()
    } else {
        let rows = enrollments
            .iter()
            .map(|enrollment| {
                format!(
                    "<tr><td>{}</td><td>{}</td><td>{}</td></tr>",
                    escape_html(&enrollment.course_code),
                    escape_html(&enrollment.course_name),
                    escape_html(&enrollment.course_schedule),
                )
            })
            .collect::<String>();
        format!(
            "<table><thead><tr><th>Code</th><th>Course</th><th>Schedule</th></tr></thead><tbody>{rows}</tbody></table>"
        )
    };

    format!(r#"<section class="panel"><h1>My schedule</h1>{content}</section>"#)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    use crate::utils::encryption::encrypt_text;

    fn profile() -> StudentProfileRow {
        let now = Utc::now();
        StudentProfileRow {
            user_id: Uuid::new_v4(),
            full_name: "Jane <Doe>".into(),
            age: 17,
            contact_number: "555".into(),
            address_encrypted: encrypt_text("1 Main St"),
            guardian_email: "parent@example.com".into(),
            transcript: None,
            id_proof: Some("documents/id_proofs/abc_id.png".into()),
            profile_picture: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn student_profile_shows_decoded_address() {
        let html = render_student_profile(&profile());
        assert!(html.contains("1 Main St"));
        assert!(html.contains("Jane &lt;Doe&gt;"));
        assert!(html.contains("/media/documents/id_proofs/abc_id.png"));
    }

    #[test]
    fn broken_address_shows_placeholder() {
        let mut broken = profile();
        broken.address_encrypted = "***".into();
        assert!(render_student_profile(&broken).contains("[Decryption Error]"));
    }

    #[test]
    fn file_link_placeholder() {
        assert!(render_file_link(None, "View").contains("No file"));
        assert!(render_file_link(Some(""), "View").contains("No file"));
    }

    #[test]
    fn empty_schedule_message() {
        assert!(render_schedule(&[]).contains("not enrolled in any course"));
    }
}
