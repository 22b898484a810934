use axum::{
    extract::{Query, State},
    response::{Html, Redirect},
};
use axum_extra::extract::cookie::CookieJar;
use tracing::error;

use crate::web::{
    AppState, data, escape_html,
    models::{StudentProfileListing, TeacherProfileListing},
    storage::media_url,
    templates::{PageLayout, render_option, render_page},
};

use super::{auth::require_admin_user, types::TeacherFilterQuery};

/// Inline preview for a stored document: a link for PDFs, a thumbnail for images.
fn document_preview(path: Option<&str>, label: &str) -> String {
    let Some(path) = path.filter(|path| !path.is_empty()) else {
        return r#"<span class="note">No file</span>"#.to_string();
    };
    let href = escape_html(&media_url(path));
    let lower = path.to_ascii_lowercase();
    if lower.ends_with(".pdf") {
        format!(
            r#"<a href="{href}" target="_blank" rel="noopener">View {label} (PDF)</a>"#,
            label = escape_html(label)
        )
    } else {
        format!(
            r#"<a href="{href}" target="_blank" rel="noopener"><img class="thumbnail" src="{href}" alt="{label}"></a>"#,
            label = escape_html(label)
        )
    }
}

pub async fn student_profiles(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<Html<String>, Redirect> {
    let admin = require_admin_user(&state, &jar).await?;

    let profiles = data::fetch_student_profiles(state.pool_ref())
        .await
        .map_err(|err| {
            error!(?err, "failed to load student profiles");
            Redirect::to("/admin?error=unknown")
        })?;

    let body = render_student_profiles(&profiles);
    Ok(Html(render_page(PageLayout {
        title: "Student profiles",
        user: Some(&admin),
        flash_html: "",
        body_html: &body,
    })))
}

fn render_student_profiles(profiles: &[StudentProfileListing]) -> String {
    if profiles.is_empty() {
        return r#"<section class="panel"><h1>Student profiles</h1><p class="note">No student profiles yet.</p></section>"#.to_string();
    }

    let rows = profiles
        .iter()
        .map(|listing| {
            let profile = &listing.profile;
            format!(
                "<tr><td>{username}</td><td>{name}</td><td>{age}</td><td>{contact}</td><td>{address}</td><td>{guardian}</td><td>{transcript}</td><td>{id_proof}</td></tr>",
                username = escape_html(&listing.username),
                name = escape_html(&profile.full_name),
                age = profile.age,
                contact = escape_html(&profile.contact_number),
                address = escape_html(&profile.decrypted_address()),
                guardian = escape_html(&profile.guardian_email),
                transcript = document_preview(profile.transcript.as_deref(), "transcript"),
                id_proof = document_preview(profile.id_proof.as_deref(), "ID proof"),
            )
        })
        .collect::<String>();

    format!(
        r#"<section class="panel"><h1>Student profiles</h1><table><thead><tr><th>Username</th><th>Full name</th><th>Age</th><th>Contact</th><th>Address</th><th>Guardian email</th><th>Transcript</th><th>ID proof</th></tr></thead><tbody>{rows}</tbody></table></section>"#
    )
}

pub async fn teacher_profiles(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(filter): Query<TeacherFilterQuery>,
) -> Result<Html<String>, Redirect> {
    let admin = require_admin_user(&state, &jar).await?;
    let pool = state.pool_ref();

    let load = async {
        let profiles =
            data::fetch_teacher_profiles(pool, filter.department.as_deref(), filter.q.as_deref())
                .await?;
        let departments = data::fetch_departments(pool).await?;
        Ok::<_, sqlx::Error>((profiles, departments))
    };
    let (profiles, departments) = load.await.map_err(|err| {
        error!(?err, "failed to load teacher profiles");
        Redirect::to("/admin?error=unknown")
    })?;

    let body = render_teacher_profiles(&profiles, &departments, &filter);
    Ok(Html(render_page(PageLayout {
        title: "Teacher profiles",
        user: Some(&admin),
        flash_html: "",
        body_html: &body,
    })))
}

fn render_teacher_profiles(
    profiles: &[TeacherProfileListing],
    departments: &[String],
    filter: &TeacherFilterQuery,
) -> String {
    let current = filter.department.as_deref().unwrap_or("");
    let mut options = render_option("", "All departments", current.is_empty());
    for department in departments {
        options.push_str(&render_option(department, department, department == current));
    }

    let table = if profiles.is_empty() {
        r#"<p class="note">No teacher profiles match.</p>"#.to_string()
    } else {
        let rows = profiles
            .iter()
            .map(|listing| {
                let profile = &listing.profile;
                format!(
                    "<tr><td>{username}</td><td>{name}</td><td>{department}</td><td>{email}</td><td>{office}</td></tr>",
                    username = escape_html(&listing.username),
                    name = escape_html(&profile.full_name),
                    department = escape_html(&profile.department),
                    email = escape_html(&profile.contact_email),
                    office = escape_html(&profile.office_location),
                )
            })
            .collect::<String>();
        format!(
            "<table><thead><tr><th>Username</th><th>Full name</th><th>Department</th><th>Contact email</th><th>Office</th></tr></thead><tbody>{rows}</tbody></table>"
        )
    };

    format!(
        r#"<section class="panel">
    <h1>Teacher profiles</h1>
    <form method="get" action="/admin/teachers" class="inline-form">
        <select name="department">{options}</select>
        <input type="search" name="q" value="{q}" placeholder="Search name, username or department">
        <button type="submit">Filter</button>
    </form>
    {table}
</section>"#,
        q = escape_html(filter.q.as_deref().unwrap_or("")),
    )
}
