use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    response::{Html, IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::CookieJar;
use tracing::{error, info};

use crate::{
    utils::encryption::encrypt_text,
    web::{
        AppState, AuthUser,
        auth::{require_role, require_user},
        dashboard::{ensure_student_profile, ensure_teacher_profile, render_file_link},
        escape_html,
        models::{Role, StudentProfileRow, TeacherProfileRow},
        storage::media_url,
        templates::{PageLayout, render_error_list, render_page},
        uploads::{
            ID_PROOF_FIELD, PROFILE_PICTURE_FIELD, TRANSCRIPT_FIELD, UploadOutcome,
            process_upload_form, remove_media_file,
        },
        validation::{FieldErrors, optional_text, parse_age, required_text, validate_email},
    },
};

/// What happens to a stored file field after an edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileChange {
    /// Value to store in the profile row.
    pub keep: Option<String>,
    /// Previously stored file that is no longer referenced.
    pub obsolete: Option<String>,
}

/// A new upload replaces the current file, otherwise `clear` drops it.
pub fn resolve_file_change(current: Option<String>, uploaded: Option<String>, clear: bool) -> FileChange {
    match (uploaded, clear) {
        (Some(new_path), _) => FileChange {
            keep: Some(new_path),
            obsolete: current,
        },
        (None, true) => FileChange {
            keep: None,
            obsolete: current,
        },
        (None, false) => FileChange {
            keep: current,
            obsolete: None,
        },
    }
}

fn file_change(outcome: &UploadOutcome, field_name: &str, current: Option<String>) -> FileChange {
    resolve_file_change(
        current,
        outcome.relative_path_for(field_name),
        outcome.flag(&format!("{field_name}_clear")),
    )
}

#[derive(Debug, Clone, Default)]
pub struct StudentProfileValues {
    pub full_name: String,
    pub age: String,
    pub contact_number: String,
    pub guardian_email: String,
    pub address: String,
}

impl StudentProfileValues {
    fn from_profile(profile: &StudentProfileRow) -> Self {
        Self {
            full_name: profile.full_name.clone(),
            age: profile.age.to_string(),
            contact_number: profile.contact_number.clone(),
            guardian_email: profile.guardian_email.clone(),
            address: profile.decrypted_address(),
        }
    }

    fn from_outcome(outcome: &UploadOutcome) -> Self {
        Self {
            full_name: outcome.text("full_name"),
            age: outcome.text("age"),
            contact_number: outcome.text("contact_number"),
            guardian_email: outcome.text("guardian_email").trim().to_string(),
            address: outcome.text("address"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StudentProfileUpdate {
    pub full_name: String,
    pub age: i32,
    pub contact_number: String,
    pub guardian_email: String,
    pub address: String,
}

pub fn validate_student_profile(
    values: &StudentProfileValues,
) -> Result<StudentProfileUpdate, FieldErrors> {
    let mut errors = FieldErrors::default();

    let full_name = required_text(&values.full_name, "Full name", 100);
    let age = parse_age(&values.age);
    let contact_number = required_text(&values.contact_number, "Contact number", 20);
    let guardian_email = validate_email(&values.guardian_email, "Guardian email")
        .and_then(|_| required_text(&values.guardian_email, "Guardian email", 254));
    let address = required_text(&values.address, "Address", 0);

    match (full_name, age, contact_number, guardian_email, address) {
        (Ok(full_name), Ok(age), Ok(contact_number), Ok(guardian_email), Ok(address)) => {
            Ok(StudentProfileUpdate {
                full_name,
                age,
                contact_number,
                guardian_email,
                address,
            })
        }
        (full_name, age, contact_number, guardian_email, address) => {
            errors.check(full_name.map(|_| ()));
            errors.check(age.map(|_| ()));
            errors.check(contact_number.map(|_| ()));
            errors.check(guardian_email.map(|_| ()));
            errors.check(address.map(|_| ()));
            Err(errors)
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TeacherProfileValues {
    pub full_name: String,
    pub department: String,
    pub contact_email: String,
    pub office_location: String,
    pub bio: String,
}

impl TeacherProfileValues {
    fn from_profile(profile: &TeacherProfileRow) -> Self {
        Self {
            full_name: profile.full_name.clone(),
            department: profile.department.clone(),
            contact_email: profile.contact_email.clone(),
            office_location: profile.office_location.clone(),
            bio: profile.bio.clone(),
        }
    }

    fn from_outcome(outcome: &UploadOutcome) -> Self {
        Self {
            full_name: outcome.text("full_name"),
            department: outcome.text("department"),
            contact_email: outcome.text("contact_email").trim().to_string(),
            office_location: outcome.text("office_location"),
            bio: outcome.text("bio"),
        }
    }
}

pub fn validate_teacher_profile(
    values: &TeacherProfileValues,
) -> Result<TeacherProfileValues, FieldErrors> {
    let mut errors = FieldErrors::default();

    let full_name = required_text(&values.full_name, "Full name", 100);
    let department = required_text(&values.department, "Department", 100);
    let contact_email = validate_email(&values.contact_email, "Contact email")
        .and_then(|_| required_text(&values.contact_email, "Contact email", 254));
    let office_location = optional_text(&values.office_location, "Office location", 100);
    let bio = optional_text(&values.bio, "Bio", 0);

    match (full_name, department, contact_email, office_location, bio) {
        (Ok(full_name), Ok(department), Ok(contact_email), Ok(office_location), Ok(bio)) => {
            Ok(TeacherProfileValues {
                full_name,
                department,
                contact_email,
                office_location,
                bio,
            })
        }
        (full_name, department, contact_email, office_location, bio) => {
            errors.check(full_name.map(|_| ()));
            errors.check(department.map(|_| ()));
            errors.check(contact_email.map(|_| ()));
            errors.check(office_location.map(|_| ()));
            errors.check(bio.map(|_| ()));
            Err(errors)
        }
    }
}

pub async fn edit_profile_page(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<Html<String>, Redirect> {
    let user = require_user(&state, &jar).await?;
    let pool = state.pool_ref();

    let body = match user.role() {
        Some(Role::Student) => {
            let profile = ensure_student_profile(pool, &user)
                .await
                .map_err(profile_load_failed)?;
            render_student_form(&StudentProfileValues::from_profile(&profile), &profile, &[])
        }
        Some(Role::Teacher) => {
            let profile = ensure_teacher_profile(pool, &user)
                .await
                .map_err(profile_load_failed)?;
            render_teacher_form(&TeacherProfileValues::from_profile(&profile), &profile, &[])
        }
        _ => return Err(Redirect::to("/dashboard?error=profile_forbidden")),
    };

    Ok(Html(page(&user, &body)))
}

pub async fn update_profile(
    State(state): State<AppState>,
    jar: CookieJar,
    multipart: Multipart,
) -> Result<Redirect, Response> {
    let user = require_user(&state, &jar)
        .await
        .map_err(IntoResponse::into_response)?;

    match user.role() {
        Some(Role::Student) => update_student_profile(&state, &user, multipart).await,
        Some(Role::Teacher) => update_teacher_profile(&state, &user, multipart).await,
        _ => Err(Redirect::to("/dashboard?error=profile_forbidden").into_response()),
    }
}

async fn update_student_profile(
    state: &AppState,
    user: &AuthUser,
    multipart: Multipart,
) -> Result<Redirect, Response> {
    let pool = state.pool_ref();
    let profile = ensure_student_profile(pool, user)
        .await
        .map_err(|err| profile_load_failed(err).into_response())?;

    let outcome = process_upload_form(
        multipart,
        state.media_root(),
        &[TRANSCRIPT_FIELD, ID_PROOF_FIELD, PROFILE_PICTURE_FIELD],
    )
    .await
    .map_err(|err| {
        let values = StudentProfileValues::from_profile(&profile);
        rejected(user, render_student_form(&values, &profile, &[err.message().to_string()]))
    })?;

    let values = StudentProfileValues::from_outcome(&outcome);
    let update = match validate_student_profile(&values) {
        Ok(update) => update,
        Err(errors) => {
            outcome.discard().await;
            return Err(rejected(user, render_student_form(&values, &profile, errors.messages())));
        }
    };

    let transcript = file_change(&outcome, TRANSCRIPT_FIELD.field_name, profile.transcript.clone());
    let id_proof = file_change(&outcome, ID_PROOF_FIELD.field_name, profile.id_proof.clone());
    let picture = file_change(
        &outcome,
        PROFILE_PICTURE_FIELD.field_name,
        profile.profile_picture.clone(),
    );

    let result = sqlx::query(
        "UPDATE student_profiles
         SET full_name = $2, age = $3, contact_number = $4, guardian_email = $5, address_encrypted = $6,
             transcript = $7, id_proof = $8, profile_picture = $9, updated_at = NOW()
         WHERE user_id = $1",
    )
    .bind(user.id)
    .bind(&update.full_name)
    .bind(update.age)
    .bind(&update.contact_number)
    .bind(&update.guardian_email)
    .bind(encrypt_text(&update.address))
    .bind(&transcript.keep)
    .bind(&id_proof.keep)
    .bind(&picture.keep)
    .execute(pool)
    .await;

    if let Err(err) = result {
        error!(?err, username = %user.username, "failed to update student profile");
        outcome.discard().await;
        return Err(Redirect::to("/dashboard?error=unknown").into_response());
    }

    for obsolete in [transcript.obsolete, id_proof.obsolete, picture.obsolete]
        .into_iter()
        .flatten()
    {
        remove_media_file(state.media_root(), &obsolete).await;
    }

    info!(username = %user.username, "student profile updated");
    Ok(Redirect::to("/dashboard?status=profile_updated"))
}

async fn update_teacher_profile(
    state: &AppState,
    user: &AuthUser,
    multipart: Multipart,
) -> Result<Redirect, Response> {
    let pool = state.pool_ref();
    let profile = ensure_teacher_profile(pool, user)
        .await
        .map_err(|err| profile_load_failed(err).into_response())?;

    let outcome = process_upload_form(multipart, state.media_root(), &[PROFILE_PICTURE_FIELD])
        .await
        .map_err(|err| {
            let values = TeacherProfileValues::from_profile(&profile);
            rejected(user, render_teacher_form(&values, &profile, &[err.message().to_string()]))
        })?;

    let values = TeacherProfileValues::from_outcome(&outcome);
    let update = match validate_teacher_profile(&values) {
        Ok(update) => update,
        Err(errors) => {
            outcome.discard().await;
            return Err(rejected(user, render_teacher_form(&values, &profile, errors.messages())));
        }
    };

    let picture = file_change(
        &outcome,
        PROFILE_PICTURE_FIELD.field_name,
        profile.profile_picture.clone(),
    );

    let result = sqlx::query(
        "UPDATE teacher_profiles
         SET full_name = $2, department = $3, contact_email = $4, office_location = $5, bio = $6, profile_picture = $7
         WHERE user_id = $1",
    )
    .bind(user.id)
    .bind(&update.full_name)
    .bind(&update.department)
    .bind(&update.contact_email)
    .bind(&update.office_location)
    .bind(&update.bio)
    .bind(&picture.keep)
    .execute(pool)
    .await;

    if let Err(err) = result {
        error!(?err, username = %user.username, "failed to update teacher profile");
        outcome.discard().await;
        return Err(Redirect::to("/dashboard?error=unknown").into_response());
    }

    if let Some(obsolete) = picture.obsolete {
        remove_media_file(state.media_root(), &obsolete).await;
    }

    info!(username = %user.username, "teacher profile updated");
    Ok(Redirect::to("/dashboard?status=profile_updated"))
}

/// `GET /view-transcript`: embeds the student's transcript.
pub async fn view_transcript(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<Html<String>, Redirect> {
    let user = require_role(&state, &jar, Role::Student).await?;

    let profile = crate::web::data::fetch_student_profile(state.pool_ref(), user.id)
        .await
        .map_err(profile_load_failed)?;
    let Some(transcript) = profile.and_then(|profile| profile.transcript) else {
        return Err(Redirect::to("/dashboard?error=no_transcript"));
    };

    let url = escape_html(&media_url(&transcript));
    let body = format!(
        r#"<section class="panel">
    <h1>My transcript</h1>
    <p><a href="{url}" target="_blank" rel="noopener">Open in a new tab</a></p>
    <iframe src="{url}" title="Transcript" style="width: 100%; min-height: 720px; border: 1px solid #e2e8f0; border-radius: 8px;"></iframe>
</section>"#
    );

    Ok(Html(page(&user, &body)))
}

fn profile_load_failed(err: sqlx::Error) -> Redirect {
    error!(?err, "failed to load profile");
    Redirect::to("/dashboard?error=unknown")
}

fn rejected(user: &AuthUser, body: String) -> Response {
    (StatusCode::BAD_REQUEST, Html(page(user, &body))).into_response()
}

fn page(user: &AuthUser, body: &str) -> String {
    render_page(PageLayout {
        title: "Edit profile",
        user: Some(user),
        flash_html: "",
        body_html: body,
    })
}

fn text_field(name: &str, label: &str, input_type: &str, value: &str) -> String {
    format!(
        r#"<div class="field"><label for="{name}">{label}</label><input id="{name}" name="{name}" type="{input_type}" value="{value}"></div>"#,
        value = escape_html(value),
    )
}

fn file_field(name: &str, label: &str, accept: &str, current: Option<&str>) -> String {
    let current_html = match current {
        Some(path) => format!(
            r#"<span class="help">Currently: {link} <label><input type="checkbox" name="{name}_clear" value="1"> Clear</label></span>"#,
            link = render_file_link(Some(path), "view file"),
        ),
        None => String::new(),
    };
    format!(
        r#"<div class="field"><label for="{name}">{label}</label>{current_html}<input id="{name}" name="{name}" type="file" accept="{accept}"></div>"#
    )
}

const DOCUMENT_ACCEPT: &str = "application/pdf,image/jpeg,image/png";
const IMAGE_ACCEPT: &str = "image/jpeg,image/png,image/gif,image/webp";

pub fn render_student_form(
    values: &StudentProfileValues,
    profile: &StudentProfileRow,
    errors: &[String],
) -> String {
    format!(
        r#"<section class="panel" style="max-width: 680px;">
    <h1>Edit profile</h1>
    {errors}
    <form method="post" action="/edit-profile" enctype="multipart/form-data">
        {full_name}
        {age}
        {contact}
        {guardian}
        <div class="field"><label for="address">Address</label><textarea id="address" name="address">{address}</textarea></div>
        {transcript}
        {id_proof}
        {picture}
        <button type="submit">Save changes</button>
    </form>
</section>"#,
        errors = render_error_list(errors),
        full_name = text_field("full_name", "Full name", "text", &values.full_name),
        age = text_field("age", "Age", "number", &values.age),
        contact = text_field("contact_number", "Contact number", "text", &values.contact_number),
        guardian = text_field("guardian_email", "Guardian email", "email", &values.guardian_email),
        address = escape_html(&values.address),
        transcript = file_field("transcript", "Transcript", DOCUMENT_ACCEPT, profile.transcript.as_deref()),
        id_proof = file_field("id_proof", "ID proof", DOCUMENT_ACCEPT, profile.id_proof.as_deref()),
        picture = file_field(
            "profile_picture",
            "Profile picture",
            IMAGE_ACCEPT,
            profile.profile_picture.as_deref()
        ),
    )
}

pub fn render_teacher_form(
    values: &TeacherProfileValues,
    profile: &TeacherProfileRow,
    errors: &[String],
) -> String {
    format!(
        r#"<section class="panel" style="max-width: 680px;">
    <h1>Edit profile</h1>
    {errors}
    <form method="post" action="/edit-profile" enctype="multipart/form-data">
        {full_name}
        {department}
        {contact}
        {office}
        <div class="field"><label for="bio">Bio</label><textarea id="bio" name="bio">{bio}</textarea></div>
        {picture}
        <button type="submit">Save changes</button>
    </form>
</section>"#,
        errors = render_error_list(errors),
        full_name = text_field("full_name", "Full name", "text", &values.full_name),
        department = text_field("department", "Department", "text", &values.department),
        contact = text_field("contact_email", "Contact email", "email", &values.contact_email),
        office = text_field("office_location", "Office location", "text", &values.office_location),
        bio = escape_html(&values.bio),
        picture = file_field(
            "profile_picture",
            "Profile picture",
            IMAGE_ACCEPT,
            profile.profile_picture.as_deref()
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_replaces_current_file() {
        let change = resolve_file_change(Some("old.pdf".into()), Some("new.pdf".into()), false);
        assert_eq!(change.keep.as_deref(), Some("new.pdf"));
        assert_eq!(change.obsolete.as_deref(), Some("old.pdf"));
    }

    #[test]
    fn clear_drops_current_file() {
        let change = resolve_file_change(Some("old.pdf".into()), None, true);
        assert_eq!(change.keep, None);
        assert_eq!(change.obsolete.as_deref(), Some("old.pdf"));
    }

    #[test]
    fn untouched_field_keeps_file() {
        let change = resolve_file_change(Some("old.pdf".into()), None, false);
        assert_eq!(change.keep.as_deref(), Some("old.pdf"));
        assert_eq!(change.obsolete, None);

        let empty = resolve_file_change(None, None, true);
        assert_eq!(empty, FileChange { keep: None, obsolete: None });
    }

    #[test]
    fn student_profile_validation() {
        let values = StudentProfileValues {
            full_name: "Jane".into(),
            age: "16".into(),
            contact_number: "555".into(),
            guardian_email: "parent@example.com".into(),
            address: "<p>2 High St</p>".into(),
        };
        let update = validate_student_profile(&values).unwrap();
        assert_eq!(update.address, "2 High St");

        let invalid = StudentProfileValues {
            age: "-3".into(),
            ..values
        };
        assert!(validate_student_profile(&invalid).is_err());
    }

    #[test]
    fn teacher_profile_requires_department() {
        let values = TeacherProfileValues {
            full_name: "Ada".into(),
            department: "  ".into(),
            contact_email: "ada@example.com".into(),
            ..Default::default()
        };
        let errors = validate_teacher_profile(&values).unwrap_err();
        assert!(errors.messages().iter().any(|m| m.contains("Department")));
    }
}
