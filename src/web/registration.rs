use axum::{
    extract::{Form, Multipart, State},
    http::StatusCode,
    response::{Html, Redirect},
};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;
use sqlx::PgPool;
use tracing::{error, info};
use uuid::Uuid;

use crate::{
    utils::encryption::encrypt_text,
    web::{
        AppState,
        auth::{hash_password, redirect_if_authenticated, start_session},
        templates::{PageLayout, escape_html, render_error_list, render_page},
        uploads::{ID_PROOF_FIELD, TRANSCRIPT_FIELD, UploadOutcome, process_upload_form},
        validation::{
            FieldErrors, optional_text, parse_age, required_text, validate_email,
            validate_new_password, validate_username,
        },
    },
};

const USERNAME_TAKEN: &str = "A user with that username already exists.";

type FormRejection = (StatusCode, Html<String>);

/// Raw values of the student form, kept to refill the form after errors.
#[derive(Debug, Default, Clone)]
pub struct StudentRegistrationValues {
    pub username: String,
    pub email: String,
    pub password1: String,
    pub password2: String,
    pub full_name: String,
    pub age: String,
    pub contact_number: String,
    pub address: String,
    pub guardian_email: String,
}

impl StudentRegistrationValues {
    fn from_outcome(outcome: &UploadOutcome) -> Self {
        Self {
            username: outcome.text("username").trim().to_string(),
            email: outcome.text("email").trim().to_string(),
            password1: outcome.text("password1"),
            password2: outcome.text("password2"),
            full_name: outcome.text("full_name"),
            age: outcome.text("age"),
            contact_number: outcome.text("contact_number"),
            address: outcome.text("address"),
            guardian_email: outcome.text("guardian_email").trim().to_string(),
        }
    }
}

/// A validated student registration ready to be stored.
#[derive(Debug, Clone, PartialEq)]
pub struct NewStudent {
    pub username: String,
    pub email: String,
    pub password: String,
    pub full_name: String,
    pub age: i32,
    pub contact_number: String,
    pub address: String,
    pub guardian_email: String,
}

pub fn validate_student(values: &StudentRegistrationValues) -> Result<NewStudent, FieldErrors> {
    let mut errors = FieldErrors::default();

    errors.check(validate_username(&values.username));
    errors.check(validate_email(&values.email, "Email"));
    for message in validate_new_password(&values.password1, &values.password2, &values.username) {
        errors.push(message);
    }

    let full_name = required_text(&values.full_name, "Full name", 100);
    let age = parse_age(&values.age);
    let contact_number = required_text(&values.contact_number, "Contact number", 20);
    let address = required_text(&values.address, "Address", 0);
    let guardian_email = validate_email(&values.guardian_email, "Guardian email")
        .and_then(|_| required_text(&values.guardian_email, "Guardian email", 254));

    match (full_name, age, contact_number, address, guardian_email) {
        (Ok(full_name), Ok(age), Ok(contact_number), Ok(address), Ok(guardian_email))
            if errors.is_empty() =>
        {
            Ok(NewStudent {
                username: values.username.clone(),
                email: values.email.clone(),
                password: values.password1.clone(),
                full_name,
                age,
                contact_number,
                address,
                guardian_email,
            })
        }
        (full_name, age, contact_number, address, guardian_email) => {
            errors.check(full_name.map(|_| ()));
            errors.check(age.map(|_| ()));
            errors.check(contact_number.map(|_| ()));
            errors.check(address.map(|_| ()));
            errors.check(guardian_email.map(|_| ()));
            Err(errors)
        }
    }
}

#[derive(Debug, Default, Clone, Deserialize)]
pub struct TeacherRegistrationForm {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password1: String,
    #[serde(default)]
    pub password2: String,
    #[serde(default)]
    pub full_name: String,
    #[serde(default)]
    pub department: String,
    #[serde(default)]
    pub contact_email: String,
    #[serde(default)]
    pub office_location: String,
    #[serde(default)]
    pub bio: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewTeacher {
    pub username: String,
    pub email: String,
    pub password: String,
    pub full_name: String,
    pub department: String,
    pub contact_email: String,
    pub office_location: String,
    pub bio: String,
}

pub fn validate_teacher(form: &TeacherRegistrationForm) -> Result<NewTeacher, FieldErrors> {
    let mut errors = FieldErrors::default();
    let username = form.username.trim();

    errors.check(validate_username(username));
    errors.check(validate_email(form.email.trim(), "Email"));
    for message in validate_new_password(&form.password1, &form.password2, username) {
        errors.push(message);
    }

    let full_name = required_text(&form.full_name, "Full name", 100);
    let department = required_text(&form.department, "Department", 100);
    let contact_email = validate_email(form.contact_email.trim(), "Contact email")
        .and_then(|_| required_text(&form.contact_email, "Contact email", 254));
    let office_location = optional_text(&form.office_location, "Office location", 100);
    let bio = optional_text(&form.bio, "Bio", 0);

    match (full_name, department, contact_email, office_location, bio) {
        (Ok(full_name), Ok(department), Ok(contact_email), Ok(office_location), Ok(bio))
            if errors.is_empty() =>
        {
            Ok(NewTeacher {
                username: username.to_string(),
                email: form.email.trim().to_string(),
                password: form.password1.clone(),
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

pub async fn student_form(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<Html<String>, Redirect> {
    if let Some(redirect) = redirect_if_authenticated(&state, &jar).await {
        return Err(redirect);
    }
    Ok(Html(render_student_form(
        &StudentRegistrationValues::default(),
        &[],
    )))
}

pub async fn register_student(
    State(state): State<AppState>,
    jar: CookieJar,
    multipart: Multipart,
) -> Result<(CookieJar, Redirect), FormRejection> {
    let outcome = process_upload_form(
        multipart,
        state.media_root(),
        &[TRANSCRIPT_FIELD, ID_PROOF_FIELD],
    )
    .await
    .map_err(|err| {
        rejected_student(
            &StudentRegistrationValues::default(),
            &[err.message().to_string()],
        )
    })?;

    let values = StudentRegistrationValues::from_outcome(&outcome);
    let student = match validate_student(&values) {
        Ok(student) => student,
        Err(errors) => {
            outcome.discard().await;
            return Err(rejected_student(&values, errors.messages()));
        }
    };

    let transcript = outcome.relative_path_for(TRANSCRIPT_FIELD.field_name);
    let id_proof = outcome.relative_path_for(ID_PROOF_FIELD.field_name);

    let user_id = match insert_student(state.pool_ref(), &student, transcript, id_proof).await {
        Ok(user_id) => user_id,
        Err(err) => {
            outcome.discard().await;
            return Err(rejected_student(&values, &[insert_failure_message(err)]));
        }
    };

    info!(username = %student.username, "student registered");
    let jar = start_session(state.pool_ref(), jar, user_id)
        .await
        .map_err(|err| {
            error!(?err, "failed to start session after registration");
            rejected_student(&values, &[GENERIC_FAILURE.to_string()])
        })?;

    Ok((jar, Redirect::to("/dashboard?status=registered_student")))
}

pub async fn teacher_form(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<Html<String>, Redirect> {
    if let Some(redirect) = redirect_if_authenticated(&state, &jar).await {
        return Err(redirect);
    }
    Ok(Html(render_teacher_form(
        &TeacherRegistrationForm::default(),
        &[],
    )))
}

pub async fn register_teacher(
    State(state): State<AppState>,
    jar: CookieJar,
    Form(form): Form<TeacherRegistrationForm>,
) -> Result<(CookieJar, Redirect), FormRejection> {
    let teacher = validate_teacher(&form).map_err(|errors| rejected_teacher(&form, errors.messages()))?;

    let user_id = insert_teacher(state.pool_ref(), &teacher)
        .await
        .map_err(|err| rejected_teacher(&form, &[insert_failure_message(err)]))?;

    info!(username = %teacher.username, "teacher registered");
    let jar = start_session(state.pool_ref(), jar, user_id)
        .await
        .map_err(|err| {
            error!(?err, "failed to start session after registration");
            rejected_teacher(&form, &[GENERIC_FAILURE.to_string()])
        })?;

    Ok((jar, Redirect::to("/dashboard?status=registered_teacher")))
}

const GENERIC_FAILURE: &str = "Something went wrong while creating the account. Please try again.";

fn insert_failure_message(err: sqlx::Error) -> String {
    match err {
        sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505") => {
            USERNAME_TAKEN.to_string()
        }
        err => {
            error!(?err, "failed to store registration");
            GENERIC_FAILURE.to_string()
        }
    }
}

async fn insert_user(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    username: &str,
    email: &str,
    password: &str,
    role: &str,
) -> sqlx::Result<Uuid> {
    let password_hash = hash_password(password).map_err(|err| {
        sqlx::Error::Protocol(format!("failed to hash registration password: {err}"))
    })?;
    let user_id = Uuid::new_v4();

    sqlx::query(
        "INSERT INTO users (id, username, email, password_hash, role) VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(user_id)
    .bind(username)
    .bind(email)
    .bind(password_hash)
    .bind(role)
    .execute(&mut **tx)
    .await?;

    Ok(user_id)
}

async fn insert_student(
    pool: &PgPool,
    student: &NewStudent,
    transcript: Option<String>,
    id_proof: Option<String>,
) -> sqlx::Result<Uuid> {
    let mut tx = pool.begin().await?;
    let user_id = insert_user(
        &mut tx,
        &student.username,
        &student.email,
        &student.password,
        "student",
    )
    .await?;

    sqlx::query(
        "INSERT INTO student_profiles (user_id, full_name, age, contact_number, address_encrypted, guardian_email, transcript, id_proof)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
    )
    .bind(user_id)
    .bind(&student.full_name)
    .bind(student.age)
    .bind(&student.contact_number)
    .bind(encrypt_text(&student.address))
    .bind(&student.guardian_email)
    .bind(transcript)
    .bind(id_proof)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(user_id)
}

async fn insert_teacher(pool: &PgPool, teacher: &NewTeacher) -> sqlx::Result<Uuid> {
    let mut tx = pool.begin().await?;
    let user_id = insert_user(
        &mut tx,
        &teacher.username,
        &teacher.email,
        &teacher.password,
        "teacher",
    )
    .await?;

    sqlx::query(
        "INSERT INTO teacher_profiles (user_id, full_name, department, contact_email, office_location, bio)
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(user_id)
    .bind(&teacher.full_name)
    .bind(&teacher.department)
    .bind(&teacher.contact_email)
    .bind(&teacher.office_location)
    .bind(&teacher.bio)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(user_id)
}

fn rejected_student(values: &StudentRegistrationValues, errors: &[String]) -> FormRejection {
    (
        StatusCode::BAD_REQUEST,
        Html(render_student_form(values, errors)),
    )
}

fn rejected_teacher(form: &TeacherRegistrationForm, errors: &[String]) -> FormRejection {
    (StatusCode::BAD_REQUEST, Html(render_teacher_form(form, errors)))
}

fn text_input(name: &str, label: &str, input_type: &str, value: &str, required: bool) -> String {
    format!(
        r#"<div class="field"><label for="{name}">{label}</label><input id="{name}" name="{name}" type="{input_type}" value="{value}"{required}></div>"#,
        value = escape_html(value),
        required = if required { " required" } else { "" },
    )
}

fn password_inputs() -> String {
    r#"<div class="field"><label for="password1">Password</label><input id="password1" name="password1" type="password" required><span class="help">At least 8 characters, not entirely numeric and not similar to your username.</span></div>
<div class="field"><label for="password2">Password confirmation</label><input id="password2" name="password2" type="password" required></div>"#
        .to_string()
}

pub fn render_student_form(values: &StudentRegistrationValues, errors: &[String]) -> String {
    let body = format!(
        r#"<section class="panel" style="max-width: 620px; margin: 0 auto;">
    <h1>Student registration</h1>
    {errors}
    <form method="post" action="/register/student" enctype="multipart/form-data">
        {username}
        {email}
        {passwords}
        {full_name}
        {age}
        {contact}
        <div class="field"><label for="address">Address</label><textarea id="address" name="address" required>{address}</textarea></div>
        {guardian}
        <div class="field"><label for="transcript">Transcript</label><input id="transcript" name="transcript" type="file" accept="application/pdf,image/jpeg,image/png"><span class="help">PDF, JPG or PNG, up to 5 MB.</span></div>
        <div class="field"><label for="id_proof">ID proof</label><input id="id_proof" name="id_proof" type="file" accept="application/pdf,image/jpeg,image/png"></div>
        <button type="submit">Register</button>
    </form>
</section>"#,
        errors = render_error_list(errors),
        username = text_input("username", "Username", "text", &values.username, true),
        email = text_input("email", "Email", "email", &values.email, true),
        passwords = password_inputs(),
        full_name = text_input("full_name", "Full name", "text", &values.full_name, true),
        age = text_input("age", "Age", "number", &values.age, true),
        contact = text_input(
            "contact_number",
            "Contact number",
            "text",
            &values.contact_number,
            true
        ),
        address = escape_html(&values.address),
        guardian = text_input(
            "guardian_email",
            "Guardian email",
            "email",
            &values.guardian_email,
            true
        ),
    );

    render_page(PageLayout {
        title: "Student registration",
        user: None,
        flash_html: "",
        body_html: &body,
    })
}

pub fn render_teacher_form(form: &TeacherRegistrationForm, errors: &[String]) -> String {
    let body = format!(
        r#"<section class="panel" style="max-width: 620px; margin: 0 auto;">
    <h1>Teacher registration</h1>
    {errors}
    <form method="post" action="/register/teacher">
        {username}
        {email}
        {passwords}
        {full_name}
        {department}
        {contact_email}
        {office}
        <div class="field"><label for="bio">Bio</label><textarea id="bio" name="bio">{bio}</textarea></div>
        <button type="submit">Register</button>
    </form>
</section>"#,
        errors = render_error_list(errors),
        username = text_input("username", "Username", "text", form.username.trim(), true),
        email = text_input("email", "Email", "email", form.email.trim(), true),
        passwords = password_inputs(),
        full_name = text_input("full_name", "Full name", "text", &form.full_name, true),
        department = text_input("department", "Department", "text", &form.department, true),
        contact_email = text_input(
            "contact_email",
            "Contact email",
            "email",
            &form.contact_email,
            true
        ),
        office = text_input(
            "office_location",
            "Office location",
            "text",
            &form.office_location,
            false
        ),
        bio = escape_html(&form.bio),
    );

    render_page(PageLayout {
        title: "Teacher registration",
        user: None,
        flash_html: "",
        body_html: &body,
    })
}
