use axum::{
    extract::{Form, State},
    response::Redirect,
};
use axum_extra::extract::cookie::CookieJar;
use serde::Deserialize;
use tracing::{error, info};
use uuid::Uuid;

use crate::web::{
    AppState,
    auth::{self},
    models::Role,
    validation::{is_valid_email, validate_new_password, validate_username},
};

use super::auth::require_admin_user;

#[derive(Deserialize)]
pub(crate) struct CreateUserForm {
    #[serde(default)]
    username: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    role: String,
    #[serde(default)]
    password1: String,
    #[serde(default)]
    password2: String,
}

#[derive(Deserialize)]
pub(crate) struct UpdatePasswordForm {
    #[serde(default)]
    username: String,
    #[serde(default)]
    password1: String,
    #[serde(default)]
    password2: String,
}

#[derive(Deserialize)]
pub(crate) struct SetActiveForm {
    user_id: Uuid,
    #[serde(default)]
    active: String,
}

struct NewUser {
    username: String,
    email: String,
    role: Role,
}

/// Checks the create-user form and returns the flash error code on failure.
fn validate_new_user(form: &CreateUserForm) -> Result<NewUser, &'static str> {
    let username = form.username.trim();
    if username.is_empty() {
        return Err("missing_username");
    }
    if validate_username(username).is_err() {
        return Err("invalid_username");
    }

    let email = form.email.trim();
    if !is_valid_email(email) {
        return Err("invalid_email");
    }

    let Some(role) = Role::parse(&form.role) else {
        return Err("invalid_role");
    };

    if form.password1.is_empty() {
        return Err("missing_password");
    }
    if !validate_new_password(&form.password1, &form.password2, username).is_empty() {
        return Err("weak_password");
    }

    Ok(NewUser {
        username: username.to_string(),
        email: email.to_string(),
        role,
    })
}

fn parse_active_flag(value: &str) -> Option<bool> {
    match value.trim() {
        "true" | "1" | "on" => Some(true),
        "false" | "0" | "off" => Some(false),
        _ => None,
    }
}

pub async fn create_user(
    State(state): State<AppState>,
    jar: CookieJar,
    Form(form): Form<CreateUserForm>,
) -> Result<Redirect, Redirect> {
    let admin = require_admin_user(&state, &jar).await?;

    let new_user = match validate_new_user(&form) {
        Ok(new_user) => new_user,
        Err(code) => return Ok(Redirect::to(&format!("/admin?error={code}"))),
    };

    let password_hash = match auth::hash_password(&form.password1) {
        Ok(hash) => hash,
        Err(err) => {
            error!(?err, "failed to hash password while creating user");
            return Ok(Redirect::to("/admin?error=unknown"));
        }
    };

    let result = sqlx::query(
        "INSERT INTO users (id, username, email, password_hash, role)
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(Uuid::new_v4())
    .bind(&new_user.username)
    .bind(&new_user.email)
    .bind(password_hash)
    .bind(new_user.role.as_str())
    .execute(state.pool_ref())
    .await;

    match result {
        Ok(_) => {
            info!(admin = %admin.username, username = %new_user.username, role = new_user.role.as_str(), "user created from admin console");
            Ok(Redirect::to("/admin?status=user_created"))
        }
        Err(sqlx::Error::Database(db_err)) if db_err.code().as_deref() == Some("23505") => {
            Ok(Redirect::to("/admin?error=duplicate"))
        }
        Err(err) => {
            error!(?err, "failed to create user");
            Ok(Redirect::to("/admin?error=unknown"))
        }
    }
}

/// `POST /admin/users/password`. Existing sessions of the user are ended.
pub async fn update_user_password(
    State(state): State<AppState>,
    jar: CookieJar,
    Form(form): Form<UpdatePasswordForm>,
) -> Result<Redirect, Redirect> {
    let _admin = require_admin_user(&state, &jar).await?;

    let username = form.username.trim();
    if username.is_empty() {
        return Ok(Redirect::to("/admin?error=user_missing"));
    }

    if form.password1.is_empty() {
        return Ok(Redirect::to("/admin?error=missing_password"));
    }
    if !validate_new_password(&form.password1, &form.password2, username).is_empty() {
        return Ok(Redirect::to("/admin?error=weak_password"));
    }

    let password_hash = match auth::hash_password(&form.password1) {
        Ok(hash) => hash,
        Err(err) => {
            error!(
                ?err,
                "failed to hash password while resetting user password"
            );
            return Ok(Redirect::to("/admin?error=unknown"));
        }
    };

    match store_password(&state, username, &password_hash).await {
        Ok(true) => Ok(Redirect::to("/admin?status=password_updated")),
        Ok(false) => Ok(Redirect::to("/admin?error=user_missing")),
        Err(err) => {
            error!(?err, "failed to update user password");
            Ok(Redirect::to("/admin?error=unknown"))
        }
    }
}

async fn store_password(state: &AppState, username: &str, password_hash: &str) -> sqlx::Result<bool> {
    let mut tx = state.pool_ref().begin().await?;

    let user_id: Option<Uuid> = sqlx::query_scalar(
        "UPDATE users SET password_hash = $2 WHERE LOWER(username) = LOWER($1) RETURNING id",
    )
    .bind(username)
    .bind(password_hash)
    .fetch_optional(&mut *tx)
    .await?;

    let Some(user_id) = user_id else {
        return Ok(false);
    };

    sqlx::query("DELETE FROM sessions WHERE user_id = $1")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(true)
}

/// `POST /admin/users/active`. Deactivation also ends every session of the user.
pub async fn set_user_active(
    State(state): State<AppState>,
    jar: CookieJar,
    Form(form): Form<SetActiveForm>,
) -> Result<Redirect, Redirect> {
    let admin = require_admin_user(&state, &jar).await?;

    let Some(active) = parse_active_flag(&form.active) else {
        return Ok(Redirect::to("/admin?error=unknown"));
    };

    if !active && form.user_id == admin.id {
        return Ok(Redirect::to("/admin?error=self_deactivate"));
    }

    match store_active_flag(&state, form.user_id, active).await {
        Ok(true) => {
            info!(admin = %admin.username, user_id = %form.user_id, active, "user activation changed");
            let status = if active {
                "user_activated"
            } else {
                "user_deactivated"
            };
            Ok(Redirect::to(&format!("/admin?status={status}")))
        }
        Ok(false) => Ok(Redirect::to("/admin?error=user_missing")),
        Err(err) => {
            error!(?err, "failed to change user activation");
            Ok(Redirect::to("/admin?error=unknown"))
        }
    }
}

async fn store_active_flag(state: &AppState, user_id: Uuid, active: bool) -> sqlx::Result<bool> {
    let mut tx = state.pool_ref().begin().await?;

    let updated = sqlx::query("UPDATE users SET is_active = $2 WHERE id = $1")
        .bind(user_id)
        .bind(active)
        .execute(&mut *tx)
        .await?;

    if updated.rows_affected() == 0 {
        return Ok(false);
    }

    if !active {
        sqlx::query("DELETE FROM sessions WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;
    }

    tx.commit().await?;
    Ok(true)
}
