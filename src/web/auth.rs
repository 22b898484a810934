use argon2::Argon2;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use axum::{
    extract::{Form, Query, State},
    http::StatusCode,
    response::{Html, Redirect},
};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{Duration as ChronoDuration, Utc};
use cookie::time::Duration as CookieDuration;
use rand_core::OsRng;
use serde::Deserialize;
use sqlx::PgPool;
use tracing::{error, info};
use uuid::Uuid;

use crate::web::{
    AppState,
    flash::{FlashQuery, compose_flash_message},
    models::Role,
    render_login_page,
    templates::render_message_page,
};

#[derive(Clone, sqlx::FromRow)]
pub struct DbUserAuth {
    pub id: Uuid,
    pub username: String,
    pub password_hash: String,
}

#[derive(Clone, sqlx::FromRow)]
pub struct AuthUser {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub role: String,
}

impl AuthUser {
    pub fn role(&self) -> Option<Role> {
        Role::parse(&self.role)
    }

    pub fn is(&self, role: Role) -> bool {
        self.role() == Some(role)
    }
}

pub const SESSION_COOKIE: &str = "auth_token";
pub const SESSION_TTL_DAYS: i64 = 7;

#[derive(Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

pub async fn login_page(
    State(state): State<AppState>,
    jar: CookieJar,
    Query(flash): Query<FlashQuery>,
) -> Result<Html<String>, Redirect> {
    if let Some(redirect) = redirect_if_authenticated(&state, &jar).await {
        return Err(redirect);
    }

    Ok(Html(render_login_page(&flash.render(None), "")))
}

pub async fn process_login(
    State(state): State<AppState>,
    jar: CookieJar,
    Form(form): Form<LoginForm>,
) -> Result<(CookieJar, Redirect), (StatusCode, Html<String>)> {
    let username = form.username.trim();
    let pool = state.pool();

    let user = match fetch_user_by_username(&pool, username).await {
        Ok(Some(user)) => user,
        Ok(None) => return Err(invalid_credentials(username)),
        Err(err) => {
            error!(?err, "failed to fetch user during login");
            return Err(server_error());
        }
    };

    if !verify_password(&form.password, &user.password_hash) {
        return Err(invalid_credentials(username));
    }

    let jar = match start_session(&pool, jar, user.id).await {
        Ok(jar) => jar,
        Err(err) => {
            error!(?err, "failed to create session");
            return Err(server_error());
        }
    };

    info!(username = %user.username, "user logged in");
    Ok((jar, Redirect::to("/dashboard?status=welcome")))
}

pub async fn logout(State(state): State<AppState>, mut jar: CookieJar) -> (CookieJar, Redirect) {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        if let Ok(token) = Uuid::parse_str(cookie.value()) {
            if let Err(err) = sqlx::query("DELETE FROM sessions WHERE id = $1")
                .bind(token)
                .execute(state.pool_ref())
                .await
            {
                error!(?err, "failed to remove session during logout");
            }
        }
    }

    jar = jar.remove(session_cookie(String::new(), CookieDuration::ZERO));
    (jar, Redirect::to("/login?status=logged_out"))
}

fn session_cookie(value: String, max_age: CookieDuration) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, value))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .max_age(max_age)
        .build()
}

/// Inserts a session row for `user_id` and attaches the session cookie to `jar`.
pub async fn start_session(pool: &PgPool, jar: CookieJar, user_id: Uuid) -> sqlx::Result<CookieJar> {
    let session_token = Uuid::new_v4();
    let expires_at = Utc::now() + ChronoDuration::days(SESSION_TTL_DAYS);

    sqlx::query("INSERT INTO sessions (id, user_id, expires_at) VALUES ($1, $2, $3)")
        .bind(session_token)
        .bind(user_id)
        .bind(expires_at)
        .execute(pool)
        .await?;

    Ok(jar.add(session_cookie(
        session_token.to_string(),
        CookieDuration::days(SESSION_TTL_DAYS),
    )))
}

pub async fn redirect_if_authenticated(state: &AppState, jar: &CookieJar) -> Option<Redirect> {
    current_user(state, jar)
        .await
        .map(|_| Redirect::to("/dashboard"))
}

/// Resolves the session cookie to an active user, if any.
pub async fn current_user(state: &AppState, jar: &CookieJar) -> Option<AuthUser> {
    let token_cookie = jar.get(SESSION_COOKIE)?;
    let token = Uuid::parse_str(token_cookie.value()).ok()?;
    let pool = state.pool();

    match fetch_user_by_session(&pool, token).await {
        Ok(user) => user,
        Err(err) => {
            error!(?err, "failed to validate session");
            None
        }
    }
}

pub async fn require_user(state: &AppState, jar: &CookieJar) -> Result<AuthUser, Redirect> {
    current_user(state, jar)
        .await
        .ok_or_else(|| Redirect::to("/login"))
}

/// Like [`require_user`] but additionally insists on `role`, sending everyone else to
/// their dashboard.
pub async fn require_role(
    state: &AppState,
    jar: &CookieJar,
    role: Role,
) -> Result<AuthUser, Redirect> {
    let user = require_user(state, jar).await?;
    if !user.is(role) {
        return Err(Redirect::to("/dashboard?error=not_authorized"));
    }
    Ok(user)
}

pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
}

pub fn verify_password(password: &str, password_hash: &str) -> bool {
    let parsed = PasswordHash::new(password_hash);
    match parsed {
        Ok(hash) => Argon2::default()
            .verify_password(password.as_bytes(), &hash)
            .is_ok(),
        Err(_) => false,
    }
}

pub async fn fetch_user_by_username(
    pool: &PgPool,
    username: &str,
) -> sqlx::Result<Option<DbUserAuth>> {
    sqlx::query_as::<_, DbUserAuth>(
        "SELECT id, username, password_hash FROM users WHERE LOWER(username) = LOWER($1) AND is_active = TRUE",
    )
    .bind(username)
    .fetch_optional(pool)
    .await
}

pub async fn fetch_user_by_session(pool: &PgPool, token: Uuid) -> sqlx::Result<Option<AuthUser>> {
    sqlx::query_as::<_, AuthUser>(
        "SELECT users.id, users.username, users.email, users.role FROM sessions JOIN users ON users.id = sessions.user_id WHERE sessions.id = $1 AND sessions.expires_at > NOW() AND users.is_active = TRUE",
    )
    .bind(token)
    .fetch_optional(pool)
    .await
}

fn invalid_credentials(username: &str) -> (StatusCode, Html<String>) {
    let flash = compose_flash_message(None, Some("invalid_login"), None);
    (
        StatusCode::UNAUTHORIZED,
        Html(render_login_page(&flash, username)),
    )
}

fn server_error() -> (StatusCode, Html<String>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Html(render_message_page(
            None,
            "Server error",
            "Something went wrong. Please try again later.",
        )),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashed_password_verifies() {
        let hash = hash_password("correct horse battery").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("correct horse battery", &hash));
        assert!(!verify_password("wrong horse", &hash));
    }

    #[test]
    fn session_cookie_is_http_only_and_lax() {
        let cookie = session_cookie("tok".into(), CookieDuration::days(SESSION_TTL_DAYS));
        assert_eq!(cookie.name(), SESSION_COOKIE);
        assert_eq!(cookie.value(), "tok");
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.same_site(), Some(SameSite::Lax));
        assert_eq!(cookie.max_age(), Some(CookieDuration::days(7)));
    }

    #[test]
    fn malformed_hash_never_verifies() {
        assert!(!verify_password("anything", "not-a-hash"));
    }

    #[test]
    fn role_checks_use_parsed_role() {
        let user = AuthUser {
            id: Uuid::new_v4(),
            username: "t".into(),
            email: String::new(),
            role: "teacher".into(),
        };
        assert!(user.is(Role::Teacher));
        assert!(!user.is(Role::Admin));
    }
}
