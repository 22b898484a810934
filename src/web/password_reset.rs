use axum::{
    extract::{Form, Path, State},
    http::StatusCode,
    response::{Html, Redirect},
};
use chrono::{Duration, Utc};
use serde::Deserialize;
use sqlx::PgPool;
use tracing::{error, info};
use uuid::Uuid;

use crate::{
    mailer::OutgoingMail,
    web::{
        AppState,
        auth::hash_password,
        templates::{PageLayout, escape_html, render_error_list, render_message_page, render_page},
        validation::validate_new_password,
    },
};

pub const RESET_TOKEN_TTL_DAYS: i64 = 3;

#[derive(Deserialize)]
pub struct ResetRequestForm {
    #[serde(default)]
    pub email: String,
}

#[derive(Deserialize)]
pub struct SetPasswordForm {
    #[serde(default)]
    pub new_password1: String,
    #[serde(default)]
    pub new_password2: String,
}

#[derive(sqlx::FromRow)]
struct ResetTarget {
    id: Uuid,
    username: String,
    email: String,
}

#[derive(sqlx::FromRow)]
struct ValidToken {
    id: Uuid,
    username: String,
}

pub fn reset_link(public_base_url: &str, token: Uuid) -> String {
    format!("{}/reset/{token}", public_base_url.trim_end_matches('/'))
}

pub fn reset_mail(username: &str, email: &str, link: &str) -> OutgoingMail {
    OutgoingMail {
        to: email.to_string(),
        subject: "Password reset on Student Portal".to_string(),
        body: format!(
            "Dear {username},\n\nYou're receiving this email because you requested a password reset for your account.\n\nPlease go to the following page and choose a new password:\n\n{link}\n\nThe link expires in {RESET_TOKEN_TTL_DAYS} days and can be used once.\n\nThank you."
        ),
    }
}

pub async fn request_form() -> Html<String> {
    Html(render_request_form())
}

pub async fn request_reset(
    State(state): State<AppState>,
    Form(form): Form<ResetRequestForm>,
) -> Redirect {
    let email = form.email.trim();
    if email.is_empty() {
        return Redirect::to("/password_reset/done");
    }

    let targets = match sqlx::query_as::<_, ResetTarget>(
        "SELECT id, username, email FROM users WHERE LOWER(email) = LOWER($1) AND is_active = TRUE",
    )
    .bind(email)
    .fetch_all(state.pool_ref())
    .await
    {
        Ok(targets) => targets,
        Err(err) => {
            error!(?err, "failed to look up password reset targets");
            return Redirect::to("/password_reset/done");
        }
    };

    for target in targets {
        let token = Uuid::new_v4();
        let expires_at = Utc::now() + Duration::days(RESET_TOKEN_TTL_DAYS);
        if let Err(err) = sqlx::query(
            "INSERT INTO password_reset_tokens (id, user_id, expires_at) VALUES ($1, $2, $3)",
        )
        .bind(token)
        .bind(target.id)
        .bind(expires_at)
        .execute(state.pool_ref())
        .await
        {
            error!(?err, "failed to store password reset token");
            continue;
        }

        let link = reset_link(&state.config().public_base_url, token);
        state
            .mailer()
            .send_best_effort(&reset_mail(&target.username, &target.email, &link))
            .await;
        info!(username = %target.username, "password reset requested");
    }

    Redirect::to("/password_reset/done")
}

pub async fn request_done() -> Html<String> {
    Html(render_message_page(
        None,
        "Password reset sent",
        "If an account exists with the email you entered, you will receive instructions for setting a new password shortly.",
    ))
}

pub async fn confirm_form(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> (StatusCode, Html<String>) {
    match find_valid_token(state.pool_ref(), &token).await {
        Some(_) => (StatusCode::OK, Html(render_confirm_form(&token, &[]))),
        None => invalid_link(),
    }
}

pub async fn confirm_reset(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Form(form): Form<SetPasswordForm>,
) -> Result<Redirect, (StatusCode, Html<String>)> {
    let Some(valid) = find_valid_token(state.pool_ref(), &token).await else {
        return Err(invalid_link());
    };

    let errors = validate_new_password(&form.new_password1, &form.new_password2, &valid.username);
    if !errors.is_empty() {
        return Err((
            StatusCode::BAD_REQUEST,
            Html(render_confirm_form(&token, &errors)),
        ));
    }

    let password_hash = hash_password(&form.new_password1).map_err(|err| {
        error!(?err, "failed to hash password during reset");
        server_error()
    })?;

    match apply_reset(state.pool_ref(), valid.id, &password_hash).await {
        Ok(Some(_)) => {}
        Ok(None) => return Err(invalid_link()),
        Err(err) => {
            error!(?err, "failed to apply password reset");
            return Err(server_error());
        }
    }

    info!(username = %valid.username, "password reset completed");
    Ok(Redirect::to("/reset/done"))
}

pub async fn reset_complete() -> Html<String> {
    let body = r#"<section class="panel"><h1>Password reset complete</h1><p class="note">Your password has been set. You may go ahead and log in now.</p><p><a href="/login">Log in</a></p></section>"#;
    Html(render_page(PageLayout {
        title: "Password reset complete",
        user: None,
        flash_html: "",
        body_html: body,
    }))
}

async fn find_valid_token(pool: &PgPool, raw_token: &str) -> Option<ValidToken> {
    let token = Uuid::parse_str(raw_token).ok()?;
    match sqlx::query_as::<_, ValidToken>(
        "SELECT t.id, u.username FROM password_reset_tokens t JOIN users u ON u.id = t.user_id
         WHERE t.id = $1 AND t.used_at IS NULL AND t.expires_at > NOW() AND u.is_active = TRUE",
    )
    .bind(token)
    .fetch_optional(pool)
    .await
    {
        Ok(valid) => valid,
        Err(err) => {
            error!(?err, "failed to validate password reset token");
            None
        }
    }
}

/// Claims the token and sets the new password in one transaction. Returns `None` when
/// the token was already used or has expired, in which case nothing changes.
async fn apply_reset(
    pool: &PgPool,
    token_id: Uuid,
    password_hash: &str,
) -> sqlx::Result<Option<Uuid>> {
    let mut tx = pool.begin().await?;

    let user_id: Option<Uuid> = sqlx::query_scalar(
        "UPDATE password_reset_tokens SET used_at = NOW()
         WHERE id = $1 AND used_at IS NULL AND expires_at > NOW()
         RETURNING user_id",
    )
    .bind(token_id)
    .fetch_optional(&mut *tx)
    .await?;
    let Some(user_id) = user_id else {
        return Ok(None);
    };

    sqlx::query("UPDATE users SET password_hash = $2 WHERE id = $1")
        .bind(user_id)
        .bind(password_hash)
        .execute(&mut *tx)
        .await?;
    sqlx::query("DELETE FROM sessions WHERE user_id = $1")
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(Some(user_id))
}

fn invalid_link() -> (StatusCode, Html<String>) {
    (
        StatusCode::BAD_REQUEST,
        Html(render_message_page(
            None,
            "Invalid reset link",
            "The password reset link was invalid, possibly because it has already been used or has expired. Please request a new password reset.",
        )),
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

fn render_request_form() -> String {
    let body = r#"<section class="panel" style="max-width: 460px; margin: 0 auto;">
    <h1>Forgot your password?</h1>
    <p class="note">Enter the email address of your account and we will send you a link to set a new password.</p>
    <form method="post" action="/password_reset">
        <div class="field"><label for="email">Email</label><input id="email" name="email" type="email" required autofocus></div>
        <button type="submit">Send reset link</button>
    </form>
</section>"#;
    render_page(PageLayout {
        title: "Password reset",
        user: None,
        flash_html: "",
        body_html: body,
    })
}

fn render_confirm_form(token: &str, errors: &[String]) -> String {
    let body = format!(
        r#"<section class="panel" style="max-width: 460px; margin: 0 auto;">
    <h1>Set a new password</h1>
    {errors}
    <form method="post" action="/reset/{token}">
        <div class="field"><label for="new_password1">New password</label><input id="new_password1" name="new_password1" type="password" required></div>
        <div class="field"><label for="new_password2">Confirm new password</label><input id="new_password2" name="new_password2" type="password" required></div>
        <button type="submit">Change my password</button>
    </form>
</section>"#,
        errors = render_error_list(errors),
        token = escape_html(token),
    );
    render_page(PageLayout {
        title: "Set a new password",
        user: None,
        flash_html: "",
        body_html: &body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn link_joins_base_url_and_token() {
        let token = Uuid::nil();
        assert_eq!(
            reset_link("https://portal.example.com/", token),
            "https://portal.example.com/reset/00000000-0000-0000-0000-000000000000"
        );
    }

    #[test]
    fn mail_contains_link_and_recipient() {
        let mail = reset_mail("jane", "jane@example.com", "http://x/reset/abc");
        assert_eq!(mail.to, "jane@example.com");
        assert!(mail.body.starts_with("Dear jane,"));
        assert!(mail.body.contains("http://x/reset/abc"));
        assert!(mail.body.contains("3 days"));
    }

    #[test]
    fn confirm_form_escapes_token_and_lists_errors() {
        let html = render_confirm_form("<t>", &["This password is too common.".into()]);
        assert!(html.contains("/reset/&lt;t&gt;"));
        assert!(html.contains("This password is too common."));
    }

    mod database {
        use super::*;
        use crate::test_support;

        async fn issue_token(pool: &PgPool, user_id: Uuid, ttl: Duration) -> Uuid {
            let token = Uuid::new_v4();
            sqlx::query(
                "INSERT INTO password_reset_tokens (id, user_id, expires_at) VALUES ($1, $2, $3)",
            )
            .bind(token)
            .bind(user_id)
            .bind(Utc::now() + ttl)
            .execute(pool)
            .await
            .unwrap();
            token
        }

        #[tokio::test]
        async fn token_resets_password_once() {
            let Some(pool) = test_support::pool().await else { return };
            let (user_id, username) = test_support::user(&pool, "student").await;
            let token = issue_token(&pool, user_id, Duration::days(RESET_TOKEN_TTL_DAYS)).await;
            sqlx::query("INSERT INTO sessions (id, user_id, expires_at) VALUES ($1, $2, $3)")
                .bind(Uuid::new_v4())
                .bind(user_id)
                .bind(Utc::now() + Duration::days(1))
                .execute(&pool)
                .await
                .unwrap();

            assert!(find_valid_token(&pool, &token.to_string()).await.is_some());
            assert_eq!(apply_reset(&pool, token, "first").await.unwrap(), Some(user_id));
            assert_eq!(apply_reset(&pool, token, "second").await.unwrap(), None);
            assert!(find_valid_token(&pool, &token.to_string()).await.is_none());

            let hash: String = sqlx::query_scalar("SELECT password_hash FROM users WHERE username = $1")
                .bind(&username)
                .fetch_one(&pool)
                .await
                .unwrap();
            assert_eq!(hash, "first");
            let sessions: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sessions WHERE user_id = $1")
                .bind(user_id)
                .fetch_one(&pool)
                .await
                .unwrap();
            assert_eq!(sessions, 0);
        }

        #[tokio::test]
        async fn concurrent_submissions_consume_token_once() {
            let Some(pool) = test_support::pool().await else { return };
            let (user_id, _) = test_support::user(&pool, "student").await;
            let token = issue_token(&pool, user_id, Duration::days(RESET_TOKEN_TTL_DAYS)).await;

            let submissions: Vec<_> = ["first", "second"]
                .into_iter()
                .map(|password| {
                    let pool = pool.clone();
                    tokio::spawn(async move {
                        find_valid_token(&pool, &token.to_string()).await?;
                        apply_reset(&pool, token, password).await.ok().flatten()
                    })
                })
                .collect();

            let mut applied = 0;
            for submission in submissions {
                if submission.await.unwrap().is_some() {
                    applied += 1;
                }
            }
            assert_eq!(applied, 1);
        }

        #[tokio::test]
        async fn expired_token_changes_nothing() {
            let Some(pool) = test_support::pool().await else { return };
            let (user_id, _) = test_support::user(&pool, "student").await;
            let token = issue_token(&pool, user_id, Duration::minutes(-1)).await;

            assert!(find_valid_token(&pool, &token.to_string()).await.is_none());
            assert_eq!(apply_reset(&pool, token, "new").await.unwrap(), None);

            let hash: String = sqlx::query_scalar("SELECT password_hash FROM users WHERE id = $1")
                .bind(user_id)
                .fetch_one(&pool)
                .await
                .unwrap();
            assert_eq!(hash, "x");
        }
    }
}
