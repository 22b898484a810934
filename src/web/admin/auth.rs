use axum::response::Redirect;
use axum_extra::extract::cookie::CookieJar;
use tracing::warn;

use crate::web::{
    AppState, AuthUser,
    auth::{self},
    models::Role,
};

/// Resolves the session to an active administrator. Anonymous visitors go to the login
/// page, other roles back to their dashboard.
pub async fn require_admin_user(state: &AppState, jar: &CookieJar) -> Result<AuthUser, Redirect> {
    let auth_user = auth::require_user(state, jar).await?;

    if !auth_user.is(Role::Admin) {
        warn!(username = %auth_user.username, role = %auth_user.role, "non-admin tried to open the admin console");
        return Err(Redirect::to("/dashboard?error=not_authorized"));
    }

    Ok(auth_user)
}
