use std::path::Path;

use axum::{
    extract::{Path as AxumPath, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{Html, IntoResponse, Response},
};
use axum_extra::extract::cookie::CookieJar;
use tracing::{error, warn};
use uuid::Uuid;

use crate::web::{
    AppState, AuthUser,
    auth::require_user,
    models::Role,
    templates::render_message_page,
    uploads::{PROFILE_PICTURE_DIR, is_safe_relative_path},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MediaKind {
    ProfilePicture,
    Document,
}

fn classify(relative_path: &str) -> Option<MediaKind> {
    if !is_safe_relative_path(relative_path) {
        return None;
    }
    let top = relative_path.split('/').next()?;
    if top == PROFILE_PICTURE_DIR {
        Some(MediaKind::ProfilePicture)
    } else if top == "documents" {
        Some(MediaKind::Document)
    } else {
        None
    }
}

/// Content type for a stored upload, derived from its extension.
pub fn content_type_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match extension.as_str() {
        "pdf" => "application/pdf",
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

/// `GET /media/*path`: returns an upload inline when the requester may see it.
pub async fn serve_media(
    State(state): State<AppState>,
    jar: CookieJar,
    AxumPath(relative_path): AxumPath<String>,
) -> Result<Response, Response> {
    let user = require_user(&state, &jar)
        .await
        .map_err(IntoResponse::into_response)?;

    let Some(kind) = classify(&relative_path) else {
        warn!(path = %relative_path, username = %user.username, "rejected media path");
        return Err(not_found(&user));
    };

    if kind == MediaKind::Document && !may_view_document(&state, &user, &relative_path).await? {
        warn!(path = %relative_path, username = %user.username, "document access denied");
        return Err(forbidden(&user));
    }

    let path = state.media_root().join(&relative_path);
    let filename = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("file")
        .to_string();

    file_response(&path, &filename, content_type_for(&path))
        .await
        .map_err(|status| match status {
            StatusCode::NOT_FOUND => not_found(&user),
            _ => server_error(&user),
        })
}

/// Owners, admins and teachers of a course the owner is enrolled in may view a document.
async fn may_view_document(
    state: &AppState,
    user: &AuthUser,
    relative_path: &str,
) -> Result<bool, Response> {
    let owner: Option<Uuid> = sqlx::query_scalar(
        "SELECT user_id FROM student_profiles WHERE transcript = $1 OR id_proof = $1",
    )
    .bind(relative_path)
    .fetch_optional(state.pool_ref())
    .await
    .map_err(|err| {
        error!(?err, "failed to look up document owner");
        server_error(user)
    })?;

    let Some(owner) = owner else {
        return Err(not_found(user));
    };

    if owner == user.id || user.is(Role::Admin) {
        return Ok(true);
    }
    if !user.is(Role::Teacher) {
        return Ok(false);
    }

    sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM enrollments e JOIN courses c ON c.id = e.course_id WHERE e.student_id = $1 AND c.teacher_id = $2)",
    )
    .bind(owner)
    .bind(user.id)
    .fetch_one(state.pool_ref())
    .await
    .map_err(|err| {
        error!(?err, "failed to check teacher document access");
        server_error(user)
    })
}

/// Reads a file and returns it with an inline disposition.
pub async fn file_response(
    path: &Path,
    filename: &str,
    content_type: &str,
) -> Result<Response, StatusCode> {
    let bytes = tokio::fs::read(path).await.map_err(|err| {
        if err.kind() == std::io::ErrorKind::NotFound {
            StatusCode::NOT_FOUND
        } else {
            error!(?err, file = %path.display(), "failed to read media file");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    })?;

    let mut headers = HeaderMap::new();
    let content_type =
        HeaderValue::from_str(content_type).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    headers.insert(header::CONTENT_TYPE, content_type);
    let disposition = format!("inline; filename=\"{}\"", filename.replace('"', ""));
    let disposition =
        HeaderValue::from_str(&disposition).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    headers.insert(header::CONTENT_DISPOSITION, disposition);

    Ok((headers, bytes).into_response())
}

/// Link for a stored upload, relative path as kept in the database.
pub fn media_url(relative_path: &str) -> String {
    format!("/media/{relative_path}")
}

fn not_found(user: &AuthUser) -> Response {
    (
        StatusCode::NOT_FOUND,
        Html(render_message_page(
            Some(user),
            "Not found",
            "The requested file does not exist.",
        )),
    )
        .into_response()
}

fn forbidden(user: &AuthUser) -> Response {
    (
        StatusCode::FORBIDDEN,
        Html(render_message_page(
            Some(user),
            "Forbidden",
            "You are not allowed to view this file.",
        )),
    )
        .into_response()
}

fn server_error(user: &AuthUser) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Html(render_message_page(
            Some(user),
            "Server error",
            "Something went wrong. Please try again later.",
        )),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_media_paths() {
        assert_eq!(
            classify("profile_pics/abc_me.png"),
            Some(MediaKind::ProfilePicture)
        );
        assert_eq!(
            classify("documents/transcripts/abc_t.pdf"),
            Some(MediaKind::Document)
        );
        assert_eq!(classify("documents/../profile_pics/x.png"), None);
        assert_eq!(classify("other/file.txt"), None);
        assert_eq!(classify("/etc/passwd"), None);
    }

    #[test]
    fn content_types_follow_extension() {
        assert_eq!(content_type_for(Path::new("a/b.PDF")), "application/pdf");
        assert_eq!(content_type_for(Path::new("x.jpeg")), "image/jpeg");
        assert_eq!(content_type_for(Path::new("x.webp")), "image/webp");
        assert_eq!(
            content_type_for(Path::new("noext")),
            "application/octet-stream"
        );
    }

    #[tokio::test]
    async fn serves_existing_file_inline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.pdf");
        tokio::fs::write(&path, b"%PDF-1.4").await.unwrap();

        let res = file_response(&path, "t.pdf", "application/pdf").await.unwrap();
        assert_eq!(res.headers()[header::CONTENT_TYPE], "application/pdf");
        assert_eq!(
            res.headers()[header::CONTENT_DISPOSITION],
            "inline; filename=\"t.pdf\""
        );

        let missing = file_response(&dir.path().join("nope.pdf"), "nope.pdf", "application/pdf").await;
        assert_eq!(missing.err(), Some(StatusCode::NOT_FOUND));
    }
}
