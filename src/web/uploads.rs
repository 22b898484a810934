use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use axum::extract::Multipart;
use tokio::{fs::File, io::AsyncWriteExt};
use tracing::{debug, warn};
use uuid::Uuid;

pub const MAX_UPLOAD_BYTES: u64 = 5 * 1024 * 1024;
const MAX_UPLOAD_MB: u64 = MAX_UPLOAD_BYTES / (1024 * 1024);

pub const TRANSCRIPT_DIR: &str = "documents/transcripts";
pub const ID_PROOF_DIR: &str = "documents/id_proofs";
pub const PROFILE_PICTURE_DIR: &str = "profile_pics";

pub const UPLOAD_SUBDIRECTORIES: [&str; 3] = [TRANSCRIPT_DIR, ID_PROOF_DIR, PROFILE_PICTURE_DIR];

pub const DOCUMENT_TYPES: &[&str] = &["application/pdf", "image/jpeg", "image/png"];
pub const IMAGE_TYPES: &[&str] = &["image/jpeg", "image/png", "image/gif", "image/webp"];

pub const TRANSCRIPT_FIELD: FileFieldConfig<'static> = FileFieldConfig {
    field_name: "transcript",
    label: "Transcript",
    subdirectory: TRANSCRIPT_DIR,
    allowed_types: DOCUMENT_TYPES,
    type_hint: "Only PDF, JPG, and PNG are allowed.",
};

pub const ID_PROOF_FIELD: FileFieldConfig<'static> = FileFieldConfig {
    field_name: "id_proof",
    label: "ID Proof",
    subdirectory: ID_PROOF_DIR,
    allowed_types: DOCUMENT_TYPES,
    type_hint: "Only PDF, JPG, and PNG are allowed.",
};

pub const PROFILE_PICTURE_FIELD: FileFieldConfig<'static> = FileFieldConfig {
    field_name: "profile_picture",
    label: "Profile picture",
    subdirectory: PROFILE_PICTURE_DIR,
    allowed_types: IMAGE_TYPES,
    type_hint: "Only JPG, PNG, GIF, and WebP images are allowed.",
};

/// Result type used by the shared upload helpers.
pub type UploadResult<T> = Result<T, UploadError>;

/// Error returned when validating or persisting uploaded files.
#[derive(Debug)]
pub struct UploadError {
    message: String,
}

impl UploadError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for UploadError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for UploadError {}

/// Expectations for a single multipart file field.
#[derive(Debug, Clone, Copy)]
pub struct FileFieldConfig<'a> {
    pub field_name: &'a str,
    pub label: &'a str,
    /// Directory below the media root that receives the file.
    pub subdirectory: &'a str,
    pub allowed_types: &'a [&'a str],
    pub type_hint: &'a str,
}

impl FileFieldConfig<'_> {
    fn accepts(&self, content_type: &str) -> bool {
        let Ok(parsed) = content_type.trim().parse::<mime::Mime>() else {
            return false;
        };
        let essence = parsed.essence_str().to_ascii_lowercase();
        self.allowed_types.iter().any(|allowed| *allowed == essence)
    }
}

/// Metadata describing a stored upload on disk.
#[derive(Debug, Clone)]
pub struct SavedFile {
    pub field_name: String,
    /// Path relative to the media root, as stored in the database.
    pub relative_path: String,
    pub stored_path: PathBuf,
}

/// Aggregated output of the shared upload processor.
#[derive(Debug, Default)]
pub struct UploadOutcome {
    pub files: Vec<SavedFile>,
    pub text_fields: HashMap<String, Vec<String>>,
}

impl UploadOutcome {
    pub fn first_file_for(&self, field_name: &str) -> Option<&SavedFile> {
        self.files.iter().find(|file| file.field_name == field_name)
    }

    pub fn relative_path_for(&self, field_name: &str) -> Option<String> {
        self.first_file_for(field_name)
            .map(|file| file.relative_path.clone())
    }

    pub fn first_text(&self, field_name: &str) -> Option<&str> {
        self.text_fields
            .get(field_name)
            .and_then(|values| values.first().map(|s| s.as_str()))
    }

    /// Text value of `field_name`, or an empty string when the field was not sent.
    pub fn text(&self, field_name: &str) -> String {
        self.first_text(field_name).unwrap_or_default().to_string()
    }

    /// True when a checkbox named `field_name` was submitted.
    pub fn flag(&self, field_name: &str) -> bool {
        self.first_text(field_name)
            .is_some_and(|value| !value.is_empty())
    }

    /// Removes every stored file, used when the surrounding form is rejected.
    pub async fn discard(&self) {
        for file in &self.files {
            remove_stored_file(&file.stored_path).await;
        }
    }
}

/// Ensures the destination directory exists.
pub async fn ensure_directory(path: &Path) -> UploadResult<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|err| UploadError::new(format!("Could not create upload directory: {err}")))
}

/// Parses multipart form data, storing every accepted file below `media_root`.
///
/// File parts without a filename (an empty file input) are skipped. On any error the
/// files already written by this call are removed before returning.
pub async fn process_upload_form(
    mut multipart: Multipart,
    media_root: &Path,
    field_configs: &[FileFieldConfig<'_>],
) -> UploadResult<UploadOutcome> {
    let mut outcome = UploadOutcome::default();

    let result = read_fields(&mut multipart, media_root, field_configs, &mut outcome).await;
    if let Err(err) = result {
        outcome.discard().await;
        return Err(err);
    }

    Ok(outcome)
}

async fn read_fields(
    multipart: &mut Multipart,
    media_root: &Path,
    field_configs: &[FileFieldConfig<'_>],
    outcome: &mut UploadOutcome,
) -> UploadResult<()> {
    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|err| UploadError::new(format!("Could not read the submitted form: {err}")))?
    {
        let field_name = field.name().unwrap_or("").to_string();

        let Some(file_name) = field.file_name().map(str::to_string) else {
            let value = field.text().await.map_err(|err| {
                UploadError::new(format!("Could not read field `{field_name}`: {err}"))
            })?;
            outcome
                .text_fields
                .entry(field_name)
                .or_default()
                .push(value);
            continue;
        };

        if file_name.is_empty() {
            continue;
        }

        let Some(config) = field_configs
            .iter()
            .find(|config| config.field_name == field_name)
        else {
            return Err(UploadError::new(format!(
                "Unexpected file field `{field_name}`."
            )));
        };

        if outcome.first_file_for(config.field_name).is_some() {
            return Err(UploadError::new(format!(
                "Only one file may be uploaded for {}.",
                config.label
            )));
        }

        let content_type = field.content_type().unwrap_or("").to_string();
        if !config.accepts(&content_type) {
            return Err(UploadError::new(format!(
                "Invalid file type for {}. {}",
                config.label, config.type_hint
            )));
        }

        let dest_dir = media_root.join(config.subdirectory);
        ensure_directory(&dest_dir).await?;

        let stored_name = stored_name(&file_name);
        let stored_path = dest_dir.join(&stored_name);
        let mut file = File::create(&stored_path)
            .await
            .map_err(|err| UploadError::new(format!("Could not save the file: {err}")))?;

        let mut total_bytes: u64 = 0;
        let write_result: UploadResult<()> = async {
            while let Some(chunk) = field
                .chunk()
                .await
                .map_err(|err| UploadError::new(format!("Could not read upload data: {err}")))?
            {
                total_bytes += chunk.len() as u64;
                if total_bytes > MAX_UPLOAD_BYTES {
                    return Err(UploadError::new(format!(
                        "{} exceeds the {MAX_UPLOAD_MB}MB size limit.",
                        config.label
                    )));
                }
                file.write_all(&chunk)
                    .await
                    .map_err(|err| UploadError::new(format!("Could not write the file: {err}")))?;
            }
            file.flush()
                .await
                .map_err(|err| UploadError::new(format!("Could not write the file: {err}")))
        }
        .await;

        if let Err(err) = write_result {
            drop(file);
            remove_stored_file(&stored_path).await;
            return Err(err);
        }

        debug!(
            field = config.field_name,
            original = %file_name,
            bytes = total_bytes,
            "stored upload"
        );
        outcome.files.push(SavedFile {
            field_name: config.field_name.to_string(),
            relative_path: format!("{}/{}", config.subdirectory, stored_name),
            stored_path,
        });
    }

    Ok(())
}

/// Removes a stored upload given its path relative to the media root.
pub async fn remove_media_file(media_root: &Path, relative_path: &str) {
    if !is_safe_relative_path(relative_path) {
        warn!(path = %relative_path, "refusing to remove unsafe media path");
        return;
    }
    remove_stored_file(&media_root.join(relative_path)).await;
}

async fn remove_stored_file(path: &Path) {
    if let Err(err) = tokio::fs::remove_file(path).await {
        if err.kind() != std::io::ErrorKind::NotFound {
            warn!(?err, path = %path.display(), "failed to remove stored upload");
        }
    }
}

/// True for non-empty relative paths made only of normal components.
pub fn is_safe_relative_path(relative_path: &str) -> bool {
    if relative_path.is_empty() || relative_path.contains('\\') {
        return false;
    }
    Path::new(relative_path)
        .components()
        .all(|component| matches!(component, std::path::Component::Normal(_)))
}

fn stored_name(original: &str) -> String {
    let mut sanitized = sanitize_filename::sanitize(original);
    if sanitized.is_empty() {
        let extension = extension_of(original);
        sanitized = if extension.is_empty() {
            "upload".to_string()
        } else {
            format!("upload.{extension}")
        };
    }
    let sanitized = sanitized.replace(' ', "_");
    format!("{}_{}", Uuid::new_v4().simple(), sanitized)
}

fn extension_of(name: &str) -> String {
    Path::new(name)
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_fields_accept_pdf_and_images() {
        assert!(TRANSCRIPT_FIELD.accepts("application/pdf"));
        assert!(ID_PROOF_FIELD.accepts("image/PNG"));
        assert!(!TRANSCRIPT_FIELD.accepts("image/gif"));
        assert!(!TRANSCRIPT_FIELD.accepts(""));
    }

    #[test]
    fn picture_field_accepts_only_images() {
        assert!(PROFILE_PICTURE_FIELD.accepts("image/webp"));
        assert!(PROFILE_PICTURE_FIELD.accepts("image/jpeg; charset=binary"));
        assert!(!PROFILE_PICTURE_FIELD.accepts("application/pdf"));
    }

    #[test]
    fn stored_names_are_prefixed_and_sanitized() {
        let name = stored_name("my report.pdf");
        assert!(name.ends_with("_my_report.pdf"), "{name}");
        assert!(!stored_name("../../etc/passwd").contains('/'));
        assert_ne!(stored_name("a.pdf"), stored_name("a.pdf"));
    }

    #[test]
    fn extension_is_last_suffix_lowercased() {
        assert_eq!(extension_of("report.final.PDF"), "pdf");
        assert_eq!(extension_of("README"), "");
    }

    #[test]
    fn rejects_traversal_paths() {
        assert!(is_safe_relative_path("profile_pics/abc_me.png"));
        assert!(!is_safe_relative_path("../secret"));
        assert!(!is_safe_relative_path("/etc/passwd"));
        assert!(!is_safe_relative_path("documents/../../x"));
        assert!(!is_safe_relative_path("documents\\x"));
        assert!(!is_safe_relative_path(""));
    }

    #[tokio::test]
    async fn remove_media_file_ignores_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("profile_pics");
        tokio::fs::create_dir_all(&path).await.unwrap();
        tokio::fs::write(path.join("x.png"), b"png").await.unwrap();

        remove_media_file(dir.path(), "profile_pics/x.png").await;
        assert!(!path.join("x.png").exists());

        remove_media_file(dir.path(), "profile_pics/missing.png").await;
    }
}
