use std::collections::HashMap;
use std::path::{Path, PathBuf};

use axum::extract::multipart::{Field, Multipart};
use rand::Rng;
use tokio::io::AsyncWriteExt;

use crate::db::models::MediaKind;
use crate::error::{AppError, AppResult};

/// An uploaded file written to the temp directory, waiting to be handed
/// to the media store. The file is deleted when the value is dropped.
#[derive(Debug)]
pub struct StagedFile {
    pub field: String,
    pub path: PathBuf,
    pub original_name: String,
    pub content_type: String,
    pub kind: MediaKind,
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Which file fields a form accepts.
#[derive(Debug, Clone, Copy)]
pub struct FileRule {
    pub field: &'static str,
    pub max_count: usize,
    pub images_only: bool,
}

#[derive(Debug, Default)]
pub struct UploadForm {
    fields: HashMap<String, String>,
    files: Vec<StagedFile>,
}

impl UploadForm {
    pub fn text(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// Text field with surrounding whitespace removed; blank counts as absent.
    pub fn trimmed(&self, name: &str) -> Option<&str> {
        self.text(name).map(str::trim).filter(|s| !s.is_empty())
    }

    pub fn take_files(&mut self, field: &str) -> Vec<StagedFile> {
        let (taken, kept) = std::mem::take(&mut self.files)
            .into_iter()
            .partition(|f| f.field == field);
        self.files = kept;
        taken
    }

    pub fn take_file(&mut self, field: &str) -> Option<StagedFile> {
        self.take_files(field).into_iter().next()
    }
}

fn staged_name(original: &str) -> String {
    let bytes: [u8; 12] = rand::thread_rng().gen();
    let ext = Path::new(original)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e))
        .unwrap_or_default();
    format!("{}{}", hex::encode(bytes), ext)
}

fn multipart_error(e: impl std::fmt::Display) -> AppError {
    tracing::debug!("Multipart read error: {}", e);
    AppError::BadRequest("Invalid multipart body".into())
}

/// Read a whole multipart form, staging file parts to `temp_dir`.
pub async fn read_form(
    mut multipart: Multipart,
    temp_dir: &Path,
    max_file_bytes: usize,
    rules: &[FileRule],
) -> AppResult<UploadForm> {
    tokio::fs::create_dir_all(temp_dir)
        .await
        .map_err(|e| AppError::Internal(format!("cannot create temp dir: {}", e)))?;

    let mut form = UploadForm::default();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();

        if field.file_name().is_none() {
            let value = field.text().await.map_err(multipart_error)?;
            form.fields.insert(name, value);
            continue;
        }

        let rule = rules
            .iter()
            .find(|r| r.field == name)
            .ok_or_else(|| AppError::BadRequest(format!("Unexpected file field: {}", name)))?;

        if form.files.iter().filter(|f| f.field == name).count() >= rule.max_count {
            return Err(AppError::BadRequest(format!(
                "At most {} file(s) allowed for {}",
                rule.max_count, name
            )));
        }

        let staged = stage_field(field, &name, temp_dir, max_file_bytes, rule).await?;
        form.files.push(staged);
    }

    Ok(form)
}

async fn stage_field(
    mut field: Field<'_>,
    name: &str,
    temp_dir: &Path,
    max_file_bytes: usize,
    rule: &FileRule,
) -> AppResult<StagedFile> {
    let original_name = field.file_name().unwrap_or("upload").to_string();
    let content_type = field
        .content_type()
        .map(str::to_string)
        .unwrap_or_else(|| {
            mime_guess::from_path(&original_name)
                .first_or_octet_stream()
                .to_string()
        });

    let kind = MediaKind::from_mime(&content_type)?;
    if rule.images_only && kind != MediaKind::Image {
        return Err(AppError::BadRequest(format!(
            "Unsupported file type: {}",
            content_type
        )));
    }

    // Constructed before writing so a partial file is removed on any error below.
    let staged = StagedFile {
        field: name.to_string(),
        path: temp_dir.join(staged_name(&original_name)),
        original_name,
        content_type,
        kind,
    };

    let mut out = tokio::fs::File::create(&staged.path)
        .await
        .map_err(|e| AppError::Internal(format!("cannot stage upload: {}", e)))?;

    let mut written = 0usize;
    while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
        written += chunk.len();
        if written > max_file_bytes {
            return Err(AppError::BadRequest("File too large".into()));
        }
        out.write_all(&chunk)
            .await
            .map_err(|e| AppError::Internal(format!("cannot stage upload: {}", e)))?;
    }
    out.flush()
        .await
        .map_err(|e| AppError::Internal(format!("cannot stage upload: {}", e)))?;

    Ok(staged)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn staged_names_keep_extension() {
        let name = staged_name("holiday.jpeg");
        assert!(name.ends_with(".jpeg"));
        assert_eq!(name.len(), 24 + ".jpeg".len());
        assert_ne!(staged_name("a.png"), staged_name("a.png"));
        assert_eq!(staged_name("noext").len(), 24);
    }

    #[test]
    fn dropping_staged_file_deletes_it() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("x.png");
        std::fs::write(&path, b"x").unwrap();
        let staged = StagedFile {
            field: "avatar".into(),
            path: path.clone(),
            original_name: "x.png".into(),
            content_type: "image/png".into(),
            kind: MediaKind::Image,
        };
        drop(staged);
        assert!(!path.exists());
    }

    #[test]
    fn take_files_partitions_by_field() {
        let tmp = tempfile::tempdir().unwrap();
        let mk = |field: &str, n: &str| StagedFile {
            field: field.into(),
            path: tmp.path().join(n),
            original_name: n.into(),
            content_type: "image/png".into(),
            kind: MediaKind::Image,
        };
        let mut form = UploadForm {
            fields: HashMap::from([("content".to_string(), "  hi  ".to_string())]),
            files: vec![mk("media", "a"), mk("avatar", "b"), mk("media", "c")],
        };
        assert_eq!(form.take_files("media").len(), 2);
        assert!(form.take_file("avatar").is_some());
        assert!(form.take_file("avatar").is_none());
        assert_eq!(form.trimmed("content"), Some("hi"));
        assert_eq!(form.trimmed("missing"), None);
    }
}
