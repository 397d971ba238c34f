//! System message describing a file the user uploaded.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Characters of text preview included in the prompt.
pub const PREVIEW_CHARS: usize = 2000;

const TEXT_EXTENSIONS: &[&str] = &["txt", "md", "csv", "json"];

const GUIDANCE: &str = "Guidance: the uploaded file is available in this conversation. \
Do not say that files cannot be uploaded. Use the preview above to answer directly, \
and call tools if the data needs more processing. Structure the answer as a summary, \
key figures or headings, insights and limits, then suggested follow-up questions.";

/// A file saved by the upload endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UploadedFile {
    pub name: String,
    pub path: PathBuf,
}

/// Re-anchor a client-supplied upload reference to a file stored under `upload_dir`.
///
/// Returns `None` when the path does not exist or resolves outside the upload
/// directory, including through `..` or symlinks.
pub async fn resolve_upload(file: &UploadedFile, upload_dir: &Path) -> Option<UploadedFile> {
    let root = tokio::fs::canonicalize(upload_dir).await.ok()?;
    let path = match tokio::fs::canonicalize(&file.path).await {
        Ok(path) => path,
        Err(e) => {
            tracing::warn!(path = %file.path.display(), error = %e, "Uploaded file not found");
            return None;
        }
    };
    let is_file = tokio::fs::metadata(&path).await.is_ok_and(|m| m.is_file());
    if !path.starts_with(&root) || !is_file {
        tracing::warn!(path = %file.path.display(), "Rejected file outside the upload directory");
        return None;
    }
    Some(UploadedFile {
        name: file.name.clone(),
        path,
    })
}

/// Render the system message for an uploaded file.
pub async fn build_file_context(file: &UploadedFile) -> String {
    let header = format!(
        "The user uploaded a file. Name: {}, path: {}",
        file.name,
        file.path.display()
    );
    format!("{header}\n{}\n{GUIDANCE}", preview(&file.path).await)
}

async fn preview(path: &Path) -> String {
    if !is_text_file(path) {
        return "(No text preview for this file type; the file is available at the path above.)"
            .to_string();
    }

    match tokio::fs::read(path).await {
        Ok(bytes) => {
            let text = String::from_utf8_lossy(&bytes);
            let head: String = text.chars().take(PREVIEW_CHARS).collect();
            format!("File preview (up to {PREVIEW_CHARS} characters):\n{head}")
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Could not read uploaded file");
            format!("(Could not read a text preview: {e})")
        }
    }
}

fn is_text_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| TEXT_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}
