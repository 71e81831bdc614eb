//! Uploading attachments and waiting for the backend to process them.

use crate::api::{Backend, FileProcessing};
use crate::error::{ParleyError, Result};
use crate::state::FileAttachment;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

const POLL_INTERVAL: Duration = Duration::from_millis(500);
const MAX_POLLS: u32 = 120;

fn content_type_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();
    match extension.as_str() {
        "txt" | "md" => "text/plain",
        "csv" => "text/csv",
        "json" => "application/json",
        "pdf" => "application/pdf",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        _ => "application/octet-stream",
    }
}

/// Uploads `path` and waits until the backend has processed it.
pub async fn upload_file(backend: &dyn Backend, path: &Path) -> Result<FileAttachment> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| ParleyError::InvalidInput(format!("not a file path: {}", path.display())))?
        .to_string();
    let bytes = tokio::fs::read(path).await?;
    let size = bytes.len() as u64;

    let uploaded = backend
        .upload_file(&file_name, bytes, content_type_for(path))
        .await?;
    info!(file_id = %uploaded.id, file_name = %file_name, size, "file uploaded");

    wait_for_file(backend, &uploaded.id, POLL_INTERVAL, MAX_POLLS).await?;

    Ok(FileAttachment {
        id: uploaded.id,
        name: if uploaded.filename.is_empty() {
            file_name
        } else {
            uploaded.filename
        },
        url: None,
        size: Some(size),
    })
}

/// Polls the processing status of an uploaded file until it settles.
pub async fn wait_for_file(
    backend: &dyn Backend,
    id: &str,
    interval: Duration,
    max_polls: u32,
) -> Result<()> {
    for attempt in 0..max_polls {
        let status = backend.file_status(id).await?;
        match status.processing() {
            FileProcessing::Completed => return Ok(()),
            FileProcessing::Failed => {
                let reason = status.error.unwrap_or(status.status);
                return Err(ParleyError::InvalidInput(format!(
                    "file {} could not be processed: {}",
                    id, reason
                )));
            }
            FileProcessing::Pending => {
                debug!(file_id = id, attempt, "file still processing");
                tokio::time::sleep(interval).await;
            }
        }
    }
    Err(ParleyError::InvalidInput(format!(
        "file {} was not processed after {} checks",
        id, max_polls
    )))
}
