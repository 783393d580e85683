//! Evidence acceptance policy.
//!
//! Uploaded files are validated for size and MIME category before anything
//! is stored. The closed-action gate is NOT here: it is re-checked inside
//! the storage write path so a transition racing the upload cannot slip a
//! late file in.

use capa_core::WorkflowError;

/// One file from a multipart upload.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Size/type policy applied to every uploaded evidence file.
#[derive(Debug, Clone)]
pub struct EvidencePolicy {
    pub max_file_bytes: usize,
    /// Accepted MIME types; entries ending in `/` match the whole category
    /// (e.g. `image/` accepts `image/jpeg`).
    pub allowed_types: &'static [&'static str],
}

/// Maximum evidence file size: 10 MiB.
const MAX_FILE_BYTES: usize = 10 * 1024 * 1024;

const ALLOWED_TYPES: &[&str] = &["image/", "video/", "application/pdf", "text/plain"];

impl Default for EvidencePolicy {
    fn default() -> Self {
        Self {
            max_file_bytes: MAX_FILE_BYTES,
            allowed_types: ALLOWED_TYPES,
        }
    }
}

impl EvidencePolicy {
    /// Validate a single file against the policy.
    pub fn validate(&self, file: &UploadFile) -> Result<(), WorkflowError> {
        if file.file_name.is_empty() {
            return Err(WorkflowError::InvalidFile {
                file_name: "(unnamed)".to_string(),
                reason: "file name is required".to_string(),
            });
        }
        if file.bytes.is_empty() {
            return Err(WorkflowError::InvalidFile {
                file_name: file.file_name.clone(),
                reason: "file is empty".to_string(),
            });
        }
        if file.bytes.len() > self.max_file_bytes {
            return Err(WorkflowError::InvalidFile {
                file_name: file.file_name.clone(),
                reason: format!(
                    "file exceeds maximum size of {} bytes",
                    self.max_file_bytes
                ),
            });
        }
        let accepted = self.allowed_types.iter().any(|allowed| {
            if let Some(category) = allowed.strip_suffix('/') {
                file.content_type
                    .strip_prefix(category)
                    .is_some_and(|rest| rest.starts_with('/'))
            } else {
                file.content_type == *allowed
            }
        });
        if !accepted {
            return Err(WorkflowError::InvalidFile {
                file_name: file.file_name.clone(),
                reason: format!("content type '{}' is not accepted", file.content_type),
            });
        }
        Ok(())
    }
}
