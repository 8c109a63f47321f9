//! Pre-flight attachment validation.
//!
//! Every file referenced by the batch is checked before a single
//! connection is opened: existence, non-zero size, and, when the
//! dispatcher is restricted to a file kind, a matching signature.
//! Validation is all-or-nothing: one bad file aborts the whole batch.
//! These errors are deterministic and cheap to catch locally; finding
//! them mid-flight would burn retry budget on jobs that were doomed
//! from the start.

use std::{
    fs::File,
    io::Read,
    path::{Path, PathBuf},
};

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::job::Job;

const PDF_SIGNATURE: &[u8; 5] = b"%PDF-";

/// File-kind restriction applied during validation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentKind {
    /// Any regular, non-empty file.
    #[default]
    Any,
    /// PDF documents, checked by the `%PDF-` header.
    Pdf,
}

/// A successfully validated attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedAttachment {
    pub path: PathBuf,
    /// The filename presented in the MIME part.
    pub display_name: String,
    /// MIME content type guessed from the extension.
    pub content_kind: String,
}

/// One attachment that failed validation, with the reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationFailure {
    pub path: PathBuf,
    pub reason: String,
}

impl std::fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.reason)
    }
}

/// Validate every distinct attachment referenced by the batch.
///
/// Paths are deduplicated first so a file attached to many jobs is read
/// once. Returns every failure, not just the first, so the operator can
/// fix the whole set in one pass.
///
/// # Errors
///
/// Returns the full list of failures if any referenced file is invalid.
pub fn validate_attachments(
    jobs: &[Job],
    kind: AttachmentKind,
) -> Result<Vec<ValidatedAttachment>, Vec<ValidationFailure>> {
    let mut seen: AHashMap<&Path, Result<ValidatedAttachment, ValidationFailure>> =
        AHashMap::new();

    for job in jobs {
        for path in job.attachment_paths() {
            seen.entry(path.as_path())
                .or_insert_with(|| validate_file(path, kind));
        }
    }

    let mut valid = Vec::new();
    let mut failures = Vec::new();
    for outcome in seen.into_values() {
        match outcome {
            Ok(attachment) => valid.push(attachment),
            Err(failure) => failures.push(failure),
        }
    }

    if failures.is_empty() {
        Ok(valid)
    } else {
        failures.sort_by(|a, b| a.path.cmp(&b.path));
        Err(failures)
    }
}

fn validate_file(path: &Path, kind: AttachmentKind) -> Result<ValidatedAttachment, ValidationFailure> {
    let fail = |reason: String| ValidationFailure {
        path: path.to_path_buf(),
        reason,
    };

    let metadata = std::fs::metadata(path)
        .map_err(|_| fail("File does not exist or is not readable".into()))?;

    if !metadata.is_file() {
        return Err(fail("Not a regular file".into()));
    }
    if metadata.len() == 0 {
        return Err(fail("File is empty".into()));
    }

    if kind == AttachmentKind::Pdf {
        let mut header = [0u8; PDF_SIGNATURE.len()];
        let read = File::open(path)
            .and_then(|mut file| file.read(&mut header))
            .map_err(|e| fail(format!("Error reading file: {e}")))?;

        if read < header.len() || &header != PDF_SIGNATURE {
            return Err(fail("File is not a valid PDF (missing %PDF header)".into()));
        }
    }

    let display_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .map_or_else(|| path.display().to_string(), ToString::to_string);

    Ok(ValidatedAttachment {
        path: path.to_path_buf(),
        display_name,
        content_kind: mailfleet_smtp::guess_content_type(path),
    })
}
