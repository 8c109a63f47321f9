//! Job preparation: turning raw input rows into self-contained,
//! immutable units of dispatch.

use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use mailfleet_common::tracing::warn;
use serde::{Deserialize, Serialize};

/// One row of the input mapping, as handed over by the (out-of-scope)
/// mapping-file reader and as echoed back in the failure manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRow {
    /// Zero-based position in the original input.
    pub index: usize,
    /// Recipient address as it appeared in the input.
    pub recipient: String,
    /// Attachment file names (not paths) referenced by this row.
    #[serde(default)]
    pub attachments: Vec<String>,
}

/// Subject and body applied to every message in the batch. Any
/// placeholder interpolation happens upstream; the template arrives
/// whole.
#[derive(Debug, Clone)]
pub struct MessageTemplate {
    pub subject: String,
    pub body: String,
}

/// An immutable unit of dispatch: one recipient, one message, zero or
/// more attachments.
///
/// Created once during preparation and never mutated; exclusively held
/// by the worker executing it until its result is produced. Subject,
/// body, and BCC list are shared across the batch.
#[derive(Debug, Clone)]
pub struct Job {
    sequence_index: usize,
    recipient: String,
    subject: Arc<str>,
    body: Arc<str>,
    attachment_paths: Vec<PathBuf>,
    bcc: Arc<[String]>,
}

impl Job {
    /// Stable ordinal from the original input, used for reporting order
    /// and manifest lookup.
    #[must_use]
    pub const fn sequence_index(&self) -> usize {
        self.sequence_index
    }

    #[must_use]
    pub fn recipient(&self) -> &str {
        &self.recipient
    }

    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    #[must_use]
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Absolute attachment paths, in input order.
    #[must_use]
    pub fn attachment_paths(&self) -> &[PathBuf] {
        &self.attachment_paths
    }

    /// Blind-copy recipients (envelope-only; never appear in headers).
    #[must_use]
    pub fn bcc(&self) -> &[String] {
        &self.bcc
    }
}

/// Build dispatch jobs from raw input rows.
///
/// Attachment names are resolved against `attachment_dir`; blank names
/// are dropped. A row whose recipient does not look like an address
/// (no `@`) is skipped with a warning rather than failing the batch;
/// one malformed row should not hold the rest hostage. The surviving
/// jobs keep their original row index as `sequence_index`.
#[must_use]
pub fn prepare_jobs(
    rows: &[SourceRow],
    attachment_dir: &Path,
    template: &MessageTemplate,
    bcc_recipients: &[String],
) -> Vec<Job> {
    let subject: Arc<str> = Arc::from(template.subject.as_str());
    let body: Arc<str> = Arc::from(template.body.as_str());
    let bcc: Arc<[String]> = Arc::from(bcc_recipients);

    rows.iter()
        .filter_map(|row| {
            let recipient = row.recipient.trim();
            if !recipient.contains('@') {
                warn!(
                    row = row.index + 1,
                    recipient = %row.recipient,
                    "Skipping row with invalid recipient address"
                );
                return None;
            }

            let attachment_paths = row
                .attachments
                .iter()
                .map(|name| name.trim())
                .filter(|name| !name.is_empty())
                .map(|name| attachment_dir.join(name))
                .collect();

            Some(Job {
                sequence_index: row.index,
                recipient: recipient.to_string(),
                subject: Arc::clone(&subject),
                body: Arc::clone(&body),
                attachment_paths,
                bcc: Arc::clone(&bcc),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template() -> MessageTemplate {
        MessageTemplate {
            subject: "Your document".into(),
            body: "Please find it attached.".into(),
        }
    }

    fn row(index: usize, recipient: &str, attachments: &[&str]) -> SourceRow {
        SourceRow {
            index,
            recipient: recipient.into(),
            attachments: attachments.iter().map(ToString::to_string).collect(),
        }
    }

    #[test]
    fn resolves_attachments_against_directory() {
        let rows = vec![row(0, "user@example.com", &["report.pdf", " notes.txt "])];
        let jobs = prepare_jobs(&rows, Path::new("/data/out"), &template(), &[]);

        assert_eq!(jobs.len(), 1);
        assert_eq!(
            jobs[0].attachment_paths(),
            &[
                PathBuf::from("/data/out/report.pdf"),
                PathBuf::from("/data/out/notes.txt"),
            ]
        );
        assert_eq!(jobs[0].subject(), "Your document");
    }

    #[test]
    fn skips_rows_without_usable_recipient() {
        let rows = vec![
            row(0, "first@example.com", &[]),
            row(1, "not-an-address", &[]),
            row(2, "", &[]),
            row(3, "second@example.com", &[]),
        ];
        let jobs = prepare_jobs(&rows, Path::new("."), &template(), &[]);

        assert_eq!(jobs.len(), 2);
        // Sequence indices track the original rows, not the surviving set
        assert_eq!(jobs[0].sequence_index(), 0);
        assert_eq!(jobs[1].sequence_index(), 3);
    }

    #[test]
    fn blank_attachment_names_are_dropped() {
        let rows = vec![row(0, "user@example.com", &["report.pdf", "", "   "])];
        let jobs = prepare_jobs(&rows, Path::new("/in"), &template(), &[]);
        assert_eq!(jobs[0].attachment_paths().len(), 1);
    }

    #[test]
    fn recipient_whitespace_is_trimmed() {
        let rows = vec![row(0, "  user@example.com  ", &[])];
        let jobs = prepare_jobs(&rows, Path::new("."), &template(), &[]);
        assert_eq!(jobs[0].recipient(), "user@example.com");
    }

    #[test]
    fn bcc_list_is_shared_across_jobs() {
        let bcc = vec!["archive@example.com".to_string()];
        let rows = vec![row(0, "a@example.com", &[]), row(1, "b@example.com", &[])];
        let jobs = prepare_jobs(&rows, Path::new("."), &template(), &bcc);

        assert_eq!(jobs[0].bcc(), ["archive@example.com".to_string()]);
        assert_eq!(jobs[1].bcc(), ["archive@example.com".to_string()]);
    }
}
