//! ZIP assembly for a completed job's artifacts (§4.9, P10). Streams a
//! DEFLATE-compressed archive into memory; entries are named
//! `{sanitised_title}_{video_id}.{format}`.

use std::io::Write;

use chrono::Utc;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::OrchestratorError;
use crate::formatter::OutputFormat;

const ZIP_COMPRESSION_LEVEL: i64 = 6;

/// One task's content, as packaging sees it: a sanitised title, a video id,
/// and the transcript text already materialised (inline or downloaded from
/// the storage reference — the orchestrator resolves that beforehand).
pub struct PackagedEntry {
    pub title: String,
    pub video_id: String,
    pub content: String,
}

/// Builds the archive, skipping entries with no content rather than failing
/// the whole job. Returns `OrchestratorError::EmptyArchive` if nothing
/// survived (§4.9's "if the archive is empty, report no-valid-transcripts").
pub fn build_zip(
    entries: &[PackagedEntry],
    format: OutputFormat,
) -> Result<Vec<u8>, OrchestratorError> {
    let mut buffer = Vec::new();
    {
        let cursor = std::io::Cursor::new(&mut buffer);
        let mut writer = ZipWriter::new(cursor);
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .compression_level(Some(ZIP_COMPRESSION_LEVEL));

        let mut wrote_any = false;
        for entry in entries {
            if entry.content.trim().is_empty() {
                continue;
            }
            let name = format!(
                "{}_{}.{}",
                sanitise_title(&entry.title),
                entry.video_id,
                format.extension()
            );
            writer
                .start_file(name, options)
                .map_err(|e| OrchestratorError::Other(anyhow::anyhow!(e)))?;
            writer
                .write_all(entry.content.as_bytes())
                .map_err(|e| OrchestratorError::Other(anyhow::anyhow!(e)))?;
            wrote_any = true;
        }

        if !wrote_any {
            return Err(OrchestratorError::EmptyArchive);
        }

        writer
            .finish()
            .map_err(|e| OrchestratorError::Other(anyhow::anyhow!(e)))?;
    }
    Ok(buffer)
}

/// `bulk_job_{id}_{YYYYMMDD_HHMMSS}.zip`, per §6.
pub fn archive_filename(job_id: &uuid::Uuid) -> String {
    format!("bulk_job_{job_id}_{}.zip", Utc::now().format("%Y%m%d_%H%M%S"))
}

/// Strips filesystem-reserved characters, collapses whitespace runs, trims
/// leading/trailing dots and spaces, and caps the result at 200 characters
/// (§4.6's title-sanitisation rule, reused here since entry names follow the
/// same convention).
pub fn sanitise_title(title: &str) -> String {
    let mut cleaned: String = title
        .chars()
        .map(|c| if "/\\:*?\"<>|".contains(c) { ' ' } else { c })
        .collect();

    while cleaned.contains("  ") {
        cleaned = cleaned.replace("  ", " ");
    }

    let trimmed = cleaned.trim_matches(|c: char| c == '.' || c == ' ');
    let capped: String = trimmed.chars().take(200).collect();

    if capped.is_empty() {
        "untitled".to_string()
    } else {
        capped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitise_strips_reserved_chars_and_collapses_whitespace() {
        assert_eq!(sanitise_title("a/b:c   d"), "a b c d");
    }

    #[test]
    fn sanitise_trims_leading_trailing_dots_and_spaces() {
        assert_eq!(sanitise_title("  ...hello...  "), "hello");
    }

    #[test]
    fn sanitise_caps_at_200_chars() {
        let long = "x".repeat(500);
        assert_eq!(sanitise_title(&long).len(), 200);
    }

    #[test]
    fn empty_entries_yield_empty_archive_error() {
        let entries = vec![PackagedEntry {
            title: "x".into(),
            video_id: "v1".into(),
            content: "   ".into(),
        }];
        assert!(matches!(
            build_zip(&entries, OutputFormat::Txt),
            Err(OrchestratorError::EmptyArchive)
        ));
    }

    #[test]
    fn p10_archive_opens_cleanly_with_one_entry_per_completed_task() {
        let entries = vec![
            PackagedEntry { title: "Talk One".into(), video_id: "v1".into(), content: "hello".into() },
            PackagedEntry { title: "Talk Two".into(), video_id: "v2".into(), content: "world".into() },
        ];
        let bytes = build_zip(&entries, OutputFormat::Txt).unwrap();

        let cursor = std::io::Cursor::new(bytes);
        let mut archive = zip::ZipArchive::new(cursor).unwrap();
        assert_eq!(archive.len(), 2);

        for i in 0..archive.len() {
            let mut file = archive.by_index(i).unwrap();
            let mut contents = String::new();
            std::io::Read::read_to_string(&mut file, &mut contents).unwrap();
            assert!(!contents.is_empty());
        }
    }

    #[test]
    fn archive_filename_matches_expected_shape() {
        let id = uuid::Uuid::nil();
        let name = archive_filename(&id);
        assert!(name.starts_with(&format!("bulk_job_{id}_")));
        assert!(name.ends_with(".zip"));
    }
}
