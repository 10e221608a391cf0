//! CLI output formatting for every subcommand.
//!
//! # Information-First Display
//!
//! Each result leads with the file it is about, followed by indented context
//! lines. Failures are shown inline with the file they belong to, so a batch
//! run over many files reads as a single inventory.
//!
//! # Output Format
//!
//! ## Sniff
//!
//! ```text
//! 001 PNG  saved/g/12345/1699999.png
//! 002 JPEG saved/g/12345/1700000.jpg
//! 003 ---- notes.txt
//!     Error: File notes.txt is neither PNG nor JPEG
//! ```
//!
//! ## Resolve
//!
//! ```text
//! 1700000_thumb.jpg
//!     Location: images
//!     Path: saved/g/12345/1700000_thumb.jpg
//! ```
//!
//! ## Reencode
//!
//! ```text
//! photo.jpg → out.png
//!     Format: PNG 50x50
//!     SHA-256 before: 9f86d081…
//!     SHA-256 after:  60303ae2…
//! ```
//!
//! ## Load
//!
//! ```text
//! #1 resolved 640x480
//!     Path: saved/g/12345/1700000.jpg
//! #2 failed
//!     Error: Could not load image from the disk: (...)
//! ```
//!
//! # Architecture
//!
//! Each subcommand has a report type (also serialized for `--json`), a
//! `format_*` function (returns `Vec<String>`) for testability, and a
//! `print_*` wrapper that writes to stdout. Format functions are pure.

use crate::sniff::ImageFormat;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Shorten a hex digest for display. Full digests go to `--json`.
fn short_digest(digest: &str) -> String {
    match digest.get(..8) {
        Some(prefix) if digest.len() > 8 => format!("{prefix}…"),
        _ => digest.to_string(),
    }
}

/// Serialize any report as pretty JSON.
pub fn to_json<T: Serialize + ?Sized>(report: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(report)
}

pub fn print_json<T: Serialize + ?Sized>(report: &T) -> Result<(), serde_json::Error> {
    println!("{}", to_json(report)?);
    Ok(())
}

fn print_lines(lines: Vec<String>) {
    for line in lines {
        println!("{}", line);
    }
}

// ============================================================================
// Sniff
// ============================================================================

/// Outcome of sniffing one file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SniffReport {
    pub path: PathBuf,
    pub format: Option<ImageFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub fn format_sniff_output(reports: &[SniffReport]) -> Vec<String> {
    let mut lines = Vec::new();
    for (i, report) in reports.iter().enumerate() {
        let label = match report.format {
            Some(format) => format!("{:<4}", format.to_string()),
            None => "----".to_string(),
        };
        lines.push(format!(
            "{} {} {}",
            format_index(i + 1),
            label,
            report.path.display()
        ));
        if let Some(ref error) = report.error {
            lines.push(format!("    Error: {}", error));
        }
    }
    lines
}

pub fn print_sniff_output(reports: &[SniffReport]) {
    print_lines(format_sniff_output(reports));
}

// ============================================================================
// Resolve
// ============================================================================

/// A resolved on-disk location for one image reference.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolveReport {
    pub filename: String,
    pub location: crate::resolve::StorageLocation,
    pub path: PathBuf,
}

pub fn format_resolve_output(report: &ResolveReport) -> Vec<String> {
    vec![
        report.filename.clone(),
        format!("    Location: {}", report.location),
        format!("    Path: {}", report.path.display()),
    ]
}

pub fn print_resolve_output(report: &ResolveReport) {
    print_lines(format_resolve_output(report));
}

// ============================================================================
// Reencode
// ============================================================================

/// What a re-encode run produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReencodeReport {
    pub input: PathBuf,
    /// Where the result ended up. Equal to `input` when nothing was done.
    pub output: PathBuf,
    pub reencoded: bool,
    pub format: Option<ImageFormat>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub sha256_before: String,
    pub sha256_after: String,
}

impl ReencodeReport {
    pub fn checksum_changed(&self) -> bool {
        self.sha256_before != self.sha256_after
    }
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

pub fn format_reencode_output(report: &ReencodeReport) -> Vec<String> {
    let mut lines = Vec::new();
    if !report.reencoded {
        lines.push(format!("{}: unchanged", file_label(&report.input)));
        lines.push(format!("    SHA-256: {}", short_digest(&report.sha256_before)));
        return lines;
    }

    lines.push(format!(
        "{} → {}",
        file_label(&report.input),
        report.output.display()
    ));
    if let (Some(format), Some(w), Some(h)) = (report.format, report.width, report.height) {
        lines.push(format!("    Format: {} {}x{}", format, w, h));
    }
    lines.push(format!(
        "    SHA-256 before: {}",
        short_digest(&report.sha256_before)
    ));
    lines.push(format!(
        "    SHA-256 after:  {}",
        short_digest(&report.sha256_after)
    ));
    if !report.checksum_changed() {
        lines.push("    Checksum unchanged".to_string());
    }
    lines
}

pub fn print_reencode_output(report: &ReencodeReport) {
    print_lines(format_reencode_output(report));
}

// ============================================================================
// Load
// ============================================================================

/// Final state of one display load.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadReport {
    pub id: u64,
    pub state: crate::bridge::RequestState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub fn format_load_output(reports: &[LoadReport]) -> Vec<String> {
    let mut lines = Vec::new();
    for report in reports {
        match (report.width, report.height) {
            (Some(w), Some(h)) => lines.push(format!("#{} {} {}x{}", report.id, report.state, w, h)),
            _ => lines.push(format!("#{} {}", report.id, report.state)),
        }
        if let Some(ref path) = report.path {
            lines.push(format!("    Path: {}", path.display()));
        }
        if let Some(ref error) = report.error {
            lines.push(format!("    Error: {}", error));
        }
    }
    lines
}

pub fn print_load_output(reports: &[LoadReport]) {
    print_lines(format_load_output(reports));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::RequestState;
    use crate::resolve::StorageLocation;

    // =========================================================================
    // Helper tests
    // =========================================================================

    #[test]
    fn format_index_pads() {
        assert_eq!(format_index(1), "001");
        assert_eq!(format_index(42), "042");
        assert_eq!(format_index(1000), "1000");
    }

    #[test]
    fn short_digest_truncates_long() {
        assert_eq!(short_digest("0123456789abcdef"), "01234567…");
    }

    #[test]
    fn short_digest_keeps_short() {
        assert_eq!(short_digest("abc"), "abc");
        assert_eq!(short_digest("01234567"), "01234567");
    }

    // =========================================================================
    // Sniff
    // =========================================================================

    #[test]
    fn sniff_lines_show_format_and_error() {
        let reports = vec![
            SniffReport {
                path: PathBuf::from("a.png"),
                format: Some(ImageFormat::Png),
                error: None,
            },
            SniffReport {
                path: PathBuf::from("notes.txt"),
                format: None,
                error: Some("File notes.txt is neither PNG nor JPEG".into()),
            },
        ];
        let lines = format_sniff_output(&reports);
        assert_eq!(lines[0], "001 PNG  a.png");
        assert_eq!(lines[1], "002 ---- notes.txt");
        assert_eq!(lines[2], "    Error: File notes.txt is neither PNG nor JPEG");
        assert_eq!(lines.len(), 3);
    }

    #[test]
    fn sniff_json_uses_lowercase_format() {
        let report = SniffReport {
            path: PathBuf::from("a.jpg"),
            format: Some(ImageFormat::Jpeg),
            error: None,
        };
        let json = to_json(&report).unwrap();
        assert!(json.contains("\"format\": \"jpeg\""), "{json}");
        assert!(!json.contains("error"));
    }

    // =========================================================================
    // Resolve
    // =========================================================================

    #[test]
    fn resolve_lines() {
        let report = ResolveReport {
            filename: "spoiler.png".into(),
            location: StorageLocation::Board,
            path: PathBuf::from("saved/g/spoiler.png"),
        };
        assert_eq!(
            format_resolve_output(&report),
            vec![
                "spoiler.png".to_string(),
                "    Location: board".to_string(),
                "    Path: saved/g/spoiler.png".to_string(),
            ]
        );
    }

    // =========================================================================
    // Reencode
    // =========================================================================

    fn reencode_report(reencoded: bool, before: &str, after: &str) -> ReencodeReport {
        ReencodeReport {
            input: PathBuf::from("/in/photo.jpg"),
            output: PathBuf::from(if reencoded { "out.png" } else { "/in/photo.jpg" }),
            reencoded,
            format: reencoded.then_some(ImageFormat::Png),
            width: reencoded.then_some(50),
            height: reencoded.then_some(40),
            sha256_before: before.into(),
            sha256_after: after.into(),
        }
    }

    #[test]
    fn reencode_unchanged_is_one_digest() {
        let lines = format_reencode_output(&reencode_report(false, "aaaa", "aaaa"));
        assert_eq!(lines, vec!["photo.jpg: unchanged", "    SHA-256: aaaa"]);
    }

    #[test]
    fn reencode_shows_format_and_both_digests() {
        let lines = format_reencode_output(&reencode_report(
            true,
            "1111111111111111",
            "2222222222222222",
        ));
        assert_eq!(lines[0], "photo.jpg → out.png");
        assert_eq!(lines[1], "    Format: PNG 50x40");
        assert_eq!(lines[2], "    SHA-256 before: 11111111…");
        assert_eq!(lines[3], "    SHA-256 after:  22222222…");
        assert_eq!(lines.len(), 4);
    }

    #[test]
    fn reencode_flags_identical_checksum() {
        let lines = format_reencode_output(&reencode_report(true, "abcd", "abcd"));
        assert_eq!(lines.last().unwrap(), "    Checksum unchanged");
    }

    // =========================================================================
    // Load
    // =========================================================================

    #[test]
    fn load_lines_resolved_and_failed() {
        let reports = vec![
            LoadReport {
                id: 1,
                state: RequestState::Resolved,
                path: Some(PathBuf::from("saved/g/12345/1.jpg")),
                width: Some(640),
                height: Some(480),
                error: None,
            },
            LoadReport {
                id: 2,
                state: RequestState::Failed,
                path: None,
                width: None,
                height: None,
                error: Some("boom".into()),
            },
        ];
        let lines = format_load_output(&reports);
        assert_eq!(
            lines,
            vec![
                "#1 resolved 640x480",
                "    Path: saved/g/12345/1.jpg",
                "#2 failed",
                "    Error: boom",
            ]
        );
    }

    #[test]
    fn load_json_skips_missing_fields() {
        let report = LoadReport {
            id: 3,
            state: RequestState::Cancelled,
            path: None,
            width: None,
            height: None,
            error: None,
        };
        let json = to_json(&report).unwrap();
        assert!(json.contains("\"state\": \"cancelled\""), "{json}");
        assert!(!json.contains("path"));
    }
}
