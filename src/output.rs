//! CLI output formatting.
//!
//! # Information-First Display
//!
//! Every file leads with its positional index and file name; format, size
//! and depth follow on the same line, and secondary facts (source path,
//! color model, profile, embedded text) sit on indented context lines.
//!
//! # Output Format
//!
//! ## Info
//!
//! ```text
//! 001 dawn.tif  TIFF 6000x4000 16-bit RGBA
//!     Color model: RGB
//!     ICC profile: 3144 bytes
//!     Text: Software, ImageDescription
//! ```
//!
//! ## Convert
//!
//! ```text
//! 001 dawn.tif → dawn.png  TIFF → PNG 6000x4000 16-bit
//! 002 broken.png  FAILED: Rejected: bad PNG signature
//!
//! Converted 1 file, 1 failed
//! ```
//!
//! # Architecture
//!
//! Each command has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format
//! functions are pure: no I/O, no side effects.

use crate::batch::{BatchEvent, BatchSummary, ImageReport};
use crate::codecs::loader::CodecError;
use std::path::{Path, PathBuf};

// ============================================================================
// Shared display helpers
// ============================================================================

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

fn plural(n: usize, word: &str) -> String {
    if n == 1 {
        format!("{n} {word}")
    } else {
        format!("{n} {word}s")
    }
}

// ============================================================================
// Info
// ============================================================================

/// Format one inspected file.
///
/// `position` is 1-based.
pub fn format_report(position: usize, report: &ImageReport) -> Vec<String> {
    let channels = if report.has_alpha { "RGBA" } else { "RGB" };
    let mut lines = vec![format!(
        "{} {}  {} {}x{} {}-bit {}",
        format_index(position),
        file_name(&report.path),
        report.format,
        report.width,
        report.height,
        report.bits_per_channel,
        channels
    )];
    lines.push(format!("{}Color model: {}", indent(1), report.color_model));
    if let Some(bytes) = report.icc_profile_bytes {
        lines.push(format!("{}ICC profile: {} bytes", indent(1), bytes));
    }
    if !report.text_keys.is_empty() {
        lines.push(format!("{}Text: {}", indent(1), report.text_keys.join(", ")));
    }
    if let Some(hash) = report.attributes.get_str(crate::codecs::keys::UNIQUE_HASH) {
        lines.push(format!("{}Hash: {}", indent(1), hash));
    }
    lines
}

/// Format a file that could not be inspected.
pub fn format_failure(position: usize, path: &Path, error: &CodecError) -> Vec<String> {
    vec![format!(
        "{} {}  FAILED: {}",
        format_index(position),
        file_name(path),
        error
    )]
}

/// Format every `info` result in input order.
pub fn format_info(results: &[(PathBuf, Result<ImageReport, CodecError>)]) -> Vec<String> {
    results
        .iter()
        .enumerate()
        .flat_map(|(i, (path, result))| match result {
            Ok(report) => format_report(i + 1, report),
            Err(e) => format_failure(i + 1, path, e),
        })
        .collect()
}

pub fn print_info(results: &[(PathBuf, Result<ImageReport, CodecError>)]) {
    for line in format_info(results) {
        println!("{}", line);
    }
}

// ============================================================================
// Convert
// ============================================================================

/// Format a single conversion event as display lines.
pub fn format_batch_event(event: &BatchEvent) -> Vec<String> {
    match event {
        BatchEvent::Converted {
            index,
            source,
            target,
            read_format,
            written_format,
            width,
            height,
            bits,
        } => vec![format!(
            "{} {} \u{2192} {}  {} \u{2192} {} {}x{} {}-bit",
            format_index(index + 1),
            file_name(source),
            file_name(target),
            read_format,
            written_format,
            width,
            height,
            bits
        )],
        BatchEvent::Failed {
            index,
            source,
            error,
        } => vec![
            format!(
                "{} {}  FAILED: {}",
                format_index(index + 1),
                file_name(source),
                error
            ),
            format!("{}Source: {}", indent(1), source.display()),
        ],
    }
}

/// Format the closing summary line.
pub fn format_summary(summary: &BatchSummary) -> Vec<String> {
    let mut line = format!("Converted {}", plural(summary.converted, "file"));
    if summary.failed > 0 {
        line.push_str(&format!(", {} failed", summary.failed));
    }
    vec![String::new(), line]
}

pub fn print_summary(summary: &BatchSummary) {
    for line in format_summary(summary) {
        println!("{}", line);
    }
}
