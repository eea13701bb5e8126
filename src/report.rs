//! Human-readable result rendering / 结果输出

use std::fmt::Write;

use crate::models::{FileRecord, MatchRecord};

/// Numbered file records followed by a summary line.
pub fn render_files(service: &str, files: &[FileRecord]) -> String {
    let mut out = String::new();
    for (idx, file) in files.iter().enumerate() {
        let _ = writeln!(out, "#{} {}", idx + 1, file);
    }
    let _ = write!(out, "{}: {} file(s) found", service, files.len());
    out
}

/// Numbered match records followed by per-pattern totals.
pub fn render_matches(service: &str, matches: &[MatchRecord]) -> String {
    let mut out = String::new();
    let mut totals: Vec<(&str, usize)> = Vec::new();

    for (idx, record) in matches.iter().enumerate() {
        let _ = writeln!(out, "#{} {}", idx + 1, record);
        match totals.iter_mut().find(|(name, _)| *name == record.pattern()) {
            Some((_, count)) => *count += 1,
            None => totals.push((record.pattern(), 1)),
        }
    }

    let _ = write!(out, "{}: {} match(es)", service, matches.len());
    if !totals.is_empty() {
        let per_pattern: Vec<String> = totals
            .iter()
            .map(|(name, count)| format!("{}={}", name, count))
            .collect();
        let _ = write!(out, " ({})", per_pattern.join(", "));
    }
    out
}
