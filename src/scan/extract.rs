//! Best-effort text extraction / 文本提取

use std::path::Path;

use encoding_rs::{Encoding, WINDOWS_1252};

use crate::error::{Result, ServiceError};

const BINARY_SNIFF_LEN: usize = 8192;
const MIN_PRINTABLE_RUN: usize = 4;

/// Turns a local file into text for line matching.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, path: &Path) -> Result<String>;
}

/// Decodes text files, recovers printable runs from binaries / 纯文本提取器
#[derive(Debug, Clone)]
pub struct PlainTextExtractor {
    max_file_size: u64,
}

impl PlainTextExtractor {
    pub fn new(max_file_size: u64) -> Self {
        Self { max_file_size }
    }
}

impl Default for PlainTextExtractor {
    fn default() -> Self {
        Self::new(64 * 1024 * 1024)
    }
}

impl TextExtractor for PlainTextExtractor {
    fn extract(&self, path: &Path) -> Result<String> {
        let failed = |reason: String| ServiceError::ContentExtraction {
            path: path.to_path_buf(),
            reason,
        };

        let size = std::fs::metadata(path).map_err(|e| failed(e.to_string()))?.len();
        if size > self.max_file_size {
            return Err(failed(format!(
                "file is {} bytes, above the {} byte limit",
                size, self.max_file_size
            )));
        }

        let bytes = std::fs::read(path).map_err(|e| failed(e.to_string()))?;
        Ok(decode_text(&bytes))
    }
}

/// BOM → binary sniff → UTF-8 → windows-1252
pub fn decode_text(bytes: &[u8]) -> String {
    if let Some((encoding, bom_len)) = Encoding::for_bom(bytes) {
        let (text, _) = encoding.decode_without_bom_handling(&bytes[bom_len..]);
        return text.into_owned();
    }

    if looks_binary(bytes) {
        return printable_runs(bytes, MIN_PRINTABLE_RUN);
    }

    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => {
            let (text, _) = WINDOWS_1252.decode_without_bom_handling(bytes);
            text.into_owned()
        }
    }
}

fn looks_binary(bytes: &[u8]) -> bool {
    bytes.iter().take(BINARY_SNIFF_LEN).any(|b| *b == 0)
}

/// Runs of printable ASCII, one per line (like `strings`)
fn printable_runs(bytes: &[u8], min_len: usize) -> String {
    let mut out = String::new();
    let mut run = String::new();

    for &b in bytes {
        if b.is_ascii_graphic() || b == b' ' || b == b'\t' {
            run.push(b as char);
            continue;
        }
        if run.len() >= min_len {
            out.push_str(&run);
            out.push('\n');
        }
        run.clear();
    }
    if run.len() >= min_len {
        out.push_str(&run);
        out.push('\n');
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_utf8_and_bom() {
        assert_eq!(decode_text("héllo\nworld".as_bytes()), "héllo\nworld");
        assert_eq!(decode_text(b"\xEF\xBB\xBFabc"), "abc");
        // UTF-16LE with BOM
        assert_eq!(decode_text(b"\xFF\xFEa\x00b\x00"), "ab");
    }

    #[test]
    fn test_decode_latin1_fallback() {
        assert_eq!(decode_text(b"caf\xE9"), "café");
    }

    #[test]
    fn test_binary_keeps_printable_runs() {
        let text = decode_text(b"\x00\x01key=123-45-6789\x00ab\x00\x02tail");
        assert_eq!(text, "key=123-45-6789\ntail\n");
    }

    #[test]
    fn test_size_limit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.txt");
        std::fs::write(&path, "0123456789").unwrap();

        assert!(PlainTextExtractor::new(100).extract(&path).is_ok());
        let err = PlainTextExtractor::new(5).extract(&path).unwrap_err();
        assert!(matches!(err, ServiceError::ContentExtraction { .. }));

        let missing = PlainTextExtractor::default().extract(&dir.path().join("nope"));
        assert!(matches!(missing, Err(ServiceError::ContentExtraction { .. })));
    }
}
