//! Backend-agnostic result objects / 与后端无关的结果对象
//!
//! - `FileRecord`: one located file, built only by a handler's conversion step
//! - `NamedPattern` / `PatternSet`: compiled expressions reused for a whole scan
//! - `MatchRecord`: evidence of one pattern hit, never carrying the matched text

use std::fmt;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Opaque parent reference, shaped the way the provider reports it / 父级引用
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ParentRef {
    None,
    /// Single container identifier (Box folder id, S3 bucket)
    Id(String),
    /// Multiple parents (Google Drive)
    Ids(Vec<String>),
    /// Provider path of the containing folder (Dropbox)
    Path(String),
}

impl fmt::Display for ParentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParentRef::None => write!(f, "-"),
            ParentRef::Id(id) => write!(f, "{}", id),
            ParentRef::Ids(ids) => write!(f, "[{}]", ids.join(", ")),
            ParentRef::Path(path) => write!(f, "{}", path),
        }
    }
}

/// Normalized file record / 规范化文件记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileRecord {
    id: String,
    name: String,
    parent: ParentRef,
    md5: Option<String>,
    sha1: Option<String>,
    path: Option<String>,
}

impl FileRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>, parent: ParentRef) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            parent,
            md5: None,
            sha1: None,
            path: None,
        }
    }

    pub fn with_md5(mut self, md5: Option<String>) -> Self {
        self.md5 = md5.filter(|s| !s.is_empty());
        self
    }

    pub fn with_sha1(mut self, sha1: Option<String>) -> Self {
        self.sha1 = sha1.filter(|s| !s.is_empty());
        self
    }

    pub fn with_path(mut self, path: Option<String>) -> Self {
        self.path = path.filter(|s| !s.is_empty());
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> &ParentRef {
        &self.parent
    }

    pub fn md5(&self) -> Option<&str> {
        self.md5.as_deref()
    }

    pub fn sha1(&self) -> Option<&str> {
        self.sha1.as_deref()
    }

    pub fn path(&self) -> Option<&str> {
        self.path.as_deref()
    }
}

impl fmt::Display for FileRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "[{} ({})] Parent:{}", self.name, self.id, self.parent)?;
        writeln!(f, "Path:{}", self.path.as_deref().unwrap_or("-"))?;
        write!(
            f,
            "SHA1:{} MD5:{}",
            self.sha1.as_deref().unwrap_or("-"),
            self.md5.as_deref().unwrap_or("-")
        )
    }
}

/// Named, compiled expression / 命名正则
#[derive(Debug, Clone)]
pub struct NamedPattern {
    name: String,
    regex: Regex,
}

impl NamedPattern {
    pub fn new(name: impl Into<String>, expression: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            name: name.into(),
            regex: Regex::new(expression)?,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn regex(&self) -> &Regex {
        &self.regex
    }
}

/// Ordered set of patterns; evaluation follows declaration order / 正则集合
#[derive(Debug, Clone, Default)]
pub struct PatternSet {
    patterns: Vec<NamedPattern>,
}

impl PatternSet {
    pub fn new(patterns: Vec<NamedPattern>) -> Self {
        Self { patterns }
    }

    pub fn iter(&self) -> impl Iterator<Item = &NamedPattern> {
        self.patterns.iter()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// Hex SHA-256 of a matched substring.
pub fn fingerprint(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

/// Privacy-preserving evidence of one hit / 匹配记录（只保存哈希）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchRecord {
    digest: String,
    pattern: String,
    file: PathBuf,
    line: usize,
    start: usize,
    end: usize,
}

impl MatchRecord {
    /// `start`/`end` are character offsets of the hit inside its line.
    pub(crate) fn new(
        matched: &str,
        pattern: &str,
        file: &Path,
        line: usize,
        start: usize,
        end: usize,
    ) -> Self {
        Self {
            digest: fingerprint(matched),
            pattern: pattern.to_string(),
            file: file.to_path_buf(),
            line,
            start,
            end,
        }
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    /// 1-based line number
    pub fn line(&self) -> usize {
        self.line
    }

    /// Character offsets (not bytes) of the hit within its line
    pub fn span(&self) -> (usize, usize) {
        (self.start, self.end)
    }
}

impl fmt::Display for MatchRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}:{} [{}..{}) sha256={}",
            self.pattern,
            self.file.display(),
            self.line,
            self.start,
            self.end,
            self.digest
        )
    }
}
