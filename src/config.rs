//! Run configuration / 运行配置
//!
//! Loaded from a JSON document (default `cloud.json`). Every top-level key is a
//! section holding a flat string map:
//!
//! ```json
//! {
//!     "AmazonS3": { "region": "us-east-1", "buckets": "logs;exports" },
//!     "regex":    { "ssn": "\\d{3}-\\d{2}-\\d{4}" },
//!     "scanner":  { "temp_dir": "/tmp/cloudsleuth" }
//! }
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde_json::Value;

use crate::error::{Result, ServiceError};
use crate::models::{NamedPattern, PatternSet};
use crate::utils::split_list;

pub const REGEX_SECTION: &str = "regex";
pub const SCANNER_SECTION: &str = "scanner";

const DEFAULT_MAX_FILE_SIZE: u64 = 64 * 1024 * 1024;

/// One flat configuration section / 配置段
#[derive(Debug, Clone, Default)]
pub struct ConfigSection {
    name: String,
    values: Vec<(String, String)>,
}

impl ConfigSection {
    pub fn new<K, V>(name: &str, values: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            name: name.to_string(),
            values: values.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    fn from_json(name: &str, value: &Value) -> Result<Self> {
        let object = value.as_object().ok_or_else(|| ServiceError::Configuration {
            section: name.to_string(),
            problems: vec!["section must be an object of key/value pairs".to_string()],
        })?;

        let mut values = Vec::with_capacity(object.len());
        let mut problems = Vec::new();
        for (key, v) in object {
            match v {
                Value::String(s) => values.push((key.clone(), s.clone())),
                Value::Bool(b) => values.push((key.clone(), b.to_string())),
                Value::Number(n) => values.push((key.clone(), n.to_string())),
                Value::Null => {}
                _ => problems.push(format!("{}: value must be a string", key)),
            }
        }

        if !problems.is_empty() {
            return Err(ServiceError::Configuration {
                section: name.to_string(),
                problems,
            });
        }
        Ok(Self {
            name: name.to_string(),
            values,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Raw value; keys compare case-insensitively, blank values count as absent.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.trim())
            .filter(|v| !v.is_empty())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn reader(&self) -> SectionReader<'_> {
        SectionReader {
            section: self,
            problems: Vec::new(),
        }
    }
}

/// Single-pass validator: collects every problem, reports them together / 一次性校验
pub struct SectionReader<'a> {
    section: &'a ConfigSection,
    problems: Vec<String>,
}

impl<'a> SectionReader<'a> {
    pub fn required(&mut self, key: &str) -> String {
        match self.section.get(key) {
            Some(v) => v.to_string(),
            None => {
                self.problems.push(format!("missing key: {}", key));
                String::new()
            }
        }
    }

    pub fn optional(&self, key: &str) -> Option<String> {
        self.section.get(key).map(str::to_string)
    }

    pub fn string_or(&self, key: &str, default: &str) -> String {
        self.optional(key).unwrap_or_else(|| default.to_string())
    }

    pub fn flag(&mut self, key: &str, default: bool) -> bool {
        match self.section.get(key) {
            None => default,
            Some(v) => match v.to_ascii_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => true,
                "false" | "no" | "off" | "0" => false,
                _ => {
                    self.problems.push(format!("{}: expected true/false, got {:?}", key, v));
                    default
                }
            },
        }
    }

    pub fn number<T: FromStr>(&mut self, key: &str, default: T) -> T {
        match self.section.get(key) {
            None => default,
            Some(v) => v.parse().unwrap_or_else(|_| {
                self.problems.push(format!("{}: expected a number, got {:?}", key, v));
                default
            }),
        }
    }

    /// `;`-separated container list; `/` denotes the root.
    pub fn list(&self, key: &str) -> Vec<String> {
        self.section.get(key).map(split_list).unwrap_or_default()
    }

    /// Record a problem the caller detected itself.
    pub fn problem(&mut self, message: impl Into<String>) {
        self.problems.push(message.into());
    }

    pub fn finish(self) -> Result<()> {
        if self.problems.is_empty() {
            Ok(())
        } else {
            Err(ServiceError::Configuration {
                section: self.section.name.clone(),
                problems: self.problems,
            })
        }
    }
}

/// Scanner settings / 扫描器设置
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    pub temp_dir: PathBuf,
    pub max_file_size: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            temp_dir: default_temp_dir(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
        }
    }
}

/// Directory of the running executable, falling back to the working directory.
fn default_temp_dir() -> PathBuf {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Whole configuration document / 完整配置文档
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    sections: Vec<ConfigSection>,
}

impl AppConfig {
    pub fn from_sections(sections: Vec<ConfigSection>) -> Self {
        Self { sections }
    }

    pub fn parse(content: &str) -> Result<Self> {
        let root: Value = serde_json::from_str(content).map_err(|e| ServiceError::Configuration {
            section: "<document>".to_string(),
            problems: vec![format!("invalid JSON: {}", e)],
        })?;
        let object = root.as_object().ok_or_else(|| ServiceError::Configuration {
            section: "<document>".to_string(),
            problems: vec!["top level must be an object of sections".to_string()],
        })?;

        let sections = object
            .iter()
            .map(|(name, value)| ConfigSection::from_json(name, value))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { sections })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ServiceError::Configuration {
            section: "<document>".to_string(),
            problems: vec![format!("cannot read {}: {}", path.display(), e)],
        })?;
        let config = Self::parse(&content)?;
        tracing::info!("Loaded configuration from {:?} ({} sections)", path, config.sections.len());
        Ok(config)
    }

    pub fn section(&self, name: &str) -> Option<&ConfigSection> {
        self.sections.iter().find(|s| s.name.eq_ignore_ascii_case(name))
    }

    /// Section bound to a service type; its absence is a configuration error.
    pub fn service_section(&self, service_type: &str) -> Result<&ConfigSection> {
        self.section(service_type).ok_or_else(|| ServiceError::Configuration {
            section: service_type.to_string(),
            problems: vec!["section not found in configuration".to_string()],
        })
    }

    /// Patterns from the `regex` section; `None` disables scanning.
    pub fn patterns(&self) -> Result<Option<PatternSet>> {
        let Some(section) = self.section(REGEX_SECTION) else {
            return Ok(None);
        };

        let mut patterns = Vec::new();
        let mut problems = Vec::new();
        for (name, expression) in section.iter() {
            match NamedPattern::new(name, expression) {
                Ok(p) => patterns.push(p),
                Err(e) => problems.push(format!("{}: {}", name, e)),
            }
        }

        if !problems.is_empty() {
            return Err(ServiceError::Configuration {
                section: section.name().to_string(),
                problems,
            });
        }
        if patterns.is_empty() {
            return Ok(None);
        }
        Ok(Some(PatternSet::new(patterns)))
    }

    pub fn scanner(&self) -> Result<ScannerConfig> {
        let Some(section) = self.section(SCANNER_SECTION) else {
            return Ok(ScannerConfig::default());
        };

        let mut reader = section.reader();
        let temp_dir = reader
            .optional("temp_dir")
            .map(PathBuf::from)
            .unwrap_or_else(default_temp_dir);
        let max_file_size = reader.number("max_file_size", DEFAULT_MAX_FILE_SIZE);
        reader.finish()?;

        Ok(ScannerConfig {
            temp_dir,
            max_file_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "AmazonS3": {
            "region": "us-east-1", "buckets": "a;;b;/", "crawl_fallback": false, "port": 9000
        },
        "regex": { "ssn": "\\d{3}-\\d{2}-\\d{4}", "email": "[\\w.]+@[\\w.]+" },
        "scanner": { "temp_dir": "/tmp/sleuth" }
    }"#;

    #[test]
    fn test_parse_sections() {
        let config = AppConfig::parse(SAMPLE).unwrap();
        let s3 = config.service_section("amazons3").unwrap();
        assert_eq!(s3.get("REGION"), Some("us-east-1"));
        assert_eq!(s3.get("crawl_fallback"), Some("false"));
        assert_eq!(s3.get("port"), Some("9000"));
        assert_eq!(s3.reader().list("buckets"), vec!["a", "b", ""]);
        assert!(config.service_section("Dropbox").is_err());
    }

    #[test]
    fn test_patterns_keep_declaration_order() {
        let config = AppConfig::parse(SAMPLE).unwrap();
        let patterns = config.patterns().unwrap().unwrap();
        let names: Vec<_> = patterns.iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["ssn", "email"]);
    }

    #[test]
    fn test_missing_regex_section_disables_scan() {
        let config = AppConfig::parse(r#"{ "Dropbox": { "access_token": "t" } }"#).unwrap();
        assert!(config.patterns().unwrap().is_none());
        let scanner = config.scanner().unwrap();
        assert_eq!(scanner.max_file_size, DEFAULT_MAX_FILE_SIZE);
    }

    #[test]
    fn test_invalid_patterns_reported_together() {
        let config = AppConfig::parse(r#"{ "regex": { "a": "(", "b": "ok", "c": "[" } }"#).unwrap();
        match config.patterns() {
            Err(ServiceError::Configuration { section, problems }) => {
                assert_eq!(section, "regex");
                assert_eq!(problems.len(), 2);
                assert!(problems[0].starts_with("a:"));
                assert!(problems[1].starts_with("c:"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_reader_collects_all_problems() {
        let section =
            ConfigSection::new("Box", [("crawl_fallback", "maybe"), ("local_auth_port", "x")]);
        let mut reader = section.reader();
        reader.required("client_id");
        reader.required("client_secret");
        assert!(reader.flag("crawl_fallback", true));
        assert_eq!(reader.number::<u16>("local_auth_port", 8080), 8080);
        match reader.finish() {
            Err(ServiceError::Configuration { problems, .. }) => assert_eq!(problems.len(), 4),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_scanner_section() {
        let config = AppConfig::parse(SAMPLE).unwrap();
        assert_eq!(config.scanner().unwrap().temp_dir, PathBuf::from("/tmp/sleuth"));
    }
}
