use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ServiceError};
use crate::models::{FileRecord, MatchRecord, PatternSet};
use crate::scan::{PlainTextExtractor, TextExtractor};
use crate::search::{FindQuery, HashKind};

/// Configuration key definition (shown by `--help`) / 配置项定义
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigItem {
    pub name: String,
    #[serde(rename = "type")]
    pub item_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub help: Option<String>,
}

impl ConfigItem {
    pub fn new(name: &str, item_type: &str) -> Self {
        Self {
            name: name.to_string(),
            item_type: item_type.to_string(),
            default: None,
            required: false,
            help: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn default(mut self, val: &str) -> Self {
        self.default = Some(val.to_string());
        self
    }

    pub fn help(mut self, val: &str) -> Self {
        self.help = Some(val.to_string());
        self
    }
}

/// Keys every handler understands / 通用配置项
pub fn get_common_items() -> Vec<ConfigItem> {
    vec![
        ConfigItem::new("crawl_fallback", "bool")
            .default("true")
            .help("Crawl containers when the provider's own search finds nothing"),
    ]
}

/// How a provider can answer one search criterion / 搜索方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchSupport {
    /// Provider-side index answers the query directly
    Indexed,
    /// Only by walking every object, O(total objects)
    Crawl,
    Unsupported,
}

/// Handler search capability declaration / 搜索能力声明
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchCapability {
    pub name: SearchSupport,
    pub md5: SearchSupport,
    pub sha1: SearchSupport,
}

impl SearchCapability {
    pub fn hash(&self, kind: HashKind) -> SearchSupport {
        match kind {
            HashKind::Md5 => self.md5,
            HashKind::Sha1 => self.sha1,
        }
    }

    /// True when at least one digest kind is answered by an index.
    pub fn supports_indexed_hash_search(&self) -> bool {
        self.md5 == SearchSupport::Indexed || self.sha1 == SearchSupport::Indexed
    }
}

/// Convert provider-native items into normalized records / 原生条目转换
pub trait FileConverter {
    type Native;

    fn convert_file(&self, item: &Self::Native) -> FileRecord;

    fn convert_files(&self, items: &[Self::Native]) -> Vec<FileRecord> {
        items.iter().map(|item| self.convert_file(item)).collect()
    }
}

/// File service interface every backend handler implements / 文件服务接口
#[async_trait]
pub trait FileService: Send + Sync {
    /// Stable type name, compared case-insensitively / 服务类型
    fn service_type(&self) -> &'static str;

    fn capability(&self) -> SearchCapability;

    /// Find files by name and/or digest across all configured containers.
    async fn find_file(&self, query: &FindQuery) -> Result<Vec<FileRecord>>;

    /// Find and download matches into `dest_dir`. Optional for handlers.
    async fn get_file(&self, query: &FindQuery, dest_dir: &Path) -> Result<Vec<PathBuf>> {
        let _ = (query, dest_dir);
        Err(ServiceError::not_implemented(self.service_type(), "get_file"))
    }

    /// Scan the content of every reachable file against `patterns`.
    async fn scan_files(&self, temp_dir: &Path, patterns: &PatternSet) -> Result<Vec<MatchRecord>> {
        self.scan_with(temp_dir, patterns, &PlainTextExtractor::default()).await
    }

    /// `scan_files` with an explicit text extractor.
    async fn scan_with(
        &self,
        temp_dir: &Path,
        patterns: &PatternSet,
        extractor: &dyn TextExtractor,
    ) -> Result<Vec<MatchRecord>>;
}

pub mod manager;

pub use manager::{ServiceFactory, ServiceRegistry};
