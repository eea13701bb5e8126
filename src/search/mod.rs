//! Search / fallback engine / 搜索与回退引擎
//!
//! Handlers only expose provider primitives (`SearchBackend`); the cascade
//! name → indexed hash → crawl, pagination and duplicate-work avoidance live
//! here and are shared by every handler.

use std::fmt;
use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;

use crate::error::ServiceError;
use crate::storage::SearchCapability;
use crate::utils::normalize_digest;

pub mod engine;
pub mod paging;
pub mod walker;

pub use engine::{fetch_matches, find_in_units};
pub use paging::{drain_pages, Page};
pub use walker::ContainerWalker;

/// Digest kinds a query can carry / 哈希类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashKind {
    Md5,
    Sha1,
}

impl fmt::Display for HashKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashKind::Md5 => write!(f, "md5"),
            HashKind::Sha1 => write!(f, "sha1"),
        }
    }
}

/// Search criteria / 搜索条件
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FindQuery {
    pub name: Option<String>,
    pub md5: Option<String>,
    pub sha1: Option<String>,
    /// Stop at the first hit instead of returning every match
    pub first_only: bool,
}

impl FindQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn md5(mut self, md5: impl Into<String>) -> Self {
        self.md5 = Some(md5.into());
        self
    }

    pub fn sha1(mut self, sha1: impl Into<String>) -> Self {
        self.sha1 = Some(sha1.into());
        self
    }

    pub fn first_only(mut self, first_only: bool) -> Self {
        self.first_only = first_only;
        self
    }

    pub fn name_criterion(&self) -> Option<&str> {
        self.name.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    /// Requested digests, lowercased, in cascade order (md5 then sha1).
    pub fn hashes(&self) -> Vec<(HashKind, String)> {
        [(HashKind::Md5, &self.md5), (HashKind::Sha1, &self.sha1)]
            .into_iter()
            .filter_map(|(kind, value)| {
                value
                    .as_deref()
                    .map(normalize_digest)
                    .filter(|d| !d.is_empty())
                    .map(|d| (kind, d))
            })
            .collect()
    }

    pub fn validate(&self) -> Result<(), ServiceError> {
        if self.name_criterion().is_none() && self.hashes().is_empty() {
            return Err(ServiceError::InvalidArgument(
                "at least one of name, md5 or sha1 is required".to_string(),
            ));
        }
        Ok(())
    }
}

/// Provider primitives driven by the shared engine / 后端原语
#[async_trait]
pub trait SearchBackend: Send + Sync {
    type Item: Send + Sync;

    fn service_name(&self) -> &'static str;

    fn capability(&self) -> SearchCapability;

    /// Crawl a container when the provider lookup reports "not found".
    fn crawl_fallback(&self) -> bool;

    /// Configured search units (buckets, folders) / 搜索单元
    fn search_units(&self) -> Vec<String>;

    /// Map a configured unit to the container id used by `list_page`.
    async fn resolve_unit(&self, unit: &str) -> Result<String> {
        Ok(unit.to_string())
    }

    /// Cheapest provider lookup by name; "not found" is an empty list.
    async fn lookup_name(&self, container: &str, name: &str) -> Result<Vec<Self::Item>>;

    /// Provider-indexed digest search, only called for `SearchSupport::Indexed`.
    async fn search_hash(
        &self,
        container: &str,
        kind: HashKind,
        digest: &str,
    ) -> Result<Vec<Self::Item>> {
        let _ = (container, digest);
        Err(anyhow::anyhow!("{} has no indexed {} search", self.service_name(), kind))
    }

    /// One crawl page of a container / 列出一页
    async fn list_page(&self, container: &str, cursor: Option<String>) -> Result<Page<Self::Item>>;

    /// Copy one item to a local file.
    async fn download(&self, item: &Self::Item, dest: &Path) -> Result<()>;

    fn item_id(&self, item: &Self::Item) -> String;

    /// Display path, compared by the name crawl.
    fn item_path(&self, item: &Self::Item) -> String;

    fn item_digest(&self, item: &Self::Item, kind: HashKind) -> Option<String>;
}

#[cfg(test)]
pub(crate) mod testing;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_query_is_invalid() {
        assert!(matches!(
            FindQuery::new().validate(),
            Err(ServiceError::InvalidArgument(_))
        ));
        assert!(FindQuery::new().name("  ").md5("").validate().is_err());
        assert!(FindQuery::new().sha1("AB").validate().is_ok());
    }

    #[test]
    fn test_hashes_are_lowercased_in_order() {
        let q = FindQuery::new().sha1("FF4B").md5("\"CFB1\"");
        assert_eq!(
            q.hashes(),
            vec![(HashKind::Md5, "cfb1".to_string()), (HashKind::Sha1, "ff4b".to_string())]
        );
    }
}
