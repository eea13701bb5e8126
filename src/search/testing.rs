//! In-memory backend used by the engine and pipeline tests.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use super::{HashKind, Page, SearchBackend};
use crate::storage::{SearchCapability, SearchSupport};
use crate::utils::basename;

#[derive(Debug, Clone)]
pub struct FakeItem {
    pub id: String,
    pub path: String,
    pub md5: Option<String>,
    pub sha1: Option<String>,
    pub content: String,
    pub broken_download: bool,
}

impl FakeItem {
    pub fn new(id: &str, path: &str) -> Self {
        Self {
            id: id.to_string(),
            path: path.to_string(),
            md5: None,
            sha1: None,
            content: String::new(),
            broken_download: false,
        }
    }

    pub fn md5(mut self, md5: &str) -> Self {
        self.md5 = Some(md5.to_string());
        self
    }

    pub fn sha1(mut self, sha1: &str) -> Self {
        self.sha1 = Some(sha1.to_string());
        self
    }

    pub fn content(mut self, content: &str) -> Self {
        self.content = content.to_string();
        self
    }

    /// Writes its content, then reports a failed transfer.
    pub fn broken_download(mut self) -> Self {
        self.broken_download = true;
        self
    }
}

pub struct FakeBackend {
    page_size: usize,
    units: Vec<String>,
    files: HashMap<String, Vec<FakeItem>>,
    folders: HashMap<String, Vec<String>>,
    failing: HashSet<String>,
    capability: SearchCapability,
    crawl_fallback: bool,
    requests: AtomicUsize,
    lookups: AtomicUsize,
}

impl FakeBackend {
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size,
            units: Vec::new(),
            files: HashMap::new(),
            folders: HashMap::new(),
            failing: HashSet::new(),
            capability: SearchCapability {
                name: SearchSupport::Indexed,
                md5: SearchSupport::Crawl,
                sha1: SearchSupport::Indexed,
            },
            crawl_fallback: true,
            requests: AtomicUsize::new(0),
            lookups: AtomicUsize::new(0),
        }
    }

    pub fn unit(mut self, unit: &str) -> Self {
        self.units.push(unit.to_string());
        self
    }

    pub fn file(mut self, container: &str, item: FakeItem) -> Self {
        self.files.entry(container.to_string()).or_default().push(item);
        self
    }

    pub fn folder(mut self, parent: &str, child: &str) -> Self {
        self.folders.entry(parent.to_string()).or_default().push(child.to_string());
        self
    }

    pub fn failing(mut self, container: &str) -> Self {
        self.failing.insert(container.to_string());
        self
    }

    pub fn capability(mut self, capability: SearchCapability) -> Self {
        self.capability = capability;
        self
    }

    pub fn crawl_fallback(mut self, enabled: bool) -> Self {
        self.crawl_fallback = enabled;
        self
    }

    /// Crawl page requests issued so far
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    fn tree(&self, container: &str) -> Vec<&FakeItem> {
        let mut out: Vec<&FakeItem> = self
            .files
            .get(container)
            .map(|v| v.iter().collect())
            .unwrap_or_default();
        for child in self.folders.get(container).into_iter().flatten() {
            out.extend(self.tree(child));
        }
        out
    }
}

#[async_trait]
impl SearchBackend for FakeBackend {
    type Item = FakeItem;

    fn service_name(&self) -> &'static str {
        "Fake"
    }

    fn capability(&self) -> SearchCapability {
        self.capability
    }

    fn crawl_fallback(&self) -> bool {
        self.crawl_fallback
    }

    fn search_units(&self) -> Vec<String> {
        if self.units.is_empty() {
            vec!["root".to_string()]
        } else {
            self.units.clone()
        }
    }

    async fn lookup_name(&self, container: &str, name: &str) -> Result<Vec<FakeItem>> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(container) {
            return Err(anyhow!("lookup failed in {}", container));
        }
        Ok(self
            .files
            .get(container)
            .map(|v| v.iter().filter(|i| basename(&i.path) == name).cloned().collect())
            .unwrap_or_default())
    }

    async fn search_hash(
        &self,
        container: &str,
        kind: HashKind,
        digest: &str,
    ) -> Result<Vec<FakeItem>> {
        Ok(self
            .tree(container)
            .into_iter()
            .filter(|i| {
                let value = match kind {
                    HashKind::Md5 => &i.md5,
                    HashKind::Sha1 => &i.sha1,
                };
                value.as_deref().map(|v| v.eq_ignore_ascii_case(digest)).unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    async fn list_page(&self, container: &str, cursor: Option<String>) -> Result<Page<FakeItem>> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(container) {
            return Err(anyhow!("listing failed in {}", container));
        }

        let files = self.files.get(container).cloned().unwrap_or_default();
        let start: usize = cursor.as_deref().map(str::parse::<usize>).transpose()?.unwrap_or(0);
        let end = (start + self.page_size).min(files.len());
        let next = if end < files.len() { Some(end.to_string()) } else { None };

        let mut page = Page::new(files[start..end].to_vec(), next);
        if start == 0 {
            page = page.with_children(self.folders.get(container).cloned().unwrap_or_default());
        }
        Ok(page)
    }

    async fn download(&self, item: &FakeItem, dest: &Path) -> Result<()> {
        tokio::fs::write(dest, item.content.as_bytes()).await?;
        if item.broken_download {
            return Err(anyhow!("connection dropped while downloading {}", item.id));
        }
        Ok(())
    }

    fn item_id(&self, item: &FakeItem) -> String {
        item.id.clone()
    }

    fn item_path(&self, item: &FakeItem) -> String {
        item.path.clone()
    }

    fn item_digest(&self, item: &FakeItem, kind: HashKind) -> Option<String> {
        match kind {
            HashKind::Md5 => item.md5.clone(),
            HashKind::Sha1 => item.sha1.clone(),
        }
    }
}
