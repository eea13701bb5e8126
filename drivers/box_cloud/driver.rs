//! Box 处理器实现
//!
//! 授权：直接配置 access_token，或 client_id/client_secret 走本地回调 OAuth。
//! 搜索 API 按 offset/total_count 分页；SHA1 通过 `sha1=<digest>` 搜索后逐项校验。

use std::path::Path;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;

use crate::config::ConfigSection;
use crate::error::{Result as ServiceResult, ServiceError};
use crate::models::{FileRecord, MatchRecord, ParentRef, PatternSet};
use crate::oauth::{AuthSettings, OAuthApp};
use crate::scan::{scan_units, TextExtractor};
use crate::search::paging::next_offset;
use crate::search::{
    drain_pages, fetch_matches, find_in_units, FindQuery, HashKind, Page, SearchBackend,
};
use crate::storage::{
    ConfigItem, FileConverter, FileService, SearchCapability, SearchSupport, ServiceFactory,
};
use crate::utils::basename;

const API_BASE: &str = "https://api.box.com/2.0";
const ROOT_FOLDER_ID: &str = "0";
const ITEM_FIELDS: &str = "id,type,name,sha1,parent,path_collection";
const SEARCH_PAGE_SIZE: u64 = 200;
const LIST_PAGE_SIZE: u64 = 1000;

// ============ 配置结构 ============

/// Box 配置
#[derive(Debug, Clone)]
pub struct BoxConfig {
    pub access_token: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub auth: AuthSettings,
    /// 搜索目录名，空字符串为根目录
    pub folders: Vec<String>,
    pub crawl_fallback: bool,
}

impl BoxConfig {
    pub fn from_section(section: &ConfigSection) -> ServiceResult<Self> {
        let mut reader = section.reader();
        let access_token = reader.optional("access_token");
        let client_id = reader.optional("client_id");
        let client_secret = reader.optional("client_secret");
        if access_token.is_none() && (client_id.is_none() || client_secret.is_none()) {
            reader.problem("either access_token or both client_id and client_secret are required");
        }

        let auth = AuthSettings::from_reader(&mut reader);
        let mut folders = reader.list("folders");
        if folders.is_empty() {
            folders.push(String::new());
        }
        let crawl_fallback = reader.flag("crawl_fallback", true);
        reader.finish()?;

        Ok(Self {
            access_token,
            client_id,
            client_secret,
            auth,
            folders,
            crawl_fallback,
        })
    }
}

// ============ API响应结构 ============

#[derive(Debug, Clone, Deserialize)]
pub struct BoxRef {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathCollection {
    pub entries: Vec<BoxRef>,
}

/// 文件或文件夹
#[derive(Debug, Clone, Deserialize)]
pub struct BoxItem {
    #[serde(rename = "type")]
    pub item_type: String,
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub sha1: Option<String>,
    #[serde(default)]
    pub parent: Option<BoxRef>,
    #[serde(default)]
    pub path_collection: Option<PathCollection>,
}

impl BoxItem {
    fn is_file(&self) -> bool {
        self.item_type == "file"
    }

    /// Display path below "All Files"
    fn display_path(&self) -> String {
        let mut path = String::new();
        for entry in self.path_collection.iter().flat_map(|p| p.entries.iter()) {
            if entry.id == ROOT_FOLDER_ID {
                continue;
            }
            path.push('/');
            path.push_str(entry.name.as_deref().unwrap_or(&entry.id));
        }
        path.push('/');
        path.push_str(&self.name);
        path
    }
}

/// search 和 folder items 共用的分页集合
#[derive(Debug, Deserialize)]
struct ItemCollection {
    total_count: u64,
    entries: Vec<BoxItem>,
}

// ============ 处理器主体 ============

/// Box 处理器
pub struct BoxDriver {
    config: BoxConfig,
    client: Client,
    access_token: String,
}

impl BoxDriver {
    pub fn new(config: BoxConfig, client: Client, access_token: String) -> Self {
        Self {
            config,
            client,
            access_token,
        }
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.access_token)
            .query(query)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("{} 请求失败 {}: {}", url, status, text));
        }
        Ok(response.json().await?)
    }

    /// 一页搜索结果；`ancestor` 为根目录时不限定范围
    async fn search_page(
        &self,
        text: &str,
        result_type: &str,
        ancestor: &str,
        limit: u64,
        cursor: Option<String>,
    ) -> Result<Page<BoxItem>> {
        let offset: u64 = cursor.as_deref().map(str::parse::<u64>).transpose()?.unwrap_or(0);
        let mut query = vec![
            ("query", text.to_string()),
            ("type", result_type.to_string()),
            ("limit", limit.to_string()),
            ("offset", offset.to_string()),
            ("fields", ITEM_FIELDS.to_string()),
        ];
        if ancestor != ROOT_FOLDER_ID {
            query.push(("ancestor_folder_ids", ancestor.to_string()));
        }

        let resp: ItemCollection = self.get_json(&format!("{}/search", API_BASE), &query).await?;
        let next = next_offset(offset, resp.entries.len(), resp.total_count);
        Ok(Page::new(resp.entries, next))
    }

    async fn search_files(&self, container: &str, text: &str) -> Result<Vec<BoxItem>> {
        let items = drain_pages(|cursor| {
            self.search_page(text, "file", container, SEARCH_PAGE_SIZE, cursor)
        })
        .await?;
        Ok(items.into_iter().filter(BoxItem::is_file).collect())
    }
}

#[async_trait]
impl SearchBackend for BoxDriver {
    type Item = BoxItem;

    fn service_name(&self) -> &'static str {
        "Box"
    }

    fn capability(&self) -> SearchCapability {
        SearchCapability {
            name: SearchSupport::Indexed,
            md5: SearchSupport::Unsupported,
            sha1: SearchSupport::Indexed,
        }
    }

    fn crawl_fallback(&self) -> bool {
        self.config.crawl_fallback
    }

    fn search_units(&self) -> Vec<String> {
        self.config.folders.clone()
    }

    /// Folder name → id through a folder search; root and numeric ids pass through.
    async fn resolve_unit(&self, unit: &str) -> Result<String> {
        let name = basename(unit);
        if name.is_empty() {
            return Ok(ROOT_FOLDER_ID.to_string());
        }
        if name.chars().all(|c| c.is_ascii_digit()) {
            return Ok(name.to_string());
        }

        let page = self.search_page(name, "folder", ROOT_FOLDER_ID, 20, None).await?;
        let folder = page
            .items
            .iter()
            .find(|f| f.name.eq_ignore_ascii_case(name))
            .or_else(|| page.items.first())
            .ok_or_else(|| anyhow!("folder {:?} not found", unit))?;
        tracing::debug!("Box folder {:?} resolved to {}", unit, folder.id);
        Ok(folder.id.clone())
    }

    async fn lookup_name(&self, container: &str, name: &str) -> Result<Vec<BoxItem>> {
        self.search_files(container, name).await
    }

    async fn search_hash(
        &self,
        container: &str,
        kind: HashKind,
        digest: &str,
    ) -> Result<Vec<BoxItem>> {
        match kind {
            HashKind::Sha1 => self.search_files(container, &format!("sha1={}", digest)).await,
            HashKind::Md5 => Err(anyhow!("Box has no md5 search")),
        }
    }

    async fn list_page(&self, container: &str, cursor: Option<String>) -> Result<Page<BoxItem>> {
        let offset: u64 = cursor.as_deref().map(str::parse::<u64>).transpose()?.unwrap_or(0);
        let query = [
            ("limit", LIST_PAGE_SIZE.to_string()),
            ("offset", offset.to_string()),
            ("fields", ITEM_FIELDS.to_string()),
        ];
        let resp: ItemCollection = self
            .get_json(&format!("{}/folders/{}/items", API_BASE, container), &query)
            .await?;

        let next = next_offset(offset, resp.entries.len(), resp.total_count);
        let (files, folders): (Vec<BoxItem>, Vec<BoxItem>) =
            resp.entries.into_iter().partition(BoxItem::is_file);
        let children = folders
            .into_iter()
            .filter(|f| f.item_type == "folder")
            .map(|f| f.id)
            .collect();
        Ok(Page::new(files, next).with_children(children))
    }

    async fn download(&self, item: &BoxItem, dest: &Path) -> Result<()> {
        let mut response = self
            .client
            .get(format!("{}/files/{}/content", API_BASE, item.id))
            .bearer_auth(&self.access_token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!("下载失败 {}: {}", item.display_path(), response.status()));
        }

        let mut file = tokio::fs::File::create(dest).await?;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(())
    }

    fn item_id(&self, item: &BoxItem) -> String {
        item.id.clone()
    }

    fn item_path(&self, item: &BoxItem) -> String {
        item.display_path()
    }

    fn item_digest(&self, item: &BoxItem, kind: HashKind) -> Option<String> {
        match kind {
            HashKind::Sha1 => item.sha1.clone(),
            HashKind::Md5 => None,
        }
    }
}

impl FileConverter for BoxDriver {
    type Native = BoxItem;

    fn convert_file(&self, item: &BoxItem) -> FileRecord {
        let parent = item
            .parent
            .as_ref()
            .map(|p| ParentRef::Id(p.id.clone()))
            .unwrap_or(ParentRef::None);
        FileRecord::new(item.id.clone(), item.name.clone(), parent)
            .with_sha1(item.sha1.clone())
            .with_path(Some(item.display_path()))
    }
}

#[async_trait]
impl FileService for BoxDriver {
    fn service_type(&self) -> &'static str {
        self.service_name()
    }

    fn capability(&self) -> SearchCapability {
        SearchBackend::capability(self)
    }

    async fn find_file(&self, query: &FindQuery) -> ServiceResult<Vec<FileRecord>> {
        let items = find_in_units(self, query).await?;
        Ok(self.convert_files(&items))
    }

    async fn get_file(
        &self,
        query: &FindQuery,
        dest_dir: &Path,
    ) -> ServiceResult<Vec<std::path::PathBuf>> {
        fetch_matches(self, query, dest_dir).await
    }

    async fn scan_with(
        &self,
        temp_dir: &Path,
        patterns: &PatternSet,
        extractor: &dyn TextExtractor,
    ) -> ServiceResult<Vec<MatchRecord>> {
        scan_units(self, temp_dir, patterns, extractor).await
    }
}

// ============ 工厂 ============

/// Box 处理器工厂
pub struct BoxServiceFactory;

#[async_trait]
impl ServiceFactory for BoxServiceFactory {
    fn service_type(&self) -> &'static str {
        "Box"
    }

    fn additional_items(&self) -> Vec<ConfigItem> {
        let mut items = vec![
            ConfigItem::new("access_token", "password")
                .help("Developer token; skips the browser authorization"),
            ConfigItem::new("client_id", "string")
                .help("OAuth client id for the browser authorization"),
            ConfigItem::new("client_secret", "password")
                .help("OAuth client secret for the browser authorization"),
            ConfigItem::new("folders", "string")
                .default("/")
                .help("Folder names to search, separated by `;` (`/` is the root)"),
        ];
        items.extend(AuthSettings::config_items());
        items
    }

    async fn create_service(&self, section: &ConfigSection) -> ServiceResult<Box<dyn FileService>> {
        let config = BoxConfig::from_section(section)?;
        let client = Client::new();

        let access_token = match &config.access_token {
            Some(token) => token.clone(),
            None => {
                let app = OAuthApp::box_app(
                    config.client_id.clone().unwrap_or_default(),
                    config.client_secret.clone().unwrap_or_default(),
                );
                app.authorize_interactive(&client, &config.auth)
                    .await?
                    .access_token
                    .ok_or_else(|| {
                        ServiceError::Authorization("Box returned no access_token".to_string())
                    })?
            }
        };

        Ok(Box::new(BoxDriver::new(config, client, access_token)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SEARCH_BODY: &str = r#"{
        "total_count": 450, "limit": 200, "offset": 0,
        "entries": [
            {"type": "file", "id": "12345", "name": "contract.pdf",
             "sha1": "85136C79CBF9FE36BB9D05D0639C70C265C18D37",
             "parent": {"type": "folder", "id": "11446498", "name": "Legal"},
             "path_collection": {"total_count": 2, "entries": [
                 {"type": "folder", "id": "0", "name": "All Files"},
                 {"type": "folder", "id": "11446498", "name": "Legal"}
             ]}},
            {"type": "folder", "id": "777", "name": "Archive"}
        ]
    }"#;

    fn driver() -> BoxDriver {
        let section = ConfigSection::new("Box", [("access_token", "t"), ("folders", "Legal;/")]);
        BoxDriver::new(BoxConfig::from_section(&section).unwrap(), Client::new(), "t".to_string())
    }

    #[test]
    fn test_config_requires_some_credentials() {
        let section = ConfigSection::new("Box", [("client_id", "abc"), ("local_auth_port", "x")]);
        match BoxConfig::from_section(&section) {
            Err(ServiceError::Configuration { problems, .. }) => {
                assert_eq!(problems.len(), 2);
                assert!(problems[0].contains("access_token"));
                assert!(problems[1].contains("local_auth_port"));
            }
            other => panic!("expected configuration error, got {:?}", other.map(|_| ())),
        }

        let section = ConfigSection::new("Box", [("client_id", "abc"), ("client_secret", "def")]);
        let config = BoxConfig::from_section(&section).unwrap();
        assert!(config.access_token.is_none());
        assert_eq!(config.folders, vec![String::new()]);
        assert_eq!(config.auth.redirect_uri(), "http://localhost:8080/");
    }

    #[test]
    fn test_parse_search_and_convert() {
        let resp: ItemCollection = serde_json::from_str(SEARCH_BODY).unwrap();
        assert_eq!(resp.total_count, 450);
        assert_eq!(next_offset(0, resp.entries.len(), resp.total_count), Some("2".to_string()));

        let file = &resp.entries[0];
        assert!(file.is_file());
        assert!(!resp.entries[1].is_file());
        assert_eq!(file.display_path(), "/Legal/contract.pdf");

        let driver = driver();
        let record = driver.convert_file(file);
        assert_eq!(record.id(), "12345");
        assert_eq!(record.parent(), &ParentRef::Id("11446498".into()));
        assert_eq!(record.sha1(), Some("85136C79CBF9FE36BB9D05D0639C70C265C18D37"));
        assert_eq!(record.md5(), None);
        assert_eq!(
            driver.item_digest(file, HashKind::Sha1).as_deref(),
            Some("85136C79CBF9FE36BB9D05D0639C70C265C18D37")
        );
    }

    #[tokio::test]
    async fn test_root_and_id_units_resolve_locally() {
        let driver = driver();
        assert_eq!(driver.search_units(), vec!["Legal".to_string(), String::new()]);
        assert_eq!(driver.resolve_unit("").await.unwrap(), "0");
        assert_eq!(driver.resolve_unit("/Shared/11446498").await.unwrap(), "11446498");
    }

    #[tokio::test]
    async fn test_md5_only_query_is_refused() {
        let err = FileService::find_file(&driver(), &FindQuery::new().md5("abc"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::UnsupportedOperation { .. }));
    }
}
