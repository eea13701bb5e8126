//! Google Drive 处理器实现
//!
//! 支持 OAuth refresh_token 授权，缺少 refresh_token 时走本地回调授权。
//! 名称搜索使用 `name contains`；MD5 只能遍历比较 md5Checksum；不支持 SHA1。

use std::path::Path;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use crate::config::ConfigSection;
use crate::error::{Result as ServiceResult, ServiceError};
use crate::models::{FileRecord, MatchRecord, ParentRef, PatternSet};
use crate::oauth::{AuthSettings, OAuthApp};
use crate::scan::{scan_units, TextExtractor};
use crate::search::{
    drain_pages, fetch_matches, find_in_units, FindQuery, HashKind, Page, SearchBackend,
};
use crate::storage::{
    ConfigItem, FileConverter, FileService, SearchCapability, SearchSupport, ServiceFactory,
};

// ============ 常量 ============

const FILES_URL: &str = "https://www.googleapis.com/drive/v3/files";
const FILES_LIST_FIELDS: &str = "nextPageToken,files(id,name,mimeType,size,md5Checksum,parents)";
const FOLDER_MIME: &str = "application/vnd.google-apps.folder";
const ROOT_ID: &str = "root";

// ============ 配置结构 ============

/// Google Drive 配置
#[derive(Debug, Clone)]
pub struct GoogleDriveConfig {
    /// 客户端ID
    pub client_id: String,
    /// 客户端密钥
    pub client_secret: String,
    /// 刷新令牌，缺省时走交互式授权
    pub refresh_token: Option<String>,
    pub auth: AuthSettings,
    /// 搜索目录ID，默认为root
    pub folders: Vec<String>,
    pub crawl_fallback: bool,
}

impl GoogleDriveConfig {
    pub fn from_section(section: &ConfigSection) -> ServiceResult<Self> {
        let mut reader = section.reader();
        let client_id = reader.required("client_id");
        let client_secret = reader.required("client_secret");
        let refresh_token = reader.optional("refresh_token");
        let auth = AuthSettings::from_reader(&mut reader);
        let mut folders: Vec<String> = reader
            .list("folders")
            .into_iter()
            .map(|f| if f.is_empty() { ROOT_ID.to_string() } else { f })
            .collect();
        if folders.is_empty() {
            folders.push(ROOT_ID.to_string());
        }
        let crawl_fallback = reader.flag("crawl_fallback", true);
        reader.finish()?;

        Ok(Self {
            client_id,
            client_secret,
            refresh_token,
            auth,
            folders,
            crawl_fallback,
        })
    }
}

// ============ API响应结构 ============

/// 文件列表响应
#[derive(Debug, Deserialize)]
struct FilesResponse {
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
    #[serde(default)]
    files: Vec<GoogleFile>,
}

/// Google Drive文件
#[derive(Debug, Clone, Deserialize)]
pub struct GoogleFile {
    pub id: String,
    pub name: String,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    #[serde(rename = "md5Checksum")]
    pub md5_checksum: Option<String>,
    #[serde(default)]
    pub parents: Vec<String>,
    pub size: Option<String>,
}

impl GoogleFile {
    fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME
    }
}

/// Google 文档没有二进制内容，只能导出；返回导出格式
fn export_mime(mime_type: &str) -> Option<&'static str> {
    match mime_type {
        "application/vnd.google-apps.document" => Some("text/plain"),
        "application/vnd.google-apps.spreadsheet" => Some("text/csv"),
        "application/vnd.google-apps.presentation" => Some("text/plain"),
        _ => None,
    }
}

/// 查询字符串中的单引号和反斜杠需要转义
fn quote(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

// ============ 处理器主体 ============

/// Google Drive 处理器
pub struct GoogleDriveDriver {
    config: GoogleDriveConfig,
    client: Client,
    app: OAuthApp,
    access_token: RwLock<Option<String>>,
    refresh_token: String,
}

impl GoogleDriveDriver {
    /// 创建新的处理器实例
    pub fn new(
        config: GoogleDriveConfig,
        client: Client,
        refresh_token: String,
        access_token: Option<String>,
    ) -> Self {
        let app = OAuthApp::google(config.client_id.clone(), config.client_secret.clone());
        Self {
            config,
            client,
            app,
            access_token: RwLock::new(access_token),
            refresh_token,
        }
    }

    /// 获取访问令牌
    async fn get_access_token(&self) -> Result<String> {
        {
            let token = self.access_token.read().await;
            if let Some(ref t) = *token {
                return Ok(t.clone());
            }
        }
        self.do_refresh_token().await
    }

    /// 刷新访问令牌
    async fn do_refresh_token(&self) -> Result<String> {
        let token = self.app.refresh(&self.client, &self.refresh_token).await?;
        let access_token = token
            .access_token
            .ok_or_else(|| anyhow!("Token刷新失败: 响应中没有access_token"))?;
        *self.access_token.write().await = Some(access_token.clone());
        Ok(access_token)
    }

    /// 发起GET请求，401时刷新令牌后重试一次
    async fn request(&self, url: &str, query: &[(&str, String)]) -> Result<reqwest::Response> {
        let token = self.get_access_token().await?;
        let response = self.client.get(url).bearer_auth(&token).query(query).send().await?;

        if response.status() == 401 {
            // Token过期，刷新后重试
            *self.access_token.write().await = None;
            let new_token = self.do_refresh_token().await?;
            return Ok(self.client.get(url).bearer_auth(&new_token).query(query).send().await?);
        }

        Ok(response)
    }

    /// 一页 files.list 结果
    async fn list_files(&self, q: &str, cursor: Option<String>) -> Result<FilesResponse> {
        let mut query = vec![
            ("q", q.to_string()),
            ("fields", FILES_LIST_FIELDS.to_string()),
            ("pageSize", "1000".to_string()),
            ("spaces", "drive".to_string()),
            ("includeItemsFromAllDrives", "true".to_string()),
            ("supportsAllDrives", "true".to_string()),
        ];
        if let Some(token) = cursor {
            query.push(("pageToken", token));
        }

        let response = self.request(FILES_URL, &query).await?;
        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("获取文件列表失败 {}: {}", status, text));
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl SearchBackend for GoogleDriveDriver {
    type Item = GoogleFile;

    fn service_name(&self) -> &'static str {
        "GoogleDrive"
    }

    fn capability(&self) -> SearchCapability {
        SearchCapability {
            name: SearchSupport::Indexed,
            md5: SearchSupport::Crawl,
            sha1: SearchSupport::Unsupported,
        }
    }

    fn crawl_fallback(&self) -> bool {
        self.config.crawl_fallback
    }

    fn search_units(&self) -> Vec<String> {
        self.config.folders.clone()
    }

    /// `root` searches the whole drive; other units only their direct children.
    async fn lookup_name(&self, container: &str, name: &str) -> Result<Vec<GoogleFile>> {
        let q = if container == ROOT_ID {
            format!("name contains '{}' and trashed=false", quote(name))
        } else {
            format!(
                "name contains '{}' and '{}' in parents and trashed=false",
                quote(name),
                quote(container)
            )
        };

        let files = drain_pages(|cursor| {
            let q = q.clone();
            async move {
                let resp = self.list_files(&q, cursor).await?;
                Ok::<_, anyhow::Error>(Page::new(resp.files, resp.next_page_token))
            }
        })
        .await?;
        Ok(files.into_iter().filter(|f| !f.is_folder()).collect())
    }

    async fn list_page(&self, container: &str, cursor: Option<String>) -> Result<Page<GoogleFile>> {
        let q = format!("'{}' in parents and trashed=false", quote(container));
        let resp = self.list_files(&q, cursor).await?;

        let (folders, files): (Vec<GoogleFile>, Vec<GoogleFile>) =
            resp.files.into_iter().partition(GoogleFile::is_folder);
        let children = folders.into_iter().map(|f| f.id).collect();
        Ok(Page::new(files, resp.next_page_token).with_children(children))
    }

    async fn download(&self, item: &GoogleFile, dest: &Path) -> Result<()> {
        let (url, query) = match export_mime(&item.mime_type) {
            Some(mime) => (
                format!("{}/{}/export", FILES_URL, item.id),
                vec![("mimeType", mime.to_string())],
            ),
            None if item.mime_type.starts_with("application/vnd.google-apps.") => {
                return Err(anyhow!(
                    "{} ({}) has no downloadable content",
                    item.name,
                    item.mime_type
                ));
            }
            None => (
                format!("{}/{}", FILES_URL, item.id),
                vec![("alt", "media".to_string()), ("supportsAllDrives", "true".to_string())],
            ),
        };

        let mut response = self.request(&url, &query).await?;
        if !response.status().is_success() {
            return Err(anyhow!("下载失败 {}: {}", item.name, response.status()));
        }

        let mut file = tokio::fs::File::create(dest).await?;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        Ok(())
    }

    fn item_id(&self, item: &GoogleFile) -> String {
        item.id.clone()
    }

    fn item_path(&self, item: &GoogleFile) -> String {
        item.name.clone()
    }

    fn item_digest(&self, item: &GoogleFile, kind: HashKind) -> Option<String> {
        match kind {
            HashKind::Md5 => item.md5_checksum.clone(),
            HashKind::Sha1 => None,
        }
    }
}

impl FileConverter for GoogleDriveDriver {
    type Native = GoogleFile;

    fn convert_file(&self, item: &GoogleFile) -> FileRecord {
        let parent = if item.parents.is_empty() {
            ParentRef::None
        } else {
            ParentRef::Ids(item.parents.clone())
        };
        FileRecord::new(item.id.clone(), item.name.clone(), parent)
            .with_md5(item.md5_checksum.clone())
    }
}

#[async_trait]
impl FileService for GoogleDriveDriver {
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

/// Google Drive 处理器工厂
pub struct GoogleDriveServiceFactory;

#[async_trait]
impl ServiceFactory for GoogleDriveServiceFactory {
    fn service_type(&self) -> &'static str {
        "GoogleDrive"
    }

    fn additional_items(&self) -> Vec<ConfigItem> {
        let mut items = vec![
            ConfigItem::new("client_id", "string")
                .required()
                .help("OAuth 2.0 client id from the Google Cloud Console"),
            ConfigItem::new("client_secret", "password")
                .required()
                .help("OAuth 2.0 client secret from the Google Cloud Console"),
            ConfigItem::new("refresh_token", "password")
                .help("Refresh token; when absent the browser authorization runs at start-up"),
            ConfigItem::new("folders", "string")
                .default(ROOT_ID)
                .help("Folder ids to search, separated by `;`"),
        ];
        items.extend(AuthSettings::config_items());
        items
    }

    async fn create_service(&self, section: &ConfigSection) -> ServiceResult<Box<dyn FileService>> {
        let config = GoogleDriveConfig::from_section(section)?;
        let client = Client::new();

        let (refresh_token, access_token) = match &config.refresh_token {
            Some(token) => (token.clone(), None),
            None => {
                let app = OAuthApp::google(config.client_id.clone(), config.client_secret.clone());
                let token = app.authorize_interactive(&client, &config.auth).await?;
                let refresh = token.refresh_token.ok_or_else(|| {
                    ServiceError::Authorization("Google returned no refresh_token".to_string())
                })?;
                (refresh, token.access_token)
            }
        };

        Ok(Box::new(GoogleDriveDriver::new(config, client, refresh_token, access_token)))
    }
}
