//! S3处理器核心实现
//!
//! - 名称查找：HEAD 对象（键即名称）
//! - MD5：ListObjectsV2 遍历比较 ETag（分片上传的 ETag 不是 MD5）
//! - 不支持 SHA1

use std::collections::HashMap;
use std::path::Path;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use s3::bucket::Bucket;
use s3::creds::Credentials;
use s3::error::S3Error;
use s3::Region;

use super::config::S3Config;
use crate::error::Result as ServiceResult;
use crate::models::{FileRecord, MatchRecord, ParentRef, PatternSet};
use crate::scan::{scan_units, TextExtractor};
use crate::search::{fetch_matches, find_in_units, FindQuery, HashKind, Page, SearchBackend};
use crate::storage::{FileConverter, FileService, SearchCapability, SearchSupport};
use crate::utils::{basename, normalize_digest};

const LIST_PAGE_SIZE: usize = 1000;

/// One object as seen by listing or HEAD / S3对象
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Object {
    pub bucket: String,
    pub key: String,
    pub etag: Option<String>,
    pub size: u64,
}

impl S3Object {
    /// ETag as an MD5 digest; multipart ETags (`<hash>-<parts>`) are not one.
    pub fn md5(&self) -> Option<String> {
        self.etag
            .as_deref()
            .map(normalize_digest)
            .filter(|etag| !etag.is_empty() && !etag.contains('-'))
    }
}

/// S3处理器
pub struct S3Driver {
    config: S3Config,
    buckets: HashMap<String, Box<Bucket>>,
}

impl S3Driver {
    /// 创建新的S3处理器实例（不发起任何请求）
    pub fn new(config: S3Config) -> Result<Self> {
        let mut buckets = HashMap::new();
        for name in &config.buckets {
            buckets.insert(name.clone(), Self::create_bucket(&config, name)?);
        }
        Ok(Self { config, buckets })
    }

    /// 创建S3 Bucket客户端
    fn create_bucket(config: &S3Config, name: &str) -> Result<Box<Bucket>> {
        let credentials = Credentials::new(
            Some(&config.access_key_id),
            Some(&config.secret_key),
            config.session_token.as_deref(),
            None,
            None,
        )
        .map_err(|e| anyhow!("创建S3凭证失败: {}", e))?;

        let region = Region::Custom {
            region: config.region.clone(),
            endpoint: config.endpoint.clone(),
        };

        let bucket = Bucket::new(name, region, credentials)
            .map_err(|e| anyhow!("创建S3 Bucket失败 {}: {}", name, e))?;

        Ok(if config.path_style { bucket.with_path_style() } else { bucket })
    }

    fn bucket(&self, name: &str) -> Result<&Bucket> {
        self.buckets
            .get(name)
            .map(|b| b.as_ref())
            .ok_or_else(|| anyhow!("bucket {} is not configured", name))
    }
}

#[async_trait]
impl SearchBackend for S3Driver {
    type Item = S3Object;

    fn service_name(&self) -> &'static str {
        "AmazonS3"
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
        self.config.buckets.clone()
    }

    async fn lookup_name(&self, container: &str, name: &str) -> Result<Vec<S3Object>> {
        let bucket = self.bucket(container)?;
        let key = name.trim_start_matches('/');

        let (head, code) = match bucket.head_object(key).await {
            Ok(found) => found,
            Err(S3Error::HttpFailWithBody(404, _)) => return Ok(Vec::new()),
            Err(e) => return Err(anyhow!("HEAD {}/{} 失败: {}", container, key, e)),
        };
        match code {
            200 => Ok(vec![S3Object {
                bucket: container.to_string(),
                key: key.to_string(),
                etag: head.e_tag,
                size: head.content_length.unwrap_or(0).max(0) as u64,
            }]),
            404 => Ok(Vec::new()),
            other => Err(anyhow!("HEAD {}/{} 返回状态码 {}", container, key, other)),
        }
    }

    async fn list_page(&self, container: &str, cursor: Option<String>) -> Result<Page<S3Object>> {
        let bucket = self.bucket(container)?;
        let (result, code) = bucket
            .list_page(String::new(), None, cursor, None, Some(LIST_PAGE_SIZE))
            .await
            .map_err(|e| anyhow!("列出S3对象失败 {}: {}", container, e))?;
        if code != 200 {
            return Err(anyhow!("列出S3对象失败 {}: 状态码 {}", container, code));
        }

        let items = result
            .contents
            .into_iter()
            .filter(|obj| !obj.key.ends_with('/'))
            .map(|obj| S3Object {
                bucket: container.to_string(),
                key: obj.key,
                etag: obj.e_tag,
                size: obj.size,
            })
            .collect();

        // IsTruncated is the only "more" signal; a truncated page without a token is an error
        let next = if result.is_truncated {
            Some(
                result
                    .next_continuation_token
                    .ok_or_else(|| {
                        anyhow!("{} listing truncated without a continuation token", container)
                    })?,
            )
        } else {
            None
        };

        Ok(Page::new(items, next))
    }

    async fn download(&self, item: &S3Object, dest: &Path) -> Result<()> {
        let bucket = self.bucket(&item.bucket)?;
        let mut file = tokio::fs::File::create(dest).await?;
        let code = bucket
            .get_object_to_writer(&item.key, &mut file)
            .await
            .map_err(|e| anyhow!("下载 {}/{} 失败: {}", item.bucket, item.key, e))?;
        if code != 200 {
            return Err(anyhow!("下载 {}/{} 返回状态码 {}", item.bucket, item.key, code));
        }
        Ok(())
    }

    fn item_id(&self, item: &S3Object) -> String {
        format!("{}/{}", item.bucket, item.key)
    }

    fn item_path(&self, item: &S3Object) -> String {
        format!("/{}/{}", item.bucket, item.key)
    }

    fn item_digest(&self, item: &S3Object, kind: HashKind) -> Option<String> {
        match kind {
            HashKind::Md5 => item.md5(),
            HashKind::Sha1 => None,
        }
    }
}

impl FileConverter for S3Driver {
    type Native = S3Object;

    fn convert_file(&self, item: &S3Object) -> FileRecord {
        FileRecord::new(item.key.clone(), basename(&item.key), ParentRef::Id(item.bucket.clone()))
            .with_md5(item.md5())
            .with_path(Some(self.item_path(item)))
    }
}

#[async_trait]
impl FileService for S3Driver {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigSection;

    fn driver() -> S3Driver {
        let section = ConfigSection::new(
            "AmazonS3",
            [
                ("buckets", "logs;exports"),
                ("access_key_id", "AK"),
                ("secret_key", "SK"),
                ("endpoint", "http://localhost:9000"),
                ("path_style", "true"),
            ],
        );
        S3Driver::new(S3Config::from_section(&section).unwrap()).unwrap()
    }

    #[test]
    fn test_units_and_capability() {
        let driver = driver();
        assert_eq!(driver.search_units(), vec!["logs", "exports"]);
        assert!(driver.bucket("logs").is_ok());
        assert!(driver.bucket("other").is_err());

        let cap = SearchBackend::capability(&driver);
        assert_eq!(cap.md5, SearchSupport::Crawl);
        assert_eq!(cap.sha1, SearchSupport::Unsupported);
        assert!(!cap.supports_indexed_hash_search());
    }

    #[test]
    fn test_etag_as_md5() {
        let mut obj = S3Object {
            bucket: "logs".into(),
            key: "2024/app.log".into(),
            etag: Some("\"CFB1A2\"".into()),
            size: 10,
        };
        assert_eq!(obj.md5().as_deref(), Some("cfb1a2"));

        obj.etag = Some("\"9b2cf535f27731c974343645a3985328-4\"".into());
        assert_eq!(obj.md5(), None);
    }

    #[test]
    fn test_convert_file() {
        let driver = driver();
        let obj = S3Object {
            bucket: "logs".into(),
            key: "2024/app.log".into(),
            etag: Some("\"abc\"".into()),
            size: 10,
        };
        let record = driver.convert_file(&obj);
        assert_eq!(record.id(), "2024/app.log");
        assert_eq!(record.name(), "app.log");
        assert_eq!(record.parent(), &ParentRef::Id("logs".into()));
        assert_eq!(record.md5(), Some("abc"));
        assert_eq!(record.sha1(), None);
        assert_eq!(record.path(), Some("/logs/2024/app.log"));
        assert_eq!(driver.item_id(&obj), "logs/2024/app.log");
    }

    #[tokio::test]
    async fn test_sha1_only_query_is_refused() {
        let driver = driver();
        let err = FileService::find_file(&driver, &FindQuery::new().sha1("abcd"))
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::ServiceError::UnsupportedOperation { .. }));
    }
}
