//! S3处理器配置

use crate::config::ConfigSection;
use crate::error::Result;
use crate::utils::split_list;

const DEFAULT_REGION: &str = "us-east-1";

/// S3配置
#[derive(Debug, Clone)]
pub struct S3Config {
    /// 存储桶列表（`;` 分隔）
    pub buckets: Vec<String>,
    /// 区域
    pub region: String,
    /// S3端点地址
    /// AWS: https://s3.{region}.amazonaws.com
    /// MinIO: http://localhost:9000
    pub endpoint: String,
    /// Access Key ID
    pub access_key_id: String,
    /// Secret Access Key
    pub secret_key: String,
    /// Session Token（用于临时凭证）
    pub session_token: Option<String>,
    /// 强制使用路径风格（MinIO等需要）
    pub path_style: bool,
    pub crawl_fallback: bool,
}

impl S3Config {
    /// Read and validate the `AmazonS3` section; every problem is reported at once.
    pub fn from_section(section: &ConfigSection) -> Result<Self> {
        let mut reader = section.reader();

        let raw_buckets = reader.required("buckets");
        let buckets = split_list(&raw_buckets);
        if !raw_buckets.is_empty() && (buckets.is_empty() || buckets.iter().any(String::is_empty)) {
            reader.problem("buckets: bucket names cannot be empty or `/`");
        }

        let access_key_id = reader.required("access_key_id");
        let secret_key = reader.required("secret_key");
        let region = reader.string_or("region", DEFAULT_REGION);
        let endpoint = reader
            .optional("endpoint")
            .unwrap_or_else(|| format!("https://s3.{}.amazonaws.com", region));
        let session_token = reader.optional("session_token");
        let path_style = reader.flag("path_style", false);
        let crawl_fallback = reader.flag("crawl_fallback", true);
        reader.finish()?;

        Ok(Self {
            buckets,
            region,
            endpoint,
            access_key_id,
            secret_key,
            session_token,
            path_style,
            crawl_fallback,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceError;

    #[test]
    fn test_defaults() {
        let section = ConfigSection::new(
            "AmazonS3",
            [("buckets", "logs;;exports"), ("access_key_id", "AK"), ("secret_key", "SK")],
        );
        let config = S3Config::from_section(&section).unwrap();
        assert_eq!(config.buckets, vec!["logs", "exports"]);
        assert_eq!(config.region, "us-east-1");
        assert_eq!(config.endpoint, "https://s3.us-east-1.amazonaws.com");
        assert!(!config.path_style);
        assert!(config.crawl_fallback);
    }

    #[test]
    fn test_all_missing_keys_reported_together() {
        let section =
            ConfigSection::new("AmazonS3", [("region", "eu-west-1"), ("path_style", "maybe")]);
        match S3Config::from_section(&section) {
            Err(ServiceError::Configuration { section, problems }) => {
                assert_eq!(section, "AmazonS3");
                assert_eq!(problems.len(), 4);
                assert!(problems.iter().any(|p| p.contains("buckets")));
                assert!(problems.iter().any(|p| p.contains("access_key_id")));
                assert!(problems.iter().any(|p| p.contains("secret_key")));
                assert!(problems.iter().any(|p| p.contains("path_style")));
            }
            other => panic!("expected configuration error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_root_is_not_a_bucket() {
        let section = ConfigSection::new(
            "AmazonS3",
            [("buckets", "/"), ("access_key_id", "AK"), ("secret_key", "SK")],
        );
        assert!(S3Config::from_section(&section).is_err());
    }
}
