//! S3处理器工厂

use async_trait::async_trait;

use super::config::S3Config;
use super::driver::S3Driver;
use crate::config::ConfigSection;
use crate::error::{Result, ServiceError};
use crate::storage::{ConfigItem, FileService, ServiceFactory};

/// S3处理器工厂
pub struct S3ServiceFactory;

#[async_trait]
impl ServiceFactory for S3ServiceFactory {
    fn service_type(&self) -> &'static str {
        "AmazonS3"
    }

    fn additional_items(&self) -> Vec<ConfigItem> {
        vec![
            ConfigItem::new("buckets", "string")
                .required()
                .help("Buckets to search, separated by `;`"),
            ConfigItem::new("access_key_id", "string").required(),
            ConfigItem::new("secret_key", "password").required(),
            ConfigItem::new("region", "string").default("us-east-1"),
            ConfigItem::new("endpoint", "string")
                .help("Endpoint URL, defaults to https://s3.{region}.amazonaws.com"),
            ConfigItem::new("session_token", "password")
                .help("Session token for temporary credentials"),
            ConfigItem::new("path_style", "bool")
                .default("false")
                .help("Path-style addressing, needed by MinIO and similar"),
        ]
    }

    async fn create_service(&self, section: &ConfigSection) -> Result<Box<dyn FileService>> {
        let config = S3Config::from_section(section)?;
        let driver = S3Driver::new(config).map_err(|e| ServiceError::Configuration {
            section: section.name().to_string(),
            problems: vec![format!("{:#}", e)],
        })?;
        Ok(Box::new(driver))
    }
}
