use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{anyhow, Result as AnyResult};
use async_trait::async_trait;

use super::{get_common_items, ConfigItem, FileService};
use crate::config::ConfigSection;
use crate::error::{Result, ServiceError};

/// Handler factory trait / 服务工厂 trait
#[async_trait]
pub trait ServiceFactory: Send + Sync {
    /// Service type name / 服务类型名称
    fn service_type(&self) -> &'static str;

    /// Handler specific configuration keys / 服务特有配置项
    fn additional_items(&self) -> Vec<ConfigItem>;

    /// Build a handler from its configuration section. May run an interactive
    /// authorization handshake. / 创建服务实例
    async fn create_service(&self, section: &ConfigSection) -> Result<Box<dyn FileService>>;

    /// Common + specific keys / 全部配置项
    fn config_items(&self) -> Vec<ConfigItem> {
        let mut items = get_common_items();
        items.extend(self.additional_items());
        items
    }
}

/// Start-up registry of handler factories, keyed by lowercase type name / 服务注册表
#[derive(Clone, Default)]
pub struct ServiceRegistry {
    factories: BTreeMap<String, Arc<dyn ServiceFactory>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in handler / 包含所有内置服务
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        crate::drivers::register_all(&mut registry);
        registry
    }

    /// Register factory / 注册服务工厂
    pub fn register_factory(&mut self, factory: Arc<dyn ServiceFactory>) -> AnyResult<()> {
        let service_type = factory.service_type();
        if service_type.trim().is_empty() {
            return Err(anyhow!("Service factory declares an empty type name"));
        }

        let key = service_type.to_lowercase();
        if self.factories.contains_key(&key) {
            return Err(anyhow!("Service type already registered: {}", service_type));
        }

        self.factories.insert(key, factory);
        tracing::debug!("Service factory registered: {}", service_type);
        Ok(())
    }

    /// Declared type names of every registered factory / 已知服务类型
    pub fn known_types(&self) -> Vec<String> {
        self.factories
            .values()
            .map(|f| f.service_type().to_string())
            .collect()
    }

    pub fn factory(&self, service_type: &str) -> Option<Arc<dyn ServiceFactory>> {
        self.factories.get(&service_type.to_lowercase()).cloned()
    }

    /// Create handler instance; construction errors propagate to the caller / 创建服务实例
    pub async fn create_service(
        &self,
        service_type: &str,
        section: &ConfigSection,
    ) -> Result<Box<dyn FileService>> {
        let factory = self
            .factory(service_type)
            .ok_or_else(|| ServiceError::UnsupportedService {
                name: service_type.to_string(),
                known: self.known_types(),
            })?;

        match factory.create_service(section).await {
            Ok(service) => {
                tracing::info!("Service created: {}", factory.service_type());
                Ok(service)
            }
            Err(e) => {
                tracing::error!(
                    "Failed to create service instance {}: {}",
                    factory.service_type(),
                    e
                );
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FileRecord, MatchRecord, PatternSet};
    use crate::scan::TextExtractor;
    use crate::search::FindQuery;
    use crate::storage::{SearchCapability, SearchSupport};
    use std::path::Path;

    struct NullService;

    #[async_trait]
    impl FileService for NullService {
        fn service_type(&self) -> &'static str {
            "Null"
        }

        fn capability(&self) -> SearchCapability {
            SearchCapability {
                name: SearchSupport::Indexed,
                md5: SearchSupport::Unsupported,
                sha1: SearchSupport::Unsupported,
            }
        }

        async fn find_file(&self, query: &FindQuery) -> Result<Vec<FileRecord>> {
            query.validate()?;
            Ok(Vec::new())
        }

        async fn scan_with(
            &self,
            _temp_dir: &Path,
            _patterns: &PatternSet,
            _extractor: &dyn TextExtractor,
        ) -> Result<Vec<MatchRecord>> {
            Ok(Vec::new())
        }
    }

    struct NullFactory;

    #[async_trait]
    impl ServiceFactory for NullFactory {
        fn service_type(&self) -> &'static str {
            "Null"
        }

        fn additional_items(&self) -> Vec<ConfigItem> {
            vec![ConfigItem::new("token", "password").required()]
        }

        async fn create_service(&self, section: &ConfigSection) -> Result<Box<dyn FileService>> {
            let mut reader = section.reader();
            reader.required("token");
            reader.finish()?;
            Ok(Box::new(NullService))
        }
    }

    #[tokio::test]
    async fn test_lookup_is_case_insensitive() {
        let mut registry = ServiceRegistry::new();
        registry.register_factory(Arc::new(NullFactory)).unwrap();

        let section = ConfigSection::new("null", [("token", "abc")]);
        let service = registry.create_service("NULL", &section).await.unwrap();
        assert_eq!(service.service_type(), "Null");
    }

    #[tokio::test]
    async fn test_unknown_type_lists_known() {
        let mut registry = ServiceRegistry::new();
        registry.register_factory(Arc::new(NullFactory)).unwrap();

        let section = ConfigSection::default();
        match registry.create_service("ftp", &section).await {
            Err(ServiceError::UnsupportedService { name, known }) => {
                assert_eq!(name, "ftp");
                assert_eq!(known, vec!["Null".to_string()]);
            }
            _ => panic!("expected UnsupportedService"),
        }
    }

    #[tokio::test]
    async fn test_construction_error_propagates() {
        let mut registry = ServiceRegistry::new();
        registry.register_factory(Arc::new(NullFactory)).unwrap();

        let section = ConfigSection::new("Null", Vec::<(String, String)>::new());
        let err = registry.create_service("null", &section).await.err().unwrap();
        assert!(matches!(err, ServiceError::Configuration { .. }));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = ServiceRegistry::new();
        registry.register_factory(Arc::new(NullFactory)).unwrap();
        assert!(registry.register_factory(Arc::new(NullFactory)).is_err());
        assert_eq!(registry.known_types().len(), 1);
    }

    #[test]
    fn test_builtin_registry() {
        let registry = ServiceRegistry::with_builtin();
        let known: Vec<String> = registry.known_types().iter().map(|t| t.to_lowercase()).collect();
        for t in ["amazons3", "box", "dropbox", "googledrive"] {
            assert!(known.contains(&t.to_string()), "missing {}", t);
        }
        let items = registry.factory("AmazonS3").unwrap().config_items();
        assert!(items.iter().any(|i| i.name == "crawl_fallback"));
        assert!(items.iter().any(|i| i.name == "buckets" && i.required));
    }
}
