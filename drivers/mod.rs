// Handler package / 后端处理器包
pub mod s3;
pub mod dropbox;
pub mod box_cloud;
pub mod google_drive;

use std::sync::Arc;

use crate::storage::ServiceRegistry;

/// Register all built-in handlers / 注册所有内置处理器
pub fn register_all(registry: &mut ServiceRegistry) {
    let factories: Vec<Arc<dyn crate::storage::ServiceFactory>> = vec![
        // Amazon S3 and S3-compatible object storage / S3对象存储
        Arc::new(s3::S3ServiceFactory),
        // Box (access token or interactive OAuth) / Box云盘
        Arc::new(box_cloud::BoxServiceFactory),
        // Dropbox (access token) / Dropbox
        Arc::new(dropbox::DropboxServiceFactory),
        // Google Drive (OAuth refresh_token) / Google Drive
        Arc::new(google_drive::GoogleDriveServiceFactory),
    ];

    for factory in factories {
        let service_type = factory.service_type();
        if let Err(e) = registry.register_factory(factory) {
            tracing::error!("Failed to register handler {}: {}", service_type, e);
        }
    }
}
