//! Google Drive 处理器
//!
//! 支持 OAuth refresh_token 授权，缺少时走本地回调授权
//! 支持 Google 文档导出为文本后扫描

mod driver;

pub use driver::{GoogleDriveConfig, GoogleDriveDriver, GoogleDriveServiceFactory, GoogleFile};
