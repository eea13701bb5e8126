//! Dropbox 处理器
//!
//! 使用 access_token 授权，仅支持名称搜索

mod driver;

pub use driver::{DropboxConfig, DropboxDriver, DropboxEntry, DropboxServiceFactory};
