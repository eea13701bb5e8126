//! Box 处理器
//!
//! 支持 access_token 或本地回调 OAuth 授权，支持 SHA1 索引搜索

mod driver;

pub use driver::{BoxConfig, BoxDriver, BoxItem, BoxServiceFactory};
