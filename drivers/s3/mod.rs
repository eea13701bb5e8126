//! Amazon S3 处理器
//!
//! 支持 AWS S3 以及兼容 S3 协议的对象存储（MinIO 等，需开启 path_style）

mod config;
mod driver;
mod factory;

pub use config::S3Config;
pub use driver::{S3Driver, S3Object};
pub use factory::S3ServiceFactory;
