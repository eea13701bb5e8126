pub mod config;
pub mod error;
pub mod models;
pub mod oauth;
pub mod report;
pub mod scan;
pub mod search;
pub mod storage;
pub mod utils;

// Handler modules (point to project root drivers via path attribute) / 处理器模块
#[path = "../drivers/mod.rs"]
pub mod drivers;

pub use error::{Result, ServiceError};
pub use storage::{FileService, ServiceRegistry};
