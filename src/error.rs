//! Error classes shared by every file service / 文件服务通用错误

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("configuration error in [{section}]: {}", .problems.join("; "))]
    Configuration {
        section: String,
        problems: Vec<String>,
    },

    #[error("unsupported file service type: {name} (known: {})", .known.join(", "))]
    UnsupportedService { name: String, known: Vec<String> },

    #[error("{service} does not support {operation}")]
    UnsupportedOperation { service: String, operation: String },

    #[error("{service} does not implement {operation}")]
    NotImplemented { service: String, operation: String },

    #[error("{service} request failed ({context}): {message}")]
    Backend {
        service: String,
        context: String,
        message: String,
    },

    #[error("cannot extract text from {}: {reason}", .path.display())]
    ContentExtraction { path: PathBuf, reason: String },

    #[error("failed to remove temporary file {}: {source}", .path.display())]
    Cleanup {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("authorization failed: {0}")]
    Authorization(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ServiceError {
    /// Wrap a provider failure raised while talking to `service`.
    pub fn backend(service: &str, context: impl Into<String>, err: anyhow::Error) -> Self {
        ServiceError::Backend {
            service: service.to_string(),
            context: context.into(),
            message: format!("{:#}", err),
        }
    }

    pub fn unsupported(service: &str, operation: impl Into<String>) -> Self {
        ServiceError::UnsupportedOperation {
            service: service.to_string(),
            operation: operation.into(),
        }
    }

    pub fn not_implemented(service: &str, operation: impl Into<String>) -> Self {
        ServiceError::NotImplemented {
            service: service.to_string(),
            operation: operation.into(),
        }
    }

    /// Errors that must stop the run rather than be logged at an item boundary.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ServiceError::Configuration { .. }
                | ServiceError::UnsupportedService { .. }
                | ServiceError::Authorization(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_lists_every_problem() {
        let err = ServiceError::Configuration {
            section: "AmazonS3".to_string(),
            problems: vec!["missing key: region".to_string(), "missing key: buckets".to_string()],
        };
        let text = err.to_string();
        assert!(text.contains("region"));
        assert!(text.contains("buckets"));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_backend_error_keeps_context_chain() {
        let inner = anyhow::anyhow!("connection reset").context("list page 3");
        let err = ServiceError::backend("Dropbox", "folder /docs", inner);
        let text = err.to_string();
        assert!(text.contains("Dropbox"));
        assert!(text.contains("list page 3"));
        assert!(text.contains("connection reset"));
        assert!(!err.is_fatal());
    }
}
