//! Error types for the iotgate operator

use thiserror::Error;

/// Errors that can occur during operator operations
#[derive(Error, Debug)]
pub enum OperatorError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    /// Fatal resolution failure: the referenced Device does not exist.
    /// Reported through the GatewayDevice status instead of being retried.
    #[error("device '{name}' could not be resolved: {cause}")]
    DeviceUnresolvable { name: String, cause: String },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Reconciliation failed
    #[error("Reconciliation failed: {0}")]
    ReconcileFailed(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// YAML serialization error
    #[error("YAML serialization error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// Validation error
    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Result type for operator operations
pub type Result<T> = std::result::Result<T, OperatorError>;

impl OperatorError {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OperatorError::KubeError(_) | OperatorError::ReconcileFailed(_)
        )
    }

    /// Get a suggested requeue delay for retryable errors
    pub fn requeue_delay(&self) -> Option<std::time::Duration> {
        if self.is_retryable() {
            Some(std::time::Duration::from_secs(30))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = OperatorError::DeviceUnresolvable {
            name: "dev1".to_string(),
            cause: "not found".to_string(),
        };
        assert!(err.to_string().contains("dev1"));
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_retryable_errors() {
        let reconcile_err = OperatorError::ReconcileFailed("test".to_string());
        assert!(reconcile_err.is_retryable());

        let fatal = OperatorError::DeviceUnresolvable {
            name: "dev1".to_string(),
            cause: "not found".to_string(),
        };
        assert!(!fatal.is_retryable());

        let validation_err = OperatorError::ValidationError("test".to_string());
        assert!(!validation_err.is_retryable());
    }

    #[test]
    fn test_requeue_delay() {
        let retryable = OperatorError::ReconcileFailed("test".to_string());
        assert!(retryable.requeue_delay().is_some());

        let not_retryable = OperatorError::InvalidConfig("test".to_string());
        assert!(not_retryable.requeue_delay().is_none());
    }
}
