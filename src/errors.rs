use std::fmt::{Display, Formatter};

use thiserror::Error;

use crate::cloud_provider::Kind;
use crate::resources::ResourceType;

/// ProviderError: an opaque upstream failure reported by a backend provider.
///
/// Carries a safe message for callers plus the raw provider payload for
/// diagnostics. The raw payload may embed credentials echoed back by the
/// backend and is kept out of user-facing messages.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderError {
    message_safe: String,
    full_details: Option<String>,
}

impl std::error::Error for ProviderError {}

impl ProviderError {
    pub fn new(message_safe: String, full_details: Option<String>) -> Self {
        ProviderError {
            message_safe,
            full_details,
        }
    }

    /// Creates a new ProviderError from safe message. To be used when message is safe.
    pub fn new_from_safe_message(message: String) -> Self {
        ProviderError::new(message, None)
    }

    pub fn message_safe(&self) -> &str {
        &self.message_safe
    }

    /// Returns the raw provider payload. May contain unsafe text.
    pub fn message_raw(&self) -> Option<&str> {
        self.full_details.as_deref()
    }
}

impl Display for ProviderError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message_safe)
    }
}

#[derive(Clone, Error, Debug, PartialEq)]
pub enum EngineError {
    #[error("Connection `{connection_name:?}` is not configured.")]
    UnknownConnection { connection_name: String },
    #[error("Cannot instantiate `{provider}` driver: {raw_error_message:?}.")]
    DriverLoad {
        provider: Kind,
        raw_error_message: String,
    },
    #[error("Operation `{operation}` is not supported by the `{provider}` driver.")]
    UnsupportedOperation { provider: Kind, operation: String },
    #[error("{resource_type} `{reference:?}` does not exist.")]
    NotFound {
        resource_type: ResourceType,
        reference: String,
    },
    #[error("{resource_type} name `{name:?}` matches {matches} backend resources.")]
    Ambiguous {
        resource_type: ResourceType,
        name: String,
        matches: usize,
    },
    #[error("{resource_type} `{name:?}` already exists.")]
    AlreadyExists {
        resource_type: ResourceType,
        name: String,
    },
    #[error("Invalid request: {message}.")]
    Validation { message: String },
    #[error("`{operation}` failed on {resource_type} `{resource_name:?}`: {source}")]
    Provider {
        operation: String,
        resource_type: ResourceType,
        resource_name: String,
        #[source]
        source: ProviderError,
    },
    #[error(
        "{resource_type} `{resource_name:?}` did not reach a terminal state after {attempts} polls, last status `{last_status}`."
    )]
    ReconciliationTimeout {
        resource_type: ResourceType,
        resource_name: String,
        attempts: u32,
        last_status: String,
    },
    #[error("Rollback is incomplete after `{original}`, compensation failures: {rollback_errors:?}.")]
    CompensationIncomplete {
        original: Box<EngineError>,
        rollback_errors: Vec<String>,
    },
}

impl EngineError {
    pub fn new_unknown_connection(connection_name: &str) -> EngineError {
        EngineError::UnknownConnection {
            connection_name: connection_name.to_string(),
        }
    }

    pub fn new_driver_load(provider: Kind, raw_error_message: String) -> EngineError {
        EngineError::DriverLoad {
            provider,
            raw_error_message,
        }
    }

    pub fn new_unsupported_operation(provider: Kind, operation: &str) -> EngineError {
        EngineError::UnsupportedOperation {
            provider,
            operation: operation.to_string(),
        }
    }

    pub fn new_not_found(resource_type: ResourceType, reference: &str) -> EngineError {
        EngineError::NotFound {
            resource_type,
            reference: reference.to_string(),
        }
    }

    pub fn new_validation(message: String) -> EngineError {
        EngineError::Validation { message }
    }

    pub fn new_provider(
        operation: &str,
        resource_type: ResourceType,
        resource_name: &str,
        source: ProviderError,
    ) -> EngineError {
        EngineError::Provider {
            operation: operation.to_string(),
            resource_type,
            resource_name: resource_name.to_string(),
            source,
        }
    }

    /// True when retrying the whole operation cannot succeed without caller action.
    pub fn is_caller_fault(&self) -> bool {
        matches!(
            self,
            EngineError::UnknownConnection { .. }
                | EngineError::UnsupportedOperation { .. }
                | EngineError::AlreadyExists { .. }
                | EngineError::Validation { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_keeps_raw_payload_out_of_display() {
        // setup:
        let err = ProviderError::new(
            "cannot create volume".to_string(),
            Some("HTTP 500: token=AKIA123 rejected".to_string()),
        );

        // execute & verify:
        assert_eq!(format!("{err}"), "cannot create volume");
        assert_eq!(err.message_raw(), Some("HTTP 500: token=AKIA123 rejected"));
    }

    #[test]
    fn test_compensation_incomplete_wraps_original_error() {
        // setup:
        let original = EngineError::new_provider(
            "CreateHealthMonitor",
            ResourceType::Nlb,
            "nlb-01",
            ProviderError::new_from_safe_message("quota exceeded".to_string()),
        );

        // execute:
        let err = EngineError::CompensationIncomplete {
            original: Box::new(original.clone()),
            rollback_errors: vec!["DeleteListener: still in use".to_string()],
        };

        // verify:
        let rendered = format!("{err}");
        assert!(rendered.contains("quota exceeded"));
        assert!(rendered.contains("DeleteListener"));
        assert!(!err.is_caller_fault());
        match err {
            EngineError::CompensationIncomplete { original: boxed, .. } => assert_eq!(*boxed, original),
            _ => panic!("expected CompensationIncomplete"),
        }
    }
}
