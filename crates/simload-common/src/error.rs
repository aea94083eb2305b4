//! Error types for the simload operator
//!
//! [`StoreError`] is the object-store contract: the core distinguishes
//! not-found, already-exists and optimistic-concurrency conflicts from every
//! other failure. [`Error`] is what a reconciliation tick returns.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Failure of a single object-store call
#[derive(Clone, Debug, Error, PartialEq)]
pub enum StoreError {
    /// The object does not exist
    #[error("{kind} {name} not found")]
    NotFound {
        /// Resource kind (Namespace, ConfigMap, ...)
        kind: String,
        /// Object name
        name: String,
    },

    /// An object with the same identity already exists
    #[error("{kind} {name} already exists")]
    AlreadyExists {
        /// Resource kind
        kind: String,
        /// Object name
        name: String,
    },

    /// The object changed since it was read (stale resourceVersion)
    #[error("conflict writing {kind} {name}: {message}")]
    Conflict {
        /// Resource kind
        kind: String,
        /// Object name
        name: String,
        /// Message reported by the store
        message: String,
    },

    /// Any other API failure
    #[error("{operation} {kind} failed: {message}")]
    Api {
        /// Verb that failed (get, list, create, update, delete)
        operation: String,
        /// Resource kind
        kind: String,
        /// Message reported by the store
        message: String,
        /// HTTP status code, if the failure came from the API server
        code: Option<u16>,
    },
}

impl StoreError {
    /// Create a not-found error
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create an already-exists error
    pub fn already_exists(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::AlreadyExists {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a conflict error
    pub fn conflict(
        kind: impl Into<String>,
        name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Conflict {
            kind: kind.into(),
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create a generic API error
    pub fn api(
        operation: impl Into<String>,
        kind: impl Into<String>,
        message: impl Into<String>,
        code: Option<u16>,
    ) -> Self {
        Self::Api {
            operation: operation.into(),
            kind: kind.into(),
            message: message.into(),
            code,
        }
    }

    /// True for [`StoreError::NotFound`]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// True for [`StoreError::AlreadyExists`]
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists { .. })
    }

    /// True for [`StoreError::Conflict`]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Map a kube-rs error raised by `operation` on `kind`/`name`
    ///
    /// 409 responses carry reason `AlreadyExists` on create and `Conflict`
    /// on a stale update.
    pub fn from_kube(operation: &str, kind: &str, name: &str, err: kube::Error) -> Self {
        match err {
            kube::Error::Api(ae) if ae.code == 404 => Self::not_found(kind, name),
            kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => {
                Self::already_exists(kind, name)
            }
            kube::Error::Api(ae) if ae.code == 409 => Self::conflict(kind, name, ae.message),
            kube::Error::Api(ae) => Self::api(operation, kind, ae.message, Some(ae.code)),
            other => Self::api(operation, kind, other.to_string(), None),
        }
    }
}

/// Main error type for simload operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Object-store error surfaced by the core
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Validation error for ScaleLoadConfig specs
    #[error("validation error for {config}: {message}")]
    Validation {
        /// Name of the ScaleLoadConfig with invalid configuration
        config: String,
        /// Description of what's invalid
        message: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g. "reconciler", "annotations")
        context: String,
    },
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            config: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
        }
    }

    /// Create a validation error with config context
    pub fn validation_for(config: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            config: config.into(),
            message: msg.into(),
        }
    }

    /// Create a serialization error for a resource kind
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Validation and serialization errors need a spec change. Store errors are
    /// retryable unless the API server rejected the request with a 4xx that a
    /// retry cannot fix.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code)
            ),
            Error::Store(store) => match store {
                StoreError::NotFound { .. } => true,
                StoreError::AlreadyExists { .. } => true,
                StoreError::Conflict { .. } => true,
                StoreError::Api { code, .. } => !matches!(code, Some(c) if (400..500).contains(c) && *c != 429),
            },
            Error::Validation { .. } => false,
            Error::Serialization { .. } => false,
            Error::Internal { .. } => true,
        }
    }

    /// Get the context if this error has one
    pub fn context(&self) -> Option<&str> {
        match self {
            Error::Internal { context, .. } => Some(context),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".to_string(),
            message: format!("{} from server", reason),
            reason: reason.to_string(),
            code,
        })
    }

    // ==========================================================================
    // Story Tests: how store failures are classified
    // ==========================================================================

    /// Story: the core must tell "gone", "already there" and "stale write" apart
    /// from every other failure, because each one is handled differently.
    #[test]
    fn story_kube_errors_map_to_store_conditions() {
        let nf = StoreError::from_kube("get", "Node", "kwok-0", api_error(404, "NotFound"));
        assert!(nf.is_not_found());

        let exists = StoreError::from_kube(
            "create",
            "Service",
            "load-service-0",
            api_error(409, "AlreadyExists"),
        );
        assert!(exists.is_already_exists());

        let conflict =
            StoreError::from_kube("update", "Node", "kwok-0", api_error(409, "Conflict"));
        assert!(conflict.is_conflict());

        let forbidden =
            StoreError::from_kube("list", "Namespace", "", api_error(403, "Forbidden"));
        assert_eq!(
            forbidden,
            StoreError::api("list", "Namespace", "Forbidden from server", Some(403))
        );
    }

    #[test]
    fn store_errors_render_with_kind_and_name() {
        let err = StoreError::not_found("ConfigMap", "load-config-3");
        assert_eq!(err.to_string(), "ConfigMap load-config-3 not found");

        let err: Error = StoreError::conflict("Node", "kwok-1", "stale").into();
        assert!(err.to_string().contains("conflict writing Node kwok-1"));
    }

    #[test]
    fn retryability_follows_error_class() {
        assert!(!Error::validation("bad ratio").is_retryable());
        assert!(!Error::serialization_for_kind("Route", "bad json").is_retryable());
        assert!(Error::internal("boom").is_retryable());

        let transient: Error = StoreError::api("list", "Node", "timeout", None).into();
        assert!(transient.is_retryable());

        let throttled: Error = StoreError::api("list", "Node", "slow down", Some(429)).into();
        assert!(throttled.is_retryable());

        let forbidden: Error = StoreError::api("list", "Node", "rbac", Some(403)).into();
        assert!(!forbidden.is_retryable());

        let kube_forbidden: Error = api_error(403, "Forbidden").into();
        assert!(!kube_forbidden.is_retryable());
        let kube_server: Error = api_error(503, "ServiceUnavailable").into();
        assert!(kube_server.is_retryable());
    }

    #[test]
    fn context_is_exposed_for_internal_errors() {
        let err = Error::internal_with_context("annotations", "retry exhausted");
        assert_eq!(err.context(), Some("annotations"));
        assert_eq!(Error::validation("x").context(), None);
    }
}
