//! Error types for the Shoal controllers and agent
//!
//! Errors are structured with fields to aid debugging in production.
//! Each variant carries enough context (torrent names, chunk names,
//! underlying causes) to make log lines actionable.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for Shoal operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Validation error for CRD specs
    #[error("validation error for {resource}: {message}")]
    Validation {
        /// Name of the object with invalid configuration
        resource: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "spec.ttlSecondsAfterReady")
        field: Option<String>,
    },

    /// Model hub error (catalog enumeration or chunk download)
    #[error("hub error for {repo}: {message}")]
    Hub {
        /// Repository identifier on the hub
        repo: String,
        /// Description of what failed
        message: String,
        /// Whether this error is retryable
        retryable: bool,
    },

    /// Scheduling error (no candidate, plugin registration clash)
    #[error("schedule error for chunk {chunk}: {message}")]
    Schedule {
        /// Name of the chunk being placed
        chunk: String,
        /// Description of what failed
        message: String,
    },

    /// Filesystem error on the agent (blob or symlink manipulation)
    #[error("io error at {path}: {source}")]
    Io {
        /// Path the operation targeted
        path: String,
        /// The underlying io error
        source: std::io::Error,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "dispatcher", "scanner")
        context: String,
    },
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            resource: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with object context
    pub fn validation_for(resource: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with object context and field path
    pub fn validation_for_field(
        resource: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            resource: resource.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a retryable hub error
    pub fn hub(repo: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Hub {
            repo: repo.into(),
            message: msg.into(),
            retryable: true,
        }
    }

    /// Create a non-retryable hub error (e.g., missing range support)
    pub fn hub_permanent(repo: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Hub {
            repo: repo.into(),
            message: msg.into(),
            retryable: false,
        }
    }

    /// Create a scheduling error for a specific chunk
    pub fn schedule(chunk: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Schedule {
            chunk: chunk.into(),
            message: msg.into(),
        }
    }

    /// Create an io error with path context
    pub fn io(path: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
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
    /// Validation errors are not retryable (require a spec fix). Scheduling
    /// errors are retried on the next reconcile. Kubernetes errors depend on
    /// the status code.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => {
                // Retry on transient K8s errors (connection, timeout).
                // Don't retry on 4xx errors (validation, not found, conflict).
                !matches!(
                    source,
                    kube::Error::Api(ae) if (400..500).contains(&ae.code)
                )
            }
            Error::Validation { .. } => false,
            Error::Hub { retryable, .. } => *retryable,
            Error::Schedule { .. } => true,
            Error::Io { .. } => true,
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
