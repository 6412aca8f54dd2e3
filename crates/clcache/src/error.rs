//! Error types for the kernel cache

// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

use miette::Diagnostic;
use std::path::Path;
use thiserror::Error;

/// Error type for kernel cache operations
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// I/O error while reading kernel sources or writing cache entries
    #[error("I/O {operation} failed{}", path.as_ref().map_or(String::new(), |p| format!(": {}", p.display())))]
    #[diagnostic(
        code(clcache::io),
        help("Check file permissions and ensure the path exists")
    )]
    Io {
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
        /// Path that caused the error, if available
        path: Option<Box<Path>>,
        /// Operation that failed (e.g., "read", "write", "persist")
        operation: String,
    },

    /// Configuration or validation error
    #[error("Cache configuration error: {message}")]
    #[diagnostic(code(clcache::config))]
    Configuration {
        /// Error message describing the configuration issue
        message: String,
    },

    /// A string could not be parsed as a cache key
    #[error("Invalid cache key {value:?}: {reason}")]
    #[diagnostic(
        code(clcache::invalid_key),
        help("Cache keys are exactly 16 lowercase hexadecimal characters")
    )]
    InvalidKey {
        /// The rejected input
        value: String,
        /// Why it was rejected
        reason: String,
    },

    /// The compile request itself is unusable
    #[error("Invalid compile request: {message}")]
    #[diagnostic(code(clcache::invalid_request))]
    InvalidRequest {
        /// What is wrong with the request
        message: String,
    },

    /// The compiler backend failed to build the kernel source
    #[error("Kernel build failed{}", status.as_ref().map_or(String::new(), |s| format!(" (status {s})")))]
    #[diagnostic(
        code(clcache::build),
        help("Compiler build log:\n{log}")
    )]
    Build {
        /// Backend build status, if the backend reports one
        status: Option<String>,
        /// Diagnostic build log produced by the compiler
        log: String,
    },

    /// The compiler backend rejected a precompiled binary
    #[error("Failed to load precompiled binary: {message}")]
    #[diagnostic(code(clcache::load))]
    Load {
        /// Reason given by the backend
        message: String,
    },

    /// Any other backend failure (platform query, binary extraction)
    #[error("Compiler backend error: {message}")]
    #[diagnostic(
        code(clcache::backend),
        help("Ensure a valid device was selected before requesting programs")
    )]
    Backend {
        /// Error message from the backend
        message: String,
    },
}

impl Error {
    /// Create a configuration error
    #[must_use]
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration {
            message: msg.into(),
        }
    }

    /// Create an I/O error with path context
    #[must_use]
    pub fn io(
        source: std::io::Error,
        path: impl AsRef<Path>,
        operation: impl Into<String>,
    ) -> Self {
        Self::Io {
            source,
            path: Some(path.as_ref().into()),
            operation: operation.into(),
        }
    }

    /// Create an invalid key error
    #[must_use]
    pub fn invalid_key(value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidKey {
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid request error
    #[must_use]
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: msg.into(),
        }
    }

    /// Create a build failure carrying the compiler log
    #[must_use]
    pub fn build(status: Option<String>, log: impl Into<String>) -> Self {
        Self::Build {
            status,
            log: log.into(),
        }
    }

    /// Create a binary load error
    #[must_use]
    pub fn load(msg: impl Into<String>) -> Self {
        Self::Load {
            message: msg.into(),
        }
    }

    /// Create a generic backend error
    #[must_use]
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend {
            message: msg.into(),
        }
    }

    /// The compiler log, if this is a build failure
    #[must_use]
    pub fn build_log(&self) -> Option<&str> {
        match self {
            Self::Build { log, .. } => Some(log),
            _ => None,
        }
    }
}

/// Result type for kernel cache operations
pub type Result<T> = std::result::Result<T, Error>;
