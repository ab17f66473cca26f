//! Error types.
//!
//! Errors that stop the process from starting (configuration, stats driver
//! selection) propagate to the caller. Errors scoped to one route or service
//! are absorbed and logged where they occur.

use std::path::PathBuf;
use thiserror::Error;

/// Configuration could not be loaded.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file is missing or unreadable.
    #[error("failed to read configuration {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid YAML for the configuration schema.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// The file parsed but failed validation.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Template loading or rendering failed.
#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("template file {path} not found or unreadable: {source}")]
    NotFound {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("template rendering failed: {0}")]
    Render(#[from] handlebars::RenderError),
}

/// A single route could not be compiled or registered.
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("invalid HTTP method {0:?}")]
    InvalidMethod(String),

    #[error("invalid status code {0}")]
    InvalidStatus(u16),

    #[error("body template for {path} could not be loaded: {source}")]
    Template {
        path: String,
        #[source]
        source: TemplateError,
    },

    #[error("route {method} {path} is already registered")]
    Duplicate { method: String, path: String },
}

/// Stats collection errors.
#[derive(Debug, Error)]
pub enum StatsError {
    #[error("unsupported stats driver {0:?}")]
    UnsupportedDriver(String),

    #[error("stats sink I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to encode stats event: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Endpoint listener errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
}
