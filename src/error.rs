//! Error taxonomy for generation, binding, transport and pagination.

use std::time::Duration;

use thiserror::Error;

/// Fatal problems found while turning spec documents into commands.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum GenerationError {
    #[error("{filename} {method} {path} missing operationId")]
    MissingOperationId {
        filename: String,
        method: String,
        path: String,
    },

    #[error(
        "duplicate command name {name:?} in group {group:?} ({method} {path} conflicts with {prev_method} {prev_path})"
    )]
    DuplicateCommand {
        group: String,
        name: String,
        method: String,
        path: String,
        prev_method: String,
        prev_path: String,
    },

    #[error("duplicate flag --{flag} on {group} {command}")]
    DuplicateFlag {
        group: String,
        command: String,
        flag: String,
    },

    #[error("command group {group:?} collides with a built-in command")]
    ReservedGroup { group: String },

    #[error("parameter {0:?} has no usable flag name")]
    UnnamedParameter(String),

    #[error("unsupported parameter $ref {0:?}")]
    UnsupportedParameterRef(String),

    #[error("unsupported requestBody $ref {0:?}")]
    UnsupportedRequestBodyRef(String),
}

/// Problems turning `--data`/`--form`/`--content-type` into a request body.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BindingError {
    #[error("--content-type set but empty")]
    EmptyContentType,

    #[error("unsupported --content-type {0:?} for this operation")]
    ContentTypeNotDeclared(String),

    #[error("request body required; provide --data or --form")]
    BodyRequired,

    #[error("this operation does not support form bodies; use --data")]
    FormNotSupported,

    #[error("unable to pick a request content-type for this operation")]
    NoContentType,

    #[error("JSON request body requires --data")]
    DataRequired,

    #[error("{0} body requires --form")]
    FormRequired(&'static str),

    #[error("invalid --form {0:?} (expected key=value)")]
    InvalidForm(String),

    #[error("file upload not supported for application/x-www-form-urlencoded: {0:?}")]
    FileNotAllowed(String),

    #[error("unsupported content-type {0:?}")]
    UnsupportedContentType(String),

    #[error("failed to read {path}")]
    FileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read request body from stdin")]
    StdinRead(#[source] std::io::Error),

    #[error("failed to encode form body")]
    FormEncode(#[source] serde_urlencoded::ser::Error),
}

/// Failures below the HTTP status line: the request never produced a response.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransportError {
    #[error("HTTP request failed")]
    Network(#[source] reqwest::Error),

    #[error("failed to read response body")]
    ResponseRead(#[source] reqwest::Error),

    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

/// Failures of an `--all` run. Pages fetched before the failure are dropped.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PaginationError {
    #[error("pagination exceeded --max-pages={0}")]
    Exceeded(usize),

    #[error("parse JSON response")]
    Parse(#[source] serde_json::Error),

    #[error("unexpected JSON response type {0}, expected object")]
    NotObject(&'static str),

    #[error("response missing {0:?} field")]
    MissingField(String),

    #[error("response field {field:?} is {found}, expected array")]
    NotArray { field: String, found: &'static str },

    #[error(transparent)]
    Page(anyhow::Error),

    #[error(transparent)]
    Cancelled(#[from] Cancelled),
}

/// A blocking wait was interrupted.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Cancelled {
    #[error("operation cancelled")]
    Cancelled,

    #[error("deadline exceeded while waiting {0:?}")]
    DeadlineExceeded(Duration),
}
