//! Error types for the resource client.
//!
//! # Design
//! Failures derived from a response are split by what the caller can do about
//! them. `Unauthorized` needs new credentials, `Conflict` means the server
//! rejected the request on semantic grounds (stale version, duplicate value)
//! and can be retried after a re-fetch, and `BadResponse` means the endpoint
//! broke the wire contract. Transport failures are wrapped transparently and
//! never reclassified.
//!
//! The `Display` output of every response-derived variant is the exact
//! message callers and acceptance tests compare against.

use std::error::Error as StdError;
use std::fmt;

use thiserror::Error;

/// A round-trip produced no response at all (connection refused, timeout,
/// TLS failure). Carries the underlying library's error untouched.
#[derive(Debug)]
pub struct TransportError {
    source: Box<dyn StdError + Send + Sync>,
}

impl TransportError {
    pub fn new(source: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Self {
            source: source.into(),
        }
    }

    pub fn into_inner(self) -> Box<dyn StdError + Send + Sync> {
        self.source
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.source, f)
    }
}

impl StdError for TransportError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source.source()
    }
}

/// The endpoint answered, but not in a shape the client can use.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BadResponse {
    #[error("Bad response fetching {resource} {url}: content-type {content_type} is not an expected type")]
    ContentType {
        status: u16,
        resource: String,
        url: String,
        content_type: String,
        body: String,
    },

    #[error("'Location' header missing from {status} {reason} response requesting {resource} {url}")]
    MissingLocation {
        status: u16,
        reason: String,
        resource: String,
        url: String,
        body: String,
    },

    #[error("Unexpected response requesting {resource} {url}: {status} {body}")]
    UnexpectedStatus {
        status: u16,
        reason: String,
        resource: String,
        url: String,
        body: String,
    },

    #[error("Bad response fetching {resource} {url}: {detail}: {body}")]
    Malformed {
        status: u16,
        resource: String,
        url: String,
        detail: String,
        body: String,
    },

    #[error("Too many redirects requesting {resource} {url}")]
    TooManyRedirects { resource: String, url: String },
}

impl BadResponse {
    pub fn status(&self) -> Option<u16> {
        match self {
            BadResponse::ContentType { status, .. }
            | BadResponse::MissingLocation { status, .. }
            | BadResponse::UnexpectedStatus { status, .. }
            | BadResponse::Malformed { status, .. } => Some(*status),
            BadResponse::TooManyRedirects { .. } => None,
        }
    }

    pub fn url(&self) -> &str {
        match self {
            BadResponse::ContentType { url, .. }
            | BadResponse::MissingLocation { url, .. }
            | BadResponse::UnexpectedStatus { url, .. }
            | BadResponse::Malformed { url, .. }
            | BadResponse::TooManyRedirects { url, .. } => url,
        }
    }
}

/// A payload does not match the declared schema.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldError {
    #[error("field '{field}' of {resource} expected {expected}, got {actual}")]
    Mismatch {
        resource: String,
        field: String,
        expected: &'static str,
        actual: String,
    },

    #[error("'{field}' is not a declared field of {resource}")]
    Unknown { resource: String, field: String },

    #[error("{resource} payload has no '{wrapper}' wrapper: {actual}")]
    MissingWrapper {
        resource: String,
        wrapper: String,
        actual: String,
    },
}

/// A schema declaration is inconsistent. Raised once, when the schema is built.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("schema needs a non-empty {0}")]
    EmptyName(&'static str),

    #[error("{resource} declares field '{field}' more than once")]
    DuplicateField { resource: String, field: String },

    #[error("{resource} cannot declare reserved field '{field}'")]
    ReservedField { resource: String, field: String },
}

/// Client configuration could not be assembled.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("environment variable {0} is not set")]
    MissingVar(&'static str),

    #[error("invalid base URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("base URL '{0}' cannot have paths joined onto it")]
    NotABase(String),

    #[error("invalid cache TTL '{0}', expected whole seconds up to one year")]
    InvalidTtl(String),
}

/// Errors returned by resource and list operations.
#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("{status} {reason} requesting {resource} {url}: {body}")]
    Unauthorized {
        status: u16,
        reason: String,
        resource: String,
        url: String,
        body: String,
    },

    #[error("{status} {reason} requesting {resource} {url}: {message}")]
    Conflict {
        status: u16,
        reason: String,
        resource: String,
        url: String,
        message: String,
    },

    #[error("{status} {reason} requesting {resource} {url}: {body}")]
    NotFound {
        status: u16,
        reason: String,
        resource: String,
        url: String,
        body: String,
    },

    #[error(transparent)]
    BadResponse(#[from] BadResponse),

    #[error(transparent)]
    Field(#[from] FieldError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("cannot resolve '{uri}' against the API base: {source}")]
    InvalidUri {
        uri: String,
        #[source]
        source: url::ParseError,
    },

    #[error("cannot {operation} {resource} before it has been delivered")]
    NotDelivered {
        resource: String,
        operation: &'static str,
    },

    #[error("cannot {operation} {resource}: no version token was delivered")]
    MissingVersion {
        resource: String,
        operation: &'static str,
    },

    #[error("cannot {operation} {resource}: it has been deleted")]
    Deleted {
        resource: String,
        operation: &'static str,
    },
}

impl ResourceError {
    /// HTTP status of the response this error was classified from, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            ResourceError::Unauthorized { status, .. }
            | ResourceError::Conflict { status, .. }
            | ResourceError::NotFound { status, .. } => Some(*status),
            ResourceError::BadResponse(bad) => bad.status(),
            _ => None,
        }
    }

    /// Whether re-fetching and retrying the mutation can succeed.
    pub fn is_conflict(&self) -> bool {
        matches!(self, ResourceError::Conflict { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthorized_message_keeps_empty_reason() {
        let err = ResourceError::Unauthorized {
            status: 401,
            reason: String::new(),
            resource: "TestResource".to_string(),
            url: "http://fake.base/rest/testresources/3?_type=json".to_string(),
            body: "some error".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "401  requesting TestResource http://fake.base/rest/testresources/3?_type=json: some error"
        );
        assert_eq!(err.status(), Some(401));
    }

    #[test]
    fn bad_response_is_transparent() {
        let err = ResourceError::from(BadResponse::ContentType {
            status: 200,
            resource: "TestResource".to_string(),
            url: "http://fake.base/rest/x?_type=json".to_string(),
            content_type: "text/plain".to_string(),
            body: "blah".to_string(),
        });
        assert_eq!(
            err.to_string(),
            "Bad response fetching TestResource http://fake.base/rest/x?_type=json: \
             content-type text/plain is not an expected type"
        );
        assert!(!err.is_conflict());
    }

    #[test]
    fn transport_error_keeps_source_message() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = ResourceError::from(TransportError::new(io));
        assert_eq!(err.to_string(), "refused");
        assert_eq!(err.status(), None);
    }
}
