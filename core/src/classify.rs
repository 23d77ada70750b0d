//! Turns a raw response into a usable outcome or a typed failure.
//!
//! The checks run in a fixed order:
//!
//! | Condition                                        | Result                      |
//! |--------------------------------------------------|-----------------------------|
//! | 401                                              | `Unauthorized`              |
//! | 4xx whose body has `errors[0].error`             | `Conflict`                  |
//! | 404 without such a body                          | `NotFound`                  |
//! | 204                                              | `Outcome::NoContent`        |
//! | 201 or redirect without `Location`               | `BadResponse`               |
//! | redirect with `Location`                         | `Outcome::Redirect`         |
//! | anything but 200/201/202                         | `BadResponse`               |
//! | content type other than `application/json`      | `BadResponse`               |
//! | body is not JSON                                 | `BadResponse`               |
//! | otherwise                                        | `Outcome::Payload`          |
//!
//! The conflict rule keys off the body shape, not a particular status: any
//! client-range status carrying a structured error is a semantic rejection.

use serde_json::Value;
use tracing::warn;

use crate::config::JSON_CONTENT_TYPE;
use crate::error::{BadResponse, ResourceError};
use crate::http::HttpResponse;

const BODY_EXCERPT_LEN: usize = 512;

/// What was being requested, for error messages.
#[derive(Debug, Clone, Copy)]
pub struct RequestContext<'a> {
    /// Logical type name, e.g. `TestCase`.
    pub resource: &'a str,
    /// Fully resolved request URL.
    pub url: &'a str,
}

/// A response the caller can act on.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Payload { body: Value, location: Option<String> },
    NoContent,
    Redirect { status: u16, location: String },
}

fn is_redirect(status: u16) -> bool {
    matches!(status, 301 | 302 | 303 | 307 | 308)
}

/// Truncates a body for inclusion in a message.
pub fn excerpt(body: &str) -> String {
    match body.char_indices().nth(BODY_EXCERPT_LEN) {
        Some((cut, _)) => format!("{}...", &body[..cut]),
        None => body.to_string(),
    }
}

/// `errors[0].error` from a structured error body, if the body has one.
/// Keys may carry a namespace prefix.
pub fn structured_error(body: &str) -> Option<String> {
    let value: Value = serde_json::from_str(body).ok()?;
    let errors = lookup_suffixed(&value, "errors")?;
    let first = match errors {
        Value::Array(items) => items.first()?,
        other => other,
    };
    match lookup_suffixed(first, "error")? {
        Value::String(message) => Some(message.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn lookup_suffixed<'v>(value: &'v Value, name: &str) -> Option<&'v Value> {
    let object = value.as_object()?;
    object.get(name).or_else(|| {
        object
            .iter()
            .find(|(key, _)| key.rsplit('.').next() == Some(name))
            .map(|(_, value)| value)
    })
}

pub fn classify(ctx: &RequestContext<'_>, response: &HttpResponse) -> Result<Outcome, ResourceError> {
    let status = response.status;
    let reason = || response.reason.clone();
    let resource = || ctx.resource.to_string();
    let url = || ctx.url.to_string();
    let body = || excerpt(&response.body);

    if status == 401 {
        return Err(ResourceError::Unauthorized {
            status,
            reason: reason(),
            resource: resource(),
            url: url(),
            body: body(),
        });
    }

    if (400..500).contains(&status) {
        if let Some(message) = structured_error(&response.body) {
            return Err(ResourceError::Conflict {
                status,
                reason: reason(),
                resource: resource(),
                url: url(),
                message,
            });
        }
    }

    if status == 404 {
        return Err(ResourceError::NotFound {
            status,
            reason: reason(),
            resource: resource(),
            url: url(),
            body: body(),
        });
    }

    if status == 204 {
        return Ok(Outcome::NoContent);
    }

    let location = response.header("location").map(str::to_string);
    if status == 201 || is_redirect(status) {
        let Some(location) = location.clone() else {
            return Err(bad(BadResponse::MissingLocation {
                status,
                reason: reason(),
                resource: resource(),
                url: url(),
                body: body(),
            }));
        };
        if is_redirect(status) {
            return Ok(Outcome::Redirect { status, location });
        }
    }

    if !matches!(status, 200 | 201 | 202) {
        return Err(bad(BadResponse::UnexpectedStatus {
            status,
            reason: reason(),
            resource: resource(),
            url: url(),
            body: body(),
        }));
    }

    let media_type = response.media_type().unwrap_or("none");
    if !media_type.eq_ignore_ascii_case(JSON_CONTENT_TYPE) {
        return Err(bad(BadResponse::ContentType {
            status,
            resource: resource(),
            url: url(),
            content_type: media_type.to_string(),
            body: body(),
        }));
    }

    if response.body.trim().is_empty() {
        return Ok(Outcome::NoContent);
    }

    match serde_json::from_str(&response.body) {
        Ok(parsed) => Ok(Outcome::Payload {
            body: parsed,
            location,
        }),
        Err(err) => Err(bad(BadResponse::Malformed {
            status,
            resource: resource(),
            url: url(),
            detail: err.to_string(),
            body: body(),
        })),
    }
}

fn bad(failure: BadResponse) -> ResourceError {
    warn!(
        status = ?failure.status(),
        url = failure.url(),
        error = %failure,
        "endpoint broke the response contract"
    );
    ResourceError::BadResponse(failure)
}
