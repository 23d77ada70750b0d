//! Resource identity: who a payload is, which version, and where it lives.

use serde_json::{Map, Value};
use url::Url;

use crate::classify::excerpt;
use crate::error::FieldError;
use crate::fields::IDENTITY_KEY;

/// The `(id, version, location)` triple of a delivered resource.
///
/// Each part is `None` until a payload carrying it has been delivered.
/// `None` means "unknown", never "empty".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceIdentity {
    id: Option<String>,
    version: Option<String>,
    location: Option<Url>,
}

impl ResourceIdentity {
    pub fn unknown() -> Self {
        Self::default()
    }

    /// Reads the `resourceIdentity` sub-object of a normalized payload.
    /// Relative `url`s resolve against `base`.
    pub fn from_payload(
        resource: &str,
        payload: &Map<String, Value>,
        base: &Url,
    ) -> Result<Self, FieldError> {
        let Some(raw) = payload.get(IDENTITY_KEY) else {
            return Ok(Self::unknown());
        };
        let mismatch = |field: &str, expected: &'static str, actual: &Value| FieldError::Mismatch {
            resource: resource.to_string(),
            field: format!("{IDENTITY_KEY}.{field}"),
            expected,
            actual: excerpt(&actual.to_string()),
        };
        let object = match raw {
            Value::Object(object) => object,
            Value::Null => return Ok(Self::unknown()),
            other => {
                return Err(FieldError::Mismatch {
                    resource: resource.to_string(),
                    field: IDENTITY_KEY.to_string(),
                    expected: "an object",
                    actual: excerpt(&other.to_string()),
                })
            }
        };

        let text = |field: &str| -> Result<Option<String>, FieldError> {
            match object.get(field) {
                None | Some(Value::Null) => Ok(None),
                Some(Value::String(s)) => Ok(Some(s.clone())),
                Some(Value::Number(n)) => Ok(Some(n.to_string())),
                Some(other) => Err(mismatch(field, "a scalar", other)),
            }
        };

        let location = match text("url")? {
            Some(url) => Some(base.join(&url).map_err(|_| {
                mismatch("url", "a resolvable URL", &Value::String(url.clone()))
            })?),
            None => None,
        };

        Ok(Self {
            id: text("id")?,
            version: text("version")?,
            location,
        })
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// The optimistic concurrency token sent as `originalVersionId`.
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn location(&self) -> Option<&Url> {
        self.location.as_ref()
    }

    pub fn is_known(&self) -> bool {
        self.id.is_some() || self.version.is_some() || self.location.is_some()
    }
}
