//! A single remote resource with lazy, memoized delivery.
//!
//! # Design
//! A `RemoteObject` is an explicit state machine:
//!
//! ```text
//! Pending(url) --deliver--> Delivered --delete--> Deleted
//! Constructed  --save-----> Delivered
//! ```
//!
//! Reading a field or the identity of a pending object delivers it first,
//! exactly once; later reads never go back to the network until [`reset`] is
//! called. Delivery state lives on the instance and is not synchronized, so an
//! object belongs to one thread of control at a time.
//!
//! Mutations carry the version captured by the last successful delivery as
//! `originalVersionId`. A stale token comes back as `Conflict`, which is
//! returned as-is: the caller decides whether to re-fetch and retry.
//!
//! [`reset`]: RemoteObject::reset

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;
use url::Url;

use crate::classify::{excerpt, Outcome};
use crate::client::{ApiClient, Exchange};
use crate::credentials::Credentials;
use crate::error::{BadResponse, FieldError, ResourceError};
use crate::fields::{unwrap_one, Fields, Schema, IDENTITY_KEY};
use crate::http::HttpMethod;
use crate::identity::ResourceIdentity;

/// Name of the optimistic concurrency parameter sent with mutations.
pub const VERSION_PARAM: &str = "originalVersionId";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    /// Known by URL, not fetched yet.
    Pending,
    /// Built from field values, never persisted.
    Constructed,
    Delivered,
    Deleted,
}

#[derive(Debug, Clone)]
pub struct RemoteObject {
    client: ApiClient,
    schema: Arc<Schema>,
    auth: Option<Arc<Credentials>>,
    state: DeliveryState,
    request_url: Option<Url>,
    fields: Fields,
    identity: ResourceIdentity,
}

impl RemoteObject {
    pub(crate) fn pending(client: ApiClient, schema: Arc<Schema>, url: Url) -> Self {
        Self {
            client,
            schema,
            auth: None,
            state: DeliveryState::Pending,
            request_url: Some(url),
            fields: Fields::default(),
            identity: ResourceIdentity::unknown(),
        }
    }

    pub(crate) fn constructed<I, K>(
        client: ApiClient,
        schema: Arc<Schema>,
        values: I,
    ) -> Result<Self, FieldError>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: AsRef<str>,
    {
        let mut fields = Fields::default();
        for (name, value) in values {
            let name = client.field_name(name.as_ref());
            let value = schema.coerce_field(name, value)?;
            fields.insert(name, value);
        }
        Ok(Self {
            client,
            schema,
            auth: None,
            state: DeliveryState::Constructed,
            request_url: None,
            fields,
            identity: ResourceIdentity::unknown(),
        })
    }

    /// An already delivered entry hydrated from a normalized sub-payload.
    pub(crate) fn from_payload(
        client: ApiClient,
        schema: Arc<Schema>,
        auth: Option<Arc<Credentials>>,
        payload: &Map<String, Value>,
    ) -> Result<Self, ResourceError> {
        let mut object = Self {
            client,
            schema,
            auth,
            state: DeliveryState::Pending,
            request_url: None,
            fields: Fields::default(),
            identity: ResourceIdentity::unknown(),
        };
        object.hydrate(payload)?;
        object.request_url = object.identity.location().cloned();
        object.state = DeliveryState::Delivered;
        Ok(object)
    }

    /// Sends these credentials with every request this object makes.
    pub fn with_auth(mut self, auth: Arc<Credentials>) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn auth(&self) -> Option<&Arc<Credentials>> {
        self.auth.as_ref()
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn type_name(&self) -> &str {
        self.schema.type_name()
    }

    pub fn state(&self) -> DeliveryState {
        self.state
    }

    pub fn is_delivered(&self) -> bool {
        self.state == DeliveryState::Delivered
    }

    /// The URL this object was requested from or last delivered at.
    pub fn request_url(&self) -> Option<&Url> {
        self.request_url.as_ref()
    }

    /// Fetches the resource unless it is already delivered. Constructed and
    /// deleted objects have nothing to fetch. On failure the object stays
    /// pending and delivery can be retried.
    pub fn deliver(&mut self) -> Result<(), ResourceError> {
        if self.state != DeliveryState::Pending {
            return Ok(());
        }
        let url = self.request_url.clone().ok_or_else(|| self.not_delivered("deliver"))?;
        debug!(resource = self.type_name(), url = %url, "delivering");

        let exchange = self.client.execute(
            HttpMethod::Get,
            self.schema.is_cached(),
            &url,
            &[],
            self.auth.as_deref(),
            None,
            self.schema.type_name(),
        )?;

        match exchange.outcome {
            Outcome::Payload { body, .. } => {
                let body = self.client.normalize(body);
                let payload = self.extract(&body)?;
                self.hydrate(payload)?;
            }
            Outcome::NoContent => {
                self.fields.clear();
                self.identity = ResourceIdentity::unknown();
            }
            Outcome::Redirect { .. } => {
                return Err(ResourceError::BadResponse(BadResponse::TooManyRedirects {
                    resource: self.type_name().to_string(),
                    url: exchange.sent_url,
                }))
            }
        }
        self.request_url = Some(exchange.target);
        self.state = DeliveryState::Delivered;
        Ok(())
    }

    /// Forgets delivered data so the next access fetches again. Objects with
    /// no known URL are left alone.
    pub fn reset(&mut self) {
        if self.state != DeliveryState::Delivered {
            return;
        }
        if let Some(url) = self.target_url() {
            self.request_url = Some(url);
            self.fields.clear();
            self.identity = ResourceIdentity::unknown();
            self.state = DeliveryState::Pending;
        }
    }

    /// Reads one field, delivering first if needed. Accepts bare names or
    /// names carrying the configured namespace prefix.
    pub fn field(&mut self, name: &str) -> Result<Option<&Value>, ResourceError> {
        self.deliver()?;
        Ok(self.fields.get(self.client.field_name(name)))
    }

    pub fn field_str(&mut self, name: &str) -> Result<Option<&str>, ResourceError> {
        Ok(self.field(name)?.and_then(Value::as_str))
    }

    /// Reads a field without triggering delivery.
    pub fn peek_field(&self, name: &str) -> Option<&Value> {
        self.fields.get(self.client.field_name(name))
    }

    pub fn fields(&mut self) -> Result<&Fields, ResourceError> {
        self.deliver()?;
        Ok(&self.fields)
    }

    /// Sets a declared field, delivering first so the update starts from
    /// the server's state. `Value::Null` clears it.
    pub fn set_field(&mut self, name: &str, value: impl Into<Value>) -> Result<(), ResourceError> {
        if self.state == DeliveryState::Deleted {
            return Err(self.deleted("modify"));
        }
        self.deliver()?;
        let name = self.client.field_name(name);
        let value = self.schema.coerce_field(name, value.into())?;
        self.fields.insert(name, value);
        Ok(())
    }

    pub fn identity(&mut self) -> Result<&ResourceIdentity, ResourceError> {
        self.deliver()?;
        Ok(&self.identity)
    }

    pub fn id(&mut self) -> Result<Option<&str>, ResourceError> {
        Ok(self.identity()?.id())
    }

    pub fn version(&mut self) -> Result<Option<&str>, ResourceError> {
        Ok(self.identity()?.version())
    }

    pub fn location(&mut self) -> Result<Option<&Url>, ResourceError> {
        Ok(self.identity()?.location())
    }

    /// Creates (`POST` to the collection) a constructed object, or updates
    /// (`PUT` to its location with `originalVersionId`) a delivered one.
    pub fn save(&mut self) -> Result<(), ResourceError> {
        let mut form = self.fields.form_pairs();
        let (method, url) = match self.state {
            DeliveryState::Pending => return Err(self.not_delivered("save")),
            DeliveryState::Deleted => return Err(self.deleted("save")),
            DeliveryState::Constructed => {
                (HttpMethod::Post, self.client.resolve(self.schema.collection())?)
            }
            DeliveryState::Delivered => {
                let version = self.version_token("save")?;
                let url = self.target_url().ok_or_else(|| self.not_delivered("save"))?;
                form.push((VERSION_PARAM.to_string(), version));
                (HttpMethod::Put, url)
            }
        };
        debug!(resource = self.type_name(), method = method.as_str(), url = %url, "saving");

        let exchange = self.client.execute(
            method,
            false,
            &url,
            &[],
            self.auth.as_deref(),
            Some(form.as_slice()),
            self.schema.type_name(),
        )?;
        self.absorb_save(method, exchange)
    }

    fn absorb_save(&mut self, method: HttpMethod, exchange: Exchange) -> Result<(), ResourceError> {
        let Exchange {
            target,
            sent_url,
            status,
            reason,
            outcome,
        } = exchange;
        let header_location = |location: Option<&String>| -> Result<Option<Url>, ResourceError> {
            location
                .map(|loc| {
                    target.join(loc).map_err(|source| ResourceError::InvalidUri {
                        uri: loc.clone(),
                        source,
                    })
                })
                .transpose()
        };

        match outcome {
            Outcome::Payload { body, location } => {
                let body = self.client.normalize(body);
                let payload = self.extract(&body)?;
                self.hydrate(payload)?;
                self.request_url = match self.identity.location() {
                    Some(url) => Some(url.clone()),
                    None => header_location(location.as_ref())?.or(Some(target.clone())),
                };
                self.state = DeliveryState::Delivered;
            }
            Outcome::Redirect { location, .. } => {
                self.request_url = header_location(Some(&location))?;
                self.state = DeliveryState::Pending;
            }
            Outcome::NoContent if method == HttpMethod::Put => {
                // The server kept our fields but bumped the version; refetch
                // on next access to pick up the new token.
                self.request_url = Some(target);
                self.identity = ResourceIdentity::unknown();
                self.state = DeliveryState::Pending;
            }
            Outcome::NoContent => {
                return Err(ResourceError::BadResponse(BadResponse::MissingLocation {
                    status,
                    reason,
                    resource: self.type_name().to_string(),
                    url: sent_url,
                    body: String::new(),
                }));
            }
        }
        Ok(())
    }

    /// Deletes the resource server-side with `originalVersionId`, delivering
    /// a pending object first to learn its version. On success every field
    /// and the identity become unknown; on failure nothing changes.
    pub fn delete(&mut self) -> Result<(), ResourceError> {
        match self.state {
            DeliveryState::Constructed => return Err(self.not_delivered("delete")),
            DeliveryState::Deleted => return Err(self.deleted("delete")),
            DeliveryState::Pending => self.deliver()?,
            DeliveryState::Delivered => {}
        }
        let version = self.version_token("delete")?;
        let url = self.target_url().ok_or_else(|| self.not_delivered("delete"))?;
        debug!(resource = self.type_name(), url = %url, "deleting");

        self.client.execute(
            HttpMethod::Delete,
            false,
            &url,
            &[(VERSION_PARAM.to_string(), version)],
            self.auth.as_deref(),
            None,
            self.schema.type_name(),
        )?;

        self.fields.clear();
        self.identity = ResourceIdentity::unknown();
        self.request_url = None;
        self.state = DeliveryState::Deleted;
        Ok(())
    }

    fn target_url(&self) -> Option<Url> {
        self.identity
            .location()
            .or(self.request_url.as_ref())
            .cloned()
    }

    fn version_token(&self, operation: &'static str) -> Result<String, ResourceError> {
        self.identity
            .version()
            .map(str::to_string)
            .ok_or_else(|| ResourceError::MissingVersion {
                resource: self.type_name().to_string(),
                operation,
            })
    }

    /// Finds this type's payload inside a normalized response body: under
    /// its wrapper key, or the body itself if it carries an identity.
    fn extract<'b>(&self, body: &'b Value) -> Result<&'b Map<String, Value>, ResourceError> {
        let api_name = self.schema.api_name();
        if let Some(payload) = body.get(api_name).and_then(unwrap_one) {
            return Ok(payload);
        }
        match body.as_object() {
            Some(object) if object.contains_key(IDENTITY_KEY) => Ok(object),
            _ => Err(ResourceError::Field(FieldError::MissingWrapper {
                resource: self.type_name().to_string(),
                wrapper: api_name.to_string(),
                actual: excerpt(&body.to_string()),
            })),
        }
    }

    fn hydrate(&mut self, payload: &Map<String, Value>) -> Result<(), ResourceError> {
        let identity = ResourceIdentity::from_payload(
            self.schema.type_name(),
            payload,
            self.client.config().base_url(),
        )?;
        let fields = self.schema.coerce(payload)?;
        self.identity = identity;
        self.fields = fields;
        Ok(())
    }

    fn not_delivered(&self, operation: &'static str) -> ResourceError {
        ResourceError::NotDelivered {
            resource: self.type_name().to_string(),
            operation,
        }
    }

    fn deleted(&self, operation: &'static str) -> ResourceError {
        ResourceError::Deleted {
            resource: self.type_name().to_string(),
            operation,
        }
    }
}
