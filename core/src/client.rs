//! Shared client context for resource objects.
//!
//! # Design
//! `ApiClient` is a cheap handle (`Arc` inside) holding the configuration and
//! the transport stack. Every [`RemoteObject`] and [`ListObject`] keeps a
//! clone, so objects stay usable on their own after the caller drops its
//! handle.
//!
//! The client keeps the bare transport and a [`CachedTransport`] over it.
//! Retrievals of schemas that opt in with [`SchemaBuilder::cached`] go
//! through the cache; everything else, mutations included, reaches the
//! server. The cache store is injectable so one store can back several
//! clients, or a test can watch it. Each round-trip goes through
//! [`ApiClient::execute`], which builds the wire request, classifies the
//! response, and follows redirects on `GET`.
//!
//! [`SchemaBuilder::cached`]: crate::fields::SchemaBuilder::cached

use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::cache::{CachedTransport, MemoryCache, ResponseCache};
use crate::classify::{classify, Outcome, RequestContext};
use crate::config::{ApiConfig, FORM_CONTENT_TYPE, JSON_CONTENT_TYPE};
use crate::credentials::Credentials;
use crate::error::{BadResponse, FieldError, ResourceError};
use crate::fields::{normalize, strip_namespace, Schema};
use crate::http::{HttpMethod, HttpRequest, Transport};
use crate::list::{ListObject, ListQuery};
use crate::resource::RemoteObject;

/// Query parameter asking the endpoint for JSON.
const TYPE_PARAM: (&str, &str) = ("_type", "json");

const MAX_REDIRECTS: usize = 5;

/// A classified round-trip.
#[derive(Debug)]
pub(crate) struct Exchange {
    /// Where the final request went, without the `_type` parameter.
    pub target: Url,
    /// The exact URL of the final request.
    pub sent_url: String,
    pub status: u16,
    pub reason: String,
    pub outcome: Outcome,
}

struct ClientInner {
    config: ApiConfig,
    direct: Arc<dyn Transport>,
    cached: CachedTransport<Arc<dyn Transport>>,
}

#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ClientInner>,
}

impl fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.inner.config.base_url().as_str())
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    /// Wraps `transport` with a private in-memory cache.
    pub fn new(config: ApiConfig, transport: impl Transport + 'static) -> Self {
        Self::with_cache(config, transport, Arc::new(MemoryCache::new()))
    }

    /// Wraps `transport` with the given cache store.
    pub fn with_cache(
        config: ApiConfig,
        transport: impl Transport + 'static,
        cache: Arc<dyn ResponseCache>,
    ) -> Self {
        let direct: Arc<dyn Transport> = Arc::new(transport);
        let cached = CachedTransport::new(Arc::clone(&direct), cache).with_ttl(config.cache_ttl());
        Self {
            inner: Arc::new(ClientInner {
                config,
                direct,
                cached,
            }),
        }
    }

    /// Client over a blocking `ureq` agent.
    #[cfg(feature = "ureq")]
    pub fn connect(config: ApiConfig) -> Self {
        Self::new(config, crate::http::UreqTransport::new())
    }

    pub fn config(&self) -> &ApiConfig {
        &self.inner.config
    }

    /// Resolves a URI against the API base; absolute URIs replace it.
    pub fn resolve(&self, uri: &str) -> Result<Url, ResourceError> {
        self.inner
            .config
            .base_url()
            .join(uri)
            .map_err(|source| ResourceError::InvalidUri {
                uri: uri.to_string(),
                source,
            })
    }

    /// A pending reference to one resource. Nothing is fetched yet.
    ///
    /// A bare key (no `/`) addresses `<collection>/<key>`; anything else is
    /// treated as a URI.
    pub fn get(&self, schema: &Arc<Schema>, uri_or_key: &str) -> Result<RemoteObject, ResourceError> {
        let uri = if uri_or_key.contains('/') {
            uri_or_key.to_string()
        } else {
            format!("{}/{}", schema.collection().trim_end_matches('/'), uri_or_key)
        };
        let url = self.resolve(&uri)?;
        Ok(RemoteObject::pending(self.clone(), Arc::clone(schema), url))
    }

    /// A new, unsaved resource built from field values.
    pub fn construct<I, K>(&self, schema: &Arc<Schema>, fields: I) -> Result<RemoteObject, FieldError>
    where
        I: IntoIterator<Item = (K, Value)>,
        K: AsRef<str>,
    {
        RemoteObject::constructed(self.clone(), Arc::clone(schema), fields)
    }

    /// A pending collection query. Nothing is fetched yet.
    pub fn list(&self, schema: &Arc<Schema>, query: ListQuery) -> ListObject {
        ListObject::new(self.clone(), Arc::clone(schema), query)
    }

    pub(crate) fn normalize(&self, value: Value) -> Value {
        normalize(value, self.inner.config.namespace())
    }

    /// The bare field name for a caller-supplied, possibly namespaced one.
    pub(crate) fn field_name<'n>(&self, name: &'n str) -> &'n str {
        strip_namespace(name, self.inner.config.namespace())
    }

    fn transport(&self, cached: bool) -> &dyn Transport {
        if cached {
            &self.inner.cached
        } else {
            self.inner.direct.as_ref()
        }
    }

    fn wire_url(url: &Url, params: &[(String, String)]) -> String {
        let mut wire = url.clone();
        let has_type = url.query_pairs().any(|(key, _)| key == TYPE_PARAM.0);
        if !params.is_empty() || !has_type {
            let mut pairs = wire.query_pairs_mut();
            for (key, value) in params {
                pairs.append_pair(key, value);
            }
            if !has_type {
                pairs.append_pair(TYPE_PARAM.0, TYPE_PARAM.1);
            }
        }
        wire.into()
    }

    /// Sends one request and classifies the answer. `GET` follows redirects.
    /// `cached` routes the request through the response cache.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn execute(
        &self,
        method: HttpMethod,
        cached: bool,
        url: &Url,
        params: &[(String, String)],
        auth: Option<&Credentials>,
        form: Option<&[(String, String)]>,
        resource: &str,
    ) -> Result<Exchange, ResourceError> {
        let mut target = url.clone();
        let mut params = params;
        for _ in 0..=MAX_REDIRECTS {
            let sent_url = Self::wire_url(&target, params);
            let mut request = HttpRequest::new(method, sent_url.clone());
            request
                .headers
                .push(("accept".to_string(), JSON_CONTENT_TYPE.to_string()));
            if let Some(auth) = auth {
                request.headers.extend(auth.headers());
            }
            if let Some(form) = form {
                request
                    .headers
                    .push(("content-type".to_string(), FORM_CONTENT_TYPE.to_string()));
                request.body = Some(
                    url::form_urlencoded::Serializer::new(String::new())
                        .extend_pairs(form)
                        .finish(),
                );
            }

            debug!(method = method.as_str(), url = %sent_url, "sending request");
            let response = self.transport(cached).send(&request)?;
            debug!(method = method.as_str(), url = %sent_url, status = response.status, "received response");

            let ctx = RequestContext {
                resource,
                url: &sent_url,
            };
            let outcome = classify(&ctx, &response)?;

            if let Outcome::Redirect { ref location, .. } = outcome {
                if method == HttpMethod::Get {
                    target = target.join(location).map_err(|source| ResourceError::InvalidUri {
                        uri: location.clone(),
                        source,
                    })?;
                    params = &[];
                    debug!(location = %target, "following redirect");
                    continue;
                }
            }

            return Ok(Exchange {
                target,
                sent_url,
                status: response.status,
                reason: response.reason,
                outcome,
            });
        }

        Err(ResourceError::BadResponse(BadResponse::TooManyRedirects {
            resource: resource.to_string(),
            url: Self::wire_url(url, &[]),
        }))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::testing::{json_response, text_response, ScriptedTransport};

    fn client(transport: Arc<ScriptedTransport>) -> ApiClient {
        ApiClient::new(ApiConfig::new("http://fake.base/rest/").unwrap(), transport)
    }

    #[test]
    fn resolve_joins_relative_and_keeps_absolute() {
        let c = client(Arc::new(ScriptedTransport::default()));
        assert_eq!(
            c.resolve("testresources/3").unwrap().as_str(),
            "http://fake.base/rest/testresources/3"
        );
        assert_eq!(
            c.resolve("http://some.other.url/testresources/3").unwrap().as_str(),
            "http://some.other.url/testresources/3"
        );
    }

    #[test]
    fn wire_url_appends_params_then_type() {
        let url = Url::parse("http://fake.base/rest/testresources").unwrap();
        let params = vec![("filter-name".to_string(), "a b".to_string())];
        assert_eq!(
            ApiClient::wire_url(&url, &params),
            "http://fake.base/rest/testresources?filter-name=a+b&_type=json"
        );
    }

    #[test]
    fn wire_url_does_not_repeat_type() {
        let url = Url::parse("http://fake.base/rest/x?_type=json").unwrap();
        assert_eq!(ApiClient::wire_url(&url, &[]), "http://fake.base/rest/x?_type=json");
    }

    #[test]
    fn execute_sends_accept_and_form_body() {
        let transport = Arc::new(ScriptedTransport::new(vec![json_response(200, &json!({}))]));
        let c = client(transport.clone());
        let url = c.resolve("testresources/3").unwrap();
        let form = vec![
            ("name".to_string(), "A & B".to_string()),
            ("originalVersionId".to_string(), "2".to_string()),
        ];

        c.execute(HttpMethod::Put, false, &url, &[], None, Some(form.as_slice()), "TestResource")
            .unwrap();

        let request = transport.last_request();
        assert_eq!(request.method, HttpMethod::Put);
        assert_eq!(request.header("accept"), Some("application/json"));
        assert_eq!(
            request.header("content-type"),
            Some("application/x-www-form-urlencoded")
        );
        assert_eq!(
            request.body.as_deref(),
            Some("name=A+%26+B&originalVersionId=2")
        );
    }

    #[test]
    fn get_follows_redirects() {
        let mut moved = text_response(301, "");
        moved
            .headers
            .push(("location".to_string(), "/rest/testresources/4".to_string()));
        let transport = Arc::new(ScriptedTransport::new(vec![
            moved,
            json_response(200, &json!({"ok": true})),
        ]));
        let c = client(transport.clone());
        let url = c.resolve("testresources/3").unwrap();

        let exchange = c
            .execute(HttpMethod::Get, false, &url, &[], None, None, "TestResource")
            .unwrap();

        assert_eq!(exchange.target.as_str(), "http://fake.base/rest/testresources/4");
        assert_eq!(
            transport.requests()[1].url,
            "http://fake.base/rest/testresources/4?_type=json"
        );
    }

    #[test]
    fn endless_redirects_are_bad_response() {
        let transport = Arc::new(ScriptedTransport::default());
        for _ in 0..=MAX_REDIRECTS {
            let mut moved = text_response(302, "");
            moved
                .headers
                .push(("location".to_string(), "testresources/3".to_string()));
            transport.push(moved);
        }
        let c = client(transport);
        let url = c.resolve("testresources/3").unwrap();

        let err = c
            .execute(HttpMethod::Get, false, &url, &[], None, None, "TestResource")
            .unwrap_err();

        assert!(matches!(
            err,
            ResourceError::BadResponse(BadResponse::TooManyRedirects { .. })
        ));
    }

    #[test]
    fn transport_failure_propagates() {
        let c = client(Arc::new(ScriptedTransport::default()));
        let url = c.resolve("testresources/3").unwrap();
        let err = c
            .execute(HttpMethod::Get, false, &url, &[], None, None, "TestResource")
            .unwrap_err();
        assert!(matches!(err, ResourceError::Transport(_)));
    }
}
