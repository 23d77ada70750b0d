//! Collection queries and their delivered entries.
//!
//! # Design
//! A `ListObject` is identified by its [`ListQuery`] over one schema's
//! collection. The query is fixed at construction; [`ListObject::filter`],
//! [`ListObject::sort`] and [`ListObject::page`] return a new, undelivered
//! list instead of changing this one.
//!
//! Delivery follows the same rule as a single resource: the first access
//! fetches, later accesses reuse the memoized entries until
//! [`ListObject::reset`]. Entries are hydrated straight from the list
//! payload, so reading them never triggers a second request.

use std::cmp::Ordering;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::debug;

use crate::classify::Outcome;
use crate::client::ApiClient;
use crate::credentials::Credentials;
use crate::error::{BadResponse, ResourceError};
use crate::fields::{unwrap_many, unwrap_one, Schema};
use crate::http::HttpMethod;
use crate::resource::RemoteObject;

const SEARCH_RESULT_KEY: &str = "searchResult";
const TOTAL_RESULTS_KEY: &str = "totalResults";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            SortDirection::Ascending => "asc",
            SortDirection::Descending => "desc",
        }
    }
}

/// Server-side filter, sort and paging parameters for a collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListQuery {
    filters: Vec<(String, String)>,
    sort: Option<(String, SortDirection)>,
    page: Option<(u32, u32)>,
}

impl ListQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `filter-<field>=<value>`. Repeating a field adds another value.
    pub fn filter(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.push((field.into(), value.into()));
        self
    }

    pub fn sort(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.sort = Some((field.into(), direction));
        self
    }

    /// One-based page number and page size.
    pub fn page(mut self, number: u32, size: u32) -> Self {
        self.page = Some((number, size));
        self
    }

    /// Query parameters in a stable order.
    pub fn params(&self) -> Vec<(String, String)> {
        let mut params: Vec<(String, String)> = self
            .filters
            .iter()
            .map(|(field, value)| (format!("filter-{field}"), value.clone()))
            .collect();
        if let Some((field, direction)) = &self.sort {
            params.push(("sortfield".to_string(), field.clone()));
            params.push(("sortdirection".to_string(), direction.as_str().to_string()));
        }
        if let Some((number, size)) = self.page {
            params.push(("pagenumber".to_string(), number.to_string()));
            params.push(("pagesize".to_string(), size.to_string()));
        }
        params
    }
}

#[derive(Debug, Clone)]
struct Delivered {
    entries: Vec<RemoteObject>,
    total_results: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct ListObject {
    client: ApiClient,
    schema: Arc<Schema>,
    query: ListQuery,
    auth: Option<Arc<Credentials>>,
    delivered: Option<Delivered>,
}

impl ListObject {
    pub(crate) fn new(client: ApiClient, schema: Arc<Schema>, query: ListQuery) -> Self {
        Self {
            client,
            schema,
            query,
            auth: None,
            delivered: None,
        }
    }

    /// Sends these credentials when delivering; entries inherit them.
    pub fn with_auth(mut self, auth: Arc<Credentials>) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn auth(&self) -> Option<&Arc<Credentials>> {
        self.auth.as_ref()
    }

    pub fn query(&self) -> &ListQuery {
        &self.query
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    /// Name used in messages, e.g. `TestCaseList`.
    pub fn type_name(&self) -> String {
        format!("{}List", self.schema.type_name())
    }

    pub fn is_delivered(&self) -> bool {
        self.delivered.is_some()
    }

    pub fn filter(&self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.derive(self.query.clone().filter(field, value))
    }

    pub fn sort(&self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.derive(self.query.clone().sort(field, direction))
    }

    pub fn page(&self, number: u32, size: u32) -> Self {
        self.derive(self.query.clone().page(number, size))
    }

    fn derive(&self, query: ListQuery) -> Self {
        Self {
            client: self.client.clone(),
            schema: Arc::clone(&self.schema),
            query,
            auth: self.auth.clone(),
            delivered: None,
        }
    }

    pub fn deliver(&mut self) -> Result<(), ResourceError> {
        self.delivered()?;
        Ok(())
    }

    pub fn reset(&mut self) {
        self.delivered = None;
    }

    fn delivered(&mut self) -> Result<&mut Delivered, ResourceError> {
        let delivered = match self.delivered.take() {
            Some(delivered) => delivered,
            None => self.fetch()?,
        };
        Ok(self.delivered.insert(delivered))
    }

    fn fetch(&self) -> Result<Delivered, ResourceError> {
        let type_name = self.type_name();
        let url = self.client.resolve(self.schema.collection())?;
        let params = self.query.params();
        debug!(resource = %type_name, url = %url, params = params.len(), "delivering list");

        let exchange = self.client.execute(
            HttpMethod::Get,
            self.schema.is_cached(),
            &url,
            &params,
            self.auth.as_deref(),
            None,
            &type_name,
        )?;

        match exchange.outcome {
            Outcome::Payload { body, .. } => self.parse(&self.client.normalize(body)),
            Outcome::NoContent => Ok(Delivered {
                entries: Vec::new(),
                total_results: Some(0),
            }),
            Outcome::Redirect { .. } => Err(ResourceError::BadResponse(
                BadResponse::TooManyRedirects {
                    resource: type_name,
                    url: exchange.sent_url,
                },
            )),
        }
    }

    /// Accepts `searchResult` envelopes as well as a bare plural or type
    /// wrapper at the top level.
    fn parse(&self, body: &Value) -> Result<Delivered, ResourceError> {
        let envelope = body.get(SEARCH_RESULT_KEY).and_then(unwrap_one);
        let container: Option<&Map<String, Value>> = envelope.or_else(|| body.as_object());
        let total_results = envelope
            .and_then(|e| e.get(TOTAL_RESULTS_KEY))
            .and_then(|total| match total {
                Value::Number(n) => n.as_u64(),
                Value::String(s) => s.parse().ok(),
                _ => None,
            });

        let api_name = self.schema.api_name();
        let payloads: Vec<&Map<String, Value>> = match container {
            Some(container) => match container.get(self.schema.plural()) {
                Some(plural) => unwrap_many(plural)
                    .into_iter()
                    .filter_map(|group| group.get(api_name))
                    .flat_map(unwrap_many)
                    .collect(),
                None => container.get(api_name).map(unwrap_many).unwrap_or_default(),
            },
            None => Vec::new(),
        };

        let entries = payloads
            .into_iter()
            .map(|payload| {
                RemoteObject::from_payload(
                    self.client.clone(),
                    Arc::clone(&self.schema),
                    self.auth.clone(),
                    payload,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;
        debug!(resource = %self.type_name(), entries = entries.len(), "list delivered");

        Ok(Delivered {
            entries,
            total_results,
        })
    }

    /// Entries in server order.
    pub fn entries(&mut self) -> Result<&[RemoteObject], ResourceError> {
        Ok(&self.delivered()?.entries)
    }

    pub fn get(&mut self, index: usize) -> Result<Option<&RemoteObject>, ResourceError> {
        Ok(self.delivered()?.entries.get(index))
    }

    pub fn get_mut(&mut self, index: usize) -> Result<Option<&mut RemoteObject>, ResourceError> {
        Ok(self.delivered()?.entries.get_mut(index))
    }

    pub fn len(&mut self) -> Result<usize, ResourceError> {
        Ok(self.delivered()?.entries.len())
    }

    pub fn is_empty(&mut self) -> Result<bool, ResourceError> {
        Ok(self.len()? == 0)
    }

    pub fn iter(&mut self) -> Result<std::slice::Iter<'_, RemoteObject>, ResourceError> {
        Ok(self.delivered()?.entries.iter())
    }

    /// The server's count across all pages, when it reports one.
    pub fn total_results(&mut self) -> Result<Option<u64>, ResourceError> {
        Ok(self.delivered()?.total_results)
    }

    /// Entries ordered by one field, ties kept in server order. Entries
    /// without the field sort last. The list itself is not reordered.
    pub fn sorted_by(&mut self, field: &str) -> Result<Vec<&RemoteObject>, ResourceError> {
        let mut sorted: Vec<&RemoteObject> = self.delivered()?.entries.iter().collect();
        sorted.sort_by(|a, b| compare_values(a.peek_field(field), b.peek_field(field)));
        Ok(sorted)
    }

    pub fn into_entries(mut self) -> Result<Vec<RemoteObject>, ResourceError> {
        self.delivered()?;
        Ok(self
            .delivered
            .map(|delivered| delivered.entries)
            .unwrap_or_default())
    }
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let x = x.as_f64().unwrap_or(f64::NAN);
            let y = y.as_f64().unwrap_or(f64::NAN);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(x), Some(y)) => x.to_string().cmp(&y.to_string()),
    }
}
