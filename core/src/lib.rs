//! Synchronous resource-object client for the test case management REST API.
//!
//! # Overview
//! Callers declare a [`Schema`] per resource type, then get, construct, save,
//! and delete [`RemoteObject`]s and query [`ListObject`]s through an
//! [`ApiClient`]. Objects fetch lazily on first access and memoize the
//! result. Every response runs through one classifier that turns status,
//! content type, and body into either a payload or a typed [`ResourceError`].
//!
//! # Design
//! - The network sits behind the [`Transport`] trait; the core never opens a
//!   socket itself. [`UreqTransport`] is the blocking default, and tests plug
//!   in scripted fakes.
//! - `GET` responses of schemas built with `.cached(true)` are shared by URL
//!   for a TTL ([`CachedTransport`]). Other reads and all mutations always
//!   reach the server.
//! - Updates and deletes carry the version captured at delivery
//!   (`originalVersionId`); a stale token surfaces as
//!   [`ResourceError::Conflict`] and is never retried.
//! - Wire payloads are namespaced (`ns1.name`) and annotated (`@xsi.type`);
//!   both are stripped once on arrival.

pub mod cache;
pub mod classify;
pub mod client;
pub mod config;
pub mod credentials;
pub mod error;
pub mod fields;
pub mod http;
pub mod identity;
pub mod list;
pub mod resource;

#[cfg(test)]
mod testing;

pub use cache::{CachedTransport, Clock, MemoryCache, ResponseCache, SystemClock, DEFAULT_CACHE_TTL};
pub use classify::{classify, Outcome, RequestContext};
pub use client::ApiClient;
pub use config::ApiConfig;
pub use credentials::Credentials;
pub use error::{BadResponse, ConfigError, FieldError, ResourceError, SchemaError, TransportError};
pub use fields::{Coercion, FieldDef, Fields, Schema, SchemaBuilder};
#[cfg(feature = "ureq")]
pub use http::UreqTransport;
pub use http::{HttpMethod, HttpRequest, HttpResponse, Transport};
pub use identity::ResourceIdentity;
pub use list::{ListObject, ListQuery, SortDirection};
pub use resource::{DeliveryState, RemoteObject};
