//! Test doubles shared by the unit tests.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;

use crate::cache::Clock;
use crate::error::TransportError;
use crate::http::{HttpRequest, HttpResponse, Transport};

/// Replays canned responses in order and records every request it sees.
#[derive(Default)]
pub struct ScriptedTransport {
    responses: Mutex<VecDeque<HttpResponse>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub fn new(responses: Vec<HttpResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, response: HttpResponse) {
        self.responses.lock().push_back(response);
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    pub fn last_request(&self) -> HttpRequest {
        self.requests
            .lock()
            .last()
            .cloned()
            .expect("no request was sent")
    }
}

impl Transport for ScriptedTransport {
    fn send(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
        self.requests.lock().push(request.clone());
        self.responses.lock().pop_front().ok_or_else(|| {
            TransportError::new(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "no scripted response left",
            ))
        })
    }
}

/// A clock that only moves when told to.
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock()
    }
}

pub fn json_response(status: u16, body: &Value) -> HttpResponse {
    HttpResponse {
        status,
        reason: String::new(),
        headers: vec![("content-type".to_string(), "application/json".to_string())],
        body: body.to_string(),
    }
}

pub fn text_response(status: u16, body: &str) -> HttpResponse {
    HttpResponse {
        status,
        reason: String::new(),
        headers: vec![("content-type".to_string(), "text/plain".to_string())],
        body: body.to_string(),
    }
}

/// `{"ns1.<type>": [{...}]}` with namespaced field names and an identity.
pub fn make_one(api_name: &str, fields: &[(&str, Value)], identity: Option<Value>) -> Value {
    let mut object = serde_json::Map::new();
    object.insert("@xsi.type".to_string(), Value::from(format!("ns1:{api_name}")));
    for (name, value) in fields {
        object.insert(format!("ns1.{name}"), value.clone());
    }
    if let Some(identity) = identity {
        object.insert("ns1.resourceIdentity".to_string(), identity);
    }
    serde_json::json!({ format!("ns1.{api_name}"): [Value::Object(object)] })
}

pub fn make_identity(id: &str, version: &str, url: &str) -> Value {
    serde_json::json!({
        "@xsi.type": "ns1:ResourceIdentity",
        "ns1.id": id,
        "ns1.version": version,
        "ns1.url": url,
    })
}

/// A `searchResult` envelope around several entries of one type.
pub fn make_searchresult(api_name: &str, plural: &str, entries: Vec<Value>) -> Value {
    let total = entries.len();
    serde_json::json!({
        "ns1.searchResult": [{
            "@xsi.type": "ns1:searchResult",
            "ns1.totalResults": total,
            format!("ns1.{plural}"): [{
                "@xsi.type": format!("ns1:ArrayOf{api_name}"),
                format!("ns1.{api_name}"): entries,
            }],
        }]
    })
}
