//! Declared field schemas and payload coercion.
//!
//! # Design
//! A [`Schema`] is an ordered list of `(name, Coercion)` pairs plus the names
//! a resource type goes by on the wire. It is validated once when built and
//! then shared (`Arc<Schema>`) by every instance of that type.
//!
//! The endpoint prefixes every JSON key with a namespace (`ns1.name`) and
//! sprinkles `@`-keyed type annotations through the payload. [`normalize`]
//! strips both before any field is looked at, so the rest of the crate only
//! ever deals in bare names. Caller-supplied names go through
//! [`strip_namespace`] with the same configured prefix, so `ns1.name` and
//! `name` find the same field while other dotted names are left alone.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::classify::excerpt;
use crate::error::{FieldError, SchemaError};

/// The identity sub-object's key; not declarable as a field.
pub const IDENTITY_KEY: &str = "resourceIdentity";

/// How a payload value is checked and shaped for a field.
#[derive(Debug, Clone)]
pub enum Coercion {
    /// String, number, or boolean.
    Scalar,
    /// A nested object shaped by its own schema.
    Object(Arc<Schema>),
    /// A JSON array whose items all follow the inner rule.
    List(Box<Coercion>),
    /// Any JSON value, kept as-is.
    Raw,
}

impl Coercion {
    pub fn list_of(inner: Coercion) -> Self {
        Coercion::List(Box::new(inner))
    }

    fn expected(&self) -> &'static str {
        match self {
            Coercion::Scalar => "a scalar",
            Coercion::Object(_) => "an object",
            Coercion::List(_) => "a list",
            Coercion::Raw => "any value",
        }
    }
}

#[derive(Debug, Clone)]
pub struct FieldDef {
    name: String,
    coercion: Coercion,
}

impl FieldDef {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn coercion(&self) -> &Coercion {
        &self.coercion
    }
}

/// Field layout and wire names for one resource type.
#[derive(Debug)]
pub struct Schema {
    type_name: String,
    api_name: String,
    plural: String,
    collection: String,
    cached: bool,
    fields: Vec<FieldDef>,
}

impl Schema {
    /// `type_name` appears in error messages (`TestCase`); `api_name` is the
    /// payload wrapper key (`testcase`).
    pub fn builder(type_name: impl Into<String>, api_name: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder {
            type_name: type_name.into(),
            api_name: api_name.into(),
            plural: None,
            collection: None,
            cached: false,
            fields: Vec::new(),
        }
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn api_name(&self) -> &str {
        &self.api_name
    }

    /// Wrapper key of a collection of this type, e.g. `testcases`.
    pub fn plural(&self) -> &str {
        &self.plural
    }

    /// Path of the collection relative to the API base.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Whether retrievals of this type go through the response cache.
    pub fn is_cached(&self) -> bool {
        self.cached
    }

    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|def| def.name == name)
    }

    /// Shapes a normalized payload object into declared fields. Undeclared
    /// keys are dropped; missing or null ones are absent.
    pub fn coerce(&self, payload: &Map<String, Value>) -> Result<Fields, FieldError> {
        self.coerce_at(payload, "")
    }

    fn coerce_at(&self, payload: &Map<String, Value>, path: &str) -> Result<Fields, FieldError> {
        let mut values = BTreeMap::new();
        for def in &self.fields {
            let Some(value) = payload.get(&def.name) else {
                continue;
            };
            if value.is_null() {
                continue;
            }
            let field_path = join_path(path, &def.name);
            values.insert(def.name.clone(), self.coerce_value(&def.coercion, value, &field_path)?);
        }
        Ok(Fields { values })
    }

    /// Checks one value for field `name` against its declared rule.
    pub fn coerce_field(&self, name: &str, value: Value) -> Result<Value, FieldError> {
        let def = self.field(name).ok_or_else(|| FieldError::Unknown {
            resource: self.type_name.clone(),
            field: name.to_string(),
        })?;
        if value.is_null() {
            return Ok(Value::Null);
        }
        self.coerce_value(&def.coercion, &value, name)
    }

    fn coerce_value(&self, rule: &Coercion, value: &Value, path: &str) -> Result<Value, FieldError> {
        match (rule, value) {
            (Coercion::Raw, _) => Ok(value.clone()),
            (Coercion::Scalar, Value::String(_) | Value::Number(_) | Value::Bool(_)) => {
                Ok(value.clone())
            }
            (Coercion::Object(nested), Value::Object(object)) => {
                let mut shaped = nested.coerce_at(object, path)?.into_map();
                if let Some(identity) = object.get(IDENTITY_KEY) {
                    shaped.insert(IDENTITY_KEY.to_string(), identity.clone());
                }
                Ok(Value::Object(shaped))
            }
            (Coercion::List(inner), Value::Array(items)) => items
                .iter()
                .enumerate()
                .map(|(index, item)| self.coerce_value(inner, item, &format!("{path}[{index}]")))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            _ => Err(FieldError::Mismatch {
                resource: self.type_name.clone(),
                field: path.to_string(),
                expected: rule.expected(),
                actual: excerpt(&value.to_string()),
            }),
        }
    }
}

fn join_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}.{name}")
    }
}

pub struct SchemaBuilder {
    type_name: String,
    api_name: String,
    plural: Option<String>,
    collection: Option<String>,
    cached: bool,
    fields: Vec<FieldDef>,
}

impl SchemaBuilder {
    /// Defaults to `api_name` + `s`.
    pub fn plural(mut self, plural: impl Into<String>) -> Self {
        self.plural = Some(plural.into());
        self
    }

    /// Defaults to the plural.
    pub fn collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    /// Serves `GET`s of this type from the shared response cache. Off by
    /// default: cached reads can be up to one TTL old, so a re-fetch after
    /// a conflict may still see the stale version.
    pub fn cached(mut self, cached: bool) -> Self {
        self.cached = cached;
        self
    }

    pub fn field(mut self, name: impl Into<String>, coercion: Coercion) -> Self {
        self.fields.push(FieldDef {
            name: name.into(),
            coercion,
        });
        self
    }

    pub fn build(self) -> Result<Arc<Schema>, SchemaError> {
        if self.type_name.trim().is_empty() {
            return Err(SchemaError::EmptyName("type name"));
        }
        if self.api_name.trim().is_empty() {
            return Err(SchemaError::EmptyName("api name"));
        }
        for (index, def) in self.fields.iter().enumerate() {
            if def.name.trim().is_empty() {
                return Err(SchemaError::EmptyName("field name"));
            }
            if def.name == IDENTITY_KEY {
                return Err(SchemaError::ReservedField {
                    resource: self.type_name.clone(),
                    field: def.name.clone(),
                });
            }
            if self.fields[..index].iter().any(|prior| prior.name == def.name) {
                return Err(SchemaError::DuplicateField {
                    resource: self.type_name.clone(),
                    field: def.name.clone(),
                });
            }
        }

        let plural = self.plural.unwrap_or_else(|| format!("{}s", self.api_name));
        let collection = self.collection.unwrap_or_else(|| plural.clone());
        Ok(Arc::new(Schema {
            type_name: self.type_name,
            api_name: self.api_name,
            plural,
            collection,
            cached: self.cached,
            fields: self.fields,
        }))
    }
}

/// Coerced field values of one resource, keyed by bare name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fields {
    values: BTreeMap<String, Value>,
}

impl Fields {
    /// Looks up a field by its bare name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(Value::as_str)
    }

    pub(crate) fn insert(&mut self, name: &str, value: Value) {
        if value.is_null() {
            self.values.remove(name);
        } else {
            self.values.insert(name.to_string(), value);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.values.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub(crate) fn clear(&mut self) {
        self.values.clear();
    }

    fn into_map(self) -> Map<String, Value> {
        self.values.into_iter().collect()
    }

    /// Form parameters for a mutation body. Strings go as-is, other scalars
    /// in their JSON text form, structured values as JSON.
    pub(crate) fn form_pairs(&self) -> Vec<(String, String)> {
        self.values
            .iter()
            .map(|(name, value)| {
                let text = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (name.clone(), text)
            })
            .collect()
    }
}

impl fmt::Display for Fields {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&Value::Object(self.clone().into_map()).to_string())
    }
}

/// Drops the configured namespace prefix from a caller-supplied name.
pub fn strip_namespace<'n>(name: &'n str, namespace: &str) -> &'n str {
    name.strip_prefix(namespace).unwrap_or(name)
}

/// Strips the namespace prefix from every object key and drops `@`
/// annotations, recursively.
pub fn normalize(value: Value, namespace: &str) -> Value {
    match value {
        Value::Object(object) => Value::Object(
            object
                .into_iter()
                .filter(|(key, _)| !key.starts_with('@'))
                .map(|(key, value)| {
                    let key = key
                        .strip_prefix(namespace)
                        .map(str::to_string)
                        .unwrap_or(key);
                    (key, normalize(value, namespace))
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(
            items
                .into_iter()
                .map(|item| normalize(item, namespace))
                .collect(),
        ),
        other => other,
    }
}

/// A wrapper value is either the object itself or a one-element array of it.
pub(crate) fn unwrap_one(value: &Value) -> Option<&Map<String, Value>> {
    match value {
        Value::Object(object) => Some(object),
        Value::Array(items) => items.first().and_then(Value::as_object),
        _ => None,
    }
}

/// Every object in a wrapper value, array or single.
pub(crate) fn unwrap_many(value: &Value) -> Vec<&Map<String, Value>> {
    match value {
        Value::Object(object) => vec![object],
        Value::Array(items) => items.iter().filter_map(Value::as_object).collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn step_schema() -> Arc<Schema> {
        Schema::builder("TestCaseStep", "testcasestep")
            .field("name", Coercion::Scalar)
            .field("stepNumber", Coercion::Scalar)
            .build()
            .unwrap()
    }

    fn case_schema() -> Arc<Schema> {
        Schema::builder("TestCase", "testcase")
            .field("name", Coercion::Scalar)
            .field("description", Coercion::Scalar)
            .field("latestVersion", Coercion::Object(step_schema()))
            .field("steps", Coercion::list_of(Coercion::Object(step_schema())))
            .field("tags", Coercion::list_of(Coercion::Scalar))
            .build()
            .unwrap()
    }

    fn object(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn normalize_strips_namespace_and_annotations() {
        let raw = json!({
            "@xsi.type": "ns1:testcase",
            "ns1.name": "Login",
            "ns1.steps": [{"@xsi.type": "ns1:step", "ns1.name": "open"}],
        });
        assert_eq!(
            normalize(raw, "ns1."),
            json!({"name": "Login", "steps": [{"name": "open"}]})
        );
    }

    #[test]
    fn coerce_keeps_declared_fields_only() {
        let payload = object(json!({
            "name": "Login",
            "unexpected": true,
            "description": null,
            "tags": ["smoke", "auth"],
        }));
        let fields = case_schema().coerce(&payload).unwrap();
        assert_eq!(fields.get_str("name"), Some("Login"));
        assert_eq!(fields.get("description"), None);
        assert_eq!(fields.get("unexpected"), None);
        assert_eq!(fields.get("tags"), Some(&json!(["smoke", "auth"])));
        assert_eq!(fields.len(), 2);
    }

    #[test]
    fn strip_namespace_only_removes_configured_prefix() {
        assert_eq!(strip_namespace("ns1.name", "ns1."), "name");
        assert_eq!(strip_namespace("name", "ns1."), "name");
        assert_eq!(strip_namespace("ns2.name", "ns1."), "ns2.name");
        assert_eq!(strip_namespace("tcm.name", "tcm."), "name");
    }

    #[test]
    fn nested_objects_follow_their_schema() {
        let payload = object(json!({
            "steps": [
                {"name": "open", "stepNumber": 1, "extra": "dropped"},
                {"name": "submit", "stepNumber": 2},
            ],
        }));
        let fields = case_schema().coerce(&payload).unwrap();
        assert_eq!(
            fields.get("steps"),
            Some(&json!([
                {"name": "open", "stepNumber": 1},
                {"name": "submit", "stepNumber": 2},
            ]))
        );
    }

    #[test]
    fn scalar_mismatch_names_field_and_fragment() {
        let payload = object(json!({"name": {"first": "no"}}));
        let err = case_schema().coerce(&payload).unwrap_err();
        assert_eq!(
            err,
            FieldError::Mismatch {
                resource: "TestCase".to_string(),
                field: "name".to_string(),
                expected: "a scalar",
                actual: r#"{"first":"no"}"#.to_string(),
            }
        );
    }

    #[test]
    fn nested_mismatch_reports_path() {
        let payload = object(json!({"steps": [{"name": "ok"}, {"name": ["bad"]}]}));
        let err = case_schema().coerce(&payload).unwrap_err();
        assert!(matches!(
            err,
            FieldError::Mismatch { ref field, .. } if field == "steps[1].name"
        ));
    }

    #[test]
    fn list_field_rejects_single_object() {
        let payload = object(json!({"tags": "smoke"}));
        let err = case_schema().coerce(&payload).unwrap_err();
        assert!(matches!(err, FieldError::Mismatch { expected: "a list", .. }));
    }

    #[test]
    fn coerce_field_rejects_unknown_name() {
        let err = case_schema().coerce_field("owner", json!("me")).unwrap_err();
        assert!(matches!(err, FieldError::Unknown { .. }));
    }

    #[test]
    fn builder_defaults_plural_and_collection() {
        let schema = case_schema();
        assert_eq!(schema.plural(), "testcases");
        assert_eq!(schema.collection(), "testcases");
    }

    #[test]
    fn caching_is_opt_in() {
        assert!(!case_schema().is_cached());
        let cached = Schema::builder("Product", "product")
            .cached(true)
            .build()
            .unwrap();
        assert!(cached.is_cached());
    }

    #[test]
    fn builder_rejects_duplicate_fields() {
        let err = Schema::builder("TestCase", "testcase")
            .field("name", Coercion::Scalar)
            .field("name", Coercion::Raw)
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::DuplicateField { .. }));
    }

    #[test]
    fn builder_rejects_identity_field() {
        let err = Schema::builder("TestCase", "testcase")
            .field(IDENTITY_KEY, Coercion::Raw)
            .build()
            .unwrap_err();
        assert!(matches!(err, SchemaError::ReservedField { .. }));
    }

    #[test]
    fn form_pairs_render_scalars() {
        let payload = object(json!({"name": "Login", "tags": ["a"]}));
        let fields = case_schema().coerce(&payload).unwrap();
        assert_eq!(
            fields.form_pairs(),
            vec![
                ("name".to_string(), "Login".to_string()),
                ("tags".to_string(), r#"["a"]"#.to_string()),
            ]
        );
    }
}
