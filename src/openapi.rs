//! Minimal OpenAPI 3 model: just enough to generate commands.
//!
//! Unknown fields are ignored on deserialization. Maps are `BTreeMap` so that
//! every walk over paths, methods, content types and properties is ordered.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type SecurityRequirement = BTreeMap<String, Vec<String>>;

/// One loaded schema document.
#[derive(Debug, Clone)]
pub struct SpecDocument {
    /// Stable identifier: the filename without extension.
    pub name: String,
    pub filename: String,
    pub spec: Spec,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Spec {
    pub openapi: String,
    pub info: Info,
    pub servers: Vec<Server>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<Tag>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub security: Vec<SecurityRequirement>,
    pub paths: BTreeMap<String, PathItem>,
    pub components: Components,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Info {
    pub title: String,
    pub version: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Tag {
    pub name: String,
    pub description: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Server {
    pub url: String,
    pub description: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Components {
    pub schemas: BTreeMap<String, Schema>,
    pub security_schemes: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct PathItem {
    pub get: Option<Operation>,
    pub post: Option<Operation>,
    pub put: Option<Operation>,
    pub delete: Option<Operation>,
    pub patch: Option<Operation>,
    pub head: Option<Operation>,
    pub options: Option<Operation>,
}

impl PathItem {
    /// Declared operations keyed by upper-case method, in lexical method order.
    pub fn operations(&self) -> BTreeMap<&'static str, &Operation> {
        let mut out = BTreeMap::new();
        let slots = [
            ("GET", &self.get),
            ("POST", &self.post),
            ("PUT", &self.put),
            ("DELETE", &self.delete),
            ("PATCH", &self.patch),
            ("HEAD", &self.head),
            ("OPTIONS", &self.options),
        ];
        for (method, op) in slots {
            if let Some(op) = op {
                out.insert(method, op);
            }
        }
        out
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Operation {
    pub operation_id: String,
    pub tags: Vec<String>,
    pub summary: String,
    pub description: String,
    pub parameters: Vec<Parameter>,
    pub request_body: Option<RequestBody>,
    pub responses: BTreeMap<String, Response>,
    /// `None` inherits the document-level requirement; `Some(vec![])` opts out.
    pub security: Option<Vec<SecurityRequirement>>,
    pub servers: Vec<Server>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Parameter {
    #[serde(rename = "$ref", skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    pub name: String,
    /// path, query, header or cookie
    #[serde(rename = "in")]
    pub location: String,
    pub description: String,
    pub required: bool,
    pub schema: Option<Schema>,
    pub style: Option<String>,
    pub explode: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct RequestBody {
    #[serde(rename = "$ref", skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    pub description: String,
    pub required: bool,
    pub content: BTreeMap<String, MediaType>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Response {
    #[serde(rename = "$ref", skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    pub description: String,
    pub content: BTreeMap<String, MediaType>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct MediaType {
    pub schema: Option<Schema>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Schema {
    #[serde(rename = "$ref", skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub schema_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub nullable: bool,
    #[serde(rename = "enum", skip_serializing_if = "Vec::is_empty")]
    pub enum_values: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<Schema>>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, Schema>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub all_of: Vec<Schema>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub any_of: Vec<Schema>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub one_of: Vec<Schema>,
}

impl Schema {
    /// Case-insensitive check of the declared `type`.
    pub fn is_type(&self, ty: &str) -> bool {
        self.schema_type
            .as_deref()
            .is_some_and(|t| t.eq_ignore_ascii_case(ty))
    }
}

const SCHEMA_REF_PREFIX: &str = "#/components/schemas/";

impl Spec {
    /// Base URL for an operation: its first server, else the document's first.
    pub fn server_url_for<'a>(&'a self, op: Option<&'a Operation>) -> Option<&'a str> {
        op.and_then(|op| op.servers.first())
            .map(|s| s.url.as_str())
            .filter(|url| !url.is_empty())
            .or_else(|| self.servers.first().map(|s| s.url.as_str()))
            .filter(|url| !url.is_empty())
    }

    /// Operation-level security overrides the document-level list.
    pub fn operation_requires_auth(&self, op: &Operation) -> bool {
        match &op.security {
            Some(reqs) => !reqs.is_empty(),
            None => !self.security.is_empty(),
        }
    }

    pub fn resolve_schema_ref(&self, reference: &str) -> Option<&Schema> {
        let name = reference.strip_prefix(SCHEMA_REF_PREFIX)?;
        self.components.schemas.get(name)
    }

    /// Follow `$ref` chains to a concrete schema. Unresolvable or cyclic
    /// references return the last node reached.
    pub fn deref_schema<'a>(&'a self, schema: &'a Schema) -> &'a Schema {
        self.deref_with(schema, &mut HashSet::new())
    }

    fn deref_with<'a>(&'a self, schema: &'a Schema, seen: &mut HashSet<String>) -> &'a Schema {
        let mut current = schema;
        while let Some(reference) = current.reference.as_deref() {
            if !seen.insert(reference.to_string()) {
                break;
            }
            match self.resolve_schema_ref(reference) {
                Some(target) => current = target,
                None => break,
            }
        }
        current
    }

    /// Resolve references and merge a bare `allOf` into a single object
    /// shape. Immediate properties and array items are dereferenced too.
    pub fn flatten_schema(&self, schema: &Schema) -> Schema {
        self.flatten_with(schema, &HashSet::new())
    }

    fn flatten_with(&self, schema: &Schema, seen: &HashSet<String>) -> Schema {
        let mut seen = seen.clone();
        let schema = self.deref_with(schema, &mut seen);

        let bare_all_of = !schema.all_of.is_empty()
            && schema.properties.is_empty()
            && schema.schema_type.is_none()
            && schema.items.is_none();
        if bare_all_of {
            let mut merged = Schema {
                schema_type: Some("object".to_string()),
                description: schema.description.clone(),
                ..Schema::default()
            };
            for sub in &schema.all_of {
                let sub = self.flatten_with(sub, &seen);
                merged.properties.extend(sub.properties);
                for name in sub.required {
                    if !merged.required.contains(&name) {
                        merged.required.push(name);
                    }
                }
            }
            if merged.properties.is_empty() {
                return schema.clone();
            }
            return merged;
        }

        if schema.is_type("object") && !schema.properties.is_empty() {
            let mut out = schema.clone();
            for (name, prop) in &schema.properties {
                let mut branch = seen.clone();
                out.properties
                    .insert(name.clone(), self.deref_with(prop, &mut branch).clone());
            }
            return out;
        }

        if schema.is_type("array") {
            if let Some(items) = &schema.items {
                let mut out = schema.clone();
                let mut branch = seen.clone();
                out.items = Some(Box::new(self.deref_with(items, &mut branch).clone()));
                return out;
            }
        }

        schema.clone()
    }

    /// The schema of a response's JSON content (falls back to the first
    /// declared content type).
    pub fn response_schema<'a>(&self, op: &'a Operation, status: &str) -> Option<&'a Schema> {
        let response = op.responses.get(status)?;
        response
            .content
            .iter()
            .find(|(ct, _)| ct.starts_with("application/json"))
            .or_else(|| response.content.iter().next())
            .and_then(|(_, media)| media.schema.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec_from(value: Value) -> Spec {
        serde_json::from_value(value).unwrap()
    }

    fn reference(name: &str) -> Schema {
        Schema {
            reference: Some(format!("#/components/schemas/{name}")),
            ..Schema::default()
        }
    }

    #[test]
    fn deserializes_minimal_document() {
        let spec = spec_from(json!({
            "openapi": "3.0.0",
            "servers": [{"url": "https://api.example.com/v1"}],
            "paths": {
                "/pets/{petId}": {
                    "get": {
                        "operationId": "getPet",
                        "tags": ["Pets"],
                        "parameters": [
                            {"name": "petId", "in": "path", "required": true, "schema": {"type": "string"}}
                        ],
                        "responses": {"200": {"description": "ok"}}
                    },
                    "x-unknown": true
                }
            }
        }));

        let item = &spec.paths["/pets/{petId}"];
        let ops = item.operations();
        assert_eq!(ops.keys().copied().collect::<Vec<_>>(), vec!["GET"]);
        assert_eq!(ops["GET"].parameters[0].location, "path");
        assert_eq!(spec.server_url_for(None), Some("https://api.example.com/v1"));
    }

    #[test]
    fn operations_are_in_lexical_method_order() {
        let spec = spec_from(json!({
            "paths": {"/x": {
                "put": {"operationId": "a"},
                "delete": {"operationId": "b"},
                "get": {"operationId": "c"},
                "post": {"operationId": "d"}
            }}
        }));
        let methods: Vec<_> = spec.paths["/x"].operations().keys().copied().collect();
        assert_eq!(methods, vec!["DELETE", "GET", "POST", "PUT"]);
    }

    #[test]
    fn operation_server_wins_over_document_server() {
        let spec = spec_from(json!({
            "servers": [{"url": "https://doc.example.com"}],
            "paths": {"/x": {"get": {
                "operationId": "x",
                "servers": [{"url": "https://op.example.com"}, {"url": "https://ignored.example.com"}]
            }}}
        }));
        let op = spec.paths["/x"].get.as_ref().unwrap();
        assert_eq!(spec.server_url_for(Some(op)), Some("https://op.example.com"));
    }

    #[test]
    fn operation_security_overrides_document_security() {
        let spec = spec_from(json!({
            "security": [{"bearerAuth": []}],
            "paths": {"/x": {
                "get": {"operationId": "inherit"},
                "post": {"operationId": "optOut", "security": []}
            }}
        }));
        let item = &spec.paths["/x"];
        assert!(spec.operation_requires_auth(item.get.as_ref().unwrap()));
        assert!(!spec.operation_requires_auth(item.post.as_ref().unwrap()));
    }

    #[test]
    fn deref_follows_chains() {
        let spec = spec_from(json!({
            "components": {"schemas": {
                "A": {"$ref": "#/components/schemas/B"},
                "B": {"type": "integer"}
            }}
        }));
        let resolved = spec.deref_schema(&reference("A")).clone();
        assert!(resolved.is_type("integer"));
    }

    #[test]
    fn deref_stops_on_cycles_without_error() {
        let spec = spec_from(json!({
            "components": {"schemas": {
                "A": {"$ref": "#/components/schemas/B"},
                "B": {"$ref": "#/components/schemas/A"}
            }}
        }));
        let node = reference("A");
        let resolved = spec.deref_schema(&node);
        assert!(resolved.reference.is_some());
        let flattened = spec.flatten_schema(&reference("A"));
        assert!(flattened.reference.is_some());
    }

    #[test]
    fn deref_leaves_unknown_refs_alone() {
        let spec = Spec::default();
        let node = reference("Missing");
        assert_eq!(spec.deref_schema(&node), &node);
    }

    #[test]
    fn flatten_merges_all_of() {
        let spec = spec_from(json!({
            "components": {"schemas": {
                "Total": {"type": "object", "required": ["total"], "properties": {"total": {"type": "integer"}}},
                "Tx": {"type": "object", "properties": {"id": {"type": "string"}}}
            }}
        }));
        let schema: Schema = serde_json::from_value(json!({
            "allOf": [
                {"$ref": "#/components/schemas/Total"},
                {"type": "object", "properties": {
                    "transactions": {"type": "array", "items": {"$ref": "#/components/schemas/Tx"}}
                }}
            ]
        }))
        .unwrap();

        let flat = spec.flatten_schema(&schema);
        assert!(flat.is_type("object"));
        assert!(flat.properties.contains_key("total"));
        assert!(flat.properties["transactions"].is_type("array"));
        assert_eq!(flat.required, vec!["total".to_string()]);
    }

    #[test]
    fn flatten_derefs_properties_and_items() {
        let spec = spec_from(json!({
            "components": {"schemas": {
                "Page": {"type": "object", "properties": {"nextPage": {"type": "string", "nullable": true}}},
                "Account": {"type": "object", "properties": {"id": {"type": "string"}}}
            }}
        }));
        let schema: Schema = serde_json::from_value(json!({
            "type": "object",
            "properties": {
                "page": {"$ref": "#/components/schemas/Page"},
                "previous": {"$ref": "#/components/schemas/Page"}
            }
        }))
        .unwrap();
        let flat = spec.flatten_schema(&schema);
        assert!(flat.properties["page"].properties.contains_key("nextPage"));
        // Sibling references to the same schema resolve independently.
        assert!(flat.properties["previous"].properties.contains_key("nextPage"));

        let array: Schema = serde_json::from_value(json!({
            "type": "array", "items": {"$ref": "#/components/schemas/Account"}
        }))
        .unwrap();
        let flat = spec.flatten_schema(&array);
        assert!(flat.items.unwrap().is_type("object"));
    }

    #[test]
    fn flatten_keeps_empty_all_of_wrapper() {
        let spec = Spec::default();
        let schema: Schema =
            serde_json::from_value(json!({"allOf": [{"type": "string"}]})).unwrap();
        let flat = spec.flatten_schema(&schema);
        assert_eq!(flat, schema);
    }

    #[test]
    fn response_schema_prefers_json() {
        let op: Operation = serde_json::from_value(json!({
            "operationId": "x",
            "responses": {"200": {"content": {
                "application/json; charset=utf-8": {"schema": {"type": "object"}},
                "text/csv": {"schema": {"type": "string"}}
            }}}
        }))
        .unwrap();
        let spec = Spec::default();
        let schema = spec.response_schema(&op, "200").unwrap();
        assert!(schema.is_type("object"));
        assert!(spec.response_schema(&op, "201").is_none());
    }
}
