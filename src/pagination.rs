//! Pagination detection from response shape, and the `--all` page loop.

use std::time::Duration;

use reqwest::StatusCode;
use reqwest::header::HeaderMap;
use serde_json::{Map, Value};

use crate::cancel::Cancel;
use crate::client::ApiResponse;
use crate::error::PaginationError;
use crate::openapi::{Operation, Schema, Spec};

pub const DEFAULT_MAX_PAGES: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaginationMode {
    Cursor,
    PageToken,
    Offset,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaginationPlan {
    pub mode: PaginationMode,
    /// Query parameter rewritten between pages.
    pub query_param: String,
    /// Array field accumulated across pages.
    pub item_field: String,
    /// Response field holding the next token (`page.nextPage` for cursors).
    pub next_token_field: Option<String>,
    pub total_field: Option<String>,
}

/// Classify an operation by its query parameters and 200 response schema.
pub fn detect(spec: &Spec, op: &Operation) -> Option<PaginationPlan> {
    let has_query = |name: &str| {
        op.parameters
            .iter()
            .any(|p| p.location.eq_ignore_ascii_case("query") && p.name == name)
    };

    let schema = spec.flatten_schema(spec.response_schema(op, "200")?);
    if !schema.is_type("object") {
        return None;
    }

    if has_query("page_token")
        && prop_is(spec, &schema, "records", "array")
        && schema.properties.contains_key("next_page_token")
    {
        return Some(PaginationPlan {
            mode: PaginationMode::PageToken,
            query_param: "page_token".to_string(),
            item_field: "records".to_string(),
            next_token_field: Some("next_page_token".to_string()),
            total_field: None,
        });
    }

    if has_query("offset")
        && prop_is(spec, &schema, "transactions", "array")
        && (prop_is(spec, &schema, "total", "integer") || prop_is(spec, &schema, "total", "number"))
    {
        return Some(PaginationPlan {
            mode: PaginationMode::Offset,
            query_param: "offset".to_string(),
            item_field: "transactions".to_string(),
            next_token_field: None,
            total_field: Some("total".to_string()),
        });
    }

    if has_query("start_after") {
        let page = spec.flatten_schema(schema.properties.get("page")?);
        if page.is_type("object") && page.properties.contains_key("nextPage") {
            let item_field = first_array_property(spec, &schema, "page")?;
            return Some(PaginationPlan {
                mode: PaginationMode::Cursor,
                query_param: "start_after".to_string(),
                item_field,
                next_token_field: Some("page.nextPage".to_string()),
                total_field: None,
            });
        }
    }

    None
}

fn prop_is(spec: &Spec, schema: &Schema, name: &str, ty: &str) -> bool {
    schema
        .properties
        .get(name)
        .is_some_and(|prop| spec.flatten_schema(prop).is_type(ty))
}

// `properties` is a BTreeMap, so iteration is already lexical.
fn first_array_property(spec: &Spec, schema: &Schema, skip: &str) -> Option<String> {
    schema
        .properties
        .iter()
        .filter(|(name, _)| name.as_str() != skip)
        .find(|(_, prop)| spec.flatten_schema(prop).is_type("array"))
        .map(|(name, _)| name.clone())
}

#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// 0 means [`DEFAULT_MAX_PAGES`].
    pub max_pages: usize,
    /// Delay between pages; never applied before the first.
    pub sleep: Duration,
}

#[derive(Debug, Clone)]
pub struct PaginationResult {
    pub items: Vec<Value>,
    pub last_object: Map<String, Value>,
    /// Offset mode only: `total` as reported by the first page.
    pub first_total: Option<Value>,
    pub last_status: StatusCode,
    pub last_headers: HeaderMap,
}

impl PaginationResult {
    /// The last page with its item field replaced by every accumulated item.
    pub fn merged(&self, plan: &PaginationPlan) -> Value {
        let mut out = self.last_object.clone();
        out.insert(plan.item_field.clone(), Value::Array(self.items.clone()));
        if let (Some(field), Some(total)) = (&plan.total_field, &self.first_total) {
            out.insert(field.clone(), total.clone());
        }
        Value::Object(out)
    }
}

/// Fetch pages until the plan's stop condition holds. `fetch` receives the
/// full query for each page.
pub fn fetch_all<F>(
    plan: &PaginationPlan,
    initial_query: &[(String, String)],
    opts: &FetchOptions,
    cancel: &Cancel,
    mut fetch: F,
) -> Result<PaginationResult, PaginationError>
where
    F: FnMut(&[(String, String)]) -> anyhow::Result<ApiResponse>,
{
    let max_pages = if opts.max_pages == 0 {
        DEFAULT_MAX_PAGES
    } else {
        opts.max_pages
    };
    let mut query = initial_query.to_vec();

    let mut offset = 0usize;
    if plan.mode == PaginationMode::Offset {
        if let Some(start) = query_value(&query, &plan.query_param).and_then(|v| v.parse().ok()) {
            offset = start;
        }
    }

    let mut items = Vec::new();
    let mut first_total = None;

    for page in 1..=max_pages {
        if plan.mode == PaginationMode::Offset {
            set_query(&mut query, &plan.query_param, offset.to_string());
        }

        let resp = fetch(query.as_slice()).map_err(PaginationError::Page)?;
        let value: Value = serde_json::from_slice(&resp.body).map_err(PaginationError::Parse)?;
        let obj = match value {
            Value::Object(obj) => obj,
            other => return Err(PaginationError::NotObject(json_type(&other))),
        };

        let page_items = match obj.get(&plan.item_field) {
            None => return Err(PaginationError::MissingField(plan.item_field.clone())),
            Some(Value::Array(arr)) => arr.clone(),
            Some(other) => {
                return Err(PaginationError::NotArray {
                    field: plan.item_field.clone(),
                    found: json_type(other),
                });
            }
        };
        let received = page_items.len();
        items.extend(page_items);
        log::debug!(
            "page {page}: {received} {} ({} total)",
            plan.item_field,
            items.len()
        );

        let done = match plan.mode {
            PaginationMode::Cursor => match cursor_next_token(&obj) {
                Some(next) => {
                    set_query(&mut query, &plan.query_param, next);
                    false
                }
                None => true,
            },
            PaginationMode::PageToken => {
                let field = plan.next_token_field.as_deref().unwrap_or("next_page_token");
                match token_field(&obj, field) {
                    Some(next) => {
                        set_query(&mut query, &plan.query_param, next);
                        false
                    }
                    None => true,
                }
            }
            PaginationMode::Offset => {
                let total_value = plan.total_field.as_deref().and_then(|f| obj.get(f));
                if first_total.is_none() {
                    first_total = total_value.cloned();
                }
                offset += received;
                let total = total_value.map(int_from_value).unwrap_or(0);
                (total > 0 && (offset as i64) >= total) || received == 0
            }
        };

        if done {
            return Ok(PaginationResult {
                items,
                last_object: obj,
                first_total,
                last_status: resp.status,
                last_headers: resp.headers,
            });
        }

        if !opts.sleep.is_zero() && page < max_pages {
            cancel.sleep(opts.sleep)?;
        }
    }

    Err(PaginationError::Exceeded(max_pages))
}

fn query_value<'a>(query: &'a [(String, String)], key: &str) -> Option<&'a str> {
    query
        .iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
}

fn set_query(query: &mut Vec<(String, String)>, key: &str, value: String) {
    query.retain(|(k, _)| k != key);
    query.push((key.to_string(), value));
}

fn cursor_next_token(obj: &Map<String, Value>) -> Option<String> {
    match obj.get("page")? {
        Value::Object(page) => token_field(page, "nextPage"),
        _ => None,
    }
}

/// Non-empty token at `field`; non-string scalars are rendered as text.
fn token_field(obj: &Map<String, Value>, field: &str) -> Option<String> {
    let token = match obj.get(field)? {
        Value::Null => return None,
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    (!token.is_empty()).then_some(token)
}

fn int_from_value(value: &Value) -> i64 {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .unwrap_or(0),
        Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
