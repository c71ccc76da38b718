//! Entity and page types returned from the table API
//!
//! Entities have no fixed schema: each one is an ordered list of fields
//! carrying a tagged scalar value. Pages are parsed from the JSON bodies
//! returned with `Accept: application/json;odata=nometadata`.

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use std::fmt;

/// Well-known system columns, in the order they lead the output
pub const PARTITION_KEY: &str = "PartitionKey";
pub const ROW_KEY: &str = "RowKey";
pub const TIMESTAMP: &str = "Timestamp";

/// Opaque partition identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionKey(String);

impl PartitionKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Build the OData filter selecting exactly this partition
    ///
    /// Single quotes are doubled per OData string literal rules.
    pub fn odata_filter(&self) -> String {
        format!("{} eq '{}'", PARTITION_KEY, self.0.replace('\'', "''"))
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A scalar field value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),

    /// Parsed instant plus the text the server sent, which is what gets exported
    Timestamp { at: DateTime<Utc>, raw: String },
}

impl Value {
    /// Render the value as a CSV cell
    pub fn render(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            Value::Int(n) => n.to_string(),
            Value::Float(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Timestamp { raw, .. } => raw.clone(),
        }
    }
}

/// A single entity: ordered field name -> value mapping
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Entity {
    fields: Vec<(String, Value)>,
}

impl Entity {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a field, keeping the position of an existing one
    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some((_, v)) => *v = value,
            None => self.fields.push((name, value)),
        }
    }

    /// Builder-style insert
    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Field names in the order the server returned them
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(n, _)| n.as_str())
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Parse one JSON object into an entity
    fn from_json(object: serde_json::Map<String, JsonValue>) -> Result<Self, String> {
        let mut entity = Entity::new();

        for (name, value) in object {
            if is_annotation(&name) {
                continue;
            }

            let value = match value {
                JsonValue::Null => continue,
                JsonValue::Bool(b) => Value::Bool(b),
                JsonValue::Number(n) => match n.as_i64() {
                    Some(i) => Value::Int(i),
                    None => Value::Float(n.as_f64().ok_or_else(|| {
                        format!("field '{}' holds an unrepresentable number", name)
                    })?),
                },
                JsonValue::String(s) if name == TIMESTAMP => {
                    match DateTime::parse_from_rfc3339(&s) {
                        Ok(ts) => Value::Timestamp {
                            at: ts.with_timezone(&Utc),
                            raw: s,
                        },
                        Err(_) => Value::String(s),
                    }
                }
                JsonValue::String(s) => Value::String(s),
                JsonValue::Array(_) | JsonValue::Object(_) => {
                    return Err(format!("field '{}' is not a scalar", name));
                }
            };

            entity.fields.push((name, value));
        }

        Ok(entity)
    }
}

/// OData metadata keys (`odata.etag`, `Field@odata.type`)
fn is_annotation(name: &str) -> bool {
    name.starts_with("odata.") || name.contains("@odata.")
}

/// Cursor for the next page of a partition query
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContinuationToken {
    pub next_partition_key: Option<String>,
    pub next_row_key: Option<String>,
}

impl ContinuationToken {
    /// Build from the two continuation headers; `None` when both are absent or empty
    pub fn from_parts(
        next_partition_key: Option<String>,
        next_row_key: Option<String>,
    ) -> Option<Self> {
        let npk = next_partition_key.filter(|s| !s.is_empty());
        let nrk = next_row_key.filter(|s| !s.is_empty());

        if npk.is_none() && nrk.is_none() {
            None
        } else {
            Some(Self {
                next_partition_key: npk,
                next_row_key: nrk,
            })
        }
    }
}

impl fmt::Display for ContinuationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "NextPartitionKey={} NextRowKey={}",
            self.next_partition_key.as_deref().unwrap_or("-"),
            self.next_row_key.as_deref().unwrap_or("-")
        )
    }
}

/// One page of results for a partition
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub entities: Vec<Entity>,
    pub continuation: Option<ContinuationToken>,
}

impl Page {
    /// Parse a response body belonging to `key`
    ///
    /// Accepts `{"value": [...]}` or a bare array. Any entity carrying a
    /// different `PartitionKey` makes the whole page malformed.
    pub fn parse(
        key: &PartitionKey,
        body: &str,
        continuation: Option<ContinuationToken>,
    ) -> Result<Self, String> {
        let json: JsonValue =
            serde_json::from_str(body).map_err(|e| format!("invalid JSON: {}", e))?;

        let items = match json {
            JsonValue::Array(items) => items,
            JsonValue::Object(mut obj) => match obj.remove("value") {
                Some(JsonValue::Array(items)) => items,
                Some(_) => return Err("'value' is not an array".into()),
                None => return Err("missing 'value' array".into()),
            },
            _ => return Err("expected an object or array".into()),
        };

        let mut entities = Vec::with_capacity(items.len());
        for (index, item) in items.into_iter().enumerate() {
            let JsonValue::Object(obj) = item else {
                return Err(format!("entity {} is not an object", index));
            };

            let entity = Entity::from_json(obj).map_err(|e| format!("entity {}: {}", index, e))?;

            if let Some(Value::String(pk)) = entity.get(PARTITION_KEY) {
                if pk != key.as_str() {
                    return Err(format!(
                        "entity {} belongs to partition '{}', expected '{}'",
                        index, pk, key
                    ));
                }
            }

            entities.push(entity);
        }

        Ok(Self {
            entities,
            continuation,
        })
    }

    pub fn is_last(&self) -> bool {
        self.continuation.is_none()
    }
}
