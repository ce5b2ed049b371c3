use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use super::store::StoreError;

static FIELD_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid field regex"));

/// A stored record: store-assigned id plus its JSON fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: Map<String, Value>,
}

impl Document {
    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    pub fn i64_field(&self, name: &str) -> Option<i64> {
        self.fields.get(name).and_then(Value::as_i64)
    }
}

/// Value written to a field. `ServerTimestamp` is resolved by the store at
/// write time to epoch milliseconds.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Value(Value),
    ServerTimestamp,
}

impl From<Value> for FieldValue {
    fn from(value: Value) -> Self {
        FieldValue::Value(value)
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Value(Value::from(value))
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Value(Value::from(value))
    }
}

impl From<i64> for FieldValue {
    fn from(value: i64) -> Self {
        FieldValue::Value(Value::from(value))
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Value(Value::from(value))
    }
}

pub type WriteFields = BTreeMap<String, FieldValue>;

/// Builder-style helper for write payloads.
#[derive(Debug, Clone, Default)]
pub struct Fields(WriteFields);

impl Fields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: impl Into<FieldValue>) -> Self {
        self.0.insert(name.to_string(), value.into());
        self
    }

    pub fn with_server_timestamp(mut self, name: &str) -> Self {
        self.0.insert(name.to_string(), FieldValue::ServerTimestamp);
        self
    }

    pub fn into_inner(self) -> WriteFields {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

/// Conjunction of equality filters over one collection, optionally ordered.
/// Ties on the order field fall back to document id ascending.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: String,
    pub filters: Vec<Filter>,
    pub order_by: Option<OrderBy>,
}

impl Query {
    pub fn collection(name: &str) -> Self {
        Self {
            collection: name.to_string(),
            filters: Vec::new(),
            order_by: None,
        }
    }

    pub fn where_eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter {
            field: field.to_string(),
            value: value.into(),
        });
        self
    }

    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.order_by = Some(OrderBy {
            field: field.to_string(),
            direction,
        });
        self
    }

    /// Rejects field names that cannot be addressed as a plain JSON key.
    pub fn validate(&self) -> Result<(), StoreError> {
        for filter in &self.filters {
            validate_field_name(&filter.field)?;
        }
        if let Some(order) = &self.order_by {
            validate_field_name(&order.field)?;
        }
        Ok(())
    }
}

pub fn validate_field_name(name: &str) -> Result<(), StoreError> {
    if FIELD_NAME.is_match(name) {
        Ok(())
    } else {
        Err(StoreError::InvalidField(name.to_string()))
    }
}
