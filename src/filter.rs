//! Search filters for list endpoints.
//!
//! A [`SearchFilter`] renders to query parameters following the platform's
//! `filter[<field>.<op>]=<value>` convention, with the operator omitted for
//! exact matches. Field paths are dot separated and may index into nested
//! JSON (`inputs.person.addrs.0.street`).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

use crate::error::SimbaError;

/// Comparison applied by a [`FieldFilter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOp {
    Equals,
    Exact,
    IExact,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    IContains,
    StartsWith,
    IStartsWith,
    Is,
    In,
}

impl FilterOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOp::Equals => "equals",
            FilterOp::Exact => "exact",
            FilterOp::IExact => "iexact",
            FilterOp::Gt => "gt",
            FilterOp::Gte => "gte",
            FilterOp::Lt => "lt",
            FilterOp::Lte => "lte",
            FilterOp::Contains => "contains",
            FilterOp::IContains => "icontains",
            FilterOp::StartsWith => "startswith",
            FilterOp::IStartsWith => "istartswith",
            FilterOp::Is => "is",
            FilterOp::In => "in",
        }
    }

    /// Exact matches are rendered without an operator suffix.
    fn is_exact(&self) -> bool {
        matches!(self, FilterOp::Equals | FilterOp::Exact)
    }
}

impl fmt::Display for FilterOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FilterOp {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let op = match s.to_lowercase().as_str() {
            "equals" => FilterOp::Equals,
            "exact" => FilterOp::Exact,
            "iexact" => FilterOp::IExact,
            "gt" => FilterOp::Gt,
            "gte" => FilterOp::Gte,
            "lt" => FilterOp::Lt,
            "lte" => FilterOp::Lte,
            "contains" => FilterOp::Contains,
            "icontains" => FilterOp::IContains,
            "startswith" => FilterOp::StartsWith,
            "istartswith" => FilterOp::IStartsWith,
            "is" => FilterOp::Is,
            "in" => FilterOp::In,
            _ => anyhow::bail!(SimbaError::Config(format!("Unknown filter operator: {}", s))),
        };
        Ok(op)
    }
}

/// One condition on a (possibly nested) field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldFilter {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

impl FieldFilter {
    pub fn new(field: &str, op: FilterOp, value: impl Into<Value>) -> Self {
        Self {
            field: field.to_string(),
            op,
            value: value.into(),
        }
    }

    fn key(&self) -> String {
        if self.op.is_exact() {
            format!("filter[{}]", self.field)
        } else {
            format!("filter[{}.{}]", self.field, self.op)
        }
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Array(items) => items.iter().map(render).collect::<Vec<_>>().join(","),
        other => other.to_string(),
    }
}

/// Filters, field selection and paging for a list call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFilter {
    pub filters: Vec<FieldFilter>,
    pub fields: Vec<String>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

impl SearchFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_filter(&mut self, filter: FieldFilter) -> &mut Self {
        self.filters.push(filter);
        self
    }

    pub fn has_filter(&self, field: &str) -> bool {
        self.filters.iter().any(|f| f.field == field)
    }

    pub fn with_filter(mut self, filter: FieldFilter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Query parameters in insertion order. Zero limit/offset are omitted.
    pub fn to_query(&self) -> Vec<(String, String)> {
        let mut query: Vec<(String, String)> = self
            .filters
            .iter()
            .map(|f| (f.key(), render(&f.value)))
            .collect();
        if !self.fields.is_empty() {
            query.push(("fields".to_string(), self.fields.join(",")));
        }
        if let Some(limit) = self.limit.filter(|l| *l > 0) {
            query.push(("limit".to_string(), limit.to_string()));
        }
        if let Some(offset) = self.offset.filter(|o| *o > 0) {
            query.push(("offset".to_string(), offset.to_string()));
        }
        query
    }
}
