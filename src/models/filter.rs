//! Query filter models

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Filter operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Equals,
    NotEquals,
    LessThan,
    LessThanEqual,
    GreaterThan,
    GreaterThanEqual,
    Is,
    IsNull,
    IsNotNull,
    In,
    NotIn,
    Like,
    ILike,
    NotLike,
    Between,
    Match,
}

/// How many values an operator takes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    None,
    Exactly(usize),
    AtLeast(usize),
}

impl Arity {
    pub fn accepts(&self, given: usize) -> bool {
        match *self {
            Arity::None => given == 0,
            Arity::Exactly(n) => given == n,
            Arity::AtLeast(n) => given >= n,
        }
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arity::None => write!(f, "no items"),
            Arity::Exactly(1) => write!(f, "exactly 1 item"),
            Arity::Exactly(n) => write!(f, "exactly {} items", n),
            Arity::AtLeast(1) => write!(f, "at least 1 item"),
            Arity::AtLeast(n) => write!(f, "at least {} items", n),
        }
    }
}

impl Operator {
    pub fn name(&self) -> &'static str {
        match self {
            Operator::Equals => "EQUALS",
            Operator::NotEquals => "NOT_EQUALS",
            Operator::LessThan => "LESS_THAN",
            Operator::LessThanEqual => "LESS_THAN_EQUAL",
            Operator::GreaterThan => "GREATER_THAN",
            Operator::GreaterThanEqual => "GREATER_THAN_EQUAL",
            Operator::Is => "IS",
            Operator::IsNull => "IS_NULL",
            Operator::IsNotNull => "IS_NOT_NULL",
            Operator::In => "IN",
            Operator::NotIn => "NOT_IN",
            Operator::Like => "LIKE",
            Operator::ILike => "ILIKE",
            Operator::NotLike => "NOT_LIKE",
            Operator::Between => "BETWEEN",
            Operator::Match => "MATCH",
        }
    }

    /// Operators that compare text and bind their operands as text
    pub fn is_text_search(&self) -> bool {
        matches!(
            self,
            Operator::Like | Operator::ILike | Operator::NotLike | Operator::Match
        )
    }

    pub fn arity(&self) -> Arity {
        match self {
            Operator::IsNull | Operator::IsNotNull => Arity::None,
            Operator::In | Operator::NotIn => Arity::AtLeast(1),
            Operator::Between => Arity::Exactly(2),
            _ => Arity::Exactly(1),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Accepts `NOT_EQUALS`, `notEquals` and `NotEquals` alike
impl FromStr for Operator {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| *c != '_' && !c.is_whitespace())
            .collect::<String>()
            .to_uppercase();

        let op = match normalized.as_str() {
            "EQUALS" | "EQ" => Operator::Equals,
            "NOTEQUALS" | "NEQ" => Operator::NotEquals,
            "LESSTHAN" | "LT" => Operator::LessThan,
            "LESSTHANEQUAL" | "LTE" => Operator::LessThanEqual,
            "GREATERTHAN" | "GT" => Operator::GreaterThan,
            "GREATERTHANEQUAL" | "GTE" => Operator::GreaterThanEqual,
            "IS" => Operator::Is,
            "ISNULL" => Operator::IsNull,
            "ISNOTNULL" => Operator::IsNotNull,
            "IN" => Operator::In,
            "NOTIN" => Operator::NotIn,
            "LIKE" => Operator::Like,
            "ILIKE" => Operator::ILike,
            "NOTLIKE" => Operator::NotLike,
            "BETWEEN" => Operator::Between,
            "MATCH" => Operator::Match,
            _ => return Err(s.to_string()),
        };

        Ok(op)
    }
}

/// How an expression folds into the running condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LinkOperator {
    #[default]
    #[serde(rename = "AND", alias = "and", alias = "And")]
    And,
    #[serde(rename = "OR", alias = "or", alias = "Or")]
    Or,
}

impl LinkOperator {
    pub fn keyword(&self) -> &'static str {
        match self {
            LinkOperator::And => "AND",
            LinkOperator::Or => "OR",
        }
    }
}

/// Sort order for list queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SortDirection {
    #[serde(rename = "ASC", alias = "asc", alias = "Asc")]
    Asc,
    #[default]
    #[serde(rename = "DESC", alias = "desc", alias = "Desc")]
    Desc,
}

impl SortDirection {
    pub fn keyword(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

/// A bound filter value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl FilterValue {
    /// JSON type name, for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            FilterValue::Null => "null",
            FilterValue::Bool(_) => "boolean",
            FilterValue::Int(_) => "integer",
            FilterValue::Float(_) => "number",
            FilterValue::Text(_) => "string",
        }
    }
}

impl From<&str> for FilterValue {
    fn from(s: &str) -> Self {
        FilterValue::Text(s.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(s: String) -> Self {
        FilterValue::Text(s)
    }
}

impl From<i64> for FilterValue {
    fn from(n: i64) -> Self {
        FilterValue::Int(n)
    }
}

impl From<f64> for FilterValue {
    fn from(n: f64) -> Self {
        FilterValue::Float(n)
    }
}

impl From<bool> for FilterValue {
    fn from(b: bool) -> Self {
        FilterValue::Bool(b)
    }
}

/// One client supplied filter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterExpression {
    pub field: String,
    pub op: String,
    /// `None` only when the key is absent; an explicit `null` is kept
    #[serde(
        default,
        deserialize_with = "present_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub value: Option<FilterValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<FilterValue>,
    #[serde(default, alias = "linkOperation", skip_serializing_if = "Option::is_none")]
    pub link: Option<LinkOperator>,
}

fn present_value<'de, D>(deserializer: D) -> Result<Option<FilterValue>, D::Error>
where
    D: Deserializer<'de>,
{
    FilterValue::deserialize(deserializer).map(Some)
}

impl FilterExpression {
    pub fn new(field: &str, op: Operator) -> Self {
        Self {
            field: field.to_string(),
            op: op.name().to_string(),
            value: None,
            values: Vec::new(),
            link: None,
        }
    }

    pub fn with_value(mut self, value: impl Into<FilterValue>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_values<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<FilterValue>,
    {
        self.values = values.into_iter().map(Into::into).collect();
        self
    }

    pub fn or(mut self) -> Self {
        self.link = Some(LinkOperator::Or);
        self
    }

    /// `value` followed by `values`, in that order
    pub fn all_values(&self) -> Vec<FilterValue> {
        self.value.iter().chain(self.values.iter()).cloned().collect()
    }
}
