//! Filter compiler
//!
//! Turns an ordered list of [`FilterExpression`]s into a SQL condition with
//! `?` placeholders and the values to bind, in order. Only the translated
//! field identifier and fixed operator templates reach the SQL text.
//!
//! Expressions fold left to right into the running condition using each
//! expression's link (AND unless told otherwise). There is no grouping: when
//! the link changes after two or more terms the running condition is wrapped
//! in parentheses, so `a OR b AND c` compiles to `(a OR b) AND c`.
//!
//! With an allow-list every field carries a [`FieldKind`]; values are checked
//! against it at compile time so a mistyped filter is a client error rather
//! than a failed query.

use crate::{
    error::AppError,
    models::filter::{FilterExpression, FilterValue, LinkOperator, Operator, SortDirection},
    rbac::taxonomy::to_snake_case,
};
use chrono::{DateTime, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use sqlx::{postgres::PgArguments, query::QueryAs, Postgres};
use std::collections::HashMap;
use uuid::Uuid;

static FIELD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[a-z_][a-z0-9_]*(\.[a-z_][a-z0-9_]*)?$").expect("field pattern is valid")
});

/// Column type of a filterable field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Text,
    Uuid,
    Timestamp,
    Integer,
    Boolean,
}

impl FieldKind {
    /// Cast applied to the placeholder
    pub fn cast(&self) -> Option<&'static str> {
        match self {
            FieldKind::Text => None,
            FieldKind::Uuid => Some("uuid"),
            FieldKind::Timestamp => Some("timestamptz"),
            FieldKind::Integer => Some("bigint"),
            FieldKind::Boolean => Some("boolean"),
        }
    }

    fn expected(&self) -> &'static str {
        match self {
            FieldKind::Text => "a string",
            FieldKind::Uuid => "a UUID string",
            FieldKind::Timestamp => "an RFC 3339 timestamp or YYYY-MM-DD date",
            FieldKind::Integer => "an integer",
            FieldKind::Boolean => "a boolean",
        }
    }

    /// Null is accepted for every kind
    pub fn accepts(&self, value: &FilterValue) -> bool {
        match (self, value) {
            (_, FilterValue::Null) => true,
            (FieldKind::Text, FilterValue::Text(_)) => true,
            (FieldKind::Uuid, FilterValue::Text(s)) => Uuid::parse_str(s).is_ok(),
            (FieldKind::Timestamp, FilterValue::Text(s)) => {
                DateTime::parse_from_rfc3339(s).is_ok()
                    || NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()
            }
            (FieldKind::Integer, FilterValue::Int(_)) => true,
            (FieldKind::Boolean, FilterValue::Bool(_)) => true,
            _ => false,
        }
    }
}

/// Compiled condition
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Condition {
    sql: String,
    params: Vec<FilterValue>,
    terms: usize,
    link: Option<LinkOperator>,
}

impl Condition {
    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn params(&self) -> &[FilterValue] {
        &self.params
    }

    pub fn into_params(self) -> Vec<FilterValue> {
        self.params
    }

    pub fn is_empty(&self) -> bool {
        self.terms == 0
    }

    /// Number of folded expressions
    pub fn len(&self) -> usize {
        self.terms
    }

    fn push(&mut self, link: LinkOperator, term: String, values: Vec<FilterValue>) {
        if self.terms == 0 {
            self.sql = term;
        } else {
            if self.terms >= 2 && self.link != Some(link) {
                self.sql = format!("({})", self.sql);
            }
            self.sql = format!("{} {} {}", self.sql, link.keyword(), term);
            self.link = Some(link);
        }
        self.terms += 1;
        self.params.extend(values);
    }

    /// Renumber `?` placeholders as `$first_index`, `$first_index + 1`, ...
    pub fn to_postgres(&self, first_index: usize) -> String {
        let mut out = String::with_capacity(self.sql.len() + self.params.len() * 2);
        let mut index = first_index;
        for c in self.sql.chars() {
            if c == '?' {
                out.push('$');
                out.push_str(&index.to_string());
                index += 1;
            } else {
                out.push(c);
            }
        }
        out
    }
}

/// Filter compiler with an optional field allow-list
#[derive(Debug, Clone, Default)]
pub struct FilterCompiler {
    /// translated field name → column kind
    allowed_fields: Option<HashMap<String, FieldKind>>,
}

impl FilterCompiler {
    /// Any field matching the identifier pattern may be filtered
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict filtering to `field`, a text column
    pub fn allow(self, field: &str) -> Self {
        self.allow_kind(field, FieldKind::Text)
    }

    /// Restrict filtering to `field` of the given kind
    pub fn allow_kind(mut self, field: &str, kind: FieldKind) -> Self {
        self.allowed_fields
            .get_or_insert_with(HashMap::new)
            .insert(field.to_string(), kind);
        self
    }

    pub fn compile(&self, expressions: &[FilterExpression]) -> Result<Condition, AppError> {
        let mut condition = Condition::default();

        for expr in expressions {
            let op: Operator = expr.op.parse().map_err(AppError::UnknownOperator)?;

            let mut values = expr.all_values();
            let arity = op.arity();
            if !arity.accepts(values.len()) {
                return Err(AppError::InvalidFilterArity {
                    operator: op.name().to_string(),
                    required: arity.to_string(),
                    given: values.len(),
                });
            }

            let (field, kind) = self.field(&expr.field)?;

            if op.is_text_search() {
                if matches!(kind, Some(k) if k != FieldKind::Text) {
                    return Err(AppError::InvalidFilterValue {
                        field: expr.field.clone(),
                        reason: format!("is not a text field and cannot use [{}]", op.name()),
                    });
                }
                values = values.into_iter().map(as_text).collect();
            } else if let Some(kind) = kind {
                if let Some(bad) = values.iter().find(|v| !kind.accepts(v)) {
                    return Err(AppError::InvalidFilterValue {
                        field: expr.field.clone(),
                        reason: format!("expects {}, got {}", kind.expected(), bad.type_name()),
                    });
                }
            }

            let placeholder = match kind.and_then(|k| k.cast()) {
                Some(cast) => format!("CAST(? AS {})", cast),
                None => "?".to_string(),
            };

            let term = render(op, &field, &placeholder, values.len());
            condition.push(expr.link.unwrap_or_default(), term, values);
        }

        Ok(condition)
    }

    /// `<column> <direction>` for an ORDER BY clause; the column passes the
    /// same translation and allow-list as a filter field
    pub fn order_by(&self, raw: &str, direction: SortDirection) -> Result<String, AppError> {
        let (field, _) = self.field(raw)?;
        Ok(format!("{} {}", field, direction.keyword()))
    }

    fn field(&self, raw: &str) -> Result<(String, Option<FieldKind>), AppError> {
        let translated = raw
            .split('.')
            .map(to_snake_case)
            .collect::<Vec<_>>()
            .join(".");

        if !FIELD_RE.is_match(&translated) {
            return Err(AppError::InvalidFilterField(raw.to_string()));
        }

        match &self.allowed_fields {
            None => Ok((translated, None)),
            Some(allowed) => match allowed.get(&translated) {
                Some(kind) => Ok((translated, Some(*kind))),
                None => Err(AppError::InvalidFilterField(raw.to_string())),
            },
        }
    }
}

/// Compile with no field allow-list
pub fn compile_filters(expressions: &[FilterExpression]) -> Result<Condition, AppError> {
    FilterCompiler::new().compile(expressions)
}

fn render(op: Operator, field: &str, ph: &str, count: usize) -> String {
    match op {
        Operator::Equals => format!("{} = {}", field, ph),
        Operator::NotEquals => format!("{} <> {}", field, ph),
        Operator::LessThan => format!("{} < {}", field, ph),
        Operator::LessThanEqual => format!("{} <= {}", field, ph),
        Operator::GreaterThan => format!("{} > {}", field, ph),
        Operator::GreaterThanEqual => format!("{} >= {}", field, ph),
        Operator::Is => format!("{} IS NOT DISTINCT FROM {}", field, ph),
        Operator::IsNull => format!("{} IS NULL", field),
        Operator::IsNotNull => format!("{} IS NOT NULL", field),
        Operator::In => format!("{} IN ({})", field, vec![ph; count].join(", ")),
        Operator::NotIn => format!("{} NOT IN ({})", field, vec![ph; count].join(", ")),
        Operator::Like => format!("{} LIKE {}", field, ph),
        Operator::ILike => format!("{} ILIKE {}", field, ph),
        Operator::NotLike => format!("{} NOT LIKE {}", field, ph),
        Operator::Between => format!("{} BETWEEN {} AND {}", field, ph, ph),
        Operator::Match => format!(
            "to_tsvector('simple', {}) @@ websearch_to_tsquery('simple', {})",
            field, ph
        ),
    }
}

fn as_text(value: FilterValue) -> FilterValue {
    match value {
        FilterValue::Bool(b) => FilterValue::Text(b.to_string()),
        FilterValue::Int(n) => FilterValue::Text(n.to_string()),
        FilterValue::Float(n) => FilterValue::Text(n.to_string()),
        other => other,
    }
}

/// Bind condition parameters onto a query, in order
pub fn bind_params<'q, O>(
    mut query: QueryAs<'q, Postgres, O, PgArguments>,
    params: &[FilterValue],
) -> QueryAs<'q, Postgres, O, PgArguments> {
    for param in params {
        query = match param.clone() {
            FilterValue::Null => query.bind(None::<String>),
            FilterValue::Bool(b) => query.bind(b),
            FilterValue::Int(n) => query.bind(n),
            FilterValue::Float(n) => query.bind(n),
            FilterValue::Text(s) => query.bind(s),
        };
    }
    query
}
