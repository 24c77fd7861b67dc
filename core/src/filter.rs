//! Boolean filter trees over resource attributes.
//!
//! A filter is either a [`Filter::Group`] combining children with AND/OR, or a
//! [`Filter::Predicate`] comparing one attribute against a value. On the wire a
//! group is `{"op": "and", "filters": [...]}` and a predicate is
//! `{"attr": "title", "op": "ilk", "value": "%milk%"}`.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::Value;

/// How a group's children attach to each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Combinator {
    And,
    Or,
}

impl Combinator {
    pub const fn code(self) -> &'static str {
        match self {
            Combinator::And => "and",
            Combinator::Or => "or",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "and" => Some(Combinator::And),
            "or" => Some(Combinator::Or),
            _ => None,
        }
    }
}

/// Predicate operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Eq,
    Neq,
    In,
    NotIn,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    NotLike,
    ILike,
    NotILike,
    Similar,
    NotSimilar,
    /// Case- and accent-insensitive like
    UnaccentILike,
    NotUnaccentILike,
    IsNull,
    IsNotNull,
}

impl Op {
    pub const ALL: [Op; 18] = [
        Op::Eq,
        Op::Neq,
        Op::In,
        Op::NotIn,
        Op::Gt,
        Op::Gte,
        Op::Lt,
        Op::Lte,
        Op::Like,
        Op::NotLike,
        Op::ILike,
        Op::NotILike,
        Op::Similar,
        Op::NotSimilar,
        Op::UnaccentILike,
        Op::NotUnaccentILike,
        Op::IsNull,
        Op::IsNotNull,
    ];

    /// Wire code of the operator.
    pub const fn code(self) -> &'static str {
        match self {
            Op::Eq => "eq",
            Op::Neq => "neq",
            Op::In => "in",
            Op::NotIn => "nin",
            Op::Gt => "gt",
            Op::Gte => "gte",
            Op::Lt => "lt",
            Op::Lte => "lte",
            Op::Like => "lk",
            Op::NotLike => "nlk",
            Op::ILike => "ilk",
            Op::NotILike => "nilk",
            Op::Similar => "sim",
            Op::NotSimilar => "nsim",
            Op::UnaccentILike => "ilkua",
            Op::NotUnaccentILike => "nilkua",
            Op::IsNull => "null",
            Op::IsNotNull => "nnull",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        Op::ALL.into_iter().find(|op| op.code() == code)
    }

    /// `null` / `nnull` ignore the carried value.
    #[inline]
    pub const fn is_unary(self) -> bool {
        matches!(self, Op::IsNull | Op::IsNotNull)
    }

    /// `in` / `nin` require a list value.
    #[inline]
    pub const fn takes_list(self) -> bool {
        matches!(self, Op::In | Op::NotIn)
    }

    /// Pattern operators match text against a pattern.
    #[inline]
    pub const fn is_pattern(self) -> bool {
        matches!(
            self,
            Op::Like
                | Op::NotLike
                | Op::ILike
                | Op::NotILike
                | Op::Similar
                | Op::NotSimilar
                | Op::UnaccentILike
                | Op::NotUnaccentILike
        )
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Right-hand side of a predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    List(Vec<Value>),
    Scalar(Value),
}

impl Default for FilterValue {
    fn default() -> Self {
        FilterValue::Scalar(Value::Null)
    }
}

macro_rules! scalar_filter_value {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for FilterValue {
                fn from(value: $ty) -> Self {
                    FilterValue::Scalar(value.into())
                }
            }
        )*
    };
}

scalar_filter_value!(Value, i64, i32, f64, bool, String, &str);

impl From<Vec<Value>> for FilterValue {
    fn from(values: Vec<Value>) -> Self {
        FilterValue::List(values)
    }
}

impl FilterValue {
    pub fn list<I, T>(values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Value>,
    {
        FilterValue::List(values.into_iter().map(Into::into).collect())
    }
}

/// A boolean expression over attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawFilter", into = "RawFilter")]
pub enum Filter {
    Group {
        combinator: Combinator,
        children: Vec<Filter>,
    },
    Predicate {
        attribute: String,
        op: Op,
        value: FilterValue,
    },
}

impl Filter {
    pub fn and(children: impl IntoIterator<Item = Filter>) -> Self {
        Filter::Group {
            combinator: Combinator::And,
            children: children.into_iter().collect(),
        }
    }

    pub fn or(children: impl IntoIterator<Item = Filter>) -> Self {
        Filter::Group {
            combinator: Combinator::Or,
            children: children.into_iter().collect(),
        }
    }

    pub fn predicate(attribute: impl Into<String>, op: Op, value: impl Into<FilterValue>) -> Self {
        Filter::Predicate {
            attribute: attribute.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::predicate(attribute, Op::Eq, value.into())
    }

    pub fn is_null(attribute: impl Into<String>) -> Self {
        Filter::predicate(attribute, Op::IsNull, Value::Null)
    }

    pub fn is_not_null(attribute: impl Into<String>) -> Self {
        Filter::predicate(attribute, Op::IsNotNull, Value::Null)
    }

    pub fn in_list<I, T>(attribute: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Value>,
    {
        Filter::predicate(attribute, Op::In, FilterValue::list(values))
    }

    /// Number of predicates in the tree.
    pub fn predicate_count(&self) -> usize {
        match self {
            Filter::Group { children, .. } => children.iter().map(Filter::predicate_count).sum(),
            Filter::Predicate { .. } => 1,
        }
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::Group {
                combinator,
                children,
            } => {
                f.write_str("(")?;
                for (i, child) in children.iter().enumerate() {
                    if i > 0 {
                        write!(f, " {} ", combinator.code())?;
                    }
                    write!(f, "{child}")?;
                }
                f.write_str(")")
            }
            Filter::Predicate {
                attribute,
                op,
                value,
            } => match value {
                _ if op.is_unary() => write!(f, "{attribute} {op}"),
                FilterValue::Scalar(v) => write!(f, "{attribute} {op} {v:?}"),
                FilterValue::List(vs) => write!(f, "{attribute} {op} {vs:?}"),
            },
        }
    }
}

/// Filter wire-format violations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FilterError {
    #[error("unknown filter operator '{0}'")]
    UnknownOp(String),
    #[error("filter group '{0}' must not carry an attribute or value")]
    GroupWithOperand(String),
    #[error("filter predicate '{0}' must not carry child filters")]
    PredicateWithChildren(String),
    #[error("filter predicate '{0}' requires an attribute")]
    MissingAttribute(String),
    #[error("filter predicate '{op}' on '{attribute}' requires a value")]
    MissingValue { attribute: String, op: String },
}

#[derive(Serialize, Deserialize)]
struct RawFilter {
    op: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    attr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<FilterValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    filters: Option<Vec<Filter>>,
}

impl TryFrom<RawFilter> for Filter {
    type Error = FilterError;

    fn try_from(raw: RawFilter) -> Result<Self, Self::Error> {
        if let Some(combinator) = Combinator::from_code(&raw.op) {
            if raw.attr.is_some() || raw.value.is_some() {
                return Err(FilterError::GroupWithOperand(raw.op));
            }
            return Ok(Filter::Group {
                combinator,
                children: raw.filters.unwrap_or_default(),
            });
        }

        let op = Op::from_code(&raw.op).ok_or_else(|| FilterError::UnknownOp(raw.op.clone()))?;
        if raw.filters.is_some() {
            return Err(FilterError::PredicateWithChildren(raw.op));
        }
        let attribute = match raw.attr {
            Some(attr) if !attr.is_empty() => attr,
            _ => return Err(FilterError::MissingAttribute(raw.op)),
        };
        let value = match raw.value {
            Some(value) => value,
            None if op.is_unary() => FilterValue::default(),
            None => {
                return Err(FilterError::MissingValue {
                    attribute,
                    op: raw.op,
                });
            }
        };
        Ok(Filter::Predicate {
            attribute,
            op,
            value,
        })
    }
}

impl From<Filter> for RawFilter {
    fn from(filter: Filter) -> Self {
        match filter {
            Filter::Group {
                combinator,
                children,
            } => RawFilter {
                op: combinator.code().to_owned(),
                attr: None,
                value: None,
                filters: Some(children),
            },
            Filter::Predicate {
                attribute,
                op,
                value,
            } => RawFilter {
                op: op.code().to_owned(),
                attr: Some(attribute),
                value: (!op.is_unary()).then_some(value),
                filters: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_tree() {
        let json = r#"{
            "op": "and",
            "filters": [
                {"attr": "done", "op": "eq", "value": false},
                {"op": "or", "filters": [
                    {"attr": "title", "op": "ilk", "value": "%milk%"},
                    {"attr": "id", "op": "in", "value": [1, 2, 3]}
                ]},
                {"attr": "note", "op": "nnull"}
            ]
        }"#;
        let filter: Filter = serde_json::from_str(json).unwrap();

        let expected = Filter::and([
            Filter::eq("done", false),
            Filter::or([
                Filter::predicate("title", Op::ILike, "%milk%"),
                Filter::in_list("id", [1i64, 2, 3]),
            ]),
            Filter::is_not_null("note"),
        ]);
        assert_eq!(filter, expected);
        assert_eq!(filter.predicate_count(), 4);
    }

    #[test]
    fn rejects_invariant_violations() {
        let group_with_attr = r#"{"op": "or", "attr": "x", "filters": []}"#;
        assert!(serde_json::from_str::<Filter>(group_with_attr).is_err());

        let predicate_with_children = r#"{"op": "eq", "attr": "x", "value": 1, "filters": []}"#;
        assert!(serde_json::from_str::<Filter>(predicate_with_children).is_err());

        let unknown = r#"{"op": "regex", "attr": "x", "value": "a"}"#;
        assert!(serde_json::from_str::<Filter>(unknown).is_err());

        let missing_value = r#"{"op": "gt", "attr": "x"}"#;
        assert!(serde_json::from_str::<Filter>(missing_value).is_err());
    }

    #[test]
    fn serializes_to_wire_codes() {
        let filter = Filter::or([
            Filter::predicate("title", Op::NotUnaccentILike, "%cafe%"),
            Filter::is_null("note"),
        ]);
        let json = serde_json::to_value(&filter).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "op": "or",
                "filters": [
                    {"op": "nilkua", "attr": "title", "value": "%cafe%"},
                    {"op": "null", "attr": "note"}
                ]
            })
        );
    }

    #[test]
    fn op_codes_are_unique() {
        for op in Op::ALL {
            assert_eq!(Op::from_code(op.code()), Some(op));
        }
        assert_eq!(Op::from_code("and"), None);
    }
}
