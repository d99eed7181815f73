use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::value::{Arguments, SqlValue};
use crate::error::ShimError;

/// Condition operators understood by the generic condition compiler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Like,
    NotLike,
    /// Case-sensitive LIKE
    LikeBinary,
    In,
    NotIn,
    IsNull,
    IsNotNull,
    Between,
    NotBetween,
    Regexp,
    NotRegexp,
    /// Internal marker: qualify `field` with the default schema once a
    /// connection is available. Never produced by callers.
    PrefixSchema,
}

impl Operator {
    /// Portable SQL spelling of the operator
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::NotEq => "<>",
            Operator::Lt => "<",
            Operator::LtEq => "<=",
            Operator::Gt => ">",
            Operator::GtEq => ">=",
            Operator::Like => "LIKE",
            Operator::NotLike => "NOT LIKE",
            Operator::LikeBinary => "LIKE BINARY",
            Operator::In => "IN",
            Operator::NotIn => "NOT IN",
            Operator::IsNull => "IS NULL",
            Operator::IsNotNull => "IS NOT NULL",
            Operator::Between => "BETWEEN",
            Operator::NotBetween => "NOT BETWEEN",
            Operator::Regexp => "REGEXP",
            Operator::NotRegexp => "NOT REGEXP",
            Operator::PrefixSchema => "PREFIX_SCHEMA",
        }
    }

    pub fn is_like(&self) -> bool {
        matches!(self, Operator::Like | Operator::NotLike | Operator::LikeBinary)
    }

    pub fn is_regexp(&self) -> bool {
        matches!(self, Operator::Regexp | Operator::NotRegexp)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operator {
    type Err = ShimError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.split_whitespace().collect::<Vec<_>>().join(" ").to_uppercase();
        match normalized.as_str() {
            "=" => Ok(Operator::Eq),
            "<>" | "!=" => Ok(Operator::NotEq),
            "<" => Ok(Operator::Lt),
            "<=" => Ok(Operator::LtEq),
            ">" => Ok(Operator::Gt),
            ">=" => Ok(Operator::GtEq),
            "LIKE" => Ok(Operator::Like),
            "NOT LIKE" => Ok(Operator::NotLike),
            "LIKE BINARY" => Ok(Operator::LikeBinary),
            "IN" => Ok(Operator::In),
            "NOT IN" => Ok(Operator::NotIn),
            "IS NULL" => Ok(Operator::IsNull),
            "IS NOT NULL" => Ok(Operator::IsNotNull),
            "BETWEEN" => Ok(Operator::Between),
            "NOT BETWEEN" => Ok(Operator::NotBetween),
            "REGEXP" => Ok(Operator::Regexp),
            "NOT REGEXP" => Ok(Operator::NotRegexp),
            "PREFIX_SCHEMA" => Ok(Operator::PrefixSchema),
            _ => Err(ShimError::UnknownOperator(s.to_string())),
        }
    }
}

/// Value side of a condition node
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum ConditionValue {
    #[default]
    None,
    Scalar(SqlValue),
    List(Vec<SqlValue>),
    /// Values already bound to the placeholders the field references
    Named(Arguments),
}

impl ConditionValue {
    pub fn named(placeholder: impl Into<String>, value: SqlValue) -> Self {
        let mut args = Arguments::new();
        args.insert(placeholder.into(), value);
        ConditionValue::Named(args)
    }
}

impl From<SqlValue> for ConditionValue {
    fn from(value: SqlValue) -> Self {
        ConditionValue::Scalar(value)
    }
}

impl From<&str> for ConditionValue {
    fn from(value: &str) -> Self {
        ConditionValue::Scalar(SqlValue::from(value))
    }
}

impl From<i64> for ConditionValue {
    fn from(value: i64) -> Self {
        ConditionValue::Scalar(SqlValue::Int(value))
    }
}

impl From<Vec<SqlValue>> for ConditionValue {
    fn from(values: Vec<SqlValue>) -> Self {
        ConditionValue::List(values)
    }
}

impl From<Arguments> for ConditionValue {
    fn from(args: Arguments) -> Self {
        ConditionValue::Named(args)
    }
}

/// One predicate in an ordered condition list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionNode {
    /// Column reference or self-contained SQL fragment
    pub field: String,
    pub operator: Option<Operator>,
    pub value: ConditionValue,
}

impl ConditionNode {
    pub fn new(field: impl Into<String>, value: ConditionValue, operator: Option<Operator>) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
        }
    }

    /// A raw SQL fragment carrying its own bound arguments
    pub fn fragment(sql: impl Into<String>, args: Arguments) -> Self {
        Self::new(sql, ConditionValue::Named(args), None)
    }
}

/// How the nodes of a condition list are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Conjunction {
    #[default]
    And,
    Or,
}

impl Conjunction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Conjunction::And => "AND",
            Conjunction::Or => "OR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_parsing() {
        assert_eq!("not like".parse::<Operator>().unwrap(), Operator::NotLike);
        assert_eq!("NOT   REGEXP".parse::<Operator>().unwrap(), Operator::NotRegexp);
        assert_eq!("!=".parse::<Operator>().unwrap(), Operator::NotEq);
        assert_eq!("Like Binary".parse::<Operator>().unwrap(), Operator::LikeBinary);
        assert!(matches!(
            "SOUNDS LIKE".parse::<Operator>(),
            Err(ShimError::UnknownOperator(_))
        ));
    }

    #[test]
    fn test_operator_families() {
        assert!(Operator::LikeBinary.is_like());
        assert!(!Operator::Eq.is_like());
        assert!(Operator::NotRegexp.is_regexp());
        assert_eq!(Operator::NotBetween.to_string(), "NOT BETWEEN");
    }

    #[test]
    fn test_named_value() {
        let value = ConditionValue::named(":p0", SqlValue::from("x"));
        match value {
            ConditionValue::Named(args) => assert_eq!(args[":p0"], SqlValue::from("x")),
            other => panic!("unexpected value: {:?}", other),
        }
    }
}
