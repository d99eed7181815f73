use super::{placeholder_name, CompileContext, PlaceholderSource};
use crate::error::{ShimError, ShimResult};
use crate::models::{Arguments, ConditionNode, ConditionValue, Conjunction, Operator, SqlValue};

/// Result of compiling a condition list
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledCondition {
    pub sql: String,
    pub arguments: Arguments,
    /// Nodes after dialect rewriting, in list order
    pub nodes: Vec<ConditionNode>,
}

/// Renders condition nodes into SQL text and bound arguments
///
/// Knows nothing about any particular dialect. Operator-less nodes are
/// emitted verbatim and, when joined with others, parenthesized.
#[derive(Debug, Clone, Copy)]
pub struct GenericCompiler {
    conjunction: Conjunction,
}

impl GenericCompiler {
    pub fn new(conjunction: Conjunction) -> Self {
        Self { conjunction }
    }

    pub fn compile(
        &self,
        nodes: Vec<ConditionNode>,
        ctx: &dyn CompileContext,
        placeholders: &mut dyn PlaceholderSource,
    ) -> ShimResult<CompiledCondition> {
        let mut arguments = Arguments::new();
        let wrap_fragments = nodes.len() > 1;

        let fragments = nodes
            .iter()
            .map(|node| render(node, ctx, placeholders, &mut arguments, wrap_fragments))
            .collect::<ShimResult<Vec<_>>>()?;

        let separator = format!(" {} ", self.conjunction.as_str());
        Ok(CompiledCondition {
            sql: fragments.join(&separator),
            arguments,
            nodes,
        })
    }
}

fn render(
    node: &ConditionNode,
    ctx: &dyn CompileContext,
    placeholders: &mut dyn PlaceholderSource,
    arguments: &mut Arguments,
    wrap: bool,
) -> ShimResult<String> {
    let Some(operator) = node.operator else {
        match &node.value {
            ConditionValue::Named(args) => {
                arguments.extend(args.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            ConditionValue::None => {}
            other => {
                return Err(ShimError::InvalidCondition(format!(
                    "SQL fragment {} can only carry named arguments, got {:?}",
                    node.field, other
                )))
            }
        }
        return Ok(if wrap {
            format!("({})", node.field)
        } else {
            node.field.clone()
        });
    };

    let field = ctx.escape_field(&node.field);
    let mut bind = |value: &SqlValue| {
        let name = placeholder_name(placeholders.next_placeholder());
        arguments.insert(name.clone(), value.clone());
        name
    };

    let sql = match operator {
        Operator::IsNull | Operator::IsNotNull => format!("{} {}", field, operator),

        Operator::In | Operator::NotIn => {
            let values = values_of(node)?;
            if values.is_empty() {
                // Nothing is in an empty set
                let always = if operator == Operator::In { "1 = 0" } else { "1 = 1" };
                return Ok(always.to_string());
            }
            let names: Vec<String> = values.iter().map(|v| bind(v)).collect();
            format!("{} {} ({})", field, operator, names.join(", "))
        }

        Operator::Between | Operator::NotBetween => match values_of(node)?.as_slice() {
            [low, high] => {
                let low = bind(low);
                let high = bind(high);
                format!("{} {} {} AND {}", field, operator, low, high)
            }
            _ => {
                return Err(ShimError::InvalidCondition(format!(
                    "{} on {} needs exactly two values",
                    operator, node.field
                )))
            }
        },

        Operator::PrefixSchema => {
            return Err(ShimError::InvalidCondition(format!(
                "schema prefix marker on {} was not resolved",
                node.field
            )))
        }

        _ => {
            let ConditionValue::Scalar(value) = &node.value else {
                return Err(ShimError::InvalidCondition(format!(
                    "{} on {} needs a single value, got {:?}",
                    operator, node.field, node.value
                )));
            };
            let keyword = match operator {
                Operator::LikeBinary => Operator::Like.as_str(),
                other => other.as_str(),
            };
            format!("{} {} {}", field, keyword, bind(value))
        }
    };

    Ok(sql)
}

fn values_of(node: &ConditionNode) -> ShimResult<Vec<SqlValue>> {
    match &node.value {
        ConditionValue::List(values) => Ok(values.clone()),
        ConditionValue::Scalar(value) => Ok(vec![value.clone()]),
        other => Err(ShimError::InvalidCondition(format!(
            "{} needs a list of values, got {:?}",
            node.field, other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::condition::tests::TestContext;
    use crate::services::condition::PlaceholderCounter;

    fn compile_nodes(conjunction: Conjunction, nodes: Vec<ConditionNode>) -> ShimResult<CompiledCondition> {
        GenericCompiler::new(conjunction).compile(nodes, &TestContext::new("dbo"), &mut PlaceholderCounter::new())
    }

    #[test]
    fn test_comparison_operators() {
        let compiled = compile_nodes(
            Conjunction::And,
            vec![
                ConditionNode::new("nid", ConditionValue::from(1i64), Some(Operator::GtEq)),
                ConditionNode::new("value", ConditionValue::from("x"), Some(Operator::NotEq)),
            ],
        )
        .unwrap();

        assert_eq!(
            compiled.sql,
            "nid >= :db_condition_placeholder_0 AND [value] <> :db_condition_placeholder_1"
        );
        assert_eq!(compiled.arguments[":db_condition_placeholder_0"], SqlValue::Int(1));
        assert_eq!(compiled.arguments[":db_condition_placeholder_1"], SqlValue::from("x"));
    }

    #[test]
    fn test_between_and_like_binary() {
        let compiled = compile_nodes(
            Conjunction::Or,
            vec![
                ConditionNode::new(
                    "created",
                    ConditionValue::List(vec![SqlValue::Int(10), SqlValue::Int(20)]),
                    Some(Operator::NotBetween),
                ),
                ConditionNode::new("name", ConditionValue::from("Ab%"), Some(Operator::LikeBinary)),
            ],
        )
        .unwrap();

        assert_eq!(
            compiled.sql,
            "created NOT BETWEEN :db_condition_placeholder_0 AND :db_condition_placeholder_1 \
             OR name LIKE :db_condition_placeholder_2"
        );
        assert_eq!(compiled.arguments.len(), 3);
    }

    #[test]
    fn test_between_needs_two_values() {
        let result = compile_nodes(
            Conjunction::And,
            vec![ConditionNode::new(
                "created",
                ConditionValue::List(vec![SqlValue::Int(10)]),
                Some(Operator::Between),
            )],
        );
        assert!(matches!(result, Err(ShimError::InvalidCondition(_))));
    }

    #[test]
    fn test_empty_in_lists() {
        let compiled = compile_nodes(
            Conjunction::And,
            vec![
                ConditionNode::new("nid", ConditionValue::List(vec![]), Some(Operator::In)),
                ConditionNode::new("uid", ConditionValue::List(vec![]), Some(Operator::NotIn)),
            ],
        )
        .unwrap();
        assert_eq!(compiled.sql, "1 = 0 AND 1 = 1");
        assert!(compiled.arguments.is_empty());
    }

    #[test]
    fn test_fragment_arguments_are_merged() {
        let mut args = Arguments::new();
        args.insert(":a".to_string(), SqlValue::Int(1));
        args.insert(":b".to_string(), SqlValue::Int(2));

        let compiled = compile_nodes(
            Conjunction::And,
            vec![
                ConditionNode::fragment("a = :a OR b = :b", args),
                ConditionNode::new("status", ConditionValue::None, Some(Operator::IsNotNull)),
            ],
        )
        .unwrap();

        assert_eq!(compiled.sql, "(a = :a OR b = :b) AND status IS NOT NULL");
        assert_eq!(compiled.arguments.len(), 2);
        assert_eq!(compiled.nodes.len(), 2);
    }

    #[test]
    fn test_unresolved_prefix_marker_is_rejected() {
        let result = compile_nodes(
            Conjunction::And,
            vec![ConditionNode::new("REGEXP(:p, a) = 1", ConditionValue::None, Some(Operator::PrefixSchema))],
        );
        assert!(matches!(result, Err(ShimError::InvalidCondition(_))));
    }
}
