use super::{placeholder_name, CompileContext, PlaceholderSource};
use crate::error::{ShimError, ShimResult};
use crate::models::{ConditionNode, ConditionValue, Operator, SqlValue};

/// Dialect-specific rewriting of condition nodes
///
/// Called once per node before the generic compiler runs. Each operator
/// family has its own hook; `rewrite` dispatches to them and leaves every
/// other node untouched.
pub trait ConditionRewriter: Send + Sync {
    /// REGEXP and NOT REGEXP
    fn rewrite_regexp(
        &self,
        node: &mut ConditionNode,
        ctx: &dyn CompileContext,
        placeholders: &mut dyn PlaceholderSource,
    ) -> ShimResult<()>;

    /// LIKE, NOT LIKE and LIKE BINARY
    fn rewrite_like(&self, node: &mut ConditionNode) -> ShimResult<()>;

    /// The internal PREFIX_SCHEMA marker
    fn rewrite_prefix_schema(&self, node: &mut ConditionNode, ctx: &dyn CompileContext) -> ShimResult<()>;

    fn rewrite(
        &self,
        node: &mut ConditionNode,
        ctx: &dyn CompileContext,
        placeholders: &mut dyn PlaceholderSource,
    ) -> ShimResult<()> {
        match node.operator {
            Some(op) if op.is_regexp() => self.rewrite_regexp(node, ctx, placeholders),
            Some(op) if op.is_like() => self.rewrite_like(node),
            Some(Operator::PrefixSchema) => self.rewrite_prefix_schema(node, ctx),
            _ => Ok(()),
        }
    }
}

/// SQL Server rules
///
/// REGEXP becomes a call to the user-defined `REGEXP` function in the default
/// schema, LIKE patterns switch from backslash escapes to bracket escapes, and
/// PREFIX_SCHEMA fragments get the schema name prepended.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlsrvConditionRewriter;

impl ConditionRewriter for SqlsrvConditionRewriter {
    fn rewrite_regexp(
        &self,
        node: &mut ConditionNode,
        ctx: &dyn CompileContext,
        placeholders: &mut dyn PlaceholderSource,
    ) -> ShimResult<()> {
        let value = match &node.value {
            ConditionValue::Scalar(value) => value.clone(),
            other => {
                return Err(ShimError::InvalidCondition(format!(
                    "REGEXP on {} needs a single pattern, got {:?}",
                    node.field, other
                )))
            }
        };

        let comparison = if node.operator == Some(Operator::Regexp) { 1 } else { 0 };
        let placeholder = placeholder_name(placeholders.next_placeholder());
        let field = ctx.escape_field(&node.field);

        node.field = format!(
            "{}.REGEXP({}, {}) = {}",
            ctx.default_schema_name(),
            placeholder,
            field,
            comparison
        );
        node.operator = None;
        node.value = ConditionValue::named(placeholder, value);
        Ok(())
    }

    fn rewrite_like(&self, node: &mut ConditionNode) -> ShimResult<()> {
        match &mut node.value {
            ConditionValue::Scalar(SqlValue::Text(pattern)) => {
                *pattern = escape_like(pattern);
                Ok(())
            }
            ConditionValue::Scalar(_) => Ok(()),
            other => Err(ShimError::InvalidCondition(format!(
                "LIKE on {} needs a single pattern, got {:?}",
                node.field, other
            ))),
        }
    }

    fn rewrite_prefix_schema(&self, node: &mut ConditionNode, ctx: &dyn CompileContext) -> ShimResult<()> {
        node.field = format!("{}.{}", ctx.default_schema_name(), node.field);
        node.operator = None;
        Ok(())
    }
}

/// Convert a backslash-escaped LIKE pattern to SQL Server bracket escapes
///
/// Single left-to-right pass, so output of one replacement is never
/// rescanned: `[` becomes `[[]`, `\%` becomes `[%]`, `\_` becomes `[_]` and
/// `\\` becomes `\`.
pub fn escape_like(pattern: &str) -> String {
    let mut escaped = String::with_capacity(pattern.len() + 8);
    let mut chars = pattern.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '[' => escaped.push_str("[[]"),
            '\\' => match chars.peek() {
                Some('%') => {
                    chars.next();
                    escaped.push_str("[%]");
                }
                Some('_') => {
                    chars.next();
                    escaped.push_str("[_]");
                }
                Some('\\') => {
                    chars.next();
                    escaped.push('\\');
                }
                _ => escaped.push('\\'),
            },
            _ => escaped.push(c),
        }
    }

    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::condition::tests::TestContext;
    use crate::services::condition::PlaceholderCounter;

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("50\\%"), "50[%]");
        assert_eq!(escape_like("a\\_b"), "a[_]b");
        assert_eq!(escape_like("[abc]"), "[[]abc]");
        assert_eq!(escape_like("c:\\\\temp"), "c:\\temp");
        // Unescaped wildcards keep their meaning
        assert_eq!(escape_like("100%_x"), "100%_x");
        // Output is never rescanned
        assert_eq!(escape_like("\\\\%"), "\\%");
        assert_eq!(escape_like("trailing\\"), "trailing\\");
    }

    #[test]
    fn test_like_family_escapes_value() {
        let rewriter = SqlsrvConditionRewriter;
        let ctx = TestContext::new("dbo");
        let mut placeholders = PlaceholderCounter::new();

        for op in [Operator::Like, Operator::NotLike, Operator::LikeBinary] {
            let mut node = ConditionNode::new("title", ConditionValue::from("\\_x["), Some(op));
            rewriter.rewrite(&mut node, &ctx, &mut placeholders).unwrap();
            assert_eq!(node.field, "title");
            assert_eq!(node.operator, Some(op));
            assert_eq!(node.value, ConditionValue::from("[_]x[[]"));
        }
        assert_eq!(placeholders.next_placeholder(), 0);
    }

    #[test]
    fn test_like_with_list_is_invalid() {
        let mut node = ConditionNode::new(
            "title",
            ConditionValue::List(vec![SqlValue::from("a")]),
            Some(Operator::Like),
        );
        assert!(matches!(
            SqlsrvConditionRewriter.rewrite_like(&mut node),
            Err(ShimError::InvalidCondition(_))
        ));
    }

    #[test]
    fn test_regexp_rewrite() {
        let ctx = TestContext::new("dbo");
        let mut placeholders = PlaceholderCounter::new();
        placeholders.next_placeholder();

        let mut node = ConditionNode::new("value", ConditionValue::from("^a+$"), Some(Operator::NotRegexp));
        SqlsrvConditionRewriter
            .rewrite(&mut node, &ctx, &mut placeholders)
            .unwrap();

        assert_eq!(node.field, "dbo.REGEXP(:db_condition_placeholder_1, [value]) = 0");
        assert_eq!(node.operator, None);
        assert_eq!(
            node.value,
            ConditionValue::named(":db_condition_placeholder_1", SqlValue::from("^a+$"))
        );
    }

    #[test]
    fn test_prefix_schema_rewrite() {
        let ctx = TestContext::new("reporting");
        let mut node = ConditionNode::new("REGEXP(:p, name) = 1", ConditionValue::None, Some(Operator::PrefixSchema));
        SqlsrvConditionRewriter
            .rewrite(&mut node, &ctx, &mut PlaceholderCounter::new())
            .unwrap();

        assert_eq!(node.field, "reporting.REGEXP(:p, name) = 1");
        assert_eq!(node.operator, None);
    }

    #[test]
    fn test_other_operators_untouched() {
        let ctx = TestContext::new("dbo");
        let original = ConditionNode::new("nid", ConditionValue::from(3i64), Some(Operator::GtEq));
        let mut node = original.clone();
        SqlsrvConditionRewriter
            .rewrite(&mut node, &ctx, &mut PlaceholderCounter::new())
            .unwrap();
        assert_eq!(node, original);
    }
}
