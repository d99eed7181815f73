// Condition Translation Module
//
// Condition lists are built by callers in the portable dialect and compiled
// into SQL Server text right before the owning query is executed:
// 1. A dialect rewriter replaces nodes SQL Server cannot express natively
// 2. The generic compiler renders the rewritten nodes into SQL and arguments
//
// Raw fragments added through `add_raw_condition` get their rewriting at
// insertion time, since there is no structure left to work with later.

pub mod compiler; // Generic, dialect-agnostic renderer
pub mod raw; // REGEXP and CONCAT_WS handling for raw fragments
pub mod rewriter; // ConditionRewriter trait and the SQL Server rules

pub use compiler::{CompiledCondition, GenericCompiler};
pub use rewriter::{ConditionRewriter, SqlsrvConditionRewriter};

use std::sync::Arc;

use crate::error::ShimResult;
use crate::models::{Arguments, ConditionNode, ConditionValue, Conjunction, Operator};

/// Name of the `n`th generated condition placeholder
pub fn placeholder_name(n: usize) -> String {
    format!(":db_condition_placeholder_{}", n)
}

/// Hands out placeholder numbers unique within one statement
pub trait PlaceholderSource {
    fn next_placeholder(&mut self) -> usize;
}

/// Monotonic counter starting at zero
#[derive(Debug, Clone, Default)]
pub struct PlaceholderCounter {
    next: usize,
}

impl PlaceholderCounter {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PlaceholderSource for PlaceholderCounter {
    fn next_placeholder(&mut self) -> usize {
        let current = self.next;
        self.next += 1;
        current
    }
}

/// What compilation needs from the connection
pub trait CompileContext {
    fn default_schema_name(&self) -> &str;

    fn escape_field(&self, field: &str) -> String;
}

/// Ordered list of predicates joined by one conjunction
pub struct Condition {
    conjunction: Conjunction,
    nodes: Vec<ConditionNode>,
    rewriter: Arc<dyn ConditionRewriter>,
    compiled: Option<CompiledCondition>,
    changed: bool,
}

impl Condition {
    /// Create a condition list using the SQL Server rewriting rules
    pub fn new(conjunction: Conjunction) -> Self {
        Self::with_rewriter(conjunction, Arc::new(SqlsrvConditionRewriter))
    }

    pub fn with_rewriter(conjunction: Conjunction, rewriter: Arc<dyn ConditionRewriter>) -> Self {
        Self {
            conjunction,
            nodes: Vec::new(),
            rewriter,
            compiled: None,
            changed: true,
        }
    }

    pub fn and() -> Self {
        Self::new(Conjunction::And)
    }

    pub fn or() -> Self {
        Self::new(Conjunction::Or)
    }

    /// Add a structured predicate
    ///
    /// Without an operator the value decides: `IN` for lists, `IS NULL` for
    /// no value and `=` otherwise.
    pub fn add_condition(
        &mut self,
        field: impl Into<String>,
        value: impl Into<ConditionValue>,
        operator: Option<Operator>,
    ) -> &mut Self {
        let value = value.into();
        let operator = operator.or_else(|| match &value {
            ConditionValue::None => Some(Operator::IsNull),
            ConditionValue::List(_) => Some(Operator::In),
            ConditionValue::Scalar(_) => Some(Operator::Eq),
            ConditionValue::Named(_) => None,
        });

        self.push(ConditionNode::new(field, value, operator));
        self
    }

    /// Add a raw SQL fragment with its own bound arguments
    ///
    /// REGEXP infixes and CONCAT_WS calls are rewritten here. Fails with
    /// `MalformedFragment` when a CONCAT_WS call cannot be parsed; the list
    /// is left unchanged in that case.
    pub fn add_raw_condition(&mut self, snippet: &str, args: Arguments) -> ShimResult<&mut Self> {
        let node = raw::translate_fragment(snippet, args)?;
        self.push(node);
        Ok(self)
    }

    /// Shorthand for `add_condition(field, ConditionValue::None, IsNull)`
    pub fn is_null(&mut self, field: impl Into<String>) -> &mut Self {
        self.add_condition(field, ConditionValue::None, Some(Operator::IsNull))
    }

    pub fn is_not_null(&mut self, field: impl Into<String>) -> &mut Self {
        self.add_condition(field, ConditionValue::None, Some(Operator::IsNotNull))
    }

    fn push(&mut self, node: ConditionNode) {
        self.nodes.push(node);
        self.changed = true;
    }

    /// Rewrite and render the list; a no-op if nothing changed since the
    /// last successful compile
    pub fn compile(&mut self, ctx: &dyn CompileContext, placeholders: &mut dyn PlaceholderSource) -> ShimResult<()> {
        if !self.changed && self.compiled.is_some() {
            return Ok(());
        }

        // A failed recompile must not leave stale output behind
        self.compiled = None;

        // Rewrites work on a copy so recompiling never rewrites a node twice
        let mut nodes = self.nodes.clone();
        for node in nodes.iter_mut() {
            self.rewriter.rewrite(node, ctx, placeholders)?;
        }

        let compiled = GenericCompiler::new(self.conjunction).compile(nodes, ctx, placeholders)?;
        tracing::debug!(
            "Compiled {} condition(s) with {} argument(s)",
            compiled.nodes.len(),
            compiled.arguments.len()
        );

        self.compiled = Some(compiled);
        self.changed = false;
        Ok(())
    }

    pub fn compiled(&self) -> Option<&CompiledCondition> {
        self.compiled.as_ref()
    }

    /// Compiled SQL, empty before the first compile
    pub fn sql(&self) -> &str {
        self.compiled.as_ref().map(|c| c.sql.as_str()).unwrap_or("")
    }

    /// Arguments of the compiled SQL, empty before the first compile
    pub fn arguments(&self) -> &Arguments {
        static EMPTY: Arguments = Arguments::new();
        self.compiled.as_ref().map(|c| &c.arguments).unwrap_or(&EMPTY)
    }

    pub fn conjunction(&self) -> Conjunction {
        self.conjunction
    }

    /// Nodes as added, before dialect rewriting
    pub fn nodes(&self) -> &[ConditionNode] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}
