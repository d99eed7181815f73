use serde::{Deserialize, Serialize};

/// What the caller wants back from an executed statement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReturnKind {
    #[default]
    Rows,
    Affected,
    InsertId,
    Null,
}

/// Execution result reported by the statement executor
#[derive(Debug, Clone, PartialEq)]
pub enum ExecuteOutcome {
    Rows(Vec<serde_json::Value>),
    Affected(u64),
    InsertId(i64),
    Null,
}

impl ExecuteOutcome {
    pub fn rows(&self) -> Option<&[serde_json::Value]> {
        match self {
            ExecuteOutcome::Rows(rows) => Some(rows),
            _ => None,
        }
    }

    pub fn row_count(&self) -> usize {
        match self {
            ExecuteOutcome::Rows(rows) => rows.len(),
            ExecuteOutcome::Affected(count) => *count as usize,
            _ => 0,
        }
    }
}

/// Per-statement options for `Connection::query`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryOptions {
    pub return_kind: ReturnKind,
    /// Accept a `;` inside the statement
    #[serde(default)]
    pub allow_delimiter: bool,
    /// Skip the query rewriter (caller guarantees SQL Server syntax)
    #[serde(default)]
    pub bypass_preprocess: bool,
}

impl QueryOptions {
    pub fn returning(return_kind: ReturnKind) -> Self {
        Self {
            return_kind,
            ..Self::default()
        }
    }

    pub fn direct() -> Self {
        Self {
            bypass_preprocess: true,
            ..Self::default()
        }
    }
}
