// Statement executor abstraction
//
// The shim never talks to a driver directly. Everything that reaches the
// server goes through this trait: prepared statements with their bound
// arguments, and the native transaction primitives.

use crate::error::ShimResult;
use crate::models::{Arguments, ExecuteOutcome, ReturnKind};

/// Executes statements on one physical connection
///
/// Calls are synchronous and never made concurrently for the same executor.
pub trait StatementExecutor {
    /// Prepare and run `sql` with `args` bound to its placeholders
    fn execute(&mut self, sql: &str, args: &Arguments, kind: ReturnKind) -> ShimResult<ExecuteOutcome>;

    fn begin_transaction(&mut self) -> ShimResult<()>;

    /// Commit the native transaction; `false` when the server refused
    fn commit(&mut self) -> ShimResult<bool>;

    fn rollback(&mut self) -> ShimResult<()>;

    /// Whether the native connection has an open transaction
    fn in_transaction(&self) -> bool;
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::error::ShimError;
    use std::collections::VecDeque;

    /// Executor double recording every statement it receives
    ///
    /// Native transaction calls are recorded as `BEGIN`, `COMMIT` and
    /// `ROLLBACK` so their order relative to savepoint statements is visible.
    #[derive(Debug, Default)]
    pub struct RecordingExecutor {
        pub statements: Vec<String>,
        pub arguments: Vec<Arguments>,
        pub active: bool,
        pub refuse_commit: bool,
        pub fail_statements_containing: Option<String>,
        pub outcomes: VecDeque<ExecuteOutcome>,
    }

    impl RecordingExecutor {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn last_statement(&self) -> Option<&str> {
            self.statements.last().map(String::as_str)
        }
    }

    impl StatementExecutor for RecordingExecutor {
        fn execute(&mut self, sql: &str, args: &Arguments, kind: ReturnKind) -> ShimResult<ExecuteOutcome> {
            if let Some(needle) = &self.fail_statements_containing {
                if sql.contains(needle.as_str()) {
                    return Err(ShimError::Execution(format!("refused: {}", sql)));
                }
            }

            self.statements.push(sql.to_string());
            self.arguments.push(args.clone());

            if let Some(outcome) = self.outcomes.pop_front() {
                return Ok(outcome);
            }
            Ok(match kind {
                ReturnKind::Rows => ExecuteOutcome::Rows(Vec::new()),
                ReturnKind::Affected => ExecuteOutcome::Affected(0),
                ReturnKind::InsertId => ExecuteOutcome::InsertId(0),
                ReturnKind::Null => ExecuteOutcome::Null,
            })
        }

        fn begin_transaction(&mut self) -> ShimResult<()> {
            self.statements.push("BEGIN".to_string());
            self.active = true;
            Ok(())
        }

        fn commit(&mut self) -> ShimResult<bool> {
            self.statements.push("COMMIT".to_string());
            self.active = false;
            Ok(!self.refuse_commit)
        }

        fn rollback(&mut self) -> ShimResult<()> {
            self.statements.push("ROLLBACK".to_string());
            self.active = false;
            Ok(())
        }

        fn in_transaction(&self) -> bool {
            self.active
        }
    }
}
