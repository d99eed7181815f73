use serde::{Deserialize, Serialize};

/// Name given to the outermost transaction scope
pub const ROOT_TRANSACTION_NAME: &str = "sqlsrv_transaction";

/// What happens when a scope ends without an explicit commit or rollback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImplicitEnd {
    /// Roll back half-finished work
    #[default]
    Rollback,
    /// Deferred commit: the scope is committed when it goes out of scope, and
    /// explicit commits are refused
    Commit,
}

/// Settings attached to a transaction scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TransactionSettings {
    #[serde(default)]
    pub implicit_end: ImplicitEnd,
}

impl TransactionSettings {
    pub fn deferred_commit() -> Self {
        Self {
            implicit_end: ImplicitEnd::Commit,
        }
    }
}

/// One entry of the transaction layer stack
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionLayer {
    pub name: String,
    /// Cleared once the owning scope committed; the layer is popped as soon as
    /// nothing active remains above it
    pub active: bool,
}

impl TransactionLayer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            active: true,
        }
    }
}
