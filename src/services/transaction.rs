// Transaction and Savepoint Management
//
// SQL Server has one native transaction per connection. Nested scopes are
// emulated with named savepoints (`SAVE TRANSACTION name`). The manager keeps
// a stack of layers; the bottom one is the native transaction itself.
//
// Savepoints cannot be released in SQL Server. Committing a nested scope only
// marks its layer inactive; the layer is dropped once nothing active sits
// above it, and the native transaction commits when the stack empties.

use std::ops::{Deref, DerefMut};

use super::connection::Connection;
use super::executor::StatementExecutor;
use crate::error::{ShimError, ShimResult};
use crate::models::{ImplicitEnd, TransactionLayer, TransactionSettings, ROOT_TRANSACTION_NAME};

/// Callback run once when the root transaction ends; receives `true` on a
/// successful commit and `false` on rollback or a failed commit
pub type RootEndCallback = Box<dyn FnOnce(bool) + Send>;

/// Stack of transaction layers for one connection
pub struct TransactionManager {
    layers: Vec<TransactionLayer>,
    root_end_callbacks: Vec<RootEndCallback>,
    enabled: bool,
}

impl TransactionManager {
    pub fn new(enabled: bool) -> Self {
        Self {
            layers: Vec::new(),
            root_end_callbacks: Vec::new(),
            enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Number of layers on the stack
    pub fn depth(&self) -> usize {
        self.layers.len()
    }

    pub fn layers(&self) -> &[TransactionLayer] {
        &self.layers
    }

    pub fn contains(&self, name: &str) -> bool {
        self.layers.iter().any(|layer| layer.name == name)
    }

    /// Open the native transaction, or a savepoint inside it
    pub fn push<E: StatementExecutor + ?Sized>(&mut self, exec: &mut E, name: &str) -> ShimResult<()> {
        if !self.enabled {
            return Ok(());
        }
        if self.contains(name) {
            return Err(ShimError::DuplicateName(name.to_string()));
        }

        if self.layers.is_empty() {
            exec.begin_transaction()?;
            tracing::debug!("Began transaction {}", name);
        } else {
            exec.execute(&format!("SAVE TRANSACTION {}", name), &Default::default(), Default::default())?;
            tracing::debug!("Created savepoint {} at depth {}", name, self.layers.len());
        }

        self.layers.push(TransactionLayer::new(name));
        Ok(())
    }

    /// Mark `name` committed and drop every committable layer
    ///
    /// An unknown name is ignored: an earlier rollback-to already discarded it.
    pub fn release<E: StatementExecutor + ?Sized>(&mut self, exec: &mut E, name: &str) -> ShimResult<()> {
        if !self.enabled {
            return Ok(());
        }
        if self.layers.is_empty() {
            return Err(ShimError::no_active(format!("cannot commit {}", name)));
        }

        let Some(layer) = self.layers.iter_mut().find(|layer| layer.name == name) else {
            tracing::debug!("Transaction {} was already resolved", name);
            return Ok(());
        };
        layer.active = false;
        self.pop_committable(exec)
    }

    /// Pop inactive layers from the top; commit when the stack empties
    fn pop_committable<E: StatementExecutor + ?Sized>(&mut self, exec: &mut E) -> ShimResult<()> {
        while self.layers.last().is_some_and(|layer| !layer.active) {
            if let Some(layer) = self.layers.pop() {
                tracing::debug!("Released transaction layer {}", layer.name);
            }
            if self.layers.is_empty() {
                return self.commit_root(exec);
            }
        }
        Ok(())
    }

    fn commit_root<E: StatementExecutor + ?Sized>(&mut self, exec: &mut E) -> ShimResult<()> {
        let success = match exec.commit() {
            Ok(success) => success,
            Err(e) => {
                self.run_root_end_callbacks(false);
                return Err(e);
            }
        };

        self.run_root_end_callbacks(success);
        if !success {
            return Err(ShimError::CommitFailed);
        }
        tracing::debug!("Committed root transaction");
        Ok(())
    }

    /// Roll back to the savepoint `name`, or the whole transaction when
    /// `name` is the root layer
    ///
    /// Layers above `name` are discarded. If any were still active the
    /// rollback completes and `OutOfOrderRollback` is returned afterwards.
    /// The stack is left untouched when the native statement fails.
    pub fn rollback<E: StatementExecutor + ?Sized>(&mut self, exec: &mut E, name: &str) -> ShimResult<()> {
        if !self.enabled {
            return Ok(());
        }
        if !exec.in_transaction() {
            return Err(ShimError::no_active(format!("cannot roll back {}", name)));
        }
        let Some(index) = self.layers.iter().position(|layer| layer.name == name) else {
            return Err(ShimError::no_active(format!("{} is not an open transaction", name)));
        };
        let rolled_back_others = index + 1 < self.layers.len();

        if index == 0 {
            exec.rollback()?;
            self.layers.clear();
            self.run_root_end_callbacks(false);
            tracing::debug!("Rolled back root transaction");
            return out_of_order(rolled_back_others, name);
        }

        exec.execute(
            &format!("ROLLBACK TRANSACTION {}", name),
            &Default::default(),
            Default::default(),
        )?;
        self.layers.truncate(index);
        tracing::debug!("Rolled back to savepoint {}", name);
        self.pop_committable(exec)?;
        out_of_order(rolled_back_others, name)
    }

    /// Register a callback for the end of the root transaction
    ///
    /// With transactions disabled every statement commits on its own, so the
    /// callback runs immediately with `true`.
    pub fn add_root_end_callback<F>(&mut self, callback: F) -> ShimResult<()>
    where
        F: FnOnce(bool) + Send + 'static,
    {
        if !self.enabled {
            callback(true);
            return Ok(());
        }
        if self.layers.is_empty() {
            return Err(ShimError::no_active("root end callbacks need an open transaction"));
        }
        self.root_end_callbacks.push(Box::new(callback));
        Ok(())
    }

    fn run_root_end_callbacks(&mut self, success: bool) {
        for callback in std::mem::take(&mut self.root_end_callbacks) {
            callback(success);
        }
    }
}

fn out_of_order(rolled_back_others: bool, name: &str) -> ShimResult<()> {
    if rolled_back_others {
        tracing::warn!("Rollback to {} discarded other active savepoints", name);
        return Err(ShimError::OutOfOrderRollback);
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ScopeState {
    Open,
    Committed,
    RolledBack,
}

/// Handle owning one transaction layer
///
/// Resolved exactly once: by `commit`, by `rollback`, or when dropped while
/// still open (see `ImplicitEnd`). Dereferences to the connection, so work
/// inside the scope, including nested scopes, goes through the handle.
pub struct TransactionScope<'c, E: StatementExecutor> {
    connection: &'c mut Connection<E>,
    name: String,
    settings: TransactionSettings,
    state: ScopeState,
}

impl<'c, E: StatementExecutor> TransactionScope<'c, E> {
    pub(crate) fn begin(
        connection: &'c mut Connection<E>,
        name: Option<&str>,
        settings: TransactionSettings,
    ) -> ShimResult<Self> {
        let depth = connection.transaction_depth();
        let name = match name {
            _ if depth == 0 => ROOT_TRANSACTION_NAME.to_string(),
            Some(name) if !name.is_empty() => name.to_string(),
            _ => format!("savepoint_{}", depth),
        };

        connection.push_transaction(&name)?;
        Ok(Self {
            connection,
            name,
            settings,
            state: ScopeState::Open,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> TransactionSettings {
        self.settings
    }

    /// Commit this scope's layer
    ///
    /// Refused for deferred-commit scopes, which commit when dropped.
    pub fn commit(mut self) -> ShimResult<()> {
        if self.settings.implicit_end == ImplicitEnd::Commit {
            return Err(ShimError::ExplicitCommitNotAllowed);
        }
        if self.state == ScopeState::RolledBack {
            return Err(ShimError::CommitAfterRollback(self.name.clone()));
        }

        self.state = ScopeState::Committed;
        self.connection.release_transaction(&self.name)
    }

    /// Roll back this scope's layer and everything above it
    pub fn rollback(&mut self) -> ShimResult<()> {
        if self.state == ScopeState::RolledBack {
            return Ok(());
        }
        let result = self.connection.rollback_to(&self.name);
        // A failed native rollback keeps the layer, and the scope stays open
        if !self.connection.transactions().is_enabled() || !self.connection.transactions().contains(&self.name) {
            self.state = ScopeState::RolledBack;
        }
        result
    }

    pub fn is_rolled_back(&self) -> bool {
        self.state == ScopeState::RolledBack
    }
}

impl<E: StatementExecutor> Deref for TransactionScope<'_, E> {
    type Target = Connection<E>;

    fn deref(&self) -> &Self::Target {
        self.connection
    }
}

impl<E: StatementExecutor> DerefMut for TransactionScope<'_, E> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.connection
    }
}

impl<E: StatementExecutor> Drop for TransactionScope<'_, E> {
    fn drop(&mut self) {
        if self.state != ScopeState::Open {
            return;
        }
        if self.connection.transactions().is_enabled() && !self.connection.transactions().contains(&self.name) {
            tracing::debug!("Transaction {} already resolved before scope end", self.name);
            return;
        }

        let result = match self.settings.implicit_end {
            ImplicitEnd::Rollback => {
                self.state = ScopeState::RolledBack;
                self.connection.rollback_to(&self.name)
            }
            ImplicitEnd::Commit => {
                self.state = ScopeState::Committed;
                self.connection.release_transaction(&self.name)
            }
        };

        if let Err(e) = result {
            tracing::error!("Failed to end transaction {} at scope exit: {}", self.name, e);
        }
    }
}
