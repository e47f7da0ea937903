//! Persistence boundary.
//!
//! The lifecycle orchestrator treats the host's database as an opaque
//! transactional sink: begin/commit/rollback around descriptor-state
//! writes and collaborator install hooks, plus raw statement execution
//! for seed imports. [`MemoryStore`] is the reference implementation
//! used by tests and hosts without a real database.

use std::sync::Mutex;

use thiserror::Error;

/// Persistence errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Statement execution failed.
    #[error("statement failed: {0}")]
    Execute(String),

    /// Transaction bookkeeping failure.
    #[error("transaction error: {0}")]
    Transaction(String),
}

/// A transactional key-value/relational sink.
pub trait TransactionalStore: Send + Sync {
    /// Opens a transaction.
    fn begin(&self) -> Result<(), StoreError>;

    /// Commits the open transaction.
    fn commit(&self) -> Result<(), StoreError>;

    /// Rolls back the open transaction.
    fn rollback(&self) -> Result<(), StoreError>;

    /// Executes one statement, inside or outside a transaction.
    fn execute(&self, statement: &str) -> Result<(), StoreError>;
}

/// In-memory store recording executed statements.
#[derive(Default)]
pub struct MemoryStore {
    committed: Mutex<Vec<String>>,
    pending: Mutex<Option<Vec<String>>>,
    fail_pattern: Mutex<Option<String>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `execute` fail for statements containing `pattern`
    /// (test hook).
    pub fn fail_matching(&self, pattern: &str) {
        if let Ok(mut guard) = self.fail_pattern.lock() {
            *guard = Some(pattern.to_string());
        }
    }

    /// All committed statements, in execution order.
    #[must_use]
    pub fn statements(&self) -> Vec<String> {
        self.committed.lock().map(|s| s.clone()).unwrap_or_default()
    }

    /// True while a transaction is open.
    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.pending.lock().is_ok_and(|p| p.is_some())
    }
}

impl TransactionalStore for MemoryStore {
    fn begin(&self) -> Result<(), StoreError> {
        let mut pending = self
            .pending
            .lock()
            .map_err(|_| StoreError::Transaction("poisoned".to_string()))?;
        if pending.is_some() {
            return Err(StoreError::Transaction("transaction already open".to_string()));
        }
        *pending = Some(Vec::new());
        Ok(())
    }

    fn commit(&self) -> Result<(), StoreError> {
        let mut pending = self
            .pending
            .lock()
            .map_err(|_| StoreError::Transaction("poisoned".to_string()))?;
        let staged = pending
            .take()
            .ok_or_else(|| StoreError::Transaction("no open transaction".to_string()))?;
        self.committed
            .lock()
            .map_err(|_| StoreError::Transaction("poisoned".to_string()))?
            .extend(staged);
        Ok(())
    }

    fn rollback(&self) -> Result<(), StoreError> {
        let mut pending = self
            .pending
            .lock()
            .map_err(|_| StoreError::Transaction("poisoned".to_string()))?;
        pending
            .take()
            .ok_or_else(|| StoreError::Transaction("no open transaction".to_string()))?;
        Ok(())
    }

    fn execute(&self, statement: &str) -> Result<(), StoreError> {
        if let Ok(guard) = self.fail_pattern.lock() {
            if let Some(pattern) = guard.as_ref() {
                if statement.contains(pattern) {
                    return Err(StoreError::Execute(format!("matched '{pattern}'")));
                }
            }
        }

        let mut pending = self
            .pending
            .lock()
            .map_err(|_| StoreError::Transaction("poisoned".to_string()))?;
        match pending.as_mut() {
            Some(staged) => staged.push(statement.to_string()),
            None => self
                .committed
                .lock()
                .map_err(|_| StoreError::Transaction("poisoned".to_string()))?
                .push(statement.to_string()),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commit_keeps_statements() {
        let store = MemoryStore::new();
        store.begin().unwrap();
        store.execute("CREATE TABLE a (id INT);").unwrap();
        assert!(store.statements().is_empty());
        store.commit().unwrap();
        assert_eq!(store.statements().len(), 1);
    }

    #[test]
    fn test_rollback_discards_statements() {
        let store = MemoryStore::new();
        store.begin().unwrap();
        store.execute("CREATE TABLE a (id INT);").unwrap();
        store.rollback().unwrap();
        assert!(store.statements().is_empty());
        assert!(!store.in_transaction());
    }

    #[test]
    fn test_execute_outside_transaction() {
        let store = MemoryStore::new();
        store.execute("INSERT INTO a VALUES (1);").unwrap();
        assert_eq!(store.statements().len(), 1);
    }

    #[test]
    fn test_nested_begin_rejected() {
        let store = MemoryStore::new();
        store.begin().unwrap();
        assert!(store.begin().is_err());
    }

    #[test]
    fn test_fail_matching() {
        let store = MemoryStore::new();
        store.fail_matching("boom");
        assert!(store.execute("INSERT boom;").is_err());
        assert!(store.execute("INSERT ok;").is_ok());
    }
}
