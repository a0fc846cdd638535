//! Store collaborator: persistence of suites, checks and runs.
//!
//! The engine never persists anything itself. It only reads shared checks
//! through [`QualityStore::get_check`] when a suite refers to a check by id.
//! [`InMemoryStore`] is a thread-safe implementation for embedding and tests.

use crate::error::{MdqError, Result};
use crate::model::{Check, Run, Suite};
use indexmap::IndexMap;
use std::sync::RwLock;

/// Keyed access to suites, checks and runs.
pub trait QualityStore: Send + Sync {
    fn create_suite(&self, suite: &Suite) -> Result<()>;
    fn get_suite(&self, id: &str) -> Result<Suite>;
    fn list_suites(&self) -> Result<Vec<String>>;
    fn delete_suite(&self, id: &str) -> Result<()>;

    fn create_check(&self, check: &Check) -> Result<()>;
    fn get_check(&self, id: &str) -> Result<Check>;
    fn list_checks(&self) -> Result<Vec<String>>;
    fn delete_check(&self, id: &str) -> Result<()>;

    fn create_run(&self, run: &Run) -> Result<()>;
    fn get_run(&self, id: &str) -> Result<Run>;
    fn list_runs(&self) -> Result<Vec<String>>;
    fn delete_run(&self, id: &str) -> Result<()>;
}

/// One keyed table guarded by a lock.
struct Table<T> {
    kind: &'static str,
    rows: RwLock<IndexMap<String, T>>,
}

impl<T: Clone> Table<T> {
    fn new(kind: &'static str) -> Self {
        Self {
            kind,
            rows: RwLock::new(IndexMap::new()),
        }
    }

    fn poisoned(&self) -> MdqError {
        MdqError::Store(format!("{} table lock poisoned", self.kind))
    }

    fn insert(&self, id: &str, row: T) -> Result<()> {
        if id.trim().is_empty() {
            return Err(MdqError::validation(format!("{} id must not be empty", self.kind)));
        }
        let mut rows = self.rows.write().map_err(|_| self.poisoned())?;
        if rows.contains_key(id) {
            return Err(MdqError::Store(format!("{} '{id}' already exists", self.kind)));
        }
        rows.insert(id.to_string(), row);
        Ok(())
    }

    fn get(&self, id: &str) -> Result<T> {
        let rows = self.rows.read().map_err(|_| self.poisoned())?;
        rows.get(id)
            .cloned()
            .ok_or_else(|| MdqError::not_found(self.kind, id))
    }

    fn ids(&self) -> Result<Vec<String>> {
        let rows = self.rows.read().map_err(|_| self.poisoned())?;
        Ok(rows.keys().cloned().collect())
    }

    fn remove(&self, id: &str) -> Result<()> {
        let mut rows = self.rows.write().map_err(|_| self.poisoned())?;
        rows.shift_remove(id)
            .map(|_| ())
            .ok_or_else(|| MdqError::not_found(self.kind, id))
    }
}

/// Thread-safe in-process store.
pub struct InMemoryStore {
    suites: Table<Suite>,
    checks: Table<Check>,
    runs: Table<Run>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            suites: Table::new("suite"),
            checks: Table::new("check"),
            runs: Table::new("run"),
        }
    }

    /// Store with the given checks available for reference resolution.
    pub fn with_checks(checks: impl IntoIterator<Item = Check>) -> Result<Self> {
        let store = Self::new();
        for check in checks {
            store.create_check(&check)?;
        }
        Ok(store)
    }
}

impl std::fmt::Debug for InMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryStore")
            .field("suites", &self.suites.ids().map(|v| v.len()).unwrap_or(0))
            .field("checks", &self.checks.ids().map(|v| v.len()).unwrap_or(0))
            .field("runs", &self.runs.ids().map(|v| v.len()).unwrap_or(0))
            .finish()
    }
}

impl QualityStore for InMemoryStore {
    fn create_suite(&self, suite: &Suite) -> Result<()> {
        self.suites.insert(&suite.id, suite.clone())
    }

    fn get_suite(&self, id: &str) -> Result<Suite> {
        self.suites.get(id)
    }

    fn list_suites(&self) -> Result<Vec<String>> {
        self.suites.ids()
    }

    fn delete_suite(&self, id: &str) -> Result<()> {
        self.suites.remove(id)
    }

    fn create_check(&self, check: &Check) -> Result<()> {
        self.checks.insert(&check.id, check.clone())
    }

    fn get_check(&self, id: &str) -> Result<Check> {
        self.checks.get(id)
    }

    fn list_checks(&self) -> Result<Vec<String>> {
        self.checks.ids()
    }

    fn delete_check(&self, id: &str) -> Result<()> {
        self.checks.remove(id)
    }

    fn create_run(&self, run: &Run) -> Result<()> {
        self.runs.insert(&run.id, run.clone())
    }

    fn get_run(&self, id: &str) -> Result<Run> {
        self.runs.get(id)
    }

    fn list_runs(&self) -> Result<Vec<String>> {
        self.runs.ids()
    }

    fn delete_run(&self, id: &str) -> Result<()> {
        self.runs.remove(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_crud_round_trip() {
        let store = InMemoryStore::new();
        let suite = Suite::new("suite.1", "Basic").with_check(Check::new("check.1").code("TRUE"));
        store.create_suite(&suite).unwrap();
        assert_eq!(store.get_suite("suite.1").unwrap(), suite);
        assert_eq!(store.list_suites().unwrap(), vec!["suite.1".to_string()]);

        store.delete_suite("suite.1").unwrap();
        assert!(matches!(
            store.get_suite("suite.1"),
            Err(MdqError::EntryNotFound { .. })
        ));
        assert!(store.delete_suite("suite.1").is_err());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let store = InMemoryStore::with_checks([Check::new("check.shared").code("TRUE")]).unwrap();
        let err = store.create_check(&Check::new("check.shared")).unwrap_err();
        assert!(matches!(err, MdqError::Store(_)));
        assert!(store.create_check(&Check::new(" ")).is_err());
    }

    #[test]
    fn test_runs_keep_insertion_order() {
        let store = InMemoryStore::new();
        let runs: Vec<Run> = (0..3).map(|i| Run::new(format!("obj.{i}"), "suite")).collect();
        for run in &runs {
            store.create_run(run).unwrap();
        }
        let ids: Vec<String> = runs.iter().map(|r| r.id.clone()).collect();
        assert_eq!(store.list_runs().unwrap(), ids);
        assert_eq!(store.get_run(&ids[1]).unwrap().object_identifier, "obj.1");
    }

    #[test]
    fn test_concurrent_writers() {
        let store = Arc::new(InMemoryStore::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || store.create_check(&Check::new(format!("check.{i}"))))
            })
            .collect();
        for handle in handles {
            handle.join().unwrap().unwrap();
        }
        assert_eq!(store.list_checks().unwrap().len(), 8);
    }
}
