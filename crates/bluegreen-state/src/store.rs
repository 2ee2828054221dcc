//! StateStore — redb-backed persistence for the local cluster backend.
//!
//! Provides typed operations over deployment records, main service
//! selectors, and the switch history. Supports both on-disk and in-memory
//! backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use bluegreen_core::{DeploymentRecord, Environment, SelectorState, SwitchRecord, epoch_secs};

use crate::error::{StateError, StateResult};
use crate::tables::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Revision reported for a selector that was never written.
const INITIAL_REVISION: u64 = 0;

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        txn.open_table(SELECTORS).map_err(map_err!(Table))?;
        txn.open_table(SWITCHES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Deployments ────────────────────────────────────────────────

    /// Insert or replace the deployment record stored under `name`.
    pub fn put_deployment(&self, name: &str, record: &DeploymentRecord) -> StateResult<()> {
        let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
            table
                .insert(name, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%name, image = %record.image, replicas = record.replicas, "deployment stored");
        Ok(())
    }

    /// Get a deployment record by resource name.
    pub fn get_deployment(&self, name: &str) -> StateResult<Option<DeploymentRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
        match table.get(name).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: DeploymentRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// Apply `update` to an existing record inside one write transaction
    /// and return the stored result.
    pub fn update_deployment<F>(&self, name: &str, update: F) -> StateResult<DeploymentRecord>
    where
        F: FnOnce(&mut DeploymentRecord),
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let record = {
            let mut table = txn.open_table(DEPLOYMENTS).map_err(map_err!(Table))?;
            let mut record: DeploymentRecord = match table.get(name).map_err(map_err!(Read))? {
                Some(guard) => {
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?
                }
                None => return Err(StateError::NotFound(format!("deployment {name}"))),
            };
            update(&mut record);
            record.updated_at = epoch_secs();
            let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
            table
                .insert(name, value.as_slice())
                .map_err(map_err!(Write))?;
            record
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(
            %name,
            replicas = record.replicas,
            ready = record.ready_replicas,
            "deployment updated"
        );
        Ok(record)
    }

    // ── Selectors ──────────────────────────────────────────────────

    /// Read a service's environment selector. A service that was never
    /// switched reports no active environment at the initial revision.
    pub fn get_selector(&self, service: &str) -> StateResult<SelectorState> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SELECTORS).map_err(map_err!(Table))?;
        match table.get(service).map_err(map_err!(Read))? {
            Some(guard) => {
                serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))
            }
            None => Ok(SelectorState {
                active: None,
                revision: INITIAL_REVISION.to_string(),
            }),
        }
    }

    /// Point a service's selector at `target`, provided its revision is
    /// still `expected_revision`. Records the switch in the history.
    pub fn swap_selector(
        &self,
        service: &str,
        expected_revision: &str,
        target: Environment,
    ) -> StateResult<SelectorState> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let next = {
            let mut selectors = txn.open_table(SELECTORS).map_err(map_err!(Table))?;
            let current: SelectorState = match selectors.get(service).map_err(map_err!(Read))? {
                Some(guard) => {
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?
                }
                None => SelectorState {
                    active: None,
                    revision: INITIAL_REVISION.to_string(),
                },
            };

            if current.revision != expected_revision {
                // Dropping the transaction without commit aborts it.
                return Err(StateError::Conflict {
                    service: service.to_string(),
                    expected: expected_revision.to_string(),
                    actual: current.revision,
                });
            }

            let revision = current
                .revision
                .parse::<u64>()
                .map_err(map_err!(Deserialize))?
                + 1;
            let next = SelectorState {
                active: Some(target),
                revision: revision.to_string(),
            };
            let value = serde_json::to_vec(&next).map_err(map_err!(Serialize))?;
            selectors
                .insert(service, value.as_slice())
                .map_err(map_err!(Write))?;

            let record = SwitchRecord {
                from: current.active,
                to: target,
                revision: next.revision.clone(),
                switched_at: epoch_secs(),
            };
            let key = format!("{service}:{revision:020}");
            let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
            let mut switches = txn.open_table(SWITCHES).map_err(map_err!(Table))?;
            switches
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;

            next
        };
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%service, %target, revision = %next.revision, "selector swapped");
        Ok(next)
    }

    // ── Switch history ─────────────────────────────────────────────

    /// The last `limit` switches of a service, oldest first.
    pub fn list_switches(&self, service: &str, limit: usize) -> StateResult<Vec<SwitchRecord>> {
        let prefix = format!("{service}:");
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(SWITCHES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(&prefix) {
                let record: SwitchRecord =
                    serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
                results.push(record);
            }
        }
        // Keys sort by zero-padded revision.
        let skip = results.len().saturating_sub(limit);
        results.drain(..skip);
        Ok(results)
    }
}
