//! In-memory [`RecommendationStore`] for exercising the batch and pipeline logic without a
//! database. Commit copies the working state into the shared state; savepoints are snapshots.

use crate::domain::recommendation::NewRecommendation;
use crate::error::PersistenceError;
use crate::storage::{RecommendationStore, UnitOfWork};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub(crate) struct StoredCompany {
    pub id: Uuid,
    pub ticker: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub(crate) struct StoredBrokerage {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct MemoryState {
    pub companies: Vec<StoredCompany>,
    pub brokerages: Vec<StoredBrokerage>,
    pub recommendations: Vec<NewRecommendation>,
    pub commits: usize,
}

#[derive(Debug, Default)]
pub(crate) struct MemoryStore {
    shared: Arc<Mutex<MemoryState>>,
    failing_brokerages: HashSet<String>,
    fail_commit: bool,
}

impl MemoryStore {
    pub fn fail_brokerage(mut self, name: &str) -> Self {
        self.failing_brokerages.insert(name.to_string());
        self
    }

    pub fn fail_commit(mut self) -> Self {
        self.fail_commit = true;
        self
    }

    pub fn snapshot(&self) -> MemoryState {
        self.shared.lock().unwrap().clone()
    }
}

fn injected_failure(what: &'static str) -> PersistenceError {
    PersistenceError::Database {
        context: what,
        source: sqlx::Error::Protocol(format!("injected failure: {what}")),
    }
}

#[async_trait::async_trait]
impl RecommendationStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, PersistenceError> {
        let working = self.shared.lock().unwrap().clone();
        Ok(Box::new(MemoryUnitOfWork {
            shared: Arc::clone(&self.shared),
            working,
            savepoint: None,
            failing_brokerages: self.failing_brokerages.clone(),
            fail_commit: self.fail_commit,
        }))
    }
}

struct MemoryUnitOfWork {
    shared: Arc<Mutex<MemoryState>>,
    working: MemoryState,
    savepoint: Option<MemoryState>,
    failing_brokerages: HashSet<String>,
    fail_commit: bool,
}

#[async_trait::async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    async fn savepoint(&mut self) -> Result<(), PersistenceError> {
        self.savepoint = Some(self.working.clone());
        Ok(())
    }

    async fn release_savepoint(&mut self) -> Result<(), PersistenceError> {
        self.savepoint = None;
        Ok(())
    }

    async fn rollback_to_savepoint(&mut self) -> Result<(), PersistenceError> {
        if let Some(saved) = self.savepoint.take() {
            self.working = saved;
        }
        Ok(())
    }

    async fn resolve_company(
        &mut self,
        ticker: &str,
        name: &str,
    ) -> Result<Uuid, PersistenceError> {
        if let Some(c) = self.working.companies.iter().find(|c| c.ticker == ticker) {
            return Ok(c.id);
        }
        let id = Uuid::new_v4();
        self.working.companies.push(StoredCompany {
            id,
            ticker: ticker.to_string(),
            name: name.to_string(),
        });
        Ok(id)
    }

    async fn resolve_brokerage(&mut self, name: &str) -> Result<Uuid, PersistenceError> {
        if self.failing_brokerages.contains(name) {
            return Err(injected_failure("upsert brokerage"));
        }
        if let Some(b) = self.working.brokerages.iter().find(|b| b.name == name) {
            return Ok(b.id);
        }
        let id = Uuid::new_v4();
        self.working.brokerages.push(StoredBrokerage {
            id,
            name: name.to_string(),
        });
        Ok(id)
    }

    async fn insert_recommendation(
        &mut self,
        row: &NewRecommendation,
    ) -> Result<Uuid, PersistenceError> {
        self.working.recommendations.push(row.clone());
        Ok(Uuid::new_v4())
    }

    async fn commit(self: Box<Self>) -> Result<(), PersistenceError> {
        let this = *self;
        if this.fail_commit {
            return Err(injected_failure("commit transaction"));
        }
        let mut shared = this.shared.lock().unwrap();
        *shared = this.working;
        shared.commits += 1;
        Ok(())
    }
}
