use crate::domain::recommendation::NewRecommendation;
use crate::error::PersistenceError;
use anyhow::Context;
use uuid::Uuid;

pub mod entities;
pub mod queries;
pub mod recommendations;

#[cfg(test)]
pub(crate) mod memory;

pub async fn migrate(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("sqlx migrations failed")?;
    Ok(())
}

/// Storage that can open a write unit-of-work for one ingestion batch.
#[async_trait::async_trait]
pub trait RecommendationStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, PersistenceError>;
}

/// Writes made through a unit-of-work become durable together on [`UnitOfWork::commit`].
/// Dropping it without committing discards everything.
///
/// The savepoint methods scope the writes of a single record so one failing record can be
/// undone without abandoning the rest of the batch.
#[async_trait::async_trait]
pub trait UnitOfWork: Send {
    async fn savepoint(&mut self) -> Result<(), PersistenceError>;
    async fn release_savepoint(&mut self) -> Result<(), PersistenceError>;
    async fn rollback_to_savepoint(&mut self) -> Result<(), PersistenceError>;

    async fn resolve_company(&mut self, ticker: &str, name: &str)
        -> Result<Uuid, PersistenceError>;
    async fn resolve_brokerage(&mut self, name: &str) -> Result<Uuid, PersistenceError>;
    async fn insert_recommendation(
        &mut self,
        row: &NewRecommendation,
    ) -> Result<Uuid, PersistenceError>;

    async fn commit(self: Box<Self>) -> Result<(), PersistenceError>;
}

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: sqlx::PgPool,
}

impl PgStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &sqlx::PgPool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl RecommendationStore for PgStore {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>, PersistenceError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(PersistenceError::database("begin transaction"))?;
        Ok(Box::new(PgUnitOfWork { tx }))
    }
}

struct PgUnitOfWork {
    tx: sqlx::Transaction<'static, sqlx::Postgres>,
}

const RECORD_SAVEPOINT: &str = "ingest_record";

#[async_trait::async_trait]
impl UnitOfWork for PgUnitOfWork {
    async fn savepoint(&mut self) -> Result<(), PersistenceError> {
        sqlx::query(&format!("SAVEPOINT {RECORD_SAVEPOINT}"))
            .execute(&mut *self.tx)
            .await
            .map_err(PersistenceError::database("create savepoint"))?;
        Ok(())
    }

    async fn release_savepoint(&mut self) -> Result<(), PersistenceError> {
        sqlx::query(&format!("RELEASE SAVEPOINT {RECORD_SAVEPOINT}"))
            .execute(&mut *self.tx)
            .await
            .map_err(PersistenceError::database("release savepoint"))?;
        Ok(())
    }

    async fn rollback_to_savepoint(&mut self) -> Result<(), PersistenceError> {
        sqlx::query(&format!("ROLLBACK TO SAVEPOINT {RECORD_SAVEPOINT}"))
            .execute(&mut *self.tx)
            .await
            .map_err(PersistenceError::database("rollback to savepoint"))?;
        Ok(())
    }

    async fn resolve_company(
        &mut self,
        ticker: &str,
        name: &str,
    ) -> Result<Uuid, PersistenceError> {
        entities::resolve_company(&mut self.tx, ticker, name).await
    }

    async fn resolve_brokerage(&mut self, name: &str) -> Result<Uuid, PersistenceError> {
        entities::resolve_brokerage(&mut self.tx, name).await
    }

    async fn insert_recommendation(
        &mut self,
        row: &NewRecommendation,
    ) -> Result<Uuid, PersistenceError> {
        recommendations::insert_recommendation(&mut self.tx, row).await
    }

    async fn commit(self: Box<Self>) -> Result<(), PersistenceError> {
        self.tx
            .commit()
            .await
            .map_err(PersistenceError::database("commit transaction"))
    }
}
