use crate::domain::recommendation::{NewRecommendation, ValidatedRecord};
use crate::error::{IngestError, PersistenceError};
use crate::storage::{RecommendationStore, UnitOfWork};
use rust_decimal::Decimal;
use sqlx::PgConnection;
use std::str::FromStr;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub attempted: usize,
    pub persisted: usize,
    pub failed: usize,
}

/// Writes `records` in one unit-of-work.
///
/// A record whose resolution or insert fails is rolled back to its savepoint, logged and
/// skipped; the batch is committed at the end however many records failed. Only failing to
/// begin, to manage savepoints or to commit aborts the call, and then nothing is written.
pub async fn persist_batch(
    store: &dyn RecommendationStore,
    records: &[ValidatedRecord],
    cancel: &CancellationToken,
) -> Result<BatchOutcome, IngestError> {
    let mut uow = store.begin().await?;
    let mut outcome = BatchOutcome {
        attempted: records.len(),
        ..BatchOutcome::default()
    };

    for (idx, record) in records.iter().enumerate() {
        if cancel.is_cancelled() {
            tracing::warn!(
                idx,
                persisted = outcome.persisted,
                "batch cancelled; discarding unit of work"
            );
            return Err(IngestError::Cancelled);
        }

        uow.savepoint().await?;
        match insert_record(uow.as_mut(), record).await {
            Ok(id) => {
                uow.release_savepoint().await?;
                outcome.persisted += 1;
                tracing::trace!(idx, %id, ticker = %record.ticker, "recommendation inserted");
            }
            Err(err) => {
                uow.rollback_to_savepoint().await?;
                outcome.failed += 1;
                tracing::warn!(
                    idx,
                    ticker = %record.ticker,
                    brokerage = %record.brokerage,
                    error = %err,
                    "failed to persist recommendation; skipping record"
                );
            }
        }
    }

    uow.commit().await?;

    tracing::info!(
        attempted = outcome.attempted,
        persisted = outcome.persisted,
        failed = outcome.failed,
        "recommendation batch committed"
    );
    Ok(outcome)
}

async fn insert_record(
    uow: &mut dyn UnitOfWork,
    record: &ValidatedRecord,
) -> Result<Uuid, PersistenceError> {
    let company_id = uow.resolve_company(&record.ticker, &record.company).await?;

    let brokerage_id = if record.brokerage.is_empty() {
        None
    } else {
        Some(uow.resolve_brokerage(&record.brokerage).await?)
    };

    let row = NewRecommendation {
        company_id,
        brokerage_id,
        target_from: parse_target_price(&record.target_from),
        target_to: parse_target_price(&record.target_to),
        rating_from: record.rating_from.clone(),
        rating_to: record.rating_to.clone(),
        action: record.action.clone(),
        time: record.time,
    };

    uow.insert_recommendation(&row).await
}

pub async fn insert_recommendation(
    conn: &mut PgConnection,
    row: &NewRecommendation,
) -> Result<Uuid, PersistenceError> {
    sqlx::query_scalar(
        "INSERT INTO analyst_recommendation \
         (company_id, brokerage_id, target_from, target_to, rating_from, rating_to, action, time) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
         RETURNING id",
    )
    .bind(row.company_id)
    .bind(row.brokerage_id)
    .bind(row.target_from)
    .bind(row.target_to)
    .bind(&row.rating_from)
    .bind(&row.rating_to)
    .bind(&row.action)
    .bind(row.time)
    .fetch_one(&mut *conn)
    .await
    .map_err(PersistenceError::database("insert analyst_recommendation"))
}

/// Parses a price token like `"$12.50"` or `"$1,250.00"`.
///
/// Empty, zero (the source's `"$0.00"` placeholder), negative and malformed tokens are all
/// "no target"; parse failures are never surfaced.
pub fn parse_target_price(token: &str) -> Option<Decimal> {
    let digits: String = token
        .trim()
        .trim_start_matches('$')
        .chars()
        .filter(|c| *c != ',')
        .collect();
    if digits.is_empty() {
        return None;
    }

    let amount = Decimal::from_str(digits.trim()).ok()?;
    if amount.is_zero() || amount.is_sign_negative() {
        return None;
    }
    Some(amount)
}
