use crate::domain::recommendation::{Brokerage, Company};
use crate::error::PersistenceError;
use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use uuid::Uuid;

/// Returns the id of the company with `ticker`, creating it if needed.
///
/// The insert path is itself an upsert, so a concurrent writer that creates the same ticker
/// between our lookup and our insert still leaves exactly one row; its display name is
/// refreshed to `name`.
pub async fn resolve_company(
    conn: &mut PgConnection,
    ticker: &str,
    name: &str,
) -> Result<Uuid, PersistenceError> {
    let existing: Option<Uuid> = sqlx::query_scalar("SELECT id FROM company WHERE ticker = $1")
        .bind(ticker)
        .fetch_optional(&mut *conn)
        .await
        .map_err(PersistenceError::database("select company by ticker"))?;

    if let Some(id) = existing {
        return Ok(id);
    }

    sqlx::query_scalar(
        "INSERT INTO company (ticker, name) \
         VALUES ($1, $2) \
         ON CONFLICT (ticker) DO UPDATE SET name = EXCLUDED.name, updated_at = now() \
         RETURNING id",
    )
    .bind(ticker)
    .bind(name)
    .fetch_one(&mut *conn)
    .await
    .map_err(PersistenceError::database("upsert company"))
}

/// Brokerage counterpart of [`resolve_company`], keyed by name.
pub async fn resolve_brokerage(
    conn: &mut PgConnection,
    name: &str,
) -> Result<Uuid, PersistenceError> {
    let existing: Option<Uuid> = sqlx::query_scalar("SELECT id FROM brokerage WHERE name = $1")
        .bind(name)
        .fetch_optional(&mut *conn)
        .await
        .map_err(PersistenceError::database("select brokerage by name"))?;

    if let Some(id) = existing {
        return Ok(id);
    }

    // DO UPDATE (rather than DO NOTHING) so RETURNING yields the id on conflict too.
    sqlx::query_scalar(
        "INSERT INTO brokerage (name) \
         VALUES ($1) \
         ON CONFLICT (name) DO UPDATE SET updated_at = now() \
         RETURNING id",
    )
    .bind(name)
    .fetch_one(&mut *conn)
    .await
    .map_err(PersistenceError::database("upsert brokerage"))
}

type CompanyRow = (Uuid, String, String, DateTime<Utc>, DateTime<Utc>);
type BrokerageRow = (Uuid, String, DateTime<Utc>, DateTime<Utc>);

fn company_from_row((id, ticker, name, created_at, updated_at): CompanyRow) -> Company {
    Company {
        id,
        ticker,
        name,
        created_at,
        updated_at,
    }
}

pub async fn list_companies(pool: &sqlx::PgPool) -> Result<Vec<Company>, PersistenceError> {
    let rows = sqlx::query_as::<_, CompanyRow>(
        "SELECT id, ticker, name, created_at, updated_at \
         FROM company \
         ORDER BY ticker ASC",
    )
    .fetch_all(pool)
    .await
    .map_err(PersistenceError::database("list companies"))?;

    Ok(rows.into_iter().map(company_from_row).collect())
}

pub async fn company_by_ticker(
    pool: &sqlx::PgPool,
    ticker: &str,
) -> Result<Option<Company>, PersistenceError> {
    let row = sqlx::query_as::<_, CompanyRow>(
        "SELECT id, ticker, name, created_at, updated_at \
         FROM company \
         WHERE ticker = $1",
    )
    .bind(ticker)
    .fetch_optional(pool)
    .await
    .map_err(PersistenceError::database("select company by ticker"))?;

    Ok(row.map(company_from_row))
}

pub async fn list_brokerages(pool: &sqlx::PgPool) -> Result<Vec<Brokerage>, PersistenceError> {
    let rows = sqlx::query_as::<_, BrokerageRow>(
        "SELECT id, name, created_at, updated_at \
         FROM brokerage \
         ORDER BY name ASC",
    )
    .fetch_all(pool)
    .await
    .map_err(PersistenceError::database("list brokerages"))?;

    Ok(rows
        .into_iter()
        .map(|(id, name, created_at, updated_at)| Brokerage {
            id,
            name,
            created_at,
            updated_at,
        })
        .collect())
}
