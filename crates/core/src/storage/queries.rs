//! Filtered, paginated reads over `analyst_recommendation`.
//!
//! The count and the page are two reads on the same pooled connection, not one transaction.
//! Both use the predicate built by [`RecommendationFilter::push_predicate`], so with no
//! concurrent writers `total` is exactly the number of rows the filter matches. Rows inserted
//! between the two reads can make them disagree by that many rows.

use crate::domain::recommendation::{Brokerage, Company, Recommendation};
use crate::error::PersistenceError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{Postgres, QueryBuilder};
use uuid::Uuid;

pub const DEFAULT_LIMIT: i64 = 50;

const FROM_JOINED: &str = " FROM analyst_recommendation ar \
     JOIN company c ON ar.company_id = c.id \
     LEFT JOIN brokerage b ON ar.brokerage_id = b.id";

const SELECT_COLUMNS: &str = "SELECT \
     ar.id, ar.target_from, ar.target_to, ar.rating_from, ar.rating_to, \
     ar.action, ar.time, ar.created_at, ar.updated_at, \
     c.id AS company_id, c.ticker AS company_ticker, c.name AS company_name, \
     c.created_at AS company_created_at, c.updated_at AS company_updated_at, \
     b.id AS brokerage_id, b.name AS brokerage_name, \
     b.created_at AS brokerage_created_at, b.updated_at AS brokerage_updated_at";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecommendationFilter {
    pub ticker: Option<String>,
    pub brokerage_id: Option<Uuid>,
}

impl RecommendationFilter {
    /// Appends the WHERE clause for this filter; filters combine with AND.
    pub fn push_predicate(&self, qb: &mut QueryBuilder<'_, Postgres>) {
        let mut keyword = " WHERE ";
        if let Some(ticker) = &self.ticker {
            qb.push(keyword).push("c.ticker = ").push_bind(ticker.clone());
            keyword = " AND ";
        }
        if let Some(brokerage_id) = self.brokerage_id {
            qb.push(keyword)
                .push("ar.brokerage_id = ")
                .push_bind(brokerage_id);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub limit: i64,
    pub offset: i64,
}

impl PageRequest {
    /// Missing limit means [`DEFAULT_LIMIT`]; limit is clamped into `1..=max_limit` and
    /// offset to non-negative.
    pub fn clamped(limit: Option<i64>, offset: Option<i64>, max_limit: i64) -> Self {
        let max_limit = max_limit.max(1);
        Self {
            limit: limit.unwrap_or(DEFAULT_LIMIT).clamp(1, max_limit),
            offset: offset.unwrap_or(0).max(0),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecommendationPage {
    pub items: Vec<Recommendation>,
    pub total: i64,
}

#[derive(Debug, sqlx::FromRow)]
struct RecommendationRow {
    id: Uuid,
    target_from: Option<Decimal>,
    target_to: Option<Decimal>,
    rating_from: String,
    rating_to: String,
    action: String,
    time: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    company_id: Uuid,
    company_ticker: String,
    company_name: String,
    company_created_at: DateTime<Utc>,
    company_updated_at: DateTime<Utc>,
    brokerage_id: Option<Uuid>,
    brokerage_name: Option<String>,
    brokerage_created_at: Option<DateTime<Utc>>,
    brokerage_updated_at: Option<DateTime<Utc>>,
}

impl From<RecommendationRow> for Recommendation {
    fn from(row: RecommendationRow) -> Self {
        let brokerage = match (
            row.brokerage_id,
            row.brokerage_name,
            row.brokerage_created_at,
            row.brokerage_updated_at,
        ) {
            (Some(id), Some(name), Some(created_at), Some(updated_at)) => Some(Brokerage {
                id,
                name,
                created_at,
                updated_at,
            }),
            _ => None,
        };

        Recommendation {
            id: row.id,
            company: Company {
                id: row.company_id,
                ticker: row.company_ticker,
                name: row.company_name,
                created_at: row.company_created_at,
                updated_at: row.company_updated_at,
            },
            brokerage,
            target_from: row.target_from,
            target_to: row.target_to,
            rating_from: row.rating_from,
            rating_to: row.rating_to,
            action: row.action,
            time: row.time,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

fn count_query(filter: &RecommendationFilter) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new("SELECT COUNT(*)");
    qb.push(FROM_JOINED);
    filter.push_predicate(&mut qb);
    qb
}

fn page_query(filter: &RecommendationFilter, page: PageRequest) -> QueryBuilder<'static, Postgres> {
    let mut qb = QueryBuilder::new(SELECT_COLUMNS);
    qb.push(FROM_JOINED);
    filter.push_predicate(&mut qb);
    qb.push(" ORDER BY ar.time DESC, ar.id DESC LIMIT ")
        .push_bind(page.limit)
        .push(" OFFSET ")
        .push_bind(page.offset);
    qb
}

pub async fn query_recommendations(
    pool: &sqlx::PgPool,
    page: PageRequest,
    filter: &RecommendationFilter,
) -> Result<RecommendationPage, PersistenceError> {
    let mut conn = pool
        .acquire()
        .await
        .map_err(PersistenceError::database("acquire connection"))?;

    let total: i64 = count_query(filter)
        .build_query_scalar()
        .fetch_one(&mut *conn)
        .await
        .map_err(PersistenceError::database("count recommendations"))?;

    let rows: Vec<RecommendationRow> = page_query(filter, page)
        .build_query_as()
        .fetch_all(&mut *conn)
        .await
        .map_err(PersistenceError::database("select recommendations"))?;

    tracing::debug!(
        ticker = filter.ticker.as_deref().unwrap_or_default(),
        brokerage_id = ?filter.brokerage_id,
        limit = page.limit,
        offset = page.offset,
        total,
        returned = rows.len(),
        "recommendations queried"
    );

    Ok(RecommendationPage {
        items: rows.into_iter().map(Recommendation::from).collect(),
        total,
    })
}
