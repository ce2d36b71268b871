use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Company {
    pub id: Uuid,
    pub ticker: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Brokerage {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub id: Uuid,
    pub company: Company,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brokerage: Option<Brokerage>,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub target_from: Option<Decimal>,
    #[serde(with = "rust_decimal::serde::float_option")]
    pub target_to: Option<Decimal>,
    pub rating_from: String,
    pub rating_to: String,
    pub action: String,
    pub time: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One remote record that passed validation. Targets are still the raw tokens from the
/// source (e.g. `"$12.50"`); they are parsed when the row is written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedRecord {
    pub ticker: String,
    pub company: String,
    pub brokerage: String,
    pub action: String,
    pub rating_from: String,
    pub rating_to: String,
    pub target_from: String,
    pub target_to: String,
    pub time: DateTime<Utc>,
}

/// Row written to `analyst_recommendation` once company and brokerage are resolved.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRecommendation {
    pub company_id: Uuid,
    pub brokerage_id: Option<Uuid>,
    pub target_from: Option<Decimal>,
    pub target_to: Option<Decimal>,
    pub rating_from: String,
    pub rating_to: String,
    pub action: String,
    pub time: DateTime<Utc>,
}
