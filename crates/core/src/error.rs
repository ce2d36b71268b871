use thiserror::Error;

/// Failure talking to the remote rating source. The page client swallows these and reports
/// "no more data", so they never leave the ingest module.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("source request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("source HTTP {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("source response is not a valid page: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid bearer token header value")]
    InvalidHeader(#[from] reqwest::header::InvalidHeaderValue),
}

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("missing or unparseable time: item is not a JSON object")]
    NotAnObject,
    #[error("missing or unparseable time: time is missing")]
    MissingTime,
    #[error("missing or unparseable time: {raw:?}")]
    UnparseableTime {
        raw: String,
        #[source]
        source: chrono::ParseError,
    },
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("{context} failed")]
    Database {
        context: &'static str,
        #[source]
        source: sqlx::Error,
    },
}

impl PersistenceError {
    pub fn database(context: &'static str) -> impl FnOnce(sqlx::Error) -> Self {
        move |source| Self::Database { context, source }
    }
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("ingestion cancelled")]
    Cancelled,
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}
