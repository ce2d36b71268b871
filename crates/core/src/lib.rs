pub mod domain;
pub mod error;
pub mod ingest;
pub mod storage;

pub mod config {
    use anyhow::Context;

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub database_url: Option<String>,
        pub database_user: Option<String>,
        pub database_password: Option<String>,
        pub database_sslmode: Option<String>,
        pub db_max_connections: u32,
        pub sentry_dsn: Option<String>,
        pub source_api_url: Option<String>,
        pub source_bearer_token: Option<String>,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            let db_max_connections = match std::env::var("DB_MAX_CONNECTIONS") {
                Ok(s) => s
                    .parse::<u32>()
                    .with_context(|| format!("DB_MAX_CONNECTIONS must be a number (got {s})"))?,
                Err(_) => 5,
            };

            Ok(Self {
                database_url: non_empty_var("DATABASE_URL"),
                database_user: non_empty_var("DATABASE_USER"),
                database_password: non_empty_var("DATABASE_PASSWORD"),
                database_sslmode: non_empty_var("DATABASE_SSLMODE"),
                db_max_connections,
                sentry_dsn: non_empty_var("SENTRY_DSN"),
                source_api_url: non_empty_var("SOURCE_API_URL").or_else(|| non_empty_var("API_URL")),
                source_bearer_token: non_empty_var("SOURCE_BEARER_TOKEN")
                    .or_else(|| non_empty_var("BEARER_TOKEN")),
            })
        }

        /// Connection string for Postgres.
        ///
        /// A full `postgres://` URL in `DATABASE_URL` is used as-is. Otherwise `DATABASE_URL`
        /// is treated as the host part (`@host:port/db`) and combined with `DATABASE_USER`,
        /// `DATABASE_PASSWORD` and `DATABASE_SSLMODE`.
        pub fn require_database_url(&self) -> anyhow::Result<String> {
            let url = self
                .database_url
                .as_deref()
                .context("DATABASE_URL is required")?;

            if url.starts_with("postgres://") || url.starts_with("postgresql://") {
                return Ok(url.to_string());
            }

            let user = self
                .database_user
                .as_deref()
                .context("DATABASE_USER is required when DATABASE_URL is a host part")?;
            let password = self.database_password.as_deref().unwrap_or_default();
            let sslmode = self.database_sslmode.as_deref().unwrap_or("verify-full");
            Ok(build_dsn(user, password, url, sslmode))
        }

        pub fn require_source_api_url(&self) -> anyhow::Result<&str> {
            self.source_api_url
                .as_deref()
                .context("SOURCE_API_URL is required")
        }

        pub fn require_source_bearer_token(&self) -> anyhow::Result<&str> {
            self.source_bearer_token
                .as_deref()
                .context("SOURCE_BEARER_TOKEN is required")
        }
    }

    /// Credentials are percent-encoded so `@`, `/` or `:` in a password survive.
    pub fn build_dsn(user: &str, password: &str, host_part: &str, sslmode: &str) -> String {
        format!(
            "postgresql://{}:{}{host_part}?sslmode={sslmode}",
            urlencoding::encode(user),
            urlencoding::encode(password)
        )
    }

    fn non_empty_var(key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|s| !s.trim().is_empty())
    }

}
