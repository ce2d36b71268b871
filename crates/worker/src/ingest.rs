use anyhow::Context;
use ratings_core::config::Settings;
use ratings_core::error::IngestError;
use ratings_core::ingest::pipeline::{collect_records, run_ingestion, IngestOptions};
use ratings_core::ingest::provider::HttpPageClient;
use ratings_core::storage::PgStore;
use tokio_util::sync::CancellationToken;

/// Full run: page through the source and persist the validated batch.
pub async fn run(
    settings: &Settings,
    opts: &IngestOptions,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let source = HttpPageClient::from_settings(settings)?;
    let db_url = settings.require_database_url()?;

    // Fail on connection or schema problems before spending time on the source.
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(settings.db_max_connections)
        .connect(&db_url)
        .await
        .context("connect DATABASE_URL failed")?;

    ratings_core::storage::migrate(&pool).await?;

    let store = PgStore::new(pool);
    match run_ingestion(&source, &store, opts, cancel).await {
        Ok(summary) => {
            tracing::info!(
                pages = summary.pages,
                fetched = summary.fetched,
                validated = summary.validated,
                rejected = summary.rejected,
                persisted = summary.persisted,
                failed = summary.failed,
                "ingestion run complete"
            );
            Ok(())
        }
        Err(IngestError::Cancelled) => {
            tracing::warn!("ingestion cancelled; nothing was committed");
            Ok(())
        }
        Err(err) => Err(err).context("ingestion run aborted"),
    }
}

/// Fetch and validate only; the database is never touched.
pub async fn dry_run(
    settings: &Settings,
    opts: &IngestOptions,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let source = HttpPageClient::from_settings(settings)?;

    match collect_records(&source, opts, cancel).await {
        Ok(collected) => {
            tracing::info!(
                dry_run = true,
                pages = collected.pages,
                fetched = collected.fetched,
                validated = collected.records.len(),
                rejected = collected.rejected,
                "ingestion dry run complete"
            );
            Ok(())
        }
        Err(IngestError::Cancelled) => {
            tracing::warn!(dry_run = true, "ingestion cancelled");
            Ok(())
        }
        Err(err) => Err(err).context("ingestion dry run aborted"),
    }
}
