use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod ingest;

#[derive(Debug, Parser)]
#[command(name = "ratings_worker")]
struct Args {
    /// Fetch and validate every page but do not write to the database.
    #[arg(long)]
    dry_run: bool,

    /// Stop after this many source pages. Defaults to INGEST_MAX_PAGES, then 1000.
    #[arg(long)]
    max_pages: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = ratings_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let args = Args::parse();

    let mut opts = ratings_core::ingest::pipeline::IngestOptions::from_env();
    if let Some(max_pages) = args.max_pages {
        opts.max_pages = max_pages.max(1);
    }

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("ctrl-c received; cancelling ingestion");
                cancel.cancel();
            }
        }
    });

    let res = if args.dry_run {
        ingest::dry_run(&settings, &opts, &cancel).await
    } else {
        ingest::run(&settings, &opts, &cancel).await
    };

    if let Err(err) = &res {
        sentry_anyhow::capture_anyhow(err);
        let message = format!("{err:#}");
        tracing::error!(error = %message, "ingestion run failed");
    }
    res
}

fn init_sentry(settings: &ratings_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
