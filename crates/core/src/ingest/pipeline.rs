use crate::domain::contract::transform;
use crate::domain::recommendation::ValidatedRecord;
use crate::error::IngestError;
use crate::ingest::provider::PageSource;
use crate::storage::recommendations::persist_batch;
use crate::storage::RecommendationStore;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_MAX_PAGES: usize = 1000;

// Rejects past this many are logged at debug instead of warn.
const MAX_LOGGED_REJECTS: usize = 10;

#[derive(Debug, Clone)]
pub struct IngestOptions {
    /// Upper bound on pages fetched in one run, in case the source never stops paging.
    pub max_pages: usize,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            max_pages: DEFAULT_MAX_PAGES,
        }
    }
}

impl IngestOptions {
    pub fn from_env() -> Self {
        let mut out = Self::default();
        if let Ok(s) = std::env::var("INGEST_MAX_PAGES") {
            if let Ok(n) = s.parse::<usize>() {
                out.max_pages = n.max(1);
            }
        }
        out
    }
}

/// Everything fetched and validated in one pass over the source.
#[derive(Debug, Clone, Default)]
pub struct Collected {
    pub records: Vec<ValidatedRecord>,
    pub pages: usize,
    pub fetched: usize,
    pub rejected: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub pages: usize,
    pub fetched: usize,
    pub validated: usize,
    pub rejected: usize,
    pub persisted: usize,
    pub failed: usize,
}

enum FetchState {
    Fetching { cursor: Option<String> },
    Done,
}

/// Pages through the source from the beginning and validates every item.
///
/// Stops when the source returns no next cursor (a transport failure reads the same way) or
/// after `max_pages`. Items that fail validation are logged and dropped.
pub async fn collect_records(
    source: &dyn PageSource,
    opts: &IngestOptions,
    cancel: &CancellationToken,
) -> Result<Collected, IngestError> {
    let mut out = Collected::default();
    let mut state = FetchState::Fetching { cursor: None };

    while let FetchState::Fetching { cursor } = state {
        if cancel.is_cancelled() {
            return Err(IngestError::Cancelled);
        }

        let page = tokio::select! {
            _ = cancel.cancelled() => return Err(IngestError::Cancelled),
            page = source.fetch_page(cursor.as_deref()) => page,
        };
        out.pages += 1;
        out.fetched += page.items.len();

        for item in page.items {
            match transform(item) {
                Ok(record) => out.records.push(record),
                Err(err) => {
                    out.rejected += 1;
                    if out.rejected <= MAX_LOGGED_REJECTS {
                        tracing::warn!(
                            page = out.pages,
                            rejected = out.rejected,
                            error = %err,
                            "dropping invalid source item"
                        );
                    } else {
                        tracing::debug!(
                            page = out.pages,
                            rejected = out.rejected,
                            error = %err,
                            "dropping invalid source item"
                        );
                    }
                }
            }
        }

        state = match page.next_cursor {
            Some(next) if out.pages < opts.max_pages => {
                tracing::info!(
                    page = out.pages,
                    fetched = out.fetched,
                    next_cursor = %next,
                    "fetched source page; continuing"
                );
                FetchState::Fetching { cursor: Some(next) }
            }
            Some(next) => {
                tracing::warn!(
                    max_pages = opts.max_pages,
                    next_cursor = %next,
                    "page limit reached; stopping before the source is exhausted"
                );
                FetchState::Done
            }
            None => FetchState::Done,
        };
    }

    tracing::info!(
        source = source.source_name(),
        pages = out.pages,
        fetched = out.fetched,
        validated = out.records.len(),
        rejected = out.rejected,
        "source exhausted"
    );
    Ok(out)
}

/// One full ingestion run: page through the source, then persist the whole validated batch
/// in a single unit-of-work.
pub async fn run_ingestion(
    source: &dyn PageSource,
    store: &dyn RecommendationStore,
    opts: &IngestOptions,
    cancel: &CancellationToken,
) -> Result<IngestSummary, IngestError> {
    let collected = collect_records(source, opts, cancel).await?;
    let batch = persist_batch(store, &collected.records, cancel).await?;

    Ok(IngestSummary {
        pages: collected.pages,
        fetched: collected.fetched,
        validated: collected.records.len(),
        rejected: collected.rejected,
        persisted: batch.persisted,
        failed: batch.failed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::contract::RawIngestItem;
    use crate::ingest::types::Page;
    use crate::storage::memory::MemoryStore;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::layer::{Context, SubscriberExt};
    use tracing_subscriber::Layer;

    /// Records the level of every "dropping invalid source item" event.
    #[derive(Clone, Default)]
    struct RejectLevels(Arc<Mutex<Vec<tracing::Level>>>);

    struct Message(String);

    impl tracing::field::Visit for Message {
        fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
            if field.name() == "message" {
                self.0 = format!("{value:?}");
            }
        }
    }

    impl<S: tracing::Subscriber> Layer<S> for RejectLevels {
        fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
            let mut message = Message(String::new());
            event.record(&mut message);
            if message.0 == "dropping invalid source item" {
                self.0.lock().unwrap().push(*event.metadata().level());
            }
        }
    }

    /// Serves pre-built pages in order and records the cursor of every call.
    #[derive(Default)]
    struct ScriptedSource {
        pages: Mutex<VecDeque<Page>>,
        cursors: Mutex<Vec<Option<String>>>,
    }

    impl ScriptedSource {
        fn new(pages: Vec<Page>) -> Self {
            Self {
                pages: Mutex::new(pages.into()),
                cursors: Mutex::new(Vec::new()),
            }
        }

        fn cursors(&self) -> Vec<Option<String>> {
            self.cursors.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl PageSource for ScriptedSource {
        fn source_name(&self) -> &'static str {
            "scripted"
        }

        async fn fetch_page(&self, cursor: Option<&str>) -> Page {
            self.cursors.lock().unwrap().push(cursor.map(str::to_string));
            self.pages.lock().unwrap().pop_front().unwrap_or_default()
        }
    }

    fn item(ticker: &str) -> RawIngestItem {
        RawIngestItem(json!({
            "ticker": ticker,
            "company": format!("{ticker} Inc"),
            "brokerage": "Goldman",
            "action": "reiterated by",
            "rating_from": "Buy",
            "rating_to": "Buy",
            "target_from": "$10.00",
            "target_to": "$11.00",
            "time": "2025-01-13T00:30:05Z"
        }))
    }

    fn page(items: Vec<RawIngestItem>, next: Option<&str>) -> Page {
        Page {
            items,
            next_cursor: next.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn two_page_run_fetches_twice_and_persists_both() {
        let source = ScriptedSource::new(vec![
            page(vec![item("AAA")], Some("X")),
            page(vec![item("BBB")], None),
        ]);
        let store = MemoryStore::default();

        let summary = run_ingestion(
            &source,
            &store,
            &IngestOptions::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(source.cursors(), vec![None, Some("X".to_string())]);
        assert_eq!(
            summary,
            IngestSummary {
                pages: 2,
                fetched: 2,
                validated: 2,
                rejected: 0,
                persisted: 2,
                failed: 0,
            }
        );
        assert_eq!(store.snapshot().recommendations.len(), 2);
    }

    #[tokio::test]
    async fn stops_after_the_page_without_cursor() {
        let source = ScriptedSource::new(vec![
            page(vec![item("AAA")], Some("p2")),
            page(vec![item("BBB")], Some("p3")),
            page(vec![item("CCC")], None),
            page(vec![item("NEVER")], None),
        ]);

        let collected =
            collect_records(&source, &IngestOptions::default(), &CancellationToken::new())
                .await
                .unwrap();

        assert_eq!(collected.pages, 3);
        assert_eq!(source.cursors().len(), 3);
        assert!(collected.records.iter().all(|r| r.ticker != "NEVER"));
    }

    #[tokio::test]
    async fn drops_items_without_time_and_keeps_going() {
        let source = ScriptedSource::new(vec![
            page(vec![RawIngestItem(json!({"ticker": "ABC"})), item("AAA")], Some("X")),
            page(vec![item("BBB")], None),
        ]);
        let store = MemoryStore::default();

        let summary = run_ingestion(
            &source,
            &store,
            &IngestOptions::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(summary.fetched, 3);
        assert_eq!(summary.rejected, 1);
        assert_eq!(summary.persisted, 2);
        let state = store.snapshot();
        assert!(state.companies.iter().all(|c| c.ticker != "ABC"));
    }

    #[tokio::test]
    async fn exhausted_first_page_persists_an_empty_batch() {
        // What the http client hands back when the very first request fails.
        let source = ScriptedSource::new(vec![Page::exhausted()]);
        let store = MemoryStore::default();

        let summary = run_ingestion(
            &source,
            &store,
            &IngestOptions::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(summary.pages, 1);
        assert_eq!(summary.persisted, 0);
        assert_eq!(store.snapshot().commits, 1);
    }

    #[tokio::test]
    async fn page_limit_bounds_a_source_that_never_ends() {
        let pages = (0..10)
            .map(|i| {
                let cursor = format!("c{i}");
                page(vec![item("AAA")], Some(cursor.as_str()))
            })
            .collect();
        let source = ScriptedSource::new(pages);

        let collected = collect_records(
            &source,
            &IngestOptions { max_pages: 3 },
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        assert_eq!(collected.pages, 3);
        assert_eq!(collected.records.len(), 3);
    }

    #[tokio::test]
    async fn cancelled_run_fetches_and_persists_nothing() {
        let source = ScriptedSource::new(vec![page(vec![item("AAA")], None)]);
        let store = MemoryStore::default();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = run_ingestion(&source, &store, &IngestOptions::default(), &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, IngestError::Cancelled));
        assert!(source.cursors().is_empty());
        assert_eq!(store.snapshot().commits, 0);
    }

    #[tokio::test]
    async fn every_rejected_item_is_logged() {
        let levels = RejectLevels::default();
        let _guard =
            tracing::subscriber::set_default(tracing_subscriber::registry().with(levels.clone()));

        let invalid = (0..MAX_LOGGED_REJECTS + 3)
            .map(|_| RawIngestItem(json!({"ticker": "ABC"})))
            .collect();
        let source = ScriptedSource::new(vec![page(invalid, None)]);

        let collected =
            collect_records(&source, &IngestOptions::default(), &CancellationToken::new())
                .await
                .unwrap();

        assert_eq!(collected.rejected, MAX_LOGGED_REJECTS + 3);
        let levels = levels.0.lock().unwrap().clone();
        assert_eq!(levels.len(), MAX_LOGGED_REJECTS + 3);
        assert!(levels[..MAX_LOGGED_REJECTS]
            .iter()
            .all(|l| *l == tracing::Level::WARN));
        assert!(levels[MAX_LOGGED_REJECTS..]
            .iter()
            .all(|l| *l == tracing::Level::DEBUG));
    }
}
