use crate::domain::contract::RawIngestItem;
use serde::{Deserialize, Serialize};

/// Wire shape of one page from the rating source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageResponse {
    #[serde(default)]
    pub items: Vec<RawIngestItem>,
    #[serde(default)]
    pub next_page: Option<String>,
}

/// One fetched page. `next_cursor` is `None` when there is nothing more to fetch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub items: Vec<RawIngestItem>,
    pub next_cursor: Option<String>,
}

impl Page {
    /// The "no more data" page, also used to report transport failures.
    pub fn exhausted() -> Self {
        Self::default()
    }
}

impl From<PageResponse> for Page {
    fn from(resp: PageResponse) -> Self {
        Self {
            items: resp.items,
            next_cursor: resp.next_page.filter(|c| !c.is_empty()),
        }
    }
}
