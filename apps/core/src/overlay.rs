//! Query evaluation on the page side, over a snapshot received from the
//! background. The shipped index is reused as-is; it is rebuilt locally only
//! when it is missing or does not fit the records.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::model::{RecordKind, ResultRecord};
use crate::search::{SearchIndex, SerializedIndex};
use crate::settings::{bang_search_url, BangShortcut, SearchEngine};

pub struct OverlaySearch {
    records: Vec<ResultRecord>,
    index: SearchIndex,
    limit: usize,
    rebuilt: bool,
}

impl OverlaySearch {
    pub fn from_response(records: Vec<ResultRecord>, index: Option<SerializedIndex>) -> Self {
        let shipped = index.map(|blob| {
            SearchIndex::deserialize(&blob).and_then(|index| {
                index.check_records(records.len())?;
                Ok(index)
            })
        });

        let (index, rebuilt) = match shipped {
            Some(Ok(index)) => (index, false),
            Some(Err(error)) => {
                warn!(%error, "shipped index unusable; rebuilding");
                (SearchIndex::build(&records), true)
            }
            None => {
                debug!(records = records.len(), "no index shipped; building");
                (SearchIndex::build(&records), true)
            }
        };

        let limit = records.len();
        Self {
            records,
            index,
            limit,
            rebuilt,
        }
    }

    /// Caps fuzzy hits; synthetic rows are not counted.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }

    pub fn records(&self) -> &[ResultRecord] {
        &self.records
    }

    /// Whether the index had to be built on this side.
    pub fn rebuilt_index(&self) -> bool {
        self.rebuilt
    }

    pub fn search(
        &self,
        query: &str,
        bang_mode: Option<&BangShortcut>,
        engine: SearchEngine,
    ) -> Vec<ResultRecord> {
        if query.trim().is_empty() {
            return Vec::new();
        }

        let mut seen_titles: HashSet<&str> = HashSet::new();
        let mut tabs = Vec::new();
        let mut others = Vec::new();
        for hit in self.index.search(query, self.limit) {
            let Some(record) = self.records.get(hit.record) else {
                continue;
            };
            if !seen_titles.insert(record.display_title()) {
                continue;
            }
            if record.kind.is_tab() {
                tabs.push(record.clone());
            } else {
                others.push(record.clone());
            }
        }

        let mut rows = Vec::with_capacity(tabs.len() + others.len() + 1);
        if let Some(bang) = bang_mode {
            rows.push(bang_search_record(bang, query));
        }
        rows.extend(tabs);
        rows.extend(others);

        if rows.is_empty() {
            rows.push(engine_search_record(engine, query));
        }
        rows
    }
}

pub fn bang_search_record(bang: &BangShortcut, query: &str) -> ResultRecord {
    ResultRecord::new(
        RecordKind::BangSearch {
            bang_mode: bang.clone(),
        },
        &format!("bang-search-{}", bang.keyword),
        &format!("Search {} for \"{}\"", bang.name, query.trim()),
        &bang_search_url(bang, query),
    )
}

pub fn engine_search_record(engine: SearchEngine, query: &str) -> ResultRecord {
    ResultRecord::new(
        RecordKind::Search,
        "search",
        &format!("Search {} for \"{}\"", engine.label(), query.trim()),
        &engine.search_url(query),
    )
}

/// Target of a direct search (Enter without a selected row).
pub fn direct_search_url(
    query: &str,
    bang_mode: Option<&BangShortcut>,
    engine: SearchEngine,
) -> String {
    match bang_mode {
        Some(bang) => bang_search_url(bang, query),
        None => engine.search_url(query),
    }
}
