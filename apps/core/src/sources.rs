use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::contract::{ControlAck, ControlSignal};
use crate::model::ResultRecord;

/// URL prefixes of pages that can never be searched or switched to.
pub const DISALLOWED_URL_PREFIXES: [&str; 5] = [
    "chrome://",
    "chrome-extension://",
    "edge://",
    "about:",
    "devtools://",
];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("host api failed: {0}")]
    Host(String),
    #[error("tab {0} is not reachable")]
    TabUnreachable(i64),
    #[error("fixture error: {0}")]
    Fixture(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawTab {
    pub id: Option<i64>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub fav_icon_url: Option<String>,
    #[serde(default)]
    pub last_accessed: Option<i64>,
    #[serde(default)]
    pub active: bool,
    /// `loading` or `complete`; hosts that do not report it are treated as complete.
    #[serde(default)]
    pub status: Option<String>,
}

impl RawTab {
    pub fn is_complete(&self) -> bool {
        self.status.as_deref().map(|s| s == "complete").unwrap_or(true)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawHistoryItem {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub last_visit_time: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookmarkNode {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub date_added: Option<i64>,
    #[serde(default)]
    pub children: Vec<BookmarkNode>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabQuery {
    CurrentWindow,
    CurrentWindowComplete,
    AllWindows,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryQuery {
    pub text: String,
    pub max_results: usize,
    pub start_time: i64,
}

impl HistoryQuery {
    pub fn most_recent(max_results: usize) -> Self {
        Self {
            text: String::new(),
            max_results,
            start_time: 0,
        }
    }
}

/// The privileged host platform: tab/history/bookmark enumeration plus the
/// handful of tab actions the background needs.
#[async_trait]
pub trait BrowserHost: Send + Sync {
    async fn query_tabs(&self, query: TabQuery) -> Result<Vec<RawTab>, SourceError>;
    async fn search_history(&self, query: &HistoryQuery)
        -> Result<Vec<RawHistoryItem>, SourceError>;
    async fn bookmark_tree(&self) -> Result<Vec<BookmarkNode>, SourceError>;
    async fn create_tab(&self, url: &str) -> Result<(), SourceError>;
    async fn activate_tab(&self, tab_id: i64) -> Result<(), SourceError>;
    async fn send_to_tab(
        &self,
        tab_id: i64,
        signal: &ControlSignal,
    ) -> Result<ControlAck, SourceError>;
}

pub fn is_disallowed_url(url: &str) -> bool {
    let lowered = url.trim_start().to_ascii_lowercase();
    DISALLOWED_URL_PREFIXES
        .iter()
        .any(|prefix| lowered.starts_with(prefix))
}

pub async fn read_tabs(
    host: &dyn BrowserHost,
    caller_tab_id: Option<i64>,
) -> Result<Vec<ResultRecord>, SourceError> {
    let tabs = host.query_tabs(TabQuery::CurrentWindow).await?;
    Ok(format_tabs(&tabs, caller_tab_id))
}

pub fn format_tabs(tabs: &[RawTab], caller_tab_id: Option<i64>) -> Vec<ResultRecord> {
    tabs.iter()
        .filter(|tab| caller_tab_id.is_none() || tab.id != caller_tab_id)
        .filter(|tab| !tab.url.as_deref().map(is_disallowed_url).unwrap_or(false))
        .map(|tab| {
            let id = tab.id.map(|id| id.to_string()).unwrap_or_default();
            ResultRecord::tab(
                &id,
                tab.title.as_deref().unwrap_or_default(),
                tab.url.as_deref().unwrap_or_default(),
                tab.last_accessed,
            )
            .with_favicon(tab.fav_icon_url.clone())
        })
        .collect()
}

pub async fn read_history(
    host: &dyn BrowserHost,
    max_results: usize,
) -> Result<Vec<ResultRecord>, SourceError> {
    let items = host
        .search_history(&HistoryQuery::most_recent(max_results))
        .await?;
    Ok(format_history(&items))
}

pub fn format_history(items: &[RawHistoryItem]) -> Vec<ResultRecord> {
    items
        .iter()
        .map(|item| {
            ResultRecord::history(
                &item.id,
                item.title.as_deref().unwrap_or_default(),
                item.url.as_deref().unwrap_or_default(),
                item.last_visit_time,
            )
        })
        .collect()
}

pub async fn read_bookmarks(host: &dyn BrowserHost) -> Result<Vec<ResultRecord>, SourceError> {
    let tree = host.bookmark_tree().await?;
    Ok(format_bookmarks(&flatten_bookmarks(&tree)))
}

/// Depth-first walk keeping only nodes that carry a url; folders are skipped
/// but their children are visited.
pub fn flatten_bookmarks(nodes: &[BookmarkNode]) -> Vec<&BookmarkNode> {
    let mut out = Vec::new();
    let mut stack: Vec<&BookmarkNode> = nodes.iter().rev().collect();
    while let Some(node) = stack.pop() {
        if node.url.as_deref().map(|u| !u.is_empty()).unwrap_or(false) {
            out.push(node);
        }
        stack.extend(node.children.iter().rev());
    }
    out
}

pub fn format_bookmarks(nodes: &[&BookmarkNode]) -> Vec<ResultRecord> {
    nodes
        .iter()
        .map(|node| {
            ResultRecord::bookmark(
                &node.id,
                &node.title,
                node.url.as_deref().unwrap_or_default(),
                node.date_added,
            )
        })
        .collect()
}

/// Host contents loaded from a JSON file, used by the runtime binary when no
/// live browser is attached.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFixture {
    #[serde(default)]
    pub tabs: Vec<RawTab>,
    #[serde(default)]
    pub history: Vec<RawHistoryItem>,
    #[serde(default)]
    pub bookmarks: Vec<BookmarkNode>,
}

pub struct FixtureHost {
    tabs: Mutex<Vec<RawTab>>,
    history: Vec<RawHistoryItem>,
    bookmarks: Vec<BookmarkNode>,
}

impl FixtureHost {
    pub fn from_fixture(fixture: SourceFixture) -> Self {
        Self {
            tabs: Mutex::new(fixture.tabs),
            history: fixture.history,
            bookmarks: fixture.bookmarks,
        }
    }

    pub fn empty() -> Self {
        Self::from_fixture(SourceFixture::default())
    }

    pub fn load(path: &Path) -> Result<Self, SourceError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| SourceError::Fixture(format!("{}: {e}", path.display())))?;
        let fixture: SourceFixture = serde_json::from_str(&raw)
            .map_err(|e| SourceError::Fixture(format!("{}: {e}", path.display())))?;
        Ok(Self::from_fixture(fixture))
    }

    pub async fn tabs(&self) -> Vec<RawTab> {
        self.tabs.lock().await.clone()
    }
}

#[async_trait]
impl BrowserHost for FixtureHost {
    async fn query_tabs(&self, query: TabQuery) -> Result<Vec<RawTab>, SourceError> {
        let tabs = self.tabs.lock().await;
        Ok(tabs
            .iter()
            .filter(|tab| query != TabQuery::CurrentWindowComplete || tab.is_complete())
            .cloned()
            .collect())
    }

    async fn search_history(
        &self,
        query: &HistoryQuery,
    ) -> Result<Vec<RawHistoryItem>, SourceError> {
        let needle = query.text.to_lowercase();
        let mut items: Vec<RawHistoryItem> = self
            .history
            .iter()
            .filter(|item| item.last_visit_time.unwrap_or(0) >= query.start_time)
            .filter(|item| {
                needle.is_empty()
                    || item
                        .title
                        .as_deref()
                        .map(|t| t.to_lowercase().contains(&needle))
                        .unwrap_or(false)
                    || item
                        .url
                        .as_deref()
                        .map(|u| u.to_lowercase().contains(&needle))
                        .unwrap_or(false)
            })
            .cloned()
            .collect();
        items.sort_by(|a, b| b.last_visit_time.cmp(&a.last_visit_time));
        items.truncate(query.max_results);
        Ok(items)
    }

    async fn bookmark_tree(&self) -> Result<Vec<BookmarkNode>, SourceError> {
        Ok(self.bookmarks.clone())
    }

    async fn create_tab(&self, url: &str) -> Result<(), SourceError> {
        let mut tabs = self.tabs.lock().await;
        let next_id = tabs.iter().filter_map(|t| t.id).max().unwrap_or(0) + 1;
        for tab in tabs.iter_mut() {
            tab.active = false;
        }
        tabs.push(RawTab {
            id: Some(next_id),
            url: Some(url.to_string()),
            active: true,
            status: Some("loading".to_string()),
            ..RawTab::default()
        });
        Ok(())
    }

    async fn activate_tab(&self, tab_id: i64) -> Result<(), SourceError> {
        let mut tabs = self.tabs.lock().await;
        if !tabs.iter().any(|t| t.id == Some(tab_id)) {
            return Err(SourceError::TabUnreachable(tab_id));
        }
        for tab in tabs.iter_mut() {
            tab.active = tab.id == Some(tab_id);
        }
        Ok(())
    }

    async fn send_to_tab(
        &self,
        tab_id: i64,
        _signal: &ControlSignal,
    ) -> Result<ControlAck, SourceError> {
        let tabs = self.tabs.lock().await;
        if tabs.iter().any(|t| t.id == Some(tab_id)) {
            Ok(ControlAck { success: true })
        } else {
            Err(SourceError::TabUnreachable(tab_id))
        }
    }
}
