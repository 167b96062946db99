use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::settings::BangShortcut;

/// Kind-specific part of a result. Timestamps are epoch milliseconds as
/// reported by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum RecordKind {
    Tab {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_accessed: Option<i64>,
    },
    History {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        last_visit_time: Option<i64>,
    },
    Bookmark {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        date_added: Option<i64>,
    },
    Search,
    BangSearch {
        bang_mode: BangShortcut,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayIcon {
    /// Favicon of the page, placeholder when it cannot be resolved.
    Favicon,
    History,
    Bookmark,
    SearchEngine,
    Bang,
}

impl RecordKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Tab { .. } => "tab",
            Self::History { .. } => "history",
            Self::Bookmark { .. } => "bookmark",
            Self::Search => "search",
            Self::BangSearch { .. } => "bang-search",
        }
    }

    pub fn is_tab(&self) -> bool {
        matches!(self, Self::Tab { .. })
    }

    pub fn display_icon(&self) -> DisplayIcon {
        match self {
            Self::Tab { .. } => DisplayIcon::Favicon,
            Self::History { .. } => DisplayIcon::History,
            Self::Bookmark { .. } => DisplayIcon::Bookmark,
            Self::Search => DisplayIcon::SearchEngine,
            Self::BangSearch { .. } => DisplayIcon::Bang,
        }
    }
}

/// One searchable row. `id` is only unique within its kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultRecord {
    #[serde(flatten)]
    pub kind: RecordKind,
    pub id: String,
    #[serde(default)]
    pub title: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub favicon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_pinyin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title_pinyin_initials: Option<String>,
}

impl ResultRecord {
    pub fn new(kind: RecordKind, id: &str, title: &str, url: &str) -> Self {
        Self {
            kind,
            id: id.to_string(),
            title: clean_title(title),
            url: url.to_string(),
            favicon: None,
            title_pinyin: None,
            title_pinyin_initials: None,
        }
    }

    pub fn tab(id: &str, title: &str, url: &str, last_accessed: Option<i64>) -> Self {
        Self::new(RecordKind::Tab { last_accessed }, id, title, url)
    }

    pub fn history(id: &str, title: &str, url: &str, last_visit_time: Option<i64>) -> Self {
        Self::new(RecordKind::History { last_visit_time }, id, title, url)
    }

    pub fn bookmark(id: &str, title: &str, url: &str, date_added: Option<i64>) -> Self {
        Self::new(RecordKind::Bookmark { date_added }, id, title, url)
    }

    pub fn with_favicon(mut self, favicon: Option<String>) -> Self {
        self.favicon = favicon.filter(|value| !value.trim().is_empty());
        self
    }

    /// Title used for de-duplication and display, falling back to the url.
    pub fn display_title(&self) -> &str {
        if self.title.is_empty() {
            &self.url
        } else {
            &self.title
        }
    }
}

/// Removes Unicode format characters (zero-width spaces, joiners, BOM,
/// bidi marks) that pages sneak into their titles.
pub fn clean_title(raw: &str) -> String {
    static FORMAT_CHARS: OnceLock<Option<Regex>> = OnceLock::new();
    match FORMAT_CHARS.get_or_init(|| Regex::new(r"\p{Cf}").ok()) {
        Some(pattern) => pattern.replace_all(raw, "").into_owned(),
        None => raw.to_string(),
    }
}

pub fn normalize_for_search(input: &str) -> String {
    input
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect()
}
