use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::storage::{KvStore, StoreError};

pub const STORAGE_KEY: &str = "userOptions";
pub const QUERY_PLACEHOLDER: &str = "{query}";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("invalid hotkey: {0}")]
    Hotkey(String),
    #[error("shortcut keyword is required")]
    EmptyKeyword,
    #[error("shortcut keyword '{0}' must not contain whitespace")]
    InvalidKeyword(String),
    #[error("shortcut keyword '{0}' is already used")]
    DuplicateKeyword(String),
    #[error("shortcut name is required")]
    EmptyName,
    #[error("search url '{0}' must contain {{query}}")]
    MissingPlaceholder(String),
    #[error("search url '{0}' must be an http(s) url")]
    InvalidSearchUrl(String),
    #[error("could not parse options: {0}")]
    Parse(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchEngine {
    #[default]
    Google,
    Bing,
    Baidu,
}

impl SearchEngine {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Google => "Google",
            Self::Bing => "Bing",
            Self::Baidu => "Baidu",
        }
    }

    pub fn search_url(&self, query: &str) -> String {
        let encoded = urlencoding::encode(query);
        match self {
            Self::Google => format!("https://www.google.com/search?q={encoded}"),
            Self::Bing => format!("https://www.bing.com/search?q={encoded}"),
            Self::Baidu => format!("https://www.baidu.com/s?wd={encoded}"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Appearance {
    Light,
    Dark,
    #[default]
    System,
}

/// A keyword that redirects the query to `search_url`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BangShortcut {
    pub keyword: String,
    pub name: String,
    pub search_url: String,
}

impl BangShortcut {
    pub fn new(keyword: &str, name: &str, search_url: &str) -> Self {
        Self {
            keyword: keyword.to_string(),
            name: name.to_string(),
            search_url: search_url.to_string(),
        }
    }
}

pub fn default_bang_shortcuts() -> Vec<BangShortcut> {
    vec![
        BangShortcut::new("v2ex", "V2EX", "https://www.google.com/search?q=site:v2ex.com+{query}"),
        BangShortcut::new("reddit", "Reddit", "https://www.reddit.com/search/?q={query}"),
        BangShortcut::new("wiki", "Wikipedia", "https://en.wikipedia.org/w/index.php?search={query}"),
        BangShortcut::new("chatgpt", "ChatGPT", "https://chatgpt.com/?q={query}"),
        BangShortcut::new("gh", "GitHub", "https://github.com/search?q={query}"),
    ]
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserOptions {
    pub search_engine: SearchEngine,
    pub appearance: Appearance,
    pub hotkey: String,
    pub bang_shortcuts: Vec<BangShortcut>,
}

impl Default for UserOptions {
    fn default() -> Self {
        Self {
            search_engine: SearchEngine::default(),
            appearance: Appearance::default(),
            hotkey: "ctrl+p".to_string(),
            bang_shortcuts: default_bang_shortcuts(),
        }
    }
}

/// Parses an options document (JSON5 accepted); absent fields take defaults.
pub fn parse_user_options(text: &str) -> Result<UserOptions, SettingsError> {
    let options: UserOptions =
        json5::from_str(text).map_err(|e| SettingsError::Parse(e.to_string()))?;
    validate_user_options(&options)?;
    Ok(options)
}

pub fn validate_user_options(options: &UserOptions) -> Result<(), SettingsError> {
    validate_hotkey(&options.hotkey)?;
    for (index, bang) in options.bang_shortcuts.iter().enumerate() {
        validate_bang_shortcut(&options.bang_shortcuts, bang, Some(index))?;
    }
    Ok(())
}

pub fn load_user_options(store: &KvStore) -> Result<UserOptions, SettingsError> {
    match store.get(STORAGE_KEY)? {
        Some(raw) => serde_json::from_str(&raw).map_err(|e| SettingsError::Parse(e.to_string())),
        None => Ok(UserOptions::default()),
    }
}

pub fn save_user_options(store: &KvStore, options: &UserOptions) -> Result<(), SettingsError> {
    validate_user_options(options)?;
    let raw = serde_json::to_string(options).map_err(|e| SettingsError::Parse(e.to_string()))?;
    store.set(STORAGE_KEY, &raw)?;
    Ok(())
}

/// Canonical form is lowercase `ctrl+alt+shift+meta+key`.
pub fn validate_hotkey(input: &str) -> Result<String, SettingsError> {
    let raw_parts: Vec<&str> = input
        .split('+')
        .map(|part| part.trim())
        .filter(|part| !part.is_empty())
        .collect();

    if raw_parts.len() < 2 {
        return Err(SettingsError::Hotkey(
            "hotkey must include at least one modifier and one key".to_string(),
        ));
    }

    let key = normalize_key(raw_parts[raw_parts.len() - 1])?;
    let mut modifiers: BTreeSet<&'static str> = BTreeSet::new();
    for part in &raw_parts[..raw_parts.len() - 1] {
        modifiers.insert(normalize_modifier(part)?);
    }

    let canonical = canonical_hotkey(&modifiers, &key);
    if is_reserved_hotkey(&canonical) {
        return Err(SettingsError::Hotkey(format!(
            "'{canonical}' is reserved by the browser"
        )));
    }
    Ok(canonical)
}

fn normalize_modifier(input: &str) -> Result<&'static str, SettingsError> {
    match input.to_ascii_lowercase().as_str() {
        "ctrl" | "control" => Ok("ctrl"),
        "alt" | "option" => Ok("alt"),
        "shift" => Ok("shift"),
        "meta" | "cmd" | "command" => Ok("meta"),
        _ => Err(SettingsError::Hotkey(format!(
            "unsupported modifier '{input}'"
        ))),
    }
}

fn normalize_key(input: &str) -> Result<String, SettingsError> {
    let lower = input.trim().to_ascii_lowercase();
    if lower == "space" {
        return Ok(lower);
    }
    if let Some(number) = lower.strip_prefix('f') {
        if let Ok(parsed) = number.parse::<u8>() {
            if (1..=12).contains(&parsed) {
                return Ok(format!("f{parsed}"));
            }
            return Err(SettingsError::Hotkey(
                "function key must be between F1 and F12".to_string(),
            ));
        }
    }
    let mut chars = lower.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) if c.is_ascii_alphanumeric() => Ok(lower),
        _ => Err(SettingsError::Hotkey(format!(
            "key '{input}' must be a-z, 0-9, space, or f1-f12"
        ))),
    }
}

fn canonical_hotkey(modifiers: &BTreeSet<&'static str>, key: &str) -> String {
    let mut ordered: Vec<&str> = ["ctrl", "alt", "shift", "meta"]
        .into_iter()
        .filter(|m| modifiers.contains(m))
        .collect();
    ordered.push(key);
    ordered.join("+")
}

fn is_reserved_hotkey(canonical: &str) -> bool {
    matches!(
        canonical,
        "ctrl+w" | "ctrl+t" | "ctrl+n" | "ctrl+shift+n" | "ctrl+shift+t" | "ctrl+shift+w"
    )
}

/// `editing_index` is the position of the entry being replaced, if any;
/// that entry does not count as a duplicate of itself.
pub fn validate_bang_shortcut(
    existing: &[BangShortcut],
    candidate: &BangShortcut,
    editing_index: Option<usize>,
) -> Result<(), SettingsError> {
    let keyword = candidate.keyword.trim();
    if keyword.is_empty() {
        return Err(SettingsError::EmptyKeyword);
    }
    if keyword.chars().any(char::is_whitespace) {
        return Err(SettingsError::InvalidKeyword(keyword.to_string()));
    }
    let duplicate = existing
        .iter()
        .enumerate()
        .any(|(index, bang)| bang.keyword.trim() == keyword && Some(index) != editing_index);
    if duplicate {
        return Err(SettingsError::DuplicateKeyword(keyword.to_string()));
    }
    if candidate.name.trim().is_empty() {
        return Err(SettingsError::EmptyName);
    }
    let url = candidate.search_url.trim();
    if !url.contains(QUERY_PLACEHOLDER) {
        return Err(SettingsError::MissingPlaceholder(url.to_string()));
    }
    if !(url.starts_with("https://") || url.starts_with("http://")) {
        return Err(SettingsError::InvalidSearchUrl(url.to_string()));
    }
    Ok(())
}

pub fn upsert_bang_shortcut(
    options: &mut UserOptions,
    candidate: BangShortcut,
    editing_index: Option<usize>,
) -> Result<(), SettingsError> {
    let editing_index = editing_index.filter(|i| *i < options.bang_shortcuts.len());
    validate_bang_shortcut(&options.bang_shortcuts, &candidate, editing_index)?;
    let candidate = BangShortcut {
        keyword: candidate.keyword.trim().to_string(),
        ..candidate
    };
    match editing_index {
        Some(index) => options.bang_shortcuts[index] = candidate,
        None => options.bang_shortcuts.push(candidate),
    }
    Ok(())
}

pub fn remove_bang_shortcut(options: &mut UserOptions, index: usize) -> Option<BangShortcut> {
    if index < options.bang_shortcuts.len() {
        Some(options.bang_shortcuts.remove(index))
    } else {
        None
    }
}

/// Bang mode triggers when the whole trimmed input equals a keyword.
pub fn find_bang<'a>(shortcuts: &'a [BangShortcut], input: &str) -> Option<&'a BangShortcut> {
    let keyword = input.trim();
    if keyword.is_empty() {
        return None;
    }
    shortcuts.iter().find(|bang| bang.keyword == keyword)
}

pub fn bang_search_url(bang: &BangShortcut, query: &str) -> String {
    bang.search_url
        .replacen(QUERY_PLACEHOLDER, &urlencoding::encode(query), 1)
}
