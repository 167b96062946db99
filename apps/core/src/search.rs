use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{normalize_for_search, ResultRecord};

pub const INDEX_KEYS: [&str; 4] = ["title", "url", "titlePinyin", "titlePinyinInitials"];
/// Largest accepted share of edits per query character.
pub const DEFAULT_THRESHOLD: f64 = 0.3;
const INDEX_VERSION: u32 = 1;
const MAX_FUZZY_PATTERN: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IndexError {
    #[error("malformed search index: {0}")]
    Malformed(String),
    #[error("unsupported search index version {found} (expected {expected})")]
    Version { found: u32, expected: u32 },
    #[error("search index covers {indexed} records but {provided} were provided")]
    RecordMismatch { indexed: usize, provided: usize },
}

/// Opaque wire form of a [`SearchIndex`]. Receivers only ever turn it back
/// into an index through [`SearchIndex::deserialize`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SerializedIndex(serde_json::Value);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct IndexEntry {
    record: usize,
    /// Normalized value per key in `INDEX_KEYS` order, empty when absent.
    fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchIndex {
    version: u32,
    keys: Vec<String>,
    threshold: f64,
    entries: Vec<IndexEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchHit {
    /// Position of the record in the slice the index was built over.
    pub record: usize,
    /// 0.0 is a perfect match, `threshold` the worst accepted one.
    pub score: f64,
    pub key: &'static str,
}

impl SearchIndex {
    pub fn build(records: &[ResultRecord]) -> Self {
        Self::build_with_threshold(records, DEFAULT_THRESHOLD)
    }

    pub fn build_with_threshold(records: &[ResultRecord], threshold: f64) -> Self {
        let entries = records
            .iter()
            .enumerate()
            .map(|(record, item)| {
                let title = normalize_for_search(&item.title);
                let url = normalize_for_search(&item.url);
                // Latin titles produce a pinyin identical to the title; skip the duplicate work.
                let pinyin = normalize_optional(item.title_pinyin.as_deref(), &title);
                let initials = normalize_optional(item.title_pinyin_initials.as_deref(), &title);
                IndexEntry {
                    record,
                    fields: vec![title, url, pinyin, initials],
                }
            })
            .collect();

        Self {
            version: INDEX_VERSION,
            keys: INDEX_KEYS.iter().map(|k| k.to_string()).collect(),
            threshold: threshold.clamp(0.0, 1.0),
            entries,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn serialize(&self) -> Result<SerializedIndex, IndexError> {
        serde_json::to_value(self)
            .map(SerializedIndex)
            .map_err(|e| IndexError::Malformed(e.to_string()))
    }

    pub fn deserialize(blob: &SerializedIndex) -> Result<Self, IndexError> {
        let index: SearchIndex = serde_json::from_value(blob.0.clone())
            .map_err(|e| IndexError::Malformed(e.to_string()))?;
        if index.version != INDEX_VERSION {
            return Err(IndexError::Version {
                found: index.version,
                expected: INDEX_VERSION,
            });
        }
        if index.keys.iter().map(String::as_str).ne(INDEX_KEYS.iter().copied()) {
            return Err(IndexError::Malformed(format!(
                "unexpected keys {:?}",
                index.keys
            )));
        }
        if let Some(entry) = index.entries.iter().find(|e| e.fields.len() != INDEX_KEYS.len()) {
            return Err(IndexError::Malformed(format!(
                "entry for record {} has {} fields",
                entry.record,
                entry.fields.len()
            )));
        }
        Ok(index)
    }

    /// Checks that this index was built over `record_count` records.
    pub fn check_records(&self, record_count: usize) -> Result<(), IndexError> {
        let in_range = self.entries.iter().all(|e| e.record < record_count);
        if self.entries.len() != record_count || !in_range {
            return Err(IndexError::RecordMismatch {
                indexed: self.entries.len(),
                provided: record_count,
            });
        }
        Ok(())
    }

    /// Ranked by score, ties keep build order.
    pub fn search(&self, query: &str, limit: usize) -> Vec<SearchHit> {
        if limit == 0 || self.entries.is_empty() {
            return Vec::new();
        }

        let normalized_query = normalize_for_search(query);
        if normalized_query.is_empty() {
            return Vec::new();
        }
        let pattern = Pattern::new(&normalized_query, self.threshold);

        let mut hits: Vec<SearchHit> = self
            .entries
            .iter()
            .filter_map(|entry| score_entry(entry, &pattern))
            .collect();

        hits.sort_by(|a, b| {
            a.score
                .partial_cmp(&b.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.record.cmp(&b.record))
        });
        hits.truncate(limit);
        hits
    }
}

fn normalize_optional(value: Option<&str>, title: &str) -> String {
    match value.map(normalize_for_search) {
        Some(normalized) if normalized != title => normalized,
        _ => String::new(),
    }
}

fn score_entry(entry: &IndexEntry, pattern: &Pattern) -> Option<SearchHit> {
    entry
        .fields
        .iter()
        .enumerate()
        .filter_map(|(key, field)| pattern.score(field).map(|score| (key, score)))
        .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(key, score)| SearchHit {
            record: entry.record,
            score,
            key: INDEX_KEYS[key],
        })
}

struct Pattern {
    text: String,
    chars: Vec<char>,
    max_edits: usize,
    /// Per distinct character, the bit positions where it occurs in `chars`.
    peq: Vec<(char, u64)>,
}

impl Pattern {
    fn new(normalized: &str, threshold: f64) -> Self {
        let chars: Vec<char> = normalized.chars().collect();
        let max_edits = ((chars.len() as f64) * threshold).floor() as usize;
        let mut peq: Vec<(char, u64)> = Vec::new();
        if chars.len() <= MAX_FUZZY_PATTERN {
            for (i, c) in chars.iter().enumerate() {
                match peq.iter_mut().find(|(pc, _)| pc == c) {
                    Some((_, mask)) => *mask |= 1 << i,
                    None => peq.push((*c, 1 << i)),
                }
            }
        }
        Self {
            text: normalized.to_string(),
            chars,
            max_edits,
            peq,
        }
    }

    fn score(&self, field: &str) -> Option<f64> {
        if field.is_empty() {
            return None;
        }

        if let Some(position) = field.find(&self.text) {
            // Exact hits stay below any fuzzy hit (>= 1/len).
            let ratio = position as f64 / field.len() as f64;
            return Some(ratio * 0.01);
        }

        if self.max_edits == 0 || self.peq.is_empty() {
            return None;
        }

        let distance = self.substring_distance(field);
        if distance <= self.max_edits {
            Some(distance as f64 / self.chars.len() as f64)
        } else {
            None
        }
    }

    /// Smallest edit distance between the pattern and any substring of
    /// `field` (Myers' bit-vector algorithm, pattern <= 64 chars).
    fn substring_distance(&self, field: &str) -> usize {
        let m = self.chars.len();
        let high_bit = 1u64 << (m - 1);
        let mut pv: u64 = !0;
        let mut mv: u64 = 0;
        let mut score = m;
        let mut best = m;

        for c in field.chars() {
            let eq = self
                .peq
                .iter()
                .find(|(pc, _)| *pc == c)
                .map(|(_, mask)| *mask)
                .unwrap_or(0);
            let xv = eq | mv;
            let xh = ((eq & pv).wrapping_add(pv) ^ pv) | eq;
            let mut ph = mv | !(xh | pv);
            let mut mh = pv & xh;
            if ph & high_bit != 0 {
                score += 1;
            } else if mh & high_bit != 0 {
                score -= 1;
            }
            ph <<= 1;
            mh <<= 1;
            pv = mh | !(xv | ph);
            mv = ph & xv;
            best = best.min(score);
            if best == 0 {
                break;
            }
        }

        best
    }
}
