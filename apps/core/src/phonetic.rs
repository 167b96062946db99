use pinyin::ToPinyin;

use crate::model::ResultRecord;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Phonetic {
    /// Toneless pinyin of every Han character, other characters kept as-is.
    pub full: String,
    /// First letter of each syllable, other characters kept as-is.
    pub initials: String,
}

pub fn derive(title: &str) -> Option<Phonetic> {
    if title.trim().is_empty() {
        return None;
    }

    let mut full = String::with_capacity(title.len() * 2);
    let mut initials = String::with_capacity(title.len());
    for (ch, syllable) in title.chars().zip(title.to_pinyin()) {
        match syllable {
            Some(syllable) => {
                full.push_str(syllable.plain());
                initials.push_str(syllable.first_letter());
            }
            None => {
                full.push(ch);
                initials.push(ch);
            }
        }
    }

    Some(Phonetic { full, initials })
}

/// Fills `title_pinyin`/`title_pinyin_initials`. Records whose title yields
/// nothing come back untouched.
pub fn augment(mut record: ResultRecord) -> ResultRecord {
    if let Some(phonetic) = derive(&record.title) {
        record.title_pinyin = Some(phonetic.full);
        record.title_pinyin_initials = Some(phonetic.initials);
    }
    record
}

pub fn augment_all(records: Vec<ResultRecord>) -> Vec<ResultRecord> {
    records.into_iter().map(augment).collect()
}

#[cfg(test)]
mod tests {
    use super::{augment, derive};
    use crate::model::ResultRecord;
    use pretty_assertions::assert_eq;

    #[test]
    fn derives_pinyin_and_initials_for_han_titles() {
        let phonetic = derive("北京地图").unwrap();
        assert_eq!(phonetic.full, "beijingditu");
        assert_eq!(phonetic.initials, "bjdt");
    }

    #[test]
    fn keeps_latin_text_in_mixed_titles() {
        let phonetic = derive("Rust 中文").unwrap();
        assert_eq!(phonetic.full, "Rust zhongwen");
        assert_eq!(phonetic.initials, "Rust zw");
    }

    #[test]
    fn empty_title_leaves_record_unchanged() {
        let record = ResultRecord::bookmark("b1", "  ", "https://a.com", None);
        let augmented = augment(record.clone());
        assert_eq!(augmented, record);
        assert!(augmented.title_pinyin.is_none());
    }

    #[test]
    fn augmenting_twice_is_stable() {
        let once = augment(ResultRecord::tab("1", "地图", "https://a.com", None));
        let twice = augment(once.clone());
        assert_eq!(once, twice);
        assert_eq!(twice.title_pinyin_initials.as_deref(), Some("dt"));
    }
}
