use std::collections::BTreeMap;

use crate::error::AnchorError;

/// Separates a shadow value from its metadata and each metadata key from its
/// value. It is a legal identifier code point, so values containing it are
/// refused before they reach a shadow property.
pub const METADATA_DELIMITER: char = '\u{2693}';

const KEY_SELECTOR: &str = "selector";
const KEY_DYNAMIC: &str = "dynamic";
const KEY_PARSED: &str = "parsed";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValueMetadata {
    pub selector: Option<String>,
    pub dynamic: bool,
    pub parsed: Option<String>,
    pub extra: BTreeMap<String, String>,
}

impl ValueMetadata {
    pub fn for_selector(selector: impl Into<String>) -> Self {
        Self {
            selector: Some(selector.into()),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.selector.is_none() && !self.dynamic && self.parsed.is_none() && self.extra.is_empty()
    }

    pub fn serialize(&self) -> String {
        let mut pairs: Vec<String> = Vec::new();
        if let Some(selector) = &self.selector {
            pairs.push(pair(KEY_SELECTOR, selector));
        }
        if self.dynamic {
            pairs.push(pair(KEY_DYNAMIC, "true"));
        }
        if let Some(parsed) = &self.parsed {
            pairs.push(pair(KEY_PARSED, parsed));
        }
        for (key, value) in &self.extra {
            pairs.push(pair(key, value));
        }
        pairs.join(" ")
    }

    pub fn deserialize(serialized: &str) -> Result<Self, AnchorError> {
        let mut metadata = Self::default();
        for kv in serialized.split_whitespace() {
            let Some((key, value)) = kv.split_once(METADATA_DELIMITER) else {
                return Err(AnchorError::Metadata(format!(
                    "pair without delimiter: {}",
                    kv
                )));
            };
            match key {
                KEY_SELECTOR => metadata.selector = Some(value.to_string()),
                KEY_DYNAMIC => metadata.dynamic = value == "true",
                KEY_PARSED => metadata.parsed = Some(value.to_string()),
                _ => {
                    metadata.extra.insert(key.to_string(), value.to_string());
                }
            }
        }
        Ok(metadata)
    }
}

fn pair(key: &str, value: &str) -> String {
    format!("{}{}{}", key, METADATA_DELIMITER, value)
}

/// Appends serialized metadata to a shadow value.
pub fn attach(value: &str, metadata: &ValueMetadata) -> String {
    if metadata.is_empty() {
        return value.to_string();
    }
    format!(
        "{} {} {}",
        value.trim(),
        METADATA_DELIMITER,
        metadata.serialize()
    )
}

pub fn contains_delimiter(value: &str) -> bool {
    value.contains(METADATA_DELIMITER)
}

/// Splits a computed shadow value into the value text and its serialized
/// metadata at the last whitespace-delimited separator. Delimiters inside
/// metadata pairs never have whitespace on both sides.
pub fn split(computed: &str) -> (&str, Option<&str>) {
    let separator = computed.char_indices().rev().find(|(idx, ch)| {
        *ch == METADATA_DELIMITER
            && computed[..*idx]
                .chars()
                .next_back()
                .is_some_and(char::is_whitespace)
            && computed[idx + ch.len_utf8()..]
                .chars()
                .next()
                .is_some_and(char::is_whitespace)
    });
    match separator {
        Some((idx, ch)) => (
            computed[..idx].trim(),
            Some(computed[idx + ch.len_utf8()..].trim()),
        ),
        None => (computed.trim(), None),
    }
}
