use std::hash::{Hash, Hasher};

const LEGACY_PSEUDO_ELEMENTS: &[&str] = &["before", "after", "first-line", "first-letter"];

/// One complex selector from a rule's selector list. Two selectors with the
/// same text in different rules are different selectors.
#[derive(Debug, Clone)]
pub struct Selector {
    pub id: String,
    pub full: String,
    pub element_part: String,
    pub pseudo_part: Option<String>,
}

impl Selector {
    pub fn new(id: String, full: &str) -> Self {
        let full = full.trim().to_string();
        let (element_part, pseudo_part) = split_pseudo_element(&full);
        Self {
            id,
            full,
            element_part,
            pseudo_part,
        }
    }
}

impl PartialEq for Selector {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Selector {}

impl Hash for Selector {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Splits a selector list at commas that are not inside brackets,
/// parentheses, or strings.
pub fn split_selector_list(list: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut start = 0usize;
    for (idx, ch) in top_level_chars(list) {
        if ch == ',' {
            push_part(&mut parts, &list[start..idx]);
            start = idx + ch.len_utf8();
        }
    }
    push_part(&mut parts, &list[start..]);
    parts
}

fn push_part(parts: &mut Vec<String>, raw: &str) {
    let trimmed = raw.trim();
    if !trimmed.is_empty() {
        parts.push(trimmed.to_string());
    }
}

/// Separates a trailing pseudo-element. Legacy single-colon forms are
/// normalized to the double-colon spelling.
pub fn split_pseudo_element(selector: &str) -> (String, Option<String>) {
    let selector = selector.trim();
    let Some(last_colon) = top_level_chars(selector)
        .filter(|(_, ch)| *ch == ':')
        .map(|(idx, _)| idx)
        .last()
    else {
        return (selector.to_string(), None);
    };
    let name = &selector[last_colon + 1..];
    let (element, pseudo) = if last_colon > 0 && selector[..last_colon].ends_with(':') {
        (
            &selector[..last_colon - 1],
            format!("::{}", name.to_ascii_lowercase()),
        )
    } else if LEGACY_PSEUDO_ELEMENTS
        .iter()
        .any(|legacy| legacy.eq_ignore_ascii_case(name))
    {
        (
            &selector[..last_colon],
            format!("::{}", name.to_ascii_lowercase()),
        )
    } else {
        return (selector.to_string(), None);
    };
    let element = element.trim();
    let element = if element.is_empty() {
        "*".to_string()
    } else {
        element.to_string()
    };
    (element, Some(pseudo))
}

fn top_level_chars(text: &str) -> impl Iterator<Item = (usize, char)> + '_ {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    text.char_indices().filter(move |(_, ch)| {
        let ch = *ch;
        if escaped {
            escaped = false;
            return false;
        }
        if ch == '\\' {
            escaped = true;
            return false;
        }
        if let Some(open) = quote {
            if ch == open {
                quote = None;
            }
            return false;
        }
        match ch {
            '"' | '\'' => {
                quote = Some(ch);
                false
            }
            '(' | '[' => {
                depth += 1;
                false
            }
            ')' | ']' => {
                depth = depth.saturating_sub(1);
                false
            }
            _ => depth == 0,
        }
    })
}
