use sha2::{Digest, Sha256};

pub const DEFAULT_ID_PREFIX: &str = "anchorfill-";

/// Mints the reserved identifiers (attribute names, custom property names,
/// parsed-value keys) used by one polyfill pass.
///
/// A generator is owned by a single pass, so two passes over different
/// documents never share a counter.
#[derive(Debug, Clone)]
pub struct IdGenerator {
    prefix: String,
    next: u64,
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_ID_PREFIX)
    }
}

impl IdGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            next: 0,
        }
    }

    /// Builds a generator whose prefix is derived from a SHA-256 digest of
    /// `seed`, so identifiers are stable for a given document yet unlikely to
    /// appear in author CSS.
    pub fn seeded(seed: &[u8]) -> Self {
        let digest = Sha256::digest(seed);
        let mut prefix = String::from("af");
        for byte in digest.iter().take(6) {
            prefix.push_str(&format!("{:02x}", byte));
        }
        prefix.push('-');
        Self::new(prefix)
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn uuid(&mut self) -> String {
        let id = format!("{}{}", self.prefix, self.next);
        self.next += 1;
        id
    }

    pub fn css_id(&mut self, name: &str) -> String {
        format!("{}-{}", name, self.uuid())
    }

    pub fn attribute(&mut self, name: &str) -> String {
        format!("data-{}", self.css_id(name))
    }

    pub fn property(&mut self, name: &str) -> String {
        format!("--{}", self.css_id(name))
    }
}

pub(crate) fn is_valid_prefix(prefix: &str) -> bool {
    let mut chars = prefix.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    if first.is_ascii_digit() {
        return false;
    }
    prefix
        .chars()
        .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
}
