use unicode_normalization::UnicodeNormalization;

use crate::models::NormalizedProduct;

const STOP_WORDS: &[&str] = &[
    "de", "do", "da", "dos", "das", "a", "o", "e", "em", "no", "na", "com", "para", "por", "um",
    "uma",
];

/// Lowercases and removes combining diacritical marks (`ç` -> `c`, `ã` -> `a`).
pub fn fold(text: &str) -> String {
    text.to_lowercase()
        .nfd()
        .filter(|c| !('\u{0300}'..='\u{036f}').contains(c))
        .collect()
}

/// Passes a product when any significant query token appears in its folded
/// name or url.
#[derive(Debug, Clone)]
pub struct RelevanceFilter {
    tokens: Vec<String>,
}

impl RelevanceFilter {
    pub fn new(query: &str) -> Self {
        let tokens = fold(query)
            .split_whitespace()
            .filter(|token| token.chars().count() >= 2 && !STOP_WORDS.contains(token))
            .map(str::to_string)
            .collect();

        Self { tokens }
    }

    pub fn tokens(&self) -> &[String] {
        &self.tokens
    }

    pub fn is_relevant(&self, name: &str, url: &str) -> bool {
        if self.tokens.is_empty() {
            return true;
        }

        let name = fold(name);
        let url = url.to_lowercase();

        self.tokens
            .iter()
            .any(|token| name.contains(token.as_str()) || url.contains(token.as_str()))
    }

    pub fn matches(&self, product: &NormalizedProduct) -> bool {
        self.is_relevant(&product.name, &product.url)
    }
}
