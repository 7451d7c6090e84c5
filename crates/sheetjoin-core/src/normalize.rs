//! Header normalization used to match key columns across sheets
//!
//! The normalized form is only ever used for comparison. Output column names
//! always keep the original header text.

use std::collections::HashMap;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Canonicalizes a header into a matchable form
pub trait HeaderNormalizer: Send + Sync {
    fn normalize(&self, header: &str) -> String;
}

/// Default normalizer: trim, collapse whitespace, lowercase, strip diacritics
#[derive(Debug, Clone, Copy, Default)]
pub struct UnicodeHeaderNormalizer;

impl HeaderNormalizer for UnicodeHeaderNormalizer {
    fn normalize(&self, header: &str) -> String {
        normalize_header(header)
    }
}

/// Normalize a header string
///
/// `" Código  Cliente "` and `"CÓDIGO CLIENTE"` both become `"codigo cliente"`.
pub fn normalize_header(header: &str) -> String {
    let collapsed = header.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .to_lowercase()
        .nfd()
        .filter(|c| !is_combining_mark(*c))
        .nfc()
        .collect()
}

/// Per-sheet map from normalized header to its column position
///
/// When two headers normalize identically, the later one wins.
#[derive(Debug, Clone, Default)]
pub struct NormalizedHeaderIndex {
    map: HashMap<String, usize>,
}

impl NormalizedHeaderIndex {
    pub fn build(headers: &[String], normalizer: &dyn HeaderNormalizer) -> Self {
        let map = headers
            .iter()
            .enumerate()
            .map(|(idx, h)| (normalizer.normalize(h), idx))
            .collect();
        Self { map }
    }

    /// Position of the header matching an already-normalized name
    pub fn position(&self, normalized: &str) -> Option<usize> {
        self.map.get(normalized).copied()
    }
}
