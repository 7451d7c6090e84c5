//! Key occurrence indexing
//!
//! Each sheet gets its own key → rows index. Rows sharing a key are kept in
//! input order and never collapsed. Rows whose key cell is blank are dropped
//! here, so they contribute nothing to the merged output: neither a key nor
//! any of their other values. That loss is intentional; the dropped count is
//! kept for reporting.

use crate::table::Row;
use std::collections::{BTreeMap, HashMap};

/// Trimmed key of a row, `None` when the key cell is missing or blank
pub fn row_key(row: &Row, key_column: usize) -> Option<&str> {
    row.get(key_column)
        .map(str::trim)
        .filter(|key| !key.is_empty())
}

/// Key → ordered rows for one sheet
#[derive(Debug, Clone)]
pub struct SheetKeyIndex {
    key_column: usize,
    occurrences: HashMap<String, Vec<Row>>,
    rows_seen: usize,
    keyless_rows: usize,
}

impl SheetKeyIndex {
    /// Start an empty index keyed on the cell at `key_column`
    pub fn new(key_column: usize) -> Self {
        Self {
            key_column,
            occurrences: HashMap::new(),
            rows_seen: 0,
            keyless_rows: 0,
        }
    }

    /// Build an index over a complete set of rows
    pub fn from_rows(key_column: usize, rows: impl IntoIterator<Item = Row>) -> Self {
        let mut index = Self::new(key_column);
        index.extend(rows);
        index
    }

    pub fn push(&mut self, row: Row) {
        self.rows_seen += 1;
        let Some(key) = row_key(&row, self.key_column) else {
            self.keyless_rows += 1;
            return;
        };
        let key = key.to_string();
        self.occurrences.entry(key).or_default().push(row);
    }

    pub fn extend(&mut self, rows: impl IntoIterator<Item = Row>) {
        for row in rows {
            self.push(row);
        }
    }

    /// The `n`-th row (0-based) carrying `key`
    pub fn occurrence(&self, key: &str, n: usize) -> Option<&Row> {
        self.occurrences.get(key).and_then(|rows| rows.get(n))
    }

    /// Number of rows carrying `key`
    pub fn count(&self, key: &str) -> usize {
        self.occurrences.get(key).map_or(0, Vec::len)
    }

    /// `(key, occurrence count)` pairs, unordered
    pub fn counts(&self) -> impl Iterator<Item = (&str, usize)> {
        self.occurrences.iter().map(|(k, v)| (k.as_str(), v.len()))
    }

    pub fn distinct_keys(&self) -> usize {
        self.occurrences.len()
    }

    /// Rows pushed, including keyless ones
    pub fn rows_seen(&self) -> usize {
        self.rows_seen
    }

    /// Rows dropped because their key was blank
    pub fn keyless_rows(&self) -> usize {
        self.keyless_rows
    }
}

/// Key → occurrence count for one sheet, without row contents
#[derive(Debug, Clone)]
pub struct SheetKeyCounts {
    key_column: usize,
    counts: HashMap<String, usize>,
    rows_seen: usize,
    keyless_rows: usize,
}

impl SheetKeyCounts {
    pub fn new(key_column: usize) -> Self {
        Self {
            key_column,
            counts: HashMap::new(),
            rows_seen: 0,
            keyless_rows: 0,
        }
    }

    pub fn push(&mut self, row: &Row) {
        self.rows_seen += 1;
        match row_key(row, self.key_column) {
            Some(key) => {
                if let Some(count) = self.counts.get_mut(key) {
                    *count += 1;
                } else {
                    self.counts.insert(key.to_string(), 1);
                }
            }
            None => self.keyless_rows += 1,
        }
    }

    pub fn count(&self, key: &str) -> usize {
        self.counts.get(key).copied().unwrap_or(0)
    }

    pub fn counts(&self) -> impl Iterator<Item = (&str, usize)> {
        self.counts.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn distinct_keys(&self) -> usize {
        self.counts.len()
    }

    pub fn rows_seen(&self) -> usize {
        self.rows_seen
    }

    pub fn keyless_rows(&self) -> usize {
        self.keyless_rows
    }
}

/// Global key → maximum occurrence count across sheets
///
/// Keys iterate in byte-wise ascending order, which is the output key order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaxOccurrences {
    max: BTreeMap<String, usize>,
}

impl MaxOccurrences {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, key: &str, count: usize) {
        if let Some(current) = self.max.get_mut(key) {
            *current = (*current).max(count);
        } else {
            self.max.insert(key.to_string(), count);
        }
    }

    pub fn observe_all<'a>(&mut self, counts: impl IntoIterator<Item = (&'a str, usize)>) {
        for (key, count) in counts {
            self.observe(key, count);
        }
    }

    /// Output rows produced by `key`: `max(1, max occurrence)`
    pub fn rows_for(&self, key: &str) -> usize {
        self.max.get(key).copied().unwrap_or(0).max(1)
    }

    /// Keys with their output row counts, in output order
    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.max.iter().map(|(k, v)| (k.as_str(), (*v).max(1)))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.max.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.max.len()
    }

    pub fn is_empty(&self) -> bool {
        self.max.is_empty()
    }

    /// Total output rows across every key
    pub fn total_rows(&self) -> usize {
        self.iter().map(|(_, rows)| rows).sum()
    }
}

/// Collects per-sheet indices while maintaining the global maximum
#[derive(Debug, Default)]
pub struct KeyIndexBuilder {
    sheets: Vec<SheetKeyIndex>,
    max: MaxOccurrences,
}

impl KeyIndexBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a finished sheet index; sheets keep the order they are added in
    pub fn add_sheet(&mut self, index: SheetKeyIndex) {
        self.max.observe_all(index.counts());
        self.sheets.push(index);
    }

    pub fn finish(self) -> KeyIndex {
        KeyIndex {
            sheets: self.sheets,
            max: self.max,
        }
    }
}

/// Every sheet's index plus the global maximum, ready for emission
#[derive(Debug)]
pub struct KeyIndex {
    pub sheets: Vec<SheetKeyIndex>,
    pub max: MaxOccurrences,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: Option<&str>, name: &str) -> Row {
        Row::from_values([id, Some(name)])
    }

    #[test]
    fn test_row_key_trims() {
        assert_eq!(row_key(&row(Some("  42 "), "x"), 0), Some("42"));
        assert_eq!(row_key(&row(Some("   "), "x"), 0), None);
        assert_eq!(row_key(&row(None, "x"), 0), None);
        assert_eq!(row_key(&row(Some("1"), "x"), 5), None);
    }

    #[test]
    fn test_duplicates_kept_in_order() {
        let index = SheetKeyIndex::from_rows(
            0,
            vec![row(Some("1"), "first"), row(Some("2"), "other"), row(Some("1"), "second")],
        );

        assert_eq!(index.count("1"), 2);
        assert_eq!(index.occurrence("1", 0).unwrap().get(1), Some("first"));
        assert_eq!(index.occurrence("1", 1).unwrap().get(1), Some("second"));
        assert!(index.occurrence("1", 2).is_none());
        assert_eq!(index.distinct_keys(), 2);
    }

    #[test]
    fn test_keyless_rows_dropped() {
        let index = SheetKeyIndex::from_rows(
            0,
            vec![row(Some(""), "lost"), row(Some(" "), "lost"), row(Some("7"), "kept")],
        );

        assert_eq!(index.rows_seen(), 3);
        assert_eq!(index.keyless_rows(), 2);
        assert_eq!(index.distinct_keys(), 1);
    }

    #[test]
    fn test_counts_match_index() {
        let rows = vec![row(Some("1"), "a"), row(Some("1 "), "b"), row(None, "c")];
        let index = SheetKeyIndex::from_rows(0, rows.clone());
        let mut counts = SheetKeyCounts::new(0);
        for r in &rows {
            counts.push(r);
        }

        assert_eq!(counts.count("1"), index.count("1"));
        assert_eq!(counts.keyless_rows(), index.keyless_rows());
        assert_eq!(counts.distinct_keys(), 1);
    }

    #[test]
    fn test_max_occurrences_across_sheets() {
        let mut builder = KeyIndexBuilder::new();
        builder.add_sheet(SheetKeyIndex::from_rows(
            0,
            vec![row(Some("1"), "Ann"), row(Some("2"), "Bob")],
        ));
        builder.add_sheet(SheetKeyIndex::from_rows(
            0,
            vec![row(Some("1"), "NYC"), row(Some("1"), "LA"), row(Some("3"), "SF")],
        ));
        let index = builder.finish();

        let keys: Vec<&str> = index.max.keys().collect();
        assert_eq!(keys, vec!["1", "2", "3"]);
        assert_eq!(index.max.rows_for("1"), 2);
        assert_eq!(index.max.rows_for("2"), 1);
        assert_eq!(index.max.total_rows(), 4);
    }

    #[test]
    fn test_keys_sort_bytewise() {
        let mut max = MaxOccurrences::new();
        for key in ["b", "B", "10", "9", "a"] {
            max.observe(key, 1);
        }
        let keys: Vec<&str> = max.keys().collect();
        assert_eq!(keys, vec!["10", "9", "B", "a", "b"]);
    }
}
