//! Output column layout for a merge

use crate::normalize::HeaderNormalizer;
use crate::table::KEY_COLUMN;

/// Provenance-prefixed output column name
pub fn output_column(file_base_name: &str, sheet_name: &str, header: &str) -> String {
    format!("{}:{}:{}", file_base_name, sheet_name, header)
}

/// The non-key columns one sheet contributes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetColumns {
    /// Output position of this sheet's first column
    pub offset: usize,
    /// Header positions in the sheet, in sheet order, excluding the key column
    pub sources: Vec<usize>,
}

impl SheetColumns {
    /// Output positions covered by this sheet
    pub fn range(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.sources.len()
    }

    /// `(output column, sheet column)` pairs
    pub fn targets(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.sources
            .iter()
            .enumerate()
            .map(move |(j, &source)| (self.offset + j, source))
    }
}

/// Ordered output columns plus where each sheet's block starts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputSchema {
    pub columns: Vec<String>,
    pub sheets: Vec<SheetColumns>,
}

impl OutputSchema {
    pub fn width(&self) -> usize {
        self.columns.len()
    }
}

/// Builds the output schema sheet by sheet
///
/// `Key` comes first, then each sheet's headers in original order. A header
/// whose normalized form equals the normalized key is left out. Headers are
/// tracked by position, so a sheet with two identical headers contributes
/// two columns with the same name. Two files
/// with the same base name and sheet name yield duplicate column names; no
/// attempt is made to disambiguate them.
pub struct OutputSchemaBuilder<'a> {
    normalizer: &'a dyn HeaderNormalizer,
    normalized_key: String,
    columns: Vec<String>,
    sheets: Vec<SheetColumns>,
}

impl<'a> OutputSchemaBuilder<'a> {
    pub fn new(normalizer: &'a dyn HeaderNormalizer, key: &str) -> Self {
        Self {
            normalized_key: normalizer.normalize(key),
            normalizer,
            columns: vec![KEY_COLUMN.to_string()],
            sheets: Vec::new(),
        }
    }

    pub fn add_sheet(&mut self, file_base_name: &str, sheet_name: &str, headers: &[String]) {
        let offset = self.columns.len();
        let mut sources = Vec::new();
        for (idx, header) in headers.iter().enumerate() {
            if self.normalizer.normalize(header) != self.normalized_key {
                self.columns
                    .push(output_column(file_base_name, sheet_name, header));
                sources.push(idx);
            }
        }
        self.sheets.push(SheetColumns { offset, sources });
    }

    pub fn build(self) -> OutputSchema {
        OutputSchema {
            columns: self.columns,
            sheets: self.sheets,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::UnicodeHeaderNormalizer;

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_key_first_then_sheets_in_order() {
        let mut builder = OutputSchemaBuilder::new(&UnicodeHeaderNormalizer, "id");
        builder.add_sheet("a", "SheetA", &headers(&["ID", "Name"]));
        builder.add_sheet("b", "SheetB", &headers(&["City", " Id "]));
        let schema = builder.build();

        assert_eq!(
            schema.columns,
            vec!["Key", "a:SheetA:Name", "b:SheetB:City"]
        );
        assert_eq!(schema.sheets[0].offset, 1);
        assert_eq!(schema.sheets[1].offset, 2);
        assert_eq!(schema.sheets[1].range(), 2..3);
        assert_eq!(schema.sheets[0].sources, vec![1]);
        assert_eq!(schema.sheets[1].sources, vec![0]);
    }

    #[test]
    fn test_duplicate_headers_keep_positions() {
        let mut builder = OutputSchemaBuilder::new(&UnicodeHeaderNormalizer, "id");
        builder.add_sheet("a", "S", &headers(&["Name", "ID", "Name"]));
        let schema = builder.build();

        assert_eq!(schema.columns, vec!["Key", "a:S:Name", "a:S:Name"]);
        let targets: Vec<(usize, usize)> = schema.sheets[0].targets().collect();
        assert_eq!(targets, vec![(1, 0), (2, 2)]);
    }

    #[test]
    fn test_original_header_text_kept() {
        let mut builder = OutputSchemaBuilder::new(&UnicodeHeaderNormalizer, "código");
        builder.add_sheet("clientes", "2024", &headers(&["CÓDIGO", "Nombre  Completo"]));
        let schema = builder.build();

        assert_eq!(schema.columns, vec!["Key", "clientes:2024:Nombre  Completo"]);
    }

    #[test]
    fn test_same_base_and_sheet_collide() {
        let mut builder = OutputSchemaBuilder::new(&UnicodeHeaderNormalizer, "id");
        builder.add_sheet("data", "S", &headers(&["ID", "X"]));
        builder.add_sheet("data", "S", &headers(&["ID", "X"]));
        let schema = builder.build();

        assert_eq!(schema.width(), 3);
        assert_eq!(schema.columns[1], schema.columns[2]);
    }
}
