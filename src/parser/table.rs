use crate::error::FetchError;

/// Rows of unlabeled text cells, exactly as exported. No header assumed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    pub fn new(rows: Vec<Vec<String>>) -> Self {
        RawTable { rows }
    }

    /// Parse a comma-separated body. Ragged rows are allowed.
    pub fn from_csv(body: &str) -> Result<Self, FetchError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(body.as_bytes());

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            rows.push(record.iter().map(|c| c.to_string()).collect());
        }

        let table = RawTable { rows };
        if table.rows.is_empty() || table.width() == 0 {
            return Err(FetchError::EmptyTable);
        }
        Ok(table)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Widest row length.
    pub fn width(&self) -> usize {
        self.rows.iter().map(Vec::len).max().unwrap_or(0)
    }

    /// Cell text, empty for cells past the end of a short row.
    pub fn cell(&self, row: usize, col: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .map(String::as_str)
            .unwrap_or("")
    }

    /// Drop every column that is blank in all rows. Rows come out padded to
    /// the same width.
    pub fn without_empty_columns(&self) -> RawTable {
        let width = self.width();
        let keep: Vec<usize> = (0..width)
            .filter(|&col| (0..self.len()).any(|row| !self.cell(row, col).trim().is_empty()))
            .collect();

        let rows = (0..self.len())
            .map(|row| keep.iter().map(|&col| self.cell(row, col).to_string()).collect())
            .collect();
        RawTable { rows }
    }
}

/// UTF-8 first, Latin-1 when the bytes are not valid UTF-8.
pub fn decode_body(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(s) => s.trim_start_matches('\u{feff}').to_string(),
        Err(_) => bytes.iter().map(|&b| b as char).collect(),
    }
}
