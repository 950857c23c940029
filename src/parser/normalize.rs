use chrono::NaiveDate;
use serde::Serialize;

use super::dates::parse_date_in_year;
use super::header::strip_header_rows;
use super::status::StatusClassifier;
use super::table::RawTable;
use crate::config::Rules;
use crate::models::{has_text, CanonicalLead};

/// One mapped row before the retention rule is applied.
#[derive(Debug, Clone, PartialEq)]
pub struct RowCandidate {
    pub date: Option<NaiveDate>,
    pub subject_name: String,
    pub phone: String,
    pub status_raw: String,
}

impl RowCandidate {
    /// A lead needs a date and at least a name or a phone.
    pub fn into_lead(self, classifier: &StatusClassifier, source_id: &str, tab: &str) -> Option<CanonicalLead> {
        let date = self.date?;
        if !has_text(&self.subject_name) && !has_text(&self.phone) {
            return None;
        }
        let status_category = classifier.classify(Some(&self.status_raw));
        Some(CanonicalLead {
            date,
            subject_name: self.subject_name,
            phone: self.phone,
            status_raw: self.status_raw,
            status_category,
            source_id: source_id.to_string(),
            tab_name: tab.to_string(),
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NormalizeStats {
    pub rows_in: usize,
    pub columns_kept: usize,
    pub header_rows: usize,
    pub too_narrow: bool,
    pub dropped_no_date: usize,
    pub dropped_no_contact: usize,
    pub retained: usize,
}

impl NormalizeStats {
    /// Share of non-blank data rows whose date cell parsed.
    pub fn date_parse_ratio(&self) -> f64 {
        let dated = self.retained + self.dropped_no_contact;
        let considered = dated + self.dropped_no_date;
        if considered == 0 {
            1.0
        } else {
            dated as f64 / considered as f64
        }
    }
}

/// Positional mapping of a pruned, header-stripped grid.
pub fn map_rows(rows: &[Vec<String>], width: usize, rules: &Rules, current_year: i32) -> Vec<RowCandidate> {
    let cols = &rules.columns;
    let status_col = cols.status_column(width);
    let cell = |row: &Vec<String>, idx: usize| row.get(idx).map(|c| c.trim().to_string()).unwrap_or_default();

    rows.iter()
        .map(|row| RowCandidate {
            date: parse_date_in_year(&cell(row, cols.date), current_year),
            subject_name: cell(row, cols.name),
            phone: cell(row, cols.phone),
            status_raw: match status_col {
                Some(idx) => cell(row, idx),
                None => cols.default_status.clone(),
            },
        })
        .collect()
}

/// Raw grid to canonical leads: prune blank columns, reject narrow tables,
/// strip header rows, map by position, then keep only valid leads.
pub fn normalize(
    table: &RawTable,
    source_id: &str,
    tab: &str,
    rules: &Rules,
    classifier: &StatusClassifier,
    current_year: i32,
) -> (Vec<CanonicalLead>, NormalizeStats) {
    let mut stats = NormalizeStats {
        rows_in: table.len(),
        ..Default::default()
    };

    let pruned = table.without_empty_columns();
    let width = pruned.width();
    stats.columns_kept = width;
    if width < rules.columns.min_columns {
        stats.too_narrow = true;
        return (Vec::new(), stats);
    }

    let (rows, removed) = strip_header_rows(
        &pruned.rows,
        &rules.header_keywords,
        rules.header_scan_rows,
        rules.header_min_matches,
    );
    stats.header_rows = removed;

    let mut leads = Vec::with_capacity(rows.len());
    for candidate in map_rows(&rows, width, rules, current_year) {
        let blank = candidate.date.is_none() && candidate.subject_name.is_empty() && candidate.phone.is_empty();
        if candidate.date.is_none() {
            if !blank {
                stats.dropped_no_date += 1;
            }
            continue;
        }
        match candidate.into_lead(classifier, source_id, tab) {
            Some(lead) => leads.push(lead),
            None => stats.dropped_no_contact += 1,
        }
    }
    stats.retained = leads.len();
    (leads, stats)
}
