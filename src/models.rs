use std::collections::BTreeSet;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Coarse funnel position of a lead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StatusCategory {
    Closed,
    InProgress,
    Lost,
}

impl StatusCategory {
    pub const ALL: [StatusCategory; 3] = [
        StatusCategory::Closed,
        StatusCategory::InProgress,
        StatusCategory::Lost,
    ];

    pub fn label(self) -> &'static str {
        match self {
            StatusCategory::Closed => "Closed",
            StatusCategory::InProgress => "In progress",
            StatusCategory::Lost => "Lost",
        }
    }
}

impl fmt::Display for StatusCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One registry entry: a salesperson's sheet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceEntry {
    pub id: String,
    pub sheet_id: String,
}

/// Normalized lead. Only built for rows that have a date and a name or phone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalLead {
    pub date: NaiveDate,
    pub subject_name: String,
    pub phone: String,
    pub status_raw: String,
    pub status_category: StatusCategory,
    pub source_id: String,
    pub tab_name: String,
}

impl CanonicalLead {
    pub fn has_name(&self) -> bool {
        has_text(&self.subject_name)
    }

    pub fn has_phone(&self) -> bool {
        has_text(&self.phone)
    }

    pub fn has_status(&self) -> bool {
        !self.status_raw.trim().is_empty()
    }
}

/// Shared by the retention rule and the KPI counts.
pub fn has_text(value: &str) -> bool {
    !value.trim().is_empty()
}

/// Conjunctive filter: source subset AND inclusive date range.
/// An empty `sources` set passes every source.
#[derive(Debug, Clone)]
pub struct FilterCriteria {
    pub sources: BTreeSet<String>,
    pub date_from: NaiveDate,
    pub date_to: NaiveDate,
}

impl FilterCriteria {
    pub fn matches(&self, lead: &CanonicalLead) -> bool {
        (self.sources.is_empty() || self.sources.contains(&lead.source_id))
            && lead.date >= self.date_from
            && lead.date <= self.date_to
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct KpiSnapshot {
    pub total: usize,
    pub closed_count: usize,
    pub lost_count: usize,
    pub in_progress_count: usize,
    pub has_name_count: usize,
    pub has_phone_count: usize,
    pub has_status_count: usize,
    pub conversion_rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SourceMetrics {
    pub total: usize,
    pub closed: usize,
    pub lost: usize,
    pub conversion_rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lead(source: &str, date: NaiveDate) -> CanonicalLead {
        CanonicalLead {
            date,
            subject_name: "Ana".into(),
            phone: String::new(),
            status_raw: "PAGO".into(),
            status_category: StatusCategory::Closed,
            source_id: source.into(),
            tab_name: "Setembro".into(),
        }
    }

    #[test]
    fn filter_empty_sources_passes_all() {
        let d = NaiveDate::from_ymd_opt(2024, 9, 5).unwrap();
        let f = FilterCriteria {
            sources: BTreeSet::new(),
            date_from: d,
            date_to: d,
        };
        assert!(f.matches(&lead("Tayssa", d)));
        assert!(f.matches(&lead("Felipe", d)));
    }

    #[test]
    fn filter_range_is_inclusive() {
        let from = NaiveDate::from_ymd_opt(2024, 9, 1).unwrap();
        let to = NaiveDate::from_ymd_opt(2024, 9, 30).unwrap();
        let f = FilterCriteria {
            sources: ["Tayssa".to_string()].into_iter().collect(),
            date_from: from,
            date_to: to,
        };
        assert!(f.matches(&lead("Tayssa", from)));
        assert!(f.matches(&lead("Tayssa", to)));
        assert!(!f.matches(&lead("Tayssa", NaiveDate::from_ymd_opt(2024, 10, 1).unwrap())));
        assert!(!f.matches(&lead("Felipe", from)));
    }

    #[test]
    fn blank_fields_do_not_count() {
        let mut l = lead("x", NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        l.subject_name = "  ".into();
        assert!(!l.has_name());
        assert!(!l.has_phone());
        assert!(l.has_status());

        l.subject_name = "nan".into();
        assert!(l.has_name());
    }
}
