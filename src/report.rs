use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use serde::Serialize;

use crate::models::{CanonicalLead, FilterCriteria, KpiSnapshot, SourceMetrics, StatusCategory};

/// All leads for one tab, across sources. Always rebuilt, never patched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LeadDataset {
    leads: Vec<CanonicalLead>,
}

impl LeadDataset {
    /// Union of per-source tables; empty tables contribute nothing.
    pub fn aggregate<I>(per_source: I) -> Self
    where
        I: IntoIterator<Item = Vec<CanonicalLead>>,
    {
        LeadDataset {
            leads: per_source.into_iter().flatten().collect(),
        }
    }

    pub fn from_leads(leads: Vec<CanonicalLead>) -> Self {
        LeadDataset { leads }
    }

    pub fn leads(&self) -> &[CanonicalLead] {
        &self.leads
    }

    pub fn len(&self) -> usize {
        self.leads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.leads.is_empty()
    }

    pub fn filter(&self, criteria: &FilterCriteria) -> LeadDataset {
        LeadDataset {
            leads: self
                .leads
                .iter()
                .filter(|l| criteria.matches(l))
                .cloned()
                .collect(),
        }
    }

    /// Earliest and latest lead date, the default filter range.
    pub fn date_bounds(&self) -> Option<(NaiveDate, NaiveDate)> {
        let min = self.leads.iter().map(|l| l.date).min()?;
        let max = self.leads.iter().map(|l| l.date).max()?;
        Some((min, max))
    }

    pub fn source_ids(&self) -> BTreeSet<String> {
        self.leads.iter().map(|l| l.source_id.clone()).collect()
    }
}

fn conversion_rate(closed: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        closed as f64 / total as f64 * 100.0
    }
}

pub fn compute_kpis(dataset: &LeadDataset) -> KpiSnapshot {
    let leads = dataset.leads();
    let count = |cat: StatusCategory| leads.iter().filter(|l| l.status_category == cat).count();

    let total = leads.len();
    let closed_count = count(StatusCategory::Closed);
    KpiSnapshot {
        total,
        closed_count,
        lost_count: count(StatusCategory::Lost),
        in_progress_count: count(StatusCategory::InProgress),
        has_name_count: leads.iter().filter(|l| l.has_name()).count(),
        has_phone_count: leads.iter().filter(|l| l.has_phone()).count(),
        has_status_count: leads.iter().filter(|l| l.has_status()).count(),
        conversion_rate: conversion_rate(closed_count, total),
    }
}

pub fn group_by_source(dataset: &LeadDataset) -> BTreeMap<String, SourceMetrics> {
    let mut groups: BTreeMap<String, SourceMetrics> = BTreeMap::new();
    for lead in dataset.leads() {
        let m = groups.entry(lead.source_id.clone()).or_default();
        m.total += 1;
        match lead.status_category {
            StatusCategory::Closed => m.closed += 1,
            StatusCategory::Lost => m.lost += 1,
            StatusCategory::InProgress => {}
        }
    }
    for m in groups.values_mut() {
        m.conversion_rate = conversion_rate(m.closed, m.total);
    }
    groups
}

/// Leads per day, ascending.
pub fn count_by_date(dataset: &LeadDataset) -> Vec<(NaiveDate, usize)> {
    let mut counts: BTreeMap<NaiveDate, usize> = BTreeMap::new();
    for lead in dataset.leads() {
        *counts.entry(lead.date).or_default() += 1;
    }
    counts.into_iter().collect()
}

pub fn count_by_category(dataset: &LeadDataset) -> Vec<(StatusCategory, usize)> {
    StatusCategory::ALL
        .iter()
        .map(|&cat| {
            let n = dataset
                .leads()
                .iter()
                .filter(|l| l.status_category == cat)
                .count();
            (cat, n)
        })
        .collect()
}

/// Everything the presentation layer needs for one filtered view.
#[derive(Debug, Serialize)]
pub struct ReportOutput {
    pub kpis: KpiSnapshot,
    pub by_source: BTreeMap<String, SourceMetrics>,
    pub by_category: Vec<(StatusCategory, usize)>,
    pub by_date: Vec<(NaiveDate, usize)>,
}

pub fn build_report(dataset: &LeadDataset) -> ReportOutput {
    ReportOutput {
        kpis: compute_kpis(dataset),
        by_source: group_by_source(dataset),
        by_category: count_by_category(dataset),
        by_date: count_by_date(dataset),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    Date,
    Source,
    Name,
    Status,
}

/// Descending by the chosen key, newest/last first.
pub fn sort_leads(leads: &mut [&CanonicalLead], key: SortKey) {
    match key {
        SortKey::Date => leads.sort_by_key(|l| Reverse(l.date)),
        SortKey::Source => leads.sort_by(|a, b| b.source_id.cmp(&a.source_id)),
        SortKey::Name => leads.sort_by(|a, b| b.subject_name.cmp(&a.subject_name)),
        SortKey::Status => leads.sort_by(|a, b| b.status_raw.cmp(&a.status_raw)),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    /// 1-based, clamped into range.
    pub number: usize,
    pub total_pages: usize,
    pub start: usize,
    pub end: usize,
}

pub fn paginate(total: usize, page: usize, per_page: usize) -> Page {
    let per_page = per_page.max(1);
    let total_pages = total.div_ceil(per_page).max(1);
    let number = page.clamp(1, total_pages);
    let start = ((number - 1) * per_page).min(total);
    let end = (start + per_page).min(total);
    Page {
        number,
        total_pages,
        start,
        end,
    }
}

/// 12345 -> "12.345"
pub fn format_number(n: usize) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push('.');
        }
        out.push(c);
    }
    out
}

pub fn format_percent(v: f64) -> String {
    format!("{:.1}%", v)
}
