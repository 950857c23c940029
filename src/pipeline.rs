use std::path::Path;

use anyhow::{Context, Result};
use chrono::{Local, Utc};
use rayon::prelude::*;
use rusqlite::Connection;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::db;
use crate::demo;
use crate::export;
use crate::fetcher::{self, Attempt};
use crate::parser::normalize::NormalizeStats;
use crate::parser::process_table;
use crate::parser::status::StatusClassifier;
use crate::parser::table::RawTable;
use crate::report::LeadDataset;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Origin {
    Fetched { url: String },
    Cached { url: String, age_secs: i64 },
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceReport {
    pub source_id: String,
    pub origin: Origin,
    pub attempts: Vec<Attempt>,
    pub stats: Option<NormalizeStats>,
    /// Date column parsed for too few rows; the layout may be shifted.
    pub layout_warning: bool,
}

pub struct LoadOutcome {
    pub dataset: LeadDataset,
    pub reports: Vec<SourceReport>,
    /// True when every source failed and synthetic data was substituted.
    pub demo: bool,
}

/// Cache lookup, fetch of misses, normalization and merge for the
/// configured tab. Neither source failures nor cache failures abort the load;
/// a broken cache only costs the caching.
pub async fn load_dataset(settings: &Settings, conn: &Connection, refresh: bool) -> Result<LoadOutcome> {
    let tab = settings.tab.as_str();
    let now = Utc::now().timestamp();

    if refresh {
        match db::invalidate(conn, Some(tab)) {
            Ok(removed) => info!("Refresh requested: dropped {} cached sheets for {}", removed, tab),
            Err(e) => warn!("Cache invalidation failed, refetching anyway: {:#}", e),
        }
    }

    // Phase 1: cache
    let mut tables: Vec<Option<RawTable>> = vec![None; settings.sources.len()];
    let mut reports: Vec<SourceReport> = Vec::with_capacity(settings.sources.len());
    let mut misses = Vec::new();

    for (idx, source) in settings.sources.iter().enumerate() {
        let cached = db::cached_sheet(conn, &source.id, tab, settings.cache_ttl_secs, now)
            .unwrap_or_else(|e| {
                warn!("{}: cache read failed, treating as miss: {:#}", source.id, e);
                None
            });
        match cached.and_then(|c| RawTable::from_csv(&c.body).ok().map(|t| (c, t))) {
            Some((c, table)) => {
                debug!("{}: cache hit ({}s old)", source.id, c.age_secs);
                tables[idx] = Some(table);
                reports.push(SourceReport {
                    source_id: source.id.clone(),
                    origin: Origin::Cached {
                        url: c.url,
                        age_secs: c.age_secs,
                    },
                    attempts: Vec::new(),
                    stats: None,
                    layout_warning: false,
                });
            }
            None => {
                misses.push(idx);
                reports.push(SourceReport {
                    source_id: source.id.clone(),
                    origin: Origin::Failed,
                    attempts: Vec::new(),
                    stats: None,
                    layout_warning: false,
                });
            }
        }
    }

    // Phase 2: fetch misses
    let client = if misses.is_empty() {
        None
    } else {
        fetcher::build_client(&settings.fetch)
            .map_err(|e| warn!("HTTP client unavailable, {} sources not fetched: {:#}", misses.len(), e))
            .ok()
    };
    if let Some(client) = client {
        let to_fetch: Vec<_> = misses.iter().map(|&i| settings.sources[i].clone()).collect();
        let fetched = fetcher::fetch_sources(&client, &settings.fetch, &to_fetch, tab).await;

        for fetch in fetched {
            let Some(idx) = settings.sources.iter().position(|s| s.id == fetch.source_id) else {
                continue;
            };
            let rows: Vec<db::AttemptRow> = fetch
                .attempts
                .iter()
                .map(|a| db::AttemptRow {
                    source_id: &fetch.source_id,
                    tab,
                    url: &a.url,
                    error: a.error.as_deref(),
                    latency_ms: a.latency_ms,
                })
                .collect();
            if let Err(e) = db::log_attempts(conn, &rows, now) {
                warn!("{}: could not log fetch attempts: {:#}", fetch.source_id, e);
            }

            let report = &mut reports[idx];
            report.attempts = fetch.attempts.clone();
            if let Some(sheet) = fetch.sheet {
                if let Err(e) = db::store_sheet(conn, &fetch.source_id, tab, &sheet.url, &sheet.body, now) {
                    warn!("{}: could not cache sheet: {:#}", fetch.source_id, e);
                }
                report.origin = Origin::Fetched { url: sheet.url };
                tables[idx] = Some(sheet.table);
            }
        }
    }

    // Phase 3: normalize, order-preserving
    let normalized: Vec<Option<(Vec<_>, NormalizeStats)>> = settings
        .sources
        .par_iter()
        .zip(tables.par_iter())
        .map(|(source, table)| {
            table
                .as_ref()
                .map(|t| process_table(t, &source.id, tab, &settings.rules))
        })
        .collect();

    let mut per_source = Vec::with_capacity(normalized.len());
    for (report, result) in reports.iter_mut().zip(normalized) {
        if let Some((leads, stats)) = result {
            report.layout_warning = log_stats(&report.source_id, &stats, settings.rules.layout_warn_ratio);
            report.stats = Some(stats);
            per_source.push(leads);
        }
    }

    let any_table = reports.iter().any(|r| r.origin != Origin::Failed);
    let dataset = LeadDataset::aggregate(per_source);
    info!(
        "Dataset for {}: {} leads from {} sources (rules v{})",
        tab,
        dataset.len(),
        reports.iter().filter(|r| r.stats.is_some()).count(),
        settings.rules.version
    );

    if !any_table {
        warn!("No source could be read for {}", tab);
        if settings.demo_fallback {
            warn!("Falling back to demonstration data");
            return Ok(LoadOutcome {
                dataset: demo_dataset(settings),
                reports,
                demo: true,
            });
        }
    }

    Ok(LoadOutcome {
        dataset,
        reports,
        demo: false,
    })
}

/// Returns true when the layout-drift warning was emitted.
fn log_stats(source_id: &str, stats: &NormalizeStats, warn_ratio: f64) -> bool {
    if stats.too_narrow {
        warn!(
            "{}: only {} non-empty columns, source skipped",
            source_id, stats.columns_kept
        );
        return false;
    }
    info!(
        "{}: {} rows -> {} leads ({} header, {} undated, {} without contact)",
        source_id,
        stats.rows_in,
        stats.retained,
        stats.header_rows,
        stats.dropped_no_date,
        stats.dropped_no_contact
    );
    let ratio = stats.date_parse_ratio();
    if ratio < warn_ratio {
        warn!(
            "{}: only {:.0}% of rows have a parseable date in the date column; layout may be shifted",
            source_id,
            ratio * 100.0
        );
        return true;
    }
    false
}

pub fn demo_dataset(settings: &Settings) -> LeadDataset {
    let ids: Vec<String> = settings.sources.iter().map(|s| s.id.clone()).collect();
    let classifier = StatusClassifier::new(&settings.rules.status);
    let leads = demo::generate(
        &mut rand::rng(),
        &ids,
        &settings.tab,
        Local::now().date_naive(),
        demo::DEMO_LEADS,
        &classifier,
    );
    LeadDataset::from_leads(leads)
}

/// Offline mode: a previously exported CSV instead of the live sources.
pub fn load_exported(path: &Path) -> Result<LeadDataset> {
    let file = std::fs::File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    let leads = export::read_csv(file)?;
    info!("Loaded {} leads from {:?}", leads.len(), path);
    Ok(LeadDataset::from_leads(leads))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{SourceEntry, StatusCategory};
    use crate::report::{compute_kpis, group_by_source};
    use httpmock::prelude::*;

    const SOURCE_A: &str = "\
Data,Aluno,Telefone,Obs,Status
05/09/2024,Ana Souza,(11) 98888-1111,,PAGO
06/09/2024,Bruno Lima,(11) 97777-2222,,PAGO
07/09/2024,Carla Dias,,retornar,NÃO RESPONDE
";

    fn settings(base: String) -> Settings {
        let mut s = Settings::default();
        s.fetch.base_url = base;
        s.fetch.timeout_secs = 5;
        s.sources = vec![
            SourceEntry { id: "A".into(), sheet_id: "sheet-a".into() },
            SourceEntry { id: "B".into(), sheet_id: "sheet-b".into() },
        ];
        s
    }

    fn mem() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        db::init_schema(&conn).unwrap();
        conn
    }

    #[tokio::test]
    async fn one_source_ok_one_failed() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/spreadsheets/d/sheet-a/export");
                then.status(200).body(SOURCE_A);
            })
            .await;

        let s = settings(server.base_url());
        let conn = mem();
        let out = load_dataset(&s, &conn, false).await.unwrap();

        assert!(!out.demo);
        assert_eq!(out.dataset.len(), 3);
        let k = compute_kpis(&out.dataset);
        assert_eq!((k.total, k.closed_count, k.lost_count), (3, 2, 1));
        assert!((k.conversion_rate - 66.666).abs() < 0.1);

        let by_source = group_by_source(&out.dataset);
        assert_eq!(by_source.keys().collect::<Vec<_>>(), vec!["A"]);

        assert_eq!(out.reports.len(), 2);
        assert!(matches!(out.reports[0].origin, Origin::Fetched { .. }));
        assert_eq!(out.reports[1].origin, Origin::Failed);
        assert_eq!(out.reports[1].attempts.len(), 3);
        assert!(out.dataset.leads().iter().all(|l| l.source_id == "A"));
        assert!(!out.reports[0].layout_warning);
    }

    #[tokio::test]
    async fn read_only_cache_keeps_fetched_leads() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/spreadsheets/d/sheet-a/export");
                then.status(200).body(SOURCE_A);
            })
            .await;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("leads.sqlite");
        {
            let conn = Connection::open(&path).unwrap();
            db::init_schema(&conn).unwrap();
        }
        let conn = Connection::open_with_flags(&path, rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY).unwrap();

        let mut s = settings(server.base_url());
        s.sources.truncate(1);

        let out = load_dataset(&s, &conn, false).await.unwrap();
        assert!(!out.demo);
        assert_eq!(out.dataset.len(), 3);
        assert!(matches!(out.reports[0].origin, Origin::Fetched { .. }));

        // Nothing was stored, so a refresh goes back to the network
        let again = load_dataset(&s, &conn, true).await.unwrap();
        assert_eq!(again.dataset.len(), 3);
        mock.assert_hits_async(2).await;
    }

    #[tokio::test]
    async fn shifted_columns_flag_layout_warning() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/spreadsheets/d/sheet-a/export");
                then.status(200)
                    .body("Ana,05/09/2024,1199,,PAGO\nBia,06/09/2024,1188,,PAGO\n");
            })
            .await;

        let mut s = settings(server.base_url());
        s.sources.truncate(1);
        let conn = mem();
        let out = load_dataset(&s, &conn, false).await.unwrap();

        assert!(!out.demo);
        assert!(out.dataset.is_empty());
        assert!(out.reports[0].layout_warning);
        assert_eq!(out.reports[0].stats.as_ref().unwrap().dropped_no_date, 2);
    }

    #[test]
    fn drift_warning_threshold() {
        let mut stats = NormalizeStats {
            rows_in: 4,
            columns_kept: 4,
            retained: 1,
            dropped_no_date: 3,
            ..NormalizeStats::default()
        };
        assert!(log_stats("A", &stats, 0.5));
        stats.retained = 2;
        stats.dropped_no_date = 2;
        assert!(!log_stats("A", &stats, 0.5));
        stats.too_narrow = true;
        assert!(!log_stats("A", &stats, 0.5));
    }

    #[tokio::test]
    async fn second_load_served_from_cache_until_refresh() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/spreadsheets/d/sheet-a/export");
                then.status(200).body(SOURCE_A);
            })
            .await;

        let mut s = settings(server.base_url());
        s.sources.truncate(1);
        let conn = mem();

        load_dataset(&s, &conn, false).await.unwrap();
        let cached = load_dataset(&s, &conn, false).await.unwrap();
        assert!(matches!(cached.reports[0].origin, Origin::Cached { .. }));
        assert_eq!(cached.dataset.len(), 3);
        mock.assert_hits_async(1).await;

        let refreshed = load_dataset(&s, &conn, true).await.unwrap();
        assert!(matches!(refreshed.reports[0].origin, Origin::Fetched { .. }));
        mock.assert_hits_async(2).await;
    }

    #[tokio::test]
    async fn all_failed_falls_back_to_demo() {
        let server = MockServer::start_async().await;
        let s = settings(server.base_url());
        let conn = mem();
        let out = load_dataset(&s, &conn, false).await.unwrap();
        assert!(out.demo);
        assert_eq!(out.dataset.len(), demo::DEMO_LEADS);
        assert!(out.reports.iter().all(|r| r.origin == Origin::Failed));
    }

    #[tokio::test]
    async fn all_failed_without_fallback_is_empty() {
        let server = MockServer::start_async().await;
        let mut s = settings(server.base_url());
        s.demo_fallback = false;
        let conn = mem();
        let out = load_dataset(&s, &conn, false).await.unwrap();
        assert!(!out.demo);
        assert!(out.dataset.is_empty());
    }

    #[tokio::test]
    async fn retention_holds_for_every_loaded_lead() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/spreadsheets/d/sheet-a/export");
                then.status(200)
                    .body(format!("{}sem data,Zé,1199,,PAGO\n08/09/2024,,,,PERDIDO\n", SOURCE_A));
            })
            .await;
        let s = settings(server.base_url());
        let conn = mem();
        let out = load_dataset(&s, &conn, false).await.unwrap();
        assert_eq!(out.dataset.len(), 3);
        assert!(out
            .dataset
            .leads()
            .iter()
            .all(|l| !l.subject_name.is_empty() || !l.phone.is_empty()));
        let stats = out.reports[0].stats.as_ref().unwrap();
        assert_eq!(stats.dropped_no_date, 1);
        assert_eq!(stats.dropped_no_contact, 1);
        assert!(out
            .dataset
            .leads()
            .iter()
            .any(|l| l.status_category == StatusCategory::Lost));
    }
}
