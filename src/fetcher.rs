use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::{Client, StatusCode, Url};
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::config::FetchSettings;
use crate::error::FetchError;
use crate::models::SourceEntry;
use crate::parser::table::{decode_body, RawTable};

/// Outcome of one candidate URL.
#[derive(Debug, Clone, Serialize)]
pub struct Attempt {
    pub url: String,
    pub error: Option<String>,
    pub latency_ms: i64,
}

/// A candidate that produced a usable table. `body` is kept for the cache.
#[derive(Debug, Clone)]
pub struct FetchedSheet {
    pub url: String,
    pub body: String,
    pub table: RawTable,
}

#[derive(Debug, Clone)]
pub struct SourceFetch {
    pub source_id: String,
    pub sheet: Option<FetchedSheet>,
    pub attempts: Vec<Attempt>,
}

pub fn build_client(settings: &FetchSettings) -> Result<Client> {
    let client = Client::builder()
        .timeout(Duration::from_secs(settings.timeout_secs))
        .build()?;
    Ok(client)
}

/// Candidate export URLs, named-tab variants first, grid-id guesses last.
pub fn candidate_urls(
    base_url: &str,
    sheet_id: &str,
    tab: &str,
    gid_guesses: &[u64],
) -> Result<Vec<Url>, FetchError> {
    let base = base_url.trim_end_matches('/');
    let export = format!("{}/spreadsheets/d/{}/export", base, sheet_id);
    let gviz = format!("{}/spreadsheets/d/{}/gviz/tq", base, sheet_id);
    let parse = |url: &str, params: &[(&str, &str)]| {
        Url::parse_with_params(url, params).map_err(|e| FetchError::Url(e.to_string()))
    };

    let mut urls = vec![
        parse(&export, &[("format", "csv"), ("sheet", tab)])?,
        parse(&gviz, &[("tqx", "out:csv"), ("sheet", tab)])?,
    ];
    for gid in gid_guesses {
        urls.push(parse(&export, &[("format", "csv"), ("gid", &gid.to_string())])?);
    }
    Ok(urls)
}

/// Single GET with body validation. Any failure is a reason to move on.
pub async fn fetch_candidate(
    client: &Client,
    url: &Url,
    settings: &FetchSettings,
) -> Result<(String, RawTable), FetchError> {
    let response = client.get(url.clone()).send().await?;
    if response.status() != StatusCode::OK {
        return Err(FetchError::Status(response.status().as_u16()));
    }

    let bytes = response.bytes().await?;
    let body = decode_body(&bytes);
    check_body(&body, settings)?;
    let table = RawTable::from_csv(&body)?;
    Ok((body, table))
}

fn check_body(body: &str, settings: &FetchSettings) -> Result<(), FetchError> {
    if body.len() < settings.min_body_bytes {
        return Err(FetchError::TooShort {
            len: body.len(),
            min: settings.min_body_bytes,
        });
    }
    let lower = body.to_lowercase();
    if let Some(marker) = settings
        .error_markers
        .iter()
        .find(|m| !m.is_empty() && lower.contains(&m.to_lowercase()))
    {
        return Err(FetchError::ErrorMarker(marker.clone()));
    }
    Ok(())
}

/// Walk the candidate list for one source; first usable table wins.
pub async fn fetch_table(
    client: &Client,
    settings: &FetchSettings,
    source: &SourceEntry,
    tab: &str,
) -> SourceFetch {
    let mut attempts = Vec::new();
    let candidates = match candidate_urls(&settings.base_url, &source.sheet_id, tab, &settings.gid_guesses) {
        Ok(c) => c,
        Err(e) => {
            warn!("Cannot build URLs for {}: {}", source.id, e);
            attempts.push(Attempt {
                url: settings.base_url.clone(),
                error: Some(e.to_string()),
                latency_ms: 0,
            });
            return SourceFetch {
                source_id: source.id.clone(),
                sheet: None,
                attempts,
            };
        }
    };

    for url in candidates {
        let start = Instant::now();
        let result = fetch_candidate(client, &url, settings).await;
        let latency_ms = start.elapsed().as_millis() as i64;

        match result {
            Ok((body, table)) => {
                debug!("{}: {} rows from {}", source.id, table.len(), url);
                attempts.push(Attempt {
                    url: url.to_string(),
                    error: None,
                    latency_ms,
                });
                return SourceFetch {
                    source_id: source.id.clone(),
                    sheet: Some(FetchedSheet {
                        url: url.to_string(),
                        body,
                        table,
                    }),
                    attempts,
                };
            }
            Err(e) => {
                debug!("{}: candidate {} rejected: {}", source.id, url, e);
                attempts.push(Attempt {
                    url: url.to_string(),
                    error: Some(e.to_string()),
                    latency_ms,
                });
            }
        }
    }

    warn!(
        "No usable table for {} after {} candidates",
        source.id,
        attempts.len()
    );
    SourceFetch {
        source_id: source.id.clone(),
        sheet: None,
        attempts,
    }
}

/// Fetch sources concurrently; results come back in registration order.
pub async fn fetch_sources(
    client: &Client,
    settings: &FetchSettings,
    sources: &[SourceEntry],
    tab: &str,
) -> Vec<SourceFetch> {
    let total = sources.len();
    if total == 0 {
        return Vec::new();
    }

    let semaphore = Arc::new(Semaphore::new(settings.concurrency.max(1)));
    let pb = ProgressBar::new(total as u64);
    if let Ok(style) = ProgressStyle::default_bar().template("[{elapsed_precise}] {bar:40} {pos}/{len} {msg}") {
        pb.set_style(style.progress_chars("=> "));
    }

    let (tx, mut rx) = tokio::sync::mpsc::channel::<(usize, SourceFetch)>(total);

    for (idx, source) in sources.iter().cloned().enumerate() {
        let client = client.clone();
        let settings = settings.clone();
        let tab = tab.to_string();
        let sem = Arc::clone(&semaphore);
        let tx = tx.clone();

        tokio::spawn(async move {
            let Ok(_permit) = sem.acquire().await else {
                return;
            };
            let result = fetch_table(&client, &settings, &source, &tab).await;
            let _ = tx.send((idx, result)).await;
        });
    }

    // Drop our copy of tx so rx closes when all spawned tasks finish
    drop(tx);

    let mut results = Vec::with_capacity(total);
    while let Some((idx, fetch)) = rx.recv().await {
        pb.set_message(fetch.source_id.clone());
        pb.inc(1);
        results.push((idx, fetch));
    }
    pb.finish_and_clear();

    results.sort_by_key(|(idx, _)| *idx);
    let ok = results.iter().filter(|(_, f)| f.sheet.is_some()).count();
    info!("Fetched {} sources ({} ok, {} failed)", total, ok, total - ok);
    results.into_iter().map(|(_, f)| f).collect()
}
