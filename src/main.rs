mod config;
mod db;
mod demo;
mod error;
mod export;
mod fetcher;
mod models;
mod parser;
mod pipeline;
mod report;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use chrono::{Local, NaiveDate, Utc};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tracing::warn;

use config::Settings;
use models::{CanonicalLead, FilterCriteria};
use pipeline::Origin;
use report::{format_number, format_percent, LeadDataset, SortKey};

#[derive(Parser)]
#[command(name = "leads_report", about = "Sales-lead report over per-salesperson spreadsheet exports")]
struct Cli {
    /// Config file (default: ./leads.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct LoadArgs {
    /// Sheet tab to read, e.g. a month name (overrides config)
    #[arg(short, long)]
    tab: Option<String>,
    /// Drop cached sheets for the tab and fetch again
    #[arg(long)]
    refresh: bool,
    /// Read a previously exported CSV instead of the live sources
    #[arg(long, conflicts_with_all = ["tab", "refresh"])]
    input: Option<PathBuf>,
}

#[derive(Args)]
struct FilterArgs {
    /// First day to include (YYYY-MM-DD, default: earliest lead)
    #[arg(long)]
    from: Option<NaiveDate>,
    /// Last day to include (YYYY-MM-DD, default: latest lead)
    #[arg(long)]
    to: Option<NaiveDate>,
    /// Only these sources (repeatable, default: all)
    #[arg(short, long = "source")]
    sources: Vec<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// List the configured sources
    Sources,
    /// Fetch and normalize every source, showing per-source results
    Fetch {
        /// Sheet tab to read (overrides config)
        #[arg(short, long)]
        tab: Option<String>,
        /// Drop cached sheets for the tab and fetch again
        #[arg(long)]
        refresh: bool,
    },
    /// KPIs, per-source metrics, status distribution and daily counts
    Report {
        #[command(flatten)]
        load: LoadArgs,
        #[command(flatten)]
        filter: FilterArgs,
        #[arg(long, value_enum, default_value = "human")]
        format: OutputFormat,
    },
    /// Paginated lead table
    Leads {
        #[command(flatten)]
        load: LoadArgs,
        #[command(flatten)]
        filter: FilterArgs,
        /// Sort key (descending)
        #[arg(long, value_enum, default_value = "date")]
        sort: SortArg,
        #[arg(short, long, default_value = "1")]
        page: usize,
        #[arg(long, default_value = "25")]
        per_page: usize,
        /// Columns to show, comma separated
        #[arg(long, value_enum, value_delimiter = ',',
              default_values_t = vec![Column::Date, Column::Source, Column::Name, Column::Status])]
        columns: Vec<Column>,
    },
    /// Write the filtered leads as CSV
    Export {
        #[command(flatten)]
        load: LoadArgs,
        #[command(flatten)]
        filter: FilterArgs,
        /// Output path (default: leads_<timestamp>.csv)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Inspect or clear the sheet cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Last fetch outcome and cache age per source and tab
    Status,
    /// Drop every cached sheet
    Clear,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum OutputFormat {
    Human,
    Json,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum SortArg {
    Date,
    Source,
    Name,
    Status,
}

impl From<SortArg> for SortKey {
    fn from(value: SortArg) -> Self {
        match value {
            SortArg::Date => SortKey::Date,
            SortArg::Source => SortKey::Source,
            SortArg::Name => SortKey::Name,
            SortArg::Status => SortKey::Status,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Column {
    Date,
    Source,
    Name,
    Phone,
    Status,
    Category,
}

impl Column {
    fn title(self) -> &'static str {
        match self {
            Column::Date => "Date",
            Column::Source => "Source",
            Column::Name => "Name",
            Column::Phone => "Phone",
            Column::Status => "Status",
            Column::Category => "Category",
        }
    }

    fn width(self) -> usize {
        match self {
            Column::Date => 10,
            Column::Source => 16,
            Column::Name => 24,
            Column::Phone => 16,
            Column::Status => 24,
            Column::Category => 11,
        }
    }

    fn value(self, lead: &CanonicalLead) -> String {
        match self {
            Column::Date => lead.date.format("%d/%m/%Y").to_string(),
            Column::Source => lead.source_id.clone(),
            Column::Name => lead.subject_name.clone(),
            Column::Phone => lead.phone.clone(),
            Column::Status => lead.status_raw.clone(),
            Column::Category => lead.status_category.label().to_string(),
        }
    }
}

fn init_tracing(debug: bool) {
    let default = if debug { "debug" } else { "info" };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with_writer(std::io::stderr)
        .try_init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let t0 = Instant::now();
    let cli = Cli::parse();
    let timed = shows_timing(&cli.command);
    let mut settings = config::load(cli.config.as_deref())?;
    init_tracing(settings.debug);

    let result = match cli.command {
        Commands::Sources => {
            if settings.sources.is_empty() {
                println!("No sources configured. Add [[sources]] entries to {}.", config::DEFAULT_CONFIG_PATH);
                return Ok(());
            }
            println!("{:>3} | {:<20} | {}", "#", "Source", "Sheet id");
            println!("{}", "-".repeat(70));
            for (i, s) in settings.sources.iter().enumerate() {
                println!("{:>3} | {:<20} | {}", i + 1, truncate(&s.id, 20), s.sheet_id);
            }
            Ok(())
        }
        Commands::Fetch { tab, refresh } => {
            if let Some(tab) = tab {
                settings.tab = tab;
            }
            let conn = open_cache_or_memory(&settings)?;
            let outcome = pipeline::load_dataset(&settings, &conn, refresh).await?;
            print_fetch_summary(&settings, &outcome);
            Ok(())
        }
        Commands::Report { load, filter, format } => {
            let view = filtered_view(&mut settings, &load, &filter).await?;
            match (format, view) {
                (OutputFormat::Json, view) => println!("{}", json_report(view.as_ref())?),
                (OutputFormat::Human, Some(view)) => print_report(&view),
                (OutputFormat::Human, None) => {}
            }
            Ok(())
        }
        Commands::Leads { load, filter, sort, page, per_page, columns } => {
            let Some(view) = filtered_view(&mut settings, &load, &filter).await? else {
                return Ok(());
            };
            print_leads(&view, sort.into(), page, per_page, &columns);
            Ok(())
        }
        Commands::Export { load, filter, output } => {
            let Some(view) = filtered_view(&mut settings, &load, &filter).await? else {
                return Ok(());
            };
            let path = output
                .unwrap_or_else(|| PathBuf::from(export::default_file_name(Local::now().naive_local())));
            let file = std::fs::File::create(&path)
                .with_context(|| format!("Failed to create {:?}", path))?;
            export::write_csv(&view, std::io::BufWriter::new(file))?;
            println!("Exported {} leads to {}", view.len(), path.display());
            Ok(())
        }
        Commands::Cache { action } => {
            let conn = open_cache(&settings)?;
            match action {
                CacheAction::Clear => {
                    let n = db::invalidate(&conn, None)?;
                    println!("Cleared {} cached sheets.", n);
                }
                CacheAction::Status => print_cache_status(&conn, settings.cache_ttl_secs)?,
            }
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if timed && elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn open_cache(settings: &Settings) -> anyhow::Result<rusqlite::Connection> {
    let conn = db::connect(&settings.cache_path)?;
    db::init_schema(&conn)?;
    Ok(conn)
}

/// Loads still run without a usable cache file; they just cache nothing.
fn open_cache_or_memory(settings: &Settings) -> anyhow::Result<rusqlite::Connection> {
    match open_cache(settings) {
        Ok(conn) => Ok(conn),
        Err(e) => {
            warn!("Cache unavailable, continuing without it: {:#}", e);
            let conn = rusqlite::Connection::open_in_memory()?;
            db::init_schema(&conn)?;
            Ok(conn)
        }
    }
}

/// Machine-readable output keeps stdout to the JSON document alone.
fn shows_timing(command: &Commands) -> bool {
    !matches!(command, Commands::Report { format: OutputFormat::Json, .. })
}

/// An empty view still yields a well-formed report with zero counts.
fn json_report(view: Option<&LeadDataset>) -> anyhow::Result<String> {
    let empty = LeadDataset::default();
    let report = report::build_report(view.unwrap_or(&empty));
    Ok(serde_json::to_string_pretty(&report)?)
}

/// Load (live or exported) and filter. None when there is nothing to show;
/// the reason has already gone to stderr.
async fn filtered_view(
    settings: &mut Settings,
    load: &LoadArgs,
    filter: &FilterArgs,
) -> anyhow::Result<Option<LeadDataset>> {
    let dataset = match &load.input {
        Some(path) => pipeline::load_exported(path)?,
        None => {
            if let Some(tab) = &load.tab {
                settings.tab = tab.clone();
            }
            let conn = open_cache_or_memory(settings)?;
            let outcome = pipeline::load_dataset(settings, &conn, load.refresh).await?;
            if outcome.demo {
                eprintln!("WARNING: no source could be read; showing demonstration data.\n");
            }
            outcome.dataset
        }
    };

    let Some((min, max)) = dataset.date_bounds() else {
        eprintln!("No leads could be loaded. Check the sources with 'fetch'.");
        return Ok(None);
    };

    let known = dataset.source_ids();
    for s in filter.sources.iter().filter(|s| !known.contains(*s)) {
        eprintln!("Note: no leads loaded for source '{}'", s);
    }

    let criteria = FilterCriteria {
        sources: filter.sources.iter().cloned().collect(),
        date_from: filter.from.unwrap_or(min),
        date_to: filter.to.unwrap_or(max),
    };
    let view = dataset.filter(&criteria);
    if view.is_empty() {
        eprintln!("No leads match the selected filters.");
        return Ok(None);
    }
    Ok(Some(view))
}

fn print_fetch_summary(settings: &Settings, outcome: &pipeline::LoadOutcome) {
    if settings.sources.is_empty() {
        println!("No sources configured.");
    }
    println!(
        "{:<20} | {:<8} | {:>5} | {:>5} | {:>6} | {:>7} | {:>10}",
        "Source", "Origin", "Rows", "Leads", "Header", "Undated", "No contact"
    );
    println!("{}", "-".repeat(82));

    for r in &outcome.reports {
        let origin = match &r.origin {
            Origin::Fetched { .. } => "fetched".to_string(),
            Origin::Cached { age_secs, .. } => format!("{}s", age_secs),
            Origin::Failed => "FAILED".to_string(),
        };
        match &r.stats {
            Some(s) if s.too_narrow => println!(
                "{:<20} | {:<8} | {:>5} | too narrow ({} columns)",
                truncate(&r.source_id, 20), origin, s.rows_in, s.columns_kept
            ),
            Some(s) => println!(
                "{:<20} | {:<8} | {:>5} | {:>5} | {:>6} | {:>7} | {:>10}",
                truncate(&r.source_id, 20),
                origin,
                s.rows_in,
                s.retained,
                s.header_rows,
                s.dropped_no_date,
                s.dropped_no_contact
            ),
            None => println!("{:<20} | {:<8} |", truncate(&r.source_id, 20), origin),
        }
        if r.layout_warning {
            println!("    date column mostly unparseable, layout may be shifted");
        }

        if settings.debug {
            for a in &r.attempts {
                let result = a.error.as_deref().unwrap_or("ok");
                println!("    {} ({} ms): {}", a.url, a.latency_ms, result);
            }
        }
    }

    if outcome.demo {
        println!("\nNo source could be read; reports will use demonstration data.");
    }
    println!(
        "\n{} leads for tab '{}'.",
        format_number(outcome.dataset.len()),
        settings.tab
    );
}

fn print_report(view: &LeadDataset) {
    let r = report::build_report(view);
    let k = &r.kpis;

    println!("--- KPIs ---");
    println!("  Total leads:      {:>8}", format_number(k.total));
    println!("  Closed:           {:>8}", format_number(k.closed_count));
    println!("  Conversion rate:  {:>8}", format_percent(k.conversion_rate));
    println!("  Lost:             {:>8}", format_number(k.lost_count));
    println!("  In progress:      {:>8}", format_number(k.in_progress_count));
    println!("  With name:        {:>8}", format_number(k.has_name_count));
    println!("  With phone:       {:>8}", format_number(k.has_phone_count));
    println!("  With status:      {:>8}", format_number(k.has_status_count));

    println!("\n--- Funnel ---");
    for (stage, n) in [
        ("Total", k.total),
        ("In progress", k.in_progress_count),
        ("Closed", k.closed_count),
        ("Lost", k.lost_count),
    ] {
        let share = if k.total == 0 { 0.0 } else { n as f64 / k.total as f64 * 100.0 };
        println!("  {:<12} {:>8} {:>7}", stage, format_number(n), format_percent(share));
    }

    println!("\n--- By source ---");
    println!("  {:<20} | {:>6} | {:>6} | {:>6} | {:>7}", "Source", "Total", "Closed", "Lost", "Conv.");
    for (source, m) in &r.by_source {
        println!(
            "  {:<20} | {:>6} | {:>6} | {:>6} | {:>7}",
            truncate(source, 20),
            format_number(m.total),
            format_number(m.closed),
            format_number(m.lost),
            format_percent(m.conversion_rate)
        );
    }

    println!("\n--- By status ---");
    for (cat, n) in &r.by_category {
        println!("  {:<12} {:>8}", cat.label(), format_number(*n));
    }

    println!("\n--- Leads per day ---");
    for (date, n) in &r.by_date {
        println!("  {}  {:>5}", date.format("%d/%m/%Y"), n);
    }
}

fn print_leads(view: &LeadDataset, sort: SortKey, page: usize, per_page: usize, columns: &[Column]) {
    let mut rows: Vec<&CanonicalLead> = view.leads().iter().collect();
    report::sort_leads(&mut rows, sort);
    let p = report::paginate(rows.len(), page, per_page);

    let header: Vec<String> = columns
        .iter()
        .map(|c| format!("{:<w$}", c.title(), w = c.width()))
        .collect();
    println!("{:>4} | {}", "#", header.join(" | "));
    println!("{}", "-".repeat(7 + header.iter().map(|h| h.len() + 3).sum::<usize>()));

    for (i, lead) in rows[p.start..p.end].iter().enumerate() {
        let cells: Vec<String> = columns
            .iter()
            .map(|c| format!("{:<w$}", truncate(&c.value(lead), c.width()), w = c.width()))
            .collect();
        println!("{:>4} | {}", p.start + i + 1, cells.join(" | "));
    }

    println!(
        "\nShowing {} of {} leads | page {}/{}",
        p.end - p.start,
        format_number(rows.len()),
        p.number,
        p.total_pages
    );
}

fn print_cache_status(conn: &rusqlite::Connection, ttl_secs: u64) -> anyhow::Result<()> {
    let rows = db::cache_status(conn)?;
    if rows.is_empty() {
        println!("Cache is empty. Run 'fetch' first.");
        return Ok(());
    }
    let now = Utc::now().timestamp();
    println!("{:<12} | {:<20} | {:<10} | {}", "Tab", "Source", "Cached", "Last attempt");
    println!("{}", "-".repeat(90));
    for r in rows {
        let cached = match r.cached_at {
            Some(t) if ((now - t).max(0) as u64) < ttl_secs => format!("{}s ago", now - t),
            Some(_) => "stale".to_string(),
            None => "-".to_string(),
        };
        let last = match r.last_error {
            Some(e) => format!("{} ({})", e, truncate(&r.last_url, 40)),
            None => format!("ok {}s ago", (now - r.last_attempt_at).max(0)),
        };
        println!(
            "{:<12} | {:<20} | {:<10} | {}",
            truncate(&r.tab, 12),
            truncate(&r.source_id, 20),
            cached,
            last
        );
    }
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StatusCategory;

    #[test]
    fn json_report_has_no_timing_line() {
        let cli = Cli::try_parse_from(["leads_report", "report", "--format", "json"]).unwrap();
        assert!(!shows_timing(&cli.command));
        let cli = Cli::try_parse_from(["leads_report", "report"]).unwrap();
        assert!(shows_timing(&cli.command));
        let cli = Cli::try_parse_from(["leads_report", "fetch"]).unwrap();
        assert!(shows_timing(&cli.command));
    }

    #[test]
    fn json_report_for_empty_view_is_valid_json() {
        let text = json_report(None).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["kpis"]["total"], 0);
        assert_eq!(value["kpis"]["conversion_rate"], 0.0);
        assert!(value["by_source"].as_object().unwrap().is_empty());
    }

    #[test]
    fn json_report_for_view() {
        let lead = CanonicalLead {
            date: NaiveDate::from_ymd_opt(2024, 9, 5).unwrap(),
            subject_name: "Ana".into(),
            phone: String::new(),
            status_raw: "PAGO".into(),
            status_category: StatusCategory::Closed,
            source_id: "Tayssa".into(),
            tab_name: "Setembro".into(),
        };
        let view = LeadDataset::from_leads(vec![lead]);
        let value: serde_json::Value = serde_json::from_str(&json_report(Some(&view)).unwrap()).unwrap();
        assert_eq!(value["kpis"]["closed_count"], 1);
        assert_eq!(value["by_source"]["Tayssa"]["total"], 1);
    }

    #[test]
    fn unusable_cache_path_falls_back_to_memory() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not_a_dir");
        std::fs::write(&blocker, "x").unwrap();
        let settings = Settings {
            cache_path: blocker.join("leads.sqlite"),
            ..Settings::default()
        };
        assert!(open_cache(&settings).is_err());
        let conn = open_cache_or_memory(&settings).unwrap();
        assert!(db::cache_status(&conn).unwrap().is_empty());
    }
}
