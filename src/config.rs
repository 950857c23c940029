use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::models::{SourceEntry, StatusCategory};

pub const DEFAULT_CONFIG_PATH: &str = "leads.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Sheet tab (usually a month name) read from every source.
    pub tab: String,
    pub debug: bool,
    /// Serve a synthetic dataset when every source fails.
    pub demo_fallback: bool,
    pub cache_path: PathBuf,
    pub cache_ttl_secs: u64,
    pub fetch: FetchSettings,
    pub rules: Rules,
    /// Registration order is the merge order.
    pub sources: Vec<SourceEntry>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            tab: "Setembro".into(),
            debug: false,
            demo_fallback: true,
            cache_path: PathBuf::from("data/leads.sqlite"),
            cache_ttl_secs: 300,
            fetch: FetchSettings::default(),
            rules: Rules::default(),
            sources: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchSettings {
    pub base_url: String,
    pub timeout_secs: u64,
    pub min_body_bytes: usize,
    pub gid_guesses: Vec<u64>,
    pub concurrency: usize,
    pub error_markers: Vec<String>,
}

impl Default for FetchSettings {
    fn default() -> Self {
        FetchSettings {
            base_url: "https://docs.google.com".into(),
            timeout_secs: 15,
            min_body_bytes: 50,
            gid_guesses: vec![0],
            concurrency: 4,
            error_markers: vec![
                "<!doctype html".into(),
                "<html".into(),
                "google.visualization.query.setresponse".into(),
            ],
        }
    }
}

/// Versioned normalization rules. Bump `version` whenever keyword lists or
/// column positions change so cached runs can be told apart in logs.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Rules {
    pub version: u32,
    pub header_keywords: Vec<String>,
    pub header_scan_rows: usize,
    pub header_min_matches: usize,
    pub columns: ColumnRules,
    pub status: StatusRules,
    pub layout_warn_ratio: f64,
}

impl Default for Rules {
    fn default() -> Self {
        Rules {
            version: 1,
            header_keywords: [
                "data", "date", "nome", "name", "aluno", "telefone", "phone", "celular",
                "status", "situação",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            header_scan_rows: 5,
            header_min_matches: 2,
            columns: ColumnRules::default(),
            status: StatusRules::default(),
            layout_warn_ratio: 0.5,
        }
    }
}

/// Positional column contract (0-based, after empty columns are dropped).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ColumnRules {
    pub min_columns: usize,
    pub date: usize,
    pub name: usize,
    pub phone: usize,
    pub status_wide: usize,
    pub status_wide_min_columns: usize,
    pub status_narrow: usize,
    pub status_narrow_min_columns: usize,
    pub default_status: String,
}

impl Default for ColumnRules {
    fn default() -> Self {
        ColumnRules {
            min_columns: 3,
            date: 0,
            name: 1,
            phone: 2,
            status_wide: 4,
            status_wide_min_columns: 5,
            status_narrow: 3,
            status_narrow_min_columns: 4,
            default_status: "EM NEGOCIAÇÃO".into(),
        }
    }
}

impl ColumnRules {
    /// Status column for a table of `width` columns, or None when the
    /// default status applies.
    pub fn status_column(&self, width: usize) -> Option<usize> {
        if width >= self.status_wide_min_columns {
            Some(self.status_wide)
        } else if width >= self.status_narrow_min_columns {
            Some(self.status_narrow)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StatusRules {
    pub closed: Vec<String>,
    pub lost: Vec<String>,
    pub in_progress: Vec<String>,
    pub missing_status: StatusCategory,
    pub unrecognized_status: StatusCategory,
}

impl Default for StatusRules {
    fn default() -> Self {
        let list = |items: &[&str]| items.iter().map(|s| s.to_string()).collect();
        StatusRules {
            closed: list(&["PAGO"]),
            lost: list(&[
                "NÃO POSSUÍ INTERESSE",
                "NÃO RESPONDE",
                "NÃO TEM O CURSO DE INTERESSE",
                "Não contém experiencia.",
                "Não tem o curso",
                "OUTRO TIPO DE CURSO",
                "NÃO POSSUI O TEMPO MINÍMO",
                "Não contém o curso desejado.",
                "não possui experiencia.",
                "PERDIDO",
            ]),
            in_progress: list(&[
                "EM NEGOCIAÇÃO",
                "Aguardando retorno",
                "Aguardando pagamento",
                "AGUARDANDO INTERAÇÃO",
                "AGUARDANDO MENSAGEM",
                "AGUARDANDO INTRA",
                "EM PROCESSO",
            ]),
            missing_status: StatusCategory::Lost,
            unrecognized_status: StatusCategory::InProgress,
        }
    }
}

/// Load settings from an optional TOML file, overridden by `LEADS_*` env vars
/// (nested keys use `__`, e.g. `LEADS_FETCH__TIMEOUT_SECS`).
pub fn load(path: Option<&Path>) -> Result<Settings> {
    let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH));
    let required = path != Path::new(DEFAULT_CONFIG_PATH);

    let settings: Settings = Config::builder()
        .add_source(File::from(path).required(required))
        .add_source(
            Environment::with_prefix("LEADS")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()
        .with_context(|| format!("Failed to read config from {:?}", path))?
        .try_deserialize()
        .context("Failed to parse config")?;

    settings.validate()?;
    Ok(settings)
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for source in &self.sources {
            if source.id.trim().is_empty() {
                bail!("source with sheet_id {:?} has an empty id", source.sheet_id);
            }
            if !seen.insert(source.id.as_str()) {
                bail!("duplicate source id {:?}", source.id);
            }
        }
        if self.rules.columns.min_columns < 3 {
            bail!("rules.columns.min_columns must be at least 3");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_without_file() {
        let s = Settings::default();
        assert_eq!(s.tab, "Setembro");
        assert_eq!(s.cache_ttl_secs, 300);
        assert_eq!(s.fetch.min_body_bytes, 50);
        assert_eq!(s.rules.header_scan_rows, 5);
        assert_eq!(s.rules.status.missing_status, StatusCategory::Lost);
        assert_eq!(s.rules.status.unrecognized_status, StatusCategory::InProgress);
        assert!(s.sources.is_empty());
    }

    #[test]
    fn status_column_by_width() {
        let c = ColumnRules::default();
        assert_eq!(c.status_column(6), Some(4));
        assert_eq!(c.status_column(5), Some(4));
        assert_eq!(c.status_column(4), Some(3));
        assert_eq!(c.status_column(3), None);
    }

    #[test]
    fn loads_toml_file_with_partial_overrides() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
tab = "Outubro"
debug = true

[fetch]
timeout_secs = 20

[rules.status]
missing_status = "InProgress"

[[sources]]
id = "Tayssa"
sheet_id = "sheet-a"

[[sources]]
id = "Felipe"
sheet_id = "sheet-b"
"#
        )
        .unwrap();

        let s = load(Some(file.path())).unwrap();
        assert_eq!(s.tab, "Outubro");
        assert!(s.debug);
        assert_eq!(s.fetch.timeout_secs, 20);
        assert_eq!(s.fetch.min_body_bytes, 50);
        assert_eq!(s.rules.status.missing_status, StatusCategory::InProgress);
        assert_eq!(s.rules.status.closed, vec!["PAGO".to_string()]);
        let ids: Vec<&str> = s.sources.iter().map(|x| x.id.as_str()).collect();
        assert_eq!(ids, vec!["Tayssa", "Felipe"]);
    }

    #[test]
    fn duplicate_source_ids_rejected() {
        let mut s = Settings::default();
        s.sources = vec![
            SourceEntry { id: "A".into(), sheet_id: "1".into() },
            SourceEntry { id: "A".into(), sheet_id: "2".into() },
        ];
        assert!(s.validate().is_err());
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        assert!(load(Some(Path::new("does/not/exist.toml"))).is_err());
    }
}
