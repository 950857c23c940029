use chrono::{Duration, NaiveDate};
use rand::seq::IndexedRandom;
use rand::Rng;

use crate::models::CanonicalLead;
use crate::parser::status::StatusClassifier;

pub const DEMO_LEADS: usize = 500;
const DEMO_DAYS: i64 = 90;

const DEMO_SOURCES: &[&str] = &["Tayssa", "Maria Eduarda", "Marya", "Danúbia", "Debóra", "Felipe"];

const DEMO_STATUSES: &[&str] = &[
    "EM NEGOCIAÇÃO",
    "AGUARDANDO INTERAÇÃO",
    "NÃO RESPONDE",
    "AGUARDANDO FICHA",
    "SEM ENSINO MÉDIO",
    "GRADUAÇÃO",
    "PAGO",
    "NÃO POSSUÍ INTERESSE",
    "AGUARDANDO INTRA",
    "ME BLOQUEOU",
];

/// Synthetic leads over the last 90 days, shown when no source could be read.
/// Uses the registered source ids when there are any.
pub fn generate<R: Rng>(
    rng: &mut R,
    source_ids: &[String],
    tab: &str,
    today: NaiveDate,
    count: usize,
    classifier: &StatusClassifier,
) -> Vec<CanonicalLead> {
    let fallback: Vec<String> = DEMO_SOURCES.iter().map(|s| s.to_string()).collect();
    let sources: &[String] = if source_ids.is_empty() { &fallback } else { source_ids };

    (0..count)
        .map(|_| {
            let status = DEMO_STATUSES.choose(rng).copied().unwrap_or_default();
            let source = sources.choose(rng).cloned().unwrap_or_default();
            CanonicalLead {
                date: today - Duration::days(rng.random_range(0..=DEMO_DAYS)),
                subject_name: format!("Aluno {}", rng.random_range(1..=1000)),
                phone: format!(
                    "({}) 9{}-{}",
                    rng.random_range(11..=99),
                    rng.random_range(1000..=9999),
                    rng.random_range(1000..=9999)
                ),
                status_raw: status.to_string(),
                status_category: classifier.classify(Some(status)),
                source_id: source,
                tab_name: tab.to_string(),
            }
        })
        .collect()
}
