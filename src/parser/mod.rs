pub mod dates;
pub mod header;
pub mod normalize;
pub mod status;
pub mod table;

use chrono::{Datelike, Local};

use crate::config::Rules;
use crate::models::CanonicalLead;
use normalize::NormalizeStats;
use status::StatusClassifier;
use table::RawTable;

/// Normalize one source's table with today's year for partial dates.
pub fn process_table(
    table: &RawTable,
    source_id: &str,
    tab: &str,
    rules: &Rules,
) -> (Vec<CanonicalLead>, NormalizeStats) {
    let classifier = StatusClassifier::new(&rules.status);
    normalize::normalize(table, source_id, tab, rules, &classifier, Local::now().year())
}
