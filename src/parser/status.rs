use crate::config::StatusRules;
use crate::models::StatusCategory;

/// Keyword lists pre-lowered once; `classify` is called per row.
#[derive(Debug, Clone)]
pub struct StatusClassifier {
    closed: Vec<String>,
    lost: Vec<String>,
    in_progress: Vec<String>,
    missing: StatusCategory,
    unrecognized: StatusCategory,
}

impl StatusClassifier {
    pub fn new(rules: &StatusRules) -> Self {
        let lower = |list: &[String]| -> Vec<String> {
            list.iter()
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect()
        };
        StatusClassifier {
            closed: lower(&rules.closed),
            lost: lower(&rules.lost),
            in_progress: lower(&rules.in_progress),
            missing: rules.missing_status,
            unrecognized: rules.unrecognized_status,
        }
    }

    /// Total: always yields a category. Priority Closed > Lost > InProgress,
    /// by case-insensitive substring containment.
    pub fn classify(&self, raw: Option<&str>) -> StatusCategory {
        let status = match raw.map(str::trim) {
            Some(s) if !s.is_empty() => s.to_lowercase(),
            _ => return self.missing,
        };

        let hit = |list: &[String]| list.iter().any(|k| status.contains(k.as_str()));
        if hit(&self.closed) {
            StatusCategory::Closed
        } else if hit(&self.lost) {
            StatusCategory::Lost
        } else if hit(&self.in_progress) {
            StatusCategory::InProgress
        } else {
            self.unrecognized
        }
    }
}
