use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Classification tag attached to every generated rule.
pub const RULE_FAMILY_STRING_FORMATTING: &str = "String Formatting";

/// One row of the control table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub rule_id: String,
    pub source_project_id: String,
    pub source_dataset_id: String,
    pub source_table_id: String,
    pub metric_column: String,
    pub rule_generation_timestamp: DateTime<Utc>,
    pub rule_sql: String,
    pub rule_family: String,
    pub rule_description: String,
}

impl Rule {
    /// Build a fresh rule with a new id, stamped `now`.
    pub fn generated(
        project_id: &str,
        dataset_id: &str,
        table: &str,
        column: &str,
        description: &str,
        rule_sql: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            rule_id: Uuid::new_v4().to_string(),
            source_project_id: project_id.to_string(),
            source_dataset_id: dataset_id.to_string(),
            source_table_id: table.to_string(),
            metric_column: column.to_string(),
            rule_generation_timestamp: now,
            rule_sql,
            rule_family: RULE_FAMILY_STRING_FORMATTING.to_string(),
            rule_description: description.to_string(),
        }
    }
}

/// Projection used by the update and delete pickers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleSummary {
    pub rule_id: String,
    pub source_table_id: String,
    pub metric_column: String,
    pub rule_description: String,
}

/// In-place regeneration of an existing rule.
#[derive(Debug, Clone)]
pub struct RuleUpdate {
    pub rule_id: String,
    pub rule_description: String,
    pub rule_sql: String,
    pub metric_column: String,
    pub source_table_id: String,
    pub rule_generation_timestamp: DateTime<Utc>,
}

/// Per-row failure reported by a streaming insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertError {
    pub index: usize,
    pub reason: String,
    pub message: String,
}

impl fmt::Display for InsertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "row {}: {} ({})", self.index, self.message, self.reason)
    }
}

/// Fixed-width RFC 3339 so that text ordering matches time ordering.
pub fn timestamp_text(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_generated_rule_has_unique_id_and_family() {
        let now = Utc::now();
        let a = Rule::generated("p", "d", "orders", "customer_name", "trim", "SELECT 1".into(), now);
        let b = Rule::generated("p", "d", "orders", "customer_name", "trim", "SELECT 1".into(), now);
        assert_ne!(a.rule_id, b.rule_id);
        assert_eq!(a.rule_family, "String Formatting");
        assert_eq!(a.source_table_id, "orders");
        assert_eq!(a.metric_column, "customer_name");
    }

    #[test]
    fn test_timestamp_text_is_fixed_width() {
        let whole = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(timestamp_text(&whole), "2026-01-02T03:04:05.000000Z");
    }
}
