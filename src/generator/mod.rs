//! SQL generation for data-quality rules.
//!
//! A [`SqlGenerator`] turns a natural-language rule description plus the
//! target table and column into a single SQL statement. The hosted model is
//! reached through [`vertex::VertexGenerator`]; prompt construction and
//! response clean-up live here so every backend shares them.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::AppResult;

pub mod vertex;

/// Stored in place of SQL when the model returns no candidate text.
pub const NO_CONTENT_GENERATED: &str = "No content generated.";

pub const SYSTEM_INSTRUCTION: &str =
    "You're an expert in BigQuery SQL. Always return a single valid SQL query only.";

const FENCE: &str = "```";

#[async_trait]
pub trait SqlGenerator: Send + Sync {
    /// Produce one SQL statement for `description` against `table`.`column`.
    /// Never returns an empty string: a model answer with no usable text
    /// becomes [`NO_CONTENT_GENERATED`].
    async fn generate(&self, description: &str, table: &str, column: &str) -> AppResult<String>;
}

pub type SharedGenerator = Arc<dyn SqlGenerator>;

pub fn build_prompt(description: &str, table: &str, column: &str) -> String {
    format!(
        "Based on this rule description: \"{description}\", write a BigQuery SQL query using REGEXP_CONTAINS \
         that checks formatting for the column `{column}` in table `{table}`.\n\
         If no clear pattern is found, write a fallback SQL query that checks for common issues (e.g., empty strings).\n\
         Return ONLY the SQL query."
    )
}

/// A bare language tag such as `sql`, `googlesql` or `SQL` on the fence line.
fn is_language_tag(line: &str) -> bool {
    let line = line.trim();
    line.eq_ignore_ascii_case("sql")
        || (!line.is_empty()
            && line
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '+')))
}

/// Strip a Markdown code fence (tagged or not) from model output, keeping
/// only the first fenced block's body. Text without a fence is just trimmed.
pub fn strip_code_fence(raw: &str) -> String {
    let text = raw.trim();
    let Some(open) = text.find(FENCE) else {
        return text.to_string();
    };

    let after_open = &text[open + FENCE.len()..];
    let body = match after_open.find(FENCE) {
        Some(close) => &after_open[..close],
        None => after_open,
    };

    let body = match body.split_once('\n') {
        Some((first, rest)) if is_language_tag(first) => rest,
        Some(_) => body,
        None if is_language_tag(body) => "",
        None => match body.get(..3) {
            // Single-line "```sql SELECT ...```"
            Some(tag) if tag.eq_ignore_ascii_case("sql") && body[3..].starts_with(char::is_whitespace) => &body[3..],
            _ => body,
        },
    };

    body.trim().to_string()
}

/// Final clean-up applied to every model answer before it is stored.
pub fn finalize_sql(candidate: Option<&str>) -> String {
    let sql = candidate.map(strip_code_fence).unwrap_or_default();
    if sql.is_empty() {
        NO_CONTENT_GENERATED.to_string()
    } else {
        sql
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prompt_embeds_inputs() {
        let prompt = build_prompt("no leading/trailing spaces", "orders", "customer_name");
        assert!(prompt.contains("\"no leading/trailing spaces\""));
        assert!(prompt.contains("`customer_name`"));
        assert!(prompt.contains("`orders`"));
        assert!(prompt.contains("REGEXP_CONTAINS"));
        assert!(prompt.contains("empty strings"));
        assert!(prompt.ends_with("Return ONLY the SQL query."));
    }

    #[test]
    fn test_strip_sql_tagged_fence() {
        let raw = "```sql\nSELECT * FROM orders WHERE customer_name != TRIM(customer_name)\n```";
        assert_eq!(
            strip_code_fence(raw),
            "SELECT * FROM orders WHERE customer_name != TRIM(customer_name)"
        );
    }

    #[test]
    fn test_strip_untagged_fence() {
        assert_eq!(strip_code_fence("  ```\nSELECT 1\n```  "), "SELECT 1");
    }

    #[test]
    fn test_strip_other_language_tag() {
        assert_eq!(strip_code_fence("```googlesql\nSELECT 1\n```"), "SELECT 1");
        assert_eq!(strip_code_fence("```SQL\nSELECT 1\n```"), "SELECT 1");
    }

    #[test]
    fn test_single_line_fences() {
        assert_eq!(strip_code_fence("```sql SELECT 1```"), "SELECT 1");
        assert_eq!(strip_code_fence("```SELECT 1```"), "SELECT 1");
    }

    #[test]
    fn test_unfenced_text_is_trimmed_only() {
        assert_eq!(strip_code_fence("\n SELECT 1 \n"), "SELECT 1");
    }

    #[test]
    fn test_fence_after_prose_is_extracted() {
        let raw = "Here is the query:\n```sql\nSELECT 1\n```\nIt checks spaces.";
        assert_eq!(strip_code_fence(raw), "SELECT 1");
    }

    #[test]
    fn test_uppercase_first_line_is_not_a_tag() {
        assert_eq!(strip_code_fence("```SELECT\n  1\n```"), "SELECT\n  1");
    }

    #[test]
    fn test_no_fence_marker_survives() {
        for raw in [
            "```sql\nSELECT 1\n```",
            "```\nSELECT 1\n```",
            "SELECT 1",
            "```sql\nSELECT 1",
        ] {
            assert!(!finalize_sql(Some(raw)).contains(FENCE), "fence left in {raw:?}");
        }
    }

    #[test]
    fn test_empty_answers_become_sentinel() {
        assert_eq!(finalize_sql(None), NO_CONTENT_GENERATED);
        assert_eq!(finalize_sql(Some("   ")), NO_CONTENT_GENERATED);
        assert_eq!(finalize_sql(Some("```sql\n```")), NO_CONTENT_GENERATED);
        assert_eq!(finalize_sql(Some("```")), NO_CONTENT_GENERATED);
    }
}
