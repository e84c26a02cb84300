use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

use crate::config::{Config, StoreBackend};
use crate::error::AppResult;
use models::rule::{InsertError, Rule, RuleSummary, RuleUpdate};

pub mod bigquery;
pub mod models;
pub mod sqlite;

/// Listings never return more than this many rows.
pub const LIST_LIMIT: usize = 100;

/// Access to the control table.
///
/// Listings are ordered by `rule_generation_timestamp` descending and capped
/// at [`LIST_LIMIT`]. `update` and `delete` report the number of affected
/// rows; zero means no row carried the given id.
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Streaming insert of one row. Row-level rejections come back as a
    /// non-empty list rather than an `Err`.
    async fn insert(&self, rule: &Rule) -> AppResult<Vec<InsertError>>;

    async fn list_recent(&self) -> AppResult<Vec<Rule>>;

    async fn list_summaries(&self) -> AppResult<Vec<RuleSummary>>;

    async fn update(&self, update: &RuleUpdate) -> AppResult<u64>;

    async fn delete(&self, rule_id: &str) -> AppResult<u64>;
}

pub type SharedStore = Arc<dyn RuleStore>;

pub async fn init(cfg: &Config, http: reqwest::Client) -> Result<SharedStore> {
    let store: SharedStore = match cfg.store.backend {
        StoreBackend::Bigquery => {
            tracing::info!("Rule store: BigQuery table {}", cfg.gcp.control_table_ref());
            Arc::new(bigquery::BigQueryRuleStore::new(http, &cfg.gcp))
        }
        StoreBackend::Sqlite => {
            let store = sqlite::SqliteRuleStore::open(&cfg.store.sqlite_path).await?;
            tracing::info!("Rule store: SQLite database {}", cfg.store.sqlite_path);
            Arc::new(store)
        }
    };
    Ok(store)
}
