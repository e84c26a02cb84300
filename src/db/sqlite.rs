//! SQLite-backed control table for local runs and tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

use super::models::rule::{timestamp_text, InsertError, Rule, RuleSummary, RuleUpdate};
use super::{RuleStore, LIST_LIMIT};
use crate::error::{AppError, AppResult};

type RuleRow = (String, String, String, String, String, String, String, String, String);

pub struct SqliteRuleStore {
    pool: SqlitePool,
}

impl SqliteRuleStore {
    pub async fn open(path: &str) -> AppResult<Self> {
        let db_url = format!("sqlite://{}?mode=rwc", path);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(SqliteConnectOptions::from_str(&db_url)?.create_if_missing(true))
            .await?;

        sqlx::query("PRAGMA journal_mode=WAL").execute(&pool).await?;

        Self::with_pool(pool).await
    }

    /// Wrap an existing pool, running migrations first.
    pub async fn with_pool(pool: SqlitePool) -> AppResult<Self> {
        sqlx::migrate!("./src/db/migrations")
            .run(&pool)
            .await
            .map_err(sqlx::Error::from)?;
        Ok(Self { pool })
    }

    /// Single-connection in-memory store; every connection to `:memory:`
    /// would otherwise see its own empty database.
    pub async fn in_memory() -> AppResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::with_pool(pool).await
    }

    pub async fn count(&self) -> AppResult<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM control_table")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }

    pub async fn get(&self, rule_id: &str) -> AppResult<Option<Rule>> {
        let row: Option<RuleRow> = sqlx::query_as(
            "SELECT rule_id, source_project_id, source_dataset_id, source_table_id, metric_column,
                    rule_generation_timestamp, rule_sql, rule_family, rule_description
             FROM control_table WHERE rule_id = ?"
        )
        .bind(rule_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(rule_from_row).transpose()
    }
}

fn parse_timestamp(raw: &str) -> AppResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| AppError::Store(format!("invalid rule_generation_timestamp '{}': {}", raw, e)))
}

fn rule_from_row(row: RuleRow) -> AppResult<Rule> {
    let (
        rule_id,
        source_project_id,
        source_dataset_id,
        source_table_id,
        metric_column,
        ts,
        rule_sql,
        rule_family,
        rule_description,
    ) = row;
    Ok(Rule {
        rule_id,
        source_project_id,
        source_dataset_id,
        source_table_id,
        metric_column,
        rule_generation_timestamp: parse_timestamp(&ts)?,
        rule_sql,
        rule_family,
        rule_description,
    })
}

#[async_trait]
impl RuleStore for SqliteRuleStore {
    async fn insert(&self, rule: &Rule) -> AppResult<Vec<InsertError>> {
        let result = sqlx::query(
            "INSERT INTO control_table (rule_id, source_project_id, source_dataset_id, source_table_id,
                                        metric_column, rule_generation_timestamp, rule_sql, rule_family,
                                        rule_description)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"
        )
        .bind(&rule.rule_id)
        .bind(&rule.source_project_id)
        .bind(&rule.source_dataset_id)
        .bind(&rule.source_table_id)
        .bind(&rule.metric_column)
        .bind(timestamp_text(&rule.rule_generation_timestamp))
        .bind(&rule.rule_sql)
        .bind(&rule.rule_family)
        .bind(&rule.rule_description)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(Vec::new()),
            // Constraint violations are row-level rejections, like insertAll's insertErrors.
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Ok(vec![InsertError {
                index: 0,
                reason: "duplicate".to_string(),
                message: e.message().to_string(),
            }]),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_recent(&self) -> AppResult<Vec<Rule>> {
        let rows: Vec<RuleRow> = sqlx::query_as(
            "SELECT rule_id, source_project_id, source_dataset_id, source_table_id, metric_column,
                    rule_generation_timestamp, rule_sql, rule_family, rule_description
             FROM control_table
             ORDER BY rule_generation_timestamp DESC
             LIMIT ?"
        )
        .bind(LIST_LIMIT as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(rule_from_row).collect()
    }

    async fn list_summaries(&self) -> AppResult<Vec<RuleSummary>> {
        let rows: Vec<(String, String, String, String)> = sqlx::query_as(
            "SELECT rule_id, source_table_id, metric_column, rule_description
             FROM control_table
             ORDER BY rule_generation_timestamp DESC
             LIMIT ?"
        )
        .bind(LIST_LIMIT as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(rule_id, source_table_id, metric_column, rule_description)| RuleSummary {
                rule_id,
                source_table_id,
                metric_column,
                rule_description,
            })
            .collect())
    }

    async fn update(&self, update: &RuleUpdate) -> AppResult<u64> {
        let result = sqlx::query(
            "UPDATE control_table
             SET rule_description = ?,
                 rule_sql = ?,
                 metric_column = ?,
                 source_table_id = ?,
                 rule_generation_timestamp = ?
             WHERE rule_id = ?"
        )
        .bind(&update.rule_description)
        .bind(&update.rule_sql)
        .bind(&update.metric_column)
        .bind(&update.source_table_id)
        .bind(timestamp_text(&update.rule_generation_timestamp))
        .bind(&update.rule_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn delete(&self, rule_id: &str) -> AppResult<u64> {
        let result = sqlx::query("DELETE FROM control_table WHERE rule_id = ?")
            .bind(rule_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}
