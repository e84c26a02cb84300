//! BigQuery REST (v2) backend for the control table.
//!
//! Inserts go through `tabledata.insertAll`; selects and DML go through
//! `jobs.query` with named parameters, polling `jobs.getQueryResults` until
//! the job completes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;

use super::models::rule::{timestamp_text, InsertError, Rule, RuleSummary, RuleUpdate};
use super::{RuleStore, LIST_LIMIT};
use crate::config::GcpConfig;
use crate::error::{AppError, AppResult};

pub const BIGQUERY_API_BASE: &str = "https://bigquery.googleapis.com/bigquery/v2";
/// Server-side long-poll window for each query/getQueryResults call.
const QUERY_WAIT_MS: u64 = 10_000;
/// getQueryResults calls before an unfinished job is given up on.
const DEFAULT_MAX_POLLS: u32 = 30;

pub struct BigQueryRuleStore {
    http: reqwest::Client,
    base_url: String,
    project_id: String,
    dataset_id: String,
    table_id: String,
    location: Option<String>,
    access_token: String,
    max_polls: u32,
}

// ── Wire types ────────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryParameter {
    name: String,
    parameter_type: ParameterType,
    parameter_value: ParameterValue,
}

#[derive(Debug, Serialize)]
struct ParameterType {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Debug, Serialize)]
struct ParameterValue {
    value: String,
}

impl QueryParameter {
    fn string(name: &str, value: &str) -> Self {
        Self {
            name: name.to_string(),
            parameter_type: ParameterType { kind: "STRING" },
            parameter_value: ParameterValue { value: value.to_string() },
        }
    }

    fn timestamp(name: &str, value: &DateTime<Utc>) -> Self {
        Self {
            name: name.to_string(),
            parameter_type: ParameterType { kind: "TIMESTAMP" },
            parameter_value: ParameterValue {
                value: value.format("%Y-%m-%d %H:%M:%S%.6f+00:00").to_string(),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    job_reference: Option<JobReference>,
    #[serde(default)]
    job_complete: bool,
    #[serde(default)]
    schema: Option<TableSchema>,
    #[serde(default)]
    rows: Vec<TableRow>,
    #[serde(default)]
    num_dml_affected_rows: Option<String>,
    #[serde(default)]
    page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    #[serde(default)]
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TableSchema {
    #[serde(default)]
    fields: Vec<TableField>,
}

#[derive(Debug, Deserialize)]
struct TableField {
    name: String,
}

#[derive(Debug, Deserialize)]
struct TableRow {
    #[serde(default)]
    f: Vec<TableCell>,
}

#[derive(Debug, Deserialize)]
struct TableCell {
    #[serde(default)]
    v: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InsertAllResponse {
    #[serde(default)]
    insert_errors: Vec<RowInsertErrors>,
}

#[derive(Debug, Deserialize)]
struct RowInsertErrors {
    #[serde(default)]
    index: usize,
    #[serde(default)]
    errors: Vec<ErrorProto>,
}

#[derive(Debug, Deserialize)]
struct ErrorProto {
    #[serde(default)]
    reason: String,
    #[serde(default)]
    message: String,
}

// ── Decoding ──────────────────────────────────────────────────────────────────

/// Named view over one result row.
struct RowView<'a> {
    columns: &'a HashMap<String, usize>,
    row: &'a TableRow,
}

impl RowView<'_> {
    fn text(&self, name: &str) -> AppResult<String> {
        let idx = self
            .columns
            .get(name)
            .ok_or_else(|| AppError::Store(format!("column '{}' missing from result schema", name)))?;
        Ok(match self.row.f.get(*idx).map(|cell| &cell.v) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        })
    }

    fn timestamp(&self, name: &str) -> AppResult<DateTime<Utc>> {
        let raw = self.text(name)?;
        parse_bq_timestamp(&raw)
            .ok_or_else(|| AppError::Store(format!("invalid {} value '{}'", name, raw)))
    }
}

/// Accepts int64 microseconds (`useInt64Timestamp`) or the legacy
/// float-seconds rendering such as `1.7e9`.
fn parse_bq_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(micros) = raw.parse::<i64>() {
        return DateTime::from_timestamp_micros(micros);
    }
    let secs = raw.parse::<f64>().ok()?;
    DateTime::from_timestamp_micros((secs * 1_000_000.0).round() as i64)
}

fn column_index(resp: &QueryResponse) -> HashMap<String, usize> {
    resp.schema
        .as_ref()
        .map(|s| {
            s.fields
                .iter()
                .enumerate()
                .map(|(i, f)| (f.name.clone(), i))
                .collect()
        })
        .unwrap_or_default()
}

fn decode_rules(resp: &QueryResponse) -> AppResult<Vec<Rule>> {
    let columns = column_index(resp);
    resp.rows
        .iter()
        .map(|row| {
            let view = RowView { columns: &columns, row };
            Ok(Rule {
                rule_id: view.text("rule_id")?,
                source_project_id: view.text("source_project_id")?,
                source_dataset_id: view.text("source_dataset_id")?,
                source_table_id: view.text("source_table_id")?,
                metric_column: view.text("metric_column")?,
                rule_generation_timestamp: view.timestamp("rule_generation_timestamp")?,
                rule_sql: view.text("rule_sql")?,
                rule_family: view.text("rule_family")?,
                rule_description: view.text("rule_description")?,
            })
        })
        .collect()
}

fn decode_summaries(resp: &QueryResponse) -> AppResult<Vec<RuleSummary>> {
    let columns = column_index(resp);
    resp.rows
        .iter()
        .map(|row| {
            let view = RowView { columns: &columns, row };
            Ok(RuleSummary {
                rule_id: view.text("rule_id")?,
                source_table_id: view.text("source_table_id")?,
                metric_column: view.text("metric_column")?,
                rule_description: view.text("rule_description")?,
            })
        })
        .collect()
}

fn affected_rows(resp: &QueryResponse) -> AppResult<u64> {
    match resp.num_dml_affected_rows.as_deref() {
        None => Ok(0),
        Some(n) => n
            .parse()
            .map_err(|_| AppError::Store(format!("invalid numDmlAffectedRows '{}'", n))),
    }
}

fn insert_errors(resp: InsertAllResponse) -> Vec<InsertError> {
    resp.insert_errors
        .into_iter()
        .flat_map(|row| {
            let index = row.index;
            row.errors.into_iter().map(move |e| InsertError {
                index,
                reason: e.reason,
                message: e.message,
            })
        })
        .collect()
}

/// Pull `error.message` out of a Google API error body, falling back to the raw text.
fn api_error_message(status: reqwest::StatusCode, body: &str) -> String {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string());
    format!("BigQuery API returned {}: {}", status, message)
}

// ── Client ────────────────────────────────────────────────────────────────────

impl BigQueryRuleStore {
    pub fn new(http: reqwest::Client, gcp: &GcpConfig) -> Self {
        Self {
            http,
            base_url: BIGQUERY_API_BASE.to_string(),
            project_id: gcp.project_id.clone(),
            dataset_id: gcp.dataset_id.clone(),
            table_id: gcp.control_table.clone(),
            location: gcp.bigquery_location.clone(),
            access_token: gcp.access_token.clone(),
            max_polls: DEFAULT_MAX_POLLS,
        }
    }

    pub fn with_max_polls(mut self, max_polls: u32) -> Self {
        self.max_polls = max_polls;
        self
    }

    /// Point the client at a different API root (emulators, tests).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn table_ref(&self) -> String {
        format!("{}.{}.{}", self.project_id, self.dataset_id, self.table_id)
    }

    async fn read_json<T: DeserializeOwned>(resp: reqwest::Response) -> AppResult<T> {
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(AppError::Store(api_error_message(status, &body)));
        }
        Ok(serde_json::from_str(&body)?)
    }

    async fn run_query(&self, sql: &str, params: Vec<QueryParameter>) -> AppResult<QueryResponse> {
        let mut body = json!({
            "query": sql,
            "useLegacySql": false,
            "timeoutMs": QUERY_WAIT_MS,
            "formatOptions": { "useInt64Timestamp": true },
        });
        if let Some(location) = &self.location {
            body["location"] = json!(location);
        }
        if !params.is_empty() {
            body["parameterMode"] = json!("NAMED");
            body["queryParameters"] = serde_json::to_value(&params)?;
        }

        let url = format!("{}/projects/{}/queries", self.base_url, self.project_id);
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await?;
        let mut result: QueryResponse = Self::read_json(resp).await?;

        let mut polls = 0;
        while !result.job_complete {
            let job = result
                .job_reference
                .as_ref()
                .ok_or_else(|| AppError::Store("incomplete query job without jobReference".to_string()))?;
            if polls == self.max_polls {
                return Err(AppError::Store(format!(
                    "BigQuery job {} did not complete after {} polls",
                    job.job_id, polls
                )));
            }
            polls += 1;
            tracing::debug!("Waiting for BigQuery job {} (poll {})", job.job_id, polls);

            let wait = QUERY_WAIT_MS.to_string();
            let mut query = vec![
                ("timeoutMs", wait),
                ("formatOptions.useInt64Timestamp", "true".to_string()),
            ];
            // The job's own location wins over the configured one
            if let Some(location) = job.location.as_ref().or(self.location.as_ref()) {
                query.push(("location", location.clone()));
            }

            let url = format!("{}/projects/{}/queries/{}", self.base_url, self.project_id, job.job_id);
            let resp = self
                .http
                .get(&url)
                .bearer_auth(&self.access_token)
                .query(&query)
                .send()
                .await?;
            let polled: QueryResponse = Self::read_json(resp).await?;
            result = QueryResponse {
                job_reference: polled.job_reference.or(result.job_reference),
                ..polled
            };
        }

        if result.page_token.is_some() {
            tracing::warn!(
                "BigQuery returned {} rows with more pages pending; only the first page is used",
                result.rows.len()
            );
        }

        Ok(result)
    }
}

#[async_trait]
impl RuleStore for BigQueryRuleStore {
    async fn insert(&self, rule: &Rule) -> AppResult<Vec<InsertError>> {
        let body = json!({
            "rows": [{
                "insertId": rule.rule_id,
                "json": {
                    "rule_id": rule.rule_id,
                    "source_project_id": rule.source_project_id,
                    "source_dataset_id": rule.source_dataset_id,
                    "source_table_id": rule.source_table_id,
                    "metric_column": rule.metric_column,
                    "rule_generation_timestamp": timestamp_text(&rule.rule_generation_timestamp),
                    "rule_sql": rule.rule_sql,
                    "rule_family": rule.rule_family,
                    "rule_description": rule.rule_description,
                },
            }],
        });

        let url = format!(
            "{}/projects/{}/datasets/{}/tables/{}/insertAll",
            self.base_url, self.project_id, self.dataset_id, self.table_id
        );
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await?;
        let result: InsertAllResponse = Self::read_json(resp).await?;
        Ok(insert_errors(result))
    }

    async fn list_recent(&self) -> AppResult<Vec<Rule>> {
        let sql = format!(
            "SELECT rule_id, source_project_id, source_dataset_id, source_table_id, metric_column,
                    rule_generation_timestamp, rule_sql, rule_family, rule_description
             FROM `{}`
             ORDER BY rule_generation_timestamp DESC
             LIMIT {}",
            self.table_ref(),
            LIST_LIMIT
        );
        let resp = self.run_query(&sql, Vec::new()).await?;
        decode_rules(&resp)
    }

    async fn list_summaries(&self) -> AppResult<Vec<RuleSummary>> {
        let sql = format!(
            "SELECT rule_id, source_table_id, metric_column, rule_description
             FROM `{}`
             ORDER BY rule_generation_timestamp DESC
             LIMIT {}",
            self.table_ref(),
            LIST_LIMIT
        );
        let resp = self.run_query(&sql, Vec::new()).await?;
        decode_summaries(&resp)
    }

    async fn update(&self, update: &RuleUpdate) -> AppResult<u64> {
        let sql = format!(
            "UPDATE `{}`
             SET rule_description = @desc,
                 rule_sql = @sql,
                 metric_column = @column,
                 source_table_id = @table,
                 rule_generation_timestamp = @ts
             WHERE rule_id = @rule_id",
            self.table_ref()
        );
        let params = vec![
            QueryParameter::string("desc", &update.rule_description),
            QueryParameter::string("sql", &update.rule_sql),
            QueryParameter::string("column", &update.metric_column),
            QueryParameter::string("table", &update.source_table_id),
            QueryParameter::timestamp("ts", &update.rule_generation_timestamp),
            QueryParameter::string("rule_id", &update.rule_id),
        ];
        let resp = self.run_query(&sql, params).await?;
        affected_rows(&resp)
    }

    async fn delete(&self, rule_id: &str) -> AppResult<u64> {
        let sql = format!("DELETE FROM `{}` WHERE rule_id = @rule_id", self.table_ref());
        let resp = self
            .run_query(&sql, vec![QueryParameter::string("rule_id", rule_id)])
            .await?;
        affected_rows(&resp)
    }
}
