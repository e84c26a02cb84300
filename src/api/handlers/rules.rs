use axum::{
    extract::{rejection::FormRejection, State},
    response::Response,
    Form,
};
use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;

use crate::api::flash::{self, Flash, PendingFlashes};
use crate::api::{views, AppState};
use crate::db::models::rule::{InsertError, Rule, RuleUpdate};
use crate::error::{AppError, AppResult};

const FILL_ALL_FIELDS: &str = "Please fill all fields";
const RULE_ID_REQUIRED: &str = "Rule ID required to delete.";
const NO_RULE_FOUND: &str = "No rule found with that ID.";

#[derive(Debug, Default, Deserialize)]
pub struct CreateRuleForm {
    pub table: Option<String>,
    pub column: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateRuleForm {
    pub rule_id: Option<String>,
    pub description: Option<String>,
    pub table: Option<String>,
    pub column: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeleteRuleForm {
    pub rule_id: Option<String>,
}

/// Present means submitted and non-empty; content is not inspected.
fn present(field: Option<String>) -> Option<String> {
    field.filter(|v| !v.is_empty())
}

/// A body that is not a urlencoded form counts as "no fields submitted".
fn form_or_default<T: Default>(form: Result<Form<T>, FormRejection>) -> T {
    match form {
        Ok(Form(body)) => body,
        Err(e) => {
            tracing::warn!("Rejected form body: {}", e);
            T::default()
        }
    }
}

/// Warnings keep their own text; faults are prefixed with what failed.
fn flash_for_error(context: &str, err: &AppError) -> Flash {
    if err.is_warning() {
        Flash::warning(err.to_string())
    } else {
        Flash::danger(format!("{}: {}", context, err))
    }
}

fn format_insert_errors(errors: &[InsertError]) -> String {
    let parts: Vec<String> = errors.iter().map(ToString::to_string).collect();
    format!("[{}]", parts.join("; "))
}

async fn generate_sql(state: &AppState, description: &str, table: &str, column: &str) -> AppResult<String> {
    state
        .generator
        .generate(description, table, column)
        .await
        .inspect_err(|e| {
            state.metrics.inc_generation_failure();
            tracing::error!(table, column, "SQL generation failed: {}", e);
        })
}

fn record_store_failure(state: &AppState, action: &str, err: &AppError) {
    state.metrics.inc_store_failure();
    tracing::error!("Rule store {} failed: {}", action, err);
}

pub async fn home() -> Response {
    flash::found("/create")
}

pub async fn create_form(pending: PendingFlashes) -> Response {
    pending.render(views::create_page(&pending.flashes))
}

async fn create_rule(state: &AppState, form: CreateRuleForm) -> AppResult<Vec<InsertError>> {
    let (Some(table), Some(column), Some(description)) =
        (present(form.table), present(form.column), present(form.description))
    else {
        return Err(AppError::Validation(FILL_ALL_FIELDS.to_string()));
    };

    let rule_sql = generate_sql(state, &description, &table, &column).await?;
    let rule = Rule::generated(
        &state.project_id,
        &state.dataset_id,
        &table,
        &column,
        &description,
        rule_sql,
        Utc::now(),
    );

    let errors = state
        .store
        .insert(&rule)
        .await
        .inspect_err(|e| record_store_failure(state, "insert", e))?;

    if errors.is_empty() {
        state.metrics.inc_created();
        tracing::info!(rule_id = %rule.rule_id, table = %table, column = %column, "Rule created");
    } else {
        state.metrics.inc_store_failure();
        tracing::warn!(rule_id = %rule.rule_id, "Rule insert rejected: {}", format_insert_errors(&errors));
    }
    Ok(errors)
}

pub async fn create(
    State(state): State<Arc<AppState>>,
    form: Result<Form<CreateRuleForm>, FormRejection>,
) -> Response {
    let flash = match create_rule(&state, form_or_default(form)).await {
        Ok(errors) if errors.is_empty() => Flash::success("Rule successfully added!"),
        Ok(errors) => Flash::danger(format!("Error inserting rule: {}", format_insert_errors(&errors))),
        Err(e) => flash_for_error("Error", &e),
    };
    flash::redirect_with("/create", flash)
}

pub async fn read(State(state): State<Arc<AppState>>, mut pending: PendingFlashes) -> Response {
    let rules = match state.store.list_recent().await {
        Ok(rules) => rules,
        Err(e) => {
            record_store_failure(&state, "list", &e);
            pending.push(Flash::danger(format!("Error fetching rules: {}", e)));
            Vec::new()
        }
    };
    pending.render(views::read_page(&rules, &pending.flashes))
}

pub async fn update_form(State(state): State<Arc<AppState>>, mut pending: PendingFlashes) -> Response {
    let rules = match state.store.list_summaries().await {
        Ok(rules) => rules,
        Err(e) => {
            record_store_failure(&state, "list", &e);
            pending.push(Flash::danger(format!("Error fetching rules for update: {}", e)));
            Vec::new()
        }
    };
    pending.render(views::update_page(&rules, &pending.flashes))
}

async fn update_rule(state: &AppState, form: UpdateRuleForm) -> AppResult<String> {
    let (Some(rule_id), Some(description), Some(table), Some(column)) = (
        present(form.rule_id),
        present(form.description),
        present(form.table),
        present(form.column),
    ) else {
        return Err(AppError::Validation(FILL_ALL_FIELDS.to_string()));
    };

    let rule_sql = generate_sql(state, &description, &table, &column).await?;
    let update = RuleUpdate {
        rule_id,
        rule_description: description,
        rule_sql,
        metric_column: column,
        source_table_id: table,
        rule_generation_timestamp: Utc::now(),
    };

    let affected = state
        .store
        .update(&update)
        .await
        .inspect_err(|e| record_store_failure(state, "update", e))?;

    if affected == 0 {
        state.metrics.inc_not_found();
        return Err(AppError::NotFound(NO_RULE_FOUND.to_string()));
    }
    state.metrics.inc_updated();
    Ok(update.rule_id)
}

pub async fn update(
    State(state): State<Arc<AppState>>,
    form: Result<Form<UpdateRuleForm>, FormRejection>,
) -> Response {
    let flash = match update_rule(&state, form_or_default(form)).await {
        Ok(rule_id) => {
            tracing::info!(rule_id = %rule_id, "Rule updated");
            Flash::success("Rule successfully updated!")
        }
        Err(e) => {
            tracing::warn!("Rule update not applied: {}", e);
            flash_for_error("Error updating rule", &e)
        }
    };
    flash::redirect_with("/update_form", flash)
}

pub async fn delete_form(State(state): State<Arc<AppState>>, mut pending: PendingFlashes) -> Response {
    let rules = match state.store.list_summaries().await {
        Ok(rules) => rules,
        Err(e) => {
            record_store_failure(&state, "list", &e);
            pending.push(Flash::danger(format!("Error fetching rules for deletion: {}", e)));
            Vec::new()
        }
    };
    pending.render(views::delete_page(&rules, &pending.flashes))
}

async fn delete_rule(state: &AppState, form: DeleteRuleForm) -> AppResult<String> {
    let rule_id = present(form.rule_id)
        .ok_or_else(|| AppError::Validation(RULE_ID_REQUIRED.to_string()))?;

    let affected = state
        .store
        .delete(&rule_id)
        .await
        .inspect_err(|e| record_store_failure(state, "delete", e))?;

    if affected == 0 {
        state.metrics.inc_not_found();
        return Err(AppError::NotFound(NO_RULE_FOUND.to_string()));
    }
    state.metrics.inc_deleted();
    Ok(rule_id)
}

pub async fn delete(
    State(state): State<Arc<AppState>>,
    form: Result<Form<DeleteRuleForm>, FormRejection>,
) -> Response {
    let flash = match delete_rule(&state, form_or_default(form)).await {
        Ok(rule_id) => {
            tracing::info!(rule_id = %rule_id, "Rule deleted");
            Flash::success("Rule successfully deleted!")
        }
        Err(e) => {
            tracing::warn!("Rule delete not applied: {}", e);
            flash_for_error("Error deleting rule", &e)
        }
    };
    flash::redirect_with("/delete_form", flash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_present_rejects_missing_and_empty() {
        assert_eq!(present(None), None);
        assert_eq!(present(Some(String::new())), None);
        assert_eq!(present(Some(" ".to_string())), Some(" ".to_string()));
    }

    #[test]
    fn test_flash_for_error_levels() {
        let warn = flash_for_error("Error deleting rule", &AppError::NotFound(NO_RULE_FOUND.to_string()));
        assert_eq!(warn, Flash::warning("No rule found with that ID."));

        let danger = flash_for_error("Error deleting rule", &AppError::Store("denied".to_string()));
        assert_eq!(danger, Flash::danger("Error deleting rule: Store error: denied"));
    }

    #[test]
    fn test_format_insert_errors() {
        let errors = vec![InsertError {
            index: 0,
            reason: "invalid".to_string(),
            message: "no such field: rule_sqlx".to_string(),
        }];
        assert_eq!(format_insert_errors(&errors), "[row 0: no such field: rule_sqlx (invalid)]");
    }
}
