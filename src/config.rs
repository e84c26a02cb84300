use anyhow::Result;
use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub gcp: GcpConfig,
    pub generator: GeneratorConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Allowed CORS origins. Set DQ_RULES__SERVER__CORS_ALLOWED_ORIGINS in production.
    #[serde(default = "default_cors_allowed_origins")]
    pub cors_allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GcpConfig {
    pub project_id: String,
    pub dataset_id: String,
    pub control_table: String,
    /// Vertex AI region. BigQuery jobs do not use it.
    pub region: String,
    /// BigQuery job location (`US`, `EU`, `europe-west1`, ...). Unset lets
    /// BigQuery resolve it from the dataset.
    #[serde(default)]
    pub bigquery_location: Option<String>,
    /// OAuth2 bearer token, e.g. from `gcloud auth print-access-token`.
    #[serde(default)]
    pub access_token: String,
    /// Per-call upstream timeout. Unset means no client-side timeout.
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
}

impl GcpConfig {
    /// Fully qualified `project.dataset.table` name of the control table.
    pub fn control_table_ref(&self) -> String {
        format!("{}.{}.{}", self.project_id, self.dataset_id, self.control_table)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GeneratorConfig {
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Bigquery,
    Sqlite,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: String,
}

pub const DEFAULT_PROJECT_ID: &str = "cloud-professional-services";
pub const DEFAULT_DATASET_ID: &str = "sprint";
pub const DEFAULT_CONTROL_TABLE: &str = "control_table";
pub const DEFAULT_REGION: &str = "us-central1";

fn default_port() -> u16 { 8080 }
fn default_bind() -> String { "0.0.0.0".to_string() }
fn default_model() -> String { "gemini-2.0-flash".to_string() }
fn default_max_output_tokens() -> u32 { 600 }
fn default_sqlite_path() -> String { "./dq-rules.db".to_string() }
fn default_cors_allowed_origins() -> Vec<String> {
    vec!["http://localhost:8080".to_string()]
}

/// Identifiers end up inside backtick-quoted table references, so they are
/// restricted to the characters BigQuery allows in project/dataset/table ids.
static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_-]+$").expect("Invalid regex")
});

pub fn validate(cfg: &Config) -> Result<()> {
    for (key, value) in [
        ("gcp.project_id", &cfg.gcp.project_id),
        ("gcp.dataset_id", &cfg.gcp.dataset_id),
        ("gcp.control_table", &cfg.gcp.control_table),
        ("gcp.region", &cfg.gcp.region),
    ] {
        if !IDENTIFIER.is_match(value) {
            anyhow::bail!(
                "CONFIG ERROR: {} must be a non-empty identifier of [A-Za-z0-9_-] (got '{}')",
                key,
                value
            );
        }
    }

    if let Some(location) = &cfg.gcp.bigquery_location {
        if !IDENTIFIER.is_match(location) {
            anyhow::bail!(
                "CONFIG ERROR: gcp.bigquery_location must be an identifier of [A-Za-z0-9_-] (got '{}')",
                location
            );
        }
    }

    if cfg.gcp.request_timeout_secs == Some(0) {
        anyhow::bail!("CONFIG ERROR: gcp.request_timeout_secs must be greater than 0 when set");
    }

    // Vertex AI is always called; BigQuery too unless the sqlite backend is selected.
    if cfg.gcp.access_token.trim().is_empty() {
        anyhow::bail!(
            "CONFIG ERROR: gcp.access_token is required. \
            Set DQ_RULES__GCP__ACCESS_TOKEN (e.g. from `gcloud auth print-access-token`)."
        );
    }

    if cfg.generator.max_output_tokens == 0 {
        anyhow::bail!("CONFIG ERROR: generator.max_output_tokens must be greater than 0");
    }

    tracing::info!("Configuration validation passed");
    Ok(())
}

fn with_defaults(
    builder: config::ConfigBuilder<config::builder::DefaultState>,
) -> Result<config::ConfigBuilder<config::builder::DefaultState>> {
    Ok(builder
        .set_default("server.bind", "0.0.0.0")?
        .set_default("server.port", 8080)?
        .set_default("server.cors_allowed_origins", vec!["http://localhost:8080"])?
        .set_default("gcp.project_id", DEFAULT_PROJECT_ID)?
        .set_default("gcp.dataset_id", DEFAULT_DATASET_ID)?
        .set_default("gcp.control_table", DEFAULT_CONTROL_TABLE)?
        .set_default("gcp.region", DEFAULT_REGION)?
        .set_default("gcp.access_token", "")?
        .set_default("generator.model", "gemini-2.0-flash")?
        .set_default("generator.temperature", 0.0)?
        .set_default("generator.max_output_tokens", 600)?
        .set_default("store.backend", "bigquery")?
        .set_default("store.sqlite_path", "./dq-rules.db")?)
}

pub fn load() -> Result<Config> {
    let builder = config::Config::builder()
        .add_source(config::File::with_name("config").required(false))
        .add_source(
            config::Environment::with_prefix("DQ_RULES")
                .prefix_separator("__")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("server.cors_allowed_origins")
                .try_parsing(true),
        );
    let cfg: Config = with_defaults(builder)?.build()?.try_deserialize()?;

    validate(&cfg)?;

    Ok(cfg)
}
