use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::config::WarehouseConfig;
use crate::okr::InsertStatement;

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("BigQuery access token not found in config or BIGQUERY_ACCESS_TOKEN")]
    MissingToken,

    #[error("Failed to configure BigQuery HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("BigQuery request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("BigQuery rejected the insert ({status}): {message}")]
    Rejected { status: StatusCode, message: String },
}

/// Destination store that fact rows are appended to.
#[async_trait]
pub trait Warehouse: Send + Sync {
    /// Run one append statement.
    async fn append(&self, statement: &InsertStatement) -> Result<(), WriteError>;
}

/// Runs statements through the BigQuery `jobs.query` REST method.
#[derive(Debug, Clone)]
pub struct BigQueryWarehouse {
    http: reqwest::Client,
    endpoint: String,
    access_token: String,
    timeout_ms: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    query: String,
    use_legacy_sql: bool,
    parameter_mode: &'a str,
    query_parameters: Vec<QueryParameterJson>,
    timeout_ms: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryParameterJson {
    name: &'static str,
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

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

impl BigQueryWarehouse {
    pub fn new(config: &WarehouseConfig) -> Result<Self, WriteError> {
        let access_token = config
            .access_token
            .clone()
            .ok_or(WriteError::MissingToken)?;
        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(WriteError::Client)?;
        let timeout_ms = u64::try_from(config.timeout().as_millis()).unwrap_or(u64::MAX);

        Ok(Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            access_token,
            timeout_ms,
        })
    }

    fn request_body(&self, statement: &InsertStatement) -> QueryRequest<'static> {
        QueryRequest {
            query: statement.sql(),
            use_legacy_sql: false,
            parameter_mode: "NAMED",
            query_parameters: statement
                .parameters
                .iter()
                .map(|p| QueryParameterJson {
                    name: p.name,
                    parameter_type: ParameterType {
                        kind: p.value.type_name(),
                    },
                    parameter_value: ParameterValue {
                        value: p.value.render(),
                    },
                })
                .collect(),
            timeout_ms: self.timeout_ms,
        }
    }
}

#[async_trait]
impl Warehouse for BigQueryWarehouse {
    #[instrument(skip(self, statement), fields(destination = %statement.destination))]
    async fn append(&self, statement: &InsertStatement) -> Result<(), WriteError> {
        let url = format!(
            "{}/projects/{}/queries",
            self.endpoint,
            statement.destination.project.as_str()
        );
        debug!(sql = %statement.sql(), "running BigQuery insert");

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&self.request_body(statement))
            .send()
            .await
            .map_err(WriteError::Transport)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_else(|e| {
                debug!(error = %e, "failed to read BigQuery error body");
                String::new()
            });
            let message = serde_json::from_str::<ErrorResponse>(&text)
                .map(|e| e.error.message)
                .unwrap_or(text);
            return Err(WriteError::Rejected { status, message });
        }

        debug!(%status, "BigQuery accepted insert");
        Ok(())
    }
}

/// Logs statements instead of running them.
#[derive(Debug, Clone, Default)]
pub struct DryRunWarehouse;

#[async_trait]
impl Warehouse for DryRunWarehouse {
    async fn append(&self, statement: &InsertStatement) -> Result<(), WriteError> {
        let parameters: Vec<String> = statement
            .parameters
            .iter()
            .map(|p| format!("{}={}", p.name, p.value.render()))
            .collect();
        info!(sql = %statement.sql(), parameters = %parameters.join(" "), "dry run, insert not sent");
        Ok(())
    }
}
