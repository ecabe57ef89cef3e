//! Snowflake session over the SQL REST protocol
//!
//! Login with user and password, then execute statements one at a time.
//! Long-running statements answer with an in-progress code and a result URL
//! that is polled until the result is ready. Large results arrive split
//! into chunks, which are downloaded from the URLs in the response and
//! appended to the first rowset.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use snowflow_core::domain::config::ConnectionParameters;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{ClientError, Result};
use crate::session::{PutOptions, QueryResult, WarehouseSession};
use crate::stage::SnowsqlStager;

const CLIENT_APP_ID: &str = "snowflow";
const CLIENT_APP_VERSION: &str = env!("CARGO_PKG_VERSION");
const QUERY_IN_PROGRESS: &str = "333333";
const QUERY_IN_PROGRESS_ASYNC: &str = "333334";
const SSE_C_ALGORITHM: &str = "x-amz-server-side-encryption-customer-algorithm";
const SSE_C_KEY: &str = "x-amz-server-side-encryption-customer-key";
const SSE_C_AES: &str = "AES256";

/// Response envelope shared by every endpoint
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: Option<T>,
    code: Option<String>,
    message: Option<String>,
    #[serde(default)]
    success: bool,
}

#[derive(Debug, Deserialize)]
struct LoginData {
    token: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryData {
    #[serde(default)]
    rowtype: Vec<RowType>,
    #[serde(default)]
    rowset: Option<Vec<Vec<Value>>>,
    rowset_base64: Option<String>,
    #[serde(default)]
    chunks: Vec<ChunkRef>,
    /// Key for chunks stored with customer-side encryption
    qrmk: Option<String>,
    chunk_headers: Option<BTreeMap<String, String>>,
    get_result_url: Option<String>,
    sql_state: Option<String>,
    query_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RowType {
    name: String,
}

/// A result chunk still to be downloaded
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChunkRef {
    url: String,
    #[serde(default)]
    row_count: usize,
}

/// Outcome of one query-request round trip
#[derive(Debug, PartialEq)]
enum QueryStep {
    Done(QueryResult),
    /// First rowset is in hand, the rest must be fetched
    Chunked {
        result: QueryResult,
        chunks: Vec<ChunkRef>,
        headers: Vec<(String, String)>,
    },
    Pending(String),
}

/// A logged-in Snowflake session
pub struct SnowflakeClient {
    base_url: String,
    client: Client,
    token: String,
    stager: SnowsqlStager,
    sequence: AtomicU64,
    poll_interval: Duration,
}

impl SnowflakeClient {
    /// Log in and open a session
    ///
    /// # Errors
    /// Returns an error if the endpoint is unreachable or the login is rejected.
    pub async fn connect(params: ConnectionParameters) -> Result<Self> {
        Self::connect_with_client(params, Client::new()).await
    }

    /// Log in using a configured reqwest Client
    pub async fn connect_with_client(params: ConnectionParameters, client: Client) -> Result<Self> {
        let base_url = params.base_url();
        info!("Connecting to {} as {}", base_url, params.user);

        let mut query = vec![
            ("requestId", Uuid::new_v4().to_string()),
            ("warehouse", params.warehouse.clone()),
            ("databaseName", params.database.clone()),
            ("schemaName", params.schema.clone()),
        ];
        if let Some(role) = &params.role {
            query.push(("roleName", role.clone()));
        }

        let response = client
            .post(format!("{}/session/v1/login-request", base_url))
            .query(&query)
            .header("Accept", "application/json")
            .json(&login_body(&params))
            .send()
            .await?;

        let envelope: Envelope<LoginData> = handle_response(response).await?;
        let token = match envelope {
            Envelope {
                success: true,
                data: Some(data),
                ..
            } => data.token,
            Envelope { code, message, .. } => {
                return Err(ClientError::LoginFailed(format!(
                    "{} ({})",
                    message.unwrap_or_else(|| "no message".to_string()),
                    code.unwrap_or_default()
                )));
            }
        };

        debug!("Session established");
        Ok(Self {
            base_url,
            client,
            token,
            stager: SnowsqlStager::new(params),
            sequence: AtomicU64::new(0),
            poll_interval: Duration::from_millis(500),
        })
    }

    /// Replace the stage uploader, e.g. to point at another `snowsql`
    pub fn with_stager(mut self, stager: SnowsqlStager) -> Self {
        self.stager = stager;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorization(&self) -> String {
        format!("Snowflake Token=\"{}\"", self.token)
    }

    /// Execute one statement, polling until its result is available
    pub async fn query(&self, sql: &str) -> Result<QueryResult> {
        debug!("Executing: {}", sql);
        let sequence_id = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;

        let response = self
            .client
            .post(format!("{}/queries/v1/query-request", self.base_url))
            .query(&[("requestId", Uuid::new_v4().to_string())])
            .header("Authorization", self.authorization())
            .header("Accept", "application/snowflake")
            .json(&json!({
                "sqlText": sql,
                "asyncExec": false,
                "sequenceId": sequence_id,
                "querySubmissionTime": chrono::Utc::now().timestamp_millis(),
            }))
            .send()
            .await?;

        let mut step = interpret(sql, handle_response(response).await?)?;
        loop {
            match step {
                QueryStep::Done(result) => return Ok(result),
                QueryStep::Chunked {
                    mut result,
                    chunks,
                    headers,
                } => {
                    debug!("Fetching {} result chunk(s)", chunks.len());
                    for chunk in &chunks {
                        let rows = fetch_chunk(&self.client, chunk, &headers).await?;
                        result.rows.extend(rows.into_iter().map(to_cells));
                    }
                    return Ok(result);
                }
                QueryStep::Pending(path) => {
                    tokio::time::sleep(self.poll_interval).await;
                    let response = self
                        .client
                        .get(format!("{}{}", self.base_url, path))
                        .header("Authorization", self.authorization())
                        .header("Accept", "application/snowflake")
                        .send()
                        .await?;
                    step = interpret(sql, handle_response(response).await?)?;
                }
            }
        }
    }
}

#[async_trait]
impl WarehouseSession for SnowflakeClient {
    async fn execute(&self, sql: &str) -> Result<QueryResult> {
        self.query(sql).await
    }

    async fn put(
        &self,
        local_pattern: &str,
        stage_location: &str,
        options: &PutOptions,
    ) -> Result<()> {
        self.stager.put(local_pattern, stage_location, options).await
    }
}

fn login_body(params: &ConnectionParameters) -> Value {
    json!({
        "data": {
            "CLIENT_APP_ID": CLIENT_APP_ID,
            "CLIENT_APP_VERSION": CLIENT_APP_VERSION,
            "ACCOUNT_NAME": params.account,
            "LOGIN_NAME": params.user,
            "PASSWORD": params.password,
            "CLIENT_ENVIRONMENT": {
                "APPLICATION": CLIENT_APP_ID,
                "OS": std::env::consts::OS,
            },
        }
    })
}

/// Check the status code and deserialize the JSON body
async fn handle_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();

    if !status.is_success() {
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        return Err(ClientError::api_error(status.as_u16(), error_text));
    }

    response
        .json()
        .await
        .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
}

/// Download one result chunk
///
/// # Errors
/// Returns an error if the download fails or the chunk holds a different
/// number of rows than announced.
async fn fetch_chunk(
    client: &Client,
    chunk: &ChunkRef,
    headers: &[(String, String)],
) -> Result<Vec<Vec<Value>>> {
    let mut request = client.get(&chunk.url);
    for (name, value) in headers {
        request = request.header(name.as_str(), value.as_str());
    }
    let response = request.send().await?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        return Err(ClientError::api_error(status.as_u16(), error_text));
    }

    let rows = parse_chunk(&response.text().await?)?;
    if rows.len() != chunk.row_count {
        return Err(ClientError::ParseError(format!(
            "Result chunk holds {} rows, {} expected",
            rows.len(),
            chunk.row_count
        )));
    }
    Ok(rows)
}

/// JSON chunks are comma-separated rows without the enclosing brackets
fn parse_chunk(body: &str) -> Result<Vec<Vec<Value>>> {
    serde_json::from_str(&format!("[{}]", body))
        .map_err(|e| ClientError::ParseError(format!("Failed to parse result chunk: {}", e)))
}

/// Headers sent with every chunk download
fn chunk_request_headers(
    chunk_headers: Option<BTreeMap<String, String>>,
    qrmk: Option<String>,
) -> Vec<(String, String)> {
    match (chunk_headers, qrmk) {
        (Some(headers), _) if !headers.is_empty() => headers.into_iter().collect(),
        (_, Some(key)) => vec![
            (SSE_C_ALGORITHM.to_string(), SSE_C_AES.to_string()),
            (SSE_C_KEY.to_string(), key),
        ],
        _ => Vec::new(),
    }
}

/// Turn a query response into a result or a result URL to poll
fn interpret(sql: &str, envelope: Envelope<QueryData>) -> Result<QueryStep> {
    let code = envelope.code.as_deref().unwrap_or_default();
    let data = envelope.data.unwrap_or_default();

    if code == QUERY_IN_PROGRESS || code == QUERY_IN_PROGRESS_ASYNC {
        return data.get_result_url.map(QueryStep::Pending).ok_or_else(|| {
            ClientError::ParseError("Query in progress without a result URL".to_string())
        });
    }

    if !envelope.success {
        return Err(ClientError::QueryFailed {
            code: code.to_string(),
            sql_state: data.sql_state.unwrap_or_default(),
            message: envelope
                .message
                .unwrap_or_else(|| "no message".to_string()),
            statement: sql.to_string(),
        });
    }

    let rows = match (data.rowset, data.rowset_base64) {
        (Some(rowset), _) => rowset,
        (None, Some(encoded)) if !encoded.is_empty() => {
            return Err(ClientError::ParseError(
                "Arrow result format is not supported".to_string(),
            ));
        }
        _ => Vec::new(),
    };

    let result = QueryResult {
        columns: data.rowtype.into_iter().map(|r| r.name).collect(),
        rows: rows.into_iter().map(to_cells).collect(),
    };
    if data.chunks.is_empty() {
        return Ok(QueryStep::Done(result));
    }

    debug!(
        "Query {} returned {} extra result chunk(s)",
        data.query_id.unwrap_or_default(),
        data.chunks.len()
    );
    Ok(QueryStep::Chunked {
        result,
        chunks: data.chunks,
        headers: chunk_request_headers(data.chunk_headers, data.qrmk),
    })
}

fn to_cells(row: Vec<Value>) -> Vec<Option<String>> {
    row.into_iter().map(cell_to_string).collect()
}

fn cell_to_string(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s),
        other => Some(other.to_string()),
    }
}
