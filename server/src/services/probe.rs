//! Cluster Probe
//!
//! Typed access to the narrow set of database operations the engine needs:
//! parameterized SQL on the frontend query port, admin SHOW statements, and
//! HTTP GET against backend web ports. Statements and bindings pass through
//! to the driver verbatim; nothing is rewritten here.
//!
//! A probe lives for exactly one tool invocation and owns no mutable state
//! visible to callers.

use crate::config::ClusterConfig;
use crate::models::{Row, ScalarValue};
use crate::utils::ProbeError;
use async_trait::async_trait;
use chrono::NaiveDate;
use mysql_async::prelude::Queryable;
use mysql_async::{OptsBuilder, Params, Pool, Value as SqlValue};
use std::time::Duration;

/// Raw HTTP probe result. JSON decoding is the caller's responsibility.
#[derive(Debug, Clone)]
pub struct HttpBody {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl HttpBody {
    pub fn json(&self) -> Result<serde_json::Value, ProbeError> {
        serde_json::from_slice(&self.bytes)
            .map_err(|e| ProbeError::Other(format!("invalid JSON body: {}", e)))
    }
}

/// Capability handle bound to one cluster.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Execute parameterized SQL and return typed rows.
    async fn run_query(&self, sql: &str, params: &[ScalarValue]) -> Result<Vec<Row>, ProbeError>;

    /// Execute an admin SHOW statement (no bind parameters).
    async fn run_admin_show(&self, statement: &str) -> Result<Vec<Row>, ProbeError>;

    /// HTTP GET against a node endpoint; returns raw bytes + content type.
    async fn http_get(&self, host: &str, port: u16, path: &str) -> Result<HttpBody, ProbeError>;
}

/// Validate a caller-interpolated clause value (LIMIT and friends) that the
/// dialect does not accept as a bound parameter.
pub fn validate_limit(value: i64) -> Result<u64, ProbeError> {
    u64::try_from(value)
        .map_err(|_| ProbeError::Other(format!("LIMIT must be non-negative, got {}", value)))
}

// ============================================================================
// MySQL-protocol implementation
// ============================================================================

/// Production probe speaking the MySQL protocol to the FE plus plain HTTP to
/// node web ports.
pub struct MysqlProbe {
    pool: Pool,
    http_client: reqwest::Client,
}

impl MysqlProbe {
    pub fn connect(config: &ClusterConfig) -> Self {
        let opts = OptsBuilder::default()
            .ip_or_hostname(config.fe_host.clone())
            .tcp_port(config.fe_query_port)
            .user(Some(config.user.clone()))
            .pass(Some(config.password.clone()))
            .prefer_socket(false);

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .unwrap_or_default();

        Self { pool: Pool::new(opts), http_client }
    }

    /// Release pooled connections. Called on every dispatch exit path.
    pub async fn close(self) {
        if let Err(e) = self.pool.disconnect().await {
            tracing::warn!("Failed to disconnect probe pool: {}", e);
        }
    }

    fn map_error(err: mysql_async::Error) -> ProbeError {
        match err {
            mysql_async::Error::Server(ref server) => {
                let message = server.message.clone();
                match server.code {
                    // access denied / privilege errors
                    1044 | 1045 | 1142 | 1227 => ProbeError::PermissionDenied(message),
                    // missing relation / database / view: the driver surfaces
                    // a well-known class for absent objects
                    1049 | 1146 | 1305 => ProbeError::Absent(message),
                    // parse / unknown column errors
                    1054 | 1064 | 1149 => ProbeError::Syntax(message),
                    _ => ProbeError::Other(message),
                }
            },
            mysql_async::Error::Io(e) => ProbeError::Unavailable(e.to_string()),
            mysql_async::Error::Driver(e) => ProbeError::Unavailable(e.to_string()),
            other => ProbeError::Other(other.to_string()),
        }
    }

    fn to_sql_value(value: &ScalarValue) -> SqlValue {
        match value {
            ScalarValue::Integer(v) => SqlValue::Int(*v),
            ScalarValue::Float(v) => SqlValue::Double(*v),
            ScalarValue::Text(s) => SqlValue::Bytes(s.clone().into_bytes()),
            ScalarValue::Timestamp(ts) => {
                SqlValue::Bytes(ts.format("%Y-%m-%d %H:%M:%S").to_string().into_bytes())
            },
            ScalarValue::Null => SqlValue::NULL,
        }
    }

    fn from_sql_value(value: &SqlValue) -> ScalarValue {
        match value {
            SqlValue::NULL => ScalarValue::Null,
            SqlValue::Int(v) => ScalarValue::Integer(*v),
            SqlValue::UInt(v) => i64::try_from(*v)
                .map(ScalarValue::Integer)
                .unwrap_or(ScalarValue::Float(*v as f64)),
            SqlValue::Float(v) => ScalarValue::Float(*v as f64),
            SqlValue::Double(v) => ScalarValue::Float(*v),
            SqlValue::Date(year, month, day, hour, minute, second, micros) => {
                NaiveDate::from_ymd_opt(*year as i32, *month as u32, *day as u32)
                    .and_then(|d| {
                        d.and_hms_micro_opt(*hour as u32, *minute as u32, *second as u32, *micros)
                    })
                    .map(ScalarValue::Timestamp)
                    .unwrap_or(ScalarValue::Null)
            },
            SqlValue::Bytes(bytes) => {
                ScalarValue::Text(String::from_utf8_lossy(bytes).into_owned())
            },
            SqlValue::Time(..) => ScalarValue::Text(format!("{:?}", value)),
        }
    }

    fn convert_rows(rows: Vec<mysql_async::Row>) -> Vec<Row> {
        rows.into_iter()
            .map(|raw| {
                let mut row = Row::new();
                let columns = raw.columns();
                for (i, column) in columns.iter().enumerate() {
                    let value = raw
                        .as_ref(i)
                        .map(Self::from_sql_value)
                        .unwrap_or(ScalarValue::Null);
                    row.set(column.name_str().into_owned(), value);
                }
                row
            })
            .collect()
    }
}

#[async_trait]
impl Probe for MysqlProbe {
    async fn run_query(&self, sql: &str, params: &[ScalarValue]) -> Result<Vec<Row>, ProbeError> {
        tracing::debug!("Probe SQL: {}", sql);
        let mut conn = self.pool.get_conn().await.map_err(Self::map_error)?;

        let rows: Vec<mysql_async::Row> = if params.is_empty() {
            conn.query(sql).await.map_err(Self::map_error)?
        } else {
            let bound: Vec<SqlValue> = params.iter().map(Self::to_sql_value).collect();
            conn.exec(sql, Params::Positional(bound))
                .await
                .map_err(Self::map_error)?
        };

        Ok(Self::convert_rows(rows))
    }

    async fn run_admin_show(&self, statement: &str) -> Result<Vec<Row>, ProbeError> {
        tracing::debug!("Probe admin: {}", statement);
        let mut conn = self.pool.get_conn().await.map_err(Self::map_error)?;
        let rows: Vec<mysql_async::Row> =
            conn.query(statement).await.map_err(Self::map_error)?;
        Ok(Self::convert_rows(rows))
    }

    async fn http_get(&self, host: &str, port: u16, path: &str) -> Result<HttpBody, ProbeError> {
        let path = if path.starts_with('/') { path.to_string() } else { format!("/{}", path) };
        let url = format!("http://{}:{}{}", host, port, path);
        tracing::debug!("Probe HTTP: {}", url);

        let response = self.http_client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() || e.is_connect() {
                ProbeError::Unavailable(format!("GET {} failed: {}", url, e))
            } else {
                ProbeError::Other(format!("GET {} failed: {}", url, e))
            }
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            return Err(ProbeError::PermissionDenied(format!("GET {} returned {}", url, status)));
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ProbeError::Absent(format!("GET {} returned 404", url)));
        }
        if !status.is_success() {
            return Err(ProbeError::Other(format!("GET {} returned {}", url, status)));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/octet-stream")
            .to_string();

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ProbeError::Other(format!("GET {} body read failed: {}", url, e)))?;

        Ok(HttpBody { content_type, bytes: bytes.to_vec() })
    }
}
