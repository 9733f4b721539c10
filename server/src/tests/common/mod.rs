// Common test utilities: an in-memory probe with canned responses.

use crate::models::{Row, ScalarValue};
use crate::services::probe::{HttpBody, Probe};
use crate::utils::ProbeError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

type CannedResult = Result<Vec<Row>, ProbeError>;

/// Probe over canned data. SQL and admin statements match by substring
/// (first registered match wins); HTTP paths match exactly. Optional
/// per-statement delays simulate out-of-order completion.
#[derive(Default)]
pub struct FakeProbe {
    statements: Vec<(String, CannedResult)>,
    http: HashMap<String, Result<serde_json::Value, ProbeError>>,
    delays: Vec<(String, Duration)>,
    log: Mutex<Vec<String>>,
}

impl FakeProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register canned rows for any statement containing `pattern`.
    pub fn on(mut self, pattern: &str, rows: Vec<Row>) -> Self {
        self.statements.push((pattern.to_string(), Ok(rows)));
        self
    }

    pub fn on_error(mut self, pattern: &str, error: ProbeError) -> Self {
        self.statements.push((pattern.to_string(), Err(error)));
        self
    }

    pub fn on_http(mut self, path: &str, body: serde_json::Value) -> Self {
        self.http.insert(path.to_string(), Ok(body));
        self
    }

    pub fn delay(mut self, pattern: &str, delay: Duration) -> Self {
        self.delays.push((pattern.to_string(), delay));
        self
    }

    /// Convenience: answer the architecture probe.
    pub fn shared_data(self) -> Self {
        self.on(
            "run_mode",
            vec![Row::new().with("Key", "run_mode").with("Value", "shared_data")],
        )
    }

    pub fn shared_nothing(self) -> Self {
        self.on(
            "run_mode",
            vec![Row::new().with("Key", "run_mode").with("Value", "shared_nothing")],
        )
    }

    pub fn executed(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    async fn lookup(&self, statement: &str) -> CannedResult {
        self.log.lock().unwrap().push(statement.to_string());
        for (pattern, delay) in &self.delays {
            if statement.contains(pattern.as_str()) {
                tokio::time::sleep(*delay).await;
            }
        }
        for (pattern, result) in &self.statements {
            if statement.contains(pattern.as_str()) {
                return result.clone();
            }
        }
        Err(ProbeError::Absent(format!("no canned response for: {}", statement)))
    }
}

#[async_trait]
impl Probe for FakeProbe {
    async fn run_query(
        &self,
        sql: &str,
        _params: &[ScalarValue],
    ) -> Result<Vec<Row>, ProbeError> {
        self.lookup(sql).await
    }

    async fn run_admin_show(&self, statement: &str) -> Result<Vec<Row>, ProbeError> {
        self.lookup(statement).await
    }

    async fn http_get(
        &self,
        _host: &str,
        _port: u16,
        path: &str,
    ) -> Result<HttpBody, ProbeError> {
        match self.http.get(path) {
            Some(Ok(body)) => Ok(HttpBody {
                content_type: "application/json".to_string(),
                bytes: serde_json::to_vec(body).expect("canned body serializes"),
            }),
            Some(Err(e)) => Err(e.clone()),
            None => Err(ProbeError::Absent(format!("no canned response for path {}", path))),
        }
    }
}
