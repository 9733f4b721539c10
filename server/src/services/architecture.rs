//! Cluster architecture detection
//!
//! Performed once per tool call by the pipeline. The primary signal is the
//! FE `run_mode` configuration; when that is inaccessible (older versions,
//! restricted accounts) we fall back to inspecting compute-node topology,
//! mirroring how node listing degrades elsewhere in the engine.

use crate::services::probe::Probe;
use crate::utils::ProbeError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Architecture {
    SharedNothing,
    SharedData,
}

impl Architecture {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SharedNothing => "shared_nothing",
            Self::SharedData => "shared_data",
        }
    }
}

/// Detect the cluster architecture.
pub async fn detect(probe: &dyn Probe) -> Result<Architecture, ProbeError> {
    match probe
        .run_admin_show("SHOW FRONTEND CONFIG LIKE 'run_mode'")
        .await
    {
        Ok(rows) => {
            if let Some(row) = rows.first()
                && let Some(value) = row.str("Value").or_else(|| row.str("VALUE"))
            {
                let arch = if value.eq_ignore_ascii_case("shared_data") {
                    Architecture::SharedData
                } else {
                    Architecture::SharedNothing
                };
                tracing::debug!("Detected architecture from run_mode: {}", arch.as_str());
                return Ok(arch);
            }
            tracing::debug!("run_mode config missing, falling back to topology");
            detect_from_topology(probe).await
        },
        Err(ProbeError::Unavailable(m)) => Err(ProbeError::Unavailable(m)),
        Err(e) => {
            tracing::debug!("run_mode probe failed ({}), falling back to topology", e);
            detect_from_topology(probe).await
        },
    }
}

/// Fallback: a cluster with live compute nodes is shared-data.
async fn detect_from_topology(probe: &dyn Probe) -> Result<Architecture, ProbeError> {
    match probe.run_admin_show("SHOW COMPUTE NODES").await {
        Ok(rows) => {
            let has_alive_cn = rows.iter().any(|row| {
                row.str("Alive")
                    .map(|v| v.eq_ignore_ascii_case("true"))
                    .unwrap_or(false)
            });
            Ok(if has_alive_cn { Architecture::SharedData } else { Architecture::SharedNothing })
        },
        Err(ProbeError::Unavailable(m)) => Err(ProbeError::Unavailable(m)),
        // No compute-node catalog at all: classic shared-nothing deployment.
        Err(_) => Ok(Architecture::SharedNothing),
    }
}
