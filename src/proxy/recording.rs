//! Durable recording bundles: one directory per intercepted JSON-RPC entry.
//!
//! The stub files (`meta.json`, `rpc.json`, `calldata.json`) are written
//! synchronously before the scan resolves, so a killed process or a dropped
//! client still leaves an artifact on disk. The finalizing write enriches
//! `meta.json` and adds `analyzeResponse.json` / `rendered.txt` when the
//! scan produced them.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

use crate::calldata::CalldataInput;
use crate::chains::Chain;
use crate::policy::Decision;
use crate::scan::ScanResponse;

/// Lifecycle of one recorded entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Pending,
    Forwarded,
    Blocked,
    Error,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordMeta {
    status: RecordStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    action: Option<Decision>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    recommendation: Option<crate::findings::Recommendation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    simulation_success: Option<bool>,
    created_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    completed_at: Option<String>,
}

/// Writer rooted at the configured record directory; disabled when none is
/// configured.
pub struct RecordingWriter {
    root: Option<PathBuf>,
}

impl RecordingWriter {
    pub fn new(root: Option<PathBuf>) -> Self {
        Self { root }
    }

    /// Write the stub bundle for one intercepted entry. Returns `None` when
    /// recording is disabled or the directory cannot be created.
    pub fn start(
        &self,
        method: &str,
        chain: Chain,
        calldata: Option<&CalldataInput>,
        raw_entry: &Value,
    ) -> Option<RecordingBundle> {
        let root = self.root.as_ref()?;
        let to = calldata
            .map(|c| c.to.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let from = calldata
            .and_then(|c| c.from.map(|f| f.to_string()))
            .unwrap_or_else(|| "unknown".to_string());
        let stamp = Utc::now().format("%Y-%m-%dT%H-%M-%S%.3fZ");
        let suffix = &uuid::Uuid::new_v4().simple().to_string()[..8];
        let dir = root.join(format!("{stamp}__{method}__{chain}__{to}__{from}__{suffix}"));
        if let Err(err) = std::fs::create_dir_all(&dir) {
            tracing::warn!(dir = %dir.display(), error = %err, "recording directory creation failed");
            return None;
        }

        let bundle = RecordingBundle { dir };
        bundle.write_json(
            "meta.json",
            &RecordMeta {
                status: RecordStatus::Pending,
                action: None,
                recommendation: None,
                simulation_success: None,
                created_at: Utc::now().to_rfc3339(),
                completed_at: None,
            },
        );
        bundle.write_json("rpc.json", raw_entry);
        match calldata {
            Some(calldata) => bundle.write_json("calldata.json", calldata),
            None => bundle.write_json("calldata.json", &Value::Null),
        }
        Some(bundle)
    }
}

/// Handle to one on-disk bundle.
pub struct RecordingBundle {
    dir: PathBuf,
}

impl RecordingBundle {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The finalizing write: enrich `meta.json`, and attach the response
    /// and rendered summary when present.
    pub fn finalize(
        &self,
        status: RecordStatus,
        action: Option<Decision>,
        response: Option<&ScanResponse>,
        rendered: Option<&str>,
    ) {
        let meta = RecordMeta {
            status,
            action,
            recommendation: response.map(|r| r.scan.recommendation),
            simulation_success: response
                .and_then(|r| r.scan.simulation.as_ref())
                .map(|s| s.success),
            created_at: self.read_created_at(),
            completed_at: Some(Utc::now().to_rfc3339()),
        };
        self.write_json("meta.json", &meta);
        if let Some(response) = response {
            self.write_json("analyzeResponse.json", response);
        }
        if let Some(rendered) = rendered {
            if let Err(err) = std::fs::write(self.dir.join("rendered.txt"), rendered) {
                tracing::warn!(error = %err, "rendered.txt write failed");
            }
        }
    }

    fn read_created_at(&self) -> String {
        std::fs::read_to_string(self.dir.join("meta.json"))
            .ok()
            .and_then(|raw| serde_json::from_str::<RecordMeta>(&raw).ok())
            .map(|meta| meta.created_at)
            .unwrap_or_else(|| Utc::now().to_rfc3339())
    }

    fn write_json<T: Serialize>(&self, name: &str, value: &T) {
        match serde_json::to_vec_pretty(value) {
            Ok(bytes) => {
                if let Err(err) = std::fs::write(self.dir.join(name), bytes) {
                    tracing::warn!(file = name, error = %err, "recording write failed");
                }
            }
            Err(err) => tracing::warn!(file = name, error = %err, "recording encode failed"),
        }
    }
}
