use crate::error::Result;
use serde::Deserialize;

/// Configuration for one market-data session.
/// Passed from Node.js via the `CtpMd` constructor, or loaded from JSON.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    /// Directory where the native library keeps its flow files (default: "./flow")
    pub flow_dir: Option<String>,

    /// Front address, e.g. "tcp://180.168.146.187:10031"
    pub front_address: Option<String>,

    /// Name server address; takes precedence over the front when both are set
    pub name_server_address: Option<String>,

    /// Name of the per-session worker thread (default: "ctp-md-worker")
    pub worker_thread_name: Option<String>,

    /// Log every dispatched notification (default: false)
    pub verbose: Option<bool>,
}

impl SessionConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn flow_dir(&self) -> &str {
        self.flow_dir.as_deref().unwrap_or("./flow")
    }

    pub fn worker_thread_name(&self) -> &str {
        self.worker_thread_name.as_deref().unwrap_or("ctp-md-worker")
    }

    pub fn verbose(&self) -> bool {
        self.verbose.unwrap_or(false)
    }
}
