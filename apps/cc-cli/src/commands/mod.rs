pub mod approval;
pub mod audit;
pub mod wal;
pub mod workflow;

use std::path::Path;

use cc_orchestrator::{Orchestrator, OrchestratorConfig};
use cc_protocol::Metadata;

/// Open the project's orchestrator and bring it up to date with the WAL.
pub fn open(config: &OrchestratorConfig) -> anyhow::Result<Orchestrator> {
    let orchestrator = Orchestrator::open(config)?;
    let report = orchestrator.recover()?;
    tracing::debug!(
        recovered = report.recovered.len(),
        terminal = report.terminal.len(),
        quarantined = report.quarantined.len(),
        failed = report.failed.len(),
        audit_reemitted = report.audit_reemitted,
        "recovery finished"
    );
    for q in &report.quarantined {
        eprintln!(
            "warning: workflow {} quarantined ({}): {}",
            q.workflow_id, q.kind, q.reason
        );
    }
    for f in &report.failed {
        eprintln!("warning: workflow {} not resumed: {}", f.workflow_id, f.error);
    }
    Ok(orchestrator)
}

/// Read and deserialize a JSON file.
pub fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("cannot read {}: {}", path.display(), e))?;
    serde_json::from_str(&content)
        .map_err(|e| anyhow::anyhow!("invalid JSON in {}: {}", path.display(), e))
}

/// Parse repeated `key=value` flags. Values that parse as JSON keep their
/// type; anything else is stored as a string.
pub fn parse_pairs(pairs: &[String]) -> anyhow::Result<Metadata> {
    let mut map = Metadata::new();
    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            anyhow::bail!("expected key=value, got '{}'", pair);
        };
        let value = serde_json::from_str(value)
            .unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
        map.insert(key.to_string(), value);
    }
    Ok(map)
}
