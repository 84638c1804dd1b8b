// token.rs — PlanToken data model.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cc_protocol::EngineArtifact;

use crate::error::PlanTokenError;

/// Hash of one artifact that contributed to a plan-token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlanArtifactHash {
    pub name: String,
    pub hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl PlanArtifactHash {
    pub fn new(name: impl Into<String>, hash: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hash: hash.into(),
            size: None,
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }
}

impl From<&EngineArtifact> for PlanArtifactHash {
    fn from(artifact: &EngineArtifact) -> Self {
        Self {
            name: artifact.name.clone(),
            hash: artifact.hash.clone(),
            size: artifact.size,
        }
    }
}

/// Sort artifacts by name and reject duplicate names.
///
/// The token digest is computed over this canonical order, so two plans that
/// list the same artifacts in different orders bind identically.
pub(crate) fn canonicalize_artifacts(
    mut artifacts: Vec<PlanArtifactHash>,
) -> Result<Vec<PlanArtifactHash>, PlanTokenError> {
    artifacts.sort_by(|a, b| a.name.cmp(&b.name));
    let mut seen = BTreeSet::new();
    for artifact in &artifacts {
        if !seen.insert(artifact.name.as_str()) {
            return Err(PlanTokenError::MalformedArtifactSet {
                name: artifact.name.clone(),
            });
        }
    }
    Ok(artifacts)
}

/// The context a plan-token binds: everything except the digest, version and timestamp.
///
/// At mint time this is the flight-plan's context; at verify time it is the
/// candidate context presented by a take-off.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlanContext {
    pub artifacts: Vec<PlanArtifactHash>,
    pub workspace_hash: String,
    pub engine_id: String,
    pub model: String,
    pub protocol_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub governance_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_digest: Option<String>,
}

impl PlanContext {
    pub fn new(
        artifacts: Vec<PlanArtifactHash>,
        workspace_hash: impl Into<String>,
        engine_id: impl Into<String>,
        model: impl Into<String>,
        protocol_version: impl Into<String>,
    ) -> Self {
        Self {
            artifacts,
            workspace_hash: workspace_hash.into(),
            engine_id: engine_id.into(),
            model: model.into(),
            protocol_version: protocol_version.into(),
            governance_hash: None,
            policy_digest: None,
        }
    }

    /// SHA-256 of the governance context (OPA policies, ONNX models, gateway rules).
    pub fn with_governance_hash(mut self, hash: impl Into<String>) -> Self {
        self.governance_hash = Some(hash.into());
        self
    }

    /// SHA-256 of the policy configuration evaluated during flight-plan.
    pub fn with_policy_digest(mut self, digest: impl Into<String>) -> Self {
        self.policy_digest = Some(digest.into());
        self
    }

    /// Same context with the artifact list swapped, e.g. for the executed artifacts.
    pub fn with_artifacts(mut self, artifacts: Vec<PlanArtifactHash>) -> Self {
        self.artifacts = artifacts;
        self
    }
}

/// A minted plan-token. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlanToken {
    /// SHA-256 over the canonical serialization of every other field.
    pub token: String,
    /// Token format version discriminant.
    pub version: String,
    /// Artifacts in canonical (name) order.
    pub artifacts: Vec<PlanArtifactHash>,
    pub engine_id: String,
    pub model: String,
    pub protocol_version: String,
    pub workspace_hash: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub governance_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_digest: Option<String>,
}

impl PlanToken {
    /// The context this token was minted over.
    pub fn context(&self) -> PlanContext {
        PlanContext {
            artifacts: self.artifacts.clone(),
            workspace_hash: self.workspace_hash.clone(),
            engine_id: self.engine_id.clone(),
            model: self.model.clone(),
            protocol_version: self.protocol_version.clone(),
            governance_hash: self.governance_hash.clone(),
            policy_digest: self.policy_digest.clone(),
        }
    }
}

/// Borrowed view of the digested fields, in the shape that gets canonicalized.
#[derive(Serialize)]
pub(crate) struct DigestInput<'a> {
    pub version: &'a str,
    pub artifacts: &'a [PlanArtifactHash],
    pub engine_id: &'a str,
    pub model: &'a str,
    pub protocol_version: &'a str,
    pub workspace_hash: &'a str,
    pub created_at: &'a DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub governance_hash: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_digest: Option<&'a str>,
}

impl<'a> DigestInput<'a> {
    pub fn new(
        version: &'a str,
        created_at: &'a DateTime<Utc>,
        artifacts: &'a [PlanArtifactHash],
        context: &'a PlanContext,
    ) -> Self {
        Self {
            version,
            artifacts,
            engine_id: &context.engine_id,
            model: &context.model,
            protocol_version: &context.protocol_version,
            workspace_hash: &context.workspace_hash,
            created_at,
            governance_hash: context.governance_hash.as_deref(),
            policy_digest: context.policy_digest.as_deref(),
        }
    }
}
