// codec.rs — Mint, verify and decode plan-tokens.
//
// The digest covers the canonical JSON of:
//   version, artifacts (sorted by name), engine_id, model, protocol_version,
//   workspace_hash, created_at, governance_hash?, policy_digest?
//
// Verification recomputes that digest with the candidate context substituted
// for the token's own and compares it byte-for-byte with `token.token`.
// There is no partial or fuzzy match.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use cc_protocol::hasher;

use crate::error::PlanTokenError;
use crate::token::{canonicalize_artifacts, DigestInput, PlanContext, PlanToken};

/// Format version minted by this codec.
pub const CURRENT_TOKEN_VERSION: &str = "2";

/// Just the discriminant of a persisted token, read before the body.
#[derive(Deserialize)]
struct VersionHeader {
    version: Option<String>,
}

/// Stateless plan-token codec.
#[derive(Debug, Clone, Default)]
pub struct PlanTokenCodec;

impl PlanTokenCodec {
    pub fn new() -> Self {
        Self
    }

    /// The token format version this codec mints and accepts.
    pub fn version(&self) -> &'static str {
        CURRENT_TOKEN_VERSION
    }

    /// Mint a token over `context`, stamped with the current time.
    pub fn mint(&self, context: PlanContext) -> Result<PlanToken, PlanTokenError> {
        self.mint_at(context, Utc::now())
    }

    /// Mint a token with an explicit creation time.
    ///
    /// Artifacts are sorted by name; duplicate names fail with
    /// [`PlanTokenError::MalformedArtifactSet`].
    pub fn mint_at(
        &self,
        context: PlanContext,
        created_at: DateTime<Utc>,
    ) -> Result<PlanToken, PlanTokenError> {
        let artifacts = canonicalize_artifacts(context.artifacts.clone())?;
        let token = digest(self.version(), &created_at, &artifacts, &context)?;

        tracing::debug!(
            token = %token,
            artifacts = artifacts.len(),
            engine_id = %context.engine_id,
            "minted plan-token"
        );

        Ok(PlanToken {
            token,
            version: self.version().to_string(),
            artifacts,
            engine_id: context.engine_id,
            model: context.model,
            protocol_version: context.protocol_version,
            workspace_hash: context.workspace_hash,
            created_at,
            governance_hash: context.governance_hash,
            policy_digest: context.policy_digest,
        })
    }

    /// Recompute the digest from `candidate` (with the token's own version and
    /// timestamp) and compare it with `token.token`.
    ///
    /// Returns `Ok(false)` on any mismatch, including a candidate whose
    /// artifact set contains duplicate names. A token whose version differs
    /// from the codec's fails closed with
    /// [`PlanTokenError::UnsupportedTokenVersion`].
    pub fn verify(&self, token: &PlanToken, candidate: &PlanContext) -> Result<bool, PlanTokenError> {
        self.ensure_supported(&token.version)?;

        let artifacts = match canonicalize_artifacts(candidate.artifacts.clone()) {
            Ok(artifacts) => artifacts,
            Err(PlanTokenError::MalformedArtifactSet { name }) => {
                tracing::warn!(artifact = %name, "candidate context has duplicate artifact");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };
        let recomputed = digest(&token.version, &token.created_at, &artifacts, candidate)?;
        Ok(recomputed == token.token)
    }

    /// Whether the token's digest still matches its own fields.
    pub fn verify_self(&self, token: &PlanToken) -> Result<bool, PlanTokenError> {
        self.verify(token, &token.context())
    }

    /// Decode a persisted token, dispatching on its `version` discriminant first.
    pub fn decode(&self, bytes: &[u8]) -> Result<PlanToken, PlanTokenError> {
        let header: VersionHeader = serde_json::from_slice(bytes)?;
        let found = header.version.unwrap_or_else(|| "<missing>".to_string());
        self.ensure_supported(&found)?;
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Serialize a token for persistence.
    pub fn encode(&self, token: &PlanToken) -> Result<Vec<u8>, PlanTokenError> {
        self.ensure_supported(&token.version)?;
        Ok(serde_json::to_vec_pretty(token)?)
    }

    fn ensure_supported(&self, version: &str) -> Result<(), PlanTokenError> {
        if version != self.version() {
            return Err(PlanTokenError::UnsupportedTokenVersion {
                found: version.to_string(),
                supported: self.version().to_string(),
            });
        }
        Ok(())
    }
}

fn digest(
    version: &str,
    created_at: &DateTime<Utc>,
    artifacts: &[crate::PlanArtifactHash],
    context: &PlanContext,
) -> Result<String, PlanTokenError> {
    let input = DigestInput::new(version, created_at, artifacts, context);
    Ok(hasher::hash_canonical(&input)?)
}
