// error.rs — Error types for plan-token minting and verification.

use cc_protocol::ProtocolError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PlanTokenError {
    /// Two artifacts in one plan share a name.
    #[error("malformed artifact set: duplicate artifact name '{name}'")]
    MalformedArtifactSet { name: String },

    /// A persisted token uses a format version this codec does not speak.
    /// Decoding fails closed; there is no best-effort fallback.
    #[error("unsupported plan-token version '{found}' (codec speaks '{supported}')")]
    UnsupportedTokenVersion { found: String, supported: String },

    /// A persisted token could not be decoded.
    #[error("malformed plan-token: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
