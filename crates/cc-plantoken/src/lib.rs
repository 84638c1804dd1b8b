//! # cc-plantoken
//!
//! Cryptographic binding between a flight-plan and its take-off.
//!
//! A [`PlanToken`] records the artifacts a flight-plan proposed together with
//! the workspace, engine, model and governance context it was produced under.
//! Its `token` field is a SHA-256 digest over the canonical serialization of
//! every other field. A take-off is accepted only if the context it presents
//! recomputes to exactly that digest.
//!
//! ```rust
//! use cc_plantoken::{PlanArtifactHash, PlanContext, PlanTokenCodec};
//!
//! let codec = PlanTokenCodec::new();
//! let context = PlanContext::new(
//!     vec![PlanArtifactHash::new("plan.json", "h1")],
//!     "ws-hash",
//!     "terraform",
//!     "model-x",
//!     "1",
//! );
//! let token = codec.mint(context.clone()).unwrap();
//! assert!(codec.verify(&token, &context).unwrap());
//! ```
//!
//! The codec is a pure function over the supplied values; callers own persistence.

pub mod codec;
pub mod diff;
pub mod error;
pub mod token;

pub use codec::{PlanTokenCodec, CURRENT_TOKEN_VERSION};
pub use diff::diff_artifacts;
pub use error::PlanTokenError;
pub use token::{PlanArtifactHash, PlanContext, PlanToken};
